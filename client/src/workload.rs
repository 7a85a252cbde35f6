//! Demo workload: naive square matrix multiplication.
//!
//! The point is not the arithmetic; it is a compute phase with a known
//! shape whose power draw shows up clearly in the meter's report. Tags
//! bracket operand generation and the multiply itself, per size, so the
//! report's timestamp table lines up with the phases.

use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::{ClientError, SessionClient};

/// Matrix sizes the demo runs by default.
pub const DEFAULT_SIZES: [usize; 5] = [100, 250, 500, 750, 1000];

/// Fill an n x n matrix with values in 1..=20, row major.
fn random_matrix(n: usize, rng: &mut impl Rng) -> Vec<u64> {
    (0..n * n).map(|_| rng.gen_range(1..=20)).collect()
}

/// Naive O(n^3) square matrix product over row-major operands.
pub fn multiply(a: &[u64], b: &[u64], n: usize) -> Vec<u64> {
    let mut out = vec![0u64; n * n];
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0u64;
            for k in 0..n {
                sum += a[i * n + k] * b[k * n + j];
            }
            out[i * n + j] = sum;
        }
    }
    out
}

fn checksum(m: &[u64]) -> u64 {
    m.iter().fold(0u64, |acc, v| acc.wrapping_add(*v))
}

/// Run the multiplication ladder over an open session, tagging each phase.
pub async fn run_matmul_workload<S>(
    client: &mut SessionClient<S>,
    sizes: &[usize],
) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut rng = rand::thread_rng();
    for &n in sizes {
        client.tag(&format!("start n={n}")).await?;
        let a = random_matrix(n, &mut rng);
        let b = random_matrix(n, &mut rng);

        client.tag("matmul start").await?;
        let product = multiply(&a, &b, n);
        client.tag("matmul end").await?;

        info!(n, checksum = checksum(&product), "matmul complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jouletrace_shared::{Connection, Message, TransportConfig};

    #[test]
    fn test_multiply_known_case() {
        let a = vec![1, 2, 3, 4];
        let b = vec![5, 6, 7, 8];
        assert_eq!(multiply(&a, &b, 2), vec![19, 22, 43, 50]);
    }

    #[test]
    fn test_multiply_by_identity() {
        let mut rng = rand::thread_rng();
        let a = random_matrix(3, &mut rng);
        let mut identity = vec![0u64; 9];
        for i in 0..3 {
            identity[i * 3 + i] = 1;
        }
        assert_eq!(multiply(&a, &identity, 3), a);
    }

    #[test]
    fn test_random_matrix_bounds() {
        let mut rng = rand::thread_rng();
        let m = random_matrix(8, &mut rng);
        assert_eq!(m.len(), 64);
        assert!(m.iter().all(|&v| (1..=20).contains(&v)));
    }

    #[tokio::test]
    async fn test_workload_tags_every_phase() {
        let (a, b) = tokio::io::duplex(4096);
        let mut client =
            SessionClient::from_connection(Connection::new(a, TransportConfig::default()));
        let mut meter = Connection::new(b, TransportConfig::default());

        let server = tokio::spawn(async move {
            assert!(matches!(
                meter.read_message().await.unwrap(),
                Message::SessionStart { .. }
            ));
            meter.write_message(&Message::HandshakeOk).await.unwrap();

            let mut labels = Vec::new();
            for _ in 0..6 {
                match meter.read_message().await.unwrap() {
                    Message::SessionTag { label, .. } => labels.push(label),
                    other => panic!("expected tag, got {:?}", other),
                }
            }
            assert_eq!(
                labels,
                vec![
                    "start n=2",
                    "matmul start",
                    "matmul end",
                    "start n=3",
                    "matmul start",
                    "matmul end",
                ]
            );
        });

        client.start_session().await.unwrap();
        run_matmul_workload(&mut client, &[2, 3]).await.unwrap();
        server.await.unwrap();
    }
}
