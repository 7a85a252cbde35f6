//! Admin HTTP server for health checks and metrics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};

use crate::audit;
use crate::metrics;

/// Start the admin HTTP server serving /healthz, /readyz, and /metrics.
///
/// `ready` flips true once the session listener is bound; until then
/// /readyz answers 503.
pub async fn serve_admin(addr: SocketAddr, ready: Arc<AtomicBool>) -> Result<(), hyper::Error> {
    let make_svc = make_service_fn(move |_| {
        let ready = ready.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let ready = ready.clone();
                async move { handle(req, &ready) }
            }))
        }
    });

    tracing::info!("Admin HTTP server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await
}

fn handle(req: Request<Body>, ready: &AtomicBool) -> Result<Response<Body>, hyper::Error> {
    let path = req.uri().path();
    let (response, status) = match path {
        "/healthz" => (Response::new(Body::from("ok\n")), 200),

        "/readyz" => {
            if ready.load(Ordering::Relaxed) {
                (Response::new(Body::from("ready\n")), 200)
            } else {
                (
                    Response::builder()
                        .status(StatusCode::SERVICE_UNAVAILABLE)
                        .body(Body::from("not ready\n"))
                        .unwrap(),
                    503,
                )
            }
        }

        "/metrics" => {
            let body = metrics::encode_metrics();
            (
                Response::builder()
                    .header("Content-Type", "text/plain; version=0.0.4")
                    .body(Body::from(body))
                    .unwrap(),
                200,
            )
        }

        _ => (
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::from("not found\n"))
                .unwrap(),
            404,
        ),
    };

    if path == "/metrics" || path == "/readyz" || path == "/healthz" {
        audit::admin_http_request(path, status);
    }
    Ok(response)
}
