//! Session protocol: wire format, framed transport, lifecycle states.
//!
//! Everything both endpoints must agree on lives here. Policy, such as
//! what a meter does with a session or how a client retries, belongs to
//! the binary crates.

pub mod session;
pub mod transport;
pub mod wire;
