//! Meter service library
//!
//! Accepts one measurement session at a time from an instrumented
//! workload, drives a backend that records markers (and, with the DAQ
//! backend, per-window power readings), and writes the session report the
//! analysis tooling consumes.

pub mod admin;
pub mod audit;
pub mod backend;
pub mod config;
pub mod markers;
pub mod metrics;
pub mod server;
pub mod session;
