//! Server-side building blocks of the farming service.
//!
//! - [`config`] - CLI / environment configuration.
//! - [`service`] - RPC dispatcher implementing the generated service trait.
//! - [`session`] - session lifecycle, cancellation and in-flight tracking.
//! - [`streaming`] - the three stream session state machines.
//! - [`telemetry`] - logging, tracing and metrics setup.
//! - [`transport`] - listener binding, router assembly and signal handling.

pub mod config;
pub mod service;
pub mod session;
pub mod streaming;
pub mod telemetry;
pub mod transport;
