//! # `farming-tonic-server`: smart-farming gRPC service
//!
//! A [`tonic`] server exposing one RPC per gRPC call shape:
//!
//! - **Unary** `Calculate` - nitrogen fertilizer needed for a field.
//! - **Server streaming** `TemperatureStream` - synthetic sensor readings,
//!   one per interval, ten per call.
//! - **Client streaming** `ComputeAverage` - average soil moisture over a
//!   stream of samples.
//! - **Bidirectional** `FindOptimum` - one watering recommendation per
//!   moisture query, in order.
//!
//! Each streaming call is handled by its own session state machine that owns
//! its timer or accumulator and releases it on completion, cancellation,
//! timeout or error. Shutdown drains live sessions before cancelling them.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin farming-tonic-server --release
//! ```
//!
//! Then connect via gRPC on `127.0.0.1:50051`, e.g. with the
//! `farming-client` binary or `grpcurl` (reflection is enabled).

pub mod server;
