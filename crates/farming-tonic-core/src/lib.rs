//! Shared protocol, error and domain definitions for the farming gRPC service.
//!
//! Both the server and the terminal client depend on this crate so that they
//! agree on the wire contract ([`proto`]), the error mapping onto
//! [`tonic::Status`] ([`Error`]), and the agronomic formulas ([`calc`]).

mod common;
pub use common::*;
