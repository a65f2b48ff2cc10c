//! gRPC service implementation and call dispatch.
//!
//! This module contains the client-facing side of the server: routing each
//! RPC to a domain calculation or a stream session, and surfacing errors as
//! gRPC statuses.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`FarmingService`).

pub mod handler;

pub use handler::FarmingService;
