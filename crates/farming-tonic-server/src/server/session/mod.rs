//! Session lifecycle primitives shared by every streaming call.
//!
//! - [`context`] - per-call cancellation scope, deadline and state enums.
//! - [`tracker`] - in-flight accounting and graceful shutdown.

pub mod context;
pub mod tracker;

pub use context::{SessionContext, SessionState, Termination};
pub use tracker::SessionTracker;
