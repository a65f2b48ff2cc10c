use core::{future, time::Duration};
use farming_tonic_core::{Error, types::Rpc};
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::server::telemetry::{
    decrement_sessions_inflight, increment_sessions_inflight, record_session_duration,
};

/// Lifecycle of a streaming session.
///
/// Every session starts `Open`, becomes `Active` once its run loop starts
/// (emitting readings, accumulating samples or answering queries), and ends
/// `Closed`. `Closed` is terminal: a closed session owns no timer, no
/// accumulator and no output channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Active,
    Closed,
}

/// How a session reached [`SessionState::Closed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// Ran to its natural end (reading limit, end of client input).
    Completed,
    /// The caller dropped the response stream. Nobody is left to tell.
    Disconnected,
    /// The service cancelled the call, e.g. on shutdown.
    Cancelled,
    /// The configured stream deadline passed.
    TimedOut,
    /// The inbound stream reported a transport error.
    Failed,
}

/// Per-call handle given to a session by the [`SessionTracker`].
///
/// Holds the session's cancellation scope and optional deadline, and keeps the
/// tracker's in-flight count raised until it is dropped.
///
/// [`SessionTracker`]: super::tracker::SessionTracker
#[derive(Debug)]
pub struct SessionContext {
    rpc: Rpc,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    _guard: InflightGuard,
}

impl SessionContext {
    pub(super) fn new(
        rpc: Rpc,
        cancel: CancellationToken,
        timeout: Option<Duration>,
        inflight: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            rpc,
            cancel,
            timeout,
            deadline: timeout.map(|after| Instant::now() + after),
            _guard: InflightGuard::new(rpc, inflight),
        }
    }

    /// A context that belongs to no tracker and is never cancelled by one.
    ///
    /// Used to drive sessions directly, outside the service.
    pub fn detached(rpc: Rpc, cancel: CancellationToken, timeout: Option<Duration>) -> Self {
        Self::new(rpc, cancel, timeout, Arc::new(AtomicUsize::new(0)))
    }

    pub fn rpc(&self) -> Rpc {
        self.rpc
    }

    /// Resolves once the call is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Resolves once the deadline passes; never resolves without one.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending::<()>().await,
        }
    }

    /// The error reported to the caller when [`expired`](Self::expired)
    /// fires.
    pub fn timeout_error(&self) -> Error {
        Error::SessionTimeout {
            after: self.timeout.unwrap_or_default(),
        }
    }

    /// The error a session ending with `termination` owes its caller, if any.
    ///
    /// `Failed` carries its own status and is not covered here.
    pub fn termination_error(&self, termination: Termination) -> Option<Error> {
        match termination {
            Termination::TimedOut => Some(self.timeout_error()),
            Termination::Cancelled => Some(Error::RequestCancelled),
            Termination::Completed | Termination::Disconnected | Termination::Failed => None,
        }
    }
}

/// Decrements the in-flight count exactly once, however the session ends.
#[derive(Debug)]
struct InflightGuard {
    rpc: Rpc,
    opened_at: Instant,
    inflight: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn new(rpc: Rpc, inflight: Arc<AtomicUsize>) -> Self {
        inflight.fetch_add(1, Ordering::AcqRel);
        increment_sessions_inflight();
        Self {
            rpc,
            opened_at: Instant::now(),
            inflight,
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_sessions_inflight();
        record_session_duration(self.rpc, self.opened_at.elapsed().as_secs_f64() * 1000.0);
    }
}
