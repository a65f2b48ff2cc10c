//! Bookkeeping for live streaming sessions.
//!
//! The [`SessionTracker`] hands every call a [`SessionContext`]: a child of
//! the service-wide [`CancellationToken`] plus the configured stream deadline.
//! It counts contexts that are still alive so shutdown can wait for them to
//! drain before cancelling whatever remains.
//!
//! There is no shared session state here beyond two atomics: each session owns
//! its own timer or accumulator.

use super::context::SessionContext;
use core::time::Duration;
use farming_tonic_core::{Error, types::Rpc};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Grace period for cancelled sessions to drop their resources.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct SessionTracker {
    inflight: Arc<AtomicUsize>,
    accepting: AtomicBool,
    shutdown_token: CancellationToken,
    stream_timeout: Option<Duration>,
    shutdown_timeout: Duration,
}

impl SessionTracker {
    pub fn new(stream_timeout: Option<Duration>, shutdown_timeout: Duration) -> Self {
        Self {
            inflight: Arc::new(AtomicUsize::new(0)),
            accepting: AtomicBool::new(true),
            shutdown_token: CancellationToken::new(),
            stream_timeout,
            shutdown_timeout,
        }
    }

    /// Number of sessions whose context is still alive.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Fails once shutdown has started.
    pub fn ensure_accepting(&self) -> Result<(), Error> {
        if self.is_accepting() {
            Ok(())
        } else {
            Err(Error::ServiceShutdown)
        }
    }

    /// Registers a new session for `rpc`.
    ///
    /// Streaming calls get the configured stream deadline; unary calls never
    /// time out here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once [`shutdown`](Self::shutdown)
    /// has been called.
    pub fn open(&self, rpc: Rpc) -> Result<SessionContext, Error> {
        self.ensure_accepting()?;

        let deadline = if rpc.is_streaming() {
            self.stream_timeout
        } else {
            None
        };

        Ok(SessionContext::new(
            rpc,
            self.shutdown_token.child_token(),
            deadline,
            Arc::clone(&self.inflight),
        ))
    }

    /// Gracefully shuts down all sessions.
    ///
    /// - Stops accepting new calls.
    /// - Waits up to `shutdown_timeout` for in-flight sessions to finish.
    /// - Cancels the rest and gives them a short grace period to close.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.accepting.store(false, Ordering::Release);

        // === Phase 1: Wait for in-flight sessions to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight sessions ({} active)", self.inflight());
        match timeout(self.shutdown_timeout, self.drained()).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight sessions drained");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} sessions still active)",
                    self.inflight()
                );
            }
        }

        // === Phase 2: Cancel whatever is left ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining sessions via shutdown token");
        self.shutdown_token.cancel();

        if timeout(CANCEL_GRACE, self.drained()).await.is_err() {
            let remaining = self.inflight();
            #[cfg(feature = "tracing")]
            tracing::error!("{remaining} sessions did not close after cancellation");
            return Err(Error::ChannelError {
                context: format!("{remaining} sessions still open after shutdown"),
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Session shutdown complete");

        Ok(())
    }

    async fn drained(&self) {
        while self.inflight() > 0 {
            sleep(DRAIN_POLL).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_drop_releases_slot() {
        let tracker = SessionTracker::new(None, Duration::from_secs(1));
        let first = tracker.open(Rpc::TemperatureStream).unwrap();
        let second = tracker.open(Rpc::FindOptimum).unwrap();
        assert_eq!(tracker.inflight(), 2);

        drop(first);
        assert_eq!(tracker.inflight(), 1);
        drop(second);
        assert_eq!(tracker.inflight(), 0);
    }

    #[tokio::test]
    async fn refuses_after_shutdown() {
        let tracker = SessionTracker::new(None, Duration::from_millis(10));
        tracker.shutdown().await.unwrap();

        assert!(!tracker.is_accepting());
        assert_eq!(
            tracker.open(Rpc::Calculate).unwrap_err(),
            Error::ServiceShutdown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_lingering_sessions() {
        let tracker = Arc::new(SessionTracker::new(None, Duration::from_secs(2)));
        let ctx = tracker.open(Rpc::ComputeAverage).unwrap();

        let session = tokio::spawn(async move {
            ctx.cancelled().await;
        });

        tracker.shutdown().await.unwrap();
        session.await.unwrap();
        assert_eq!(tracker.inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stream_deadline_only_for_streaming_calls() {
        let tracker = SessionTracker::new(Some(Duration::from_secs(5)), Duration::from_secs(1));

        let streaming = tracker.open(Rpc::FindOptimum).unwrap();
        tokio::time::timeout(Duration::from_secs(6), streaming.expired())
            .await
            .expect("streaming deadline should fire");

        let unary = tracker.open(Rpc::Calculate).unwrap();
        assert!(
            tokio::time::timeout(Duration::from_secs(60), unary.expired())
                .await
                .is_err()
        );
    }
}
