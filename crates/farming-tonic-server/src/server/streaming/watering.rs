//! Bidirectional session behind `FindOptimum`.
//!
//! Strict request/response pairing: a query is read, its recommendation is
//! handed to the response stream, and only then is the next query read. Output
//! order therefore matches input order and nothing is buffered across the call.

use super::{ResponseSender, SessionReport};
use crate::server::{
    session::{SessionContext, SessionState, Termination},
    telemetry::increment_messages_emitted,
};
use farming_tonic_core::{
    calc::recommended_level,
    proto::{WateringQuery, WateringRecommendation},
};
use futures::{Stream, StreamExt};
use tonic::Status;

pub fn recommend(query: &WateringQuery) -> WateringRecommendation {
    WateringRecommendation {
        input_moisture: query.moisture_reading,
        recommended_level: recommended_level(query.moisture_reading),
    }
}

#[derive(Debug)]
pub struct OptimumSession {
    answered: usize,
    state: SessionState,
    termination: Option<Termination>,
}

impl Default for OptimumSession {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimumSession {
    pub fn new() -> Self {
        Self {
            answered: 0,
            state: SessionState::Open,
            termination: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Answers every query from `inbound` on `tx` until the client
    /// half-closes, the call is cancelled or the deadline passes.
    ///
    /// An inbound transport error becomes the final status of the response
    /// stream and ends the session as [`Termination::Failed`]. A deadline or
    /// service-side cancellation is reported the same way.
    pub async fn run<S>(
        &mut self,
        mut inbound: S,
        mut tx: ResponseSender<WateringRecommendation>,
        ctx: SessionContext,
    ) -> SessionReport
    where
        S: Stream<Item = Result<WateringQuery, Status>> + Unpin,
    {
        if let Some(termination) = self.termination {
            return self.report(termination);
        }
        self.state = SessionState::Active;

        let termination = loop {
            let next = tokio::select! {
                biased;
                () = ctx.cancelled() => break Termination::Cancelled,
                () = tx.closed() => break Termination::Disconnected,
                () = ctx.expired() => break Termination::TimedOut,
                next = inbound.next() => next,
            };

            match next {
                Some(Ok(query)) => {
                    let recommendation = recommend(&query);
                    tokio::select! {
                        biased;
                        () = ctx.cancelled() => break Termination::Cancelled,
                        () = ctx.expired() => break Termination::TimedOut,
                        sent = tx.send(recommendation) => {
                            if sent.is_err() {
                                break Termination::Disconnected;
                            }
                        }
                    }
                    self.answered += 1;
                    increment_messages_emitted(ctx.rpc());
                }
                Some(Err(status)) => {
                    tx.fail(status);
                    break Termination::Failed;
                }
                None => break Termination::Completed,
            }
        };

        if let Some(err) = ctx.termination_error(termination) {
            tx.fail(err.into());
        }
        self.state = SessionState::Closed;
        self.termination = Some(termination);

        #[cfg(feature = "tracing")]
        tracing::debug!(answered = self.answered, ?termination, "optimum session closed");

        self.report(termination)
    }

    fn report(&self, termination: Termination) -> SessionReport {
        SessionReport {
            termination,
            emitted: self.answered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::streaming::response_channel;
    use core::time::Duration;
    use farming_tonic_core::types::Rpc;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;
    use tokio_util::sync::CancellationToken;
    use tonic::Code;

    fn query(moisture_reading: f64) -> Result<WateringQuery, Status> {
        Ok(WateringQuery { moisture_reading })
    }

    fn ctx() -> SessionContext {
        SessionContext::detached(Rpc::FindOptimum, CancellationToken::new(), None)
    }

    fn ctx_with_deadline(after: Duration) -> SessionContext {
        SessionContext::detached(Rpc::FindOptimum, CancellationToken::new(), Some(after))
    }

    #[tokio::test]
    async fn one_recommendation_per_query_in_order() {
        let (tx, mut rx) = response_channel(4);
        let mut session = OptimumSession::new();
        let report = session
            .run(tokio_stream::iter(vec![query(10.0), query(20.0)]), tx, ctx())
            .await;

        let first = rx.next().await.unwrap().unwrap();
        let second = rx.next().await.unwrap().unwrap();
        assert!(rx.next().await.is_none());

        assert_eq!((first.input_moisture, first.recommended_level), (10.0, 15.0));
        assert_eq!((second.input_moisture, second.recommended_level), (20.0, 30.0));
        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.emitted, 2);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn replies_before_reading_next_query() {
        let (query_tx, query_rx) = mpsc::channel(1);
        let (tx, mut rx) = response_channel(1);
        tokio::spawn(async move {
            OptimumSession::new()
                .run(ReceiverStream::new(query_rx), tx, ctx())
                .await
        });

        for reading in [4.0, 8.0, 2.0] {
            query_tx.send(query(reading)).await.unwrap();
            let rec = rx.next().await.unwrap().unwrap();
            assert_eq!(rec.input_moisture, reading);
            assert_eq!(rec.recommended_level, reading * 1.5);
        }

        drop(query_tx);
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn empty_input_closes_without_output() {
        let (tx, mut rx) = response_channel(1);
        let report = OptimumSession::new()
            .run(tokio_stream::iter(Vec::new()), tx, ctx())
            .await;
        assert!(rx.next().await.is_none());
        assert_eq!(report.emitted, 0);
        assert_eq!(report.termination, Termination::Completed);
    }

    #[tokio::test]
    async fn inbound_error_is_forwarded_past_a_full_buffer() {
        // Buffer of one, nobody reading: forwarding must not wait for space.
        let (tx, mut rx) = response_channel(1);
        let report = OptimumSession::new()
            .run(
                tokio_stream::iter(vec![query(1.0), Err(Status::data_loss("boom")), query(2.0)]),
                tx,
                ctx(),
            )
            .await;
        assert_eq!(report.termination, Termination::Failed);
        assert_eq!(report.emitted, 1);

        assert!(rx.next().await.unwrap().is_ok());
        assert_eq!(rx.next().await.unwrap().unwrap_err().code(), Code::DataLoss);
        assert!(rx.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_receiver_disconnects() {
        let (_query_tx, query_rx) = mpsc::channel::<Result<WateringQuery, Status>>(1);
        let (tx, rx) = response_channel(1);
        drop(rx);
        let report = OptimumSession::new()
            .run(ReceiverStream::new(query_rx), tx, ctx())
            .await;
        assert_eq!(report.termination, Termination::Disconnected);
    }

    #[tokio::test]
    async fn service_cancellation_ends_stream_with_status() {
        let (query_tx, query_rx) = mpsc::channel(1);
        let (tx, mut rx) = response_channel(4);
        let cancel = CancellationToken::new();
        let session_ctx = SessionContext::detached(Rpc::FindOptimum, cancel.clone(), None);
        let handle = tokio::spawn(async move {
            OptimumSession::new()
                .run(ReceiverStream::new(query_rx), tx, session_ctx)
                .await
        });

        query_tx.send(query(3.0)).await.unwrap();
        assert!(rx.next().await.unwrap().is_ok());
        cancel.cancel();

        assert_eq!(rx.next().await.unwrap().unwrap_err().code(), Code::Cancelled);
        assert!(rx.next().await.is_none());
        assert_eq!(handle.await.unwrap().termination, Termination::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_sends_status() {
        let (_query_tx, query_rx) = mpsc::channel::<Result<WateringQuery, Status>>(1);
        let (tx, mut rx) = response_channel(1);
        let report = OptimumSession::new()
            .run(
                ReceiverStream::new(query_rx),
                tx,
                ctx_with_deadline(Duration::from_secs(1)),
            )
            .await;

        assert_eq!(report.termination, Termination::TimedOut);
        assert_eq!(
            rx.next().await.unwrap().unwrap_err().code(),
            Code::DeadlineExceeded
        );
        assert!(rx.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_while_reader_stalls() {
        // Queries keep coming but nobody reads the answers.
        let (query_tx, query_rx) = mpsc::channel(8);
        for n in 0..8 {
            query_tx.send(query(f64::from(n))).await.unwrap();
        }
        let (tx, mut rx) = response_channel(1);
        let handle = tokio::spawn(async move {
            OptimumSession::new()
                .run(
                    ReceiverStream::new(query_rx),
                    tx,
                    ctx_with_deadline(Duration::from_secs(1)),
                )
                .await
        });

        let report = tokio::time::timeout(Duration::from_secs(60), handle)
            .await
            .expect("session outlived its deadline")
            .unwrap();
        assert_eq!(report.termination, Termination::TimedOut);
        assert_eq!(report.emitted, 1);

        assert_eq!(rx.next().await.unwrap().unwrap().input_moisture, 0.0);
        assert_eq!(
            rx.next().await.unwrap().unwrap_err().code(),
            Code::DeadlineExceeded
        );
        assert!(rx.next().await.is_none());
        drop(query_tx);
    }
}
