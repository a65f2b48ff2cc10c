//! Stream sessions: one state machine per streaming call shape.
//!
//! - [`temperature`] - server push, driven by a periodic timer.
//! - [`moisture`] - client push, folding samples into an accumulator.
//! - [`watering`] - bidirectional, one recommendation per query.
//!
//! Sessions never see tonic types other than [`Status`]: outbound messages go
//! into a [`ResponseSender`] and inbound messages come from any
//! [`Stream`], so they can be driven without a transport.
//!
//! A response channel has two parts: a bounded mpsc for messages and a
//! oneshot for the status that ends the call. A session sets the terminal
//! status without waiting for buffer space, so a slow or stalled reader never
//! keeps a closing session alive. The [`ResponseStream`] yields the status
//! after every buffered message, then ends.

use crate::server::session::Termination;
use core::{
    pin::Pin,
    task::{Context, Poll, ready},
};
use futures::Stream;
use tokio::sync::{
    mpsc::{self, error::SendError},
    oneshot,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

pub mod moisture;
pub mod temperature;
pub mod watering;

/// Creates a response channel buffering up to `buffer` messages.
pub fn response_channel<T>(buffer: usize) -> (ResponseSender<T>, ResponseStream<T>) {
    let (tx, rx) = mpsc::channel(buffer);
    let (terminal_tx, terminal_rx) = oneshot::channel();
    (
        ResponseSender {
            tx,
            terminal: Some(terminal_tx),
        },
        ResponseStream {
            messages: ReceiverStream::new(rx),
            terminal: Some(terminal_rx),
        },
    )
}

/// Producer half of a server-side response stream.
#[derive(Debug)]
pub struct ResponseSender<T> {
    tx: mpsc::Sender<Result<T, Status>>,
    terminal: Option<oneshot::Sender<Status>>,
}

impl<T> ResponseSender<T> {
    /// Waits for buffer space and queues `msg`.
    ///
    /// Fails only when the caller dropped the response stream.
    pub async fn send(&self, msg: T) -> Result<(), SendError<Result<T, Status>>> {
        self.tx.send(Ok(msg)).await
    }

    /// Resolves once the caller dropped the response stream.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Sets the status that ends the call. Never waits.
    ///
    /// The first status wins; later calls are ignored.
    pub fn fail(&mut self, status: Status) {
        if let Some(terminal) = self.terminal.take() {
            // Err only when the caller is already gone.
            let _ = terminal.send(status);
        }
    }
}

/// Consumer half of a response channel, handed to tonic as the response body.
#[derive(Debug)]
pub struct ResponseStream<T> {
    messages: ReceiverStream<Result<T, Status>>,
    terminal: Option<oneshot::Receiver<Status>>,
}

// Both halves only hold channel handles.
impl<T> Unpin for ResponseStream<T> {}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(msg) = ready!(Pin::new(&mut this.messages).poll_next(cx)) {
            return Poll::Ready(Some(msg));
        }

        // All messages are drained and the sender is gone, so the terminal
        // status (if any) is already set.
        let Some(terminal) = this.terminal.as_mut() else {
            return Poll::Ready(None);
        };
        let status = ready!(Pin::new(terminal).poll(cx));
        this.terminal = None;
        Poll::Ready(status.ok().map(Err))
    }
}

/// Summary of a finished streaming session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub termination: Termination,
    /// Messages successfully handed to the response stream.
    pub emitted: usize,
}
