//! Error types for the farming service.
//!
//! This module defines the central `Error` enum, which captures all recoverable
//! and reportable error cases of a call. It implements `From<Error>` for
//! `tonic::Status` so handlers can propagate errors with `?` and clients see an
//! appropriate status code.
//!
//! ## Error Cases
//! - `InvalidRequest`: The request carried a value the service refuses.
//! - `Transport`: The inbound stream failed underneath a session.
//! - `ChannelError`: An internal communication failure between tasks.
//! - `RequestCancelled`: The call was cancelled before it completed.
//! - `SessionTimeout`: A streaming call outlived the configured deadline.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//!
//! Dropped soil samples are not errors and never show up here.

use core::time::Duration;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the farming service.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The transport reported a failure on an inbound stream.
    #[error("Transport error ({code:?}): {message}")]
    Transport { code: Code, message: String },

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The call was cancelled by the client or by shutdown.
    #[error("Request cancelled")]
    RequestCancelled,

    /// The streaming call ran past its deadline.
    #[error("Session timed out after {after:?}")]
    SessionTimeout { after: Duration },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Transport {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Transport { code, message } => Status::new(code, message),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::SessionTimeout { after } => {
                Status::deadline_exceeded(format!("Stream exceeded {}s limit", after.as_secs()))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let cases = [
            (
                Error::InvalidRequest {
                    reason: "bad".into(),
                },
                Code::InvalidArgument,
            ),
            (
                Error::ChannelError {
                    context: "closed".into(),
                },
                Code::Internal,
            ),
            (Error::RequestCancelled, Code::Cancelled),
            (
                Error::SessionTimeout {
                    after: Duration::from_secs(5),
                },
                Code::DeadlineExceeded,
            ),
            (Error::ServiceShutdown, Code::Unavailable),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn transport_status_keeps_code() {
        let err = Error::from(Status::aborted("connection reset"));
        assert_eq!(
            err,
            Error::Transport {
                code: Code::Aborted,
                message: "connection reset".into(),
            }
        );
        let status = Status::from(err);
        assert_eq!(status.code(), Code::Aborted);
        assert_eq!(status.message(), "connection reset");
    }
}
