use std::time::Duration;

use thiserror::Error;

use crate::{full::ControlState, messages::AcceptStatus, packets::FormatError};

/// Failures of the control-channel negotiation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    /// Server-Greeting announced mode 0.
    #[error("the TWAMP server is not interested in communicating with you")]
    ServerUnwilling,
    /// Server-Greeting did not offer unauthenticated mode.
    #[error("unsupported security mode: {0}")]
    UnsupportedMode(String),
    /// A response carried a non-OK Accept value.
    #[error("the {context} failed{}", rejection_suffix(.status))]
    Rejected {
        context: &'static str,
        status: AcceptStatus,
    },
    /// A response carried an Accept value outside the defined range.
    #[error("the {context} failed: unknown accept status {code}")]
    UnknownStatus { context: &'static str, code: u8 },
}

fn rejection_suffix(status: &AcceptStatus) -> String {
    match status {
        AcceptStatus::Failed | AcceptStatus::Ok => String::new(),
        other => format!(": {}", other),
    }
}

/// Errors returned by the TWAMP client.
#[derive(Error, Debug)]
pub enum TwampError {
    /// The control connection could not be established.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    /// Read or write failure on the control connection or the test socket.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
    /// The control connection was closed or dropped.
    #[error("control connection is closed")]
    ConnectionClosed,
    /// No reflected packet arrived before the receive deadline.
    #[error("no reflected packet within {0:?}")]
    Timeout(Duration),
    #[error("malformed message: {0}")]
    Format(#[from] FormatError),
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    /// A control operation was attempted out of protocol order.
    #[error("cannot {operation} while the control connection is in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ControlState,
    },
    /// The reflected packet echoes a different sender sequence number.
    #[error("expected sequence #{expected} but received {received}")]
    SequenceMismatch { expected: u32, received: u32 },
}

impl TwampError {
    /// Returns true for the transport class of failures (connect, I/O, closed, timeout).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TwampError::Connect { .. }
                | TwampError::Transport(_)
                | TwampError::ConnectionClosed
                | TwampError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TwampError>;
