//! Error types for the Aseba bus client.

use crate::transport::TransportFault;
use crate::types::EventId;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for client operations.
#[derive(Debug, Error)]
pub enum AsebaError {
    #[error("Can not connect to Aseba bus services: {0}. Is asebamedulla running?")]
    Connection(String),

    #[error("Event {0} is unknown. Did you load the list of events with load_events_list?")]
    UnknownEvent(String),

    #[error("Event ID {0} is outside the 16-bit range the bus can address")]
    InvalidEventId(i64),

    #[error("Failed to load event list from {path:?}: {reason}")]
    RegistryLoad { path: PathBuf, reason: String },

    #[error("Duplicate event name in event list: {0}")]
    DuplicateEventName(String),

    #[error("Event list holds {0} events, more than the bus can address")]
    TooManyEvents(usize),

    #[error("Bus call {method} failed: {fault}")]
    TransportCall {
        method: String,
        fault: TransportFault,
    },

    #[error("Asynchronous event send failed: {0}")]
    AsyncSend(TransportFault),

    #[error("Unexpected reply to {method}: {detail}")]
    UnexpectedReply { method: String, detail: String },

    #[error("Callback for event {event_id} panicked: {message}")]
    CallbackPanicked { event_id: EventId, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AsebaError {
    /// Wrap a fault raised by a synchronous bus call.
    pub(crate) fn call(method: &str, fault: TransportFault) -> Self {
        AsebaError::TransportCall {
            method: method.to_string(),
            fault,
        }
    }

    /// Whether this error ends the session it was raised in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AsebaError::Connection(_)
                | AsebaError::AsyncSend(_)
                | AsebaError::CallbackPanicked { .. }
        )
    }
}

impl From<serde_json::Error> for AsebaError {
    fn from(e: serde_json::Error) -> Self {
        AsebaError::Serialization(e.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, AsebaError>;
