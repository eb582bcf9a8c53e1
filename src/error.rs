//! Typed errors for backend calls, credential validation and session actions.

use thiserror::Error;

use crate::lifecycle::Phase;

/// Message shown when no response could be obtained from the backend.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Credential form errors. These block the action locally and are never
/// surfaced as notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Payload of a failed backend response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorPayload {
    /// A plain message, either a JSON string or non-JSON text.
    Text(String),
    /// Anything else: a JSON object or array, or an empty body.
    Structured(Option<serde_json::Value>),
}

/// Failure of a single backend call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// No response was reachable.
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The backend answered with a failure status.
    #[error("{url} returned {status}")]
    Application {
        url: String,
        status: u16,
        reason: String,
        payload: ErrorPayload,
    },

    /// The backend answered successfully but the body was not understood.
    #[error("failed to decode response from {url}: {reason}")]
    Decode {
        url: String,
        status: u16,
        reason: String,
    },
}

impl ApiError {
    /// HTTP-like status of the failure; 0 when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Transport { .. } => 0,
            ApiError::Application { status, .. } | ApiError::Decode { status, .. } => *status,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport { .. })
    }

    /// Text shown to the operator for this failure.
    pub fn notification_text(&self) -> String {
        match self {
            ApiError::Transport { .. } => UNKNOWN_ERROR.to_string(),
            ApiError::Application {
                payload: ErrorPayload::Text(text),
                ..
            } => text.clone(),
            ApiError::Application {
                url,
                status,
                reason,
                ..
            } => generic_failure(url, *status, reason),
            ApiError::Decode { url, reason, .. } => {
                format!("Http failure during parsing for {url}: {reason}")
            }
        }
    }
}

fn generic_failure(url: &str, status: u16, reason: &str) -> String {
    if reason.is_empty() {
        format!("Http failure response for {url}: {status}")
    } else {
        format!("Http failure response for {url}: {status} {reason}")
    }
}

/// Actions rejected by the lifecycle controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("cannot {action} while {phase:?}")]
    InvalidPhase { action: &'static str, phase: Phase },

    #[error("no instance has been provisioned in this session")]
    NoInstance,
}
