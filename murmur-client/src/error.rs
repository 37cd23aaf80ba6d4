use thiserror::Error;

/// Failures surfaced to the conversation view
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Rejected locally before any network call
    #[error("invalid message: {0}")]
    Validation(String),

    /// The store could not be reached or did not answer in time
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The live feed lost its connection
    #[error("subscription dropped: {0}")]
    SubscriptionDropped(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Any other error reported by the server
    #[error("rejected by server ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl ChatError {
    /// Map an `error` frame from the server onto a client error
    pub fn from_wire(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "validation_error" => ChatError::Validation(message),
            "forbidden" => ChatError::Forbidden(message),
            "store_unavailable" => ChatError::StoreUnavailable(message),
            _ => ChatError::Rejected {
                code: code.to_string(),
                message,
            },
        }
    }

    /// Whether sending the same request again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::StoreUnavailable(_) | ChatError::SubscriptionDropped(_)
        )
    }
}

impl From<garde::Report> for ChatError {
    fn from(report: garde::Report) -> Self {
        ChatError::Validation(report.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(e: serde_json::Error) -> Self {
        ChatError::Rejected {
            code: "bad_request".to_string(),
            message: e.to_string(),
        }
    }
}
