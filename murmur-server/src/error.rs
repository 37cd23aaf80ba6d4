use thiserror::Error;

/// Errors produced by the message store, room registry and feed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Stable code sent to clients in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Validation(_) => "validation_error",
            StoreError::Forbidden(_) => "forbidden",
            StoreError::NotFound(_) => "not_found",
            StoreError::Unavailable(_) => "store_unavailable",
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl From<garde::Report> for StoreError {
    fn from(report: garde::Report) -> Self {
        StoreError::Validation(report.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(StoreError::Validation("x".into()).code(), "validation_error");
        assert_eq!(StoreError::Forbidden("x".into()).code(), "forbidden");
        assert_eq!(StoreError::NotFound("x".into()).code(), "not_found");
        assert_eq!(StoreError::Unavailable("x".into()).code(), "store_unavailable");
    }

    #[test]
    fn test_sqlite_errors_map_to_unavailable() {
        let err: StoreError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
