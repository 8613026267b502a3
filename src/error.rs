use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("statement has been finalized")]
    StatementFinalized,

    #[error("failed to open database: {0}")]
    Open(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the error is an `error` response received from the server,
    /// as opposed to a failure produced locally.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "transport error: connection refused");

        let err = Error::Protocol("unexpected payload".to_string());
        assert_eq!(err.to_string(), "protocol error: unexpected payload");

        let err = Error::Query("Invalid Handle".to_string());
        assert_eq!(err.to_string(), "query failed: Invalid Handle");

        let err = Error::StatementFinalized;
        assert_eq!(err.to_string(), "statement has been finalized");
    }

    #[test]
    fn test_remote_classification() {
        assert!(Error::Query("no such table: t".to_string()).is_remote());
        assert!(!Error::StatementFinalized.is_remote());
        assert!(!Error::Transport("closed".to_string()).is_remote());
    }

    #[test]
    fn test_result_type() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.unwrap(), 42);

        let err: Result<i32> = Err(Error::StatementFinalized);
        assert!(err.is_err());
    }
}
