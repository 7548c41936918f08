//! Error taxonomy for the synchronization engine
//!
//! Every error here is local to the operation that produced it. The owning
//! loop logs it, records it, and tries again on its next tick.

use std::time::Duration;
use thiserror::Error;

/// Failure to obtain a snapshot from the poll source
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("poll timed out after {0:?}")]
    Timeout(Duration),

    #[error("request to telemetry API failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry API returned status {0}")]
    Status(u16),

    #[error("could not decode telemetry payload: {0}")]
    Decode(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Failure to deliver a snapshot to a sink
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transmit timed out after {0:?}")]
    Timeout(Duration),

    /// Carries no request URL; sink URLs may hold credentials
    #[error("request to sink failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("sink returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("sink rejected snapshot: {0}")]
    Rejected(String),

    #[error("snapshot is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for SinkError {
    fn from(error: reqwest::Error) -> Self {
        SinkError::Http(error.without_url())
    }
}

impl SinkError {
    /// Whether the failure was a timeout rather than a reported error
    pub fn is_timeout(&self) -> bool {
        match self {
            SinkError::Timeout(_) => true,
            SinkError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SourceError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "poll timed out after 5s");

        let err = SinkError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "sink returned status 502: bad gateway");

        let err = SinkError::MissingField("soc");
        assert!(err.to_string().contains("`soc`"));
    }

    #[test]
    fn test_sink_timeout_classification() {
        assert!(SinkError::Timeout(Duration::from_secs(4)).is_timeout());
        assert!(!SinkError::Rejected("nope".to_string()).is_timeout());
    }
}
