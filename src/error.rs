//! Error taxonomy for remote calls and batch submission.
//!
//! `NoMatch` is deliberately absent: a track without a usable candidate is a
//! normal outcome (see [`crate::models::MatchOutcome`]), not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    /// Remote answered with a structured error payload or a non-success status.
    #[error("Spotify API error {status}: {message}")]
    Remote { status: u16, message: String },

    /// Connection, TLS or I/O failure before a response was read.
    #[error("HTTP transport failed: {0}")]
    Transport(String),

    /// Response body did not have the expected JSON shape.
    #[error("Malformed response ({context}): {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("No Spotify access token available")]
    NoCredential,

    /// Accounts service refused to refresh the access token.
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Final flush failed; `unsent` holds every id that never reached the library.
    #[error("{} track(s) were not saved: {source}", .unsent.len())]
    Unsent {
        unsent: Vec<String>,
        #[source]
        source: Box<LoaderError>,
    },
}

impl LoaderError {
    /// True for failures reported by (or on the way to) the remote service.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            LoaderError::Remote { .. } | LoaderError::Transport(_) | LoaderError::Decode { .. }
        )
    }
}

pub type Result<T, E = LoaderError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsent_message_counts_ids() {
        let err = LoaderError::Unsent {
            unsent: vec!["a".to_string(), "b".to_string()],
            source: Box::new(LoaderError::Remote {
                status: 502,
                message: "Bad gateway".to_string(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "2 track(s) were not saved: Spotify API error 502: Bad gateway"
        );
    }

    #[test]
    fn test_is_remote() {
        assert!(LoaderError::Transport("reset".to_string()).is_remote());
        assert!(!LoaderError::NoCredential.is_remote());
    }
}
