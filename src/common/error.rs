//! Error types for worldsync

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Corrupted data: {0}")]
    Corrupted(String),

    // === Cluster Errors ===
    #[error("Not primary: current primary is {0}")]
    NotPrimary(String),

    #[error("No primary known")]
    NoPrimary,

    #[error("Node is not part of a cluster")]
    NotInCluster,

    #[error("Node is already part of a cluster")]
    AlreadyInCluster,

    #[error("Node is the primary and does not accept pushed changes")]
    PrimaryConflict,

    #[error("Join rejected by {peer}: {reason}")]
    JoinRejected { peer: String, reason: String },

    // === Network Errors ===
    #[error("Peer {peer} unreachable: {reason}")]
    PeerUnreachable { peer: String, reason: String },

    #[error("Peer {peer} answered {status}: {reason}")]
    PeerRejected {
        peer: String,
        status: u16,
        reason: String,
    },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Timeout(_) | Error::PeerUnreachable { .. } | Error::NoPrimary
        )
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotPrimary(_) => StatusCode::TEMPORARY_REDIRECT,
            Error::InvalidPath(_) | Error::InvalidConfig(_) | Error::Json(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotInCluster | Error::AlreadyInCluster | Error::PrimaryConflict => {
                StatusCode::CONFLICT
            }
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::NoPrimary
            | Error::PeerUnreachable { .. }
            | Error::PeerRejected { .. }
            | Error::JoinRejected { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        let body = match &self {
            Error::NotPrimary(primary) => json!({ "error": self.to_string(), "primary": primary }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let peer = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        if e.is_timeout() {
            Error::Timeout(peer)
        } else if e.is_decode() {
            Error::Corrupted(format!("{}: {}", peer, e))
        } else {
            Error::PeerUnreachable {
                peer,
                reason: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Timeout("peer".into()).is_retryable());
        assert!(Error::PeerUnreachable {
            peer: "a".into(),
            reason: "refused".into()
        }
        .is_retryable());
        assert!(!Error::NotInCluster.is_retryable());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(
            Error::NotFound("x".into()).to_http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::NotPrimary("http://a:1".into()).to_http_status(),
            StatusCode::TEMPORARY_REDIRECT
        );
        assert_eq!(
            Error::AlreadyInCluster.to_http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::PrimaryConflict.to_http_status(),
            StatusCode::CONFLICT
        );
    }
}
