//! Request errors and their HTTP status codes
//!
//! NIST 800-53: SI-11 (Error Handling)
//! Implementation: Clients get a status code and a short reason; connection
//! details stay in the server log

use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shellport_core::ShellportError;
use shellport_ssh::{ConnectionFailure, Error, FileError};
use thiserror::Error as ThisError;
use tracing::{debug, error, warn};

#[derive(ThisError, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Host not found: {0}")]
    HostNotFound(i64),

    #[error("{0}")]
    Forbidden(String),

    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Host registry error: {0}")]
    Registry(#[from] ShellportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Remote(#[from] Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::HostNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Multipart(e) => e.status(),
            ApiError::Registry(_) | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Remote(e) => remote_status(e),
        }
    }

    /// Reason shown to the client
    fn public_message(&self) -> String {
        match self {
            ApiError::Registry(_) => "host registry unavailable".to_string(),
            ApiError::Remote(e) => e.public_message(),
            other => other.to_string(),
        }
    }
}

fn remote_status(err: &Error) -> StatusCode {
    match err.root_cause() {
        Error::File(file) => match file {
            FileError::NotFound(_) => StatusCode::NOT_FOUND,
            FileError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            FileError::AlreadyExists(_) | FileError::NotEmpty(_) => StatusCode::CONFLICT,
            FileError::NotADirectory(_) | FileError::IsADirectory(_) => StatusCode::BAD_REQUEST,
            FileError::Failure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        },
        Error::InvalidPath(_) | Error::Protocol(_) => StatusCode::BAD_REQUEST,
        Error::Connection(connection) => match connection.reason {
            ConnectionFailure::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ConnectionFailure::Network
            | ConnectionFailure::Auth
            | ConnectionFailure::HostKeyRejected => StatusCode::BAD_GATEWAY,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else if matches!(&self, ApiError::Remote(e) if e.is_security_event()) {
            warn!(event = "security_event", status = status.as_u16(), error = %self, "Request refused");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shellport_ssh::{ConnectionError, TransferError};

    fn connection(reason: ConnectionFailure) -> ApiError {
        ApiError::Remote(Error::from(ConnectionError::new(
            reason,
            "10.0.0.9:22",
            "password rejected for user root",
        )))
    }

    #[test]
    fn test_file_errors_map_to_client_statuses() {
        let cases = [
            (FileError::NotFound("/a".into()), StatusCode::NOT_FOUND),
            (FileError::PermissionDenied("/a".into()), StatusCode::FORBIDDEN),
            (FileError::AlreadyExists("/a".into()), StatusCode::CONFLICT),
            (FileError::NotEmpty("/a".into()), StatusCode::CONFLICT),
            (FileError::IsADirectory("/a".into()), StatusCode::BAD_REQUEST),
        ];
        for (file, expected) in cases {
            assert_eq!(ApiError::Remote(Error::File(file)).status(), expected);
        }
    }

    #[test]
    fn test_connection_failures_map_to_gateway_statuses() {
        assert_eq!(connection(ConnectionFailure::Auth).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            connection(ConnectionFailure::HostKeyRejected).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            connection(ConnectionFailure::Timeout).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_connection_message_is_sanitized() {
        let message = connection(ConnectionFailure::Auth).public_message();
        assert!(message.contains("10.0.0.9:22"));
        assert!(!message.contains("root"));
    }

    #[test]
    fn test_transfer_error_uses_root_cause() {
        let err = ApiError::Remote(Error::Transfer(TransferError {
            path: "/srv/data/secret".to_string(),
            completed: 4,
            source: Box::new(Error::File(FileError::PermissionDenied(
                "/srv/data/secret".to_string(),
            ))),
        }));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_registry_error_hides_details() {
        let err = ApiError::Registry(ShellportError::InvalidConfig("db path".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "host registry unavailable");
    }
}
