use serde::Deserialize;
use thiserror::Error;

/// Every failure the remote boundary can produce, normalised before any
/// other component sees it.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No response was received (connection refused, DNS, timeout, aborted body).
    #[error("Network error: {0}")]
    NetworkError(#[source] reqwest::Error),

    /// A response arrived with a failure status.
    #[error("Server error ({status}): {}", message.as_deref().unwrap_or("no message"))]
    ServerError { status: u16, message: Option<String> },

    /// A response arrived but its body did not have the expected shape.
    #[error("Invalid response: {0}")]
    DecodeError(String),

    /// Rejected on the caller side before any network call was made.
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

#[derive(Debug, Deserialize)]
struct ServerMessage {
    message: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a failed response. The server either sends a JSON object with
    /// a `message` field or a bare text body; both become the message.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let trimmed = body.trim();
        let message = match serde_json::from_str::<ServerMessage>(trimmed) {
            Ok(parsed) => parsed.message.filter(|m| !m.trim().is_empty()),
            Err(_) if !trimmed.is_empty() => Some(Self::truncate_body(trimmed)),
            Err(_) => None,
        };
        ApiError::ServerError {
            status: status.as_u16(),
            message,
        }
    }

    pub fn decode(what: &str, err: impl std::fmt::Display) -> Self {
        ApiError::DecodeError(format!("{}: {}", what, err))
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        ApiError::ValidationError(reason.into())
    }

    /// A single human-readable line for the status area of a view.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::NetworkError(e) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            ApiError::NetworkError(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            ApiError::ServerError {
                message: Some(message),
                ..
            } => message.clone(),
            ApiError::ServerError { status, message: None } => {
                format!("The server rejected the request (status {})", status)
            }
            ApiError::DecodeError(_) => "The server sent an unexpected response".to_string(),
            ApiError::ValidationError(reason) => reason.clone(),
        }
    }
}
