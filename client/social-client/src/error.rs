/// Error types for social-client
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::transport::ApiFailure;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    /// 409 from registration endpoints; `registration_status` picks the redirect
    #[error("Conflict: {message}")]
    Conflict {
        registration_status: Option<String>,
        message: String,
    },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        fields: BTreeMap<String, Vec<String>>,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Not logged in")]
    NoSession,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Validation failure on a single field, raised before any request
    pub fn invalid_field(field: &str, message: &str) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), vec![message.to_string()]);
        ClientError::Validation {
            message: message.to_string(),
            fields,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Network(_) => "network",
            ClientError::Conflict { .. } => "conflict",
            ClientError::Validation { .. } => "validation",
            ClientError::Unauthorized(_) => "unauthorized",
            ClientError::NotFound(_) => "not_found",
            ClientError::Server { .. } => "server",
            ClientError::Decode(_) => "decode",
            ClientError::NoSession => "no_session",
            ClientError::Session(_) => "session",
            ClientError::Config(_) => "config",
        }
    }

    /// Text suitable for an error toast
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Network(_) => "Network error, please try again".to_string(),
            ClientError::Validation { message, fields } => fields
                .values()
                .flatten()
                .next()
                .cloned()
                .unwrap_or_else(|| message.clone()),
            ClientError::Conflict { message, .. }
            | ClientError::Unauthorized(message)
            | ClientError::NotFound(message) => message.clone(),
            ClientError::Server { .. } | ClientError::Decode(_) => {
                "Something went wrong".to_string()
            }
            ClientError::NoSession => "Please log in first".to_string(),
            ClientError::Session(_) | ClientError::Config(_) => self.to_string(),
        }
    }
}

fn validation_fields(body: &Value) -> BTreeMap<String, Vec<String>> {
    body.get("errors")
        .and_then(|errors| serde_json::from_value(errors.clone()).ok())
        .unwrap_or_default()
}

impl From<ApiFailure> for ClientError {
    fn from(failure: ApiFailure) -> Self {
        let registration_status = failure.registration_status();
        match failure {
            ApiFailure::Network(message) => ClientError::Network(message),
            ApiFailure::Timeout(after) => {
                ClientError::Network(format!("request timed out after {:?}", after))
            }
            ApiFailure::Status {
                status,
                message,
                body,
            } => match status {
                409 => ClientError::Conflict {
                    registration_status,
                    message,
                },
                400 | 422 => ClientError::Validation {
                    fields: validation_fields(&body),
                    message,
                },
                401 | 403 => ClientError::Unauthorized(message),
                404 => ClientError::NotFound(message),
                _ => ClientError::Server { status, message },
            },
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

/// Result type alias for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(status: u16, body: Value) -> ApiFailure {
        ApiFailure::Status {
            status,
            message: "msg".to_string(),
            body,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ClientError::from(status(401, Value::Null)).kind(), "unauthorized");
        assert_eq!(ClientError::from(status(404, Value::Null)).kind(), "not_found");
        assert_eq!(ClientError::from(status(500, Value::Null)).kind(), "server");
        assert_eq!(
            ClientError::from(ApiFailure::Network("refused".to_string())).kind(),
            "network"
        );
    }

    #[test]
    fn test_conflict_keeps_registration_status() {
        let err = ClientError::from(status(409, json!({ "registration_status": "verified" })));
        match err {
            ClientError::Conflict {
                registration_status,
                ..
            } => assert_eq!(registration_status.as_deref(), Some("verified")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_fields_surface_first_message() {
        let err = ClientError::from(status(
            422,
            json!({ "errors": { "content": ["The content field is required."] } }),
        ));
        assert_eq!(err.kind(), "validation");
        assert_eq!(err.user_message(), "The content field is required.");
    }
}
