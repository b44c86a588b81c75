//! API error type.

use serde::Serialize;
use thiserror::Error;

use crate::error::WorkflowError;

/// Result type for service operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Client-facing error with an HTTP-style status code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{message}")]
pub struct ApiError {
    /// HTTP status code.
    #[serde(skip)]
    pub status: u16,

    pub message: String,

    /// Machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(status: u16, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: Some(code.into()),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_code(400, message, "BAD_REQUEST")
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_code(404, message, "NOT_FOUND")
    }

    /// 409 Conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::with_code(409, message, "CONFLICT")
    }

    /// 500 Internal Server Error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_code(500, message, "INTERNAL_ERROR")
    }

    /// Returns true for 4xx errors.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::NotFound(_) => ApiError::not_found(err.to_string()),
            WorkflowError::InvalidRequest(_) => ApiError::bad_request(err.to_string()),
            WorkflowError::AlreadyTerminal { .. } | WorkflowError::DuplicateId(_) => {
                ApiError::conflict(err.to_string())
            }
            _ => ApiError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::WorkflowStatus;

    #[test]
    fn test_not_found_mapping() {
        let err: ApiError = WorkflowError::NotFound("wf_x".to_string()).into();
        assert_eq!(err.status, 404);
        assert_eq!(err.code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(err.message, "Workflow wf_x not found");
        assert!(err.is_client_error());
    }

    #[test]
    fn test_terminal_maps_to_conflict() {
        let err: ApiError = WorkflowError::AlreadyTerminal {
            id: "wf_x".to_string(),
            status: WorkflowStatus::Completed,
        }
        .into();
        assert_eq!(err.status, 409);
    }

    #[test]
    fn test_serialization_skips_status() {
        let json = serde_json::to_value(ApiError::bad_request("empty")).unwrap();
        assert_eq!(json["message"], "empty");
        assert_eq!(json["code"], "BAD_REQUEST");
        assert!(json.get("status").is_none());
    }
}
