//! NATS message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generic request wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Owning-account identifier, injected by the gateway after auth.
    #[serde(default)]
    pub owner_id: Option<Uuid>,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn for_owner(owner_id: Uuid, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            owner_id: Some(owner_id),
            payload,
        }
    }
}

/// Generic success response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse<T> {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub payload: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(request_id: Uuid, payload: T) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope_roundtrip() {
        let owner = Uuid::new_v4();
        let request = Request::for_owner(owner, serde_json::json!({"sessionId": "s-1"}));
        let json = serde_json::to_string(&request).unwrap();
        let back: Request<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, request.id);
        assert_eq!(back.owner_id, Some(owner));
    }

    #[test]
    fn test_request_owner_id_optional_on_the_wire() {
        let json = r#"{"id":"7f0f4f5e-2d13-4f4e-b9a3-111111111111",
                       "timestamp":"2026-01-01T00:00:00Z",
                       "payload":{}}"#;
        let request: Request<serde_json::Value> = serde_json::from_str(json).unwrap();
        assert!(request.owner_id.is_none());
    }

    #[test]
    fn test_error_response_shape() {
        let error = ErrorResponse::new(Uuid::nil(), "NOT_FOUND", "no run");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("NOT_FOUND"));
        assert!(!json.contains("details"));
    }
}
