//! HTTP request and response bodies, validation, and error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::store::StoreError;

/// Body of `POST /message`.
///
/// Ids stay as text until validation so a malformed id is reported by name
/// instead of as a generic body error.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    /// Message timestamp in milliseconds
    pub timestamp: u64,
}

/// Query string of `GET /message`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub messages: Vec<String>,
}

/// A validated append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidAppend {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub text: String,
}

/// A validated query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidQuery {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub timestamp: u64,
}

/// Caller errors, detected before the store is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid userId format")]
    InvalidUserId,

    #[error("Invalid sessionId format")]
    InvalidSessionId,

    #[error("Missing required parameter: {0}")]
    Missing(&'static str),

    #[error("timestamp must be a positive integer number of milliseconds")]
    InvalidTimestamp,

    #[error("message must not be empty")]
    EmptyMessage,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Invalid query string: {0}")]
    InvalidQuery(String),
}

fn parse_id(raw: &str, err: ValidationError) -> Result<Uuid, ValidationError> {
    Uuid::try_parse(raw.trim()).map_err(|_| err)
}

impl AppendRequest {
    pub fn validate(self) -> Result<ValidAppend, ValidationError> {
        let user_id = parse_id(&self.user_id, ValidationError::InvalidUserId)?;
        let session_id = parse_id(&self.session_id, ValidationError::InvalidSessionId)?;
        if self.message.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        Ok(ValidAppend {
            user_id,
            session_id,
            text: self.message,
        })
    }
}

impl QueryParams {
    pub fn validate(&self) -> Result<ValidQuery, ValidationError> {
        let user_id = self
            .user_id
            .as_deref()
            .ok_or(ValidationError::Missing("userId"))?;
        let user_id = parse_id(user_id, ValidationError::InvalidUserId)?;

        let session_id = self
            .session_id
            .as_deref()
            .ok_or(ValidationError::Missing("sessionId"))?;
        let session_id = parse_id(session_id, ValidationError::InvalidSessionId)?;

        let timestamp = self
            .timestamp
            .as_deref()
            .ok_or(ValidationError::Missing("timestamp"))?;
        let timestamp = match timestamp.trim().parse::<u64>() {
            Ok(ts) if ts >= 1 => ts,
            _ => return Err(ValidationError::InvalidTimestamp),
        };

        Ok(ValidQuery {
            user_id,
            session_id,
            timestamp,
        })
    }
}

/// Error returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Timed out waiting for the store")]
    Timeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, err_type) = match &self {
            ApiError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "invalid_request_error",
            ),
            ApiError::Store(StoreError::DuplicateEntry { .. }) => {
                (StatusCode::CONFLICT, "duplicate_entry", "conflict_error")
            }
            ApiError::Store(StoreError::Unavailable { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_unavailable",
                "api_error",
            ),
            ApiError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "store_timeout", "api_error"),
        };

        // Backend details stay in the server log.
        let message = match &self {
            ApiError::Store(StoreError::Unavailable { .. }) => "Failed to reach the message store".to_string(),
            other => other.to_string(),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": message,
                "type": err_type,
            }
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: &str = "11111111-1111-1111-1111-111111111111";
    const SESSION: &str = "22222222-2222-2222-2222-222222222222";

    fn query(user: Option<&str>, session: Option<&str>, ts: Option<&str>) -> QueryParams {
        QueryParams {
            user_id: user.map(String::from),
            session_id: session.map(String::from),
            timestamp: ts.map(String::from),
        }
    }

    #[test]
    fn test_valid_append() {
        let request = AppendRequest {
            user_id: USER.to_string(),
            session_id: SESSION.to_string(),
            message: "hello".to_string(),
        };
        let valid = request.validate().unwrap();
        assert_eq!(valid.user_id.to_string(), USER);
        assert_eq!(valid.text, "hello");
    }

    #[test]
    fn test_append_rejects_bad_ids_and_empty_text() {
        let bad_user = AppendRequest {
            user_id: "nope".to_string(),
            session_id: SESSION.to_string(),
            message: "x".to_string(),
        };
        assert_eq!(bad_user.validate(), Err(ValidationError::InvalidUserId));

        let bad_session = AppendRequest {
            user_id: USER.to_string(),
            session_id: "".to_string(),
            message: "x".to_string(),
        };
        assert_eq!(bad_session.validate(), Err(ValidationError::InvalidSessionId));

        let empty = AppendRequest {
            user_id: USER.to_string(),
            session_id: SESSION.to_string(),
            message: String::new(),
        };
        assert_eq!(empty.validate(), Err(ValidationError::EmptyMessage));
    }

    #[test]
    fn test_valid_query() {
        let valid = query(Some(USER), Some(SESSION), Some("1500")).validate().unwrap();
        assert_eq!(valid.timestamp, 1500);
        assert_eq!(valid.session_id.to_string(), SESSION);
    }

    #[test]
    fn test_query_requires_positive_timestamp() {
        assert_eq!(
            query(Some(USER), Some(SESSION), None).validate(),
            Err(ValidationError::Missing("timestamp"))
        );
        for ts in ["0", "-5", "abc", "1.5"] {
            assert_eq!(
                query(Some(USER), Some(SESSION), Some(ts)).validate(),
                Err(ValidationError::InvalidTimestamp)
            );
        }
    }

    #[test]
    fn test_query_requires_ids() {
        assert_eq!(
            query(None, Some(SESSION), Some("1")).validate(),
            Err(ValidationError::Missing("userId"))
        );
        assert_eq!(
            query(Some(USER), Some("123"), Some("1")).validate(),
            Err(ValidationError::InvalidSessionId)
        );
    }

    #[test]
    fn test_error_status_codes() {
        let status = |e: ApiError| e.into_response().status();

        assert_eq!(
            status(ValidationError::EmptyMessage.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(
                StoreError::DuplicateEntry {
                    key: "k".to_string(),
                    id: crate::keys::entry_id(1),
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(status(ApiError::Timeout), StatusCode::GATEWAY_TIMEOUT);
    }
}
