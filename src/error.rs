use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

/// Message shown to users in place of any anomaly detail.
pub const GENERIC_ANOMALY_MESSAGE: &str = "An unexpected error occurred. Please try again later.";

/// The primary error type for the framework.
///
/// Every failure the router, resolver, fetchers or content pipeline can
/// produce is one of these kinds. Each kind maps to exactly one HTTP status
/// and one error page, and survives a `to_json`/`from_json` round trip so the
/// HTTP transport can rebuild the server's error on the client side.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppError {
    /// No route matches the requested path, or a record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The route requires a session and none (or an invalid one) was supplied.
    #[error("Authentication required: {0}")]
    AuthRequired(String),
    /// Authenticated, but the user lacks the role the route asks for.
    #[error("Forbidden: {0}")]
    Forbidden(String),
    /// Malformed request data.
    #[error("Invalid input: {0}")]
    InputError(String),
    /// Structured validation failure with a message list per field.
    #[error("Invalid input on {} field(s)", .fields.len())]
    InputErrorSchema {
        fields: BTreeMap<String, Vec<String>>,
    },
    /// Unexpected internal failure. `detail` goes to the reporter only.
    #[error("Anomaly: {message}")]
    Anomaly {
        message: String,
        detail: Option<String>,
    },
    /// The client could not reach the server at all.
    #[error("Network error: {0}")]
    NetworkError(String),
    /// A status the taxonomy has no dedicated kind for.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
}

impl AppError {
    /// Wraps an unexpected failure. The user only ever sees the generic message.
    pub fn anomaly(detail: impl std::fmt::Display) -> Self {
        AppError::Anomaly { message: GENERIC_ANOMALY_MESSAGE.to_string(), detail: Some(detail.to_string()) }
    }

    /// Single-field shorthand for [`AppError::InputErrorSchema`].
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.to_string(), vec![message.into()]);
        AppError::InputErrorSchema { fields }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::AuthRequired(_) => "AUTH_REQUIRED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::InputError(_) => "INPUT_ERROR",
            AppError::InputErrorSchema { .. } => "INPUT_ERROR_SCHEMA",
            AppError::Anomaly { .. } => "ANOMALY",
            AppError::NetworkError(_) => "NETWORK_ERROR",
            AppError::Http { .. } => "HTTP_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InputError(_) | AppError::InputErrorSchema { .. } => StatusCode::BAD_REQUEST,
            AppError::Anomaly { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NetworkError(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Http { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// The message that may be shown to an end user.
    pub fn public_message(&self) -> String {
        match self {
            AppError::NotFound(m)
            | AppError::AuthRequired(m)
            | AppError::Forbidden(m)
            | AppError::InputError(m)
            | AppError::NetworkError(m) => m.clone(),
            AppError::InputErrorSchema { .. } => "Some fields are invalid".to_string(),
            AppError::Anomaly { message, .. } => message.clone(),
            AppError::Http { message, .. } => message.clone(),
        }
    }

    /// Kinds that are expected control flow rather than bugs.
    pub fn is_expected(&self) -> bool {
        !matches!(self, AppError::Anomaly { .. })
    }

    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "code": self.code(),
            "message": self.public_message(),
            "status": self.status().as_u16(),
        });
        if let AppError::InputErrorSchema { fields } = self {
            body["details"] = json!({ "fields": fields });
        }
        body
    }

    /// Rebuilds an error from either the bare `to_json` shape or the full
    /// HTTP error body (`{"error": {...}, "status": ..}`).
    pub fn from_json(value: &Value) -> Self {
        let (inner, status) = match value.get("error") {
            Some(inner) if inner.is_object() => (inner, value.get("status")),
            _ => (value, value.get("status")),
        };
        let status = status.and_then(Value::as_u64).map(|s| s as u16).unwrap_or(500);
        let message = inner.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
        let code = inner.get("code").and_then(Value::as_str).unwrap_or_default();

        match code {
            "NOT_FOUND" => AppError::NotFound(message),
            "AUTH_REQUIRED" => AppError::AuthRequired(message),
            "FORBIDDEN" => AppError::Forbidden(message),
            "INPUT_ERROR" => AppError::InputError(message),
            "INPUT_ERROR_SCHEMA" => {
                let fields = inner
                    .pointer("/details/fields")
                    .and_then(|f| serde_json::from_value(f.clone()).ok())
                    .unwrap_or_default();
                AppError::InputErrorSchema { fields }
            }
            "ANOMALY" => AppError::Anomaly { message, detail: None },
            "NETWORK_ERROR" => AppError::NetworkError(message),
            _ => AppError::Http { status, message },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut details = match &self {
            AppError::InputErrorSchema { fields } => Some(json!({ "fields": fields })),
            _ => None,
        };

        if let AppError::Anomaly { detail, .. } = &self {
            let error_id = uuid::Uuid::new_v4();
            tracing::error!(error_id = %error_id, "Anomaly: {}", detail.as_deref().unwrap_or("-"));
            details = Some(json!({ "error_id": error_id.to_string() }));
        }

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::anomaly(format!("{:#}", err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut => AppError::anomaly("Database connection pool timed out"),
            _ => AppError::anomaly(format!("Database error: {}", err)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::anomaly(format!("I/O error ({}): {}", err.kind(), err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InputError(format!("Malformed JSON: {}", err))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            AppError::NetworkError(format!("Request failed: {}", err))
        } else if err.is_decode() {
            AppError::anomaly(format!("Undecodable response body: {}", err))
        } else {
            AppError::anomaly(err)
        }
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the crate.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    /// Converts an `Option<T>` to a `Result<T, AppError>`.
    ///
    /// # Arguments
    ///
    /// * `entity` - A string describing the entity that was not found.
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}
