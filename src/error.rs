//! Error taxonomy shared by every flow, strategy and persistence port.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::{schema::ValidationErrors, strategy::oidc::ProviderError};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    SchemaValidation(ValidationErrors),
    #[error("the provided credentials are invalid")]
    InvalidCredentials,
    #[error("an account with the same identifier exists already")]
    DuplicateIdentifier,
    #[error("the request was rejected to protect you from cross-site request forgery")]
    CsrfTokenInvalid,
    #[error("the flow expired at {expired_at}")]
    FlowExpired { expired_at: DateTime<Utc> },
    #[error("the flow could not be found")]
    FlowNotFound,
    #[error("the flow belongs to a different identity")]
    FlowOwnership,
    #[error("the flow has already been completed")]
    FlowCompleted,
    #[error("a valid session was detected")]
    AlreadyAuthenticated,
    #[error("a recent authentication is required to perform this action")]
    NeedsPrivilegedSession,
    #[error("no active session was found in this request")]
    NoActiveSession,
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("the recovery token is invalid or has already been used")]
    RecoveryTokenInvalid,
    #[error("the password can not be used because {0}")]
    PasswordPolicy(String),
    #[error("the record was modified concurrently")]
    StaleRevision,
    #[error("the requested resource could not be found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::SchemaValidation(_)
            | Self::InvalidCredentials
            | Self::DuplicateIdentifier
            | Self::AlreadyAuthenticated
            | Self::Provider(_)
            | Self::RecoveryTokenInvalid
            | Self::PasswordPolicy(_) => StatusCode::BAD_REQUEST,
            Self::CsrfTokenInvalid | Self::FlowOwnership | Self::NeedsPrivilegedSession => {
                StatusCode::FORBIDDEN
            }
            Self::FlowExpired { .. } => StatusCode::GONE,
            Self::FlowNotFound | Self::NotFound => StatusCode::NOT_FOUND,
            Self::FlowCompleted | Self::StaleRevision => StatusCode::CONFLICT,
            Self::NoActiveSession => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine readable identifier of the error kind.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::SchemaValidation(_) => "schema_validation",
            Self::InvalidCredentials => "invalid_credentials",
            Self::DuplicateIdentifier => "duplicate_identifier",
            Self::CsrfTokenInvalid => "csrf_token_invalid",
            Self::FlowExpired { .. } => "flow_expired",
            Self::FlowNotFound => "flow_not_found",
            Self::FlowOwnership => "flow_ownership",
            Self::FlowCompleted => "flow_completed",
            Self::AlreadyAuthenticated => "already_authenticated",
            Self::NeedsPrivilegedSession => "privileged_session_required",
            Self::NoActiveSession => "no_active_session",
            Self::Provider(_) => "provider_error",
            Self::RecoveryTokenInvalid => "recovery_token_invalid",
            Self::PasswordPolicy(_) => "password_policy",
            Self::StaleRevision => "stale_revision",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal",
        }
    }

    /// Errors the flow error handler renders back into the originating form.
    #[must_use]
    pub const fn is_form_error(&self) -> bool {
        matches!(
            self,
            Self::BadRequest(_)
                | Self::SchemaValidation(_)
                | Self::InvalidCredentials
                | Self::DuplicateIdentifier
                | Self::Provider(_)
                | Self::PasswordPolicy(_)
        )
    }

    #[must_use]
    pub fn to_response_body(&self) -> ErrorResponse {
        let status = self.status();
        let message = match self {
            Self::Internal(_) => "an internal server error occurred".to_string(),
            other => other.to_string(),
        };
        let details = match self {
            Self::SchemaValidation(errors) => Some(json!({
                "messages": errors
                    .iter()
                    .map(|err| json!({ "pointer": err.pointer, "message": err.message }))
                    .collect::<Vec<_>>()
            })),
            Self::FlowExpired { expired_at } => Some(json!({ "expired_at": expired_at })),
            _ => None,
        };
        ErrorResponse {
            error: ErrorBody {
                code: status.as_u16(),
                status: status
                    .canonical_reason()
                    .unwrap_or("Unknown")
                    .to_string(),
                reason: self.reason().to_string(),
                message,
                details,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub code: u16,
    pub status: String,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<Value>,
}

impl ErrorResponse {
    /// Attach extra details, merging into existing ones when both are objects.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        match self.error.details.as_mut().and_then(Value::as_object_mut) {
            Some(details) => {
                details.insert(key.to_string(), value);
            }
            None => {
                let mut details = serde_json::Map::new();
                details.insert(key.to_string(), value);
                self.error.details = Some(Value::Object(details));
            }
        }
        self
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Internal error: {err:#}");
        }
        let status = self.status();
        (status, Json(self.to_response_body())).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}
