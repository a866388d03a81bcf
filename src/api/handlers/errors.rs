use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{registry::Registry, Error};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ErrorQuery {
    /// The id the error UI received in its `error` query parameter.
    pub error: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/self-service/errors",
    params(ErrorQuery),
    responses(
        (status = 200, description = "The stored error", body = crate::persistence::ErrorContainer),
        (status = 404, description = "Unknown error id", body = crate::ErrorResponse),
    ),
    tag = "errors"
)]
/// Let the error UI read an error that could not be shown inside a flow.
pub async fn read_error(
    registry: Extension<Arc<Registry>>,
    Query(query): Query<ErrorQuery>,
) -> Response {
    let Some(id) = query.error else {
        return Error::BadRequest("the error query parameter is missing".to_string())
            .into_response();
    };
    match registry.persister().read_error(id).await {
        Ok(container) => (StatusCode::OK, Json(container)).into_response(),
        Err(err) => err.into_response(),
    }
}
