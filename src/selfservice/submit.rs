//! Shared submit plumbing used by every strategy endpoint.

use axum::{body::Bytes, http::HeaderMap, response::Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};
use utoipa::IntoParams;
use uuid::Uuid;

use super::{error_handler, errorx, is_browser_request};
use crate::{
    flow::{Flow, FlowKind},
    registry::Registry,
    session::Session,
    strategy::{dispatch, Submission},
    Error,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct FlowQuery {
    /// The flow id.
    pub flow: Option<Uuid>,
}

/// Load flow `flow_id` of `kind` and hand the request to strategy `strategy_id`.
#[instrument(skip(registry, headers, body))]
pub async fn submit(
    registry: &Registry,
    kind: FlowKind,
    strategy_id: &str,
    flow_id: Option<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(flow_id) = flow_id else {
        let err = Error::BadRequest("the flow query parameter is missing".to_string());
        return errorx::forward(registry, &headers, is_browser_request(&headers), err).await;
    };
    let mut flow = match registry.persister().get_flow(kind, flow_id).await {
        Ok(flow) => flow,
        Err(err) => {
            return errorx::forward(registry, &headers, is_browser_request(&headers), err).await
        }
    };
    let session = match registry.sessions().fetch(registry.persister(), &headers).await {
        Ok(session) => session,
        Err(err) => {
            return errorx::forward(registry, &headers, flow.flow_type.is_browser(), err).await
        }
    };

    let submission = Submission {
        headers,
        body,
        session,
    };
    // Only used to repopulate the form when the submit fails.
    let payload = submission.decode(None).unwrap_or(Value::Null);

    match process(registry, kind, strategy_id, &mut flow, &submission).await {
        Ok(response) => response,
        Err(err) => {
            debug!("Submit of {kind} flow {flow_id} failed: {err}");
            error_handler::handle(
                registry,
                &submission.headers,
                flow,
                strategy_id,
                err,
                &payload,
            )
            .await
        }
    }
}

async fn process(
    registry: &Registry,
    kind: FlowKind,
    strategy_id: &str,
    flow: &mut Flow,
    submission: &Submission,
) -> Result<Response, Error> {
    let strategy = registry.strategy(strategy_id).ok_or(Error::NotFound)?;
    if flow.method(strategy_id).is_none() {
        return Err(Error::BadRequest(format!(
            "the {strategy_id} method is not available for this flow"
        )));
    }
    if kind == FlowKind::Settings {
        let session = require_session(submission.session.as_ref())?;
        flow.ensure_owner(session.identity_id)?;
    }
    flow.ensure_submittable(kind)?;
    dispatch(strategy, registry, kind, flow, submission).await
}

/// # Errors
/// Returns `NoActiveSession` when the request carried no session.
pub fn require_session(session: Option<&Session>) -> Result<&Session, Error> {
    session.ok_or(Error::NoActiveSession)
}
