use axum::response::Response;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use super::{hash_password, verify_password, ID};
use crate::{
    flow::Flow,
    hook::post_login,
    identity::{CredentialsType, PasswordConfig},
    registry::Registry,
    strategy::Submission,
    Error,
};

fn login_schema() -> Value {
    json!({
        "type": "object",
        "required": ["identifier", "password"],
        "properties": {
            "identifier": { "type": "string", "minLength": 1 },
            "password": { "type": "string", "minLength": 1 },
            "csrf_token": { "type": "string" }
        }
    })
}

fn text(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[instrument(skip_all, fields(flow_id = %flow.id))]
pub(super) async fn login(
    registry: &Registry,
    flow: &mut Flow,
    submission: &Submission,
) -> Result<Response, Error> {
    let schema = registry
        .loader()
        .compile_value("password-login", login_schema())
        .await?;
    let payload = submission.decode_validated(&schema)?;
    registry
        .csrf()
        .validate(flow.flow_type, &submission.headers, &payload)?;
    if submission.session.is_some() && !flow.forced {
        return Err(Error::AlreadyAuthenticated);
    }

    let identifier = text(&payload, "identifier").trim().to_lowercase();
    let password = text(&payload, "password");

    let (identity, credentials) = match registry
        .persister()
        .find_by_credentials_identifier(CredentialsType::Password, &identifier)
        .await
    {
        Ok(found) => found,
        Err(Error::NotFound) => {
            // Spend the time of a real comparison so a miss looks like a mismatch.
            let _ = hash_password(registry, password).await;
            debug!("No password credentials for the submitted identifier");
            return Err(Error::InvalidCredentials);
        }
        Err(err) => return Err(err),
    };

    let config: PasswordConfig =
        serde_json::from_value(credentials.config).map_err(|_| Error::InvalidCredentials)?;
    if !verify_password(registry, password, config.hashed_password).await? {
        debug!("Password mismatch for identity {}", identity.id);
        return Err(Error::InvalidCredentials);
    }
    if let Some(session) = &submission.session {
        if session.identity_id != identity.id {
            return Err(Error::InvalidCredentials);
        }
    }

    flow.active = Some(ID.to_string());
    post_login(registry, flow, identity, submission.session.as_ref()).await
}
