use axum::response::Response;
use serde_json::{json, Value};
use tracing::instrument;

use super::{hash_password, ID};
use crate::{
    flow::Flow,
    hook::post_registration,
    identity::{validate_identity, Credentials, CredentialsType, Identity},
    registry::Registry,
    strategy::Submission,
    Error,
};

fn registration_schema(traits_url: &str) -> Value {
    json!({
        "type": "object",
        "required": ["password", "traits"],
        "properties": {
            "password": { "type": "string", "minLength": 1 },
            "csrf_token": { "type": "string" },
            "traits": { "$ref": traits_url }
        }
    })
}

#[instrument(skip_all, fields(flow_id = %flow.id))]
pub(super) async fn register(
    registry: &Registry,
    flow: &mut Flow,
    submission: &Submission,
) -> Result<Response, Error> {
    let identity_schema = registry.schemas().default_schema()?;
    let schema = registry
        .loader()
        .compile_value(
            "password-registration",
            registration_schema(&identity_schema.url),
        )
        .await?;
    let payload = submission.decode_validated(&schema)?;
    registry
        .csrf()
        .validate(flow.flow_type, &submission.headers, &payload)?;
    if submission.session.is_some() {
        return Err(Error::AlreadyAuthenticated);
    }

    let password = payload
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let traits = payload.get("traits").cloned().unwrap_or_else(|| json!({}));

    let mut identity = Identity::new(identity_schema.id.clone()).with_traits(traits);
    identity.set_credentials(Credentials::new(
        CredentialsType::Password,
        Vec::new(),
        Value::Null,
    ));
    validate_identity(registry.loader(), registry.schemas(), &mut identity).await?;

    registry
        .password_validator()
        .validate(identity.first_identifier().unwrap_or_default(), &password)
        .await?;

    let hashed_password = hash_password(registry, password).await?;
    let identifiers = identity
        .get_credentials(CredentialsType::Password)
        .map(|credentials| credentials.identifiers.clone())
        .unwrap_or_default();
    identity.set_credentials(Credentials::new(
        CredentialsType::Password,
        identifiers,
        json!({ "hashed_password": hashed_password }),
    ));

    flow.active = Some(ID.to_string());
    post_registration(registry, flow, identity).await
}
