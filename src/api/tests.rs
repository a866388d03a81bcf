//! End-to-end scenarios driven through the full router.

use anyhow::{anyhow, Result};
use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        StatusCode,
    },
    response::Response,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::{
    csrf::CSRF_COOKIE_NAME,
    flow::FlowKind,
    identity::{oidc_identifier, CredentialsType},
    test_support::{
        body_json, json_body, location, query_param, relative, Harness, Jar, FAKE_PROVIDER,
    },
    Error,
};

const FORM: &str = "application/x-www-form-urlencoded";
const JSON: &str = "application/json";

async fn get(router: &Router, jar: &mut Jar, uri: &str) -> Result<Response> {
    let response = router
        .clone()
        .oneshot(jar.request("GET", uri).body(Body::empty())?)
        .await?;
    jar.store(&response);
    Ok(response)
}

async fn post_form(
    router: &Router,
    jar: &mut Jar,
    uri: &str,
    fields: &[(&str, &str)],
) -> Result<Response> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish();
    let response = router
        .clone()
        .oneshot(
            jar.request("POST", uri)
                .header(CONTENT_TYPE, FORM)
                .body(Body::from(body))?,
        )
        .await?;
    jar.store(&response);
    Ok(response)
}

async fn post_json(router: &Router, uri: &str, body: &Value) -> Result<Response> {
    Ok(router
        .clone()
        .oneshot(
            Jar::default()
                .request("POST", uri)
                .header(CONTENT_TYPE, JSON)
                .body(json_body(body)?)?,
        )
        .await?)
}

/// Start a browser flow and return its id and the CSRF token the form expects.
async fn browser_flow(
    router: &Router,
    jar: &mut Jar,
    kind: FlowKind,
) -> Result<(String, String)> {
    let response = get(router, jar, &format!("/self-service/{kind}/browser")).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let flow_id = query_param(&location(&response)?, "flow")?;
    let csrf = jar
        .get(CSRF_COOKIE_NAME)
        .ok_or_else(|| anyhow!("no csrf cookie after init"))?
        .to_string();
    Ok((flow_id, csrf))
}

async fn api_flow(router: &Router, kind: FlowKind) -> Result<Value> {
    let response = get(router, &mut Jar::default(), &format!("/self-service/{kind}/api")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn fetch_flow(router: &Router, jar: &mut Jar, kind: FlowKind, id: &str) -> Result<Value> {
    let response = get(router, jar, &format!("/self-service/{kind}/flows?id={id}")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

fn field<'a>(flow: &'a Value, method: &str, name: &str) -> Option<&'a Value> {
    flow["methods"][method]["config"]["fields"]
        .as_array()?
        .iter()
        .find(|field| field["name"] == name)
}

/// Every message text anywhere in the flow.
fn texts(value: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_texts(value, &mut found);
    found
}

fn collect_texts(value: &Value, found: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let (Some(Value::String(text)), Some(_)) = (map.get("text"), map.get("id")) {
                found.push(text.clone());
            }
            map.values().for_each(|child| collect_texts(child, found));
        }
        Value::Array(items) => items.iter().for_each(|child| collect_texts(child, found)),
        _ => {}
    }
}

#[tokio::test]
async fn browser_registration_signs_the_user_in() -> Result<()> {
    let harness = Harness::new().await?;
    let router = harness.router();
    let mut jar = Jar::default();
    let (flow_id, csrf) = browser_flow(&router, &mut jar, FlowKind::Registration).await?;

    let response = post_form(
        &router,
        &mut jar,
        &format!("/self-service/registration/methods/password?flow={flow_id}"),
        &[
            ("traits.email", "a@b.co"),
            ("traits.foobar", "bar"),
            ("password", "corr3ct-horse-batt3ry"),
            ("csrf_token", csrf.as_str()),
        ],
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response)?, harness.registry.config().default_return_url());
    assert!(jar.get(harness.registry.config().session_cookie_name()).is_some());

    let (identity, credentials) = harness
        .registry
        .persister()
        .find_by_credentials_identifier(CredentialsType::Password, "a@b.co")
        .await?;
    assert_eq!(credentials.identifiers, vec!["a@b.co".to_string()]);
    assert_eq!(identity.traits["foobar"], "bar");

    let response = get(&router, &mut jar, "/sessions/whoami").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["identity"]["id"], identity.id.to_string());
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_is_rendered_into_the_flow() -> Result<()> {
    let harness = Harness::new().await?;
    harness
        .create_password_identity("a@b.co", "an unguessable phrase")
        .await?;
    let router = harness.router();
    let flow = api_flow(&router, FlowKind::Registration).await?;
    let flow_id = flow["id"].as_str().unwrap_or_default().to_string();

    let response = post_json(
        &router,
        &format!("/self-service/registration/methods/password?flow={flow_id}"),
        &json!({ "traits": { "email": "a@b.co" }, "password": "another long phrase" }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let flow = body_json(response).await?;
    assert_eq!(flow["id"], flow_id.as_str());
    assert!(texts(&flow).iter().any(|text| text.contains("exists already")));
    assert_eq!(
        field(&flow, "password", "traits.email").map(|field| field["value"].clone()),
        Some(json!("a@b.co"))
    );
    assert!(field(&flow, "password", "password")
        .and_then(|field| field.get("value"))
        .map_or(true, Value::is_null));
    Ok(())
}

#[tokio::test]
async fn breached_password_is_rejected() -> Result<()> {
    let harness = Harness::new().await?;
    let router = harness.router();
    let mut jar = Jar::default();
    let (flow_id, csrf) = browser_flow(&router, &mut jar, FlowKind::Registration).await?;

    let response = post_form(
        &router,
        &mut jar,
        &format!("/self-service/registration/methods/password?flow={flow_id}"),
        &[
            ("traits.email", "c@d.co"),
            ("password", "password"),
            ("csrf_token", csrf.as_str()),
        ],
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response)?;
    assert!(target.starts_with(&harness.registry.config().ui().registration));
    assert_eq!(query_param(&target, "flow")?, flow_id);
    assert!(harness.breach.calls() >= 1);

    let flow = fetch_flow(&router, &mut jar, FlowKind::Registration, &flow_id).await?;
    assert!(texts(&flow).iter().any(|text| text.contains("data breaches")));
    assert_eq!(
        field(&flow, "password", "csrf_token").map(|field| field["value"].clone()),
        Some(json!(csrf))
    );

    let missing = harness
        .registry
        .persister()
        .find_by_credentials_identifier(CredentialsType::Password, "c@d.co")
        .await;
    assert!(matches!(missing, Err(Error::NotFound)));
    Ok(())
}

/// Drop what differs between two otherwise identical flows.
fn normalized(flow: &Value) -> Result<Value> {
    let id = flow["id"].as_str().unwrap_or_default().to_string();
    let raw = serde_json::to_string(flow)?.replace(&id, "FLOW");
    let mut flow: Value = serde_json::from_str(&raw)?;
    if let Some(map) = flow.as_object_mut() {
        map.remove("issued_at");
        map.remove("expires_at");
    }
    Ok(flow)
}

async fn failed_api_login(harness: &Harness, identifier: &str, password: &str) -> Result<Value> {
    let router = harness.router();
    let flow = api_flow(&router, FlowKind::Login).await?;
    let flow_id = flow["id"].as_str().unwrap_or_default().to_string();
    let response = post_json(
        &router,
        &format!("/self-service/login/methods/password?flow={flow_id}"),
        &json!({ "identifier": identifier, "password": password }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    normalized(&body_json(response).await?)
}

#[tokio::test]
async fn login_failures_do_not_reveal_accounts() -> Result<()> {
    let unknown = Harness::new().await?;
    let known = Harness::new().await?;
    known
        .create_password_identity("someone@example.com", "the right phrase")
        .await?;

    let unknown_body =
        failed_api_login(&unknown, "someone@example.com", "a wrong phrase").await?;
    let wrong_password = failed_api_login(&known, "someone@example.com", "a wrong phrase").await?;
    assert_eq!(unknown_body, wrong_password);
    assert!(texts(&unknown_body)
        .iter()
        .any(|text| text.contains("credentials are invalid")));
    Ok(())
}

#[tokio::test]
async fn browser_login_issues_a_session_cookie() -> Result<()> {
    let harness = Harness::new().await?;
    let identity = harness
        .create_password_identity("browser@example.com", "the right phrase")
        .await?;
    let router = harness.router();
    let mut jar = Jar::default();
    let (flow_id, csrf) = browser_flow(&router, &mut jar, FlowKind::Login).await?;

    let response = post_form(
        &router,
        &mut jar,
        &format!("/self-service/login/methods/password?flow={flow_id}"),
        &[
            ("identifier", "Browser@Example.com"),
            ("password", "the right phrase"),
            ("csrf_token", csrf.as_str()),
        ],
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response)?, harness.registry.config().default_return_url());
    assert!(jar.get(harness.registry.config().session_cookie_name()).is_some());
    assert_eq!(whoami_identity(&router, &mut jar).await?, identity.id.to_string());
    Ok(())
}

#[tokio::test]
async fn api_login_returns_a_session_token() -> Result<()> {
    let harness = Harness::new().await?;
    let identity = harness
        .create_password_identity("api@example.com", "the right phrase")
        .await?;
    let router = harness.router();
    let flow = api_flow(&router, FlowKind::Login).await?;
    let flow_id = flow["id"].as_str().unwrap_or_default().to_string();

    let response = post_json(
        &router,
        &format!("/self-service/login/methods/password?flow={flow_id}"),
        &json!({ "identifier": "api@example.com", "password": "the right phrase" }),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["session"]["identity_id"], identity.id.to_string());
    assert_eq!(body["identity"]["id"], identity.id.to_string());
    let token = body["session_token"]
        .as_str()
        .ok_or_else(|| anyhow!("no session token in {body}"))?;

    let response = router
        .clone()
        .oneshot(
            Jar::default()
                .request("GET", "/sessions/whoami")
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn stale_browser_password_change_resumes_after_refresh_login() -> Result<()> {
    let harness = Harness::new().await?;
    let identity = harness
        .create_password_identity("refresh@example.com", "the original phrase")
        .await?;
    let stale = harness.issue_stale_session(&identity).await?;
    let router = harness.router();
    let mut jar = Jar::default();
    jar.insert(harness.registry.config().session_cookie_name(), &stale.token);
    let (settings_id, csrf) = browser_flow(&router, &mut jar, FlowKind::Settings).await?;

    let response = post_form(
        &router,
        &mut jar,
        &format!("/self-service/settings/methods/password?flow={settings_id}"),
        &[
            ("password", "a brand new passphrase 42"),
            ("csrf_token", csrf.as_str()),
        ],
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let refresh = location(&response)?;
    assert_eq!(query_param(&refresh, "refresh")?, "true");
    let resume_url = query_param(&refresh, "return_to")?;
    let resume_path = format!("/self-service/settings/methods/password?flow={settings_id}");
    assert!(resume_url.ends_with(&resume_path));

    let response = get(&router, &mut jar, &refresh).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let login_id = query_param(&location(&response)?, "flow")?;
    let login = fetch_flow(&router, &mut jar, FlowKind::Login, &login_id).await?;
    assert_eq!(login["forced"], true);
    assert_eq!(
        field(&login, "password", "identifier").map(|field| field["value"].clone()),
        Some(json!("refresh@example.com"))
    );

    let response = post_form(
        &router,
        &mut jar,
        &format!("/self-service/login/methods/password?flow={login_id}"),
        &[
            ("identifier", "refresh@example.com"),
            ("password", "the original phrase"),
            ("csrf_token", csrf.as_str()),
        ],
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response)?, resume_url);

    let mut replay = jar.clone();
    let response = get(&router, &mut jar, &resume_url).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response)?.contains(&format!("/settings?flow={settings_id}")));
    assert!(jar.get(crate::continuity::CONTINUITY_COOKIE_NAME).is_none());

    let (_, credentials) = harness
        .registry
        .persister()
        .find_by_credentials_identifier(CredentialsType::Password, "refresh@example.com")
        .await?;
    let hashed = credentials.config["hashed_password"].as_str().unwrap_or_default();
    assert!(harness.registry.hasher().verify("a brand new passphrase 42", hashed));

    let response = get(&router, &mut replay, &resume_url).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(location(&response)?.contains("/error?error="));
    Ok(())
}

#[tokio::test]
async fn recovery_link_leads_to_a_privileged_settings_flow() -> Result<()> {
    let harness = Harness::new().await?;
    let identity = harness
        .create_password_identity("lost@example.com", "a forgotten phrase")
        .await?;
    let earlier = harness.issue_session(&identity).await?;
    let router = harness.router();

    let mut jar = Jar::default();
    let (flow_id, csrf) = browser_flow(&router, &mut jar, FlowKind::Recovery).await?;
    let response = post_form(
        &router,
        &mut jar,
        &format!("/self-service/recovery/methods/link?flow={flow_id}"),
        &[("email", "lost@example.com"), ("csrf_token", csrf.as_str())],
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let flow = fetch_flow(&router, &mut jar, FlowKind::Recovery, &flow_id).await?;
    assert_eq!(flow["state"], "email_sent");

    let email = harness
        .courier
        .last_to("lost@example.com")
        .ok_or_else(|| anyhow!("no recovery email"))?;
    let link = email
        .link()
        .ok_or_else(|| anyhow!("recovery email without link"))?
        .to_string();

    let response = get(&router, &mut jar, relative(&link)).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response)?;
    assert!(target.starts_with(&harness.registry.config().ui().settings));
    let settings_id = query_param(&target, "flow")?;

    let settings = fetch_flow(&router, &mut jar, FlowKind::Settings, &settings_id).await?;
    assert!(texts(&settings)
        .iter()
        .any(|text| text.starts_with("You successfully recovered your account")));
    assert_eq!(settings["identity_id"], identity.id.to_string());

    // the link is single use
    let response = get(&router, &mut Jar::default(), relative(&link)).await?;
    assert!(location(&response)?.starts_with(&harness.registry.config().ui().recovery));

    let response = router
        .clone()
        .oneshot(
            Jar::default()
                .request("GET", "/sessions/whoami")
                .header(AUTHORIZATION, format!("Bearer {}", earlier.token))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

/// Run the provider round trip for a browser flow and return the callback response.
async fn oidc_round_trip(
    router: &Router,
    jar: &mut Jar,
    start: &str,
    code: &str,
) -> Result<Response> {
    let response = get(router, jar, start).await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let state = query_param(&location(&response)?, "state")?;
    get(
        router,
        jar,
        &format!("/self-service/methods/oidc/callback/{FAKE_PROVIDER}?code={code}&state={state}"),
    )
    .await
}

async fn whoami_identity(router: &Router, jar: &mut Jar) -> Result<String> {
    let response = get(router, jar, "/sessions/whoami").await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(body_json(response).await?["identity"]["id"]
        .as_str()
        .unwrap_or_default()
        .to_string())
}

#[tokio::test]
async fn oidc_registration_of_a_known_subject_logs_in() -> Result<()> {
    let harness = Harness::new().await?;
    harness.provider.accept("first", "subject-1", "oidc@example.com");
    harness.provider.accept("second", "subject-1", "oidc@example.com");
    harness.provider.accept("third", "subject-1", "oidc@example.com");
    let router = harness.router();

    let mut first = Jar::default();
    let (flow_id, _) = browser_flow(&router, &mut first, FlowKind::Registration).await?;
    let response = oidc_round_trip(
        &router,
        &mut first,
        &format!("/self-service/methods/oidc/auth/{FAKE_PROVIDER}/{flow_id}"),
        "first",
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response)?, harness.registry.config().default_return_url());
    let registered = whoami_identity(&router, &mut first).await?;
    let identity = harness
        .registry
        .persister()
        .get_identity(registered.parse()?)
        .await?;
    assert_eq!(identity.traits["email"], "oidc@example.com");

    let mut second = Jar::default();
    let (flow_id, _) = browser_flow(&router, &mut second, FlowKind::Registration).await?;
    let response = oidc_round_trip(
        &router,
        &mut second,
        &format!("/self-service/methods/oidc/auth/{FAKE_PROVIDER}/{flow_id}"),
        "second",
    )
    .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let crossover = location(&response)?;
    assert!(crossover.contains(&format!("/self-service/methods/oidc/auth/{FAKE_PROVIDER}/")));
    assert!(second.get(harness.registry.config().session_cookie_name()).is_none());

    let response = oidc_round_trip(&router, &mut second, relative(&crossover), "third").await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response)?, harness.registry.config().default_return_url());
    assert_eq!(whoami_identity(&router, &mut second).await?, registered);

    let (linked, _) = harness
        .registry
        .persister()
        .find_by_credentials_identifier(
            CredentialsType::Oidc,
            &oidc_identifier(FAKE_PROVIDER, "subject-1"),
        )
        .await?;
    assert_eq!(linked.id.to_string(), registered);
    assert_eq!(harness.provider.exchanges(), 3);
    Ok(())
}

#[tokio::test]
async fn oidc_callback_with_foreign_state_is_refused() -> Result<()> {
    let harness = Harness::new().await?;
    harness.provider.accept("code", "subject-2", "x@example.com");
    let router = harness.router();

    let response = get(
        &router,
        &mut Jar::default(),
        &format!("/self-service/methods/oidc/callback/{FAKE_PROVIDER}?code=code&state=forged"),
    )
    .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(harness.provider.exchanges(), 0);
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> Result<()> {
    let harness = Harness::new().await?;
    let response = get(&harness.router(), &mut Jar::default(), "/openapi.json").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = body_json(response).await?;
    assert!(doc["paths"]["/self-service/verification/methods/link"].is_object());
    Ok(())
}
