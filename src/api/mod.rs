use crate::{
    api::handlers::{errors, flows, health, sessions},
    registry::Registry,
    selfservice::errorx,
    strategy::{self, Strategy},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::get,
    Extension, Json, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

mod handlers;
#[cfg(test)]
mod tests;

const ERROR_JANITOR_PERIOD: Duration = Duration::from_secs(5 * 60);

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Same wiring as the served router; only the document is kept.
    let (_router, openapi) = api_router(&strategy::builtin()).split_for_parts();
    openapi
}

/// Build the application router: every documented route plus `/openapi.json`,
/// with the registry attached as an extension.
#[must_use]
pub fn router(registry: Arc<Registry>) -> Router {
    let (router, openapi) = api_router(registry.strategies()).split_for_parts();
    router
        .route("/openapi.json", get(move || async move { Json(openapi) }))
        .layer(Extension(registry))
}

/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document. Strategies contribute
/// their own submit endpoints.
fn api_router(strategies: &[Arc<dyn Strategy>]) -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::alive))
        .routes(routes!(health::ready))
        .routes(routes!(flows::login_browser))
        .routes(routes!(flows::login_api))
        .routes(routes!(flows::login_flow))
        .routes(routes!(flows::registration_browser))
        .routes(routes!(flows::registration_api))
        .routes(routes!(flows::registration_flow))
        .routes(routes!(flows::settings_browser))
        .routes(routes!(flows::settings_api))
        .routes(routes!(flows::settings_flow))
        .routes(routes!(flows::recovery_browser))
        .routes(routes!(flows::recovery_api))
        .routes(routes!(flows::recovery_flow))
        .routes(routes!(errors::read_error))
        .routes(routes!(sessions::whoami))
        .routes(routes!(sessions::logout_browser));

    for strategy in strategies {
        router = router.merge(strategy.routes());
    }

    // utoipa-axum 0.1 has no mutable accessor; split, edit, and reassemble.
    let (routes, mut openapi) = router.split_for_parts();
    openapi.tags = Some(vec![
        tag("health", "Liveness and readiness probes"),
        tag("login", "Login flows"),
        tag("registration", "Registration flows"),
        tag("settings", "Profile and credential updates"),
        tag("recovery", "Account recovery"),
        tag("verification", "Address verification"),
        tag("oidc", "Sign in with OpenID Connect providers"),
        tag("errors", "Errors shown by the error UI"),
        tag("sessions", "Session introspection and logout"),
    ]);

    OpenApiRouter::with_openapi(openapi).merge(OpenApiRouter::from(routes))
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let non_empty = |value: &'_ str| -> bool { !value.is_empty() };
    match author.find('<') {
        Some(start) => {
            let name = author[..start].trim();
            let email = author[start + 1..].trim_end_matches('>').trim();
            (
                Some(name).filter(|name| non_empty(name)),
                Some(email).filter(|email| non_empty(email)),
            )
        }
        None => (Some(author.trim()).filter(|name| non_empty(name)), None),
    }
}

/// Serve the API on `port` until ctrl-c.
///
/// # Errors
/// Returns an error if the listener cannot be bound or the server fails.
pub async fn new(port: u16, registry: Arc<Registry>) -> Result<()> {
    let janitor = errorx::spawn_janitor(registry.clone(), ERROR_JANITOR_PERIOD);

    let cors = CorsLayer::new()
        // allow `GET` and `POST` when accessing the resource
        .allow_methods([Method::GET, Method::POST])
        // allow requests from any origin
        .allow_origin(Any);

    let app = router(registry).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    janitor.abort();
    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let method = request.method();
    let path = request.uri().path();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", %method, path, request_id)
}

#[cfg(test)]
mod openapi_tests {
    use super::*;

    #[test]
    fn parses_author_with_email() {
        assert_eq!(
            parse_author("Team Keygate <team@keygate.dev>"),
            (Some("Team Keygate"), Some("team@keygate.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@mail.test>"), (None, Some("only@mail.test")));
    }

    #[test]
    fn document_lists_flow_and_strategy_paths() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        for path in [
            "/health/ready",
            "/self-service/login/browser",
            "/self-service/login/methods/password",
            "/self-service/registration/flows",
            "/self-service/settings/methods/profile",
            "/self-service/recovery/methods/link",
            "/self-service/methods/oidc/callback/{provider}",
            "/sessions/whoami",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let tags = doc.tags.unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "recovery"));
    }
}
