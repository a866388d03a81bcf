//! Shared fixtures for unit and router tests.

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{
        header::{COOKIE, LOCATION, SET_COOKIE},
        Request,
    },
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;

use crate::{
    config::Config,
    courier::MemoryCourier,
    identity::{validate_identity, Credentials, CredentialsType, Identity},
    password::{BreachClient, HashConfig},
    persistence::MemoryPersister,
    registry::Registry,
    schema::SchemaLoader,
    selfservice::with_query,
    session::{IssuedSession, Session},
    token::{generate_opaque_token, hash_token},
    strategy::oidc::{Claims, Provider, ProviderConfig, ProviderError, ProviderKind},
};

pub(crate) const BASE_URL: &str = "https://keygate.test";
pub(crate) const SCHEMA_URL: &str = "https://schemas.keygate.test/identity.json";
pub(crate) const FAKE_PROVIDER: &str = "fake";

/// Upper-case SHA-1 suffixes reported as breached for prefix `5BAA6` ("password").
const BREACHED_RANGE: &str = "1E4C9B93F3F0682250B6CF8331B7EE68FD8:3730471\r\n\
                              0018A45C4D1DEF81644B54AB7F969B88D65:2\r\n";
const CLEAN_RANGE: &str = "0018A45C4D1DEF81644B54AB7F969B88D65:2\r\n";

pub(crate) fn identity_schema() -> Value {
    json!({
        "$id": SCHEMA_URL,
        "type": "object",
        "properties": {
            "email": {
                "type": "string",
                "format": "email",
                "title": "E-Mail",
                "ory.sh/kratos": {
                    "credentials": { "password": { "identifier": true } },
                    "recovery": { "via": "email" },
                    "verification": { "via": "email" }
                }
            },
            "foobar": { "type": "string", "title": "Foobar" }
        },
        "required": ["email"]
    })
}

pub(crate) fn test_config() -> Config {
    Config::new(BASE_URL)
        .with_identity_schema_url(SCHEMA_URL)
        .with_hashing(HashConfig {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        })
        .with_allowed_return_urls(vec!["https://app.keygate.test".to_string()])
}

#[derive(Debug, Default)]
pub(crate) struct FakeBreachClient {
    failing: bool,
    calls: AtomicUsize,
}

impl FakeBreachClient {
    pub(crate) fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BreachClient for FakeBreachClient {
    async fn range(&self, prefix: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            anyhow::bail!("breach API unreachable");
        }
        if prefix.eq_ignore_ascii_case("5BAA6") {
            Ok(BREACHED_RANGE.to_string())
        } else {
            Ok(CLEAN_RANGE.to_string())
        }
    }
}

/// An OIDC provider answering codes registered with [`FakeProvider::accept`].
pub(crate) struct FakeProvider {
    config: ProviderConfig,
    codes: Mutex<HashMap<String, Claims>>,
    exchanges: AtomicUsize,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self {
            config: ProviderConfig {
                id: FAKE_PROVIDER.to_string(),
                provider: ProviderKind::Generic,
                client_id: "keygate".to_string(),
                client_secret: SecretString::from("not-a-secret"),
                issuer_url: Some("https://provider.test".to_string()),
                auth_url: Some("https://provider.test/auth".to_string()),
                token_url: Some("https://provider.test/token".to_string()),
                api_url: None,
                mapper_url: None,
                scope: vec!["email".to_string()],
            },
            codes: Mutex::new(HashMap::new()),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Make `code` exchangeable for a verified `email` belonging to `subject`.
    pub(crate) fn accept(&self, code: &str, subject: &str, email: &str) {
        let claims = Claims {
            iss: "https://provider.test".to_string(),
            sub: subject.to_string(),
            email: Some(email.to_string()),
            email_verified: Some(true),
            ..Claims::default()
        };
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert(code.to_string(), claims);
        }
    }

    pub(crate) fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn auth_code_url(
        &self,
        state: &str,
        redirect_uri: &str,
    ) -> Result<String, ProviderError> {
        let url = with_query("https://provider.test/auth", "state", state);
        Ok(with_query(&url, "redirect_uri", redirect_uri))
    }

    async fn claims(&self, code: &str, _redirect_uri: &str) -> Result<Claims, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        self.codes
            .lock()
            .ok()
            .and_then(|codes| codes.get(code).cloned())
            .ok_or_else(|| ProviderError::Exchange(format!("unknown code {code}")))
    }
}

pub(crate) struct Harness {
    pub registry: Arc<Registry>,
    pub courier: Arc<MemoryCourier>,
    pub breach: Arc<FakeBreachClient>,
    pub provider: Arc<FakeProvider>,
}

impl Harness {
    pub(crate) async fn new() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub(crate) async fn with_config(config: Config) -> Result<Self> {
        let loader = SchemaLoader::new()?;
        loader.register(SCHEMA_URL, identity_schema()).await;

        let courier = Arc::new(MemoryCourier::new());
        let breach = Arc::new(FakeBreachClient::default());
        let provider = Arc::new(FakeProvider::new());
        let registry = Registry::builder(config)
            .with_persister(Arc::new(MemoryPersister::new()))
            .with_courier(courier.clone())
            .with_breach_client(breach.clone())
            .with_loader(loader)
            .with_provider(FAKE_PROVIDER, provider.clone())
            .build()?;

        Ok(Self {
            registry: Arc::new(registry),
            courier,
            breach,
            provider,
        })
    }

    pub(crate) fn router(&self) -> Router {
        crate::api::router(self.registry.clone())
    }

    /// Persist an identity with `email` as trait and password identifier.
    pub(crate) async fn create_password_identity(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity> {
        let registry = &self.registry;
        let schema_id = registry.schemas().default_schema()?.id.clone();
        let mut identity = Identity::new(schema_id).with_traits(json!({ "email": email }));
        identity.set_credentials(Credentials::new(
            CredentialsType::Password,
            Vec::new(),
            json!({ "hashed_password": registry.hasher().hash(password)? }),
        ));
        validate_identity(registry.loader(), registry.schemas(), &mut identity).await?;
        registry.persister().create_identity(&identity).await?;
        Ok(identity)
    }

    pub(crate) async fn issue_session(&self, identity: &Identity) -> Result<IssuedSession> {
        Ok(self
            .registry
            .sessions()
            .issue(self.registry.persister(), identity.id)
            .await?)
    }

    /// A live session whose authentication is too old for protected changes.
    pub(crate) async fn issue_stale_session(&self, identity: &Identity) -> Result<IssuedSession> {
        let token = generate_opaque_token()?;
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            token_hash: hash_token(&token),
            identity_id: identity.id,
            active: true,
            issued_at: now - Duration::hours(2),
            expires_at: now + Duration::hours(1),
            authenticated_at: now - Duration::hours(2),
        };
        self.registry.persister().create_session(&session).await?;
        Ok(IssuedSession { session, token })
    }
}

/// Registry with the fakes wired in, for tests that need nothing else.
pub(crate) async fn registry() -> Result<Arc<Registry>> {
    Ok(Harness::new().await?.registry)
}

/// Minimal cookie jar for driving browser flows through the router.
#[derive(Debug, Default, Clone)]
pub(crate) struct Jar {
    cookies: Vec<(String, String)>,
}

impl Jar {
    pub(crate) fn store(&mut self, response: &Response) {
        for header in response.headers().get_all(SET_COOKIE) {
            let Some((name, rest)) = header.to_str().ok().and_then(|raw| raw.split_once('=')) else {
                continue;
            };
            let value = rest.split(';').next().unwrap_or_default().to_string();
            self.cookies.retain(|(existing, _)| existing != name);
            if !value.is_empty() && !header.to_str().unwrap_or_default().contains("Max-Age=0") {
                self.cookies.push((name.to_string(), value));
            }
        }
    }

    pub(crate) fn insert(&mut self, name: &str, value: &str) {
        self.cookies.retain(|(existing, _)| existing != name);
        self.cookies.push((name.to_string(), value.to_string()));
    }

    pub(crate) fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// A request for `uri` carrying the jar.
    pub(crate) fn request(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let builder = Request::builder().method(method).uri(relative(uri));
        if self.cookies.is_empty() {
            builder
        } else {
            builder.header(COOKIE, self.header())
        }
    }
}

/// Strip the public base URL so absolute links can be replayed against the router.
pub(crate) fn relative(uri: &str) -> &str {
    uri.strip_prefix(BASE_URL).unwrap_or(uri)
}

pub(crate) fn location(response: &Response) -> Result<String> {
    Ok(response
        .headers()
        .get(LOCATION)
        .ok_or_else(|| anyhow::anyhow!("response has no Location header"))?
        .to_str()?
        .to_string())
}

/// The value of query parameter `key` in `url`.
pub(crate) fn query_param(url: &str, key: &str) -> Result<String> {
    url::Url::parse(url)?
        .query_pairs()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
        .ok_or_else(|| anyhow::anyhow!("{url} has no {key} parameter"))
}

pub(crate) async fn body_json(response: Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn json_body(value: &Value) -> Result<Body> {
    Ok(Body::from(serde_json::to_vec(value)?))
}
