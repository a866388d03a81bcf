//! Runtime configuration handle.
//!
//! `Config` is built once by the CLI and handed to the [`crate::registry::Registry`];
//! tests build local instances with the `with_*` methods.

use chrono::Duration;
use url::Url;

use crate::{
    flow::FlowKind,
    hook::HooksConfig,
    password::{HashConfig, PolicyConfig},
    strategy::oidc::ProviderConfig,
};

pub const DEFAULT_SESSION_COOKIE_NAME: &str = "keygate_session";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4433";
pub const DEFAULT_IDENTITY_SCHEMA_URL: &str = "file://identity.schema.json";

const DEFAULT_FLOW_LIFESPAN_SECONDS: i64 = 600;
const DEFAULT_PRIVILEGED_SESSION_MAX_AGE_SECONDS: i64 = 3600;
const DEFAULT_SESSION_LIFESPAN_SECONDS: i64 = 86_400;
const DEFAULT_VERIFICATION_LIFESPAN_SECONDS: i64 = 86_400;
const DEFAULT_CONTINUITY_LIFESPAN_SECONDS: i64 = 600;
const DEFAULT_ERROR_RETENTION_SECONDS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct UiUrls {
    pub login: String,
    pub registration: String,
    pub settings: String,
    pub recovery: String,
    pub verification: String,
    pub error: String,
}

impl UiUrls {
    fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            login: format!("{base}/auth/login"),
            registration: format!("{base}/auth/registration"),
            settings: format!("{base}/settings"),
            recovery: format!("{base}/recovery"),
            verification: format!("{base}/verify"),
            error: format!("{base}/error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    base_url: String,
    ui: UiUrls,
    default_return_url: String,
    allowed_return_urls: Vec<String>,
    identity_schema_url: String,
    login_lifespan: Duration,
    registration_lifespan: Duration,
    settings_lifespan: Duration,
    recovery_lifespan: Duration,
    verification_lifespan: Duration,
    continuity_lifespan: Duration,
    privileged_session_max_age: Duration,
    session_lifespan: Duration,
    error_retention: Duration,
    session_cookie_name: String,
    dev: bool,
    password_policy: PolicyConfig,
    hashing: HashConfig,
    hooks: HooksConfig,
    oidc_providers: Vec<ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl Config {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            ui: UiUrls::under(&base_url),
            default_return_url: format!("{base_url}/"),
            allowed_return_urls: Vec::new(),
            identity_schema_url: DEFAULT_IDENTITY_SCHEMA_URL.to_string(),
            login_lifespan: Duration::seconds(DEFAULT_FLOW_LIFESPAN_SECONDS),
            registration_lifespan: Duration::seconds(DEFAULT_FLOW_LIFESPAN_SECONDS),
            settings_lifespan: Duration::seconds(DEFAULT_FLOW_LIFESPAN_SECONDS),
            recovery_lifespan: Duration::seconds(DEFAULT_FLOW_LIFESPAN_SECONDS),
            verification_lifespan: Duration::seconds(DEFAULT_VERIFICATION_LIFESPAN_SECONDS),
            continuity_lifespan: Duration::seconds(DEFAULT_CONTINUITY_LIFESPAN_SECONDS),
            privileged_session_max_age: Duration::seconds(
                DEFAULT_PRIVILEGED_SESSION_MAX_AGE_SECONDS,
            ),
            session_lifespan: Duration::seconds(DEFAULT_SESSION_LIFESPAN_SECONDS),
            error_retention: Duration::seconds(DEFAULT_ERROR_RETENTION_SECONDS),
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            dev: false,
            password_policy: PolicyConfig::default(),
            hashing: HashConfig::default(),
            hooks: HooksConfig::default(),
            oidc_providers: Vec::new(),
            base_url,
        }
    }

    #[must_use]
    pub fn with_ui_login_url(mut self, url: impl Into<String>) -> Self {
        self.ui.login = url.into();
        self
    }

    #[must_use]
    pub fn with_ui_registration_url(mut self, url: impl Into<String>) -> Self {
        self.ui.registration = url.into();
        self
    }

    #[must_use]
    pub fn with_ui_settings_url(mut self, url: impl Into<String>) -> Self {
        self.ui.settings = url.into();
        self
    }

    #[must_use]
    pub fn with_ui_recovery_url(mut self, url: impl Into<String>) -> Self {
        self.ui.recovery = url.into();
        self
    }

    #[must_use]
    pub fn with_ui_verification_url(mut self, url: impl Into<String>) -> Self {
        self.ui.verification = url.into();
        self
    }

    #[must_use]
    pub fn with_ui_error_url(mut self, url: impl Into<String>) -> Self {
        self.ui.error = url.into();
        self
    }

    #[must_use]
    pub fn with_default_return_url(mut self, url: impl Into<String>) -> Self {
        self.default_return_url = url.into();
        self
    }

    #[must_use]
    pub fn with_allowed_return_urls(mut self, urls: Vec<String>) -> Self {
        self.allowed_return_urls = urls;
        self
    }

    #[must_use]
    pub fn with_identity_schema_url(mut self, url: impl Into<String>) -> Self {
        self.identity_schema_url = url.into();
        self
    }

    #[must_use]
    pub fn with_flow_lifespan(mut self, kind: FlowKind, lifespan: Duration) -> Self {
        match kind {
            FlowKind::Login => self.login_lifespan = lifespan,
            FlowKind::Registration => self.registration_lifespan = lifespan,
            FlowKind::Settings => self.settings_lifespan = lifespan,
            FlowKind::Recovery => self.recovery_lifespan = lifespan,
        }
        self
    }

    #[must_use]
    pub fn with_verification_lifespan(mut self, lifespan: Duration) -> Self {
        self.verification_lifespan = lifespan;
        self
    }

    #[must_use]
    pub fn with_privileged_session_max_age(mut self, max_age: Duration) -> Self {
        self.privileged_session_max_age = max_age;
        self
    }

    #[must_use]
    pub fn with_session_lifespan(mut self, lifespan: Duration) -> Self {
        self.session_lifespan = lifespan;
        self
    }

    #[must_use]
    pub fn with_session_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.session_cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PolicyConfig) -> Self {
        self.password_policy = policy;
        self
    }

    #[must_use]
    pub fn with_hashing(mut self, hashing: HashConfig) -> Self {
        self.hashing = hashing;
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: HooksConfig) -> Self {
        self.hooks = hooks;
        self
    }

    #[must_use]
    pub fn with_oidc_providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.oidc_providers = providers;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `path` below the public base URL.
    #[must_use]
    pub fn public_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    #[must_use]
    pub fn ui(&self) -> &UiUrls {
        &self.ui
    }

    /// The UI page rendering flows of `kind`.
    #[must_use]
    pub fn ui_url(&self, kind: FlowKind) -> &str {
        match kind {
            FlowKind::Login => &self.ui.login,
            FlowKind::Registration => &self.ui.registration,
            FlowKind::Settings => &self.ui.settings,
            FlowKind::Recovery => &self.ui.recovery,
        }
    }

    #[must_use]
    pub fn default_return_url(&self) -> &str {
        &self.default_return_url
    }

    #[must_use]
    pub fn identity_schema_url(&self) -> &str {
        &self.identity_schema_url
    }

    #[must_use]
    pub fn lifespan(&self, kind: FlowKind) -> Duration {
        match kind {
            FlowKind::Login => self.login_lifespan,
            FlowKind::Registration => self.registration_lifespan,
            FlowKind::Settings => self.settings_lifespan,
            FlowKind::Recovery => self.recovery_lifespan,
        }
    }

    #[must_use]
    pub fn verification_lifespan(&self) -> Duration {
        self.verification_lifespan
    }

    #[must_use]
    pub fn continuity_lifespan(&self) -> Duration {
        self.continuity_lifespan
    }

    #[must_use]
    pub fn privileged_session_max_age(&self) -> Duration {
        self.privileged_session_max_age
    }

    #[must_use]
    pub fn session_lifespan(&self) -> Duration {
        self.session_lifespan
    }

    #[must_use]
    pub fn error_retention(&self) -> Duration {
        self.error_retention
    }

    #[must_use]
    pub fn session_cookie_name(&self) -> &str {
        &self.session_cookie_name
    }

    /// Cookies carry `Secure` unless running in dev mode.
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        !self.dev
    }

    #[must_use]
    pub fn password_policy(&self) -> &PolicyConfig {
        &self.password_policy
    }

    #[must_use]
    pub fn hashing(&self) -> HashConfig {
        self.hashing
    }

    #[must_use]
    pub fn hooks(&self) -> &HooksConfig {
        &self.hooks
    }

    #[must_use]
    pub fn oidc_providers(&self) -> &[ProviderConfig] {
        &self.oidc_providers
    }

    /// A return URL is allowed when it shares scheme, host and port with the base URL,
    /// the default return URL, a UI URL or one of the allowed return URLs.
    #[must_use]
    pub fn is_allowed_return_url(&self, candidate: &str) -> bool {
        let Ok(candidate) = Url::parse(candidate) else {
            return false;
        };
        let ui = &self.ui;
        [
            self.base_url.as_str(),
            self.default_return_url.as_str(),
            ui.login.as_str(),
            ui.registration.as_str(),
            ui.settings.as_str(),
            ui.recovery.as_str(),
            ui.verification.as_str(),
            ui.error.as_str(),
        ]
        .into_iter()
        .chain(self.allowed_return_urls.iter().map(String::as_str))
        .filter_map(|allowed| Url::parse(allowed).ok())
        .any(|allowed| allowed.origin() == candidate.origin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_base_url() {
        let config = Config::new("https://id.example.test/");
        assert_eq!(config.base_url(), "https://id.example.test");
        assert_eq!(config.ui_url(FlowKind::Login), "https://id.example.test/auth/login");
        assert_eq!(config.lifespan(FlowKind::Recovery), Duration::minutes(10));
        assert_eq!(config.privileged_session_max_age(), Duration::hours(1));
        assert_eq!(config.session_cookie_name(), "keygate_session");
        assert!(config.secure_cookies());
        assert_eq!(
            config.public_url("/self-service/login/browser"),
            "https://id.example.test/self-service/login/browser"
        );
    }

    #[test]
    fn builders_override_defaults() {
        let config = Config::new("http://localhost:4433")
            .with_dev(true)
            .with_flow_lifespan(FlowKind::Login, Duration::seconds(30))
            .with_ui_error_url("http://localhost:3000/oops");
        assert!(!config.secure_cookies());
        assert_eq!(config.lifespan(FlowKind::Login), Duration::seconds(30));
        assert_eq!(config.lifespan(FlowKind::Settings), Duration::minutes(10));
        assert_eq!(config.ui().error, "http://localhost:3000/oops");
    }

    #[test]
    fn return_urls_are_checked_by_origin() {
        let config = Config::new("https://id.example.test")
            .with_default_return_url("https://app.example.test/home")
            .with_allowed_return_urls(vec!["https://partner.example.test".to_string()]);
        assert!(config.is_allowed_return_url("https://app.example.test/welcome"));
        assert!(config.is_allowed_return_url("https://partner.example.test/x?y=z"));
        assert!(config.is_allowed_return_url("https://id.example.test/self-service/x"));
        assert!(!config.is_allowed_return_url("https://evil.example.test/"));
        assert!(!config.is_allowed_return_url("http://app.example.test/welcome"));
        assert!(!config.is_allowed_return_url("not a url"));
    }
}
