use crate::{
    cli::{
        actions::{server::Args, Action},
        commands::{hooks, password, selfservice, ARG_DSN, ARG_PORT},
    },
    config::Config,
    flow::FlowKind,
    hook::{Hook, HooksConfig},
    password::{HashConfig, PolicyConfig},
    strategy::oidc::ProviderConfig,
};
use anyhow::{Context, Result};
use clap::ArgMatches;

fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn seconds(matches: &ArgMatches, id: &str) -> Option<chrono::Duration> {
    matches
        .get_one::<u64>(id)
        .and_then(|secs| i64::try_from(*secs).ok())
        .map(chrono::Duration::seconds)
}

fn urls(matches: &ArgMatches, config: Config) -> Config {
    let setters: [(&str, fn(Config, String) -> Config); 7] = [
        (selfservice::ARG_UI_LOGIN_URL, |config, url| config.with_ui_login_url(url)),
        (
            selfservice::ARG_UI_REGISTRATION_URL,
            |config, url| config.with_ui_registration_url(url),
        ),
        (selfservice::ARG_UI_SETTINGS_URL, |config, url| config.with_ui_settings_url(url)),
        (selfservice::ARG_UI_RECOVERY_URL, |config, url| config.with_ui_recovery_url(url)),
        (
            selfservice::ARG_UI_VERIFICATION_URL,
            |config, url| config.with_ui_verification_url(url),
        ),
        (selfservice::ARG_UI_ERROR_URL, |config, url| config.with_ui_error_url(url)),
        (
            selfservice::ARG_DEFAULT_RETURN_URL,
            |config, url| config.with_default_return_url(url),
        ),
    ];
    setters
        .into_iter()
        .fold(config, |config, (id, set)| match string(matches, id) {
            Some(url) => set(config, url),
            None => config,
        })
}

fn lifespans(matches: &ArgMatches, mut config: Config) -> Config {
    for (kind, id) in [
        (FlowKind::Login, selfservice::ARG_LOGIN_LIFESPAN),
        (FlowKind::Registration, selfservice::ARG_REGISTRATION_LIFESPAN),
        (FlowKind::Settings, selfservice::ARG_SETTINGS_LIFESPAN),
        (FlowKind::Recovery, selfservice::ARG_RECOVERY_LIFESPAN),
    ] {
        if let Some(lifespan) = seconds(matches, id) {
            config = config.with_flow_lifespan(kind, lifespan);
        }
    }
    if let Some(max_age) = seconds(matches, selfservice::ARG_PRIVILEGED_SESSION_MAX_AGE) {
        config = config.with_privileged_session_max_age(max_age);
    }
    if let Some(lifespan) = seconds(matches, selfservice::ARG_SESSION_LIFESPAN) {
        config = config.with_session_lifespan(lifespan);
    }
    config
}

fn policy(matches: &ArgMatches) -> PolicyConfig {
    let defaults = PolicyConfig::default();
    PolicyConfig {
        max_breaches: matches
            .get_one::<u64>(password::ARG_MAX_BREACHES)
            .copied()
            .unwrap_or(defaults.max_breaches),
        ignore_network_errors: matches
            .get_one::<bool>(password::ARG_IGNORE_NETWORK_ERRORS)
            .copied()
            .unwrap_or(defaults.ignore_network_errors),
        api_url: string(matches, password::ARG_BREACH_API_URL).unwrap_or(defaults.api_url),
        timeout: matches
            .get_one::<u64>(password::ARG_BREACH_TIMEOUT)
            .map_or(defaults.timeout, |secs| std::time::Duration::from_secs(*secs)),
        min_identifier_distance: matches
            .get_one::<usize>(password::ARG_MIN_IDENTIFIER_DISTANCE)
            .copied()
            .unwrap_or(defaults.min_identifier_distance),
        max_identifier_substring: matches
            .get_one::<usize>(password::ARG_MAX_IDENTIFIER_SUBSTRING)
            .copied()
            .unwrap_or(defaults.max_identifier_substring),
        ..defaults
    }
}

fn hashing(matches: &ArgMatches) -> HashConfig {
    let defaults = HashConfig::default();
    let get = |id: &str, default: u32| matches.get_one::<u32>(id).copied().unwrap_or(default);
    HashConfig {
        memory_kib: get(password::ARG_ARGON2_MEMORY, defaults.memory_kib),
        iterations: get(password::ARG_ARGON2_ITERATIONS, defaults.iterations),
        parallelism: get(password::ARG_ARGON2_PARALLELISM, defaults.parallelism),
    }
}

fn hook_chains(matches: &ArgMatches) -> HooksConfig {
    hooks::HOOK_ARGS
        .iter()
        .fold(HooksConfig::default(), |config, arg| {
            match matches.get_one::<Vec<Hook>>(arg.id).cloned() {
                Some(chain) if arg.after => config.with_after(arg.kind, chain),
                Some(chain) => config.with_before(arg.kind, chain),
                None => config,
            }
        })
}

/// `--oidc-providers` holds the JSON itself or `@path` to a file.
fn oidc_providers(matches: &ArgMatches) -> Result<Vec<ProviderConfig>> {
    let Some(raw) = string(matches, hooks::ARG_OIDC_PROVIDERS) else {
        return Ok(Vec::new());
    };
    let json = match raw.trim().strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read OIDC providers from {path}"))?,
        None => raw,
    };
    ProviderConfig::parse_list(&json).context("invalid KEYGATE_OIDC_PROVIDERS")
}

/// Build the runtime configuration from parsed arguments.
///
/// # Errors
/// Returns an error if the OIDC provider list cannot be read or parsed.
pub fn config(matches: &ArgMatches) -> Result<Config> {
    let base_url = string(matches, selfservice::ARG_BASE_URL)
        .context("missing required argument: --base-url")?;

    let mut config = urls(matches, Config::new(base_url));
    config = lifespans(matches, config);

    if let Some(allowed) = matches.get_many::<String>(selfservice::ARG_ALLOWED_RETURN_URLS) {
        config = config.with_allowed_return_urls(
            allowed
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect(),
        );
    }
    if let Some(url) = string(matches, selfservice::ARG_IDENTITY_SCHEMA_URL) {
        config = config.with_identity_schema_url(url);
    }
    if let Some(name) = string(matches, selfservice::ARG_SESSION_COOKIE_NAME) {
        config = config.with_session_cookie_name(name);
    }

    Ok(config
        .with_dev(matches.get_flag(selfservice::ARG_DEV))
        .with_password_policy(policy(matches))
        .with_hashing(hashing(matches))
        .with_hooks(hook_chains(matches))
        .with_oidc_providers(oidc_providers(matches)?))
}

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(4433);
    let dsn = string(matches, ARG_DSN);
    let config = config(matches)?;

    Ok(Action::Server(Args { port, dsn, config }))
}
