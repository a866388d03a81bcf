use crate::{
    api,
    config::Config,
    persistence::{memory::MemoryPersister, sql::SqlPersister, Persister},
    registry::Registry,
};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub config: Config,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let persister = persister(args.dsn.as_deref()).await?;

    let registry = Registry::builder(args.config)
        .with_persister(persister)
        .build()
        .context("Failed to build the registry")?;

    api::new(args.port, Arc::new(registry)).await
}

async fn persister(dsn: Option<&str>) -> Result<Arc<dyn Persister>> {
    let Some(dsn) = dsn else {
        warn!("No --dsn given: identities, flows and sessions are kept in memory only");
        return Ok(Arc::new(MemoryPersister::new()));
    };

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    let persister = SqlPersister::new(pool);
    persister
        .migrate()
        .await
        .context("Failed to apply the database schema")?;

    Ok(Arc::new(persister))
}

fn log_startup_args(args: &Args) {
    let config = &args.config;
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        (
            "dsn",
            args.dsn
                .as_deref()
                .map_or_else(|| "memory".to_string(), redact_dsn),
        ),
        ("base_url", config.base_url().to_string()),
        ("ui_login_url", config.ui().login.clone()),
        ("default_return_url", config.default_return_url().to_string()),
        ("identity_schema_url", config.identity_schema_url().to_string()),
        (
            "oidc_providers",
            config
                .oidc_providers()
                .iter()
                .map(|provider| provider.id.as_str())
                .collect::<Vec<_>>()
                .join(","),
        ),
        ("secure_cookies", config.secure_cookies().to_string()),
    ];
    log_entries("Startup configuration", &entries);
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)]) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\n{title}:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_dsn() {
        assert_eq!(
            redact_dsn("postgres://keygate:hunter2@db:5432/keygate"),
            "postgres://keygate:REDACTED@db:5432/keygate"
        );
        assert_eq!(
            redact_dsn("postgres://db:5432/keygate"),
            "postgres://db:5432/keygate"
        );
        assert_eq!(redact_dsn("not a url"), "invalid-dsn");
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[tokio::test]
    async fn test_memory_persister_without_dsn() -> Result<()> {
        let persister = persister(None).await?;
        persister.ping().await?;
        Ok(())
    }
}
