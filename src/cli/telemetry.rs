use anyhow::Result;
use std::env::var;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

pub const LOG_FORMAT_ENV: &str = "KEYGATE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    fn from_env(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(format) if format.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

fn filter(verbosity_level: Level) -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(verbosity_level.into())
        .from_env_lossy()
        .add_directive("hyper=error".parse()?)
        .add_directive("tokio=error".parse()?)
        .add_directive("sqlx=warn".parse()?))
}

/// Initialize logging.
/// Output is pretty printed unless `KEYGATE_LOG_FORMAT=json`; `RUST_LOG` refines the filter.
///
/// # Errors
///
/// Returns an error if the filter directives or the subscriber cannot be installed
pub fn init(verbosity_level: Option<Level>) -> Result<()> {
    let verbosity_level = verbosity_level.unwrap_or(Level::ERROR);
    let filter = filter(verbosity_level)?;

    match LogFormat::from_env(var(LOG_FORMAT_ENV).ok().as_deref()) {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true);
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_target(false)
                .pretty();
            let subscriber = Registry::default().with(fmt_layer).with(filter);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_env() {
        assert_eq!(LogFormat::from_env(None), LogFormat::Pretty);
        assert_eq!(LogFormat::from_env(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::from_env(Some(" json ")), LogFormat::Json);
        assert_eq!(LogFormat::from_env(Some("text")), LogFormat::Pretty);
    }

    #[test]
    fn test_filter_builds() -> Result<()> {
        temp_env::with_var("RUST_LOG", None::<&str>, || -> Result<()> {
            let filter = filter(Level::DEBUG)?;
            assert!(filter.to_string().contains("hyper=error"));
            Ok(())
        })
    }
}
