use clap::{Arg, ArgAction, Command};

pub const ARG_BASE_URL: &str = "base-url";
pub const ARG_UI_LOGIN_URL: &str = "ui-login-url";
pub const ARG_UI_REGISTRATION_URL: &str = "ui-registration-url";
pub const ARG_UI_SETTINGS_URL: &str = "ui-settings-url";
pub const ARG_UI_RECOVERY_URL: &str = "ui-recovery-url";
pub const ARG_UI_VERIFICATION_URL: &str = "ui-verification-url";
pub const ARG_UI_ERROR_URL: &str = "ui-error-url";
pub const ARG_DEFAULT_RETURN_URL: &str = "default-return-url";
pub const ARG_ALLOWED_RETURN_URLS: &str = "allowed-return-urls";
pub const ARG_IDENTITY_SCHEMA_URL: &str = "identity-schema-url";
pub const ARG_LOGIN_LIFESPAN: &str = "login-lifespan";
pub const ARG_REGISTRATION_LIFESPAN: &str = "registration-lifespan";
pub const ARG_SETTINGS_LIFESPAN: &str = "settings-lifespan";
pub const ARG_RECOVERY_LIFESPAN: &str = "recovery-lifespan";
pub const ARG_PRIVILEGED_SESSION_MAX_AGE: &str = "privileged-session-max-age";
pub const ARG_SESSION_LIFESPAN: &str = "session-lifespan";
pub const ARG_SESSION_COOKIE_NAME: &str = "session-cookie-name";
pub const ARG_DEV: &str = "dev";

fn url_arg(id: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(id).long(id).help(help).env(env)
}

fn seconds_arg(
    id: &'static str,
    env: &'static str,
    help: &'static str,
    default: &'static str,
) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .default_value(default)
        .value_parser(clap::value_parser!(u64).range(1..))
}

/// Public URLs, UI endpoints and lifespans of flows and sessions.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BASE_URL)
                .long(ARG_BASE_URL)
                .help("Public URL of this service, used for form actions and emailed links")
                .env("KEYGATE_BASE_URL")
                .default_value(crate::config::DEFAULT_BASE_URL),
        )
        .arg(url_arg(
            ARG_UI_LOGIN_URL,
            "KEYGATE_UI_LOGIN_URL",
            "Login UI (default: <base-url>/auth/login)",
        ))
        .arg(url_arg(
            ARG_UI_REGISTRATION_URL,
            "KEYGATE_UI_REGISTRATION_URL",
            "Registration UI (default: <base-url>/auth/registration)",
        ))
        .arg(url_arg(
            ARG_UI_SETTINGS_URL,
            "KEYGATE_UI_SETTINGS_URL",
            "Settings UI (default: <base-url>/settings)",
        ))
        .arg(url_arg(
            ARG_UI_RECOVERY_URL,
            "KEYGATE_UI_RECOVERY_URL",
            "Recovery UI (default: <base-url>/recovery)",
        ))
        .arg(url_arg(
            ARG_UI_VERIFICATION_URL,
            "KEYGATE_UI_VERIFICATION_URL",
            "Verification UI (default: <base-url>/verify)",
        ))
        .arg(url_arg(
            ARG_UI_ERROR_URL,
            "KEYGATE_UI_ERROR_URL",
            "Error UI (default: <base-url>/error)",
        ))
        .arg(url_arg(
            ARG_DEFAULT_RETURN_URL,
            "KEYGATE_DEFAULT_RETURN_URL",
            "Where completed flows return to (default: <base-url>/)",
        ))
        .arg(
            Arg::new(ARG_ALLOWED_RETURN_URLS)
                .long(ARG_ALLOWED_RETURN_URLS)
                .help("Comma separated allow list for return_to and redirect hooks")
                .env("KEYGATE_ALLOWED_RETURN_URLS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_IDENTITY_SCHEMA_URL)
                .long(ARG_IDENTITY_SCHEMA_URL)
                .help("Default identity traits schema (file://, http(s):// or base64://)")
                .env("KEYGATE_IDENTITY_SCHEMA_URL")
                .default_value(crate::config::DEFAULT_IDENTITY_SCHEMA_URL),
        )
        .arg(seconds_arg(
            ARG_LOGIN_LIFESPAN,
            "KEYGATE_LOGIN_LIFESPAN",
            "Login flow lifespan in seconds",
            "600",
        ))
        .arg(seconds_arg(
            ARG_REGISTRATION_LIFESPAN,
            "KEYGATE_REGISTRATION_LIFESPAN",
            "Registration flow lifespan in seconds",
            "600",
        ))
        .arg(seconds_arg(
            ARG_SETTINGS_LIFESPAN,
            "KEYGATE_SETTINGS_LIFESPAN",
            "Settings flow lifespan in seconds",
            "600",
        ))
        .arg(seconds_arg(
            ARG_RECOVERY_LIFESPAN,
            "KEYGATE_RECOVERY_LIFESPAN",
            "Recovery flow and token lifespan in seconds",
            "600",
        ))
        .arg(seconds_arg(
            ARG_PRIVILEGED_SESSION_MAX_AGE,
            "KEYGATE_PRIVILEGED_SESSION_MAX_AGE",
            "Seconds after authentication during which credentials may change",
            "3600",
        ))
        .arg(seconds_arg(
            ARG_SESSION_LIFESPAN,
            "KEYGATE_SESSION_LIFESPAN",
            "Session lifespan in seconds",
            "86400",
        ))
        .arg(
            Arg::new(ARG_SESSION_COOKIE_NAME)
                .long(ARG_SESSION_COOKIE_NAME)
                .help("Name of the session cookie")
                .env("KEYGATE_SESSION_COOKIE_NAME")
                .default_value(crate::config::DEFAULT_SESSION_COOKIE_NAME),
        )
        .arg(
            Arg::new(ARG_DEV)
                .long(ARG_DEV)
                .help("Development mode: cookies are sent without the Secure attribute")
                .env("KEYGATE_DEV")
                .action(ArgAction::SetTrue),
        )
}
