use clap::{Arg, ArgAction, Command};

pub const ARG_MAX_BREACHES: &str = "password-max-breaches";
pub const ARG_IGNORE_NETWORK_ERRORS: &str = "password-ignore-network-errors";
pub const ARG_BREACH_API_URL: &str = "password-breach-api-url";
pub const ARG_BREACH_TIMEOUT: &str = "password-breach-timeout";
pub const ARG_MIN_IDENTIFIER_DISTANCE: &str = "password-min-identifier-distance";
pub const ARG_MAX_IDENTIFIER_SUBSTRING: &str = "password-max-identifier-substring";
pub const ARG_ARGON2_MEMORY: &str = "argon2-memory";
pub const ARG_ARGON2_ITERATIONS: &str = "argon2-iterations";
pub const ARG_ARGON2_PARALLELISM: &str = "argon2-parallelism";

/// Password policy and Argon2 parameters.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_BREACHES)
                .long(ARG_MAX_BREACHES)
                .help("Highest breach count a password may have")
                .env("KEYGATE_PASSWORD_MAX_BREACHES")
                .default_value("0")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_IGNORE_NETWORK_ERRORS)
                .long(ARG_IGNORE_NETWORK_ERRORS)
                .help("Accept passwords when the breach API cannot be reached")
                .env("KEYGATE_PASSWORD_IGNORE_NETWORK_ERRORS")
                .default_value("true")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_BREACH_API_URL)
                .long(ARG_BREACH_API_URL)
                .help("Base URL of the k-anonymity breach range API")
                .env("KEYGATE_PASSWORD_BREACH_API_URL")
                .default_value(crate::password::breach::DEFAULT_API_URL),
        )
        .arg(
            Arg::new(ARG_BREACH_TIMEOUT)
                .long(ARG_BREACH_TIMEOUT)
                .help("Breach API timeout in seconds, clamped to 1..=5")
                .env("KEYGATE_PASSWORD_BREACH_TIMEOUT")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_MIN_IDENTIFIER_DISTANCE)
                .long(ARG_MIN_IDENTIFIER_DISTANCE)
                .help("Minimum edit distance between password and identifier")
                .env("KEYGATE_PASSWORD_MIN_IDENTIFIER_DISTANCE")
                .default_value("5")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_MAX_IDENTIFIER_SUBSTRING)
                .long(ARG_MAX_IDENTIFIER_SUBSTRING)
                .help("Longest common substring allowed between password and identifier")
                .env("KEYGATE_PASSWORD_MAX_IDENTIFIER_SUBSTRING")
                .default_value("3")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_ARGON2_MEMORY)
                .long(ARG_ARGON2_MEMORY)
                .help("Argon2id memory cost in KiB")
                .env("KEYGATE_ARGON2_MEMORY")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_ITERATIONS)
                .long(ARG_ARGON2_ITERATIONS)
                .help("Argon2id iterations")
                .env("KEYGATE_ARGON2_ITERATIONS")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_ARGON2_PARALLELISM)
                .long(ARG_ARGON2_PARALLELISM)
                .help("Argon2id lanes")
                .env("KEYGATE_ARGON2_PARALLELISM")
                .value_parser(clap::value_parser!(u32)),
        )
}
