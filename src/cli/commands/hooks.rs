use clap::{builder::ValueParser, Arg, Command};

use crate::{flow::FlowKind, hook::Hook};

pub const ARG_OIDC_PROVIDERS: &str = "oidc-providers";

pub struct HookArg {
    pub kind: FlowKind,
    pub id: &'static str,
    pub env: &'static str,
    pub after: bool,
}

const fn hook(kind: FlowKind, id: &'static str, env: &'static str, after: bool) -> HookArg {
    HookArg {
        kind,
        id,
        env,
        after,
    }
}

pub const HOOK_ARGS: [HookArg; 8] = [
    hook(FlowKind::Login, "hooks-login-before", "KEYGATE_HOOKS_LOGIN_BEFORE", false),
    hook(FlowKind::Login, "hooks-login-after", "KEYGATE_HOOKS_LOGIN_AFTER", true),
    hook(
        FlowKind::Registration,
        "hooks-registration-before",
        "KEYGATE_HOOKS_REGISTRATION_BEFORE",
        false,
    ),
    hook(
        FlowKind::Registration,
        "hooks-registration-after",
        "KEYGATE_HOOKS_REGISTRATION_AFTER",
        true,
    ),
    hook(
        FlowKind::Settings,
        "hooks-settings-before",
        "KEYGATE_HOOKS_SETTINGS_BEFORE",
        false,
    ),
    hook(
        FlowKind::Settings,
        "hooks-settings-after",
        "KEYGATE_HOOKS_SETTINGS_AFTER",
        true,
    ),
    hook(
        FlowKind::Recovery,
        "hooks-recovery-before",
        "KEYGATE_HOOKS_RECOVERY_BEFORE",
        false,
    ),
    hook(
        FlowKind::Recovery,
        "hooks-recovery-after",
        "KEYGATE_HOOKS_RECOVERY_AFTER",
        true,
    ),
];

#[must_use]
pub fn validator_hooks() -> ValueParser {
    ValueParser::from(move |raw: &str| -> std::result::Result<Vec<Hook>, String> {
        Hook::parse_list(raw)
    })
}

/// Hook chains per flow kind and the OIDC provider list.
#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = HOOK_ARGS.iter().fold(command, |command, arg| {
        let help = if arg.after {
            format!(
                "Hooks run after a {} flow completes: session, verify, revoke_active_sessions, redirect=<url>",
                arg.kind
            )
        } else {
            format!("Hooks run before a {} flow starts (comma separated)", arg.kind)
        };
        command.arg(
            Arg::new(arg.id)
                .long(arg.id)
                .help(help)
                .env(arg.env)
                .value_parser(validator_hooks()),
        )
    });

    command.arg(
        Arg::new(ARG_OIDC_PROVIDERS)
            .long(ARG_OIDC_PROVIDERS)
            .help("JSON array of OIDC provider configurations, or @path to a file holding one")
            .env("KEYGATE_OIDC_PROVIDERS"),
    )
}
