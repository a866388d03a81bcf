//! Hooks run before a flow starts and after it completes.

pub mod executor;

use std::{fmt, str::FromStr};

use crate::flow::FlowKind;

pub use executor::{
    post_login, post_recovery, post_registration, post_settings, run_pre_hooks, FlowCompletion,
    HookOutcome,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    /// Issue a session cookie (browser) or token (API).
    Session,
    /// Email verification links for unverified addresses.
    Verify,
    /// Revoke every other session of the identity.
    RevokeActiveSessions,
    /// Redirect to a URL from the return allow list.
    Redirect(String),
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::Verify => f.write_str("verify"),
            Self::RevokeActiveSessions => f.write_str("revoke_active_sessions"),
            Self::Redirect(url) => write!(f, "redirect={url}"),
        }
    }
}

impl FromStr for Hook {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "session" => Ok(Self::Session),
            "verify" => Ok(Self::Verify),
            "revoke_active_sessions" => Ok(Self::RevokeActiveSessions),
            other => match other.strip_prefix("redirect=") {
                Some(url) if !url.trim().is_empty() => Ok(Self::Redirect(url.trim().to_string())),
                _ => Err(format!("unknown hook {other}")),
            },
        }
    }
}

impl Hook {
    /// Parse a comma separated list such as `session,verify`.
    ///
    /// # Errors
    /// Returns the first unknown hook.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::parse)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookChain {
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HooksConfig {
    login: HookChain,
    registration: HookChain,
    settings: HookChain,
    recovery: HookChain,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            login: HookChain {
                before: Vec::new(),
                after: vec![Hook::Session],
            },
            registration: HookChain {
                before: Vec::new(),
                after: vec![Hook::Session],
            },
            settings: HookChain::default(),
            recovery: HookChain {
                before: Vec::new(),
                after: vec![Hook::RevokeActiveSessions],
            },
        }
    }
}

impl HooksConfig {
    #[must_use]
    pub fn chain(&self, kind: FlowKind) -> &HookChain {
        match kind {
            FlowKind::Login => &self.login,
            FlowKind::Registration => &self.registration,
            FlowKind::Settings => &self.settings,
            FlowKind::Recovery => &self.recovery,
        }
    }

    fn chain_mut(&mut self, kind: FlowKind) -> &mut HookChain {
        match kind {
            FlowKind::Login => &mut self.login,
            FlowKind::Registration => &mut self.registration,
            FlowKind::Settings => &mut self.settings,
            FlowKind::Recovery => &mut self.recovery,
        }
    }

    #[must_use]
    pub fn with_before(mut self, kind: FlowKind, hooks: Vec<Hook>) -> Self {
        self.chain_mut(kind).before = hooks;
        self
    }

    #[must_use]
    pub fn with_after(mut self, kind: FlowKind, hooks: Vec<Hook>) -> Self {
        self.chain_mut(kind).after = hooks;
        self
    }
}
