//! # Keygate (self-service identity flows)
//!
//! `keygate` drives the browser and API flows through which end users log in,
//! register, update their profile and credentials, and recover their account.
//!
//! ## Flows
//!
//! Every interaction starts with an ephemeral [`flow::Flow`] created by an init
//! endpoint. Each enabled [`strategy::Strategy`] contributes a method (an HTML
//! form plus extras) to the flow. The UI renders the flow and posts back to the
//! strategy, which either re-renders the same flow with per-field errors or
//! completes it and runs the post hooks (session issuance, verification mail,
//! redirects).
//!
//! ## Identity model
//!
//! Identity traits are free-form JSON constrained by a user supplied JSON
//! schema. The `ory.sh/kratos` schema extension marks login identifiers,
//! recovery and verification addresses, and is the source of the form fields.
//!
//! ## Account enumeration
//!
//! Login, registration and recovery answer identically for known and unknown
//! accounts; the differentiation is delivered out of band by email.

pub mod api;
pub mod cli;
pub mod config;
pub mod continuity;
pub mod cookie;
pub mod courier;
pub mod csrf;
pub mod error;
pub mod flow;
pub mod form;
pub mod hook;
pub mod identity;
pub mod password;
pub mod persistence;
pub mod registry;
pub mod schema;
pub mod selfservice;
pub mod session;
pub mod strategy;
pub mod token;

pub use error::{Error, ErrorResponse};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
pub(crate) mod test_support;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
