//! Acting user resolution

use std::env;

/// Session variables consulted, in order
const SESSION_VARS: &[&str] = &["LOGNAME", "USER", "USERNAME"];

/// Name of the user the agent acts on behalf of.
///
/// Prefers the login session; falls back to the account of the effective uid.
pub fn current_user() -> String {
    session_user()
        .or_else(account_user)
        .unwrap_or_else(|| "unknown".to_string())
}

fn session_user() -> Option<String> {
    SESSION_VARS.iter().find_map(|key| {
        env::var(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

#[cfg(unix)]
fn account_user() -> Option<String> {
    use nix::unistd::{geteuid, User};

    User::from_uid(geteuid()).ok().flatten().map(|user| user.name)
}

#[cfg(not(unix))]
fn account_user() -> Option<String> {
    None
}
