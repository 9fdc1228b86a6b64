//! Command permission evaluation
//!
//! A profile either has full access or an allow-list of command patterns. A
//! pattern ending in `*` grants every command starting with the text before
//! the `*`; any other pattern must equal the command exactly. Only a single
//! trailing wildcard is recognised.

use super::profile::Profile;

/// Decides whether a profile may run a command
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionEvaluator;

impl PermissionEvaluator {
    /// Create an evaluator
    pub fn new() -> Self {
        Self
    }

    /// Check whether `profile` may run `command`
    pub fn allows(&self, profile: &Profile, command: &str) -> bool {
        profile.full_access || self.covering_pattern(&profile.allowed_commands, command).is_some()
    }

    /// Find a pattern in `patterns` that grants `command`
    pub fn covering_pattern<'a>(&self, patterns: &'a [String], command: &str) -> Option<&'a str> {
        patterns
            .iter()
            .map(String::as_str)
            .find(|pattern| pattern_matches(pattern, command))
    }
}

/// Match a single allow-list pattern against a command name
pub fn pattern_matches(pattern: &str, command: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => command.starts_with(prefix),
        None => pattern == command,
    }
}
