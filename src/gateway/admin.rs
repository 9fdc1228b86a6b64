//! Gateway and profile management commands
//!
//! These run against the profile store and the registration table under the
//! gateway lock, so the table never disagrees with the store. Every mutation
//! persists the store afterwards.

use std::fmt::Write as _;

use super::error::{GatewayError, ProfileError, Result};
use super::profile::Profile;
use super::Gateway;

const PROFILE_USAGE: &str = "profile <create|delete|enable|disable|show> <name> | profile set <password|displayname> <name> <value> | profile <add|remove> <name> <pattern> | profile list";

/// A management command handled by the gateway itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuiltinCommand {
    /// `gateway.enable`
    GatewayEnable,
    /// `gateway.disable`
    GatewayDisable,
    /// `gateway.status`
    GatewayStatus,
    /// `profile ...`
    Profile(AdminCommand),
}

impl BuiltinCommand {
    /// Recognize a builtin command
    ///
    /// `None` when `command` is not a builtin; `Some(Err)` when it is one but
    /// the arguments are malformed.
    pub fn parse(command: &str, args: &[String]) -> Option<Result<Self>> {
        let parsed = match command {
            "gateway.enable" => Ok(BuiltinCommand::GatewayEnable),
            "gateway.disable" => Ok(BuiltinCommand::GatewayDisable),
            "gateway.status" => Ok(BuiltinCommand::GatewayStatus),
            "profile" => AdminCommand::parse(args).map(BuiltinCommand::Profile),
            _ => return None,
        };
        Some(parsed)
    }
}

/// Profile management sub-protocol
///
/// `name` always refers to the profile being managed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// `profile create <name>`
    Create { name: String },
    /// `profile delete <name>`
    Delete { name: String },
    /// `profile enable <name>`
    Enable { name: String },
    /// `profile disable <name>`
    Disable { name: String },
    /// `profile set password <name> <value>`
    SetPassword { name: String, password: String },
    /// `profile set displayname <name> <value...>`
    SetDisplayName { name: String, display_name: String },
    /// `profile add <name> <pattern>`
    Allow { name: String, pattern: String },
    /// `profile remove <name> <pattern>`
    Disallow { name: String, pattern: String },
    /// `profile list`
    List,
    /// `profile show <name>`
    Show { name: String },
}

impl AdminCommand {
    /// Parse the arguments following `profile`
    pub fn parse(args: &[String]) -> Result<Self> {
        let args: Vec<String> = args.iter().map(|arg| unquote(arg)).collect();
        let words: Vec<&str> = args.iter().map(String::as_str).collect();

        let command = match words.as_slice() {
            ["list"] => AdminCommand::List,
            ["show", name] => AdminCommand::Show { name: name.to_string() },
            ["create", name] => AdminCommand::Create { name: name.to_string() },
            ["delete", name] => AdminCommand::Delete { name: name.to_string() },
            ["enable", name] => AdminCommand::Enable { name: name.to_string() },
            ["disable", name] => AdminCommand::Disable { name: name.to_string() },
            ["add", name, pattern] => AdminCommand::Allow {
                name: name.to_string(),
                pattern: pattern.to_string(),
            },
            ["remove", name, pattern] => AdminCommand::Disallow {
                name: name.to_string(),
                pattern: pattern.to_string(),
            },
            ["set", field, name, value] if field.eq_ignore_ascii_case("password") => {
                AdminCommand::SetPassword {
                    name: name.to_string(),
                    password: value.to_string(),
                }
            }
            ["set", field, name, rest @ ..]
                if field.eq_ignore_ascii_case("displayname") && !rest.is_empty() =>
            {
                AdminCommand::SetDisplayName {
                    name: name.to_string(),
                    display_name: rest.join(" "),
                }
            }
            _ => return Err(GatewayError::usage(PROFILE_USAGE)),
        };
        Ok(command)
    }
}

/// Strip one pair of surrounding double quotes, so `""` denotes an empty value
fn unquote(token: &str) -> String {
    token
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(token)
        .to_string()
}

impl Gateway {
    /// Execute a builtin command, returning its reply text
    ///
    /// `gateway.disable` blocks until the listener is closed, so call this
    /// from a blocking thread.
    pub fn run_builtin(&self, command: BuiltinCommand) -> Result<String> {
        match command {
            BuiltinCommand::GatewayEnable => {
                let addr = self.start()?;
                Ok(format!("RCON gateway listening on {}", addr))
            }
            BuiltinCommand::GatewayDisable => {
                if !self.is_listening() {
                    return Ok("RCON gateway is not running".to_string());
                }
                self.stop_blocking();
                Ok("RCON gateway stopped".to_string())
            }
            BuiltinCommand::GatewayStatus => Ok(self.status()),
            BuiltinCommand::Profile(command) => self.run_admin(command),
        }
    }

    fn run_admin(&self, command: AdminCommand) -> Result<String> {
        match command {
            AdminCommand::Create { name } => {
                self.create_profile(&name)?;
                Ok(format!("Created profile '{}'", name))
            }
            AdminCommand::Delete { name } => {
                self.delete_profile(&name)?;
                Ok(format!("Deleted profile '{}'", name))
            }
            AdminCommand::Enable { name } => {
                self.enable_profile(&name)?;
                Ok(format!("Enabled profile '{}'", name))
            }
            AdminCommand::Disable { name } => {
                self.disable_profile(&name)?;
                Ok(format!("Disabled profile '{}'", name))
            }
            AdminCommand::SetPassword { name, password } => {
                let registered = self.set_password(&name, &password)?;
                if registered || !self.profile(&name).is_some_and(|p| p.enabled) {
                    Ok(format!("Updated password of profile '{}'", name))
                } else {
                    Ok(format!(
                        "Updated password of profile '{}'; it stays offline until it has a password",
                        name
                    ))
                }
            }
            AdminCommand::SetDisplayName { name, display_name } => {
                self.set_display_name(&name, &display_name)?;
                Ok(format!("Display name of profile '{}' is now '{}'", name, display_name))
            }
            AdminCommand::Allow { name, pattern } => {
                self.allow_command(&name, &pattern)?;
                Ok(format!("Profile '{}' may now run '{}'", name, pattern))
            }
            AdminCommand::Disallow { name, pattern } => {
                self.disallow_command(&name, &pattern)?;
                Ok(format!("Profile '{}' may no longer run '{}'", name, pattern))
            }
            AdminCommand::List => Ok(self.list_profiles()),
            AdminCommand::Show { name } => self.show_profile(&name),
        }
    }

    /// Create a disabled, passwordless profile
    pub fn create_profile(&self, name: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let profile = state.store.create(name)?.clone();
            self.persist(&state.store);
            Ok(profile)
        })
    }

    /// Deregister a profile's endpoint, then remove it from the store
    pub fn delete_profile(&self, name: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let profile = state.store.require(name)?.clone();
            state.table.deregister(&profile);
            state.transforms.remove(name);
            let removed = state.store.remove(name)?;
            self.persist(&state.store);
            Ok(removed)
        })
    }

    /// Mark a profile enabled and register its endpoint
    ///
    /// The flag is rolled back when the endpoint cannot be registered, so a
    /// profile is never left enabled without a live endpoint.
    pub fn enable_profile(&self, name: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let current = state.store.require(name)?;
            if current.enabled {
                return Err(ProfileError::AlreadyEnabled(name.to_string()).into());
            }
            if !current.has_credential() {
                return Err(ProfileError::MissingPassword(name.to_string()).into());
            }

            let profile = state.store.set_enabled(name, true)?.clone();
            match state.table.register(&profile) {
                Ok(true) => {}
                Ok(false) => {
                    state.store.set_enabled(name, false)?;
                    return Err(ProfileError::MissingPassword(name.to_string()).into());
                }
                Err(err) => {
                    state.store.set_enabled(name, false)?;
                    return Err(err);
                }
            }
            self.persist(&state.store);
            Ok(profile)
        })
    }

    /// Deregister a profile's endpoint and clear its `enabled` flag
    pub fn disable_profile(&self, name: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let current = state.store.require(name)?;
            if !current.enabled {
                return Err(ProfileError::AlreadyDisabled(name.to_string()).into());
            }
            if !current.has_credential() {
                return Err(ProfileError::MissingPassword(name.to_string()).into());
            }

            state.table.deregister(current);
            let profile = state.store.set_enabled(name, false)?.clone();
            self.persist(&state.store);
            Ok(profile)
        })
    }

    /// Rotate a profile's password and move its endpoint to the new credential
    ///
    /// Returns whether an endpoint is registered under the new credential. An
    /// enabled profile given an empty password keeps its flag but is not
    /// exposed until a password is set again.
    pub fn set_password(&self, name: &str, password: &str) -> Result<bool> {
        self.with_state(|state| -> Result<bool> {
            let previous = state.store.set_password(name, password, state.root.credential())?;
            let updated = state.store.require(name)?.clone();

            if previous.enabled {
                state.table.deregister(&previous);
            }
            let registered = match state.table.register(&updated) {
                Ok(registered) => registered,
                Err(err) => {
                    state.store.restore(previous.clone());
                    if let Err(err) = state.table.register(&previous) {
                        tracing::error!(%err, profile = %name, "failed to restore rcon endpoint");
                    }
                    return Err(err);
                }
            };
            self.persist(&state.store);
            Ok(registered)
        })
    }

    /// Change the label used for a profile's `say` output
    pub fn set_display_name(&self, name: &str, display_name: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let profile = state.store.set_display_name(name, display_name)?.clone();
            state.table.refresh(&profile);
            self.persist(&state.store);
            Ok(profile)
        })
    }

    /// Add a command pattern to a profile's allow-list
    pub fn allow_command(&self, name: &str, pattern: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let profile = state.store.allow(name, pattern)?.clone();
            state.table.refresh(&profile);
            self.persist(&state.store);
            Ok(profile)
        })
    }

    /// Remove a command pattern from a profile's allow-list
    pub fn disallow_command(&self, name: &str, pattern: &str) -> Result<Profile> {
        self.with_state(|state| -> Result<Profile> {
            let profile = state.store.disallow(name, pattern)?.clone();
            state.table.refresh(&profile);
            self.persist(&state.store);
            Ok(profile)
        })
    }

    /// One line per stored profile
    pub fn list_profiles(&self) -> String {
        self.with_state(|state| {
            if state.store.is_empty() {
                return "No profiles".to_string();
            }
            let mut out = String::new();
            for profile in state.store.iter() {
                let online = state.listener.is_some()
                    && state
                        .table
                        .profile(profile.credential())
                        .is_some_and(|p| p.name == profile.name);
                let _ = writeln!(
                    out,
                    "{} ({}) enabled={} online={}",
                    profile.name, profile.display_name, profile.enabled, online
                );
            }
            out.trim_end().to_string()
        })
    }

    /// Describe one profile without revealing its password
    pub fn show_profile(&self, name: &str) -> Result<String> {
        let profile = self
            .profile(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))?;
        let commands = if profile.full_access {
            "*".to_string()
        } else if profile.allowed_commands.is_empty() {
            "(none)".to_string()
        } else {
            profile.allowed_commands.join(", ")
        };
        let password = if profile.has_credential() {
            format!("set ({})", profile.fingerprint())
        } else {
            "not set".to_string()
        };
        Ok(format!(
            "Profile '{}'\n  display name: {}\n  enabled: {}\n  password: {}\n  full access: {}\n  commands: {}",
            profile.name, profile.display_name, profile.enabled, password, profile.full_access, commands
        ))
    }

    /// Listening address and live sessions
    pub fn status(&self) -> String {
        self.with_state(|state| {
            let Some(listener) = &state.listener else {
                return "RCON gateway is not running".to_string();
            };
            let mut out = format!(
                "RCON gateway listening on {} with {} endpoint(s)",
                listener.addr,
                state.table.len()
            );
            for entry in state.table.sessions() {
                let session = &entry.session;
                let _ = write!(
                    out,
                    "\n  {} as '{}' since {}",
                    session.remote_addr(),
                    session.profile(),
                    session.connected_at().format("%Y-%m-%d %H:%M:%S UTC")
                );
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::host::Host;
    use crate::gateway::storage::MemoryPersistence;
    use crate::gateway::{GatewayConfig, ProfileStore};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn gateway() -> (Gateway, Arc<MemoryPersistence>) {
        let persistence = Arc::new(MemoryPersistence::default());
        let host = Host::new(
            |_: &str, _: &[String]| -> Option<String> { None },
            persistence.clone(),
        );
        let config = GatewayConfig {
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            password: "rootpw".to_string(),
            ..GatewayConfig::default()
        };
        (Gateway::with_store(config, host, ProfileStore::new()), persistence)
    }

    #[test]
    fn parses_profile_commands() {
        assert_eq!(
            AdminCommand::parse(&args("create Mod")).unwrap(),
            AdminCommand::Create { name: "Mod".into() }
        );
        assert_eq!(
            AdminCommand::parse(&args("set password Mod \"\"")).unwrap(),
            AdminCommand::SetPassword {
                name: "Mod".into(),
                password: String::new()
            }
        );
        assert_eq!(
            AdminCommand::parse(&args("set displayname Mod Head Moderator")).unwrap(),
            AdminCommand::SetDisplayName {
                name: "Mod".into(),
                display_name: "Head Moderator".into()
            }
        );
        assert_eq!(
            AdminCommand::parse(&args("add Mod kick*")).unwrap(),
            AdminCommand::Allow {
                name: "Mod".into(),
                pattern: "kick*".into()
            }
        );
        assert_eq!(AdminCommand::parse(&args("list")).unwrap(), AdminCommand::List);
    }

    #[test]
    fn malformed_profile_command_reports_usage() {
        let err = AdminCommand::parse(&args("set password Mod")).unwrap_err();
        assert!(err.to_string().starts_with("Usage: profile"));
        assert!(AdminCommand::parse(&[]).is_err());
    }

    #[test]
    fn builtin_detection() {
        assert!(BuiltinCommand::parse("status", &[]).is_none());
        assert_eq!(
            BuiltinCommand::parse("gateway.status", &[]).unwrap().unwrap(),
            BuiltinCommand::GatewayStatus
        );
        assert!(BuiltinCommand::parse("profile", &args("bogus")).unwrap().is_err());
    }

    #[test]
    fn enable_requires_password_and_never_leaves_flag_set() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();

        let err = gateway.enable_profile("Mod").unwrap_err();
        assert!(matches!(err, GatewayError::Profile(ProfileError::MissingPassword(_))));
        assert!(!gateway.profile("Mod").unwrap().enabled);

        gateway.set_password("Mod", "modpw").unwrap();
        gateway.enable_profile("Mod").unwrap();
        assert!(gateway.has_endpoint("modpw"));
        assert!(matches!(
            gateway.enable_profile("Mod").unwrap_err(),
            GatewayError::Profile(ProfileError::AlreadyEnabled(_))
        ));
    }

    #[test]
    fn disable_twice_reports_already_disabled() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.set_password("Mod", "modpw").unwrap();
        gateway.enable_profile("Mod").unwrap();

        gateway.disable_profile("Mod").unwrap();
        assert!(!gateway.has_endpoint("modpw"));

        let before = gateway.registered_profiles();
        let err = gateway.disable_profile("Mod").unwrap_err();
        assert_eq!(err.to_string(), "Profile 'Mod' is already disabled");
        assert_eq!(gateway.registered_profiles(), before);
    }

    #[test]
    fn password_rotation_moves_endpoint() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.set_password("Mod", "old").unwrap();
        gateway.enable_profile("Mod").unwrap();

        assert!(gateway.set_password("Mod", "new").unwrap());
        assert!(!gateway.has_endpoint("old"));
        assert!(gateway.has_endpoint("new"));
    }

    #[test]
    fn empty_password_takes_enabled_profile_offline() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.set_password("Mod", "modpw").unwrap();
        gateway.enable_profile("Mod").unwrap();

        assert!(!gateway.set_password("Mod", "").unwrap());
        assert!(!gateway.has_endpoint("modpw"));
        assert!(!gateway.has_endpoint(""));
        assert!(gateway.profile("Mod").unwrap().enabled);
        assert!(!gateway.register_endpoint(&gateway.profile("Mod").unwrap()).unwrap());
    }

    #[test]
    fn password_may_not_collide() {
        let (gateway, _) = gateway();
        gateway.create_profile("A").unwrap();
        gateway.create_profile("B").unwrap();
        gateway.set_password("A", "shared").unwrap();

        assert!(gateway.set_password("B", "shared").is_err());
        assert!(gateway.set_password("B", "rootpw").is_err());
        assert_eq!(gateway.profile("B").unwrap().password, "");
    }

    #[test]
    fn delete_deregisters_first() {
        let (gateway, persistence) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.set_password("Mod", "modpw").unwrap();
        gateway.enable_profile("Mod").unwrap();

        gateway.delete_profile("Mod").unwrap();
        assert!(!gateway.has_endpoint("modpw"));
        assert!(gateway.profile("Mod").is_none());
        assert!(persistence.snapshot().is_empty());
    }

    #[test]
    fn mutations_persist() {
        let (gateway, persistence) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.allow_command("Mod", "say").unwrap();
        gateway.set_display_name("Mod", "Moderator").unwrap();

        assert_eq!(persistence.save_count(), 3);
        let stored = persistence.snapshot();
        let profile = stored.get("Mod").unwrap();
        assert_eq!(profile.allowed_commands, vec!["say".to_string()]);
        assert_eq!(profile.display_name, "Moderator");
    }

    #[test]
    fn covered_pattern_is_rejected() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.allow_command("Mod", "kick*").unwrap();
        assert!(gateway.allow_command("Mod", "kickall").is_err());
        gateway.disallow_command("Mod", "kick*").unwrap();
        assert!(gateway.disallow_command("Mod", "kick*").is_err());
    }

    #[test]
    fn show_hides_password() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.set_password("Mod", "hunter2").unwrap();
        let text = gateway.show_profile("Mod").unwrap();
        assert!(text.contains("Profile 'Mod'"));
        assert!(!text.contains("hunter2"));
        assert!(gateway.show_profile("root").unwrap().contains("full access: true"));
    }

    #[tokio::test]
    async fn listing_reports_online_only_while_listening() {
        let (gateway, _) = gateway();
        gateway.create_profile("Mod").unwrap();
        gateway.set_password("Mod", "modpw").unwrap();
        gateway.enable_profile("Mod").unwrap();
        assert!(gateway.has_endpoint("modpw"));
        assert_eq!(gateway.list_profiles(), "Mod (Mod) enabled=true online=false");

        gateway.start().unwrap();
        assert_eq!(gateway.list_profiles(), "Mod (Mod) enabled=true online=true");

        gateway.stop().await;
        assert_eq!(gateway.list_profiles(), "Mod (Mod) enabled=true online=false");
    }

    #[test]
    fn status_when_stopped() {
        let (gateway, _) = gateway();
        assert_eq!(gateway.status(), "RCON gateway is not running");
    }
}
