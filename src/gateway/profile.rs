//! Permission profiles and the profile store
//!
//! A profile is a named identity that clients authenticate as by connecting
//! to the path segment equal to its password. The store is plain data plus
//! validation; endpoint bookkeeping lives in the registration table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::{ProfileError, ProfileResult};
use super::permission::PermissionEvaluator;

/// Name of the synthesized full-access profile
pub const ROOT_PROFILE: &str = "root";

/// A named, permissioned identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Unique key used for lookups and persistence
    pub name: String,

    /// Label used when echoing `say` output
    #[serde(default)]
    pub display_name: String,

    /// Whether the profile's endpoint should be registered
    #[serde(default)]
    pub enabled: bool,

    /// Credential; doubles as the endpoint path segment
    #[serde(default)]
    pub password: String,

    /// Bypass the allow-list entirely
    #[serde(default)]
    pub full_access: bool,

    /// Allowed command patterns (`name` or `prefix*`)
    #[serde(default)]
    pub allowed_commands: Vec<String>,
}

impl Profile {
    /// Create a disabled, passwordless profile displayed under its own name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            enabled: false,
            password: String::new(),
            full_access: false,
            allowed_commands: Vec::new(),
        }
    }

    /// Synthesize the root profile from host-level credentials
    pub fn root(password: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            name: ROOT_PROFILE.to_string(),
            display_name: display_name.into(),
            enabled: true,
            password: password.into(),
            full_access: true,
            allowed_commands: Vec::new(),
        }
    }

    /// Credential used as the endpoint path segment
    pub fn credential(&self) -> &str {
        &self.password
    }

    /// Whether a non-empty credential is set
    pub fn has_credential(&self) -> bool {
        !self.password.is_empty()
    }

    /// Whether this is the synthesized root profile
    pub fn is_root(&self) -> bool {
        self.name == ROOT_PROFILE
    }

    /// Short fingerprint of the credential, safe to log
    pub fn fingerprint(&self) -> String {
        credential_fingerprint(&self.password)
    }
}

/// Short blake3 fingerprint of a credential for log output
pub fn credential_fingerprint(credential: &str) -> String {
    let hash = blake3::hash(credential.as_bytes());
    hash.to_hex().as_str()[..8].to_string()
}

/// Check that a credential can serve as a single URL path segment
pub fn validate_credential(credential: &str) -> ProfileResult<()> {
    if let Some(bad) = credential
        .chars()
        .find(|c| matches!(c, '/' | '?' | '#' | '%') || c.is_whitespace() || c.is_control())
    {
        return Err(ProfileError::InvalidCredential(format!(
            "'{}' is not allowed in a password",
            bad.escape_default()
        )));
    }
    Ok(())
}

fn validate_name(name: &str) -> ProfileResult<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ProfileError::InvalidName(name.to_string()));
    }
    if name == ROOT_PROFILE {
        return Err(ProfileError::Reserved(name.to_string()));
    }
    Ok(())
}

/// Named profiles, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoreFile", into = "StoreFile")]
pub struct ProfileStore {
    profiles: BTreeMap<String, Profile>,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    profiles: Vec<Profile>,
}

impl TryFrom<StoreFile> for ProfileStore {
    type Error = ProfileError;

    fn try_from(file: StoreFile) -> ProfileResult<Self> {
        ProfileStore::from_profiles(file.profiles)
    }
}

impl From<ProfileStore> for StoreFile {
    fn from(store: ProfileStore) -> Self {
        StoreFile {
            profiles: store.profiles.into_values().collect(),
        }
    }
}

impl ProfileStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a list of profiles, rejecting duplicates
    pub fn from_profiles(profiles: impl IntoIterator<Item = Profile>) -> ProfileResult<Self> {
        let mut store = Self::new();
        for profile in profiles {
            store.insert(profile)?;
        }
        Ok(store)
    }

    /// Number of profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Look up a profile by name
    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub(crate) fn require(&self, name: &str) -> ProfileResult<&Profile> {
        self.profiles
            .get(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    fn require_mut(&mut self, name: &str) -> ProfileResult<&mut Profile> {
        self.profiles
            .get_mut(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    /// Whether a profile with that name exists
    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    /// Iterate profiles in name order
    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    /// Iterate profiles whose `enabled` flag is set
    pub fn enabled(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values().filter(|profile| profile.enabled)
    }

    /// Profile owning a non-empty credential, if any
    pub fn credential_owner(&self, credential: &str) -> Option<&Profile> {
        if credential.is_empty() {
            return None;
        }
        self.profiles
            .values()
            .find(|profile| profile.password == credential)
    }

    /// Insert a fully-formed profile
    pub fn insert(&mut self, profile: Profile) -> ProfileResult<()> {
        validate_name(&profile.name)?;
        validate_credential(&profile.password)?;
        if self.profiles.contains_key(&profile.name) {
            return Err(ProfileError::AlreadyExists(profile.name));
        }
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Create a disabled, passwordless profile
    pub fn create(&mut self, name: &str) -> ProfileResult<&Profile> {
        self.insert(Profile::new(name))?;
        self.require(name)
    }

    /// Remove a profile, returning it
    pub fn remove(&mut self, name: &str) -> ProfileResult<Profile> {
        self.profiles
            .remove(name)
            .ok_or_else(|| ProfileError::NotFound(name.to_string()))
    }

    /// Set the `enabled` flag, failing when it already has that value
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> ProfileResult<&Profile> {
        let profile = self.require_mut(name)?;
        match (profile.enabled, enabled) {
            (true, true) => return Err(ProfileError::AlreadyEnabled(name.to_string())),
            (false, false) => return Err(ProfileError::AlreadyDisabled(name.to_string())),
            _ => {}
        }
        profile.enabled = enabled;
        Ok(profile)
    }

    /// Replace a profile's password, returning the previous profile state
    ///
    /// The password must not collide with another profile's credential or
    /// with `reserved` (the root credential).
    pub fn set_password(
        &mut self,
        name: &str,
        password: &str,
        reserved: &str,
    ) -> ProfileResult<Profile> {
        validate_credential(password)?;
        self.require(name)?;

        if !password.is_empty() && password == reserved {
            return Err(ProfileError::CredentialInUse {
                profile: name.to_string(),
                owner: ROOT_PROFILE.to_string(),
            });
        }
        if let Some(owner) = self.credential_owner(password) {
            if owner.name != name {
                return Err(ProfileError::CredentialInUse {
                    profile: name.to_string(),
                    owner: owner.name.clone(),
                });
            }
        }

        let profile = self.require_mut(name)?;
        let previous = profile.clone();
        profile.password = password.to_string();
        Ok(previous)
    }

    /// Replace a profile's display name
    pub fn set_display_name(&mut self, name: &str, display_name: &str) -> ProfileResult<&Profile> {
        let profile = self.require_mut(name)?;
        profile.display_name = display_name.to_string();
        Ok(profile)
    }

    /// Add a command pattern unless an existing pattern already covers it
    pub fn allow(&mut self, name: &str, pattern: &str) -> ProfileResult<&Profile> {
        let profile = self.require_mut(name)?;
        if let Some(existing) =
            PermissionEvaluator::new().covering_pattern(&profile.allowed_commands, pattern)
        {
            return Err(ProfileError::PatternCovered {
                profile: name.to_string(),
                pattern: pattern.to_string(),
                existing: existing.to_string(),
            });
        }
        profile.allowed_commands.push(pattern.to_string());
        Ok(profile)
    }

    /// Remove a command pattern from the allow-list
    pub fn disallow(&mut self, name: &str, pattern: &str) -> ProfileResult<&Profile> {
        let profile = self.require_mut(name)?;
        let before = profile.allowed_commands.len();
        profile.allowed_commands.retain(|existing| existing != pattern);
        if profile.allowed_commands.len() == before {
            return Err(ProfileError::PatternMissing {
                profile: name.to_string(),
                pattern: pattern.to_string(),
            });
        }
        Ok(profile)
    }

    pub(crate) fn restore(&mut self, profile: Profile) {
        self.profiles.insert(profile.name.clone(), profile);
    }
}
