//! Credential to permission resolution.
//!
//! The keyring is built once from configuration and never mutated. It is
//! shared behind an `Arc` by every request handler.

use crate::domain::config::{AuthConfig, AuthMode, ConfigError, KeyEntry};
use crate::domain::credentials::{derive, LoginTokens, ACCESS_KEY_LABEL};
use crate::domain::permissions::{Denial, PermissionSet, Profile};
use sha2::{Digest, Sha256};
use std::fmt;
use subtle::ConstantTimeEq;

/// A credential as presented by a caller.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// An access key, used as is.
    AccessKey(String),
    /// An operator login (`user:password`), derived to its access key.
    Login(String),
}

impl Credential {
    /// The key to look up in the keyring.
    pub fn access_key(&self) -> String {
        match self {
            Credential::AccessKey(key) => key.clone(),
            Credential::Login(login) => derive(login, ACCESS_KEY_LABEL),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AccessKey(_) => f.write_str("AccessKey([REDACTED])"),
            Credential::Login(_) => f.write_str("Login([REDACTED])"),
        }
    }
}

/// Constant-time comparison to prevent timing attacks
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Short, non-reversible identifier for a key, safe to log.
pub fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    hex::encode(&digest[..4])
}

/// Loggable description of one keyring entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySummary {
    pub fingerprint: String,
    pub permissions: String,
}

#[derive(Debug)]
struct Entry {
    key: String,
    permissions: PermissionSet,
}

/// Immutable map of access keys to permission sets.
#[derive(Debug)]
pub struct Keyring {
    mode: AuthMode,
    entries: Vec<Entry>,
    login: Option<LoginTokens>,
    full_access: PermissionSet,
}

impl Keyring {
    /// Build the keyring from validated configuration.
    pub fn from_config(config: &AuthConfig) -> Result<Self, ConfigError> {
        let mode = config.mode.ok_or(ConfigError::AuthModeUnset)?;
        let login = config.login.as_deref().map(LoginTokens::from_login);

        let mut entries = Vec::with_capacity(config.keys.len() + 1);
        if let Some(tokens) = &login {
            entries.push(Entry {
                key: tokens.access.clone(),
                permissions: PermissionSet::full_access(),
            });
        }
        for (key, entry) in &config.keys {
            entries.push(Entry {
                key: key.trim().to_string(),
                permissions: permissions_for(entry)?,
            });
        }

        Ok(Self {
            mode,
            entries,
            login,
            full_access: PermissionSet::full_access(),
        })
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn login_tokens(&self) -> Option<&LoginTokens> {
        self.login.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a caller's credential to the permissions it carries.
    ///
    /// With authentication disabled every caller gets full access, whatever
    /// it presents.
    pub fn resolve(&self, credential: Option<&Credential>) -> Result<&PermissionSet, Denial> {
        if self.mode == AuthMode::Disabled {
            return Ok(&self.full_access);
        }
        let credential = credential.ok_or(Denial::MissingCredential)?;
        let key = credential.access_key();

        // Scan every entry so timing does not depend on which one matched.
        let mut found = None;
        for entry in &self.entries {
            if constant_time_compare(&entry.key, &key) && found.is_none() {
                found = Some(&entry.permissions);
            }
        }
        found.ok_or(Denial::UnknownCredential)
    }

    pub fn summaries(&self) -> Vec<KeySummary> {
        self.entries
            .iter()
            .map(|entry| KeySummary {
                fingerprint: fingerprint(&entry.key),
                permissions: entry.permissions.to_string(),
            })
            .collect()
    }
}

fn permissions_for(entry: &KeyEntry) -> Result<PermissionSet, ConfigError> {
    match &entry.profile {
        Some(name) => Profile::from_name(name)
            .map(|profile| profile.permissions())
            .ok_or_else(|| ConfigError::UnknownProfile(name.clone())),
        None => Ok(PermissionSet::from_lists(
            entry.allowed_methods.iter().cloned(),
            entry.disallowed_methods.iter().cloned(),
            entry.pay_max_satoshis,
        )),
    }
}
