//! Credential derivation.
//!
//! Remote callers never see the operator's login. They authenticate with an
//! access token derived from it, and the wallet UI fetches its manifest with a
//! second token derived from the access token.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Label used to derive an access token from a login.
pub const ACCESS_KEY_LABEL: &str = "access-key";

/// Label used to derive a manifest token from an access token.
pub const MANIFEST_KEY_LABEL: &str = "manifest-key";

/// Derive a URL/HTML-safe token from `secret`.
///
/// HMAC-SHA256 keyed with `secret` over `label`, base64-encoded, with every
/// non-alphanumeric character removed.
pub fn derive(secret: &str, label: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(label.as_bytes());
    let digest = mac.finalize().into_bytes();

    STANDARD
        .encode(digest)
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

/// Tokens derived from the operator login.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginTokens {
    /// Full-access key for remote callers.
    pub access: String,
    /// Key that only unlocks the client manifest.
    pub manifest: String,
}

impl LoginTokens {
    pub fn from_login(login: &str) -> Self {
        let access = derive(login, ACCESS_KEY_LABEL);
        let manifest = derive(&access, MANIFEST_KEY_LABEL);
        Self { access, manifest }
    }
}

impl fmt::Debug for LoginTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginTokens")
            .field("access", &"[REDACTED]")
            .field("manifest", &self.manifest)
            .finish()
    }
}
