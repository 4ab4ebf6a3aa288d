//! Domain layer: configuration, credentials, permissions and events.

pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod keyring;
pub mod payment;
pub mod permissions;

pub use config::*;
pub use credentials::{derive, LoginTokens, ACCESS_KEY_LABEL, MANIFEST_KEY_LABEL};
pub use error::GatewayError;
pub use event::{kinds, Event, Notification};
pub use keyring::{Credential, KeySummary, Keyring};
pub use permissions::{Denial, MethodPolicy, PermissionSet, Profile};
