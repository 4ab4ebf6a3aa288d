//! Method-level permission policies.
//!
//! A key is bound to exactly one [`MethodPolicy`]. When a key declares both an
//! allow-list and a deny-list the allow-list wins and the deny-list is dropped
//! at load time, so the policy value never carries both.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The daemon method that initiates a payment from an invoice.
pub const PAY_METHOD: &str = "pay";

/// Lower-level payment method that bypasses invoice amount checks.
pub const SENDPAY_METHOD: &str = "sendpay";

/// Which methods a key may call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodPolicy {
    /// Every method is allowed.
    FullAccess,
    /// Only the listed methods are allowed.
    AllowList(BTreeSet<String>),
    /// Every method except the listed ones is allowed.
    DenyList(BTreeSet<String>),
}

impl MethodPolicy {
    pub fn permits(&self, method: &str) -> bool {
        match self {
            MethodPolicy::FullAccess => true,
            MethodPolicy::AllowList(allowed) => allowed.contains(method),
            MethodPolicy::DenyList(denied) => !denied.contains(method),
        }
    }
}

/// Authorization policy bound to a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSet {
    pub policy: MethodPolicy,
    /// Ceiling for [`PAY_METHOD`] calls, in satoshis.
    pub pay_max_satoshis: Option<u64>,
}

impl PermissionSet {
    pub fn full_access() -> Self {
        Self {
            policy: MethodPolicy::FullAccess,
            pay_max_satoshis: None,
        }
    }

    /// Build a set from raw lists as they appear in configuration.
    ///
    /// A spend limit on a non-allow-list key also denies [`SENDPAY_METHOD`],
    /// which would otherwise pay without going through the limit.
    pub fn from_lists<A, D>(allowed: A, disallowed: D, pay_max_satoshis: Option<u64>) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let allowed: BTreeSet<String> = allowed.into_iter().map(Into::into).collect();
        let mut disallowed: BTreeSet<String> = disallowed.into_iter().map(Into::into).collect();

        let policy = if !allowed.is_empty() {
            MethodPolicy::AllowList(allowed)
        } else {
            if pay_max_satoshis.is_some() {
                disallowed.insert(SENDPAY_METHOD.to_string());
            }
            if disallowed.is_empty() {
                MethodPolicy::FullAccess
            } else {
                MethodPolicy::DenyList(disallowed)
            }
        };

        Self {
            policy,
            pay_max_satoshis,
        }
    }

    /// Static method check. Argument-dependent limits are applied by the
    /// permission engine on top of this.
    pub fn check_method(&self, method: &str) -> Result<(), Denial> {
        if self.policy.permits(method) {
            Ok(())
        } else {
            Err(Denial::MethodNotPermitted(method.to_string()))
        }
    }

    /// Whether calls to `method` need the spend limit check.
    pub fn limits_payment(&self, method: &str) -> Option<u64> {
        if method == PAY_METHOD {
            self.pay_max_satoshis
        } else {
            None
        }
    }

    pub fn is_full_access(&self) -> bool {
        self.policy == MethodPolicy::FullAccess && self.pay_max_satoshis.is_none()
    }
}

impl fmt::Display for PermissionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.policy {
            MethodPolicy::FullAccess => write!(f, "full-access")?,
            MethodPolicy::AllowList(methods) => write!(f, "allowed={{{}}}", join(methods))?,
            MethodPolicy::DenyList(methods) => write!(f, "disallowed={{{}}}", join(methods))?,
        }
        if let Some(max) = self.pay_max_satoshis {
            write!(f, " pay-max={}", max)?;
        }
        Ok(())
    }
}

fn join(methods: &BTreeSet<String>) -> String {
    methods.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Predefined permission sets a key can reference by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    ReadOnly,
    Invoices,
    MicroPayer,
}

impl Profile {
    pub const ALL: [Profile; 3] = [Profile::ReadOnly, Profile::Invoices, Profile::MicroPayer];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "readonly" => Some(Profile::ReadOnly),
            "invoices" => Some(Profile::Invoices),
            "micropayer" => Some(Profile::MicroPayer),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Profile::ReadOnly => "readonly",
            Profile::Invoices => "invoices",
            Profile::MicroPayer => "micropayer",
        }
    }

    pub fn permissions(&self) -> PermissionSet {
        match self {
            Profile::ReadOnly => PermissionSet::from_lists(
                [
                    "getinfo",
                    "listforwards",
                    "listfunds",
                    "listpayments",
                    "listinvoices",
                    "listnodes",
                    "listpeers",
                    "listchannels",
                    "getroute",
                    "feerates",
                    "waitinvoice",
                    "waitanyinvoice",
                    "decodepay",
                    "paystatus",
                    "waitsendpay",
                ],
                Vec::<String>::new(),
                None,
            ),
            Profile::Invoices => {
                PermissionSet::from_lists(["invoice", "waitinvoice"], Vec::<String>::new(), None)
            }
            Profile::MicroPayer => PermissionSet::from_lists(
                ["decodepay", "pay", "paystatus", "listpayments", "waitsendpay"],
                Vec::<String>::new(),
                Some(100_000),
            ),
        }
    }
}

/// Why a request was refused. Never carries the credential itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Denial {
    #[error("no credential supplied")]
    MissingCredential,
    #[error("credential not recognized")]
    UnknownCredential,
    #[error("method '{0}' not permitted for this key")]
    MethodNotPermitted(String),
    #[error("payment of {amount_sat} sat exceeds limit of {limit_sat} sat")]
    SpendLimitExceeded { amount_sat: u64, limit_sat: u64 },
    #[error("payment amount could not be determined")]
    AmountUnknown,
}
