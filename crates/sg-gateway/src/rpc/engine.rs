//! Permission engine.
//!
//! Static method checks come from the [`PermissionSet`]. The spend limit on
//! `pay` needs the invoice amount, which only the daemon can decode, so
//! authorization is async.

use crate::domain::payment::{extract_pay, invoice_amount_msat, msat_to_sat_ceil};
use crate::domain::permissions::{Denial, PermissionSet};
use crate::ports::UpstreamClient;
use crate::rpc::call_bounded;
use crate::rpc::extensions::Extensions;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Method used to read an invoice's amount.
pub const DECODE_METHOD: &str = "decodepay";

pub struct PermissionEngine {
    upstream: Arc<dyn UpstreamClient>,
    decode_timeout: Duration,
}

impl PermissionEngine {
    pub fn new(upstream: Arc<dyn UpstreamClient>, decode_timeout: Duration) -> Self {
        Self {
            upstream,
            decode_timeout,
        }
    }

    /// Decide whether `method` may be called with `params`.
    ///
    /// A composed method also needs every daemon method it calls.
    /// Performs at most one `decodepay` call, and only for a limited `pay`.
    pub async fn authorize(
        &self,
        permissions: &PermissionSet,
        method: &str,
        params: &Value,
    ) -> Result<(), Denial> {
        permissions.check_method(method)?;
        for inner in Extensions::composed(method) {
            permissions.check_method(inner)?;
        }

        if let Some(limit_sat) = permissions.limits_payment(method) {
            let amount_msat = self.resolve_amount_msat(params).await?;
            if amount_msat > limit_sat.saturating_mul(1000) {
                return Err(Denial::SpendLimitExceeded {
                    amount_sat: msat_to_sat_ceil(amount_msat),
                    limit_sat,
                });
            }
        }
        Ok(())
    }

    /// Invoice amount if it carries one, else the caller's amount.
    async fn resolve_amount_msat(&self, params: &Value) -> Result<u64, Denial> {
        let request = extract_pay(params).map_err(|e| {
            debug!(error = %e, "Cannot read payment parameters");
            Denial::AmountUnknown
        })?;

        let decoded = call_bounded(
            self.upstream.as_ref(),
            DECODE_METHOD,
            json!([request.bolt11]),
            self.decode_timeout,
        )
        .await
        .map_err(|e| {
            warn!(error = %e, "Invoice decode failed, denying payment");
            Denial::AmountUnknown
        })?;

        invoice_amount_msat(&decoded)
            .or(request.amount_msat)
            .ok_or(Denial::AmountUnknown)
    }
}
