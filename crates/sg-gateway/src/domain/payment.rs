//! Amount extraction for the spend limit.
//!
//! Only enough of the payment call is understood to find the invoice and the
//! amount. Everything else is left for the daemon to validate.

use serde_json::Value;

/// Invoice and caller-supplied amount of a `pay` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayRequest {
    pub bolt11: String,
    pub amount_msat: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentError {
    #[error("missing invoice")]
    MissingInvoice,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Read a `pay` call's parameters, positional `[bolt11, msatoshi, ...]` or
/// named `{bolt11, msatoshi | amount_msat, ...}`.
pub fn extract_pay(params: &Value) -> Result<PayRequest, PaymentError> {
    let (bolt11, amount) = match params {
        Value::Array(items) => (items.first(), items.get(1)),
        Value::Object(map) => (
            map.get("bolt11"),
            map.get("msatoshi").or_else(|| map.get("amount_msat")),
        ),
        _ => (None, None),
    };

    let bolt11 = bolt11
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(PaymentError::MissingInvoice)?;

    let amount_msat = match amount {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            parse_msat(value).ok_or_else(|| PaymentError::InvalidAmount(value.to_string()))?,
        ),
    };

    Ok(PayRequest {
        bolt11: bolt11.to_string(),
        amount_msat,
    })
}

/// Amount carried by a decoded invoice, in millisatoshis.
pub fn invoice_amount_msat(decoded: &Value) -> Option<u64> {
    decoded
        .get("amount_msat")
        .or_else(|| decoded.get("msatoshi"))
        .and_then(parse_msat)
}

/// Parse an amount as the daemon writes it: a number of millisatoshis, or a
/// string such as `"1500"`, `"1500msat"` or `"2sat"`.
pub fn parse_msat(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(msat) = s.strip_suffix("msat") {
                msat.parse().ok()
            } else if let Some(sat) = s.strip_suffix("sat") {
                sat.parse::<u64>().ok()?.checked_mul(1000)
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

/// Millisatoshis rounded up to whole satoshis.
pub fn msat_to_sat_ceil(msat: u64) -> u64 {
    msat / 1000 + u64::from(msat % 1000 != 0)
}
