//! Wallet-client methods composed from several daemon calls.
//!
//! These are authorized like any other method, under their own names.

use crate::ports::{UpstreamClient, UpstreamError};
use crate::rpc::call_bounded;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Error codes returned by the composed methods.
pub mod codes {
    pub const CALL_FAILED: i64 = 37;
    pub const PEER_NOT_FOUND: i64 = 38;
    pub const CHANNEL_NOT_FOUND: i64 = 39;
}

pub const CONNECT_FUND: &str = "connectfund";
pub const CLOSE_GET: &str = "closeget";
pub const LIST_PAYS: &str = "_listpays";
pub const LIST_INVOICES: &str = "_listinvoices";
pub const LIST_CONFIGS: &str = "_listconfigs";
pub const DECODE_CHECK: &str = "_decodecheck";

pub const METHODS: [&str; 6] = [
    CONNECT_FUND,
    CLOSE_GET,
    LIST_PAYS,
    LIST_INVOICES,
    LIST_CONFIGS,
    DECODE_CHECK,
];

/// Most recent payments returned by `_listpays`.
const LIST_PAYS_LIMIT: usize = 30;

type ExtResult = Result<Value, UpstreamError>;

pub struct Extensions {
    upstream: Arc<dyn UpstreamClient>,
    timeout: Duration,
}

impl Extensions {
    pub fn new(upstream: Arc<dyn UpstreamClient>, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    pub fn handles(method: &str) -> bool {
        METHODS.contains(&method)
    }

    /// Daemon methods a composed method calls. A key needs all of them.
    pub fn composed(method: &str) -> &'static [&'static str] {
        match method {
            CONNECT_FUND => &["connect", "fundchannel", "listpeers"],
            CLOSE_GET => &["close", "listpeers"],
            LIST_PAYS => &["listpays", "listsendpays"],
            LIST_INVOICES => &["listinvoices"],
            LIST_CONFIGS => &["listconfigs"],
            DECODE_CHECK => &["decode"],
            _ => &[],
        }
    }

    /// Run a composed method. `None` if `method` is not one of [`METHODS`].
    pub async fn dispatch(&self, method: &str, params: &Value) -> Option<ExtResult> {
        let result = match method {
            CONNECT_FUND => self.connect_fund(params).await,
            CLOSE_GET => self.close_get(params).await,
            LIST_PAYS => self.list_pays().await,
            LIST_INVOICES => self.list_invoices().await,
            LIST_CONFIGS => self
                .call("listconfigs", json!([]))
                .await
                .map_err(|_| failed("cannot listconfigs")),
            DECODE_CHECK => {
                let paystr = param_str(params, "paystr", 0).unwrap_or_default();
                self.call("decode", json!([paystr]))
                    .await
                    .map_err(|_| failed("cannot decodecheck"))
            }
            _ => return None,
        };
        Some(result)
    }

    async fn call(&self, method: &str, params: Value) -> ExtResult {
        call_bounded(self.upstream.as_ref(), method, params, self.timeout).await
    }

    async fn connect_fund(&self, params: &Value) -> ExtResult {
        let peeruri = param_str(params, "peeruri", 0).unwrap_or_default();
        let peerid = peeruri.split('@').next().unwrap_or_default().to_string();

        // Already being connected is fine; fundchannel reports real problems.
        let _ = self.call("connect", json!([peeruri])).await;

        let mut fund = Map::new();
        fund.insert("id".into(), Value::String(peerid.clone()));
        if let Some(satoshi) = param(params, "satoshi", 1) {
            fund.insert("amount".into(), satoshi.clone());
        }
        if let Some(feerate) = param(params, "feerate", 2) {
            fund.insert("feerate".into(), feerate.clone());
        }

        let funded = self
            .call("fundchannel", Value::Object(fund))
            .await
            .map_err(|_| failed("cannot open channel"))?;
        let channel_id = funded
            .get("channel_id")
            .and_then(Value::as_str)
            .unwrap_or_default();

        self.channel_with_peer(&peerid, channel_id).await
    }

    async fn close_get(&self, params: &Value) -> ExtResult {
        let peerid = param_str(params, "peerid", 0).unwrap_or_default();
        let chanid = param_str(params, "chanid", 1).unwrap_or_default();
        let force = param(params, "force", 2).cloned();
        let timeout = param(params, "timeout", 3).cloned();

        let mut close = vec![Value::String(chanid)];
        if force.is_some() || timeout.is_some() {
            close.push(force.unwrap_or(Value::Null));
        }
        if let Some(timeout) = timeout {
            close.push(timeout);
        }

        let closing = self
            .call("close", Value::Array(close))
            .await
            .map_err(|_| failed("cannot close channel"))?;
        let channel_id = closing
            .get("channel_id")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut result = self.channel_with_peer(&peerid, channel_id).await?;
        if let Value::Object(map) = &mut result {
            map.insert("closing".into(), closing);
        }
        Ok(result)
    }

    /// `{peer, chan}` for one channel; `peer` has its channel list removed.
    async fn channel_with_peer(&self, peerid: &str, channel_id: &str) -> ExtResult {
        let peers = self
            .call("listpeers", json!([peerid]))
            .await
            .map_err(|_| peer_not_found())?;
        let mut peer = peers
            .get("peers")
            .and_then(Value::as_array)
            .and_then(|peers| peers.first())
            .cloned()
            .ok_or_else(peer_not_found)?;

        let channel = peer
            .get("channels")
            .and_then(Value::as_array)
            .and_then(|channels| {
                channels
                    .iter()
                    .find(|c| c.get("channel_id").and_then(Value::as_str) == Some(channel_id))
            })
            .cloned()
            .ok_or_else(|| {
                UpstreamError::application(codes::CHANNEL_NOT_FOUND, "cannot find channel")
            })?;

        if let Value::Object(map) = &mut peer {
            map.remove("channels");
        }
        Ok(json!({ "peer": peer, "chan": channel }))
    }

    async fn list_pays(&self) -> ExtResult {
        let listed = self
            .call("listpays", json!([]))
            .await
            .map_err(|_| failed("cannot listpays -- enable the pay plugin"))?;

        let mut pays = listed
            .get("pays")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if pays.len() > LIST_PAYS_LIMIT {
            pays.drain(..pays.len() - LIST_PAYS_LIMIT);
        }

        let complete = pays
            .first()
            .map(|p| p.get("payment_hash").is_some() && p.get("created_at").is_some())
            .unwrap_or(true);
        if !complete {
            pays = join_all(pays.into_iter().map(|pay| self.fill_pay(pay))).await;
        }

        Ok(json!({ "pays": pays }))
    }

    /// Add `payment_hash` and `created_at` to a completed payment.
    async fn fill_pay(&self, mut pay: Value) -> Value {
        if pay.get("status").and_then(Value::as_str) != Some("complete") {
            return pay;
        }
        let preimage = pay
            .get("preimage")
            .and_then(Value::as_str)
            .and_then(|p| hex::decode(p).ok())
            .unwrap_or_default();
        let payment_hash = hex::encode(Sha256::digest(&preimage));

        let created_at = self
            .call("listsendpays", json!({ "payment_hash": payment_hash }))
            .await
            .ok()
            .and_then(|res| res.pointer("/payments/0/created_at").and_then(Value::as_i64))
            .unwrap_or(0);

        if let Value::Object(map) = &mut pay {
            map.insert("payment_hash".into(), Value::String(payment_hash));
            map.insert("created_at".into(), json!(created_at));
        }
        pay
    }

    async fn list_invoices(&self) -> ExtResult {
        let listed = self
            .call("listinvoices", json!([]))
            .await
            .map_err(|_| failed("cannot listinvoices"))?;

        let paid: Vec<Value> = listed
            .get("invoices")
            .and_then(Value::as_array)
            .map(|invoices| {
                invoices
                    .iter()
                    .filter(|inv| inv.get("status").and_then(Value::as_str) == Some("paid"))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(json!({ "invoices": paid }))
    }
}

fn failed(message: &str) -> UpstreamError {
    UpstreamError::application(codes::CALL_FAILED, message)
}

fn peer_not_found() -> UpstreamError {
    UpstreamError::application(codes::PEER_NOT_FOUND, "cannot find peer")
}

/// Named parameter, or the positional one at `index`.
fn param<'a>(params: &'a Value, name: &str, index: usize) -> Option<&'a Value> {
    let value = match params {
        Value::Object(map) => map.get(name),
        Value::Array(items) => items.get(index),
        _ => None,
    };
    value.filter(|v| !v.is_null())
}

fn param_str(params: &Value, name: &str, index: usize) -> Option<String> {
    param(params, name, index).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedUpstream;

    const PEER: &str = "02aa";

    fn peers_response() -> Value {
        json!({"peers": [{
            "id": PEER,
            "connected": true,
            "channels": [
                {"channel_id": "c0", "state": "CHANNELD_NORMAL"},
                {"channel_id": "c1", "state": "CHANNELD_AWAITING_LOCKIN"}
            ]
        }]})
    }

    fn extensions(upstream: ScriptedUpstream) -> (Extensions, Arc<ScriptedUpstream>) {
        let upstream = Arc::new(upstream);
        (
            Extensions::new(upstream.clone(), Duration::from_secs(1)),
            upstream,
        )
    }

    #[tokio::test]
    async fn test_unknown_method_not_dispatched() {
        let (ext, upstream) = extensions(ScriptedUpstream::new());
        assert!(ext.dispatch("getinfo", &json!([])).await.is_none());
        assert!(!Extensions::handles("getinfo"));
        assert!(Extensions::handles("_listpays"));
        assert_eq!(upstream.call_count(), 0);
    }

    #[test]
    fn test_every_method_lists_its_daemon_calls() {
        for method in METHODS {
            assert!(!Extensions::composed(method).is_empty(), "{method}");
        }
        assert!(Extensions::composed("getinfo").is_empty());
        assert!(Extensions::composed(CONNECT_FUND).contains(&"fundchannel"));
        assert!(Extensions::composed(CLOSE_GET).contains(&"close"));
    }

    #[tokio::test]
    async fn test_connectfund() {
        let (ext, upstream) = extensions(
            ScriptedUpstream::new()
                .on("connect", |_| Err(UpstreamError::application(-1, "already")))
                .on("fundchannel", |_| Ok(json!({"channel_id": "c1", "txid": "ff"})))
                .on("listpeers", |_| Ok(peers_response())),
        );

        let result = ext
            .dispatch(
                CONNECT_FUND,
                &json!({"peeruri": "02aa@127.0.0.1:9735", "satoshi": 100000}),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["chan"]["channel_id"], "c1");
        assert_eq!(result["peer"]["id"], PEER);
        assert!(result["peer"].get("channels").is_none());
        assert_eq!(
            upstream.calls_to("fundchannel"),
            vec![json!({"id": PEER, "amount": 100000})]
        );
    }

    #[tokio::test]
    async fn test_connectfund_errors() {
        let (ext, _) = extensions(
            ScriptedUpstream::new()
                .on("fundchannel", |_| Err(UpstreamError::application(-1, "no funds"))),
        );
        let err = ext
            .dispatch(CONNECT_FUND, &json!(["02aa@host", 1]))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, UpstreamError::application(37, "cannot open channel"));

        let (ext, _) = extensions(
            ScriptedUpstream::new()
                .on("fundchannel", |_| Ok(json!({"channel_id": "zz"})))
                .on("listpeers", |_| Ok(peers_response())),
        );
        let err = ext
            .dispatch(CONNECT_FUND, &json!(["02aa@host", 1]))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, UpstreamError::application(39, "cannot find channel"));

        let (ext, _) = extensions(
            ScriptedUpstream::new()
                .on("fundchannel", |_| Ok(json!({"channel_id": "c0"})))
                .on("listpeers", |_| Ok(json!({"peers": []}))),
        );
        let err = ext
            .dispatch(CONNECT_FUND, &json!(["02aa@host", 1]))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, UpstreamError::application(38, "cannot find peer"));
    }

    #[tokio::test]
    async fn test_closeget() {
        let (ext, upstream) = extensions(
            ScriptedUpstream::new()
                .on("close", |_| Ok(json!({"channel_id": "c0", "type": "mutual"})))
                .on("listpeers", |_| Ok(peers_response())),
        );
        let result = ext
            .dispatch(CLOSE_GET, &json!({"peerid": PEER, "chanid": "c0", "timeout": 60}))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result["closing"]["type"], "mutual");
        assert_eq!(result["chan"]["channel_id"], "c0");
        assert_eq!(upstream.calls_to("close"), vec![json!(["c0", null, 60])]);
    }

    #[tokio::test]
    async fn test_listpays_fills_missing_fields() {
        let preimage = "00".repeat(32);
        let expected_hash = hex::encode(Sha256::digest([0u8; 32]));
        let pre = preimage.clone();
        let (ext, upstream) = extensions(
            ScriptedUpstream::new()
                .on("listpays", move |_| {
                    Ok(json!({"pays": [
                        {"bolt11": "lnbc1", "status": "complete", "preimage": pre},
                        {"bolt11": "lnbc2", "status": "failed"}
                    ]}))
                })
                .on("listsendpays", |_| {
                    Ok(json!({"payments": [{"created_at": 1_600_000_000}]}))
                }),
        );

        let result = ext.dispatch(LIST_PAYS, &json!([])).await.unwrap().unwrap();
        let pays = result["pays"].as_array().unwrap();
        assert_eq!(pays.len(), 2);
        assert_eq!(pays[0]["payment_hash"], expected_hash.as_str());
        assert_eq!(pays[0]["created_at"], 1_600_000_000);
        assert!(pays[1].get("payment_hash").is_none());
        assert_eq!(
            upstream.calls_to("listsendpays"),
            vec![json!({"payment_hash": expected_hash})]
        );
    }

    #[tokio::test]
    async fn test_listpays_keeps_last_thirty() {
        let (ext, upstream) = extensions(ScriptedUpstream::new().on("listpays", |_| {
            let pays: Vec<Value> = (0..45)
                .map(|i| json!({"n": i, "payment_hash": "h", "created_at": i}))
                .collect();
            Ok(json!({ "pays": pays }))
        }));

        let result = ext.dispatch(LIST_PAYS, &json!([])).await.unwrap().unwrap();
        let pays = result["pays"].as_array().unwrap();
        assert_eq!(pays.len(), 30);
        assert_eq!(pays[0]["n"], 15);
        assert!(upstream.calls_to("listsendpays").is_empty());
    }

    #[tokio::test]
    async fn test_listpays_without_plugin() {
        let (ext, _) = extensions(ScriptedUpstream::new());
        let err = ext.dispatch(LIST_PAYS, &json!([])).await.unwrap().unwrap_err();
        assert!(matches!(err, UpstreamError::Application { code: 37, .. }));
    }

    #[tokio::test]
    async fn test_listinvoices_only_paid() {
        let (ext, _) = extensions(ScriptedUpstream::new().on("listinvoices", |_| {
            Ok(json!({"invoices": [
                {"label": "a", "status": "paid"},
                {"label": "b", "status": "unpaid"},
                {"label": "c", "status": "expired"}
            ]}))
        }));
        let result = ext
            .dispatch(LIST_INVOICES, &json!([]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, json!({"invoices": [{"label": "a", "status": "paid"}]}));
    }

    #[tokio::test]
    async fn test_passthroughs() {
        let (ext, upstream) = extensions(
            ScriptedUpstream::new()
                .on("listconfigs", |_| Ok(json!({"alias": "node"})))
                .on("decode", |p| Ok(json!({"valid": true, "echo": p[0]}))),
        );
        let configs = ext.dispatch(LIST_CONFIGS, &json!([])).await.unwrap().unwrap();
        assert_eq!(configs["alias"], "node");

        let decoded = ext
            .dispatch(DECODE_CHECK, &json!({"paystr": "lno1"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(decoded["echo"], "lno1");
        assert_eq!(upstream.call_count(), 2);
    }
}
