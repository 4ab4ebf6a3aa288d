//! # POST /rpc end to end
//!
//! Requests go through the full middleware stack and router into a scripted
//! daemon:
//!
//! ```text
//! HTTP request → Tracing → Credential extraction → RpcGateway
//!              → Keyring → Permission engine → daemon
//! ```

#[cfg(test)]
mod tests {
    use crate::support::{config, daemon, json_body, post_rpc, start};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};
    use sg_gateway::domain::LoginTokens;
    use sg_gateway::{AuthMode, KeyEntry, LightningError, UpstreamError};
    use std::sync::Arc;
    use tower::ServiceExt;

    const GETINFO: &str = r#"{"method":"getinfo","params":[]}"#;
    const SENDPAY: &str = r#"{"method":"sendpay","params":[]}"#;

    // =========================================================================
    // Authentication and method permissions
    // =========================================================================

    #[tokio::test]
    async fn test_allowed_method_reaches_daemon() {
        let upstream = Arc::new(daemon());
        let (_service, router) = start(config(), upstream.clone()).await;

        let response = post_rpc(&router, &[("X-Access", "abc")], GETINFO).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["alias"], "test-node");
        assert_eq!(upstream.calls_to("getinfo"), vec![json!([])]);
    }

    #[tokio::test]
    async fn test_disallowed_method_never_reaches_daemon() {
        let upstream = Arc::new(daemon().on("sendpay", |_| Ok(json!({"status": "pending"}))));
        let (_service, router) = start(config(), upstream.clone()).await;

        let response = post_rpc(&router, &[("X-Access", "abc")], SENDPAY).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(upstream.calls_to("sendpay").is_empty());
    }

    #[tokio::test]
    async fn test_missing_or_unknown_credential() {
        let upstream = Arc::new(daemon());
        let (_service, router) = start(config(), upstream.clone()).await;

        let response = post_rpc(&router, &[], GETINFO).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = post_rpc(&router, &[("X-Access", "not-a-key")], GETINFO).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(upstream.calls_to("getinfo").is_empty());
    }

    #[tokio::test]
    async fn test_key_in_query_and_cookie() {
        let upstream = Arc::new(daemon());
        let (_service, router) = start(config(), upstream).await;

        let response = router_post(&router, "/rpc?access-key=abc", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = router_post(&router, "/rpc", &[("Cookie", "theme=dark; access-key=abc")]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    async fn router_post(router: &Router, uri: &str, headers: &[(&str, &str)]) -> Response {
        let mut request = Request::post(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        router
            .clone()
            .oneshot(request.body(Body::from(GETINFO)).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_has_full_access() {
        let upstream = Arc::new(daemon().on("sendpay", |_| Ok(json!({"status": "pending"}))));
        let mut config = config();
        config.auth.login = Some("user:pass".into());
        let (_service, router) = start(config, upstream.clone()).await;

        let basic = format!("Basic {}", STANDARD.encode("user:pass"));
        let response = post_rpc(&router, &[("Authorization", basic.as_str())], SENDPAY).await;
        assert_eq!(response.status(), StatusCode::OK);

        // The derived access key works on its own.
        let tokens = LoginTokens::from_login("user:pass");
        let response = post_rpc(&router, &[("X-Access", tokens.access.as_str())], SENDPAY).await;
        assert_eq!(response.status(), StatusCode::OK);

        let wrong = format!("Basic {}", STANDARD.encode("user:guess"));
        let response = post_rpc(&router, &[("Authorization", wrong.as_str())], SENDPAY).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(upstream.calls_to("sendpay").len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_auth_forwards_everything() {
        let upstream = Arc::new(daemon().on("sendpay", |_| Ok(json!({"status": "pending"}))));
        let mut config = config();
        config.auth.mode = Some(AuthMode::Disabled);
        let (_service, router) = start(config, upstream.clone()).await;

        let response = post_rpc(&router, &[], SENDPAY).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(upstream.calls_to("sendpay").len(), 1);
    }

    #[tokio::test]
    async fn test_composed_method_respects_deny_list() {
        let upstream = Arc::new(
            daemon()
                .on("connect", |_| Ok(json!({"id": "02aa"})))
                .on("fundchannel", |_| Ok(json!({"channel_id": "c1"})))
                .on("listpeers", |_| Ok(json!({"peers": []}))),
        );
        let mut config = config();
        config
            .auth
            .keys
            .insert("k".into(), KeyEntry::deny(["fundchannel", "connect"]));
        let (_service, router) = start(config, upstream.clone()).await;
        let body = r#"{"method":"connectfund","params":{"peeruri":"02aa@h:9735","satoshi":100000}}"#;

        let response = post_rpc(&router, &[("X-Access", "k")], body).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(upstream.calls_to("connect").is_empty());
        assert!(upstream.calls_to("fundchannel").is_empty());
    }

    // =========================================================================
    // Request validation and daemon errors
    // =========================================================================

    #[tokio::test]
    async fn test_malformed_body() {
        let upstream = Arc::new(daemon());
        let (_service, router) = start(config(), upstream.clone()).await;

        for body in ["{method", r#"{"params":[]}"#, r#"{"method":"getinfo","params":5}"#] {
            let response = post_rpc(&router, &[("X-Access", "abc")], body).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
        }
        assert!(upstream.calls_to("getinfo").is_empty());
    }

    #[tokio::test]
    async fn test_daemon_error_body() {
        let upstream = Arc::new(daemon().on("getinfo", |_| {
            Err(UpstreamError::application(-1, "node is shutting down"))
        }));
        let (_service, router) = start(config(), upstream).await;

        let response = post_rpc(&router, &[("X-Access", "abc")], GETINFO).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = json_body(response).await;
        assert_eq!(body["type"], "lightning");
        assert_eq!(body["fullType"], "lightning");
        let error: LightningError = serde_json::from_value(body).unwrap();
        assert_eq!(error, LightningError::new(-1, "node is shutting down"));
    }

    #[tokio::test]
    async fn test_unknown_daemon_method() {
        let mut config = config();
        config.auth.mode = Some(AuthMode::Disabled);
        let (_service, router) = start(config, Arc::new(daemon())).await;

        let response = post_rpc(&router, &[], r#"{"method":"nosuchcommand"}"#).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["code"], -32601);
    }

    // =========================================================================
    // Spend limits
    // =========================================================================

    fn paying_daemon() -> sg_gateway::adapters::ScriptedUpstream {
        daemon()
            .on("decodepay", |params| {
                match params.get(0).and_then(Value::as_str) {
                    Some("lnbc_exact") => Ok(json!({"amount_msat": "1000msat"})),
                    Some("lnbc_over") => Ok(json!({"amount_msat": "1001msat"})),
                    Some("lnbc_open") => Ok(json!({"description": "any amount"})),
                    _ => Err(UpstreamError::application(-32602, "Invalid bolt11")),
                }
            })
            .on("pay", |_| Ok(json!({"status": "complete"})))
    }

    #[tokio::test]
    async fn test_pay_limit() {
        let upstream = Arc::new(paying_daemon());
        let mut config = config();
        config
            .auth
            .keys
            .insert("shop".into(), KeyEntry::allow(["pay"]).with_pay_max(1));
        let (_service, router) = start(config, upstream.clone()).await;
        let shop = [("X-Access", "shop")];

        let response = post_rpc(&router, &shop, r#"{"method":"pay","params":["lnbc_exact"]}"#).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = post_rpc(
            &router,
            &shop,
            r#"{"method":"pay","params":{"bolt11":"lnbc_over"}}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = post_rpc(&router, &shop, r#"{"method":"pay","params":["lnbc_garbage"]}"#).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Amountless invoice: the caller's amount counts.
        let response =
            post_rpc(&router, &shop, r#"{"method":"pay","params":["lnbc_open", 1000]}"#).await;
        assert_eq!(response.status(), StatusCode::OK);
        let response =
            post_rpc(&router, &shop, r#"{"method":"pay","params":["lnbc_open"]}"#).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(upstream.calls_to("pay").len(), 2);
        assert_eq!(upstream.calls_to("decodepay").len(), 5);
    }

    #[tokio::test]
    async fn test_unlimited_pay_skips_decode() {
        let upstream = Arc::new(paying_daemon());
        let mut config = config();
        config.auth.keys.insert("wallet".into(), KeyEntry::allow(["pay"]));
        let (_service, router) = start(config, upstream.clone()).await;

        let response = post_rpc(
            &router,
            &[("X-Access", "wallet")],
            r#"{"method":"pay","params":["lnbc_over"]}"#,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(upstream.calls_to("decodepay").is_empty());
    }

    // =========================================================================
    // Response encoding and health
    // =========================================================================

    #[tokio::test]
    async fn test_large_response_is_compressed() {
        let outputs: Vec<Value> = (0..200)
            .map(|i| json!({"txid": format!("{:064x}", i), "output": i, "amount_msat": 1000 * i}))
            .collect();
        let upstream = Arc::new(daemon().on("listfunds", move |_| Ok(json!({"outputs": outputs}))));
        let mut config = config();
        config.auth.keys.insert("funds".into(), KeyEntry::allow(["listfunds"]));
        let (_service, router) = start(config, upstream).await;
        let body = r#"{"method":"listfunds"}"#;

        let response = post_rpc(
            &router,
            &[("X-Access", "funds"), ("Accept-Encoding", "gzip")],
            body,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

        let response = post_rpc(&router, &[("X-Access", "funds")], body).await;
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(json_body(response).await["outputs"].as_array().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_health_counts_outcomes() {
        let upstream = Arc::new(daemon());
        let (service, router) = start(config(), upstream).await;

        post_rpc(&router, &[("X-Access", "abc")], GETINFO).await;
        post_rpc(&router, &[("X-Access", "abc")], SENDPAY).await;
        post_rpc(&router, &[("X-Access", "abc")], "nope").await;

        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.rpc_success, 1);
        assert_eq!(snapshot.rpc_denied, 1);
        assert_eq!(snapshot.rpc_malformed, 1);

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let health = json_body(response).await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["clients"], 0);
        assert_eq!(health["metrics"]["rpc_denied"], 1);
    }
}
