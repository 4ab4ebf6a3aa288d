//! # GET /stream end to end
//!
//! ```text
//! waitanyinvoice ─┐
//! price source ───┼─► Broker ─► per-client queue ─► SSE response
//! notifications ──┘
//! ```
//!
//! Every client sees the same events in sequence order. Late clients get the
//! cached state kinds; reconnecting clients resume after `Last-Event-ID`.

#[cfg(test)]
mod tests {
    use crate::support::{config, daemon, eventually, open_stream, start, SseReader};
    use axum::http::StatusCode;
    use serde_json::json;
    use sg_gateway::adapters::{notification_channel, ScriptedRates};
    use sg_gateway::{kinds, GatewayService, Notification, RateSource};
    use std::sync::Arc;
    use std::time::Duration;

    const ABC: [(&str, &str); 1] = [("X-Access", "abc")];

    async fn connect(router: &axum::Router, headers: &[(&str, &str)]) -> SseReader {
        let response = open_stream(router, headers).await;
        assert_eq!(response.status(), StatusCode::OK);
        let mut reader = SseReader::new(response);
        let first = reader.next_frame().await;
        assert!(first.retry.is_some(), "first frame sets the retry delay");
        reader
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    #[tokio::test]
    async fn test_paid_invoices_reach_every_client_in_order() {
        let upstream = Arc::new(daemon());
        let (service, router) = start(config(), upstream.clone()).await;

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(connect(&router, &ABC).await);
        }
        assert_eq!(service.broker().unwrap().client_count(), 3);

        for pay_index in 1..=3u64 {
            upstream.push_long_poll(Ok(json!({
                "label": format!("order-{pay_index}"),
                "status": "paid",
                "pay_index": pay_index,
            })));
        }

        for client in &mut clients {
            let mut last_id = 0u64;
            for pay_index in 1..=3u64 {
                let frame = client.next_event().await;
                assert_eq!(frame.event.as_deref(), Some(kinds::INVOICE_PAID));
                let id: u64 = frame.id.unwrap().parse().unwrap();
                assert!(id > last_id);
                last_id = id;
                let invoice: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
                assert_eq!(invoice["pay_index"], pay_index);
            }
        }

        // The poller asks for invoices after the last one it saw.
        eventually(|| {
            upstream
                .calls_to("waitanyinvoice")
                .last()
                .is_some_and(|params| params == &json!([3]))
        })
        .await;
    }

    #[tokio::test]
    async fn test_disconnect_releases_client() {
        let (service, router) = start(config(), Arc::new(daemon())).await;
        let broker = service.broker().unwrap();

        let first = connect(&router, &ABC).await;
        let mut second = connect(&router, &ABC).await;
        assert_eq!(broker.client_count(), 2);

        drop(first);
        eventually(|| broker.client_count() == 1).await;

        broker.publish("custom", json!({"n": 1})).unwrap();
        assert_eq!(second.next_event().await.event.as_deref(), Some("custom"));
    }

    #[tokio::test]
    async fn test_slow_client_is_dropped() {
        let mut config = config();
        config.stream.client_buffer = 2;
        let (service, router) = start(config, Arc::new(daemon())).await;
        let broker = service.broker().unwrap();

        // Never read from this one.
        let stalled = open_stream(&router, &ABC).await;
        let mut reader = connect(&router, &ABC).await;
        assert_eq!(broker.client_count(), 2);

        for n in 0..8 {
            broker.publish("custom", json!({"n": n})).unwrap();
            if n % 2 == 1 {
                // Keep the reading client drained.
                reader.next_event().await;
                reader.next_event().await;
            }
        }

        eventually(|| broker.client_count() == 1).await;
        assert!(service.metrics().snapshot().slow_client_disconnects >= 1);
        drop(stalled);
    }

    #[tokio::test]
    async fn test_stream_requires_credential() {
        let (service, router) = start(config(), Arc::new(daemon())).await;

        let response = open_stream(&router, &[]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = open_stream(&router, &[("X-Access", "wrong")]).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Any known key may listen, whatever its method permissions.
        let _reader = connect(&router, &ABC).await;
        assert_eq!(service.metrics().snapshot().stream_rejected, 2);
        assert_eq!(service.broker().unwrap().client_count(), 1);
    }

    // =========================================================================
    // Resume and cached state
    // =========================================================================

    #[tokio::test]
    async fn test_resume_after_last_event_id() {
        let (service, router) = start(config(), Arc::new(daemon())).await;
        let broker = service.broker().unwrap();

        for n in 1..=3 {
            broker.publish("custom", json!({"n": n})).unwrap();
        }

        let mut reader = connect(&router, &[("X-Access", "abc"), ("Last-Event-ID", "1")]).await;
        let replayed = reader.next_event().await;
        assert_eq!(replayed.id.as_deref(), Some("2"));
        assert_eq!(replayed.data, r#"{"n":2}"#);
        assert_eq!(reader.next_event().await.id.as_deref(), Some("3"));

        broker.publish("custom", json!({"n": 4})).unwrap();
        assert_eq!(reader.next_event().await.id.as_deref(), Some("4"));
    }

    #[tokio::test]
    async fn test_fresh_client_gets_no_history() {
        let (service, router) = start(config(), Arc::new(daemon())).await;
        let broker = service.broker().unwrap();
        broker.publish("custom", json!({"n": 1})).unwrap();

        let mut reader = connect(&router, &ABC).await;
        assert!(reader.is_quiet(Duration::from_millis(50)).await);

        broker.publish("custom", json!({"n": 2})).unwrap();
        assert_eq!(reader.next_event().await.id.as_deref(), Some("2"));
    }

    async fn start_with_price(rates: Arc<ScriptedRates>) -> (GatewayService, axum::Router) {
        let mut config = config();
        config.price.enabled = true;
        config.price.interval = Duration::from_millis(20);
        let rates: Arc<dyn RateSource> = rates;
        let mut service =
            GatewayService::new(config, Arc::new(daemon()), Some(rates), None).unwrap();
        let router = service.start().await.unwrap();
        (service, router)
    }

    #[tokio::test]
    async fn test_late_client_gets_cached_price() {
        let rates = Arc::new(ScriptedRates::new());
        rates.push(Ok("9500.12".into()));
        let (_service, router) = start_with_price(rates.clone()).await;

        let mut early = connect(&router, &ABC).await;
        let price = early.next_event().await;
        assert_eq!(price.event.as_deref(), Some(kinds::BTCUSD));
        assert_eq!(price.data, "\"9500.12\"");

        let mut late = connect(&router, &ABC).await;
        let cached = late.next_event().await;
        assert_eq!(cached.event.as_deref(), Some(kinds::BTCUSD));
        assert_eq!(cached.id, price.id);
        assert_eq!(cached.data, price.data);
    }

    #[tokio::test]
    async fn test_price_not_fetched_without_listeners() {
        let rates = Arc::new(ScriptedRates::new());
        let (_service, _router) = start_with_price(rates.clone()).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rates.fetch_count(), 0);
    }

    // =========================================================================
    // Daemon notifications
    // =========================================================================

    #[tokio::test]
    async fn test_subscribed_notifications_forwarded() {
        let (tx, source) = notification_channel(16);
        let mut service =
            GatewayService::new(config(), Arc::new(daemon()), None, Some(Box::new(source)))
                .unwrap();
        let router = service.start().await.unwrap();
        let mut reader = connect(&router, &ABC).await;

        tx.send(Notification {
            topic: "rpc_command".into(),
            params: json!({"rpc_command": {"method": "getinfo"}}),
        })
        .await
        .unwrap();
        tx.send(Notification {
            topic: "connect".into(),
            params: json!({"connect": {"id": "02ab", "direction": "in"}}),
        })
        .await
        .unwrap();

        let frame = reader.next_event().await;
        assert_eq!(frame.event.as_deref(), Some("connect"));
        let data: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(data["connect"]["id"], "02ab");
    }
}
