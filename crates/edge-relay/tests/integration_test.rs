// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use edge_relay::collector::{CollectorApi, HubInfo};
use edge_relay::config::CollectorConfig;
use edge_relay::flusher::{FlushOutcome, Flusher};
use edge_relay::ingest::{IngestionListener, MessageSource};
use edge_relay::store::{StoreHandle, StoreService};
use mockito::{Matcher, Server};
use tokio_util::sync::CancellationToken;

const MAX_PAYLOAD_BYTES: usize = 10_240;

fn collector_config(url: String) -> CollectorConfig {
    CollectorConfig {
        url,
        account_id: "11".to_string(),
        write_token: "secret".to_string(),
        timeout: Duration::from_secs(5),
        tls: None,
    }
}

fn hub_info() -> HubInfo {
    HubInfo {
        hub_ip: "192.168.1.123".to_string(),
        hub_port: 1883,
    }
}

fn flusher(store: StoreHandle, endpoint: String) -> Flusher {
    let api = CollectorApi::new(&collector_config(endpoint))
        .expect("failed to build the collector client");
    Flusher::new(store, api, hub_info())
}

async fn spawn_store() -> StoreHandle {
    let (service, store) = StoreService::open_memory().expect("failed to open the store");
    tokio::spawn(service.run());
    store
}

#[tokio::test]
async fn flush_uploads_batch_in_insertion_order_and_clears_store() {
    let mut server = Server::new_async().await;
    let store = spawn_store().await;

    store
        .append(
            "zigbee2mqtt/sensor/1".to_string(),
            r#"{"temp":21}"#.to_string(),
            1_700_000_000,
        )
        .await
        .expect("append failed");
    store
        .append(
            "zigbee2mqtt/sensor/2".to_string(),
            r#"{"temp":22}"#.to_string(),
            1_700_000_001,
        )
        .await
        .expect("append failed");

    // The uploaded form field must carry exactly the buffered records in
    // insertion order.
    let pending = store.list_pending().await.expect("list failed");
    assert_eq!(pending[0].topic, "zigbee2mqtt/sensor/1");
    assert_eq!(pending[1].topic, "zigbee2mqtt/sensor/2");
    let expected_messages = serde_json::to_string(&pending).expect("failed to encode");

    let mock = server
        .mock("POST", "/ingest")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("account".into(), "11".into()),
            Matcher::UrlEncoded("token".into(), "secret".into()),
        ]))
        .match_header("Content-Type", "application/x-www-form-urlencoded")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("messages".into(), expected_messages),
            Matcher::UrlEncoded(
                "hubInfo".into(),
                r#"{"hubIp":"192.168.1.123","hubPort":1883}"#.into(),
            ),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let flusher = flusher(store.clone(), format!("{}/ingest", server.url()));
    assert_eq!(flusher.flush().await, FlushOutcome::Flushed(2));

    mock.assert_async().await;
    assert!(store.list_pending().await.expect("list failed").is_empty());
}

#[tokio::test]
async fn flush_of_empty_store_makes_no_network_calls() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let store = spawn_store().await;
    let flusher = flusher(store, format!("{}/ingest", server.url()));

    assert_eq!(flusher.flush().await, FlushOutcome::Empty);
    mock.assert_async().await;
}

#[tokio::test]
async fn failed_upload_retains_the_batch() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/ingest")
        .with_status(500)
        .with_body("Internal Server Error")
        .create_async()
        .await;

    let store = spawn_store().await;
    store
        .append(
            "zigbee2mqtt/sensor/1".to_string(),
            r#"{"temp":21}"#.to_string(),
            1_700_000_000,
        )
        .await
        .expect("append failed");
    let before = store.list_pending().await.expect("list failed");

    let flusher = flusher(store.clone(), format!("{}/ingest", server.url()));
    assert_eq!(flusher.flush().await, FlushOutcome::Retained(1));

    let after = store.list_pending().await.expect("list failed");
    assert_eq!(after, before);
}

#[tokio::test]
async fn unreachable_collector_retains_the_batch() {
    let store = spawn_store().await;
    store
        .append(
            "zigbee2mqtt/sensor/1".to_string(),
            r#"{"temp":21}"#.to_string(),
            1_700_000_000,
        )
        .await
        .expect("append failed");

    // Nothing is listening on this port.
    let flusher = flusher(store.clone(), "http://127.0.0.1:1/ingest".to_string());
    assert_eq!(flusher.flush().await, FlushOutcome::Retained(1));
    assert_eq!(store.list_pending().await.expect("list failed").len(), 1);
}

#[tokio::test]
async fn ingested_messages_flow_through_to_the_collector() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/ingest")
        .match_query(Matcher::Any)
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("zigbee2mqtt".to_string()),
            Matcher::Regex("temp".to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let store = spawn_store().await;

    // One oversized message that must never reach the store or the upload.
    let listener = IngestionListener::new(
        MessageSource::mirror(vec![
            (
                "zigbee2mqtt/sensor/1".to_string(),
                br#"{"temp":21}"#.to_vec(),
            ),
            ("zigbee2mqtt/sensor/2".to_string(), vec![b'x'; 10_241]),
        ]),
        store.clone(),
        MAX_PAYLOAD_BYTES,
        CancellationToken::new(),
    );
    listener.run().await;

    let pending = store.list_pending().await.expect("list failed");
    assert_eq!(pending.len(), 1);

    let flusher = flusher(store.clone(), format!("{}/ingest", server.url()));
    assert_eq!(flusher.flush().await, FlushOutcome::Flushed(1));

    mock.assert_async().await;
    assert!(store.list_pending().await.expect("list failed").is_empty());
}
