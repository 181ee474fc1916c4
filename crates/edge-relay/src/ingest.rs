// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion listener for the local message bus.
//!
//! Receives topic/payload pairs from the broker, applies the admission
//! filter, and appends accepted messages to the durable store. The listener
//! never publishes and stays subscribed until it is cancelled.

use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::store::StoreHandle;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const EVENT_CHANNEL_CAPACITY: usize = 10;

// MessageSource abstracts where inbound messages come from.
pub enum MessageSource {
    /// Live broker connection with one wildcard subscription.
    Broker {
        client: AsyncClient,
        event_loop: EventLoop,
        topic_filter: String,
    },

    /// Mirror source for testing - replays a fixed message list.
    Mirror(VecDeque<(String, Vec<u8>)>),
}

impl MessageSource {
    pub fn broker(host: &str, port: u16, client_id: &str, topic_filter: &str) -> MessageSource {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);
        let (client, event_loop) = AsyncClient::new(options, EVENT_CHANNEL_CAPACITY);
        MessageSource::Broker {
            client,
            event_loop,
            topic_filter: topic_filter.to_string(),
        }
    }

    pub fn mirror(messages: Vec<(String, Vec<u8>)>) -> MessageSource {
        MessageSource::Mirror(messages.into())
    }

    /// Next inbound topic/payload pair. The broker source retries through
    /// connection errors and only the mirror source ever returns `None`.
    async fn next(&mut self) -> Option<(String, Vec<u8>)> {
        match self {
            MessageSource::Broker {
                client,
                event_loop,
                topic_filter,
            } => loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        debug!("Connected to broker, subscribing to {topic_filter}");
                        if let Err(e) = client.subscribe(topic_filter.as_str(), QoS::AtLeastOnce).await
                        {
                            error!("Failed to subscribe to {topic_filter}: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        return Some((publish.topic, publish.payload.to_vec()));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Lost connection to broker: {e}");
                        sleep(RECONNECT_DELAY).await;
                    }
                }
            },
            MessageSource::Mirror(messages) => messages.pop_front(),
        }
    }
}

pub struct IngestionListener {
    source: MessageSource,
    store: StoreHandle,
    max_payload_bytes: usize,
    cancel_token: CancellationToken,
}

impl IngestionListener {
    pub fn new(
        source: MessageSource,
        store: StoreHandle,
        max_payload_bytes: usize,
        cancel_token: CancellationToken,
    ) -> IngestionListener {
        IngestionListener {
            source,
            store,
            max_payload_bytes,
            cancel_token,
        }
    }

    /// Main loop; runs until cancelled or the source is exhausted.
    pub async fn run(mut self) {
        loop {
            let inbound = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("Ingestion listener cancelled");
                    break;
                }
                inbound = self.source.next() => inbound,
            };

            match inbound {
                Some((topic, payload)) => {
                    Self::ingest(self.store.clone(), self.max_payload_bytes, topic, &payload).await
                }
                None => break,
            }
        }

        debug!("Ingestion listener stopped");
    }

    // Takes the store handle and limit by value rather than `&self` so the
    // spawned `run` future stays Send: a borrow of `self` would pull in the
    // non-Sync broker EventLoop across the append await.
    async fn ingest(store: StoreHandle, max_payload_bytes: usize, topic: String, payload: &[u8]) {
        if payload.len() > max_payload_bytes {
            warn!(
                "Dropping {} byte message on {topic}, exceeds the {} byte limit",
                payload.len(),
                max_payload_bytes
            );
            return;
        }

        let message = String::from_utf8_lossy(payload).into_owned();
        let received_at = chrono::Utc::now().timestamp();
        match store.append(topic, message, received_at).await {
            Ok(id) => debug!("Buffered message {id}"),
            // The message is lost for this one event; the listener keeps
            // consuming.
            Err(e) => error!("Failed to buffer inbound message: {e}"),
        }
    }
}
