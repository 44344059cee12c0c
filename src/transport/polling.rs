//! HTTP long-polling transport
//!
//! Packets from the server are fetched with long-running GET requests on a
//! background task, so receiving is cancel-safe. Packets to the server are
//! POSTed directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::{Transport, TransportError, TransportKind, TransportResult};
use crate::protocol::{decode_payload, encode_payload, EnginePacket, Handshake};

const PAYLOAD_CONTENT_TYPE: &str = "text/plain;charset=UTF-8";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Engine.IO over HTTP long-polling
pub struct PollingTransport {
    client: reqwest::Client,
    url: Url,
    inbound: mpsc::UnboundedReceiver<TransportResult<EnginePacket>>,
    poller: JoinHandle<()>,
}

impl PollingTransport {
    /// Perform the handshake request and start polling
    pub async fn connect(url: &Url) -> TransportResult<(Self, Handshake)> {
        let client = reqwest::Client::builder().build()?;

        let mut packets = get_packets(&client, url).await?.into_iter();
        let handshake = match packets.next() {
            Some(EnginePacket::Open(handshake)) => handshake,
            Some(other) => {
                return Err(TransportError::Handshake(format!(
                    "expected open packet, got {:?}",
                    other
                )))
            }
            None => {
                return Err(TransportError::Handshake(
                    "empty handshake response".to_string(),
                ))
            }
        };

        let mut session_url = url.clone();
        session_url
            .query_pairs_mut()
            .append_pair("sid", &handshake.sid);

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        for packet in packets {
            let _ = inbound_tx.send(Ok(packet));
        }

        let poller = tokio::spawn(poll_loop(client.clone(), session_url.clone(), inbound_tx));

        Ok((
            Self {
                client,
                url: session_url,
                inbound,
                poller,
            },
            handshake,
        ))
    }
}

impl Drop for PollingTransport {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn send(&mut self, packets: Vec<EnginePacket>) -> TransportResult<()> {
        let body = encode_payload(&packets)?;
        debug!("poll send: {}", body);

        let response = self
            .client
            .post(with_cache_buster(&self.url))
            .header(CONTENT_TYPE, PAYLOAD_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportResult<EnginePacket>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        let _ = self.send(vec![EnginePacket::Close]).await;
        self.poller.abort();
    }
}

/// Keep one GET outstanding until the session ends
async fn poll_loop(
    client: reqwest::Client,
    url: Url,
    inbound_tx: mpsc::UnboundedSender<TransportResult<EnginePacket>>,
) {
    loop {
        match get_packets(&client, &url).await {
            Ok(packets) => {
                for packet in packets {
                    let closing = packet == EnginePacket::Close;
                    if inbound_tx.send(Ok(packet)).is_err() || closing {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Polling request failed: {}", e);
                let _ = inbound_tx.send(Err(e));
                return;
            }
        }

        if inbound_tx.is_closed() {
            return;
        }
    }
}

async fn get_packets(client: &reqwest::Client, url: &Url) -> TransportResult<Vec<EnginePacket>> {
    let response = client.get(with_cache_buster(url)).send().await?;
    if !response.status().is_success() {
        return Err(TransportError::Status(response.status().as_u16()));
    }

    let body = response.text().await?;
    debug!("poll recv: {}", body);
    Ok(decode_payload(&body)?)
}

/// Append the `t` parameter that keeps intermediaries from caching polls
fn with_cache_buster(url: &Url) -> Url {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("t", &format!("{}.{}", millis, counter));
    url
}
