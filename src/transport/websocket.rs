//! WebSocket transport
//!
//! One Engine.IO packet per text frame. The server opens the session by
//! sending the `open` packet as its first frame.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError as WsProtocolError};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::{Transport, TransportError, TransportKind, TransportResult};
use crate::protocol::{EnginePacket, Handshake, ProtocolError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Engine.IO over a websocket connection
pub struct WebSocketTransport {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl WebSocketTransport {
    /// Connect and wait for the Engine.IO `open` packet
    pub async fn connect(url: &Url) -> TransportResult<(Self, Handshake)> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (sink, stream) = ws_stream.split();
        let mut transport = Self { sink, stream };

        match transport.recv().await {
            Some(Ok(EnginePacket::Open(handshake))) => Ok((transport, handshake)),
            Some(Ok(other)) => Err(TransportError::Handshake(format!(
                "expected open packet, got {:?}",
                other
            ))),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::Handshake(
                "connection closed before open packet".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Websocket
    }

    async fn send(&mut self, packets: Vec<EnginePacket>) -> TransportResult<()> {
        for packet in packets {
            let text = packet.encode()?;
            debug!("ws send: {}", text);
            self.sink.send(Message::Text(text)).await?;
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportResult<EnginePacket>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    debug!("ws recv: {}", text);
                    return Some(EnginePacket::decode(&text).map_err(Into::into));
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Received binary frame ({} bytes)", data.len());
                    return Some(Err(ProtocolError::BinaryUnsupported.into()));
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Websocket-level keepalive; tungstenite answers pings itself
                }
                Some(Ok(Message::Frame(_))) => {
                    // Raw frame, ignore
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed websocket: {:?}", frame);
                    return None;
                }
                Some(Err(e)) if is_closed(&e) => {
                    debug!("Websocket closed without handshake: {}", e);
                    return None;
                }
                Some(Err(e)) => return Some(Err(e.into())),
                None => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}

/// Whether a read error just means the peer went away
fn is_closed(error: &WsError) -> bool {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => true,
        WsError::Protocol(WsProtocolError::ResetWithoutClosingHandshake) => true,
        WsError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}
