//! Connection worker
//!
//! One task per connection. It opens a transport, joins the namespace,
//! pumps packets and commands until the session ends, then reconnects with
//! backoff unless the session ended for good. Handlers are dispatched from
//! this task, so they never run concurrently for one connection.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::registry::Event;
use super::socket::{Command, Shared};
use crate::events;
use crate::protocol::{EnginePacket, Handshake, Packet, PacketType};
use crate::transport::{self, Transport, TransportError, TransportResult};

/// Why a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server sent a DISCONNECT packet
    ServerDisconnect,
    /// `close()` was called or every handle was dropped
    ClientDisconnect,
    /// No ping from the server within `pingInterval + pingTimeout`
    PingTimeout,
    /// The transport was closed
    TransportClose,
    /// The transport failed
    TransportError,
}

impl DisconnectReason {
    /// Reason string passed to `disconnect` handlers
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
        }
    }

    /// Whether the connection should be re-established automatically
    pub fn should_reconnect(&self) -> bool {
        !matches!(
            self,
            DisconnectReason::ServerDisconnect | DisconnectReason::ClientDisconnect
        )
    }
}

enum ConnectFailure {
    Transport(TransportError),
    Rejected { message: String, data: Value },
    Cancelled,
}

#[derive(Default)]
struct WorkerState {
    pending: VecDeque<Command>,
    acks: HashMap<u64, oneshot::Sender<Vec<Value>>>,
    next_ack_id: u64,
}

impl WorkerState {
    /// Hold a command until the next session
    fn buffer(&mut self, command: Command) {
        match command {
            Command::Emit { .. } => self.pending.push_back(command),
            Command::Ack { id, .. } => {
                // The server that asked for it is gone
                debug!("Dropping ack {} while disconnected", id);
            }
            Command::Close => {}
        }
    }

    fn register_ack(&mut self, tx: oneshot::Sender<Vec<Value>>) -> u64 {
        self.acks.retain(|_, waiting| !waiting.is_closed());
        let id = self.next_ack_id;
        self.next_ack_id = self.next_ack_id.wrapping_add(1);
        self.acks.insert(id, tx);
        id
    }
}

/// Worker entry point
pub(crate) async fn run(shared: Arc<Shared>, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    let options = &shared.options;
    let mut state = WorkerState::default();
    let mut backoff = Backoff::from_options(options);

    loop {
        let attempt = backoff.attempts();
        if attempt > 0 {
            debug!("Reconnection attempt {}", attempt);
            shared.dispatch(&Event::local(events::RECONNECT_ATTEMPT, vec![json!(attempt)]));
        }

        match connect(&shared, &mut cmd_rx, &mut state).await {
            Ok((transport, handshake, sid)) => {
                if attempt > 0 {
                    info!("Reconnected after {} attempts", attempt);
                    shared.dispatch(&Event::local(events::RECONNECT, vec![json!(attempt)]));
                }
                backoff.reset();

                let reason =
                    run_session(&shared, transport, &handshake, sid, &mut cmd_rx, &mut state).await;

                shared.set_connected(None);
                // Dropping the senders fails every outstanding emit_with_ack
                state.acks.clear();
                info!("Disconnected: {}", reason.as_str());
                shared.dispatch(&Event::local(events::DISCONNECT, vec![json!(reason.as_str())]));

                if !reason.should_reconnect() || !options.reconnection {
                    break;
                }
            }
            Err(ConnectFailure::Cancelled) => break,
            Err(ConnectFailure::Rejected { message, data }) => {
                warn!("Server rejected connection: {}", message);
                shared.dispatch(&Event::local(events::CONNECT_ERROR, vec![data]));
                break;
            }
            Err(ConnectFailure::Transport(e)) => {
                error!("Connection to {} failed: {}", options.base_url, e);
                shared.dispatch(&Event::local(
                    events::CONNECT_ERROR,
                    vec![json!({ "message": e.to_string() })],
                ));
                if !options.reconnection {
                    break;
                }
            }
        }

        if let Some(limit) = options.reconnection_attempts {
            if backoff.attempts() >= limit {
                warn!("Giving up after {} reconnection attempts", limit);
                shared.dispatch(&Event::local(events::RECONNECT_FAILED, vec![]));
                break;
            }
        }

        let delay = backoff.next_delay();
        debug!("Reconnecting in {:?}", delay);
        if drive(tokio::time::sleep(delay), &mut cmd_rx, &mut state)
            .await
            .is_none()
        {
            break;
        }
    }

    shared.mark_finished();
    debug!("Connection worker {} stopped", shared.instance_id);
}

/// Await a future while buffering incoming commands
///
/// Returns `None` if a close was requested or every handle was dropped.
async fn drive<F: Future>(
    future: F,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    state: &mut WorkerState,
) -> Option<F::Output> {
    tokio::pin!(future);
    loop {
        tokio::select! {
            output = &mut future => return Some(output),
            command = cmd_rx.recv() => match command {
                Some(Command::Close) | None => return None,
                Some(command) => state.buffer(command),
            },
        }
    }
}

/// Open a transport and join the namespace
async fn connect(
    shared: &Shared,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    state: &mut WorkerState,
) -> Result<(Box<dyn Transport>, Handshake, String), ConnectFailure> {
    let options = &shared.options;

    let (mut transport, handshake) = drive(transport::open(options), cmd_rx, state)
        .await
        .ok_or(ConnectFailure::Cancelled)?
        .map_err(ConnectFailure::Transport)?;

    let joined = drive(
        tokio::time::timeout(
            options.connect_timeout,
            join_namespace(shared, transport.as_mut()),
        ),
        cmd_rx,
        state,
    )
    .await;

    match joined {
        Some(Ok(Ok(sid))) => Ok((transport, handshake, sid)),
        Some(Ok(Err(failure))) => {
            transport.close().await;
            Err(failure)
        }
        Some(Err(_)) => {
            transport.close().await;
            Err(ConnectFailure::Transport(TransportError::Timeout))
        }
        None => {
            transport.close().await;
            Err(ConnectFailure::Cancelled)
        }
    }
}

/// Send CONNECT with the auth payload and wait for the server's answer
async fn join_namespace(
    shared: &Shared,
    transport: &mut dyn Transport,
) -> Result<String, ConnectFailure> {
    let namespace = &shared.options.namespace;
    let connect = Packet::connect(namespace.clone(), Some(shared.auth.to_value()));
    send_packet(transport, &connect)
        .await
        .map_err(ConnectFailure::Transport)?;

    loop {
        let incoming = match transport.recv().await {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => return Err(ConnectFailure::Transport(e)),
            None => return Err(ConnectFailure::Transport(TransportError::Closed)),
        };

        match incoming {
            EnginePacket::Ping(data) => transport
                .send(vec![EnginePacket::Pong(data)])
                .await
                .map_err(ConnectFailure::Transport)?,
            EnginePacket::Message(text) => {
                let packet = Packet::decode(&text)
                    .map_err(|e| ConnectFailure::Transport(TransportError::Protocol(e)))?;
                if &packet.namespace != namespace {
                    continue;
                }
                match packet.kind {
                    PacketType::Connect => {
                        let sid = packet
                            .data
                            .as_ref()
                            .and_then(|data| data.get("sid"))
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
                        return Ok(sid);
                    }
                    PacketType::ConnectError => {
                        return Err(ConnectFailure::Rejected {
                            message: packet.error_message(),
                            data: packet.data.unwrap_or(Value::Null),
                        });
                    }
                    other => debug!("Ignoring {:?} packet before connect", other),
                }
            }
            EnginePacket::Close => {
                return Err(ConnectFailure::Transport(TransportError::Closed));
            }
            _ => {}
        }
    }
}

/// Drive one connected session and tear it down
async fn run_session(
    shared: &Shared,
    mut transport: Box<dyn Transport>,
    handshake: &Handshake,
    sid: String,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    state: &mut WorkerState,
) -> DisconnectReason {
    info!(
        "Socket connected to {} via {} (sid {})",
        shared.options.base_url,
        transport.kind(),
        sid
    );
    shared.set_connected(Some(sid));

    let reason = session_loop(shared, transport.as_mut(), handshake, cmd_rx, state).await;

    if reason == DisconnectReason::ClientDisconnect {
        let disconnect = Packet::disconnect(shared.options.namespace.clone());
        if let Err(e) = send_packet(transport.as_mut(), &disconnect).await {
            debug!("Failed to send disconnect: {}", e);
        }
    }
    transport.close().await;
    reason
}

async fn session_loop(
    shared: &Shared,
    transport: &mut dyn Transport,
    handshake: &Handshake,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    state: &mut WorkerState,
) -> DisconnectReason {
    while let Some(command) = state.pending.pop_front() {
        if let Err(e) = execute(shared, transport, state, command).await {
            error!("Failed to flush queued event: {}", e);
            return DisconnectReason::TransportError;
        }
    }

    shared.dispatch(&Event::local(events::CONNECT, vec![]));

    let heartbeat_deadline = handshake.heartbeat_deadline();
    let heartbeat = tokio::time::sleep(heartbeat_deadline);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Close) | None => return DisconnectReason::ClientDisconnect,
                Some(command) => {
                    if let Err(e) = execute(shared, transport, state, command).await {
                        error!("Failed to send: {}", e);
                        return DisconnectReason::TransportError;
                    }
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(EnginePacket::Ping(data))) => {
                    heartbeat.as_mut().reset(Instant::now() + heartbeat_deadline);
                    if let Err(e) = transport.send(vec![EnginePacket::Pong(data)]).await {
                        error!("Failed to answer ping: {}", e);
                        return DisconnectReason::TransportError;
                    }
                }
                Some(Ok(EnginePacket::Message(text))) => {
                    if let Some(reason) = handle_message(shared, state, &text) {
                        return reason;
                    }
                }
                Some(Ok(EnginePacket::Close)) | None => return DisconnectReason::TransportClose,
                Some(Ok(other)) => debug!("Ignoring engine packet {:?}", other),
                Some(Err(e)) => {
                    error!("Transport error: {}", e);
                    return DisconnectReason::TransportError;
                }
            },
            _ = &mut heartbeat => {
                warn!("No ping from server within {:?}", heartbeat_deadline);
                return DisconnectReason::PingTimeout;
            }
        }
    }
}

/// Handle one Socket.IO packet; returns a reason if the session is over
fn handle_message(
    shared: &Shared,
    state: &mut WorkerState,
    text: &str,
) -> Option<DisconnectReason> {
    let packet = match Packet::decode(text) {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Dropping malformed packet: {}", e);
            return None;
        }
    };
    if packet.namespace != shared.options.namespace {
        debug!("Ignoring packet for namespace {}", packet.namespace);
        return None;
    }

    match packet.kind {
        PacketType::Event => {
            if let Some((name, args)) = packet.event_parts() {
                debug!("Received event '{}'", name);
                shared.dispatch(&Event {
                    name: name.to_string(),
                    args: args.to_vec(),
                    ack_id: packet.id,
                });
            }
            None
        }
        PacketType::Ack => {
            let waiting = packet.id.and_then(|id| state.acks.remove(&id));
            match waiting {
                Some(tx) => {
                    let _ = tx.send(packet.ack_args());
                }
                None => debug!("Ignoring unexpected ack {:?}", packet.id),
            }
            None
        }
        PacketType::Disconnect => Some(DisconnectReason::ServerDisconnect),
        PacketType::ConnectError => {
            warn!("Server revoked connection: {}", packet.error_message());
            shared.dispatch(&Event::local(
                events::CONNECT_ERROR,
                vec![packet.data.unwrap_or(Value::Null)],
            ));
            Some(DisconnectReason::ServerDisconnect)
        }
        PacketType::Connect | PacketType::BinaryEvent | PacketType::BinaryAck => {
            debug!("Ignoring {:?} packet", packet.kind);
            None
        }
    }
}

async fn execute(
    shared: &Shared,
    transport: &mut dyn Transport,
    state: &mut WorkerState,
    command: Command,
) -> TransportResult<()> {
    let namespace = shared.options.namespace.clone();
    let packet = match command {
        Command::Emit { event, args, ack } => {
            let id = ack.map(|tx| state.register_ack(tx));
            Packet::event(namespace, &event, args, id)
        }
        Command::Ack { id, args } => Packet::ack(namespace, id, args),
        Command::Close => return Ok(()),
    };
    send_packet(transport, &packet).await
}

async fn send_packet(transport: &mut dyn Transport, packet: &Packet) -> TransportResult<()> {
    let text = packet.encode()?;
    transport.send(vec![EnginePacket::Message(text)]).await
}
