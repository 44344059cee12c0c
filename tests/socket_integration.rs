//! End-to-end tests against an in-process Socket.IO server

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

use webui_socket::transport::TransportKind;
use webui_socket::{init_socket, Event, Socket, SocketOptions, Stores};

const WAIT: Duration = Duration::from_secs(5);
const OPEN: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

type ServerStream = WebSocketStream<TcpStream>;

fn options_for(listener: &TcpListener) -> SocketOptions {
    let addr = listener.local_addr().unwrap();
    SocketOptions::parse(&format!("http://{}", addr))
        .unwrap()
        .with_transports(vec![TransportKind::Websocket])
}

/// Accept one websocket connection, returning it with the request URI
async fn accept(listener: &TcpListener) -> (ServerStream, String) {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut uri = String::new();
    let ws = accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        },
    )
    .await
    .unwrap();
    (ws, uri)
}

async fn send(ws: &mut ServerStream, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

async fn next_text(ws: &mut ServerStream) -> String {
    loop {
        let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = frame {
            return text;
        }
    }
}

/// Run the Engine.IO open and namespace join, returning the client's auth
async fn join(ws: &mut ServerStream) -> Value {
    join_with(ws, OPEN).await
}

async fn join_with(ws: &mut ServerStream, open: &str) -> Value {
    send(ws, open).await;
    let connect = next_text(ws).await;
    let auth = connect
        .strip_prefix("40")
        .unwrap_or_else(|| panic!("expected CONNECT, got {}", connect));
    send(ws, r#"40{"sid":"sock-1"}"#).await;
    serde_json::from_str(auth).unwrap()
}

/// Forward `name:payload` for each listed event as it is dispatched
fn record(socket: &Socket, names: &[&str]) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in names {
        let tx = tx.clone();
        socket.on(name, move |event: &Event| {
            let payload = event.payload().map(Value::to_string).unwrap_or_default();
            let _ = tx.send(format!("{}:{}", event.name, payload));
        });
    }
    rx
}

async fn next_recorded(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(WAIT, rx.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_stores_follow_server_broadcasts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let socket = init_socket(options_for(&listener), &stores, Some("jwt"), "user-1");

    let (mut ws, uri) = accept(&listener).await;
    assert!(uri.starts_with("/ws/socket.io/?"), "unexpected uri {}", uri);
    assert!(uri.contains("EIO=4"));
    assert!(uri.contains("transport=websocket"));

    let auth = join(&mut ws).await;
    assert_eq!(auth, json!({"token": "jwt", "client_id": "user-1"}));

    let mut user_count = stores.active_user_count.subscribe();
    let mut usage_pool = stores.usage_pool.subscribe();

    send(&mut ws, r#"42["user-count",{"count":5}]"#).await;
    timeout(WAIT, user_count.wait_for(|count| *count == Some(5)))
        .await
        .unwrap()
        .unwrap();

    send(&mut ws, r#"42["usage",{"models":["a","b"]}]"#).await;
    timeout(WAIT, usage_pool.wait_for(|models| !models.is_empty()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stores.usage_pool.get(), vec!["a", "b"]);

    send(&mut ws, r#"42["usage",{"models":[]}]"#).await;
    timeout(WAIT, usage_pool.wait_for(|models| models.is_empty()))
        .await
        .unwrap()
        .unwrap();

    assert!(socket.is_connected());
    assert_eq!(socket.id().as_deref(), Some("sock-1"));
    assert_eq!(stores.socket.get(), Some(socket));
}

#[tokio::test]
async fn test_close_sends_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let socket = init_socket(options_for(&listener), &stores, None, "user-1");

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    socket.on("disconnect", move |event: &Event| {
        sink.lock().unwrap().push(event.payload().cloned());
    });

    let (mut ws, _) = accept(&listener).await;
    let auth = join(&mut ws).await;
    assert_eq!(auth, json!({"token": null, "client_id": "user-1"}));

    // Round trip an ack so the session is known to be up before closing
    let emitter = socket.clone();
    let acked = tokio::spawn(async move {
        emitter
            .emit_with_ack("usage", json!({"model": "llama3"}), WAIT)
            .await
    });
    assert_eq!(next_text(&mut ws).await, r#"420["usage",{"model":"llama3"}]"#);
    send(&mut ws, r#"430["ok"]"#).await;
    assert_eq!(acked.await.unwrap().unwrap(), vec![json!("ok")]);

    socket.close();
    assert_eq!(next_text(&mut ws).await, "41");
    timeout(WAIT, socket.closed()).await.unwrap();

    assert!(!socket.is_connected());
    assert_eq!(
        *reasons.lock().unwrap(),
        vec![Some(json!("io client disconnect"))]
    );
}

#[tokio::test]
async fn test_queued_emit_flushed_after_join() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let socket = init_socket(options_for(&listener), &stores, Some("jwt"), "user-1");

    socket.join_user().unwrap();

    let (mut ws, _) = accept(&listener).await;
    join(&mut ws).await;

    let frame = next_text(&mut ws).await;
    let payload: Value = serde_json::from_str(frame.strip_prefix("42").unwrap()).unwrap();
    assert_eq!(
        payload,
        json!(["user-join", {"auth": {"token": "jwt", "client_id": "user-1"}}])
    );

    socket.close();
}

#[tokio::test]
async fn test_server_disconnect_is_final() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let socket = init_socket(options_for(&listener), &stores, None, "user-1");

    let (mut ws, _) = accept(&listener).await;
    join(&mut ws).await;
    send(&mut ws, r#"42["user-count",{"count":1}]"#).await;
    send(&mut ws, "41").await;

    timeout(WAIT, socket.closed()).await.unwrap();
    assert_eq!(stores.active_user_count.get(), Some(1));
    assert!(socket.emit("usage", json!({})).is_err());
}

#[tokio::test]
async fn test_rejected_connection_is_final() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let socket = init_socket(options_for(&listener), &stores, Some("bad"), "user-1");

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    socket.on("connect_error", move |event: &Event| {
        sink.lock().unwrap().push(event.payload().cloned());
    });

    let (mut ws, _) = accept(&listener).await;
    send(&mut ws, OPEN).await;
    assert!(next_text(&mut ws).await.starts_with("40"));
    send(&mut ws, r#"44{"message":"Not authorized"}"#).await;

    timeout(WAIT, socket.closed()).await.unwrap();
    assert_eq!(
        *errors.lock().unwrap(),
        vec![Some(json!({"message": "Not authorized"}))]
    );
    assert_eq!(stores.active_user_count.get(), None);
}

#[tokio::test]
async fn test_panicking_handler_keeps_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let socket = init_socket(options_for(&listener), &stores, None, "user-1");
    socket.on("chat-events", |_: &Event| panic!("handler bug"));

    let (mut ws, _) = accept(&listener).await;
    join(&mut ws).await;
    send(&mut ws, r#"42["chat-events",{}]"#).await;
    send(&mut ws, r#"42["user-count",{"count":3}]"#).await;

    let mut user_count = stores.active_user_count.subscribe();
    timeout(WAIT, user_count.wait_for(|count| *count == Some(3)))
        .await
        .unwrap()
        .unwrap();
    assert!(socket.is_connected());

    socket.close();
    assert_eq!(next_text(&mut ws).await, "41");
    timeout(WAIT, socket.closed()).await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_dropped_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let options = options_for(&listener)
        .with_reconnection_delay(Duration::from_millis(50), Duration::from_millis(100));
    let socket = init_socket(options, &stores, None, "user-1");
    let mut events = record(
        &socket,
        &["connect", "disconnect", "reconnect_attempt", "reconnect"],
    );

    let (mut first, _) = accept(&listener).await;
    join(&mut first).await;
    assert_eq!(next_recorded(&mut events).await, "connect:");

    // Gone without a close frame
    drop(first);

    let (mut second, _) = accept(&listener).await;
    join(&mut second).await;

    let mut sequence = Vec::new();
    for _ in 0..4 {
        sequence.push(next_recorded(&mut events).await);
    }
    assert_eq!(
        sequence,
        vec![
            r#"disconnect:"transport close""#,
            "reconnect_attempt:1",
            "reconnect:1",
            "connect:",
        ]
    );

    send(&mut second, r#"42["user-count",{"count":8}]"#).await;
    let mut user_count = stores.active_user_count.subscribe();
    timeout(WAIT, user_count.wait_for(|count| *count == Some(8)))
        .await
        .unwrap()
        .unwrap();

    socket.close();
}

#[tokio::test]
async fn test_missing_ping_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stores = Stores::new();
    let options = options_for(&listener).with_reconnection(false);
    let socket = init_socket(options, &stores, None, "user-1");
    let mut events = record(&socket, &["disconnect"]);

    let (mut ws, _) = accept(&listener).await;
    join_with(
        &mut ws,
        r#"0{"sid":"eio-2","upgrades":[],"pingInterval":100,"pingTimeout":100}"#,
    )
    .await;

    send(&mut ws, "2").await;
    assert_eq!(next_text(&mut ws).await, "3");

    // No further pings
    timeout(WAIT, socket.closed()).await.unwrap();
    assert_eq!(
        next_recorded(&mut events).await,
        r#"disconnect:"ping timeout""#
    );
}

/// Read one HTTP/1.1 request, returning its method, target and body
async fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..head_end + length]).to_string();
    Some((method, target, body))
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain; charset=UTF-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Engine.IO long-polling server that refuses websocket upgrades
///
/// Every POST body is forwarded to `posts`. Once the client sends CONNECT,
/// `script` is queued for delivery on the following polls.
fn serve_polling(listener: TcpListener, script: Vec<String>, posts: mpsc::UnboundedSender<String>) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
    let outbound_rx = Arc::new(tokio::sync::Mutex::new(outbound_rx));

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let outbound_tx = outbound_tx.clone();
            let outbound_rx = Arc::clone(&outbound_rx);
            let posts = posts.clone();
            let script = script.clone();

            tokio::spawn(async move {
                let Some((method, target, body)) = read_request(&mut stream).await else {
                    return;
                };

                if target.contains("transport=websocket") {
                    respond(&mut stream, "400 Bad Request", "").await;
                } else if method == "POST" {
                    if body.starts_with("40") {
                        for packet in &script {
                            let _ = outbound_tx.send(packet.clone());
                        }
                    }
                    let _ = posts.send(body);
                    respond(&mut stream, "200 OK", "ok").await;
                } else if !target.contains("sid=") {
                    respond(
                        &mut stream,
                        "200 OK",
                        r#"0{"sid":"eio-p","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
                    )
                    .await;
                } else {
                    let mut rx = outbound_rx.lock().await;
                    let mut packets = Vec::new();
                    if let Ok(Some(first)) = timeout(Duration::from_millis(200), rx.recv()).await {
                        packets.push(first);
                        while let Ok(more) = rx.try_recv() {
                            packets.push(more);
                        }
                    }
                    drop(rx);

                    let body = if packets.is_empty() {
                        "6".to_string()
                    } else {
                        packets.join("\u{1e}")
                    };
                    respond(&mut stream, "200 OK", &body).await;
                }
            });
        }
    });
}

#[tokio::test]
async fn test_falls_back_to_polling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = SocketOptions::parse(&format!("http://{}", listener.local_addr().unwrap()))
        .unwrap()
        .with_reconnection(false);
    let (posts_tx, mut posts) = mpsc::unbounded_channel();
    serve_polling(
        listener,
        vec![
            r#"40{"sid":"sock-p"}"#.to_string(),
            r#"42["user-count",{"count":7}]"#.to_string(),
            r#"42["usage",{"models":["x"]}]"#.to_string(),
        ],
        posts_tx,
    );

    let stores = Stores::new();
    let socket = init_socket(options, &stores, Some("t"), "u");

    let connect = timeout(WAIT, posts.recv()).await.unwrap().unwrap();
    let auth: Value = serde_json::from_str(connect.strip_prefix("40").unwrap()).unwrap();
    assert_eq!(auth, json!({"token": "t", "client_id": "u"}));

    let mut usage_pool = stores.usage_pool.subscribe();
    timeout(WAIT, usage_pool.wait_for(|models| !models.is_empty()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(stores.active_user_count.get(), Some(7));
    assert_eq!(stores.usage_pool.get(), vec!["x"]);
    assert_eq!(socket.id().as_deref(), Some("sock-p"));

    socket.close();
    timeout(WAIT, socket.closed()).await.unwrap();
}
