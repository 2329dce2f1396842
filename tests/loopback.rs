//! End-to-end tests against a [`LoopbackServer`].
//!
//! Run with: cargo test --test loopback
//! Set `RUST_LOG=duplex_rpc=debug` for logs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duplex_rpc::server::ClientSet;
use duplex_rpc::{
    AutoReconnect, ClientId, CloseCode, ConnectionState, Error, LoopbackServer, Message,
    MessageHandler, Method, RpcConnection, ServerConfig, WebSocket,
};
use futures_util::StreamExt;
use serde_json::{Value, json};

// ============================================================================
// Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn started(config: ServerConfig) -> LoopbackServer {
    init_tracing();
    let server = LoopbackServer::new(config);
    server.start().await.expect("server start");
    server
}

fn socket_for(server: &LoopbackServer, reconnect: AutoReconnect) -> WebSocket {
    let url = server.ws_url("/api/v1").expect("server url");
    WebSocket::builder()
        .url(url.as_str())
        .connect_timeout(Duration::from_secs(5))
        .auto_reconnect(reconnect)
        .build()
        .expect("build socket")
}

/// Replies with the status code named by the request path, `/status/{code}`.
struct StatusHandler;

#[async_trait]
impl MessageHandler for StatusHandler {
    async fn on_message(&self, client: ClientId, message: Message, clients: &ClientSet) {
        let Ok(request) = serde_json::from_slice::<Value>(message.as_bytes()) else {
            return;
        };

        let code = request["path"]
            .as_str()
            .and_then(|path| path.strip_prefix("/status/"))
            .and_then(|code| code.parse::<i64>().ok())
            .unwrap_or(200);

        let reply = json!({
            "code": code,
            "callback_id": request["callback_id"],
            "error": (code >= 400).then(|| json!({"message": format!("status {code}")})),
            "data": request["data"],
        });
        clients.send_to(client, Message::from(reply.to_string()));
    }
}

/// Accepts requests and never replies.
struct Silent;

#[async_trait]
impl MessageHandler for Silent {
    async fn on_message(&self, _client: ClientId, _message: Message, _clients: &ClientSet) {}
}

// ============================================================================
// Socket
// ============================================================================

#[tokio::test]
async fn echo_round_trip() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::disabled());

    socket.connect().await.expect("connect");
    socket.send("first message").await.expect("send");
    let reply = socket.receive().await.expect("receive");

    assert_eq!(&reply[..], b"first message");

    socket.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn stream_preserves_order() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::disabled());
    socket.connect().await.expect("connect");

    socket.send("first message").await.expect("send");
    socket.send("second message").await.expect("send");

    let received: Vec<_> = socket
        .stream()
        .take(2)
        .map(|item| String::from_utf8(item.expect("payload").to_vec()).expect("utf8"))
        .collect()
        .await;

    assert_eq!(received, vec!["first message", "second message"]);

    socket.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn stream_ends_after_disconnect() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::disabled());
    socket.connect().await.expect("connect");

    let mut stream = socket.stream();
    socket.send("only").await.expect("send");
    assert!(stream.next().await.is_some());

    socket.disconnect();
    assert!(stream.next().await.is_none());
    server.stop().await;
}

#[tokio::test]
async fn connect_while_connected_is_rejected() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::disabled());
    socket.connect().await.expect("connect");

    let result = socket.connect().await;

    assert!(matches!(result, Err(Error::AlreadyConnected { .. })));
    assert!(socket.is_connected());
    server.stop().await;
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::disabled());
    server.stop().await;

    let result = socket.connect().await;

    assert!(matches!(result, Err(Error::Connection { .. })));
    assert_eq!(socket.close_code(), CloseCode::Abnormal);
}

#[tokio::test]
async fn reconnects_across_server_restart() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::enabled(5, Duration::from_millis(50)));
    socket.connect().await.expect("connect");

    socket.send("before restart").await.expect("send");
    assert_eq!(&socket.receive().await.expect("receive")[..], b"before restart");

    server.stop().await;
    socket
        .wait_for(ConnectionState::is_disconnected)
        .await
        .expect("socket notices stop");

    server.start().await.expect("restart on same port");

    socket.send("after restart").await.expect("send after reconnect");
    assert_eq!(&socket.receive().await.expect("receive")[..], b"after restart");
    assert!(socket.is_connected());

    socket.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn send_right_after_server_restart_is_retried() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::enabled(5, Duration::from_millis(50)));
    socket.connect().await.expect("connect");

    socket.send("before restart").await.expect("send");
    assert_eq!(&socket.receive().await.expect("receive")[..], b"before restart");

    server.stop().await;
    server.start().await.expect("restart on same port");

    // The old transport may still report connected; a write on it can be lost.
    let mut echoed = None;
    for _ in 0..5 {
        socket
            .send("after restart")
            .await
            .expect("send retried on a fresh transport");
        if let Ok(Ok(reply)) =
            tokio::time::timeout(Duration::from_millis(500), socket.receive()).await
        {
            echoed = Some(reply);
            break;
        }
    }

    assert_eq!(echoed.as_deref(), Some(&b"after restart"[..]));
    assert!(socket.is_connected());

    socket.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn disconnect_during_reconnect_is_final() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::enabled(3, Duration::from_millis(300)));
    socket.connect().await.expect("connect");

    server.stop().await;
    socket
        .wait_for(ConnectionState::is_disconnected)
        .await
        .expect("socket notices stop");
    server.start().await.expect("restart on same port");

    let pending = {
        let socket = socket.clone();
        tokio::spawn(async move { socket.send("never delivered").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    socket.disconnect();

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(Error::Cancelled)));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!socket.is_connected());
    assert_eq!(server.client_count(), 0);
    server.stop().await;
}

#[tokio::test]
async fn disconnect_is_final_even_with_reconnect() {
    let server = started(ServerConfig::new()).await;
    let socket = socket_for(&server, AutoReconnect::enabled(3, Duration::from_millis(10)));
    socket.connect().await.expect("connect");

    socket.disconnect();

    assert!(matches!(socket.send("late").await, Err(Error::NotConnected)));
    assert_eq!(socket.close_code(), CloseCode::Normal);
    server.stop().await;
}

// ============================================================================
// RPC
// ============================================================================

#[tokio::test]
async fn status_codes_reach_caller() {
    let server = started(ServerConfig::new().handler(StatusHandler)).await;
    let rpc = RpcConnection::new(socket_for(&server, AutoReconnect::disabled()));
    rpc.connect().await.expect("connect");

    let not_found = rpc.get("/status/404").await;
    assert!(matches!(not_found, Err(Error::ClientError { code: 404, .. })));

    let unavailable = rpc.get("/status/503").await;
    assert!(matches!(unavailable, Err(Error::ServerError { code: 503, .. })));

    let unusual = rpc.get("/status/250").await.expect("250 is success");
    let reply: Value = serde_json::from_slice(&unusual).expect("raw reply");
    assert_eq!(reply["code"], 250);

    let unexpected = rpc.get("/status/999").await;
    assert!(matches!(unexpected, Err(Error::UnexpectedStatus { code: 999 })));

    assert_eq!(rpc.pending_count(), 0);
    rpc.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn request_data_decodes_reply() {
    let server = started(ServerConfig::new().handler(StatusHandler)).await;
    let rpc = RpcConnection::new(socket_for(&server, AutoReconnect::disabled()));
    rpc.connect().await.expect("connect");

    let echoed: Vec<u32> = rpc
        .request_data(Method::Post, "/status/200", vec![1u32, 2, 3])
        .await
        .expect("decoded data");

    assert_eq!(echoed, vec![1, 2, 3]);
    rpc.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn concurrent_requests_are_correlated() {
    let server = started(ServerConfig::new().handler(StatusHandler)).await;
    let rpc = RpcConnection::new(socket_for(&server, AutoReconnect::disabled()));
    rpc.connect().await.expect("connect");

    let tasks: Vec<_> = (0..20u32)
        .map(|i| {
            let rpc = rpc.clone();
            tokio::spawn(async move {
                let data: u32 = rpc
                    .request_data(Method::Post, "/status/200", i)
                    .await
                    .expect("reply");
                (i, data)
            })
        })
        .collect();

    for task in tasks {
        let (sent, received) = task.await.expect("join");
        assert_eq!(sent, received);
    }
    rpc.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn disconnect_resolves_every_pending_request() {
    let server = started(ServerConfig::new().handler(Silent)).await;
    let rpc = RpcConnection::new(socket_for(&server, AutoReconnect::disabled()));
    rpc.connect().await.expect("connect");

    let pending: Vec<_> = (0..3)
        .map(|i| {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.get(&format!("/wait/{i}")).await })
        })
        .collect();

    for _ in 0..200 {
        if rpc.pending_count() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(rpc.pending_count(), 3);

    rpc.disconnect();

    for task in pending {
        assert!(matches!(task.await.expect("join"), Err(Error::Cancelled)));
    }
    assert!(matches!(rpc.socket().send("late").await, Err(Error::NotConnected)));
    assert!(matches!(rpc.socket().receive().await, Err(Error::NotConnected)));

    server.stop().await;
}

#[tokio::test]
async fn request_times_out_without_reply() {
    let server = started(ServerConfig::new().handler(Silent)).await;
    let rpc = RpcConnection::new(socket_for(&server, AutoReconnect::disabled()));
    rpc.connect().await.expect("connect");

    let result = rpc
        .request_with_timeout(Method::Get, "/never", Value::Null, Duration::from_millis(50))
        .await;

    assert!(matches!(result, Err(Error::RequestTimeout { timeout_ms: 50, .. })));
    assert_eq!(rpc.pending_count(), 0);

    rpc.disconnect();
    server.stop().await;
}

#[tokio::test]
async fn handler_sees_shared_client_set() {
    let server = Arc::new(started(ServerConfig::new()).await);
    let socket = socket_for(&server, AutoReconnect::disabled());
    socket.connect().await.expect("connect");

    for _ in 0..200 {
        if server.client_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let ids = server.clients().ids();
    assert_eq!(ids.len(), 1);
    assert!(server.clients().send_to(ids[0], Message::from("pushed")));
    assert_eq!(&socket.receive().await.expect("receive")[..], b"pushed");

    socket.disconnect();
    server.stop().await;
}
