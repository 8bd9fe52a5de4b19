//! Loopback Socket.IO server and outbound recorder shared by the unit tests.

use std::cell::RefCell;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::connection::Outbox;
use crate::protocol::{EnginePacket, Handshake, SocketPacket};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct FakeServer {
    listener: TcpListener,
    pub(crate) url: String,
}

impl FakeServer {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        Self { listener, url }
    }

    /// Accept one client, send the Engine.IO handshake and read its CONNECT.
    pub(crate) async fn accept(&self) -> FakePeer {
        self.accept_with_timing(25_000, 20_000).await
    }

    /// Like [`accept`](Self::accept), announcing the given ping timing in
    /// milliseconds.
    pub(crate) async fn accept_with_timing(&self, ping_interval: u64, ping_timeout: u64) -> FakePeer {
        let (stream, _) = tokio::time::timeout(STEP_TIMEOUT, self.listener.accept())
            .await
            .expect("client never connected")
            .unwrap();
        let ws = accept_async(stream).await.unwrap();
        let mut peer = FakePeer { ws, auth: Value::Null };

        let open = EnginePacket::Open(Handshake {
            sid: "eio-1".into(),
            upgrades: vec![],
            ping_interval,
            ping_timeout,
            max_payload: 1_000_000,
        });
        peer.send_raw(&open.encode()).await;

        let frame = peer.next_raw().await;
        let body = frame.strip_prefix('4').expect("expected a message packet");
        match SocketPacket::decode(body).unwrap() {
            SocketPacket::Connect { payload, .. } => peer.auth = payload.unwrap_or(Value::Null),
            other => panic!("expected CONNECT, got {other:?}"),
        }
        peer
    }
}

pub(crate) struct FakePeer {
    ws: WebSocketStream<TcpStream>,
    pub(crate) auth: Value,
}

impl FakePeer {
    pub(crate) async fn accept_connect(&mut self) {
        self.send_raw(r#"40{"sid":"sock-1"}"#).await;
    }

    pub(crate) async fn reject(&mut self, message: &str) {
        let frame = format!("44{}", json!({ "message": message }));
        self.send_raw(&frame).await;
    }

    pub(crate) async fn send_event(&mut self, name: &str, args: Vec<Value>) {
        self.send_raw(&SocketPacket::event(name, args).to_frame()).await;
    }

    pub(crate) async fn send_raw(&mut self, frame: &str) {
        self.ws.send(Message::text(frame.to_string())).await.unwrap();
    }

    pub(crate) async fn next_raw(&mut self) -> String {
        loop {
            let frame = tokio::time::timeout(STEP_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame");
            match frame {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(Message::Close(_))) | None => panic!("client closed the socket"),
                Some(Ok(_)) => {}
                Some(Err(e)) => panic!("socket error: {e}"),
            }
        }
    }

    /// Next Socket.IO event, skipping control packets.
    pub(crate) async fn next_event(&mut self) -> (String, Vec<Value>) {
        loop {
            let frame = self.next_raw().await;
            if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(&frame) {
                if let Ok(SocketPacket::Event { name, args, .. }) = SocketPacket::decode(&body) {
                    return (name, args);
                }
            }
        }
    }
}

/// Records every emit instead of sending it.
#[derive(Default)]
pub(crate) struct RecordingOutbox {
    pub(crate) sent: RefCell<Vec<(String, Vec<Value>)>>,
}

impl RecordingOutbox {
    pub(crate) fn names(&self) -> Vec<String> {
        self.sent.borrow().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl Outbox for RecordingOutbox {
    fn emit(&self, event: &str, args: Vec<Value>) {
        self.sent.borrow_mut().push((event.to_string(), args));
    }
}
