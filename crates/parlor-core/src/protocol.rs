//! Engine.IO v4 / Socket.IO v4 text packet codec.
//!
//! The chat server speaks Socket.IO. Over a WebSocket transport every frame is
//! one Engine.IO packet; Engine.IO `message` packets carry one Socket.IO packet.
//! Only the text encoding is supported, binary attachments are rejected.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Engine.IO protocol revision sent in the handshake query.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Namespace used when a packet does not name one.
pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownEnginePacket(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("binary packets are not supported")]
    BinaryUnsupported,
    #[error("invalid json: {0}")]
    InvalidJson(String),
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}

/// Handshake data carried by the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => {
                let body = serde_json::json!({
                    "sid": handshake.sid,
                    "upgrades": handshake.upgrades,
                    "pingInterval": handshake.ping_interval,
                    "pingTimeout": handshake.ping_timeout,
                    "maxPayload": handshake.max_payload,
                });
                format!("0{body}")
            }
            Self::Close => "1".to_string(),
            Self::Ping(data) => format!("2{data}"),
            Self::Pong(data) => format!("3{data}"),
            Self::Message(data) => format!("4{data}"),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => serde_json::from_str(rest)
                .map(Self::Open)
                .map_err(|e| ProtocolError::InvalidJson(e.to_string())),
            '1' => Ok(Self::Close),
            '2' => Ok(Self::Ping(rest.to_string())),
            '3' => Ok(Self::Pong(rest.to_string())),
            '4' => Ok(Self::Message(rest.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            // Engine.IO marks binary frames sent over text transports with 'b'.
            'b' => Err(ProtocolError::BinaryUnsupported),
            other => Err(ProtocolError::UnknownEnginePacket(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        payload: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    /// CONNECT on the default namespace.
    pub fn connect(payload: Option<Value>) -> Self {
        Self::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            payload,
        }
    }

    /// Fire-and-forget EVENT on the default namespace.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            args,
        }
    }

    pub fn disconnect() -> Self {
        Self::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Connect { namespace, payload } => {
                let body = payload.as_ref().map(Value::to_string).unwrap_or_default();
                format!("0{}{body}", namespace_prefix(namespace))
            }
            Self::Disconnect { namespace } => format!("1{}", namespace_prefix(namespace)),
            Self::Event {
                namespace,
                ack_id,
                name,
                args,
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                let id = ack_id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{id}{}", namespace_prefix(namespace), Value::Array(items))
            }
            Self::Ack {
                namespace,
                ack_id,
                args,
            } => format!(
                "3{}{ack_id}{}",
                namespace_prefix(namespace),
                Value::Array(args.clone())
            ),
            Self::ConnectError { namespace, message } => format!(
                "4{}{}",
                namespace_prefix(namespace),
                serde_json::json!({ "message": message })
            ),
        }
    }

    pub fn decode(body: &str) -> Result<Self, ProtocolError> {
        let mut chars = body.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::BinaryUnsupported);
        }
        if !matches!(kind, '0'..='4') {
            return Err(ProtocolError::UnknownSocketPacket(kind));
        }

        let (namespace, rest) = split_namespace(chars.as_str());
        let (ack_id, rest) = split_ack_id(rest);
        let payload = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(rest)
                    .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?,
            )
        };

        match kind {
            '0' => Ok(Self::Connect { namespace, payload }),
            '1' => Ok(Self::Disconnect { namespace }),
            '2' => {
                let Some(Value::Array(mut items)) = payload else {
                    return Err(ProtocolError::MalformedEvent(
                        "event payload must be an array".into(),
                    ));
                };
                if items.is_empty() {
                    return Err(ProtocolError::MalformedEvent("missing event name".into()));
                }
                let Value::String(name) = items.remove(0) else {
                    return Err(ProtocolError::MalformedEvent(
                        "event name must be a string".into(),
                    ));
                };
                Ok(Self::Event {
                    namespace,
                    ack_id,
                    name,
                    args: items,
                })
            }
            '3' => {
                let ack_id = ack_id
                    .ok_or_else(|| ProtocolError::MalformedEvent("ack without id".into()))?;
                let args = match payload {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                Ok(Self::Ack {
                    namespace,
                    ack_id,
                    args,
                })
            }
            _ => {
                // v4 sends {"message": ...}; v3 servers send a bare string.
                let message = match payload {
                    Some(Value::String(message)) => message,
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                Ok(Self::ConnectError { namespace, message })
            }
        }
    }

    /// Wrap this packet in an Engine.IO `message` frame.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE || namespace.is_empty() {
        String::new()
    } else {
        format!("{namespace},")
    }
}

fn split_namespace(rest: &str) -> (String, &str) {
    if !rest.starts_with('/') {
        return (DEFAULT_NAMESPACE.to_string(), rest);
    }
    match rest.find(',') {
        Some(idx) => (rest[..idx].to_string(), &rest[idx + 1..]),
        None => (rest.to_string(), ""),
    }
}

fn split_ack_id(rest: &str) -> (Option<u64>, &str) {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (None, rest);
    }
    match rest[..digits].parse() {
        Ok(id) => (Some(id), &rest[digits..]),
        Err(_) => (None, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_open_handshake() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let EnginePacket::Open(handshake) = EnginePacket::decode(frame).unwrap() else {
            panic!("expected open packet");
        };
        assert_eq!(handshake.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(handshake.ping_interval, 25000);
        assert_eq!(handshake.ping_timeout, 20000);
        assert_eq!(handshake.max_payload, 1_000_000);
    }

    #[test]
    fn open_packet_survives_encoding() {
        let packet = EnginePacket::Open(Handshake {
            sid: "abc".into(),
            upgrades: vec![],
            ping_interval: 25000,
            ping_timeout: 20000,
            max_payload: 1_000_000,
        });
        assert_eq!(EnginePacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn decode_engine_control_packets() {
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(
            EnginePacket::decode("3probe").unwrap(),
            EnginePacket::Pong("probe".into())
        );
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
    }

    #[test]
    fn engine_decode_errors() {
        assert_eq!(EnginePacket::decode(""), Err(ProtocolError::Empty));
        assert_eq!(
            EnginePacket::decode("9"),
            Err(ProtocolError::UnknownEnginePacket('9'))
        );
        assert_eq!(
            EnginePacket::decode("bAQID"),
            Err(ProtocolError::BinaryUnsupported)
        );
        assert!(matches!(
            EnginePacket::decode("0{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn encode_connect_with_auth() {
        let packet = SocketPacket::connect(Some(json!({ "token": "secret" })));
        assert_eq!(packet.encode(), r#"0{"token":"secret"}"#);
        assert_eq!(packet.to_frame(), r#"40{"token":"secret"}"#);
    }

    #[test]
    fn encode_event_in_default_namespace() {
        let packet = SocketPacket::event("join_room", vec![json!("sala1"), json!("Alice")]);
        assert_eq!(packet.to_frame(), r#"42["join_room","sala1","Alice"]"#);
    }

    #[test]
    fn encode_event_with_namespace_and_ack() {
        let packet = SocketPacket::Event {
            namespace: "/admin".into(),
            ack_id: Some(12),
            name: "typing".into(),
            args: vec![],
        };
        assert_eq!(packet.encode(), r#"2/admin,12["typing"]"#);
        assert_eq!(SocketPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn decode_event_with_args() {
        let packet = SocketPacket::decode(r#"2["user_typing",{"author":"Bob"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::Event {
                namespace: "/".into(),
                ack_id: None,
                name: "user_typing".into(),
                args: vec![json!({ "author": "Bob" })],
            }
        );
    }

    #[test]
    fn decode_connect_ack() {
        let packet = SocketPacket::decode(r#"0{"sid":"oSO0OpakMV_3jnilAAAA"}"#).unwrap();
        let SocketPacket::Connect { namespace, payload } = packet else {
            panic!("expected connect");
        };
        assert_eq!(namespace, "/");
        assert_eq!(payload.unwrap()["sid"], "oSO0OpakMV_3jnilAAAA");
    }

    #[test]
    fn decode_connect_error_v4_and_v3() {
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"unauthorized"}"#).unwrap(),
            SocketPacket::ConnectError {
                namespace: "/".into(),
                message: "unauthorized".into(),
            }
        );
        assert_eq!(
            SocketPacket::decode(r#"4/chat,"Not authorized""#).unwrap(),
            SocketPacket::ConnectError {
                namespace: "/chat".into(),
                message: "Not authorized".into(),
            }
        );
    }

    #[test]
    fn decode_disconnect_and_ack() {
        assert_eq!(
            SocketPacket::decode("1").unwrap(),
            SocketPacket::Disconnect { namespace: "/".into() }
        );
        assert_eq!(
            SocketPacket::decode(r#"37["ok"]"#).unwrap(),
            SocketPacket::Ack {
                namespace: "/".into(),
                ack_id: 7,
                args: vec![json!("ok")],
            }
        );
    }

    #[test]
    fn socket_decode_errors() {
        assert_eq!(SocketPacket::decode(""), Err(ProtocolError::Empty));
        assert_eq!(
            SocketPacket::decode(r#"51-["upload",{"_placeholder":true,"num":0}]"#),
            Err(ProtocolError::BinaryUnsupported)
        );
        assert_eq!(
            SocketPacket::decode("8"),
            Err(ProtocolError::UnknownSocketPacket('8'))
        );
        assert!(matches!(
            SocketPacket::decode(r#"2{"name":"x"}"#),
            Err(ProtocolError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[]"),
            Err(ProtocolError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("2[42]"),
            Err(ProtocolError::MalformedEvent(_))
        ));
        assert!(matches!(
            SocketPacket::decode("3[]"),
            Err(ProtocolError::MalformedEvent(_))
        ));
    }
}
