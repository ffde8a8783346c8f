//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! An Engine.IO packet is a one-digit type followed by its data. Socket.IO
//! packets travel inside Engine.IO `message` packets: a one-digit type, an
//! optional `/namespace,`, an optional ack id and a JSON payload, e.g.
//! `42["statusChanged",{...}]`.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type `{0}`")]
    UnknownType(char),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Handshake data of the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds
    pub ping_interval: u64,
    /// Milliseconds
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenPayload {
    /// How long to wait for the server's ping before treating the link as dead
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenPayload),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let data = chars.as_str();

        Ok(match kind {
            '0' => EnginePacket::Open(
                serde_json::from_str(data).map_err(|e| PacketError::InvalidPayload(e.to_string()))?,
            ),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(data.to_string()),
            '3' => EnginePacket::Pong(data.to_string()),
            '4' => EnginePacket::Message(data.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: join the namespace with an auth payload. Server: accepted.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    Ack { id: u64, args: Vec<Value> },
    ConnectError(Value),
}

impl SocketPacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let mut rest = chars.as_str();

        // Namespace, only the default one is used here
        if rest.starts_with('/') {
            rest = rest.split_once(',').map(|(_, tail)| tail).unwrap_or("");
        }

        let digits = rest.chars().take_while(char::is_ascii_digit).count();
        let (ack_id, payload) = rest.split_at(digits);
        let ack_id = ack_id.parse::<u64>().ok();

        let json = || -> Result<Value, PacketError> {
            serde_json::from_str(payload).map_err(|e| PacketError::InvalidPayload(e.to_string()))
        };

        Ok(match kind {
            '0' => SocketPacket::Connect(if payload.is_empty() { None } else { Some(json()?) }),
            '1' => SocketPacket::Disconnect,
            '2' => {
                let mut args = match json()? {
                    Value::Array(items) => items,
                    _ => return Err(PacketError::InvalidPayload("event is not an array".into())),
                };
                if args.is_empty() {
                    return Err(PacketError::InvalidPayload("event without name".into()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(PacketError::InvalidPayload("event name is not a string".into())),
                };
                SocketPacket::Event { name, args }
            }
            '3' => SocketPacket::Ack {
                id: ack_id.ok_or_else(|| PacketError::InvalidPayload("ack without id".into()))?,
                args: match json()? {
                    Value::Array(items) => items,
                    other => vec![other],
                },
            },
            '4' => SocketPacket::ConnectError(if payload.is_empty() { Value::Null } else { json()? }),
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", auth),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                format!("2{}", Value::Array(items))
            }
            SocketPacket::Ack { id, args } => format!("3{}{}", id, Value::Array(args.clone())),
            SocketPacket::ConnectError(payload) => format!("4{}", payload),
        }
    }

    /// Wrap in an Engine.IO message packet
    pub fn to_engine_text(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }

    /// Message of a `ConnectError` payload
    pub fn error_message(payload: &Value) -> String {
        payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string())
    }
}
