/// Hub JSON protocol
///
/// Every record is a JSON object terminated by the ASCII record separator
/// (0x1E). A WebSocket text frame may carry several records. The first record
/// a client sends is the handshake request; the first record it receives is
/// the handshake response (`{}` or `{"error": "..."}`).
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const RECORD_SEPARATOR: char = '\u{1e}';

pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u64 = 1;

/// Message type codes
pub mod message_type {
    pub const INVOCATION: u64 = 1;
    pub const STREAM_ITEM: u64 = 2;
    pub const COMPLETION: u64 = 3;
    pub const STREAM_INVOCATION: u64 = 4;
    pub const CANCEL_INVOCATION: u64 = 5;
    pub const PING: u64 = 6;
    pub const CLOSE: u64 = 7;
}

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("record is not terminated by the record separator")]
    Incomplete,
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Call a method on the other side. No `invocation_id` means no reply is expected.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of an invocation
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    /// Server is closing the connection
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Message types this client does not use (streaming)
    Other(u64),
}

impl HubMessage {
    pub fn invocation(invocation_id: Option<String>, target: &str, arguments: Vec<Value>) -> Self {
        HubMessage::Invocation {
            invocation_id,
            target: target.to_string(),
            arguments,
        }
    }

    /// Serialize into a single separator-terminated record
    pub fn encode(&self) -> String {
        let value = match self {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(message_type::INVOCATION));
                if let Some(id) = invocation_id {
                    obj.insert("invocationId".into(), json!(id));
                }
                obj.insert("target".into(), json!(target));
                obj.insert("arguments".into(), Value::Array(arguments.clone()));
                Value::Object(obj)
            }
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(message_type::COMPLETION));
                obj.insert("invocationId".into(), json!(invocation_id));
                if let Some(error) = error {
                    obj.insert("error".into(), json!(error));
                } else if let Some(result) = result {
                    obj.insert("result".into(), result.clone());
                }
                Value::Object(obj)
            }
            HubMessage::Ping => json!({ "type": message_type::PING }),
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(message_type::CLOSE));
                if let Some(error) = error {
                    obj.insert("error".into(), json!(error));
                }
                obj.insert("allowReconnect".into(), json!(allow_reconnect));
                Value::Object(obj)
            }
            HubMessage::Other(kind) => json!({ "type": kind }),
        };

        frame(&value)
    }

    fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let kind = value
            .get("type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingField("type"))?;

        let message = match kind {
            message_type::INVOCATION => HubMessage::Invocation {
                invocation_id: value
                    .get("invocationId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                target: value
                    .get("target")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingField("target"))?
                    .to_string(),
                arguments: match value.get("arguments") {
                    Some(Value::Array(args)) => args.clone(),
                    None | Some(Value::Null) => Vec::new(),
                    Some(_) => return Err(ProtocolError::MissingField("arguments")),
                },
            },
            message_type::COMPLETION => HubMessage::Completion {
                invocation_id: value
                    .get("invocationId")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingField("invocationId"))?
                    .to_string(),
                result: value.get("result").cloned(),
                error: value
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            message_type::PING => HubMessage::Ping,
            message_type::CLOSE => HubMessage::Close {
                error: value
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                allow_reconnect: value
                    .get("allowReconnect")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            },
            other => HubMessage::Other(other),
        };

        Ok(message)
    }
}

/// Handshake request record
pub fn handshake_request() -> String {
    frame(&json!({ "protocol": PROTOCOL_NAME, "version": PROTOCOL_VERSION }))
}

/// Split a frame into records, requiring the trailing separator
pub fn split_records(text: &str) -> Result<Vec<&str>, ProtocolError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if !text.ends_with(RECORD_SEPARATOR) {
        return Err(ProtocolError::Incomplete);
    }

    Ok(text
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.is_empty())
        .collect())
}

/// Parse the handshake response, returning any records that followed it in the same frame
pub fn parse_handshake_response(text: &str) -> Result<Vec<HubMessage>, ProtocolError> {
    let records = split_records(text)?;
    let (first, rest) = records
        .split_first()
        .ok_or(ProtocolError::Incomplete)?;

    let response: Value =
        serde_json::from_str(first).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    if let Some(error) = response.get("error").and_then(Value::as_str) {
        return Err(ProtocolError::HandshakeRejected(error.to_string()));
    }

    rest.iter().map(|record| decode_record(record)).collect()
}

/// Decode every record of a frame
pub fn decode_frame(text: &str) -> Result<Vec<HubMessage>, ProtocolError> {
    split_records(text)?
        .into_iter()
        .map(decode_record)
        .collect()
}

fn decode_record(record: &str) -> Result<HubMessage, ProtocolError> {
    let value: Value =
        serde_json::from_str(record).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    HubMessage::from_value(value)
}

fn frame(value: &Value) -> String {
    let mut text = value.to_string();
    text.push(RECORD_SEPARATOR);
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_request_is_terminated() {
        let request = handshake_request();
        assert!(request.ends_with(RECORD_SEPARATOR));
        let value: Value = serde_json::from_str(request.trim_end_matches(RECORD_SEPARATOR)).unwrap();
        assert_eq!(value, json!({"protocol": "json", "version": 1}));
    }

    #[test]
    fn test_handshake_response_with_trailing_ping() {
        let text = format!("{{}}{}{{\"type\":6}}{}", RECORD_SEPARATOR, RECORD_SEPARATOR);
        let extra = parse_handshake_response(&text).unwrap();
        assert_eq!(extra, vec![HubMessage::Ping]);
    }

    #[test]
    fn test_handshake_rejection() {
        let text = format!("{{\"error\":\"Requested protocol 'json' is not available.\"}}{}", RECORD_SEPARATOR);
        let err = parse_handshake_response(&text).unwrap_err();
        assert!(matches!(err, ProtocolError::HandshakeRejected(_)));
    }

    #[test]
    fn test_invocation_without_id_omits_field() {
        let encoded = HubMessage::invocation(None, "AddToGroup", vec![json!("user-1")]).encode();
        assert!(!encoded.contains("invocationId"));

        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(
            decoded,
            vec![HubMessage::Invocation {
                invocation_id: None,
                target: "AddToGroup".to_string(),
                arguments: vec![json!("user-1")],
            }]
        );
    }

    #[test]
    fn test_decode_multiple_records() {
        let text = format!(
            "{{\"type\":1,\"target\":\"ReceiveNotification\",\"arguments\":[{{\"id\":\"n1\"}}]}}{rs}{{\"type\":3,\"invocationId\":\"4\",\"error\":\"Method does not exist.\"}}{rs}",
            rs = RECORD_SEPARATOR
        );

        let messages = decode_frame(&text).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(
            &messages[1],
            HubMessage::Completion { invocation_id, error: Some(_), .. } if invocation_id == "4"
        ));
    }

    #[test]
    fn test_close_defaults_to_no_reconnect() {
        let text = format!("{{\"type\":7,\"error\":\"Server shutting down\"}}{}", RECORD_SEPARATOR);
        assert_eq!(
            decode_frame(&text).unwrap(),
            vec![HubMessage::Close {
                error: Some("Server shutting down".to_string()),
                allow_reconnect: false,
            }]
        );
    }

    #[test]
    fn test_unterminated_frame_is_rejected() {
        assert_eq!(decode_frame("{\"type\":6}"), Err(ProtocolError::Incomplete));
    }

    #[test]
    fn test_streaming_types_are_passed_through() {
        let text = format!("{{\"type\":2,\"invocationId\":\"1\",\"item\":5}}{}", RECORD_SEPARATOR);
        assert_eq!(decode_frame(&text).unwrap(), vec![HubMessage::Other(2)]);
    }
}
