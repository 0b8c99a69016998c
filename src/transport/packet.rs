//! Engine.IO v4 / Socket.IO v5 text framing.
//!
//! Every WebSocket text frame is one Engine.IO packet: a type digit followed
//! by its data. Engine.IO `message` packets (`4`) carry one Socket.IO packet,
//! which is again a type digit, an optional namespace terminated by `,`, an
//! optional ack id and an optional JSON body:
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   engine open
//! 2 / 3                                                     ping / pong
//! 40/voice,                                                 namespace connect
//! 40/voice,{"sid":".."}                                     connect ack
//! 44/voice,{"message":".."}                                 connect error
//! 42/voice,["audio_delta",{"audio":".."}]                   event
//! 41/voice,                                                 namespace disconnect
//! ```
//!
//! Binary attachments (Socket.IO types 5 and 6) are not used by the voice
//! protocol and are rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{VoiceError, VoiceResult};

/// Payload of the Engine.IO `open` packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

#[derive(Debug, Clone, PartialEq)]
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
    pub fn parse(text: &str) -> VoiceResult<Self> {
        let kind = text
            .chars()
            .next()
            .ok_or_else(|| VoiceError::Protocol("empty engine packet".to_string()))?;
        let body = &text[kind.len_utf8()..];

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(body)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(VoiceError::Protocol(format!("unknown engine packet type '{}'", other))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
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
    Connect { namespace: String, data: Option<Value> },
    Disconnect { namespace: String },
    Event { namespace: String, ack_id: Option<u64>, data: Value },
    Ack { namespace: String, ack_id: u64, data: Value },
    ConnectError { namespace: String, data: Option<Value> },
}

impl SocketPacket {
    /// An event packet `[name, payload?]`.
    pub fn event(namespace: &str, name: &str, payload: Option<Value>) -> Self {
        let mut items = vec![Value::String(name.to_string())];
        items.extend(payload);
        SocketPacket::Event {
            namespace: namespace.to_string(),
            ack_id: None,
            data: Value::Array(items),
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn parse(text: &str) -> VoiceResult<Self> {
        let kind = text
            .chars()
            .next()
            .filter(|c| c.is_ascii_digit())
            .ok_or_else(|| VoiceError::Protocol(format!("bad socket packet '{}'", truncate(text))))?;
        let mut rest = &text[1..];

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(end) => {
                    let namespace = &rest[..end];
                    rest = &rest[end + 1..];
                    namespace.to_string()
                }
                None => {
                    let namespace = rest;
                    rest = "";
                    namespace.to_string()
                }
            }
        } else {
            "/".to_string()
        };

        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|e| VoiceError::Protocol(format!("bad ack id: {}", e)))?,
            )
        } else {
            None
        };
        rest = &rest[digits..];

        let data = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str::<Value>(rest)?)
        };

        match kind {
            '0' => Ok(SocketPacket::Connect { namespace, data }),
            '1' => Ok(SocketPacket::Disconnect { namespace }),
            '2' => Ok(SocketPacket::Event {
                namespace,
                ack_id,
                data: data.ok_or_else(|| VoiceError::Protocol("event without data".to_string()))?,
            }),
            '3' => Ok(SocketPacket::Ack {
                namespace,
                ack_id: ack_id.ok_or_else(|| VoiceError::Protocol("ack without id".to_string()))?,
                data: data.unwrap_or_else(|| Value::Array(Vec::new())),
            }),
            '4' => Ok(SocketPacket::ConnectError { namespace, data }),
            '5' | '6' => Err(VoiceError::Protocol(
                "binary socket packets are not supported".to_string(),
            )),
            other => Err(VoiceError::Protocol(format!("unknown socket packet type '{}'", other))),
        }
    }

    pub fn encode(&self) -> String {
        let (kind, ack_id, data) = match self {
            SocketPacket::Connect { data, .. } => ('0', None, data.as_ref()),
            SocketPacket::Disconnect { .. } => ('1', None, None),
            SocketPacket::Event { ack_id, data, .. } => ('2', *ack_id, Some(data)),
            SocketPacket::Ack { ack_id, data, .. } => ('3', Some(*ack_id), Some(data)),
            SocketPacket::ConnectError { data, .. } => ('4', None, data.as_ref()),
        };

        let mut out = String::new();
        out.push(kind);
        if self.namespace() != "/" {
            out.push_str(self.namespace());
            out.push(',');
        }
        if let Some(id) = ack_id {
            out.push_str(&id.to_string());
        }
        if let Some(data) = data {
            out.push_str(&data.to_string());
        }
        out
    }

    /// Wrap in an Engine.IO message packet, ready for the socket.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// Split event data `[name, payload?]` into its parts.
pub fn event_parts(data: Value) -> VoiceResult<(String, Option<Value>)> {
    let Value::Array(mut items) = data else {
        return Err(VoiceError::Protocol("event data is not an array".to_string()));
    };
    if items.is_empty() {
        return Err(VoiceError::Protocol("event without a name".to_string()));
    }
    let payload = if items.len() > 1 { Some(items.remove(1)) } else { None };
    match items.remove(0) {
        Value::String(name) => Ok((name, payload)),
        other => Err(VoiceError::Protocol(format!("event name is not a string: {}", other))),
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(32) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_engine_open() {
        let packet = EnginePacket::parse(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#,
        )
        .unwrap();
        match packet {
            EnginePacket::Open(handshake) => {
                assert_eq!(handshake.sid, "abc");
                assert_eq!(handshake.ping_interval, 25_000);
                assert_eq!(handshake.ping_timeout, 20_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_engine_ping_pong() {
        assert_eq!(EnginePacket::parse("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(EnginePacket::parse("2hello").unwrap(), EnginePacket::Ping("hello".to_string()));
        assert!(EnginePacket::parse("").is_err());
        assert!(EnginePacket::parse("9").is_err());
    }

    #[test]
    fn test_namespace_connect_frame() {
        let connect = SocketPacket::Connect {
            namespace: "/voice".to_string(),
            data: None,
        };
        assert_eq!(connect.to_frame(), "40/voice,");
    }

    #[test]
    fn test_parse_connect_ack_and_error() {
        let ack = SocketPacket::parse(r#"0/voice,{"sid":"xyz"}"#).unwrap();
        assert_eq!(
            ack,
            SocketPacket::Connect {
                namespace: "/voice".to_string(),
                data: Some(json!({"sid": "xyz"}))
            }
        );

        let err = SocketPacket::parse(r#"4/voice,{"message":"not authorized"}"#).unwrap();
        assert!(matches!(err, SocketPacket::ConnectError { .. }));
    }

    #[test]
    fn test_event_frame_round_trip() {
        let event = SocketPacket::event("/voice", "audio_data", Some(json!({"audio": "AAAA"})));
        let frame = event.to_frame();
        assert_eq!(frame, r#"42/voice,["audio_data",{"audio":"AAAA"}]"#);

        let EnginePacket::Message(body) = EnginePacket::parse(&frame).unwrap() else {
            panic!("not a message");
        };
        let SocketPacket::Event { data, .. } = SocketPacket::parse(&body).unwrap() else {
            panic!("not an event");
        };
        let (name, payload) = event_parts(data).unwrap();
        assert_eq!(name, "audio_data");
        assert_eq!(payload, Some(json!({"audio": "AAAA"})));
    }

    #[test]
    fn test_payloadless_event() {
        let frame = SocketPacket::event("/voice", "interrupt", None).to_frame();
        assert_eq!(frame, r#"42/voice,["interrupt"]"#);
    }

    #[test]
    fn test_disconnect_and_default_namespace() {
        assert_eq!(
            SocketPacket::parse("1/voice,").unwrap(),
            SocketPacket::Disconnect {
                namespace: "/voice".to_string()
            }
        );
        assert_eq!(SocketPacket::parse("1/voice").unwrap().namespace(), "/voice");

        let event = SocketPacket::parse(r#"2["hello"]"#).unwrap();
        assert_eq!(event.namespace(), "/");
    }

    #[test]
    fn test_ack_id_is_parsed() {
        let packet = SocketPacket::parse(r#"2/voice,12["ping"]"#).unwrap();
        assert!(matches!(packet, SocketPacket::Event { ack_id: Some(12), .. }));
        assert_eq!(packet.encode(), r#"2/voice,12["ping"]"#);
    }

    #[test]
    fn test_binary_and_garbage_are_rejected() {
        assert!(SocketPacket::parse(r#"51-/voice,["audio",{"_placeholder":true,"num":0}]"#).is_err());
        assert!(SocketPacket::parse("x").is_err());
        assert!(SocketPacket::parse("2/voice,").is_err());
        assert!(event_parts(json!({"not": "an array"})).is_err());
        assert!(event_parts(json!([42])).is_err());
    }
}
