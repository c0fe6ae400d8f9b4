//! JSON codec for gateway frames.
//!
//! Wire shape: `{"op": <u8>, "d": <payload>, "s": <seq|null>, "t": <name|null>}`.
//! Only dispatch frames carry `s` and `t`.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::errors::CodecError;
use crate::frame::{GatewayFrame, HelloPayload, IdentifyPayload, ResumePayload};
use crate::opcode::OpCode;

#[derive(Deserialize)]
struct RawFrame {
    op: Option<u64>,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<GatewayFrame, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(CodecError::invalid("frame", "expected a JSON object"));
    }
    let raw: RawFrame = serde_json::from_value(value)?;
    let op = raw.op.ok_or(CodecError::MissingOpcode)?;
    let op = u8::try_from(op)
        .map_err(|_| CodecError::UnknownOpcode(op))
        .and_then(OpCode::try_from)?;

    match op {
        OpCode::Dispatch => {
            let seq = raw
                .s
                .ok_or_else(|| CodecError::invalid(op.name(), "missing sequence"))?;
            let event = raw
                .t
                .ok_or_else(|| CodecError::invalid(op.name(), "missing event name"))?;
            Ok(GatewayFrame::Dispatch {
                seq,
                event,
                data: raw.d,
            })
        }
        OpCode::Heartbeat => match raw.d {
            Value::Null => Ok(GatewayFrame::Heartbeat { seq: None }),
            ref d => d
                .as_u64()
                .map(|seq| GatewayFrame::Heartbeat { seq: Some(seq) })
                .ok_or_else(|| CodecError::invalid(op.name(), "sequence is not an integer")),
        },
        OpCode::Identify => serde_json::from_value::<IdentifyPayload>(raw.d)
            .map(GatewayFrame::Identify)
            .map_err(|e| CodecError::invalid(op.name(), e.to_string())),
        OpCode::Resume => serde_json::from_value::<ResumePayload>(raw.d)
            .map(GatewayFrame::Resume)
            .map_err(|e| CodecError::invalid(op.name(), e.to_string())),
        OpCode::Reconnect => Ok(GatewayFrame::Reconnect),
        OpCode::InvalidSession => match raw.d {
            Value::Null => Ok(GatewayFrame::InvalidSession { resumable: false }),
            Value::Bool(resumable) => Ok(GatewayFrame::InvalidSession { resumable }),
            _ => Err(CodecError::invalid(op.name(), "resumable flag is not a boolean")),
        },
        OpCode::Hello => serde_json::from_value::<HelloPayload>(raw.d)
            .map(GatewayFrame::Hello)
            .map_err(|e| CodecError::invalid(op.name(), e.to_string())),
        OpCode::HeartbeatAck => Ok(GatewayFrame::HeartbeatAck),
    }
}

/// Encode one frame to text.
pub fn encode(frame: &GatewayFrame) -> Result<String, CodecError> {
    let mut map = Map::new();
    let _ = map.insert("op".into(), Value::from(frame.opcode().as_u8()));

    let d = match frame {
        GatewayFrame::Dispatch { seq, event, data } => {
            let _ = map.insert("s".into(), Value::from(*seq));
            let _ = map.insert("t".into(), Value::String(event.clone()));
            data.clone()
        }
        GatewayFrame::Heartbeat { seq } => seq.map_or(Value::Null, Value::from),
        GatewayFrame::Identify(payload) => serde_json::to_value(payload)?,
        GatewayFrame::Resume(payload) => serde_json::to_value(payload)?,
        GatewayFrame::Reconnect | GatewayFrame::HeartbeatAck => Value::Null,
        GatewayFrame::InvalidSession { resumable } => Value::Bool(*resumable),
        GatewayFrame::Hello(payload) => serde_json::to_value(payload)?,
    };
    let _ = map.insert("d".into(), d);

    Ok(serde_json::to_string(&Value::Object(map))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ConnectionProperties;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn decode_hello() {
        let frame = decode(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(
            frame,
            GatewayFrame::Hello(HelloPayload {
                heartbeat_interval: 41_250
            })
        );
    }

    #[test]
    fn decode_dispatch() {
        let frame =
            decode(r#"{"op":0,"s":42,"t":"MESSAGE_CREATE","d":{"id":"1","content":"hi"}}"#)
                .unwrap();
        assert_matches!(frame, GatewayFrame::Dispatch { seq: 42, ref event, ref data } => {
            assert_eq!(event, "MESSAGE_CREATE");
            assert_eq!(data["content"], "hi");
        });
    }

    #[test]
    fn decode_dispatch_without_sequence_is_malformed() {
        let err = decode(r#"{"op":0,"t":"READY","d":{}}"#).unwrap_err();
        assert_matches!(err, CodecError::InvalidPayload { op: "dispatch", .. });
    }

    #[test]
    fn decode_dispatch_without_name_is_malformed() {
        let err = decode(r#"{"op":0,"s":1,"d":{}}"#).unwrap_err();
        assert_matches!(err, CodecError::InvalidPayload { op: "dispatch", .. });
    }

    #[test]
    fn decode_missing_opcode() {
        let err = decode(r#"{"d":{"heartbeat_interval":1}}"#).unwrap_err();
        assert_matches!(err, CodecError::MissingOpcode);
    }

    #[test]
    fn decode_null_opcode_is_missing() {
        let err = decode(r#"{"op":null,"d":null}"#).unwrap_err();
        assert_matches!(err, CodecError::MissingOpcode);
    }

    #[test]
    fn decode_unknown_opcode() {
        assert_matches!(
            decode(r#"{"op":3,"d":null}"#).unwrap_err(),
            CodecError::UnknownOpcode(3)
        );
        assert_matches!(
            decode(r#"{"op":4096,"d":null}"#).unwrap_err(),
            CodecError::UnknownOpcode(4096)
        );
    }

    #[test]
    fn decode_invalid_json() {
        assert_matches!(decode("not json").unwrap_err(), CodecError::Json(_));
    }

    #[test]
    fn decode_non_object_is_malformed() {
        assert_matches!(
            decode("[10, {\"heartbeat_interval\": 1}]").unwrap_err(),
            CodecError::InvalidPayload { op: "frame", .. }
        );
    }

    #[test]
    fn decode_heartbeat_request() {
        assert_eq!(
            decode(r#"{"op":1,"d":null}"#).unwrap(),
            GatewayFrame::Heartbeat { seq: None }
        );
        assert_eq!(
            decode(r#"{"op":1,"d":7}"#).unwrap(),
            GatewayFrame::Heartbeat { seq: Some(7) }
        );
        assert!(decode(r#"{"op":1,"d":"seven"}"#).is_err());
    }

    #[test]
    fn decode_invalid_session_flag() {
        assert_eq!(
            decode(r#"{"op":9,"d":true}"#).unwrap(),
            GatewayFrame::InvalidSession { resumable: true }
        );
        assert_eq!(
            decode(r#"{"op":9,"d":false}"#).unwrap(),
            GatewayFrame::InvalidSession { resumable: false }
        );
        assert_eq!(
            decode(r#"{"op":9}"#).unwrap(),
            GatewayFrame::InvalidSession { resumable: false }
        );
        assert!(decode(r#"{"op":9,"d":"yes"}"#).is_err());
    }

    #[test]
    fn decode_hello_without_interval_is_malformed() {
        assert_matches!(
            decode(r#"{"op":10,"d":{}}"#).unwrap_err(),
            CodecError::InvalidPayload { op: "hello", .. }
        );
    }

    #[test]
    fn decode_reconnect_and_ack_ignore_payload() {
        assert_eq!(decode(r#"{"op":7,"d":null}"#).unwrap(), GatewayFrame::Reconnect);
        assert_eq!(decode(r#"{"op":11}"#).unwrap(), GatewayFrame::HeartbeatAck);
    }

    #[test]
    fn encode_heartbeat_carries_sequence() {
        let text = encode(&GatewayFrame::Heartbeat { seq: Some(5) }).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"op": 1, "d": 5}));

        let text = encode(&GatewayFrame::Heartbeat { seq: None }).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"op": 1, "d": null}));
    }

    #[test]
    fn encode_identify_shape() {
        let frame = GatewayFrame::Identify(IdentifyPayload {
            token: "tok".into(),
            intents: 513,
            properties: ConnectionProperties {
                os: "linux".into(),
                browser: "tether".into(),
                device: "tether".into(),
            },
            large_threshold: Some(250),
        });
        let value: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(value["op"], 2);
        assert_eq!(value["d"]["token"], "tok");
        assert_eq!(value["d"]["intents"], 513);
        assert_eq!(value["d"]["properties"]["os"], "linux");
        assert_eq!(value["d"]["large_threshold"], 250);
        assert!(value.get("s").is_none());
    }

    #[test]
    fn encode_resume_shape() {
        let frame = GatewayFrame::Resume(ResumePayload {
            token: "tok".into(),
            session_id: "abc".into(),
            seq: 12,
        });
        let value: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"op": 6, "d": {"token": "tok", "session_id": "abc", "seq": 12}})
        );
    }

    #[test]
    fn encoded_dispatch_decodes_to_same_frame() {
        let frame = GatewayFrame::Dispatch {
            seq: 3,
            event: "GUILD_CREATE".into(),
            data: json!({"id": "g1", "name": "home"}),
        };
        assert_eq!(decode(&encode(&frame).unwrap()).unwrap(), frame);
    }
}
