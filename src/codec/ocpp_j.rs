use serde_json::{json, Value};

use crate::domain::message::Message;
use crate::engine::EngineCodec;

use super::CodecError;

const CALL: u64 = 2;
const CALL_RESULT: u64 = 3;
const CALL_ERROR: u64 = 4;

/// Encodes a [`Message`] into the OCPP-J JSON-array wire form.
pub fn encode(message: &Message) -> Result<String, CodecError> {
    let value = match message {
        Message::Req { id, action, payload } => json!([CALL, id, action, payload]),
        Message::Resp { id, payload } => json!([CALL_RESULT, id, payload]),
        Message::Err {
            id,
            code,
            description,
            details,
        } => json!([CALL_ERROR, id, code, description, details]),
    };
    serde_json::to_string(&value).map_err(CodecError::from)
}

/// Decodes a single OCPP-J text frame. Returns `None` for a recognized-but-
/// uninteresting kind tag (logged by the caller, not an error).
pub fn decode(text: &str) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let arr = value
        .as_array()
        .ok_or_else(|| CodecError::Malformed("frame is not a JSON array".into()))?;

    let kind = arr
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| CodecError::Malformed("missing message type id".into()))?;

    match kind {
        CALL => decode_call(arr),
        CALL_RESULT => decode_call_result(arr),
        CALL_ERROR => decode_call_error(arr),
        other => Err(CodecError::Malformed(format!("unknown message type {other}"))),
    }
}

fn decode_call(arr: &[Value]) -> Result<Message, CodecError> {
    if arr.len() < 4 {
        return Err(CodecError::Malformed("Call frame too short".into()));
    }
    let id = arr[1]
        .as_str()
        .ok_or_else(|| CodecError::Malformed("Call id not a string".into()))?
        .to_string();
    let action = arr[2]
        .as_str()
        .ok_or_else(|| CodecError::Malformed("Call action not a string".into()))?
        .to_string();
    Ok(Message::Req {
        id,
        action,
        payload: arr[3].clone(),
    })
}

fn decode_call_result(arr: &[Value]) -> Result<Message, CodecError> {
    if arr.len() < 3 {
        return Err(CodecError::Malformed("CallResult frame too short".into()));
    }
    let id = arr[1]
        .as_str()
        .ok_or_else(|| CodecError::Malformed("CallResult id not a string".into()))?
        .to_string();
    Ok(Message::Resp {
        id,
        payload: arr[2].clone(),
    })
}

fn decode_call_error(arr: &[Value]) -> Result<Message, CodecError> {
    if arr.len() < 4 {
        return Err(CodecError::Malformed("CallError frame too short".into()));
    }
    let id = arr[1]
        .as_str()
        .ok_or_else(|| CodecError::Malformed("CallError id not a string".into()))?
        .to_string();
    let code = arr[2]
        .as_str()
        .ok_or_else(|| CodecError::Malformed("CallError code not a string".into()))?
        .to_string();
    let description = arr[3].as_str().unwrap_or_default().to_string();
    let details = arr.get(4).cloned().unwrap_or(Value::Null);
    Ok(Message::Err {
        id,
        code,
        description,
        details,
    })
}

/// Adapts the array codec to the engine's dialect-agnostic interface.
/// Shared by both OCPP-J dialects; the id collision concerns `EngineCodec`
/// is built for never arise here since every id is a fresh uuid.
pub struct OcppJEngineCodec;

impl EngineCodec for OcppJEngineCodec {
    fn encode_request(&self, id: &str, action: &str, payload: &Value) -> Result<String, CodecError> {
        encode(&Message::Req {
            id: id.to_string(),
            action: action.to_string(),
            payload: payload.clone(),
        })
    }

    fn encode_response(&self, id: &str, payload: &Value) -> Result<String, CodecError> {
        encode(&Message::Resp {
            id: id.to_string(),
            payload: payload.clone(),
        })
    }

    fn decode(&self, frame: &str) -> Result<Message, CodecError> {
        decode(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_call() {
        let msg = Message::Req {
            id: "abc".into(),
            action: "Heartbeat".into(),
            payload: json!({}),
        };
        let text = encode(&msg).unwrap();
        let decoded = decode(&text).unwrap();
        match decoded {
            Message::Req { id, action, .. } => {
                assert_eq!(id, "abc");
                assert_eq!(action, "Heartbeat");
            }
            other => panic!("expected Req, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_call_result() {
        let msg = Message::Resp {
            id: "abc".into(),
            payload: json!({"status": "Accepted"}),
        };
        let text = encode(&msg).unwrap();
        let decoded = decode(&text).unwrap();
        match decoded {
            Message::Resp { id, payload } => {
                assert_eq!(id, "abc");
                assert_eq!(payload["status"], "Accepted");
            }
            other => panic!("expected Resp, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_call_error() {
        let msg = Message::Err {
            id: "abc".into(),
            code: "NotImplemented".into(),
            description: "nope".into(),
            details: json!({}),
        };
        let text = encode(&msg).unwrap();
        let decoded = decode(&text).unwrap();
        match decoded {
            Message::Err { id, code, .. } => {
                assert_eq!(id, "abc");
                assert_eq!(code, "NotImplemented");
            }
            other => panic!("expected Err, got {other:?}"),
        }
    }

    #[test]
    fn parse_call() {
        let decoded = decode(r#"[2,"1","BootNotification",{"foo":1}]"#).unwrap();
        assert!(matches!(decoded, Message::Req { .. }));
    }

    #[test]
    fn rejects_short_call_result() {
        let err = decode(r#"[3,"1"]"#);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_array() {
        let err = decode(r#"{"not":"an array"}"#);
        assert!(err.is_err());
    }
}
