use std::collections::BTreeMap;

use serde_json::Value;
use url::form_urlencoded;

use crate::domain::message::Message;
use crate::engine::EngineCodec;

use super::CodecError;

/// A decoded Ensto frame: an ordered set of key/value pairs. Keys without a
/// value (bare `k&...`) map to `None`, mirroring the Python source's
/// `split('=')` handling of flag-only fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnstoFrame {
    pub fields: BTreeMap<String, Option<String>>,
}

impl EnstoFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), Some(value.into()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_deref())
    }

    pub fn message_id(&self) -> Option<i64> {
        self.get("id").and_then(|v| v.parse().ok())
    }
}

/// Encodes a frame as `imei=...&id=...&k=v&...`, percent-encoding values, no
/// trailing newline (the transport appends the line delimiter).
pub fn encode(frame: &EnstoFrame) -> String {
    let mut parts = Vec::with_capacity(frame.fields.len());
    for (key, value) in &frame.fields {
        match value {
            Some(v) => {
                let encoded: String = form_urlencoded::byte_serialize(v.as_bytes()).collect();
                parts.push(format!("{key}={encoded}"));
            }
            None => parts.push(key.clone()),
        }
    }
    parts.join("&")
}

/// Decodes a single `k=v&k=v` line (already stripped of its newline).
pub fn decode(line: &str) -> Result<EnstoFrame, CodecError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(CodecError::Malformed("empty Ensto frame".into()));
    }
    let mut fields = BTreeMap::new();
    for part in line.split('&') {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((k, v)) => {
                let decoded: String = form_urlencoded::parse(v.as_bytes())
                    .map(|(k, _)| k.into_owned())
                    .collect();
                fields.insert(k.to_string(), Some(decoded));
            }
            None => {
                fields.insert(part.to_string(), None);
            }
        }
    }
    Ok(EnstoFrame { fields })
}

/// Adapts the key/value codec to the engine's dialect-agnostic interface.
/// `action` (the message id, numeric, e.g. "24" for heartbeat) and `imei`
/// are folded into the frame's `id`/`imei` fields; `payload`'s top-level
/// scalar entries become the remaining key/value pairs.
pub struct EnstoEngineCodec {
    pub imei: String,
}

fn flatten(payload: &Value) -> BTreeMap<String, Option<String>> {
    let mut fields = BTreeMap::new();
    if let Value::Object(map) = payload {
        for (key, value) in map {
            let rendered = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            };
            fields.insert(key.clone(), rendered);
        }
    }
    fields
}

impl EngineCodec for EnstoEngineCodec {
    fn encode_request(&self, id: &str, _action: &str, payload: &Value) -> Result<String, CodecError> {
        let mut fields = flatten(payload);
        fields.insert("imei".to_string(), Some(self.imei.clone()));
        fields.insert("id".to_string(), Some(id.to_string()));
        Ok(encode(&EnstoFrame { fields }))
    }

    fn encode_response(&self, id: &str, payload: &Value) -> Result<String, CodecError> {
        self.encode_request(id, "", payload)
    }

    fn decode(&self, frame: &str) -> Result<Message, CodecError> {
        let frame = decode(frame)?;
        let id = frame
            .get("id")
            .ok_or_else(|| CodecError::Malformed("Ensto frame missing id".into()))?
            .to_string();
        let mut payload = serde_json::Map::new();
        for (key, value) in &frame.fields {
            if key == "id" {
                continue;
            }
            payload.insert(key.clone(), value.clone().map(Value::String).unwrap_or(Value::Null));
        }
        Ok(Message::Ambiguous {
            id,
            payload: Value::Object(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_kv() {
        let frame = EnstoFrame::new()
            .with("imei", "D1")
            .with("id", "1")
            .with("vendor", "Acme Inc");
        let text = encode(&frame);
        let decoded = decode(&text).unwrap();
        assert_eq!(decoded.get("imei"), Some("D1"));
        assert_eq!(decoded.get("id"), Some("1"));
        assert_eq!(decoded.get("vendor"), Some("Acme Inc"));
        assert_eq!(decoded.message_id(), Some(1));
    }

    #[test]
    fn flag_only_key_has_no_value() {
        let decoded = decode("imei=D1&id=20&settings").unwrap();
        assert_eq!(decoded.get("imei"), Some("D1"));
        assert_eq!(decoded.fields.get("settings"), Some(&None));
    }

    #[test]
    fn rejects_empty_line() {
        assert!(decode("").is_err());
    }

    #[test]
    fn engine_codec_encodes_id_and_imei() {
        let codec = EnstoEngineCodec { imei: "D1".into() };
        let text = codec
            .encode_request("24", "24", &serde_json::json!({"time": 1}))
            .unwrap();
        let frame = decode(&text).unwrap();
        assert_eq!(frame.get("imei"), Some("D1"));
        assert_eq!(frame.get("id"), Some("24"));
    }

    #[test]
    fn engine_codec_decode_produces_ambiguous() {
        let codec = EnstoEngineCodec { imei: "D1".into() };
        let decoded = codec.decode("imei=D1&id=24&chk=1&time=2").unwrap();
        match decoded {
            Message::Ambiguous { id, payload } => {
                assert_eq!(id, "24");
                assert_eq!(payload["chk"], "1");
            }
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }
}
