use serde_json::Value;

/// Uniform shape every codec decodes into and every engine operates on,
/// regardless of dialect.
#[derive(Debug, Clone)]
pub enum Message {
    /// A request, either outbound from this device or inbound from the
    /// central system.
    Req {
        id: String,
        action: String,
        payload: Value,
    },
    /// A successful response to a request with the given id.
    Resp { id: String, payload: Value },
    /// An error response to a request with the given id.
    Err {
        id: String,
        code: String,
        description: String,
        details: Value,
    },
    /// Ensto-only: a frame whose `id` carries a numeric action/message type
    /// with no accompanying kind tag. The engine resolves it against the
    /// pending table first; if nothing matches it is treated as a
    /// server-initiated request keyed by that same id.
    Ambiguous { id: String, payload: Value },
}

impl Message {
    pub fn id(&self) -> &str {
        match self {
            Message::Req { id, .. } => id,
            Message::Resp { id, .. } => id,
            Message::Err { id, .. } => id,
            Message::Ambiguous { id, .. } => id,
        }
    }
}
