/// Exactly one transport configuration is active per device.
#[derive(Debug, Clone)]
pub enum ConnectionConfig {
    WebSocket {
        server_address: String,
        subprotocols: Vec<String>,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Soap {
        endpoint: String,
        from_address: Option<String>,
    },
}
