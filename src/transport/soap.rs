use reqwest::Client;

use super::{Transport, TransportError};

/// Synchronous request/response HTTP transport for OCPP-S. There is no
/// background reader task: `receive_frame` is never called in this mode
/// (see DESIGN.md Open Question #3), each call is a single POST/response.
pub struct SoapTransport {
    client: Client,
    endpoint: String,
}

impl SoapTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub async fn call(&self, envelope: &str) -> Result<String, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/soap+xml; charset=utf-8")
            .body(envelope.to_string())
            .send()
            .await?;
        let text = response.text().await?;
        Ok(text)
    }
}

#[async_trait::async_trait]
impl Transport for SoapTransport {
    async fn send_frame(&self, _frame: &str) -> Result<(), TransportError> {
        unimplemented!("SoapTransport is request/response only; use `call`")
    }

    async fn receive_frame(&self) -> Result<String, TransportError> {
        Err(TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
