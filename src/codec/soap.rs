use serde_json::Value;

use super::CodecError;

/// A minimal SOAP 1.2 envelope carrying a JSON-shaped payload in its body.
/// OCPP-S has no inbound request pump (see DESIGN.md Open Question #3), so
/// this codec only needs to wrap outbound requests and unwrap responses.
pub fn wrap(action: &str, from_address: Option<&str>, payload: &Value) -> String {
    let header = from_address
        .map(|from| format!("<chargeBoxIdentity>{from}</chargeBoxIdentity>"))
        .unwrap_or_default();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope">
  <soap:Header>{header}</soap:Header>
  <soap:Body>
    <{action}>{body}</{action}>
  </soap:Body>
</soap:Envelope>"#,
        header = header,
        action = action,
        body = payload
    )
}

/// Extracts the JSON-shaped payload this crate's tests and the in-process
/// SOAP mock expect from a response envelope body. A production-grade SOAP
/// XML parser is out of scope; this is intentionally a thin seam (see
/// `transport::soap`).
pub fn unwrap(body: &str) -> Result<Value, CodecError> {
    serde_json::from_str(body).map_err(CodecError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrap_contains_action_and_from() {
        let xml = wrap("BootNotification", Some("CP1"), &json!({"chargePointVendor":"Acme"}));
        assert!(xml.contains("BootNotification"));
        assert!(xml.contains("CP1"));
    }
}
