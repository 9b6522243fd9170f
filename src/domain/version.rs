use std::fmt;

/// Which OCPP-J dialect a device speaks. Selected from the `protocols` list
/// in device config: presence of `"ocpp2.0.1"` selects V201, otherwise V16.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppDialect {
    V16,
    V201,
}

impl OcppDialect {
    pub const ALL: &'static [OcppDialect] = &[OcppDialect::V16, OcppDialect::V201];

    pub fn subprotocols(self) -> &'static [&'static str] {
        match self {
            OcppDialect::V16 => &["ocpp1.6", "ocpp1.5"],
            OcppDialect::V201 => &["ocpp2.0.1"],
        }
    }

    pub fn from_protocol_list(protocols: &[String]) -> Self {
        if protocols.iter().any(|p| p == "ocpp2.0.1") {
            OcppDialect::V201
        } else {
            OcppDialect::V16
        }
    }
}

impl fmt::Display for OcppDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OcppDialect::V16 => write!(f, "OCPP 1.6"),
            OcppDialect::V201 => write!(f, "OCPP 2.0.1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_v201_when_listed() {
        let protocols = vec!["ocpp1.6".to_string(), "ocpp2.0.1".to_string()];
        assert_eq!(OcppDialect::from_protocol_list(&protocols), OcppDialect::V201);
    }

    #[test]
    fn defaults_to_v16() {
        let protocols = vec!["ocpp1.6".to_string()];
        assert_eq!(OcppDialect::from_protocol_list(&protocols), OcppDialect::V16);
    }
}
