//! YAML configuration loading, grounded on
//! `original_source/runtime/config_file_reader.py` and `config_parser.py`.
//! Parsing is two-stage: [`load_yaml_document`] is a pure deserialize, then
//! [`resolve`] looks up the named simulation and its device.

use serde::Deserialize;
use thiserror::Error;

use crate::scheduler::{Flow, FrequentFlowOptions};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Simulation not found: {0}")]
    SimulationNotFound(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DeviceConfig {
    #[serde(rename = "ocpp-j")]
    OcppJ {
        name: String,
        spec_identifier: String,
        server_address: String,
        #[serde(default)]
        protocols: Vec<String>,
        #[serde(default)]
        spec_charge_box_serial_number: Option<String>,
        #[serde(default)]
        spec_charge_point_serial_number: Option<String>,
        #[serde(default)]
        spec_charge_point_model: Option<String>,
        #[serde(default)]
        spec_charge_point_vendor: Option<String>,
        #[serde(default)]
        spec_firmware_version: Option<String>,
        #[serde(default)]
        spec_iccid: Option<String>,
        #[serde(default)]
        spec_imsi: Option<String>,
        #[serde(default)]
        spec_meter_type: Option<String>,
        #[serde(default)]
        spec_meter_serial_number: Option<String>,
        #[serde(default = "default_true")]
        register_on_initialize: bool,
        #[serde(default = "default_true")]
        error_exit: bool,
        #[serde(default)]
        response_timeout_seconds: Option<u64>,
    },
    #[serde(rename = "ocpp-s")]
    OcppS {
        name: String,
        spec_identifier: String,
        endpoint: String,
        #[serde(default)]
        from_address: Option<String>,
        #[serde(default)]
        spec_charge_point_model: Option<String>,
        #[serde(default)]
        spec_charge_point_vendor: Option<String>,
        #[serde(default = "default_true")]
        register_on_initialize: bool,
        #[serde(default = "default_true")]
        error_exit: bool,
        #[serde(default)]
        response_timeout_seconds: Option<u64>,
    },
    Ensto {
        name: String,
        spec_identifier: String,
        server_host: String,
        server_port: u16,
        #[serde(default)]
        spec_vendor: Option<String>,
        #[serde(default)]
        spec_model: Option<String>,
        #[serde(default)]
        spec_sw: Option<String>,
        #[serde(default = "default_true")]
        register_on_initialize: bool,
        #[serde(default = "default_true")]
        error_exit: bool,
        #[serde(default)]
        response_timeout_seconds: Option<u64>,
    },
}

impl DeviceConfig {
    pub fn name(&self) -> &str {
        match self {
            DeviceConfig::OcppJ { name, .. } => name,
            DeviceConfig::OcppS { name, .. } => name,
            DeviceConfig::Ensto { name, .. } => name,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFrequentFlow {
    pub flow: Flow,
    #[serde(default)]
    pub delay_seconds: i64,
    #[serde(default = "default_unlimited")]
    pub count: i64,
}

fn default_unlimited() -> i64 {
    -1
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    pub name: String,
    pub device_name: String,
    #[serde(default)]
    pub flow_charge_options: serde_yaml::Value,
    #[serde(default)]
    pub frequent_flow_enabled: bool,
    #[serde(default)]
    pub is_interactive: bool,
    #[serde(default)]
    pub frequent_flows: Vec<RawFrequentFlow>,
}

impl SimulationConfig {
    pub fn frequent_flow_options(&self) -> Vec<FrequentFlowOptions> {
        self.frequent_flows
            .iter()
            .map(|f| FrequentFlowOptions::new(f.flow, f.delay_seconds, f.count))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub simulations: Vec<SimulationConfig>,
}

/// Pure YAML parse, no lookups. Mirrors `ConfigFileReader.__file_load`.
pub fn load_yaml_document(path: &str) -> Result<RawConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_string(),
        source,
    })
}

/// Looks up `simulation_name` and its named device, per
/// `ConfigFileReader.device_find`/`simulator_find`.
pub fn resolve(raw: &RawConfigFile, simulation_name: &str) -> Result<(DeviceConfig, SimulationConfig), ConfigError> {
    let simulation = raw
        .simulations
        .iter()
        .find(|s| s.name == simulation_name)
        .ok_or_else(|| ConfigError::SimulationNotFound(simulation_name.to_string()))?
        .clone();
    let device = raw
        .devices
        .iter()
        .find(|d| d.name() == simulation.device_name)
        .ok_or_else(|| ConfigError::DeviceNotFound(simulation.device_name.clone()))?
        .clone();
    Ok((device, simulation))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
devices:
  - type: ocpp-j
    name: cp1
    spec_identifier: CP001
    server_address: ws://localhost:9000
    protocols: ["ocpp1.6"]
simulations:
  - name: sim1
    device_name: cp1
    flow_charge_options: {}
    frequent_flow_enabled: true
    is_interactive: false
    frequent_flows:
      - flow: Heartbeat
        delay_seconds: 30
        count: -1
"#;

    #[test]
    fn resolves_named_simulation_and_device() {
        let raw: RawConfigFile = serde_yaml::from_str(DOCUMENT).unwrap();
        let (device, simulation) = resolve(&raw, "sim1").unwrap();
        assert_eq!(device.name(), "cp1");
        assert_eq!(simulation.device_name, "cp1");
        assert_eq!(simulation.frequent_flow_options().len(), 1);
    }

    #[test]
    fn missing_simulation_is_descriptive() {
        let raw: RawConfigFile = serde_yaml::from_str(DOCUMENT).unwrap();
        let err = resolve(&raw, "nope").unwrap_err();
        assert!(matches!(err, ConfigError::SimulationNotFound(name) if name == "nope"));
    }
}
