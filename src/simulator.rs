//! Top-level wiring, grounded on `original_source/device/simulator.py`'s
//! `Simulator` class: owns one `Device`, drives `initialize`/`re_initialize`
//! retry loops, and runs the interactive/frequent-flow lifecycle tasks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::codec::ensto::EnstoEngineCodec;
use crate::codec::ocpp_j::OcppJEngineCodec;
use crate::config::DeviceConfig;
use crate::device::ensto::{inbound::EnstoInboundHandler, EnstoDevice};
use crate::device::ocpp_j16::OcppJ16Device;
use crate::device::ocpp_j201::OcppJ201Device;
use crate::device::ocpp_j_inbound::OcppJInboundHandler;
use crate::device::ocpp_s::OcppSDevice;
use crate::device::{ChargeOptions, Device};
use crate::domain::identity::DeviceIdentity;
use crate::domain::version::OcppDialect;
use crate::engine::ProtocolEngine;
use crate::scheduler::{FrequentFlowOptions, FrequentScheduler};
use crate::support::{ErrorBus, ReinitSignal, ShutdownSignal};
use crate::transport::soap::SoapTransport;
use crate::transport::tcp::TcpLineTransport;
use crate::transport::websocket::WebSocketTransport;
use crate::transport::TransportError;

const RETRY_DELAY: Duration = Duration::from_secs(10);
const DEFAULT_RESPONSE_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("transport connect failed: {0}")]
    Connect(#[from] TransportError),
}

/// A live connection: the device façade plus (for OCPP-J/Ensto) the engine
/// driving it, whose reader loop runs on `reader`.
struct Connected {
    device: Arc<dyn Device>,
    engine: Option<Arc<ProtocolEngine>>,
    reader: Option<JoinHandle<()>>,
}

/// Owns one charge point's full lifecycle. Holds enough of the original
/// `DeviceConfig` to rebuild the connection from scratch on
/// [`Simulator::re_initialize`].
pub struct Simulator {
    device_config: DeviceConfig,
    flow_options: ChargeOptions,
    frequent_flow_options: Vec<FrequentFlowOptions>,
    frequent_flow_enabled: bool,
    errors: ErrorBus,
    shutdown: ShutdownSignal,
    reinit: ReinitSignal,
    register_on_initialize: bool,
    connected: Mutex<Option<Connected>>,
}

impl Simulator {
    pub fn new(
        device_config: DeviceConfig,
        flow_options: ChargeOptions,
        frequent_flow_options: Vec<FrequentFlowOptions>,
        frequent_flow_enabled: bool,
    ) -> Self {
        let register_on_initialize = match &device_config {
            DeviceConfig::OcppJ { register_on_initialize, .. }
            | DeviceConfig::OcppS { register_on_initialize, .. }
            | DeviceConfig::Ensto { register_on_initialize, .. } => *register_on_initialize,
        };
        Self {
            device_config,
            flow_options,
            frequent_flow_options,
            frequent_flow_enabled,
            errors: ErrorBus::new(),
            shutdown: ShutdownSignal::new(),
            reinit: ReinitSignal::new(),
            register_on_initialize,
            connected: Mutex::new(None),
        }
    }

    fn response_timeout(&self) -> Duration {
        let seconds = match &self.device_config {
            DeviceConfig::OcppJ { response_timeout_seconds, .. }
            | DeviceConfig::OcppS { response_timeout_seconds, .. }
            | DeviceConfig::Ensto { response_timeout_seconds, .. } => {
                response_timeout_seconds.unwrap_or(DEFAULT_RESPONSE_TIMEOUT_SECONDS)
            }
        };
        Duration::from_secs(seconds)
    }

    async fn connect(&self) -> Result<Connected, SimulatorError> {
        let timeout = self.response_timeout();
        let reinitialize = self.reinit.clone();

        match &self.device_config {
            DeviceConfig::OcppJ {
                spec_identifier,
                server_address,
                protocols,
                spec_charge_box_serial_number,
                spec_charge_point_serial_number,
                spec_charge_point_model,
                spec_charge_point_vendor,
                spec_firmware_version,
                spec_iccid,
                spec_imsi,
                spec_meter_type,
                spec_meter_serial_number,
                ..
            } => {
                let dialect = OcppDialect::from_protocol_list(protocols);
                let transport = WebSocketTransport::connect(server_address, spec_identifier, dialect.subprotocols()).await?;
                let engine = Arc::new(ProtocolEngine::new(Arc::new(transport), Arc::new(OcppJEngineCodec), timeout, self.errors.clone()));

                let identity = DeviceIdentity {
                    device_id: spec_identifier.clone(),
                    vendor: spec_charge_point_vendor.clone(),
                    model: spec_charge_point_model.clone(),
                    firmware_version: spec_firmware_version.clone(),
                    charge_box_serial_number: spec_charge_box_serial_number.clone(),
                    charge_point_serial_number: spec_charge_point_serial_number.clone(),
                    iccid: spec_iccid.clone(),
                    imsi: spec_imsi.clone(),
                    meter_type: spec_meter_type.clone(),
                    meter_serial_number: spec_meter_serial_number.clone(),
                };

                let device: Arc<dyn Device> = match dialect {
                    OcppDialect::V16 => Arc::new(OcppJ16Device::new(identity, engine.clone(), self.errors.clone())),
                    OcppDialect::V201 => Arc::new(OcppJ201Device::new(identity, engine.clone(), self.errors.clone())),
                };

                engine
                    .set_inbound_handler(Arc::new(OcppJInboundHandler {
                        device: device.clone(),
                        reinitialize,
                        configuration_keys: Vec::new(),
                    }))
                    .await;

                let reader_engine = engine.clone();
                let reader = tokio::spawn(async move { reader_engine.run().await });

                Ok(Connected {
                    device,
                    engine: Some(engine),
                    reader: Some(reader),
                })
            }
            DeviceConfig::Ensto {
                spec_identifier,
                server_host,
                server_port,
                spec_vendor,
                spec_model,
                spec_sw,
                ..
            } => {
                let transport = TcpLineTransport::connect(server_host, *server_port).await?;
                let codec = Arc::new(EnstoEngineCodec { imei: spec_identifier.clone() });
                let engine = Arc::new(ProtocolEngine::new(Arc::new(transport), codec, timeout, self.errors.clone()));

                let identity = DeviceIdentity {
                    device_id: spec_identifier.clone(),
                    vendor: spec_vendor.clone(),
                    model: spec_model.clone(),
                    firmware_version: spec_sw.clone(),
                    ..Default::default()
                };
                let device: Arc<dyn Device> = Arc::new(EnstoDevice::new(identity, engine.clone(), self.errors.clone()));

                engine
                    .set_inbound_handler(Arc::new(EnstoInboundHandler {
                        device: device.clone(),
                        reinitialize,
                        server_host: server_host.clone(),
                        server_port: *server_port,
                        identifier: spec_identifier.clone(),
                    }))
                    .await;

                let reader_engine = engine.clone();
                let reader = tokio::spawn(async move { reader_engine.run().await });

                Ok(Connected {
                    device,
                    engine: Some(engine),
                    reader: Some(reader),
                })
            }
            DeviceConfig::OcppS {
                spec_identifier,
                endpoint,
                from_address,
                spec_charge_point_model,
                spec_charge_point_vendor,
                ..
            } => {
                let transport = SoapTransport::new(endpoint.clone());
                let identity = DeviceIdentity {
                    device_id: spec_identifier.clone(),
                    vendor: spec_charge_point_vendor.clone(),
                    model: spec_charge_point_model.clone(),
                    ..Default::default()
                };
                let device: Arc<dyn Device> = Arc::new(OcppSDevice::new(identity, from_address.clone(), transport, self.errors.clone()));
                Ok(Connected {
                    device,
                    engine: None,
                    reader: None,
                })
            }
        }
    }

    /// Connects and, if configured, retries `BootNotification` every 10s
    /// until accepted, per `Simulator.initialize` in the original source.
    pub async fn initialize(&self) -> Result<(), SimulatorError> {
        info!("initialize");
        let connected = self.connect().await?;
        let device = connected.device.clone();
        *self.connected.lock().await = Some(connected);

        if self.register_on_initialize {
            while !device.action_register().await {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
        Ok(())
    }

    /// Closes the current connection and rebuilds it from scratch, retrying
    /// every 10s until register + heartbeat both succeed. Invoked by the
    /// `UnknownException` error-subscriber policy (§4.6/§7) and by the
    /// Reset/"42" inbound actions via the `ReinitSignal` they request.
    pub async fn re_initialize(&self) -> Result<(), SimulatorError> {
        info!("re-initialize");
        if let Some(old) = self.connected.lock().await.take() {
            if let Some(engine) = &old.engine {
                engine.close().await;
            }
            if let Some(reader) = old.reader {
                reader.abort();
            }
        }

        loop {
            match self.connect().await {
                Ok(connected) => {
                    let device = connected.device.clone();
                    *self.connected.lock().await = Some(connected);
                    let registered = if self.register_on_initialize {
                        device.action_register().await
                    } else {
                        true
                    };
                    if registered && device.action_heart_beat().await {
                        return Ok(());
                    }
                }
                Err(err) => error!(%err, "re-initialize connect failed"),
            }
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }

    fn device(&self) -> Arc<dyn Device> {
        // `initialize` always populates `connected` before this is called.
        current_device(&self.connected)
    }

    /// Runs the frequent-flow scheduler, the error-subscriber policy, and the
    /// `ReinitSignal` watcher concurrently; per SPEC_FULL.md §4.6/§7,
    /// `UnknownException` and an explicit reinit request both drive
    /// `re_initialize` directly, mirroring `Simulator.device_on_error` in
    /// the original source. Returns once the scheduler exhausts its entries
    /// or shutdown is triggered.
    pub async fn lifecycle_start(&self) {
        let mut errors = self.errors.subscribe();
        let error_watch = async {
            loop {
                match errors.recv().await {
                    Some(event) if event.kind == crate::domain::error::ErrorKind::UnknownException => {
                        info!(%event, "unknown exception, triggering re-initialize");
                        if let Err(err) = self.re_initialize().await {
                            error!(%err, "re-initialize failed");
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        };

        let mut reinit_rx = self.reinit.subscribe();
        let reinit_watch = async {
            loop {
                match reinit_rx.recv().await {
                    Ok(()) => {
                        info!("re-initialize requested");
                        if let Err(err) = self.re_initialize().await {
                            error!(%err, "re-initialize failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        let scheduler_run = async {
            if self.frequent_flow_enabled && !self.frequent_flow_options.is_empty() {
                FrequentScheduler::new(
                    self.device(),
                    self.flow_options.clone(),
                    self.frequent_flow_options.clone(),
                    self.errors.clone(),
                    self.shutdown.clone(),
                )
                .run()
                .await;
            } else {
                self.shutdown.wait().await;
            }
        };

        tokio::select! {
            _ = error_watch => {}
            _ = reinit_watch => {}
            _ = scheduler_run => {}
        }
    }

    pub async fn end(&self) {
        self.shutdown.trigger();
        if let Some(connected) = self.connected.lock().await.take() {
            if let Some(engine) = connected.engine {
                engine.close().await;
            }
            if let Some(reader) = connected.reader {
                reader.abort();
            }
        }
    }
}

/// `connected` is only ever empty before `initialize` or after `end`; both
/// call sites in this module hold the lock briefly and never across an
/// `.await` that could race a concurrent reader, so a synchronous
/// `try_lock` is safe here and avoids making `device()` async.
fn current_device(connected: &Mutex<Option<Connected>>) -> Arc<dyn Device> {
    connected
        .try_lock()
        .ok()
        .and_then(|guard| guard.as_ref().map(|c| c.device.clone()))
        .expect("simulator used before initialize()")
}
