/// Immutable per-run identity and station metadata. Several fields are
/// optional "spec_*" passthroughs that only apply to some dialects; unset
/// fields are simply omitted from outbound payloads.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub charge_box_serial_number: Option<String>,
    pub charge_point_serial_number: Option<String>,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub meter_type: Option<String>,
    pub meter_serial_number: Option<String>,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Default::default()
        }
    }
}
