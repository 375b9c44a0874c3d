use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.luxproducts.com";

pub const FIELD_NAME: &str = "name";
pub const FIELD_SYSTEM_MODE: &str = "systemmode";
pub const FIELD_HOLD_HEAT: &str = "holdheat";
pub const FIELD_CURRENT_TEMP: &str = "currenttemp";

pub const FALLBACK_DEVICE_ID: &str = "luxtherm_0";
pub const FALLBACK_DEVICE_NAME: &str = "Unnamed Lux Geo";

pub fn user_path() -> &'static str {
    "/v1/user"
}

pub fn device_state_path(device_id: &str) -> String {
    format!("/v1/devices/{device_id}/state")
}

/// Device state object exactly as the vendor returns it. Writes must send
/// the whole object back, so unknown fields are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDeviceState(Map<String, Value>);

impl RawDeviceState {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::Protocol(format!(
                "device state is not an object: {other}"
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get(FIELD_NAME).and_then(|v| v.as_str())
    }

    /// Raw `systemmode`, tolerating integer codes sent as floats. A
    /// fractional value is not a code.
    pub fn system_mode(&self) -> Option<i64> {
        let v = self.0.get(FIELD_SYSTEM_MODE)?;
        v.as_i64().or_else(|| {
            v.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        })
    }

    pub fn hold_heat(&self) -> Option<f64> {
        self.0.get(FIELD_HOLD_HEAT).and_then(|v| v.as_f64())
    }

    pub fn current_temp(&self) -> Option<f64> {
        self.0.get(FIELD_CURRENT_TEMP).and_then(|v| v.as_f64())
    }

    pub fn set_system_mode(&mut self, mode: HvacMode) {
        self.0
            .insert(FIELD_SYSTEM_MODE.to_string(), Value::from(mode.as_lux_code()));
    }

    pub fn set_hold_heat(&mut self, temperature: f64) {
        self.0
            .insert(FIELD_HOLD_HEAT.to_string(), Value::from(temperature));
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

/// Build a snapshot from a raw state. Every field must be present; a
/// `systemmode` that is present but not 1 maps to off.
pub fn snapshot_from_raw(device_id: &str, raw: &RawDeviceState) -> Result<DeviceState> {
    let name = raw
        .name()
        .ok_or_else(|| missing_field(FIELD_NAME))?
        .to_string();
    if raw.get(FIELD_SYSTEM_MODE).is_none_or(Value::is_null) {
        return Err(missing_field(FIELD_SYSTEM_MODE));
    }
    let hvac_mode = raw
        .system_mode()
        .map(HvacMode::from_lux_code)
        .unwrap_or(HvacMode::Off);
    let target_temperature = raw.hold_heat().ok_or_else(|| missing_field(FIELD_HOLD_HEAT))?;
    let current_temperature = raw
        .current_temp()
        .ok_or_else(|| missing_field(FIELD_CURRENT_TEMP))?;

    Ok(DeviceState {
        id: device_id.to_string(),
        name,
        hvac_mode,
        target_temperature,
        current_temperature,
    })
}

fn missing_field(field: &str) -> Error {
    Error::Protocol(format!("device state missing or invalid `{field}`"))
}

/// Resolve the device a coordinator will own. Strict: every level must exist.
pub fn resolve_device(account: &Account) -> Result<(String, Option<String>)> {
    let locations = match account.locations.as_deref() {
        Some(l) if !l.is_empty() => l,
        _ => return Err(Error::Setup("no locations found in account".into())),
    };
    let devices = match locations[0].devices.as_deref() {
        Some(d) if !d.is_empty() => d,
        _ => return Err(Error::Setup("no devices found in first location".into())),
    };
    match devices[0].id.as_deref() {
        Some(id) if !id.is_empty() => Ok((id.to_string(), devices[0].name.clone())),
        _ => Err(Error::Setup("first device has no id".into())),
    }
}

/// Device id and title used when creating a configuration. Lenient: falls
/// back to placeholders when the account lists no device.
pub fn device_for_entry(account: &Account) -> (String, String) {
    let device = account.first_device();
    let id = device
        .and_then(|d| d.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| FALLBACK_DEVICE_ID.to_string());
    let name = device
        .and_then(|d| d.name.clone())
        .unwrap_or_else(|| FALLBACK_DEVICE_NAME.to_string());
    (id, name)
}
