use std::fmt;
use std::ops::BitOr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Thermostat operating mode. The vendor encodes it as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    #[default]
    Off,
    Heat,
}

impl HvacMode {
    /// Map the vendor `systemmode` code. Anything but 1 is treated as off.
    pub fn from_lux_code(code: i64) -> Self {
        match code {
            1 => HvacMode::Heat,
            _ => HvacMode::Off,
        }
    }

    pub fn as_lux_code(&self) -> i64 {
        match self {
            HvacMode::Off => 0,
            HvacMode::Heat => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TemperatureUnit {
    #[serde(rename = "°F")]
    Fahrenheit,
    #[serde(rename = "°C")]
    Celsius,
}

/// Climate feature flags as understood by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ClimateFeatures(u32);

impl ClimateFeatures {
    pub const TARGET_TEMPERATURE: Self = Self(1);
    pub const TURN_OFF: Self = Self(128);
    pub const TURN_ON: Self = Self(256);

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ClimateFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A fully formed copy of the device's remote state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub id: String,
    pub name: String,
    pub hvac_mode: HvacMode,
    pub target_temperature: f64,
    pub current_temperature: f64,
}

/// Account object returned by the vendor's "current user" call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    #[serde(default, rename = "location")]
    pub locations: Option<Vec<Location>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub devices: Option<Vec<DeviceSummary>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Account {
    /// First device of the first location, if the account has one.
    pub fn first_device(&self) -> Option<&DeviceSummary> {
        self.locations
            .as_deref()?
            .first()?
            .devices
            .as_deref()?
            .first()
    }
}

/// Opaque token bundle produced by the auth provider. Unknown fields are kept
/// so the bundle can be persisted and handed back verbatim.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBundle {
    #[serde(default)]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenBundle {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_empty()
    }
}

impl fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persisted configuration for one thermostat. Stored by the host and
/// supplied back unchanged at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    pub username: String,
    pub password: String,
    pub device_id: String,
    #[serde(alias = "title")]
    pub name: String,
    #[serde(default)]
    pub tokens: TokenBundle,
}

impl EntryData {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }
}

/// Changes between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NameChanged { name: String },
    ModeChanged { mode: HvacMode },
    TargetTemperatureChanged { temperature: f64 },
    CurrentTemperatureChanged { temperature: f64 },
}

/// Host-facing attributes of the climate entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateState {
    pub unique_id: String,
    pub name: String,
    pub hvac_mode: HvacMode,
    pub hvac_modes: Vec<HvacMode>,
    pub target_temperature: Option<f64>,
    pub target_temperature_step: f64,
    pub current_temperature: Option<f64>,
    pub temperature_unit: TemperatureUnit,
    pub supported_features: ClimateFeatures,
}
