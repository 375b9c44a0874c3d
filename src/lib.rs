mod api;
mod client;
mod config_flow;
mod coordinator;
mod diff;
mod entity;
mod error;
mod integration;
mod logger;
mod protocol;
#[cfg(test)]
mod testing;
mod types;

pub const DOMAIN: &str = "luxtherm";

pub use api::{Authenticator, ThermostatApi};
pub use client::{LuxClient, LuxClientBuilder};
pub use config_flow::{ConfigFlow, Connect, FlowResult, error_key, validate_input};
pub use coordinator::{
    Coordinator, CoordinatorBuilder, DEFAULT_REFRESH_TIMEOUT, DEFAULT_UPDATE_INTERVAL, Poller,
    SubscriptionId,
};
pub use entity::LuxClimate;
pub use error::{Error, Result};
pub use integration::Integration;
pub use logger::MessageLogMode;
pub use protocol::{DEFAULT_BASE_URL, RawDeviceState, snapshot_from_raw};
pub use types::*;
