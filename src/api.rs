use async_trait::async_trait;

use crate::Result;
use crate::protocol::RawDeviceState;
use crate::types::{Account, Credentials, TokenBundle};

/// Operations the integration needs from the vendor cloud.
///
/// Implemented over HTTP by [`LuxClient`](crate::LuxClient); tests substitute
/// an in-memory thermostat.
#[async_trait]
pub trait ThermostatApi: Send + Sync {
    /// Fetch the account, with its locations and their devices.
    async fn get_user(&self) -> Result<Account>;

    /// Fetch the full state object of one device.
    async fn get_device_state(&self, device_id: &str) -> Result<RawDeviceState>;

    /// Replace the full state object of one device. Returns the updated
    /// object as the server echoes it.
    async fn set_device_state(
        &self,
        device_id: &str,
        state: &RawDeviceState,
    ) -> Result<RawDeviceState>;
}

/// Exchanges user credentials for a token bundle. Token acquisition and
/// refresh live outside this crate.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<TokenBundle>;
}
