//! Climate entity backed by the refresh coordinator.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, info};

use crate::api::ThermostatApi;
use crate::coordinator::{Coordinator, SubscriptionId};
use crate::types::*;
use crate::{Error, Result};

pub const TARGET_TEMPERATURE_STEP: f64 = 1.0;
pub const HVAC_MODES: [HvacMode; 2] = [HvacMode::Heat, HvacMode::Off];

pub type StateCallback = Arc<dyn Fn(&ClimateState) + Send + Sync>;

#[derive(Debug, Clone)]
struct Local {
    device_id: String,
    name: String,
    hvac_mode: HvacMode,
    target_temperature: Option<f64>,
    current_temperature: Option<f64>,
}

/// The thermostat as the host sees it: a mode and two temperatures.
///
/// Local fields are copies taken when the coordinator publishes a snapshot
/// or when a write is accepted. Writes are read-modify-write against the
/// vendor, which only accepts whole state objects; another writer can land
/// between the read and the write and the vendor keeps the last one.
pub struct LuxClimate {
    api: Arc<dyn ThermostatApi>,
    coordinator: Arc<Coordinator>,
    local: Mutex<Local>,
    write_lock: tokio::sync::Mutex<()>,
    subscription: Mutex<Option<SubscriptionId>>,
    state_callbacks: Mutex<Vec<StateCallback>>,
}

impl LuxClimate {
    pub fn new(
        coordinator: Arc<Coordinator>,
        device_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api: Arc::clone(coordinator.api()),
            coordinator,
            local: Mutex::new(Local {
                device_id: device_id.into(),
                name: name.into(),
                hvac_mode: HvacMode::Off,
                target_temperature: None,
                current_temperature: None,
            }),
            write_lock: tokio::sync::Mutex::new(()),
            subscription: Mutex::new(None),
            state_callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn from_entry(coordinator: Arc<Coordinator>, entry: &EntryData) -> Arc<Self> {
        Self::new(coordinator, entry.device_id.clone(), entry.name.clone())
    }

    /// Register the host's "state changed" hook.
    pub fn on_state_changed(&self, f: impl Fn(&ClimateState) + Send + Sync + 'static) {
        lock(&self.state_callbacks).push(Arc::new(f));
    }

    /// Subscribe to coordinator updates. Idempotent.
    pub fn attach(self: &Arc<Self>) {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return;
        }
        let entity: Weak<Self> = Arc::downgrade(self);
        let id = self.coordinator.subscribe(move |snapshot| {
            if let Some(entity) = entity.upgrade() {
                entity.handle_coordinator_update(snapshot);
            }
        });
        *subscription = Some(id);
    }

    pub fn detach(&self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.coordinator.unsubscribe(id);
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    /// Attach and seed the initial state, from the coordinator's snapshot when
    /// there is one, otherwise straight from the device.
    pub async fn added(self: &Arc<Self>) -> Result<()> {
        self.attach();

        if let Some(snapshot) = self.coordinator.data() {
            self.handle_coordinator_update(&snapshot);
            return Ok(());
        }

        let device_id = self.unique_id();
        let raw = self.api.get_device_state(&device_id).await?;
        {
            let mut local = lock(&self.local);
            if let Some(code) = raw.system_mode() {
                local.hvac_mode = HvacMode::from_lux_code(code);
            }
            local.target_temperature = raw.hold_heat();
            local.current_temperature = raw.current_temp();
        }
        debug!(device = %device_id, "seeded state from device");
        self.write_state();
        Ok(())
    }

    pub fn handle_coordinator_update(&self, snapshot: &DeviceState) {
        {
            let mut local = lock(&self.local);
            local.device_id = snapshot.id.clone();
            local.name = snapshot.name.clone();
            local.hvac_mode = snapshot.hvac_mode;
            local.target_temperature = Some(snapshot.target_temperature);
            local.current_temperature = Some(snapshot.current_temperature);
        }
        info!(
            device = %snapshot.id,
            mode = %snapshot.hvac_mode,
            target = snapshot.target_temperature,
            "coordinator update"
        );
        self.write_state();
    }

    pub async fn set_hvac_mode(&self, mode: HvacMode) -> Result<()> {
        let write = self.write_lock.lock().await;
        let device_id = self.unique_id();

        let mut state = self.api.get_device_state(&device_id).await?;
        state.set_system_mode(mode);
        let response = self.api.set_device_state(&device_id, &state).await?;
        info!(device = %device_id, %mode, "set mode");

        {
            let mut local = lock(&self.local);
            local.hvac_mode = mode;
            if let Some(target) = response.hold_heat() {
                local.target_temperature = Some(target);
            }
        }
        self.write_state();
        drop(write);

        self.coordinator.request_refresh().await.map(|_| ())
    }

    pub async fn set_temperature(&self, temperature: f64) -> Result<()> {
        if !temperature.is_finite() {
            return Err(Error::Protocol(format!("invalid temperature: {temperature}")));
        }
        let write = self.write_lock.lock().await;
        let device_id = self.unique_id();

        let mut state = self.api.get_device_state(&device_id).await?;
        state.set_hold_heat(temperature);
        self.api.set_device_state(&device_id, &state).await?;
        info!(device = %device_id, temperature, "set temperature");

        // The echoed holdheat lags the request, so keep the requested value.
        lock(&self.local).target_temperature = Some(temperature);
        self.write_state();
        drop(write);

        self.coordinator.request_refresh().await.map(|_| ())
    }

    pub async fn turn_on(&self) -> Result<()> {
        self.set_hvac_mode(HvacMode::Heat).await
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.set_hvac_mode(HvacMode::Off).await
    }

    pub fn unique_id(&self) -> String {
        lock(&self.local).device_id.clone()
    }

    pub fn name(&self) -> String {
        lock(&self.local).name.clone()
    }

    pub fn hvac_mode(&self) -> HvacMode {
        lock(&self.local).hvac_mode
    }

    pub fn hvac_modes(&self) -> &'static [HvacMode] {
        &HVAC_MODES
    }

    pub fn target_temperature(&self) -> Option<f64> {
        lock(&self.local).target_temperature
    }

    pub fn target_temperature_step(&self) -> f64 {
        TARGET_TEMPERATURE_STEP
    }

    pub fn current_temperature(&self) -> Option<f64> {
        lock(&self.local).current_temperature
    }

    pub fn temperature_unit(&self) -> TemperatureUnit {
        TemperatureUnit::Fahrenheit
    }

    pub fn supported_features(&self) -> ClimateFeatures {
        ClimateFeatures::TARGET_TEMPERATURE | ClimateFeatures::TURN_ON | ClimateFeatures::TURN_OFF
    }

    pub fn state(&self) -> ClimateState {
        let local = lock(&self.local).clone();
        ClimateState {
            unique_id: local.device_id,
            name: local.name,
            hvac_mode: local.hvac_mode,
            hvac_modes: HVAC_MODES.to_vec(),
            target_temperature: local.target_temperature,
            target_temperature_step: TARGET_TEMPERATURE_STEP,
            current_temperature: local.current_temperature,
            temperature_unit: self.temperature_unit(),
            supported_features: self.supported_features(),
        }
    }

    fn write_state(&self) {
        let state = self.state();
        let callbacks: Vec<StateCallback> = lock(&self.state_callbacks).clone();
        for cb in callbacks {
            cb(&state);
        }
    }
}

impl Drop for LuxClimate {
    fn drop(&mut self) {
        self.detach();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
