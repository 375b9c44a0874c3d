//! Lifecycle of one configured thermostat: coordinator, entity and poller.

use std::sync::Arc;

use tracing::info;

use crate::api::ThermostatApi;
use crate::client::LuxClient;
use crate::coordinator::{Coordinator, CoordinatorBuilder, Poller};
use crate::entity::LuxClimate;
use crate::types::EntryData;
use crate::Result;

pub struct Integration {
    entry: EntryData,
    coordinator: Arc<Coordinator>,
    climate: Arc<LuxClimate>,
    poller: Option<Poller>,
}

impl Integration {
    /// Set up from a persisted entry, talking to the vendor cloud with the
    /// entry's cached tokens.
    pub async fn from_entry(entry: EntryData) -> Result<Self> {
        let client = LuxClient::from_entry(&entry).build()?;
        Self::setup(entry, Arc::new(client)).await
    }

    pub async fn setup(entry: EntryData, api: Arc<dyn ThermostatApi>) -> Result<Self> {
        Self::setup_with(entry, Coordinator::builder(api)).await
    }

    /// Resolve the device and fetch the first snapshot before the entity is
    /// created. Setup errors are fatal; a failed first refresh is
    /// [`Error::NotReady`](crate::Error::NotReady).
    pub async fn setup_with(entry: EntryData, builder: CoordinatorBuilder) -> Result<Self> {
        let coordinator = builder.build();
        coordinator.first_refresh().await?;

        let climate = LuxClimate::from_entry(Arc::clone(&coordinator), &entry);
        climate.added().await?;
        let poller = coordinator.start();

        info!(
            device = %climate.unique_id(),
            name = %climate.name(),
            interval = ?coordinator.update_interval(),
            "integration set up"
        );

        Ok(Self {
            entry,
            coordinator,
            climate,
            poller: Some(poller),
        })
    }

    pub fn entry(&self) -> &EntryData {
        &self.entry
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn climate(&self) -> &Arc<LuxClimate> {
        &self.climate
    }

    pub fn is_polling(&self) -> bool {
        self.poller.as_ref().is_some_and(Poller::is_running)
    }

    pub fn unload(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        self.climate.detach();
        info!(device = %self.entry.device_id, "integration unloaded");
    }
}
