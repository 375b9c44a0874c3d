//! In-memory thermostat used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::api::ThermostatApi;
use crate::protocol::RawDeviceState;
use crate::types::Account;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Transport,
    Malformed,
    Unauthorized,
}

impl Fault {
    fn into_error(self) -> Error {
        match self {
            Fault::Transport => Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset",
            )),
            Fault::Malformed => Error::Protocol("garbled body".into()),
            Fault::Unauthorized => Error::Unauthorized,
        }
    }
}

pub(crate) fn hall_account() -> Value {
    json!({"location": [{"name": "Home", "devices": [{"id": "dev-1", "name": "Hall"}]}]})
}

pub(crate) fn hall_state() -> Value {
    json!({"name": "Hall", "systemmode": 1, "holdheat": 68, "currenttemp": 66, "schedule": 0})
}

#[derive(Default)]
pub(crate) struct FakeThermostat {
    account: Value,
    state: Mutex<Value>,
    user_fault: Mutex<Option<Fault>>,
    read_script: Mutex<VecDeque<Option<Fault>>>,
    write_fault: Mutex<Option<Fault>>,
    read_delay: Mutex<Duration>,
    echo_hold_heat: Mutex<Option<f64>>,
    last_written: Mutex<Option<Value>>,
    user_calls: AtomicUsize,
    get_calls: AtomicUsize,
    set_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeThermostat {
    pub fn new(account: Value, state: Value) -> Arc<Self> {
        Arc::new(Self {
            account,
            state: Mutex::new(state),
            ..Default::default()
        })
    }

    pub fn fail_user(&self, fault: Fault) {
        *self.user_fault.lock().unwrap() = Some(fault);
    }

    /// Outcomes for the next device-state reads, in order. `None` succeeds.
    pub fn script_reads(&self, outcomes: impl IntoIterator<Item = Option<Fault>>) {
        self.read_script.lock().unwrap().extend(outcomes);
    }

    pub fn fail_next_write(&self, fault: Fault) {
        *self.write_fault.lock().unwrap() = Some(fault);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    /// Make writes echo this `holdheat` instead of the submitted one.
    pub fn echo_hold_heat(&self, value: f64) {
        *self.echo_hold_heat.lock().unwrap() = Some(value);
    }

    pub fn set_remote(&self, field: &str, value: Value) {
        self.state.lock().unwrap()[field] = value;
    }

    pub fn remote(&self) -> Value {
        self.state.lock().unwrap().clone()
    }

    pub fn last_written(&self) -> Option<Value> {
        self.last_written.lock().unwrap().clone()
    }

    pub fn user_calls(&self) -> usize {
        self.user_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ThermostatApi for FakeThermostat {
    async fn get_user(&self) -> Result<Account> {
        self.user_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.user_fault.lock().unwrap().take();
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }
        Ok(serde_json::from_value(self.account.clone())?)
    }

    async fn get_device_state(&self, _device_id: &str) -> Result<RawDeviceState> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight {
            counter: &self.in_flight,
        };

        let fault = self.read_script.lock().unwrap().pop_front().flatten();
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match fault {
            Some(Fault::Malformed) => RawDeviceState::from_value(json!({"name": "Hall"})),
            Some(fault) => Err(fault.into_error()),
            None => RawDeviceState::from_value(self.remote()),
        }
    }

    async fn set_device_state(
        &self,
        _device_id: &str,
        state: &RawDeviceState,
    ) -> Result<RawDeviceState> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        let fault = self.write_fault.lock().unwrap().take();
        if let Some(fault) = fault {
            return Err(fault.into_error());
        }

        let body = state.to_value();
        *self.state.lock().unwrap() = body.clone();
        *self.last_written.lock().unwrap() = Some(body.clone());

        let mut echo = body;
        if let Some(hold) = *self.echo_hold_heat.lock().unwrap() {
            echo["holdheat"] = json!(hold);
        }
        RawDeviceState::from_value(echo)
    }
}
