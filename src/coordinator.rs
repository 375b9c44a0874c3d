//! Refresh coordinator for one thermostat.
//!
//! The coordinator resolves the device once, then keeps a snapshot of its
//! remote state fresh by polling. Refreshes triggered by the timer and by
//! writes are serialized so only one `get_device_state` call is ever in
//! flight; a request that queues behind a refresh which started after it
//! arrived reuses that refresh's outcome instead of issuing another call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, trace, warn};

use crate::api::ThermostatApi;
use crate::diff::snapshot_events;
use crate::protocol::{resolve_device, snapshot_from_raw};
use crate::types::*;
use crate::{DOMAIN, Error, Result};

pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

pub type SnapshotCallback = Arc<dyn Fn(&DeviceState) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(&Error) + Send + Sync>;
pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
enum Listener {
    Snapshot(SnapshotCallback),
    Failure(FailureCallback),
    Event(EventCallback),
}

type RefreshOutcome = std::result::Result<Arc<DeviceState>, String>;

pub struct CoordinatorBuilder {
    api: Arc<dyn ThermostatApi>,
    name: String,
    update_interval: Duration,
    refresh_timeout: Duration,
}

impl CoordinatorBuilder {
    pub fn new(api: Arc<dyn ThermostatApi>) -> Self {
        Self {
            api,
            name: DOMAIN.to_string(),
            update_interval: DEFAULT_UPDATE_INTERVAL,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<Coordinator> {
        Arc::new(Coordinator {
            api: self.api,
            name: self.name,
            update_interval: self.update_interval,
            refresh_timeout: self.refresh_timeout,
            device_id: OnceLock::new(),
            setup_lock: tokio::sync::Mutex::new(()),
            snapshot: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(None),
            refresh_runs: AtomicU64::new(0),
            last_update_success: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }
}

pub struct Coordinator {
    api: Arc<dyn ThermostatApi>,
    name: String,
    update_interval: Duration,
    refresh_timeout: Duration,
    device_id: OnceLock<String>,
    setup_lock: tokio::sync::Mutex<()>,
    snapshot: RwLock<Option<Arc<DeviceState>>>,
    /// Held for the whole refresh; stores the outcome of the last one.
    refresh_lock: tokio::sync::Mutex<Option<RefreshOutcome>>,
    /// Incremented when a refresh starts executing.
    refresh_runs: AtomicU64,
    last_update_success: AtomicBool,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl Coordinator {
    pub fn builder(api: Arc<dyn ThermostatApi>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(api)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api(&self) -> &Arc<dyn ThermostatApi> {
        &self.api
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Device resolved by [`initialize`](Self::initialize), if it has run.
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.get().map(String::as_str)
    }

    /// Latest good snapshot.
    pub fn data(&self) -> Option<Arc<DeviceState>> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_update_success(&self) -> bool {
        self.last_update_success.load(Ordering::Acquire)
    }

    /// Resolve the device this coordinator polls. Runs the account lookup at
    /// most once; later calls return the stored id.
    pub async fn initialize(&self) -> Result<&str> {
        if let Some(id) = self.device_id.get() {
            return Ok(id);
        }
        let _setup = self.setup_lock.lock().await;
        if let Some(id) = self.device_id.get() {
            return Ok(id);
        }

        let account = match timeout(self.refresh_timeout, self.api.get_user()).await {
            Ok(Ok(account)) => account,
            Ok(Err(e)) => {
                error!(coordinator = %self.name, error = %e, "error getting user");
                return Err(Error::Setup(format!("error getting user: {e}")));
            }
            Err(_) => {
                error!(coordinator = %self.name, "timed out getting user");
                return Err(Error::Setup("timed out getting user".into()));
            }
        };

        let (device_id, device_name) = resolve_device(&account).inspect_err(|e| {
            error!(coordinator = %self.name, error = %e, ?account, "account cannot be used");
        })?;

        info!(
            coordinator = %self.name,
            device = %device_id,
            name = device_name.as_deref().unwrap_or(""),
            "resolved device"
        );
        Ok(self.device_id.get_or_init(|| device_id))
    }

    /// Initialize, then fetch the first snapshot. A refresh failure here is
    /// reported as [`Error::NotReady`] so the host can retry setup later.
    pub async fn first_refresh(&self) -> Result<Arc<DeviceState>> {
        self.initialize().await?;
        self.refresh().await.map_err(|e| match e {
            Error::UpdateFailed(msg) => Error::NotReady(msg),
            other => other,
        })
    }

    /// Refresh the snapshot. Serialized with every other refresh.
    pub async fn refresh(&self) -> Result<Arc<DeviceState>> {
        let seen = self.refresh_runs.load(Ordering::Acquire);
        let mut last = self.refresh_lock.lock().await;

        if self.refresh_runs.load(Ordering::Acquire) != seen
            && let Some(outcome) = &*last
        {
            trace!(coordinator = %self.name, "refresh satisfied by a newer run");
            return outcome.clone().map_err(Error::UpdateFailed);
        }

        self.refresh_runs.fetch_add(1, Ordering::AcqRel);
        let result = self.run_refresh().await;
        *last = Some(match &result {
            Ok(snapshot) => Ok(Arc::clone(snapshot)),
            Err(Error::UpdateFailed(msg)) => Err(msg.clone()),
            Err(e) => Err(e.to_string()),
        });
        result
    }

    /// Refresh on behalf of a subscriber, typically after a write.
    pub async fn request_refresh(&self) -> Result<Arc<DeviceState>> {
        debug!(coordinator = %self.name, "refresh requested");
        self.refresh().await
    }

    async fn run_refresh(&self) -> Result<Arc<DeviceState>> {
        let device_id = self.device_id().ok_or(Error::NotInitialized)?;
        debug!(coordinator = %self.name, device = %device_id, "updating data");

        let fetched = timeout(self.refresh_timeout, async {
            let raw = self.api.get_device_state(device_id).await?;
            snapshot_from_raw(device_id, &raw)
        })
        .await;

        let snapshot = match fetched {
            Ok(Ok(snapshot)) => Arc::new(snapshot),
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(Error::Timeout)),
        };

        let previous = self
            .snapshot
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .replace(Arc::clone(&snapshot));
        self.last_update_success.store(true, Ordering::Release);

        debug!(
            coordinator = %self.name,
            device = %device_id,
            mode = %snapshot.hvac_mode,
            target = snapshot.target_temperature,
            current = snapshot.current_temperature,
            "got data"
        );
        self.notify(previous.as_deref(), &snapshot);
        Ok(snapshot)
    }

    fn fail(&self, cause: Error) -> Error {
        warn!(coordinator = %self.name, error = %cause, "error communicating with API");
        self.last_update_success.store(false, Ordering::Release);
        for listener in self.listeners_snapshot() {
            if let Listener::Failure(cb) = listener {
                cb(&cause);
            }
        }
        Error::UpdateFailed(cause.to_string())
    }

    fn notify(&self, previous: Option<&DeviceState>, snapshot: &DeviceState) {
        let listeners = self.listeners_snapshot();
        for listener in &listeners {
            if let Listener::Snapshot(cb) = listener {
                cb(snapshot);
            }
        }

        let events = snapshot_events(previous, snapshot);
        if events.is_empty() {
            return;
        }
        for event in &events {
            for listener in &listeners {
                if let Listener::Event(cb) = listener {
                    cb(event);
                }
            }
        }
        debug!(coordinator = %self.name, count = events.len(), "dispatched change events");
    }

    /// Clone the registry so callbacks run without the lock held.
    fn listeners_snapshot(&self) -> Vec<Listener> {
        self.lock_listeners()
            .iter()
            .map(|(_, l)| l.clone())
            .collect()
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add_listener(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, listener));
        id
    }

    /// Called with every new snapshot.
    pub fn subscribe(&self, f: impl Fn(&DeviceState) + Send + Sync + 'static) -> SubscriptionId {
        self.add_listener(Listener::Snapshot(Arc::new(f)))
    }

    /// Called with the underlying cause of every failed refresh.
    pub fn subscribe_failures(&self, f: impl Fn(&Error) + Send + Sync + 'static) -> SubscriptionId {
        self.add_listener(Listener::Failure(Arc::new(f)))
    }

    /// Called for each field that changed between consecutive snapshots.
    pub fn subscribe_events(&self, f: impl Fn(&Event) + Send + Sync + 'static) -> SubscriptionId {
        self.add_listener(Listener::Event(Arc::new(f)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Spawn the periodic refresh. The first tick fires one interval from
    /// now. The task holds only a weak reference to the coordinator.
    pub fn start(self: &Arc<Self>) -> Poller {
        let coordinator: Weak<Self> = Arc::downgrade(self);
        let period = self.update_interval;
        debug!(coordinator = %self.name, interval = ?period, "starting poller");

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                if let Err(e) = coordinator.refresh().await {
                    trace!(coordinator = %coordinator.name, error = %e, "scheduled refresh failed");
                }
            }
        });

        Poller { handle }
    }
}

/// Handle to the periodic refresh task. Dropping it stops polling.
pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        debug!("stopping poller");
        self.handle.abort();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, FakeThermostat, hall_account, hall_state};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn coordinator(fake: &Arc<FakeThermostat>) -> Arc<Coordinator> {
        Coordinator::builder(fake.clone()).build()
    }

    #[tokio::test]
    async fn setup_then_refresh_produces_snapshot() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);

        assert_eq!(c.initialize().await.unwrap(), "dev-1");
        let snap = c.refresh().await.unwrap();
        assert_eq!(
            *snap,
            DeviceState {
                id: "dev-1".into(),
                name: "Hall".into(),
                hvac_mode: HvacMode::Heat,
                target_temperature: 68.0,
                current_temperature: 66.0,
            }
        );
        assert_eq!(c.data().as_deref(), Some(&*snap));
        assert!(c.last_update_success());
    }

    #[tokio::test]
    async fn setup_without_locations_is_fatal() {
        let fake = FakeThermostat::new(json!({"location": []}), hall_state());
        let c = coordinator(&fake);

        let err = c.initialize().await.unwrap_err();
        assert!(err.is_fatal(), "{err}");
        assert_eq!(c.device_id(), None);
        assert!(matches!(c.refresh().await, Err(Error::NotInitialized)));
        assert_eq!(fake.get_calls(), 0);
    }

    #[tokio::test]
    async fn setup_transport_failure_is_fatal() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        fake.fail_user(Fault::Transport);
        let c = coordinator(&fake);
        assert!(matches!(c.initialize().await, Err(Error::Setup(_))));
    }

    #[tokio::test]
    async fn initialize_runs_once() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();
        c.initialize().await.unwrap();
        assert_eq!(fake.user_calls(), 1);
    }

    #[tokio::test]
    async fn failures_leave_snapshot_untouched() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();

        let failures = Arc::new(Mutex::new(Vec::new()));
        let failures_clone = failures.clone();
        c.subscribe_failures(move |e| failures_clone.lock().unwrap().push(e.to_string()));
        let notified = Arc::new(AtomicUsize::new(0));
        let notified_clone = notified.clone();
        c.subscribe(move |_| {
            notified_clone.fetch_add(1, Ordering::SeqCst);
        });

        let outcomes = [
            None,
            Some(Fault::Transport),
            Some(Fault::Malformed),
            None,
            Some(Fault::Unauthorized),
            Some(Fault::Transport),
        ];
        fake.script_reads(outcomes.iter().cloned());

        let mut expected = None;
        for (i, outcome) in outcomes.iter().enumerate() {
            fake.set_remote("currenttemp", json!(60 + i));
            let before = c.data();
            let result = c.refresh().await;
            match outcome {
                None => {
                    let snap = result.unwrap();
                    assert_eq!(snap.current_temperature, (60 + i) as f64);
                    expected = Some(snap);
                }
                Some(_) => {
                    assert!(matches!(result, Err(Error::UpdateFailed(_))));
                    assert_eq!(c.data(), before);
                    assert_eq!(c.data(), expected);
                    assert!(!c.last_update_success());
                }
            }
        }
        assert_eq!(notified.load(Ordering::SeqCst), 2);
        assert_eq!(failures.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refresh_times_out_and_keeps_snapshot() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.first_refresh().await.unwrap();
        let cached = c.data();

        let causes = Arc::new(Mutex::new(Vec::new()));
        let causes_clone = causes.clone();
        c.subscribe_failures(move |e| {
            causes_clone.lock().unwrap().push(matches!(e, Error::Timeout));
        });

        fake.set_read_delay(Duration::from_secs(11));
        fake.set_remote("holdheat", json!(72));
        let started = Instant::now();
        let err = c.refresh().await.unwrap_err();

        assert!(matches!(err, Error::UpdateFailed(_)));
        assert!(started.elapsed() >= DEFAULT_REFRESH_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(11));
        assert_eq!(*causes.lock().unwrap(), vec![true]);
        assert_eq!(c.data(), cached);
        assert_eq!(c.data().unwrap().target_temperature, 68.0);
        assert_eq!(fake.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_refreshes_never_overlap() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();
        fake.set_read_delay(Duration::from_millis(50));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..10 {
            let c = c.clone();
            tasks.spawn(async move {
                if i % 2 == 0 {
                    c.refresh().await
                } else {
                    c.request_refresh().await
                }
            });
        }
        while let Some(res) = tasks.join_next().await {
            assert!(res.unwrap().is_ok());
        }

        assert_eq!(fake.max_in_flight(), 1);
        assert!(fake.get_calls() <= 2, "calls: {}", fake.get_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_request_reuses_failed_outcome() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();
        fake.set_read_delay(Duration::from_millis(50));
        fake.script_reads([None, Some(Fault::Transport)]);

        let first = tokio::spawn({
            let c = c.clone();
            async move { c.refresh().await }
        });
        tokio::task::yield_now().await;
        let second = tokio::spawn({
            let c = c.clone();
            async move { c.refresh().await }
        });
        let third = tokio::spawn({
            let c = c.clone();
            async move { c.refresh().await }
        });

        assert!(first.await.unwrap().is_ok());
        let results = [second.await.unwrap(), third.await.unwrap()];
        assert!(results.iter().all(|r| matches!(r, Err(Error::UpdateFailed(_)))));
        assert_eq!(fake.get_calls(), 2);
    }

    #[tokio::test]
    async fn unsubscribed_listener_not_called() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_a = seen.clone();
        let seen_b = seen.clone();
        let a = c.subscribe(move |s| seen_a.lock().unwrap().push(("a", s.clone())));
        c.subscribe(move |s| seen_b.lock().unwrap().push(("b", s.clone())));

        c.refresh().await.unwrap();
        assert!(c.unsubscribe(a));
        assert!(!c.unsubscribe(a));
        c.refresh().await.unwrap();

        let seen = seen.lock().unwrap();
        let names: Vec<&str> = seen.iter().map(|(n, _)| *n).collect();
        assert_eq!(names.iter().filter(|n| **n == "a").count(), 1);
        assert_eq!(names.iter().filter(|n| **n == "b").count(), 2);
        assert!(seen.iter().all(|(_, s)| s.id == "dev-1" && s.name == "Hall"));
    }

    #[tokio::test]
    async fn events_follow_changes() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        c.subscribe_events(move |e| events_clone.lock().unwrap().push(e.clone()));

        c.refresh().await.unwrap();
        assert_eq!(events.lock().unwrap().len(), 4);

        fake.set_remote("systemmode", json!(0));
        c.refresh().await.unwrap();
        assert_eq!(
            events.lock().unwrap().last(),
            Some(&Event::ModeChanged { mode: HvacMode::Off })
        );
        assert_eq!(events.lock().unwrap().len(), 5);

        c.refresh().await.unwrap();
        assert_eq!(events.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn first_refresh_failure_is_not_ready() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        fake.script_reads([Some(Fault::Transport)]);
        let c = coordinator(&fake);
        assert!(matches!(c.first_refresh().await, Err(Error::NotReady(_))));
        assert_eq!(c.device_id(), Some("dev-1"));
        assert!(c.data().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poller_refreshes_on_interval_until_stopped() {
        let fake = FakeThermostat::new(hall_account(), hall_state());
        let c = coordinator(&fake);
        c.initialize().await.unwrap();

        let poller = c.start();
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(fake.get_calls(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fake.get_calls(), 1);
        tokio::time::sleep(DEFAULT_UPDATE_INTERVAL).await;
        assert_eq!(fake.get_calls(), 2);
        assert!(poller.is_running());

        poller.stop();
        tokio::time::sleep(DEFAULT_UPDATE_INTERVAL * 3).await;
        assert_eq!(fake.get_calls(), 2);
    }
}
