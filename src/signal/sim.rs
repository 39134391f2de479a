//! In-memory control layer.
//!
//! A [`SimPv`] plays the server side of one PV: it stays disconnected until the
//! simulated IOC writes a first value with [`SimPv::sim_put`]. Clients get
//! [`SimSignal`] handles through [`SimLayer::connect`]; handles of the same PV
//! share one [`SimPv`]. When the layer owns a [`Dispatcher`], monitor callbacks
//! run on its `monitor` worker, otherwise inline in the writer's context.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::{
    alarm::Alarm, limits::Limits, Access, Callback, ControlLayer, Signal, SignalUpdate,
    SubscriptionId, Value,
};
use crate::{
    dispatcher::{Dispatcher, MONITOR_WORKER},
    error::{DeviceError, DeviceResult},
};

const DEFAULT_PRECISION: u32 = 3;

#[derive(Clone, Default)]
pub struct SimLayer {
    inner: Arc<LayerInner>,
}

#[derive(Default)]
struct LayerInner {
    pvs: Mutex<HashMap<String, Arc<SimPv>>>,
    dispatcher: Option<Dispatcher>,
}

impl SimLayer {
    /// Layer delivering callbacks inline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer delivering callbacks on the dispatcher's monitor worker.
    pub fn with_dispatcher(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(LayerInner {
                pvs: Mutex::new(HashMap::new()),
                dispatcher: Some(dispatcher),
            }),
        }
    }

    /// Server side of `pvname`, created on first use.
    pub fn pv(&self, pvname: &str) -> Arc<SimPv> {
        let mut pvs = self.inner.pvs.lock().unwrap_or_else(PoisonError::into_inner);
        pvs.entry(pvname.to_string())
            .or_insert_with(|| Arc::new(SimPv::new(pvname, self.inner.dispatcher.clone())))
            .clone()
    }

    pub fn pv_names(&self) -> Vec<String> {
        let pvs = self.inner.pvs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = pvs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ControlLayer for SimLayer {
    fn connect(&self, pvname: &str, access: Access) -> Arc<dyn Signal> {
        Arc::new(SimSignal {
            pv: self.pv(pvname),
            access,
        })
    }
}

struct PvState {
    value: Option<Value>,
    timestamp: DateTime<Utc>,
    alarm: Alarm,
    limits: Limits,
    precision: u32,
    online: bool,
}

pub struct SimPv {
    pvname: String,
    state: Mutex<PvState>,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
    client_puts: AtomicUsize,
    dispatcher: Option<Dispatcher>,
}

impl std::fmt::Debug for SimPv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimPv")
            .field("pvname", &self.pvname)
            .field("value", &self.value())
            .finish()
    }
}

impl SimPv {
    fn new(pvname: &str, dispatcher: Option<Dispatcher>) -> Self {
        Self {
            pvname: pvname.to_string(),
            state: Mutex::new(PvState {
                value: None,
                timestamp: Utc::now(),
                alarm: Alarm::NONE,
                limits: Limits::unlimited(),
                precision: DEFAULT_PRECISION,
                online: true,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            client_puts: AtomicUsize::new(0),
            dispatcher,
        }
    }

    pub fn pvname(&self) -> &str {
        &self.pvname
    }

    pub fn value(&self) -> Option<Value> {
        self.lock_state().value.clone()
    }

    pub fn value_f64(&self) -> Option<f64> {
        self.value().and_then(|v| v.as_f64())
    }

    /// Number of writes received from clients.
    pub fn client_puts(&self) -> usize {
        self.client_puts.load(Ordering::SeqCst)
    }

    /// Server-side write; bypasses access checks and always notifies.
    pub fn sim_put(&self, value: impl Into<Value>) {
        let update = {
            let mut state = self.lock_state();
            state.value = Some(value.into());
            state.timestamp = Utc::now();
            self.update_from(&state)
        };
        if let Some(update) = update {
            self.notify(update);
        }
    }

    pub fn set_alarm(&self, alarm: Alarm) {
        let update = {
            let mut state = self.lock_state();
            state.alarm = alarm;
            self.update_from(&state)
        };
        if let Some(update) = update {
            self.notify(update);
        }
    }

    pub fn set_limits(&self, limits: Limits) {
        self.lock_state().limits = limits;
    }

    pub fn set_precision(&self, precision: u32) {
        self.lock_state().precision = precision;
    }

    /// Takes the PV off the network without forgetting its value.
    pub fn set_online(&self, online: bool) {
        let update = {
            let mut state = self.lock_state();
            state.online = online;
            self.update_from(&state)
        };
        if let Some(update) = update {
            self.notify(update);
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_from(&self, state: &PvState) -> Option<SignalUpdate> {
        if !state.online {
            return None;
        }
        state.value.as_ref().map(|value| SignalUpdate {
            pvname: self.pvname.clone(),
            value: value.clone(),
            timestamp: state.timestamp,
            alarm: state.alarm,
        })
    }

    fn connected(&self) -> bool {
        let state = self.lock_state();
        state.online && state.value.is_some()
    }

    fn read<T>(&self, f: impl FnOnce(&PvState) -> T) -> DeviceResult<T> {
        let state = self.lock_state();
        if state.online && state.value.is_some() {
            Ok(f(&state))
        } else {
            Err(DeviceError::disconnected(&self.pvname))
        }
    }

    fn client_put(&self, value: Value) -> DeviceResult<()> {
        if !self.connected() {
            return Err(DeviceError::disconnected(&self.pvname));
        }
        self.client_puts.fetch_add(1, Ordering::SeqCst);
        debug!("put {} <- {:?}", self.pvname, value);
        self.sim_put(value);
        Ok(())
    }

    fn subscribe(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, callback.clone()));

        let initial = {
            let state = self.lock_state();
            self.update_from(&state)
        };
        if let Some(update) = initial {
            self.deliver(callback, update);
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(sub, _)| *sub != id);
    }

    fn notify(&self, update: SignalUpdate) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            self.deliver(callback, update.clone());
        }
    }

    fn deliver(&self, callback: Callback, update: SignalUpdate) {
        match &self.dispatcher {
            Some(dispatcher) => dispatcher.submit(MONITOR_WORKER, move || callback(&update)),
            None => callback(&update),
        }
    }
}

/// Client handle on a [`SimPv`].
#[derive(Debug)]
pub struct SimSignal {
    pv: Arc<SimPv>,
    access: Access,
}

impl Signal for SimSignal {
    fn pvname(&self) -> &str {
        &self.pv.pvname
    }

    fn access(&self) -> Access {
        self.access
    }

    fn connected(&self) -> bool {
        self.pv.connected()
    }

    fn get(&self) -> DeviceResult<Value> {
        self.pv
            .read(|state| state.value.clone())?
            .ok_or_else(|| DeviceError::disconnected(&self.pv.pvname))
    }

    fn put(&self, value: Value, _wait: bool) -> DeviceResult<()> {
        if self.access == Access::ReadOnly {
            return Err(DeviceError::ReadOnly {
                pvname: self.pv.pvname.clone(),
            });
        }
        // Simulated writes complete immediately, so `wait` has nothing to wait for.
        self.pv.client_put(value)
    }

    fn subscribe(&self, callback: Callback) -> SubscriptionId {
        self.pv.subscribe(callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.pv.unsubscribe(id)
    }

    fn precision(&self) -> DeviceResult<u32> {
        self.pv.read(|state| state.precision)
    }

    fn alarm(&self) -> DeviceResult<Alarm> {
        self.pv.read(|state| state.alarm)
    }

    fn limits(&self) -> DeviceResult<Limits> {
        self.pv.read(|state| state.limits)
    }
}
