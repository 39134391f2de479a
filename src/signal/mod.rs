//! Process-variable signals as seen by devices.
//!
//! Devices only need a readable current value, change subscriptions and a
//! non-blocking write; the transport behind a [`Signal`] is supplied by a
//! [`ControlLayer`]. [`sim::SimLayer`] is the in-memory layer used by the
//! simulated IOC, tests and demos.

pub mod alarm;
pub mod limits;
pub mod sim;

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, DeviceResult};
use alarm::Alarm;
use limits::Limits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Double(f64),
    Text(String),
    Array(Vec<f64>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Array(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// One monitor event delivered to subscribers.
#[derive(Debug, Clone)]
pub struct SignalUpdate {
    pub pvname: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    pub alarm: Alarm,
}

pub type Callback = Arc<dyn Fn(&SignalUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

pub trait Signal: Send + Sync + fmt::Debug {
    fn pvname(&self) -> &str;
    fn access(&self) -> Access;
    fn connected(&self) -> bool;

    fn get(&self) -> DeviceResult<Value>;

    /// Writes `value`. With `wait` the call returns once the write completed
    /// on the server side.
    fn put(&self, value: Value, wait: bool) -> DeviceResult<()>;

    /// Registers `callback`; it also receives the current value right away
    /// when the signal is connected.
    fn subscribe(&self, callback: Callback) -> SubscriptionId;
    fn unsubscribe(&self, id: SubscriptionId);

    fn precision(&self) -> DeviceResult<u32>;
    fn alarm(&self) -> DeviceResult<Alarm>;
    fn limits(&self) -> DeviceResult<Limits>;

    fn get_f64(&self) -> DeviceResult<f64> {
        self.get()?
            .as_f64()
            .ok_or_else(|| DeviceError::TypeMismatch {
                pvname: self.pvname().to_string(),
                expected: "numeric",
            })
    }

    fn put_f64(&self, value: f64, wait: bool) -> DeviceResult<()> {
        self.put(Value::Double(value), wait)
    }

    fn check_value(&self, value: f64) -> DeviceResult<()> {
        self.limits()?.check(self.pvname(), value)
    }
}

pub trait ControlLayer: Send + Sync {
    fn connect(&self, pvname: &str, access: Access) -> Arc<dyn Signal>;
}
