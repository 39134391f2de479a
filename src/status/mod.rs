//! Completion handle for an in-flight move.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DeviceError, DeviceResult};

type StatusCallback = Box<dyn FnOnce(&MoveStatus) + Send + 'static>;

#[derive(Clone)]
pub struct MoveStatus {
    inner: Arc<StatusInner>,
}

struct StatusInner {
    id: Uuid,
    device: String,
    target: f64,
    timeout: Option<Duration>,
    outcome: watch::Sender<Option<bool>>,
    callbacks: Mutex<Vec<StatusCallback>>,
}

impl fmt::Debug for MoveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MoveStatus")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .field("target", &self.inner.target)
            .field("success", &self.success())
            .finish()
    }
}

impl MoveStatus {
    pub fn new(device: impl Into<String>, target: f64, timeout: Option<Duration>) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(StatusInner {
                id: Uuid::new_v4(),
                device: device.into(),
                target,
                timeout,
                outcome,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn device(&self) -> &str {
        &self.inner.device
    }

    pub fn target(&self) -> f64 {
        self.inner.target
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn done(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    /// `None` while the move is in flight.
    pub fn success(&self) -> Option<bool> {
        *self.inner.outcome.borrow()
    }

    pub fn same_as(&self, other: &MoveStatus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves the status. Only the first call takes effect.
    pub fn finish(&self, success: bool) -> DeviceResult<()> {
        let resolved = self.inner.outcome.send_if_modified(|outcome| {
            if outcome.is_none() {
                *outcome = Some(success);
                true
            } else {
                false
            }
        });
        if !resolved {
            return Err(DeviceError::AlreadyResolved {
                id: self.inner.id.to_string(),
            });
        }

        debug!(
            "Status {} for {} resolved (success={})",
            self.inner.id, self.inner.device, success
        );

        let callbacks: Vec<StatusCallback> = self
            .inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for callback in callbacks {
            callback(self);
        }
        Ok(())
    }

    /// Runs `callback` once the status resolves, or immediately if it already has.
    pub fn add_callback<F>(&self, callback: F)
    where
        F: FnOnce(&MoveStatus) + Send + 'static,
    {
        {
            let mut callbacks = self
                .inner
                .callbacks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if !self.done() {
                callbacks.push(Box::new(callback));
                return;
            }
        }
        callback(self);
    }

    /// Waits for resolution. A failed move is [`DeviceError::MotionFailed`];
    /// exceeding the status timeout is [`DeviceError::Timeout`] and leaves the
    /// status unresolved.
    pub async fn wait(&self) -> DeviceResult<()> {
        let mut rx = self.inner.outcome.subscribe();
        let resolved = async move {
            rx.wait_for(|outcome| outcome.is_some())
                .await
                .map(|outcome| *outcome)
                .ok()
                .flatten()
        };

        let outcome = match self.inner.timeout {
            Some(timeout) => tokio::time::timeout(timeout, resolved)
                .await
                .map_err(|_| DeviceError::Timeout {
                    name: self.inner.device.clone(),
                    timeout,
                })?,
            None => resolved.await,
        };

        match outcome {
            Some(true) => Ok(()),
            _ => Err(DeviceError::MotionFailed {
                name: self.inner.device.clone(),
            }),
        }
    }
}
