pub mod command;
pub mod config;

use command::Command;
use config::ManagerConfig;

use anyhow::Result;
use moka::future::Cache;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::{axis::move_options::MoveOptions, devices::Device};

type DeviceMap = Arc<RwLock<HashMap<String, Arc<dyn Device>>>>;

pub struct DeviceManager {
    devices: DeviceMap,
    cmd_sender: mpsc::Sender<Command>,
    cache: Cache<String, Value>,
    config: ManagerConfig,
}

impl DeviceManager {
    pub fn new(config: ManagerConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity as u64)
            .time_to_live(config.default_ttl)
            .support_invalidation_closures()
            .build();

        let (tx, rx) = mpsc::channel::<Command>(config.command_buffer.max(1));

        let devices: DeviceMap = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(Self::command_loop(devices.clone(), cache.clone(), rx));

        DeviceManager {
            devices,
            cmd_sender: tx,
            cache,
            config,
        }
    }

    pub async fn register_device(&self, name: impl Into<String>, device: Arc<dyn Device>) -> Result<()> {
        let name = name.into();
        info!("Registering device {}", name);
        let mut devs = self.devices.write().await;
        devs.insert(name, device);
        Ok(())
    }

    /// Removes the device and stops all of its axes.
    pub async fn unregister_device(&self, name: &str) -> Result<()> {
        let removed = self.devices.write().await.remove(name);
        if let Some(dev) = removed {
            dev.shutdown().await?;
            Self::invalidate_device(&self.cache, name);
        }
        Ok(())
    }

    pub async fn send_command(&self, cmd: Command) -> Result<()> {
        self.cmd_sender.send(cmd).await?;
        Ok(())
    }

    /// Sends the command built by `make` and waits for its answer.
    pub async fn request<F>(&self, make: F) -> Result<Value>
    where
        F: FnOnce(oneshot::Sender<Result<Value>>) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        self.send_command(make(tx)).await?;
        rx.await?
    }

    pub fn cache(&self) -> &Cache<String, Value> {
        &self.cache
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    async fn command_loop(devices: DeviceMap, cache: Cache<String, Value>, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Move {
                    device,
                    axis,
                    target,
                    wait,
                    timeout,
                    resp,
                } => {
                    Self::handle_move(&devices, &cache, &device, &axis, target, wait, timeout, resp)
                        .await;
                }
                Command::Stop { device, axis, resp } => {
                    let result = Self::handle_stop(&devices, &cache, &device, &axis).await;
                    let _ = resp.send(result);
                }
                Command::GetState { device, axis, resp } => {
                    let result = Self::handle_get_state(&devices, &cache, &device, &axis).await;
                    let _ = resp.send(result);
                }
                Command::GetPos { device, axis, resp } => {
                    let result = Self::handle_get_pos(&devices, &cache, &device, &axis).await;
                    let _ = resp.send(result);
                }
                Command::GetAttr {
                    device,
                    axis,
                    attr,
                    resp,
                } => {
                    let result =
                        Self::handle_get_attr(&devices, &cache, &device, &axis, &attr).await;
                    let _ = resp.send(result);
                }
                Command::GetAvailableAttributes { device, axis, resp } => {
                    let result =
                        Self::handle_get_available_attributes(&devices, &device, &axis).await;
                    let _ = resp.send(result);
                }
                Command::Read { device, resp } => {
                    let result = Self::handle_read(&devices, &device).await;
                    let _ = resp.send(result);
                }
                Command::ListDevices { resp } => {
                    let result = Self::handle_list_devices(&devices).await;
                    let _ = resp.send(result);
                }
                Command::ListAxes { device, resp } => {
                    let result = Self::handle_list_axes(&devices, &device).await;
                    let _ = resp.send(result);
                }
            }
        }
        debug!("Device manager command loop finished");
    }

    async fn get_device(devices: &DeviceMap, device: &str) -> Result<Arc<dyn Device>> {
        let devs = devices.read().await;
        devs.get(device)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Device not found: {}", device))
    }

    fn invalidate_device(cache: &Cache<String, Value>, device: &str) {
        let prefix = format!("{}::", device);
        if let Err(e) = cache.invalidate_entries_if(move |key, _| key.starts_with(&prefix)) {
            warn!("Failed to invalidate cache for {}: {}", device, e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_move(
        devices: &DeviceMap,
        cache: &Cache<String, Value>,
        device: &str,
        axis: &str,
        target: f64,
        wait: bool,
        timeout: Option<Duration>,
        resp: oneshot::Sender<Result<Value>>,
    ) {
        let dev = match Self::get_device(devices, device).await {
            Ok(dev) => dev,
            Err(e) => {
                let _ = resp.send(Err(e));
                return;
            }
        };

        let options = match timeout {
            Some(timeout) => MoveOptions::no_wait().with_timeout(timeout),
            None => MoveOptions::no_wait(),
        };
        let status = match dev.move_axis(axis, target, options).await {
            Ok(status) => status,
            Err(e) => {
                let _ = resp.send(Err(e.into()));
                return;
            }
        };
        Self::invalidate_device(cache, device);

        let reply = json!({
            "status": "ok",
            "action": "move",
            "device": device,
            "axis": axis,
            "target": target,
            "move_id": status.id().to_string(),
        });

        if !wait {
            let _ = resp.send(Ok(reply));
            return;
        }

        // Keep the loop free for stop requests while the move runs.
        let cache = cache.clone();
        let device = device.to_string();
        tokio::spawn(async move {
            let result = status.wait().await;
            Self::invalidate_device(&cache, &device);
            let _ = resp.send(result.map(|_| reply).map_err(anyhow::Error::from));
        });
    }

    async fn handle_stop(
        devices: &DeviceMap,
        cache: &Cache<String, Value>,
        device: &str,
        axis: &str,
    ) -> Result<Value> {
        let dev = Self::get_device(devices, device).await?;
        dev.stop(axis).await?;
        Self::invalidate_device(cache, device);
        Ok(json!({"status": "ok", "action": "stop", "device": device, "axis": axis}))
    }

    async fn handle_get_pos(
        devices: &DeviceMap,
        cache: &Cache<String, Value>,
        device: &str,
        axis: &str,
    ) -> Result<Value> {
        let cache_key = format!("{}::{}::position", device, axis);

        if let Some(val) = cache.get(&cache_key).await {
            debug!("Cache hit for {}", cache_key);
            return Ok(json!({"device": device, "axis": axis, "position": val}));
        }

        let dev = Self::get_device(devices, device).await?;
        let pos = dev.get_axis(axis)?.position()?;
        let value = json!(pos);
        cache.insert(cache_key, value.clone()).await;

        Ok(json!({"device": device, "axis": axis, "position": value}))
    }

    async fn handle_get_state(
        devices: &DeviceMap,
        cache: &Cache<String, Value>,
        device: &str,
        axis: &str,
    ) -> Result<Value> {
        let cache_key = format!("{}::{}::state", device, axis);
        if let Some(val) = cache.get(&cache_key).await {
            return Ok(json!({"device": device, "axis": axis, "state": val}));
        }
        let dev = Self::get_device(devices, device).await?;
        let state_info = dev.state(axis)?;
        let state_json = serde_json::to_value(&state_info)?;
        cache.insert(cache_key, state_json.clone()).await;
        Ok(json!({"device": device, "axis": axis, "state": state_json}))
    }

    async fn handle_get_attr(
        devices: &DeviceMap,
        cache: &Cache<String, Value>,
        device: &str,
        axis: &str,
        attr: &str,
    ) -> Result<Value> {
        let cache_key = format!("{}::{}::attr::{}", device, axis, attr);
        if let Some(val) = cache.get(&cache_key).await {
            return Ok(json!({"device": device, "axis": axis, "attribute": attr, "value": val}));
        }
        let dev = Self::get_device(devices, device).await?;
        let value = json!(dev.get_attribute(axis, attr)?);
        cache.insert(cache_key, value.clone()).await;
        Ok(json!({"device": device, "axis": axis, "attribute": attr, "value": value}))
    }

    async fn handle_get_available_attributes(
        devices: &DeviceMap,
        device: &str,
        axis: &str,
    ) -> Result<Value> {
        let dev = Self::get_device(devices, device).await?;
        let attributes = dev.available_attributes(axis)?;
        Ok(json!({"device": device, "axis": axis, "available_attributes": attributes}))
    }

    async fn handle_read(devices: &DeviceMap, device: &str) -> Result<Value> {
        let dev = Self::get_device(devices, device).await?;
        Ok(json!({
            "device": device,
            "readings": dev.read(),
            "configuration": dev.read_configuration(),
        }))
    }

    async fn handle_list_devices(devices: &DeviceMap) -> Result<Value> {
        let devs = devices.read().await;
        let mut names: Vec<String> = devs.keys().cloned().collect();
        names.sort();
        Ok(json!({"devices": names}))
    }

    async fn handle_list_axes(devices: &DeviceMap, device: &str) -> Result<Value> {
        let dev = Self::get_device(devices, device).await?;
        let axis_names: Vec<String> = dev.axes().iter().map(|ax| ax.name().to_string()).collect();
        Ok(json!({"device": device, "axes": axis_names}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        devices::spectrometer::VonHamosCrystal,
        signal::sim::SimLayer,
        sim::{config::SimMotorConfig, SimMotorDriver},
    };

    struct Fixture {
        layer: SimLayer,
        manager: DeviceManager,
        _drivers: Vec<SimMotorDriver>,
    }

    async fn fixture(ttl: Duration) -> Fixture {
        let layer = SimLayer::new();
        let config = SimMotorConfig {
            velocity: 500.0,
            tick_ms: 2,
            ..SimMotorConfig::default()
        };
        let drivers = ["Pitch", "Yaw", "Translation"]
            .iter()
            .map(|axis| {
                SimMotorDriver::start(&layer, &format!("HXX:VH:1:{}", axis), config.clone())
            })
            .collect();
        let crystal = VonHamosCrystal::new(&layer, "HXX:VH:1", "c1").unwrap();

        let manager = DeviceManager::new(ManagerConfig {
            default_ttl: ttl,
            ..ManagerConfig::default()
        });
        manager.register_device("c1", Arc::new(crystal)).await.unwrap();

        Fixture {
            layer,
            manager,
            _drivers: drivers,
        }
    }

    #[tokio::test]
    async fn test_list_devices_and_axes() {
        let fx = fixture(Duration::from_millis(100)).await;

        let devices = fx.manager.request(|resp| Command::ListDevices { resp }).await.unwrap();
        assert_eq!(devices["devices"], json!(["c1"]));

        let axes = fx
            .manager
            .request(|resp| Command::ListAxes {
                device: "c1".to_string(),
                resp,
            })
            .await
            .unwrap();
        assert_eq!(axes["axes"], json!(["c1_pitch", "c1_yaw", "c1_trans"]));
    }

    #[tokio::test]
    async fn test_waited_move_answers_after_completion() {
        let fx = fixture(Duration::from_millis(100)).await;

        let reply = fx
            .manager
            .request(|resp| Command::Move {
                device: "c1".to_string(),
                axis: "yaw".to_string(),
                target: 2.0,
                wait: true,
                timeout: Some(Duration::from_secs(5)),
                resp,
            })
            .await
            .unwrap();
        assert_eq!(reply["action"], "move");

        assert_eq!(position_of(&fx.manager, "yaw").await, json!(2.0));
    }

    async fn position_of(manager: &DeviceManager, axis: &str) -> Value {
        let reply = manager
            .request(|resp| Command::GetPos {
                device: "c1".to_string(),
                axis: axis.to_string(),
                resp,
            })
            .await
            .unwrap();
        reply["position"].clone()
    }

    #[tokio::test]
    async fn test_position_cached_until_stop() {
        let fx = fixture(Duration::from_secs(60)).await;

        assert_eq!(position_of(&fx.manager, "pitch").await, json!(0.0));
        // An IOC-side change is not seen while the entry lives.
        fx.layer.pv("HXX:VH:1:Pitch:RBV").sim_put(0.5);
        assert_eq!(position_of(&fx.manager, "pitch").await, json!(0.0));

        fx.manager
            .request(|resp| Command::Stop {
                device: "c1".to_string(),
                axis: "pitch".to_string(),
                resp,
            })
            .await
            .unwrap();
        assert_eq!(position_of(&fx.manager, "pitch").await, json!(0.5));
    }

    #[tokio::test]
    async fn test_errors_are_reported() {
        let fx = fixture(Duration::from_millis(100)).await;

        let err = fx
            .manager
            .request(|resp| Command::GetState {
                device: "nope".to_string(),
                axis: "pitch".to_string(),
                resp,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Device not found"));

        let err = fx
            .manager
            .request(|resp| Command::GetAttr {
                device: "c1".to_string(),
                axis: "pitch".to_string(),
                attr: "color".to_string(),
                resp,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown attribute"));
    }

    #[tokio::test]
    async fn test_read_and_state() {
        let fx = fixture(Duration::from_millis(100)).await;

        let read = fx
            .manager
            .request(|resp| Command::Read {
                device: "c1".to_string(),
                resp,
            })
            .await
            .unwrap();
        assert_eq!(read["readings"].as_array().unwrap().len(), 6);

        let state = fx
            .manager
            .request(|resp| Command::GetState {
                device: "c1".to_string(),
                axis: "trans".to_string(),
                resp,
            })
            .await
            .unwrap();
        assert_eq!(state["state"]["state"], "Idle");
    }
}
