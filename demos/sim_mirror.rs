use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tracing::{error, info};

use beamdev::{
    device_manager::{command::Command, config::ManagerConfig, DeviceManager},
    devices::mirror::OffsetMirror,
    signal::{limits::Limits, sim::SimLayer},
    sim::{config::SimMotorConfig, SimMotorDriver},
    socket_server::{config::SocketServerConfig, SocketServer},
};

const PREFIX: &str = "MIRR:FEE1:M1H";

fn start_drivers(layer: &SimLayer) -> Vec<SimMotorDriver> {
    let pitch = SimMotorConfig {
        velocity: 50.0,
        limits: Limits::new(-300.0, 300.0),
        high_switch: Some(310.0),
        ..SimMotorConfig::default()
    };
    let gantry = SimMotorConfig {
        velocity: 5.0,
        limits: Limits::new(-20.0, 20.0),
        ..SimMotorConfig::default()
    };

    let mut drivers = vec![SimMotorDriver::start(layer, PREFIX, pitch)];
    for axis in ["X", "Y"] {
        for side in ["P", "S"] {
            drivers.push(SimMotorDriver::start(
                layer,
                &format!("STEP:M1H:{}:{}", axis, side),
                gantry.clone(),
            ));
        }
    }
    drivers
}

fn publish_piezo(layer: &SimLayer) {
    for (suffix, value) in [
        (":VRBV", 50.0),
        (":VSET", 50.0),
        (":VMAX", 100.0),
        (":VMIN", 0.0),
        (":Enable", 1.0),
        (":STOP", 0.0),
    ] {
        layer.pv(&format!("PIEZO:FEE1:M1H{}", suffix)).sim_put(value);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting beamdev simulated offset mirror");

    let layer = SimLayer::new();
    let drivers = start_drivers(&layer);
    publish_piezo(&layer);

    let manager = Arc::new(DeviceManager::new(ManagerConfig::default()));
    let mirror = Arc::new(OffsetMirror::new(&layer, PREFIX, "m1h", "611")?);
    manager.register_device("m1h", mirror).await?;

    let socket_config = SocketServerConfig::default();
    let socket_path = socket_config.socket_path.clone();
    let mut socket_server = SocketServer::new(socket_config, manager.clone());
    socket_server.start().await?;

    info!("Socket server started at {}", socket_path);
    info!("  socat - UNIX-CONNECT:{}", socket_path);

    for (axis, target) in [("pitch", 120.0), ("gan_x_p", 4.5), ("pitch", 400.0)] {
        let result = manager
            .request(|resp| Command::Move {
                device: "m1h".to_string(),
                axis: axis.to_string(),
                target,
                wait: true,
                timeout: Some(Duration::from_secs(10)),
                resp,
            })
            .await;
        match result {
            Ok(value) => info!("{} move to {}: {}", axis, target, value),
            Err(e) => error!("{} move to {} failed: {}", axis, target, e),
        }
    }

    let state = manager
        .request(|resp| Command::GetState {
            device: "m1h".to_string(),
            axis: "pitch".to_string(),
            resp,
        })
        .await?;
    info!("pitch state: {}", state);

    let reading = manager
        .request(|resp| Command::Read {
            device: "m1h".to_string(),
            resp,
        })
        .await?;
    info!("m1h reading: {}", reading);

    info!(r#"  echo '{{"type": "get_position", "device": "m1h", "axis": "pitch"}}' | socat - UNIX-CONNECT:{}"#, socket_path);
    info!("Server will run for 600 seconds for manual testing...");
    tokio::time::sleep(Duration::from_secs(600)).await;

    info!("Shutting down...");
    socket_server.shutdown().await?;
    manager.unregister_device("m1h").await?;
    for driver in &drivers {
        driver.shutdown();
    }
    info!("beamdev shutdown complete");

    Ok(())
}
