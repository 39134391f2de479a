use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum Command {
    Move {
        device: String,
        axis: String,
        target: f64,
        /// Answer only once the move completed.
        wait: bool,
        timeout: Option<Duration>,
        resp: oneshot::Sender<Result<Value>>,
    },
    Stop {
        device: String,
        axis: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    GetState {
        device: String,
        axis: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    GetPos {
        device: String,
        axis: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    GetAttr {
        device: String,
        axis: String,
        attr: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    GetAvailableAttributes {
        device: String,
        axis: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    Read {
        device: String,
        resp: oneshot::Sender<Result<Value>>,
    },
    ListDevices {
        resp: oneshot::Sender<Result<Value>>,
    },
    ListAxes {
        device: String,
        resp: oneshot::Sender<Result<Value>>,
    },
}
