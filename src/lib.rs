pub mod axis;
pub mod component;
pub mod device_manager;
pub mod devices;
pub mod dispatcher;
pub mod error;
pub mod motion;
pub mod protocol;
pub mod signal;
pub mod sim;
pub mod socket_server;
pub mod status;
pub mod units;
