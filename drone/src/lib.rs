pub mod arbiter;
pub mod attitude;
pub mod calibration;
pub mod config;
pub mod esc;
pub mod flight_controller;
pub mod link;
pub mod log;
pub mod mixer;
pub mod mock;
pub mod pid;
pub mod polling;
pub mod sensor;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod watchdog;
