use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::types::Tunings;

const CONFIG_FILE: &str = "quadpilot.toml";
const ENV_PREFIX: &str = "QUADPILOT";

/// Gains of the rate controllers [Roll Pitch Yaw]
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct RatePid {
    pub roll: Tunings,
    pub pitch: Tunings,
    pub yaw: Tunings,
}

/// Gains of the angle controllers [Roll Pitch] and of the vertical force controller
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct AnglePid {
    pub roll: Tunings,
    pub pitch: Tunings,
    pub force: Tunings,
}

/// Built-in controller defaults, used until a calibration record is loaded
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ControlParameters {
    pub rate: RatePid,
    pub angle: AnglePid,
    pub rate_integral_limit: f64,
    pub angle_integral_limit: f64,
    pub force_integral_limit: f64,
}

impl Default for ControlParameters {
    fn default() -> Self {
        Self {
            rate: RatePid {
                roll: Tunings::new(8.0, 0.5, 0.05),
                pitch: Tunings::new(8.0, 0.5, 0.05),
                yaw: Tunings::new(10.0, 0.2, 0.0),
            },
            angle: AnglePid {
                roll: Tunings::new(4.0, 0.0, 0.0),
                pitch: Tunings::new(4.0, 0.0, 0.0),
                force: Tunings::new(0.0, 0.0, 0.0),
            },
            rate_integral_limit: 10.0,
            angle_integral_limit: 5.0,
            force_integral_limit: 10.0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EstimatorParameters {
    /// Trust put in the accelerometer to correct gyroscope drift
    pub beta: f64,
}

impl Default for EstimatorParameters {
    fn default() -> Self {
        Self {
            beta: 0.1,
        }
    }
}

/// Conversion from raw sensor counts to physical units
#[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq)]
pub struct SensorScale {
    pub gyro_lsb_per_dps: f64,
    pub accel_lsb_per_g: f64,
}

impl Default for SensorScale {
    /// +-250 deg/s and +-2 g ranges
    fn default() -> Self {
        Self {
            gyro_lsb_per_dps: 131.0,
            accel_lsb_per_g: 16384.0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FailsafeParameters {
    /// Age of the last accepted command after which the vehicle disarms
    pub staleness_ms: u64,
    /// Throttle removed on the tick an attitude session times out
    pub throttle_step: f64,
}

impl Default for FailsafeParameters {
    fn default() -> Self {
        Self {
            staleness_ms: 3000,
            throttle_step: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CalibrationParameters {
    /// Non-volatile image holding the calibration record
    pub storage: PathBuf,
    /// Samples averaged by the sensor self-calibration
    pub samples: usize,
    /// Wait for one sample during self-calibration before giving up
    pub sample_timeout_ms: u64,
    pub watchdog_ms: u64,
    /// Watchdog timeout while the self-calibration runs
    pub extended_watchdog_ms: u64,
}

impl CalibrationParameters {
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn extended_watchdog(&self) -> Duration {
        Duration::from_millis(self.extended_watchdog_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            storage: PathBuf::from("calibration.bin"),
            samples: 512,
            sample_timeout_ms: 100,
            watchdog_ms: 120,
            extended_watchdog_ms: 8000,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RuntimeParameters {
    pub tick_ms: u64,
    pub telemetry_ms: u64,
    /// UDP address the pilot link listens on
    pub link: SocketAddr,
    /// Period of the synthetic IMU when no sensor driver is linked
    pub imu_period_ms: u64,
    /// Most verbose level printed, from `error` to `trace`
    pub log_level: String,
}

impl RuntimeParameters {
    pub fn log_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level).map_err(|e| anyhow!("Invalid log level {:?}: {}", self.log_level, e))
    }
}

impl Default for RuntimeParameters {
    fn default() -> Self {
        Self {
            tick_ms: 5,
            telemetry_ms: 250,
            link: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 3333)),
            imu_period_ms: 5,
            log_level: "info".to_string(),
        }
    }
}

/// Quadpilot configuration parameters
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct QuadParameters {
    pub control: ControlParameters,
    pub estimator: EstimatorParameters,
    pub sensor: SensorScale,
    pub failsafe: FailsafeParameters,
    pub calibration: CalibrationParameters,
    pub runtime: RuntimeParameters,
}

impl QuadParameters {
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Built-in defaults, overridden by the file if present, overridden by
    /// `QUADPILOT__SECTION__KEY` environment variables
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let defaults = Config::try_from(&Self::default()).context("Cannot build default configuration")?;
        Config::builder()
            .add_source(defaults)
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Cannot read configuration file")?
            .try_deserialize()
            .context("Cannot parse configuration file")
    }

    pub fn update(&self) -> Result<()> {
        self.update_to(CONFIG_FILE)
    }

    pub fn update_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let config = toml::to_string_pretty(self)?;
        std::fs::write(path, config).context("Cannot write configuration file")
    }
}
