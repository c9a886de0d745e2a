use std::sync::mpsc::Receiver;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::config::SensorScale;
use crate::types::{ImuSample, RawSample, SensorOffsets};

/// Consumer side of the inertial sensor producer
pub trait SensorFeed {
    /// Newest sample produced since the previous call, older ones are dropped
    fn latest(&mut self) -> Option<RawSample>;

    /// Wait for the next sample
    fn next(&mut self, timeout: Duration) -> Option<RawSample>;
}

impl SensorFeed for Receiver<RawSample> {
    fn latest(&mut self) -> Option<RawSample> {
        self.try_iter().last()
    }

    fn next(&mut self, timeout: Duration) -> Option<RawSample> {
        self.recv_timeout(timeout).ok()
    }
}

impl SensorScale {
    /// Remove offsets and convert to rad/s and g
    pub fn convert(&self, raw: &RawSample, offsets: &SensorOffsets) -> ImuSample {
        let corrected = |value: i16, offset: i16| f64::from(value) - f64::from(offset);
        ImuSample {
            gyro: [0, 1, 2].map(|i| (corrected(raw.gyro[i], offsets.gyro[i]) / self.gyro_lsb_per_dps).to_radians()),
            accel: [0, 1, 2].map(|i| corrected(raw.accel[i], offsets.accel[i]) / self.accel_lsb_per_g),
        }
    }
}

/// Average `samples` readings of a vehicle resting level. The gyroscope
/// offset is its mean rate, the accelerometer offset its mean minus 1 g on Z.
pub fn self_calibrate(
    feed: &mut dyn SensorFeed,
    samples: usize,
    scale: &SensorScale,
    timeout: Duration,
) -> Result<SensorOffsets> {
    if samples == 0 {
        bail!("Self-calibration needs at least one sample");
    }
    // Only average samples taken after the request
    feed.latest();

    let mut gyro = [0i64; 3];
    let mut accel = [0i64; 3];
    for taken in 0..samples {
        let sample = feed
            .next(timeout)
            .ok_or_else(|| anyhow!("Sensor stopped after {} of {} calibration samples", taken, samples))?;
        for i in 0..3 {
            gyro[i] += i64::from(sample.gyro[i]);
            accel[i] += i64::from(sample.accel[i]);
        }
    }

    let count = samples as i64;
    let one_g = scale.accel_lsb_per_g.round() as i64;
    let mean = |sum: i64| saturate(sum / count);
    Ok(SensorOffsets {
        gyro: gyro.map(mean),
        accel: [mean(accel[0]), mean(accel[1]), saturate(accel[2] / count - one_g)],
    })
}

fn saturate(value: i64) -> i16 {
    value.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}
