use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::{thread, time::Duration};

use crate::config::SensorScale;
use crate::types::RawSample;

/// Synthetic IMU: a vehicle resting level with a slow roll wobble. Samples
/// are dropped while the consumer lags behind.
pub fn imu(sender: SyncSender<RawSample>, scale: SensorScale, period: Duration, shutdown: Arc<AtomicBool>) {
    let mut counter: f64 = 0.0;
    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(period);
        counter += 0.01;
        if counter > std::f64::consts::PI {
            counter = -std::f64::consts::PI;
        }
        match sender.try_send(wobble(counter, &scale)) {
            Ok(()) | Err(TrySendError::Full(_)) => (),
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn wobble(phase: f64, scale: &SensorScale) -> RawSample {
    let roll = 0.05 * phase.sin();
    let roll_rate = 0.05 * phase.cos();
    let counts = |value: f64, lsb: f64| (value * lsb).round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    RawSample {
        gyro: [counts(roll_rate.to_degrees(), scale.gyro_lsb_per_dps), 0, 0],
        accel: [0, counts(roll.sin(), scale.accel_lsb_per_g), counts(roll.cos(), scale.accel_lsb_per_g)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn wobble_stays_near_one_g() {
        let scale = SensorScale::default();
        for phase in [-3.0, -1.0, 0.0, 0.5, 3.0] {
            let sample = wobble(phase, &scale);
            let [_, y, z] = sample.accel.map(|a| f64::from(a) / scale.accel_lsb_per_g);
            assert!(((y * y + z * z).sqrt() - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn producer_stops_on_shutdown() {
        let (tx, rx) = sync_channel(4);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let producer = thread::spawn(move || imu(tx, SensorScale::default(), Duration::from_millis(1), flag));

        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        shutdown.store(true, Ordering::Relaxed);
        producer.join().unwrap();
    }
}
