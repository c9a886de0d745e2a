use std::time::{Duration, Instant};

/// Supervision of the control loop
pub trait Watchdog {
    /// Arm with `timeout`, replacing any previous timeout
    fn enable(&mut self, timeout: Duration);
    fn disable(&mut self);
    fn feed(&mut self);
}

/// Watchdog checked in software: an overrun is reported when the loop feeds
/// it too late, the process is never reset.
pub struct SoftWatchdog {
    timeout: Option<Duration>,
    last_feed: Instant,
    overruns: u32,
}

impl SoftWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            last_feed: Instant::now(),
            overruns: 0,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }
}

impl Watchdog for SoftWatchdog {
    fn enable(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
        self.last_feed = Instant::now();
    }

    fn disable(&mut self) {
        self.timeout = None;
    }

    fn feed(&mut self) {
        let elapsed = self.last_feed.elapsed();
        if let Some(timeout) = self.timeout {
            if elapsed > timeout {
                self.overruns += 1;
                log::error!("Watchdog expired: {} ms since last feed, timeout {} ms", elapsed.as_millis(), timeout.as_millis());
            }
        }
        self.last_feed = Instant::now();
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Records every timeout change
    #[derive(Default)]
    pub struct RecordingWatchdog {
        pub history: Vec<Option<Duration>>,
        pub feeds: usize,
    }

    impl Watchdog for RecordingWatchdog {
        fn enable(&mut self, timeout: Duration) {
            self.history.push(Some(timeout));
        }

        fn disable(&mut self) {
            self.history.push(None);
        }

        fn feed(&mut self) {
            self.feeds += 1;
        }
    }

    #[test]
    fn late_feed_is_an_overrun() {
        let mut watchdog = SoftWatchdog::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        watchdog.feed();
        assert_eq!(watchdog.overruns(), 1);
        watchdog.feed();
        assert_eq!(watchdog.overruns(), 1);
    }

    #[test]
    fn disabled_watchdog_never_expires() {
        let mut watchdog = SoftWatchdog::new(Duration::from_millis(1));
        watchdog.disable();
        std::thread::sleep(Duration::from_millis(5));
        watchdog.feed();
        assert_eq!(watchdog.overruns(), 0);
        assert_eq!(watchdog.timeout(), None);

        watchdog.enable(Duration::from_secs(8));
        assert_eq!(watchdog.timeout(), Some(Duration::from_secs(8)));
    }
}
