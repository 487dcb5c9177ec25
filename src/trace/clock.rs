use std::fmt;
use std::time::Instant;

/// Source of the instants stamped onto trace records.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl fmt::Debug for dyn Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Clock")
    }
}

#[cfg(test)]
pub(crate) mod manual {
    use super::Clock;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Clock that only moves when told to.
    #[derive(Debug)]
    pub struct ManualClock {
        origin: Instant,
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            let origin = Instant::now();
            Self {
                origin,
                now: Mutex::new(origin),
            }
        }

        pub fn origin(&self) -> Instant {
            self.origin
        }

        /// Moves the clock to `origin + ms` milliseconds.
        pub fn set_ms(&self, ms: u64) {
            *self.now.lock().unwrap() = self.origin + Duration::from_millis(ms);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }
}
