//! Fixed rate loop pacing

use std::{
    thread,
    time::{Duration, Instant},
};

/// Loop throttle
///
/// [Throttle::wait] returns once a full period has elapsed since its previous return,
/// polling with sleeps of 1% of the period.
#[derive(Debug, Clone)]
pub struct Throttle {
    period: Duration,
    tick: Duration,
    last: Instant,
}
impl Throttle {
    /// Creates a throttle for a loop running at `fps` iterations per second
    ///
    /// A non positive or non finite `fps` disables the throttling.
    pub fn new(fps: f64) -> Self {
        let period = Duration::try_from_secs_f64(fps.recip()).unwrap_or(Duration::ZERO);
        Self {
            period,
            tick: period / 100,
            last: Instant::now(),
        }
    }
    pub fn period(&self) -> Duration {
        self.period
    }
    /// Blocks until the loop period has elapsed
    pub fn wait(&mut self) {
        while self.last.elapsed() <= self.period {
            thread::sleep(self.tick);
        }
        self.last = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_rate() {
        let mut throttle = Throttle::new(200.);
        assert_eq!(throttle.period().as_micros(), 5000);
        let now = Instant::now();
        for _ in 0..4 {
            throttle.wait();
        }
        assert!(now.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn unthrottled() {
        assert_eq!(Throttle::new(0.).period(), Duration::ZERO);
        assert_eq!(Throttle::new(-1.).period(), Duration::ZERO);
    }
}
