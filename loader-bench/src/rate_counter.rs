use std::time::{Duration, Instant};

/// Counts events and reports the rate per second once per interval.
#[derive(Debug)]
pub struct RateCounter {
    count: f64,
    instant: Instant,
    interval: Duration,
}

impl RateCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            count: 0.0,
            instant: Instant::now(),
            interval,
        }
    }

    pub fn with_second_interval() -> Self {
        Self::new(Duration::from_secs(1))
    }

    pub fn add(&mut self, addition: f64) {
        self.count += addition;
    }

    /// The rate since the last report if the interval has passed.
    pub fn rate(&mut self) -> Option<f64> {
        let elapsed = self.instant.elapsed();
        if elapsed >= self.interval {
            let rate = self.count / elapsed.as_secs_f64();
            self.count = 0.0;
            self.instant = Instant::now();
            Some(rate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_counter_test() {
        let mut counter = RateCounter::new(Duration::from_secs(3600));
        counter.add(5.0);
        assert!(counter.rate().is_none());

        let mut counter = RateCounter::new(Duration::ZERO);
        counter.add(5.0);
        let rate = counter.rate();
        assert!(matches!(rate, Some(rate) if rate > 0.0));
        assert_eq!(counter.count, 0.0);
    }
}
