use std::time::{Duration, Instant};

/// Fixed-interval ticker for blocking worker loops.
///
/// The first tick is one interval after creation. A late tick restarts the
/// schedule from now, so a stall never turns into a burst of catch-up ticks.
pub struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    pub fn from_fps(fps: u32) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / f64::from(fps.max(1))))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn wait(&mut self) {
        let now = Instant::now();
        if now < self.next {
            std::thread::sleep(self.next - now);
            self.next += self.interval;
        } else {
            self.next = now + self.interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_are_spaced() {
        let mut pacer = Pacer::new(Duration::from_millis(10));
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_no_burst_after_stall() {
        let mut pacer = Pacer::new(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(60));
        // late: returns immediately once, then paces normally again
        pacer.wait();
        let start = Instant::now();
        pacer.wait();
        pacer.wait();
        assert!(start.elapsed() >= Duration::from_millis(18));
    }

    #[test]
    fn test_from_fps() {
        assert_eq!(Pacer::from_fps(4).interval(), Duration::from_millis(250));
        assert_eq!(Pacer::from_fps(0).interval(), Duration::from_secs(1));
    }
}
