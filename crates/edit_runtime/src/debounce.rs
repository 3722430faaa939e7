use std::time::{Duration, Instant};

/// Trailing-edge coalescing of change notifications.
///
/// A burst fires once, `window` after its last event. Time is passed in so callers
/// (and tests) control the clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_event: Option<Instant>,
    coalesced: usize,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_event: None,
            coalesced: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record(&mut self, now: Instant) {
        self.last_event = Some(match self.last_event {
            Some(last) if last > now => last,
            _ => now,
        });
        self.coalesced += 1;
    }

    pub fn is_pending(&self) -> bool {
        self.last_event.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.last_event.map(|last| last + self.window)
    }

    /// Returns how many events the burst held once it has been quiet for the window.
    pub fn fire_due(&mut self, now: Instant) -> Option<usize> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.coalesced))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_fires_once_after_last_event() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        for step in 0..5 {
            debouncer.record(start + Duration::from_millis(step * 40));
            assert_eq!(
                debouncer.fire_due(start + Duration::from_millis(step * 40 + 10)),
                None
            );
        }
        let last = start + Duration::from_millis(160);
        assert_eq!(debouncer.fire_due(last + Duration::from_millis(499)), None);
        assert_eq!(debouncer.fire_due(last + Duration::from_millis(500)), Some(5));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.fire_due(last + Duration::from_secs(5)), None);
    }

    #[test]
    fn spaced_events_fire_separately() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.record(start);
        assert_eq!(debouncer.fire_due(start + Duration::from_millis(150)), Some(1));
        debouncer.record(start + Duration::from_millis(300));
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(400))
        );
        assert_eq!(debouncer.fire_due(start + Duration::from_millis(400)), Some(1));
    }

    #[test]
    fn zero_window_fires_immediately() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::ZERO);
        debouncer.record(now);
        assert_eq!(debouncer.fire_due(now), Some(1));
    }
}
