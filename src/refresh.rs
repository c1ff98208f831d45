use std::time::{Duration, Instant};

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Fixed-interval refresh timer, driven by the frame loop.
#[derive(Debug, Clone)]
pub struct AutoRefresh {
    interval: Duration,
    next_due: Option<Instant>,
}

impl AutoRefresh {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.next_due.is_some()
    }

    /// (Re)starts the timer; the first tick is one interval from `now`.
    pub fn start(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    /// True once per elapsed interval. Missed ticks are not replayed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.next_due {
            Some(due) if now >= due => {
                self.next_due = Some(now + self.interval);
                true
            }
            _ => false,
        }
    }

    pub fn time_until_due(&self, now: Instant) -> Option<Duration> {
        self.next_due.map(|due| due.saturating_duration_since(now))
    }
}

impl Default for AutoRefresh {
    fn default() -> Self {
        Self::new(REFRESH_INTERVAL)
    }
}

/// Reports the frame on which the window regains focus.
#[derive(Debug, Clone, Default)]
pub struct FocusTracker {
    focused: Option<bool>,
}

impl FocusTracker {
    pub fn regained(&mut self, focused: bool) -> bool {
        let previous = self.focused.replace(focused);
        matches!(previous, Some(false)) && focused
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_once_per_interval() {
        let start = Instant::now();
        let mut refresh = AutoRefresh::default();
        assert!(!refresh.poll(start + Duration::from_secs(60)));

        refresh.start(start);
        assert!(refresh.is_running());
        assert!(!refresh.poll(start + Duration::from_secs(4)));
        assert!(refresh.poll(start + Duration::from_secs(5)));
        assert!(!refresh.poll(start + Duration::from_secs(6)));
        assert_eq!(
            refresh.time_until_due(start + Duration::from_secs(6)),
            Some(Duration::from_secs(4))
        );
        assert!(refresh.poll(start + Duration::from_secs(30)));
        assert!(!refresh.poll(start + Duration::from_secs(31)));
    }

    #[test]
    fn restart_pushes_the_next_tick_out() {
        let start = Instant::now();
        let mut refresh = AutoRefresh::default();
        refresh.start(start);
        refresh.start(start + Duration::from_secs(4));
        assert!(!refresh.poll(start + Duration::from_secs(5)));
        assert!(refresh.poll(start + Duration::from_secs(9)));

        refresh.stop();
        assert!(!refresh.poll(start + Duration::from_secs(100)));
        assert_eq!(refresh.time_until_due(start), None);
    }

    #[test]
    fn focus_regain_is_an_edge() {
        let mut tracker = FocusTracker::default();
        assert!(!tracker.regained(true));
        assert!(!tracker.regained(true));
        assert!(!tracker.regained(false));
        assert!(tracker.regained(true));
        assert!(!tracker.regained(true));
    }
}
