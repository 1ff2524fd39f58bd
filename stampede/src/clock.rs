use rand::Rng;
use stampede_core::Pacing;
use std::time::Duration;
use tokio::time::{interval, Instant, Interval};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Fixed-rate ticker driving the scheduler's control loop.
pub(crate) struct Timer {
    interval: Interval,
    last_tick: Instant,
    interval_dur: Duration,
}

impl Timer {
    pub async fn new(interval_dur: Duration) -> Self {
        let mut interval = interval(interval_dur);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // NOTE: First tick completes instantly
        interval.tick().await;
        let last_tick = Instant::now();
        Self {
            interval,
            last_tick,
            interval_dur,
        }
    }

    /// Waits for the next tick and returns the time since the previous one.
    ///
    /// Longer than the interval when the caller fell behind.
    pub async fn tick(&mut self) -> Duration {
        self.interval.tick().await;
        let now = Instant::now();
        let elapsed = now - self.last_tick;
        self.last_tick = now;
        elapsed
    }
}

impl std::fmt::Display for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", humantime::format_duration(self.interval_dur))
    }
}

/// Think time to apply after one iteration.
pub(crate) fn think_time(pacing: Pacing) -> Option<Duration> {
    match pacing {
        Pacing::None => None,
        Pacing::Fixed(d) => Some(d),
        Pacing::Jittered { min, max } if min >= max => Some(min),
        Pacing::Jittered { min, max } => {
            let nanos = rand::thread_rng().gen_range(min.as_nanos()..=max.as_nanos());
            Some(Duration::from_nanos(nanos as u64))
        }
    }
}
