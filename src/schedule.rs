//! Independent periodic timers driven by one clock reading per loop iteration.

use crate::time::{Duration, Instant, elapsed, millis};

/// A single periodic timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    interval: Duration,
    last: Instant,
}

impl Cadence {
    /// First fires one `interval` after boot.
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: millis(0),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fires when `interval` has passed since the last firing, and restarts from `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        if elapsed(self.last, now) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }

    /// Fire regardless of the interval.
    pub fn force(&mut self, now: Instant) {
        self.last = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub sensor: Duration,
    pub telemetry: Duration,
    pub status: Duration,
    pub heartbeat: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            sensor: Duration::millis(100),
            telemetry: Duration::millis(1000),
            status: Duration::millis(5000),
            heartbeat: Duration::millis(30_000),
        }
    }
}

/// Which periodic jobs are due in this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Due {
    /// Read sensors and run the safety monitor.
    pub sensor: bool,
    pub telemetry: bool,
    pub status: bool,
    pub heartbeat: bool,
}

impl Due {
    pub fn any(&self) -> bool {
        self.sensor || self.telemetry || self.status || self.heartbeat
    }
}

pub struct Schedule {
    sensor: Cadence,
    telemetry: Cadence,
    status: Cadence,
    heartbeat: Cadence,
}

impl Schedule {
    pub fn new(intervals: Intervals) -> Self {
        Self {
            sensor: Cadence::new(intervals.sensor),
            telemetry: Cadence::new(intervals.telemetry),
            status: Cadence::new(intervals.status),
            heartbeat: Cadence::new(intervals.heartbeat),
        }
    }

    /// Poll every timer. See [`Self::poll_publications`] for `changed`.
    pub fn poll(&mut self, now: Instant, changed: bool) -> Due {
        let sensor = self.poll_sensor(now);
        Due {
            sensor,
            ..self.poll_publications(now, changed)
        }
    }

    pub fn poll_sensor(&mut self, now: Instant) -> bool {
        self.sensor.poll(now)
    }

    /// Poll the publication timers only. Status also fires early when `changed` is set,
    /// which restarts its interval.
    pub fn poll_publications(&mut self, now: Instant, changed: bool) -> Due {
        let status = if changed {
            self.status.force(now);
            true
        } else {
            self.status.poll(now)
        };
        Due {
            sensor: false,
            telemetry: self.telemetry.poll(now),
            status,
            heartbeat: self.heartbeat.poll(now),
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::new(Intervals::default())
    }
}
