//! Monotonic time types shared by every component.
//!
//! The control loop reads its clock once per iteration and passes the resulting [`Instant`] down,
//! so nothing in this crate ever queries a clock on its own.

/// Millisecond tick instant since boot.
pub type Instant = fugit::TimerInstantU64<1000>;

/// Millisecond duration.
pub type Duration = fugit::MillisDurationU64;

/// Time elapsed from `since` to `now`, saturating to zero if `now` is earlier.
#[inline]
pub fn elapsed(since: Instant, now: Instant) -> Duration {
    now.checked_duration_since(since)
        .unwrap_or(Duration::from_ticks(0))
}

/// Convenience constructor, mostly for tests and configuration.
#[inline]
pub const fn millis(ms: u64) -> Instant {
    Instant::from_ticks(ms)
}
