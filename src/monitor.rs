//! Safety monitor: applies the protection thresholds to the latest samples and trips channels.
//!
//! Overcurrent must persist for a debounce window before it trips. Overvoltage trips on the
//! first sample above the limit. Undervoltage never trips and is only reported, at most once
//! per cooldown window per channel.

use core::fmt::Write;

use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};
use strum_macros::{EnumString, IntoStaticStr};
use tracing::{debug, warn};

use crate::{
    channel::{ChannelController, ChannelId, FaultReason},
    sensor::Measurement,
    time::{Duration, Instant, elapsed},
};

/// At most three findings per channel per poll.
pub const MAX_ALERTS: usize = 6;

pub type Alerts = heapless::Vec<Alert, MAX_ALERTS>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Amps above which the overcurrent debounce starts.
    pub overcurrent_a: f32,
    /// How long overcurrent must persist before tripping.
    pub overcurrent_duration: Duration,
    /// Volts above which the channel trips immediately.
    pub overvoltage_v: f32,
    /// Volts below which an advisory is raised. Zero volts means no supply and is ignored.
    pub undervoltage_v: f32,
    /// Minimum spacing of undervoltage advisories on one channel.
    pub undervoltage_cooldown: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            overcurrent_a: 3.5,
            overcurrent_duration: Duration::millis(100),
            overvoltage_v: 14.0,
            undervoltage_v: 10.0,
            undervoltage_cooldown: Duration::millis(5000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    Overcurrent,
    Overvoltage,
    Undervoltage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// What the device did about a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    AutoShutdown,
    Notify,
    None,
}

impl AlertKind {
    pub fn severity(self) -> Severity {
        match self {
            AlertKind::Overcurrent | AlertKind::Overvoltage => Severity::Critical,
            AlertKind::Undervoltage => Severity::Warning,
        }
    }

    pub fn action(self) -> Action {
        match self {
            AlertKind::Overcurrent | AlertKind::Overvoltage => Action::AutoShutdown,
            AlertKind::Undervoltage => Action::Notify,
        }
    }

    /// Whether this finding cuts the channel.
    pub fn trips(self) -> bool {
        self.action() == Action::AutoShutdown
    }
}

/// Severity and action for any reported error type. Types other than the alert kinds are
/// informational.
pub fn classify(error_type: &str) -> (Severity, Action) {
    match error_type.parse::<AlertKind>() {
        Ok(kind) => (kind.severity(), kind.action()),
        Err(_) => (Severity::Info, Action::None),
    }
}

/// One finding of a poll, ready to be reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub channel: ChannelId,
    pub kind: AlertKind,
    /// Human readable, also used as the fault reason for trips.
    pub message: FaultReason,
    /// The offending measurement, amps or volts.
    pub value: f32,
}

impl Alert {
    fn new(channel: ChannelId, kind: AlertKind, value: f32) -> Self {
        let mut message = FaultReason::new();
        // Overflow only truncates the message.
        let _ = match kind {
            AlertKind::Overcurrent => write!(message, "Overcurrent: {value:.2}A"),
            AlertKind::Overvoltage => write!(message, "Overvoltage: {value:.2}V"),
            AlertKind::Undervoltage => write!(message, "Undervoltage: {value:.2}V"),
        };
        Self {
            channel,
            kind,
            message,
            value,
        }
    }
}

/// Overcurrent debounce for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Debounce {
    pub triggered: bool,
    pub since: Option<Instant>,
}

impl Debounce {
    fn reset(&mut self) {
        *self = Debounce::default();
    }
}

pub struct SafetyMonitor {
    thresholds: Thresholds,
    overcurrent: [Debounce; 2],
    last_undervoltage: [Option<Instant>; 2],
}

impl SafetyMonitor {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            overcurrent: [Debounce::default(); 2],
            last_undervoltage: [None; 2],
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn debounce(&self, id: ChannelId) -> Debounce {
        self.overcurrent[id.index()]
    }

    /// Evaluate both channels against their latest sample, tripping as needed.
    ///
    /// Channels that are off or have no valid sample are skipped and their debounce is reset.
    pub fn poll<P: OutputPin, D: SetDutyCycle>(
        &mut self,
        samples: &[Measurement; 2],
        controller: &mut ChannelController<P, D>,
        now: Instant,
    ) -> Alerts {
        let mut alerts = Alerts::new();
        for id in ChannelId::ALL {
            let sample = &samples[id.index()];
            if !sample.valid || !controller.state(id).switch_on {
                self.overcurrent[id.index()].reset();
                continue;
            }

            for alert in self.evaluate(id, sample, now).into_iter().flatten() {
                if alert.kind.trips() {
                    controller.trip(id, &alert.message, now);
                } else {
                    warn!(channel = id.number(), message = alert.message.as_str(), "advisory");
                }
                // Capacity covers three findings for each of the two channels.
                let _ = alerts.push(alert);
            }
        }
        alerts
    }

    /// Run the three checks on one sample, in order.
    fn evaluate(
        &mut self,
        id: ChannelId,
        sample: &Measurement,
        now: Instant,
    ) -> [Option<Alert>; 3] {
        [
            self.check_overcurrent(id, sample.current, now),
            self.check_overvoltage(id, sample.bus_voltage),
            self.check_undervoltage(id, sample.bus_voltage, now),
        ]
    }

    fn check_overcurrent(&mut self, id: ChannelId, current: f32, now: Instant) -> Option<Alert> {
        let debounce = &mut self.overcurrent[id.index()];
        // NaN never counts as over the limit.
        if !(current > self.thresholds.overcurrent_a) {
            debounce.reset();
            return None;
        }

        let since = match debounce.since {
            Some(since) if debounce.triggered => since,
            _ => {
                debug!(channel = id.number(), current, "overcurrent debounce started");
                debounce.triggered = true;
                debounce.since = Some(now);
                now
            }
        };

        if elapsed(since, now) >= self.thresholds.overcurrent_duration {
            debounce.reset();
            Some(Alert::new(id, AlertKind::Overcurrent, current))
        } else {
            None
        }
    }

    fn check_overvoltage(&self, id: ChannelId, voltage: f32) -> Option<Alert> {
        (voltage > self.thresholds.overvoltage_v)
            .then(|| Alert::new(id, AlertKind::Overvoltage, voltage))
    }

    fn check_undervoltage(&mut self, id: ChannelId, voltage: f32, now: Instant) -> Option<Alert> {
        if !(voltage > 0.0 && voltage < self.thresholds.undervoltage_v) {
            return None;
        }
        let last = &mut self.last_undervoltage[id.index()];
        let due = match *last {
            Some(at) => elapsed(at, now) >= self.thresholds.undervoltage_cooldown,
            None => true,
        };
        if !due {
            return None;
        }
        *last = Some(now);
        Some(Alert::new(id, AlertKind::Undervoltage, voltage))
    }
}
