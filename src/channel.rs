//! Per-channel switch, fault and duty state, and the controller which owns both channels.
//!
//! Operations addressed by a raw channel number (as received from outside) return
//! [`ControlError`] on refusal and never change any state in that case. Operations addressed
//! by [`ChannelId`] cannot fail.

use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};
use strum_macros::IntoStaticStr;
use tracing::{debug, info, warn};

use crate::{error::ControlError, time::Instant};

/// Longest fault reason kept, longer reasons are truncated.
pub const FAULT_REASON_LEN: usize = 64;

/// PWM steps for the duty output, 8 bit resolution.
pub const DUTY_RAW_MAX: u8 = 255;

pub type FaultReason = heapless::String<FAULT_REASON_LEN>;

/// One of the two load channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelId {
    One = 1,
    Two = 2,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::One, ChannelId::Two];

    /// Zero based index into per-channel arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize - 1
    }

    #[inline]
    pub const fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = ControlError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ChannelId::One),
            2 => Ok(ChannelId::Two),
            other => Err(ControlError::InvalidChannel(other)),
        }
    }
}

impl From<ChannelId> for u8 {
    fn from(value: ChannelId) -> Self {
        value as u8
    }
}

/// Derived view of a channel, `Faulted` taking priority over everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Disabled,
    Off,
    On,
    Faulted,
}

/// Convert a duty percentage to the 8 bit PWM value, rounding to nearest.
#[inline]
pub const fn duty_percent_to_raw(percent: u8) -> u8 {
    let percent: u16 = if percent > 100 { 100 } else { percent as u16 };
    ((percent * DUTY_RAW_MAX as u16 + 50) / 100) as u8
}

/// Copy `text` into a bounded string, dropping whatever does not fit.
pub fn truncated<const N: usize>(text: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in text.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub switch_on: bool,
    /// Simulated conduction level, 0 to 100 %.
    pub duty_percent: u8,
    /// `duty_percent` scaled to the PWM range.
    pub duty_raw: u8,
    pub faulted: bool,
    pub fault_reason: FaultReason,
    pub fault_timestamp: Option<Instant>,
    /// Administrative kill switch.
    pub enabled: bool,
    /// Changed since the last status publication.
    pub dirty: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            switch_on: false,
            duty_percent: 100,
            duty_raw: DUTY_RAW_MAX,
            faulted: false,
            fault_reason: FaultReason::new(),
            fault_timestamp: None,
            enabled: true,
            dirty: false,
        }
    }
}

impl ChannelState {
    pub fn status(&self) -> ChannelStatus {
        if self.faulted {
            ChannelStatus::Faulted
        } else if !self.enabled {
            ChannelStatus::Disabled
        } else if self.switch_on {
            ChannelStatus::On
        } else {
            ChannelStatus::Off
        }
    }
}

/// The hardware behind one channel: the power switch (high = energized) and the duty PWM.
pub struct ChannelOutputs<P, D> {
    pub switch: P,
    pub duty: D,
}

impl<P, D> ChannelOutputs<P, D> {
    pub fn new(switch: P, duty: D) -> Self {
        Self { switch, duty }
    }
}

pub struct ChannelController<P, D> {
    states: [ChannelState; 2],
    outputs: [ChannelOutputs<P, D>; 2],
}

impl<P: OutputPin, D: SetDutyCycle> ChannelController<P, D> {
    pub fn new(channel_1: ChannelOutputs<P, D>, channel_2: ChannelOutputs<P, D>) -> Self {
        Self {
            states: [ChannelState::default(), ChannelState::default()],
            outputs: [channel_1, channel_2],
        }
    }

    /// Drive the outputs to match the initial state: switches off, duty at full conduction.
    pub fn begin(&mut self) {
        for id in ChannelId::ALL {
            self.actuate_switch(id);
            self.actuate_duty(id);
        }
        info!("channel outputs initialized");
    }

    pub fn state(&self, id: ChannelId) -> &ChannelState {
        &self.states[id.index()]
    }

    /// Request the switch position.
    ///
    /// Refused when the channel is disabled, or when switching on with a latched fault.
    pub fn set_switch(&mut self, channel: u8, on: bool) -> Result<(), ControlError> {
        let id = ChannelId::try_from(channel)?;
        let state = &self.states[id.index()];
        if !state.enabled {
            warn!(channel, "switch refused, channel disabled");
            return Err(ControlError::Disabled(channel));
        }
        if on && state.faulted {
            warn!(
                channel,
                reason = state.fault_reason.as_str(),
                "switch on refused, fault latched"
            );
            return Err(ControlError::FaultLatched(channel));
        }

        let state = &mut self.states[id.index()];
        state.switch_on = on;
        state.dirty = true;
        self.actuate_switch(id);
        debug!(channel, on, "switch set");
        Ok(())
    }

    pub fn get_switch(&self, channel: u8) -> Result<bool, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()].switch_on)
    }

    /// Request the opposite switch position.
    ///
    /// Returns the position that was asked for, even when [`Self::set_switch`] refused it.
    /// Callers wanting the actual position must read it back.
    pub fn toggle_switch(&mut self, channel: u8) -> Result<bool, ControlError> {
        let intended = !self.get_switch(channel)?;
        if let Err(err) = self.set_switch(channel, intended) {
            debug!(channel, %err, "toggle not applied");
        }
        Ok(intended)
    }

    /// Set the simulated conduction level. Values above 100 are clamped.
    ///
    /// Works regardless of fault and enable state.
    pub fn set_duty(&mut self, channel: u8, percent: u8) -> Result<(), ControlError> {
        let id = ChannelId::try_from(channel)?;
        let percent = percent.min(100);
        let state = &mut self.states[id.index()];
        state.duty_percent = percent;
        state.duty_raw = duty_percent_to_raw(percent);
        state.dirty = true;
        self.actuate_duty(id);
        debug!(channel, percent, "duty set");
        Ok(())
    }

    pub fn duty(&self, channel: u8) -> Result<u8, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()].duty_percent)
    }

    /// Cut the channel and latch a fault.
    ///
    /// Applies regardless of current state. Tripping an already tripped channel replaces the
    /// reason and timestamp.
    pub fn trip(&mut self, id: ChannelId, reason: &str, now: Instant) {
        let state = &mut self.states[id.index()];
        state.switch_on = false;
        state.faulted = true;
        state.fault_reason = truncated(reason);
        state.fault_timestamp = Some(now);
        state.dirty = true;
        self.actuate_switch(id);
        warn!(channel = id.number(), reason, "channel tripped");
    }

    pub fn trip_all(&mut self, reason: &str, now: Instant) {
        for id in ChannelId::ALL {
            self.trip(id, reason, now);
        }
    }

    /// Clear a latched fault. The switch stays off until explicitly turned on.
    pub fn clear_fault(&mut self, channel: u8) -> Result<(), ControlError> {
        let id = ChannelId::try_from(channel)?;
        let state = &mut self.states[id.index()];
        state.faulted = false;
        state.fault_reason.clear();
        state.fault_timestamp = None;
        state.dirty = true;
        info!(channel, "fault cleared");
        Ok(())
    }

    pub fn is_faulted(&self, channel: u8) -> Result<bool, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()].faulted)
    }

    /// Reason of the latched fault, empty when not faulted.
    pub fn fault_reason(&self, channel: u8) -> Result<&str, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()]
            .fault_reason
            .as_str())
    }

    /// Enable or disable a channel. Disabling also switches it off.
    pub fn set_enabled(&mut self, channel: u8, enabled: bool) -> Result<(), ControlError> {
        let id = ChannelId::try_from(channel)?;
        let state = &mut self.states[id.index()];
        state.enabled = enabled;
        if !enabled {
            state.switch_on = false;
        }
        state.dirty = true;
        self.actuate_switch(id);
        info!(channel, enabled, "channel enable changed");
        Ok(())
    }

    pub fn is_enabled(&self, channel: u8) -> Result<bool, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()].enabled)
    }

    pub fn status(&self, channel: u8) -> Result<ChannelStatus, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()].status())
    }

    /// A copy of the whole channel state.
    pub fn snapshot(&self, channel: u8) -> Result<ChannelState, ControlError> {
        Ok(self.states[ChannelId::try_from(channel)?.index()].clone())
    }

    pub fn is_dirty(&self, id: ChannelId) -> bool {
        self.states[id.index()].dirty
    }

    pub fn any_dirty(&self) -> bool {
        self.states.iter().any(|s| s.dirty)
    }

    pub fn clear_dirty(&mut self, id: ChannelId) {
        self.states[id.index()].dirty = false;
    }

    /// Return and clear the change flag.
    pub fn take_dirty(&mut self, id: ChannelId) -> bool {
        core::mem::take(&mut self.states[id.index()].dirty)
    }

    fn actuate_switch(&mut self, id: ChannelId) {
        let on = self.states[id.index()].switch_on;
        let pin = &mut self.outputs[id.index()].switch;
        let result = if on { pin.set_high() } else { pin.set_low() };
        if let Err(err) = result {
            warn!(channel = id.number(), error = ?err, "switch output failed");
        }
    }

    fn actuate_duty(&mut self, id: ChannelId) {
        let raw = self.states[id.index()].duty_raw;
        if let Err(err) = self.outputs[id.index()]
            .duty
            .set_duty_cycle_fraction(raw as u16, DUTY_RAW_MAX as u16)
        {
            warn!(channel = id.number(), error = ?err, "duty output failed");
        }
    }
}
