//! Inbound remote commands.
//!
//! A message is first parsed into a [`Command`] from its topic and payload, then applied to
//! the channel controller. Applying may ask the caller for a follow-up, see [`Effect`].

use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    channel::{ChannelController, ChannelId},
    console::{atoi, clamp_percent},
    station::Effect,
    telemetry::{Route, Topics},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchAction {
    On,
    Off,
    Toggle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Switch {
        channel: ChannelId,
        action: SwitchAction,
    },
    /// Percent, already clamped to 0..=100.
    Duty { channel: ChannelId, percent: u8 },
    /// Clear one channel, or both when no valid channel was given.
    ClearFault(Option<ChannelId>),
    PublishStatus,
    Restart,
}

fn parse_switch(payload: &str, json: Option<&Value>) -> Option<SwitchAction> {
    let state = json.and_then(|v| v.get("state")).and_then(Value::as_bool);
    match payload {
        "ON" | "1" => Some(SwitchAction::On),
        "OFF" | "0" => Some(SwitchAction::Off),
        "TOGGLE" => Some(SwitchAction::Toggle),
        _ => match state {
            Some(true) => Some(SwitchAction::On),
            Some(false) => Some(SwitchAction::Off),
            None => None,
        },
    }
}

fn parse_duty(payload: &str, json: Option<&Value>) -> u8 {
    let value = match json.and_then(|v| v.get("value")) {
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        None => atoi(payload),
    };
    clamp_percent(value)
}

fn parse_control(json: Option<&Value>) -> Option<Command> {
    let json = json?;
    let command = json.get("command")?.as_str()?;
    match command {
        "reset" => Some(Command::Restart),
        "status" => Some(Command::PublishStatus),
        "clear_fault" => {
            let channel = json
                .get("channel")
                .and_then(Value::as_u64)
                .and_then(|c| u8::try_from(c).ok())
                .and_then(|c| ChannelId::try_from(c).ok());
            Some(Command::ClearFault(channel))
        }
        _ => None,
    }
}

impl Command {
    /// Parse an inbound message. `None` when the topic is not ours or the payload means
    /// nothing.
    pub fn parse(topics: &Topics, topic: &str, payload: &str) -> Option<Command> {
        let route = topics.route(topic)?;
        let json = serde_json::from_str::<Value>(payload).ok();
        let json = json.as_ref().filter(|v| v.is_object());

        match route {
            Route::Switch(channel) => {
                parse_switch(payload, json).map(|action| Command::Switch { channel, action })
            }
            Route::Duty(channel) => Some(Command::Duty {
                channel,
                percent: parse_duty(payload, json),
            }),
            Route::Control => parse_control(json),
        }
    }

    /// Apply to the controller. Refusals by the controller are logged, not returned.
    pub fn apply<P: OutputPin, D: SetDutyCycle>(
        self,
        controller: &mut ChannelController<P, D>,
    ) -> Option<Effect> {
        debug!(command = ?self, "applying command");
        match self {
            Command::Switch { channel, action } => {
                let n = channel.number();
                let result = match action {
                    SwitchAction::On => controller.set_switch(n, true),
                    SwitchAction::Off => controller.set_switch(n, false),
                    SwitchAction::Toggle => controller.toggle_switch(n).map(|_| ()),
                };
                if let Err(err) = result {
                    warn!(channel = n, %err, "switch command refused");
                }
                None
            }
            Command::Duty { channel, percent } => {
                if let Err(err) = controller.set_duty(channel.number(), percent) {
                    warn!(%err, "duty command refused");
                }
                None
            }
            Command::ClearFault(target) => {
                let channels = ChannelId::ALL
                    .into_iter()
                    .filter(|&id| target.is_none_or(|t| t == id));
                for id in channels {
                    if let Err(err) = controller.clear_fault(id.number()) {
                        warn!(%err, "clear fault refused");
                    }
                }
                None
            }
            Command::PublishStatus => Some(Effect::PublishStatus),
            Command::Restart => {
                info!("restart requested");
                Some(Effect::Restart)
            }
        }
    }
}

/// Parse and apply one inbound message.
pub fn dispatch<P: OutputPin, D: SetDutyCycle>(
    topics: &Topics,
    topic: &str,
    payload: &str,
    controller: &mut ChannelController<P, D>,
) -> Option<Effect> {
    match Command::parse(topics, topic, payload) {
        Some(command) => command.apply(controller),
        None => {
            debug!(topic, payload, "ignored message");
            None
        }
    }
}
