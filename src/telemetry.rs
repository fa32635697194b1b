//! Outbound messages and the topic layout.
//!
//! Everything lives under `devices/<device id>/`. Payloads are JSON. Channel and device status
//! are retained so late subscribers see the current state.
//!
//! The transport itself is behind [`Publisher`]. When it reports disconnected, the reporter
//! skips publication instead of queueing.

use embedded_hal::{digital::OutputPin, i2c::I2c, pwm::SetDutyCycle};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    channel::{ChannelController, ChannelId, ChannelState},
    config::DeviceConfig,
    error::PublishError,
    monitor::{Alert, classify},
    sensor::Measurement,
    station::{Station, Tick},
    time::Instant,
};

/// Payload published on the status topic by the broker when the device drops off.
pub const LAST_WILL_PAYLOAD: &str = r#"{"online":false}"#;

/// The publish half of a message transport, e.g. an MQTT client.
pub trait Publisher {
    type Error: core::fmt::Debug;

    fn is_connected(&self) -> bool;

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), Self::Error>;
}

/// Where an inbound message was addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Switch(ChannelId),
    Duty(ChannelId),
    Control,
}

/// Topic names for one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    base: String,
}

impl Topics {
    pub fn new(device_id: &str) -> Self {
        Self {
            base: format!("devices/{device_id}"),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn telemetry(&self) -> String {
        format!("{}/telemetry", self.base)
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn error(&self) -> String {
        format!("{}/error", self.base)
    }

    pub fn heartbeat(&self) -> String {
        format!("{}/heartbeat", self.base)
    }

    pub fn control(&self) -> String {
        format!("{}/control", self.base)
    }

    pub fn channel_telemetry(&self, id: ChannelId) -> String {
        format!("{}/ch{}/telemetry", self.base, id.number())
    }

    pub fn channel_status(&self, id: ChannelId) -> String {
        format!("{}/ch{}/status", self.base, id.number())
    }

    pub fn switch_set(&self, id: ChannelId) -> String {
        format!("{}/ch{}/switch/set", self.base, id.number())
    }

    pub fn duty_set(&self, id: ChannelId) -> String {
        format!("{}/ch{}/sim/set", self.base, id.number())
    }

    /// Topics to subscribe to after connecting.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics = Vec::with_capacity(5);
        for id in ChannelId::ALL {
            topics.push(self.switch_set(id));
            topics.push(self.duty_set(id));
        }
        topics.push(self.control());
        topics
    }

    /// Work out which inbound topic this is. `None` for anything not ours.
    pub fn route(&self, topic: &str) -> Option<Route> {
        let rest = topic.strip_prefix(&self.base)?.strip_prefix('/')?;
        if rest == "control" {
            return Some(Route::Control);
        }
        let (channel, leaf) = rest.strip_prefix("ch")?.split_once('/')?;
        let id = match channel {
            "1" => ChannelId::One,
            "2" => ChannelId::Two,
            _ => return None,
        };
        match leaf {
            "switch/set" => Some(Route::Switch(id)),
            "sim/set" => Some(Route::Duty(id)),
            _ => None,
        }
    }
}

/// Round for presentation. Telemetry carries 3 decimals for volts and watts, 4 for amps.
fn rounded(value: f32, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value as f64 * scale).round() / scale
}

#[derive(Debug, Serialize)]
pub struct Readings {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
}

impl From<&Measurement> for Readings {
    fn from(m: &Measurement) -> Self {
        Self {
            voltage: rounded(m.bus_voltage, 3),
            current: rounded(m.current, 4),
            power: rounded(m.power, 3),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CombinedTelemetry<'a> {
    pub ch1: Readings,
    pub ch2: Readings,
    pub timestamp: u64,
    pub device_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ChannelTelemetry {
    pub channel: u8,
    #[serde(flatten)]
    pub readings: Readings,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ChannelStatusMessage<'a> {
    pub channel: u8,
    pub switch: &'static str,
    pub switch_state: bool,
    /// Duty percent.
    pub simulator: u8,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<&'a str>,
    pub timestamp: u64,
}

impl<'a> ChannelStatusMessage<'a> {
    pub fn new(id: ChannelId, state: &'a ChannelState, now: Instant) -> Self {
        Self {
            channel: id.number(),
            switch: if state.switch_on { "ON" } else { "OFF" },
            switch_state: state.switch_on,
            simulator: state.duty_percent,
            state: state.status().into(),
            fault: state.faulted.then_some(state.fault_reason.as_str()),
            timestamp: now.ticks(),
        }
    }
}

/// Network details of the host, supplied by the embedding application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub ip: Option<String>,
    pub rssi: i32,
    pub free_heap: u32,
}

#[derive(Debug, Serialize)]
pub struct DeviceStatus<'a> {
    pub online: bool,
    pub device_id: &'a str,
    pub device_name: &'a str,
    pub firmware: &'a str,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport<'a> {
    pub device_id: &'a str,
    /// 0 for system wide errors.
    pub channel: u8,
    pub error_type: &'a str,
    pub message: &'a str,
    pub value: f32,
    pub timestamp: u64,
    pub severity: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Heartbeat<'a> {
    pub device_id: &'a str,
    /// Seconds since boot.
    pub uptime: u64,
    pub free_heap: u32,
    pub wifi_rssi: i32,
    pub timestamp: u64,
}

/// Builds and publishes every outbound message for one device.
pub struct Reporter {
    topics: Topics,
    device: DeviceConfig,
}

impl Reporter {
    pub fn new(device: &DeviceConfig) -> Self {
        Self {
            topics: Topics::new(&device.id),
            device: device.clone(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Topic and payload to register as the transport's last will.
    pub fn last_will(&self) -> (String, &'static str) {
        (self.topics.status(), LAST_WILL_PAYLOAD)
    }

    /// Publish everything `tick` says is due, alerts first.
    pub fn report<T, I2C, P, D>(
        &self,
        transport: &mut T,
        station: &mut Station<I2C, P, D>,
        tick: &Tick,
        system: &SystemInfo,
        now: Instant,
    ) -> Result<(), PublishError<T::Error>>
    where
        T: Publisher,
        I2C: I2c,
        P: OutputPin,
        D: SetDutyCycle,
    {
        for alert in tick.alerts.iter() {
            self.publish_alert(transport, alert, now)?;
        }
        if tick.due.telemetry {
            self.publish_telemetry(transport, station.samples(), now)?;
        }
        if tick.due.status {
            self.publish_status(transport, station.controller_mut(), now)?;
        }
        if tick.due.heartbeat {
            self.publish_heartbeat(transport, station.uptime_secs(now), system, now)?;
        }
        Ok(())
    }

    /// Combined telemetry followed by one message per channel.
    ///
    /// Returns `Ok(false)` when skipped because the transport is down.
    pub fn publish_telemetry<T: Publisher>(
        &self,
        transport: &mut T,
        samples: &[Measurement; 2],
        now: Instant,
    ) -> Result<bool, PublishError<T::Error>> {
        if !transport.is_connected() {
            return Ok(false);
        }
        let combined = CombinedTelemetry {
            ch1: Readings::from(&samples[0]),
            ch2: Readings::from(&samples[1]),
            timestamp: now.ticks(),
            device_id: &self.device.id,
        };
        send(transport, &self.topics.telemetry(), &combined, false)?;

        for id in ChannelId::ALL {
            let message = ChannelTelemetry {
                channel: id.number(),
                readings: Readings::from(&samples[id.index()]),
                timestamp: now.ticks(),
            };
            send(transport, &self.topics.channel_telemetry(id), &message, false)?;
        }
        Ok(true)
    }

    /// Retained status of both channels. Change flags are cleared even when the transport is
    /// down, the next periodic status catches up.
    pub fn publish_status<T: Publisher, P: OutputPin, D: SetDutyCycle>(
        &self,
        transport: &mut T,
        controller: &mut ChannelController<P, D>,
        now: Instant,
    ) -> Result<bool, PublishError<T::Error>> {
        let connected = transport.is_connected();
        if connected {
            for id in ChannelId::ALL {
                let message = ChannelStatusMessage::new(id, controller.state(id), now);
                send(transport, &self.topics.channel_status(id), &message, true)?;
            }
        }
        for id in ChannelId::ALL {
            controller.clear_dirty(id);
        }
        Ok(connected)
    }

    /// Retained device presence. Network details are only included when online.
    pub fn publish_device_status<T: Publisher>(
        &self,
        transport: &mut T,
        online: bool,
        system: &SystemInfo,
        now: Instant,
    ) -> Result<bool, PublishError<T::Error>> {
        if !transport.is_connected() {
            return Ok(false);
        }
        let message = DeviceStatus {
            online,
            device_id: &self.device.id,
            device_name: &self.device.name,
            firmware: &self.device.firmware,
            timestamp: now.ticks(),
            ip: if online { system.ip.as_deref() } else { None },
            rssi: online.then_some(system.rssi),
        };
        send(transport, &self.topics.status(), &message, true)?;
        Ok(true)
    }

    pub fn publish_alert<T: Publisher>(
        &self,
        transport: &mut T,
        alert: &Alert,
        now: Instant,
    ) -> Result<bool, PublishError<T::Error>> {
        self.publish_error(
            transport,
            alert.channel.number(),
            alert.kind.into(),
            &alert.message,
            alert.value,
            now,
        )
    }

    /// Publish an error report. Severity and action follow from `error_type`.
    pub fn publish_error<T: Publisher>(
        &self,
        transport: &mut T,
        channel: u8,
        error_type: &str,
        message: &str,
        value: f32,
        now: Instant,
    ) -> Result<bool, PublishError<T::Error>> {
        if !transport.is_connected() {
            warn!(channel, error_type, message, "error report dropped, transport down");
            return Ok(false);
        }
        let (severity, action) = classify(error_type);
        let report = ErrorReport {
            device_id: &self.device.id,
            channel,
            error_type,
            message,
            value,
            timestamp: now.ticks(),
            severity: severity.into(),
            action: action.into(),
        };
        send(transport, &self.topics.error(), &report, false)?;
        Ok(true)
    }

    pub fn publish_heartbeat<T: Publisher>(
        &self,
        transport: &mut T,
        uptime_secs: u64,
        system: &SystemInfo,
        now: Instant,
    ) -> Result<bool, PublishError<T::Error>> {
        if !transport.is_connected() {
            return Ok(false);
        }
        let message = Heartbeat {
            device_id: &self.device.id,
            uptime: uptime_secs,
            free_heap: system.free_heap,
            wifi_rssi: system.rssi,
            timestamp: now.ticks(),
        };
        send(transport, &self.topics.heartbeat(), &message, false)?;
        Ok(true)
    }
}

fn send<T: Publisher, M: Serialize>(
    transport: &mut T,
    topic: &str,
    message: &M,
    retained: bool,
) -> Result<(), PublishError<T::Error>> {
    let payload = serde_json::to_vec(message)?;
    debug!(topic, bytes = payload.len(), retained, "publish");
    transport
        .publish(topic, &payload, retained)
        .map_err(PublishError::Transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelOutputs;
    use crate::mock::{MockPin, MockPublisher, MockPwm};
    use crate::monitor::AlertKind;
    use crate::sensor::Reading;
    use crate::time::millis;
    use core::cell::Cell;
    use serde_json::json;

    fn reporter() -> Reporter {
        Reporter::new(&DeviceConfig::default())
    }

    fn sample(volts: f32, amps: f32) -> Measurement {
        Measurement::new(
            Reading {
                bus_voltage: volts,
                current: amps,
                power: volts * amps,
            },
            millis(0),
        )
    }

    #[test]
    fn topic_layout() {
        let topics = Topics::new("dev");
        assert_eq!(topics.telemetry(), "devices/dev/telemetry");
        assert_eq!(topics.channel_status(ChannelId::Two), "devices/dev/ch2/status");
        assert_eq!(topics.switch_set(ChannelId::One), "devices/dev/ch1/switch/set");
        assert_eq!(topics.duty_set(ChannelId::Two), "devices/dev/ch2/sim/set");
        assert_eq!(topics.subscriptions().len(), 5);
    }

    #[test]
    fn inbound_routing() {
        let topics = Topics::new("dev");
        assert_eq!(
            topics.route("devices/dev/ch1/switch/set"),
            Some(Route::Switch(ChannelId::One))
        );
        assert_eq!(
            topics.route("devices/dev/ch2/sim/set"),
            Some(Route::Duty(ChannelId::Two))
        );
        assert_eq!(topics.route("devices/dev/control"), Some(Route::Control));
        assert_eq!(topics.route("devices/dev/ch3/switch/set"), None);
        assert_eq!(topics.route("devices/other/control"), None);
        assert_eq!(topics.route("devices/devx/control"), None);
        assert_eq!(topics.route("devices/dev/ch1/telemetry"), None);
    }

    #[test]
    fn telemetry_messages() {
        let mut transport = MockPublisher::new();
        let samples = [sample(12.34567, 1.234567), Measurement::invalid(millis(0))];
        assert!(reporter()
            .publish_telemetry(&mut transport, &samples, millis(4200))
            .unwrap());

        assert_eq!(transport.messages.len(), 3);
        let combined = transport.on("devices/anh_hong_dep_trai_ittn/telemetry")[0].json();
        assert_eq!(combined["device_id"], "anh_hong_dep_trai_ittn");
        assert_eq!(combined["timestamp"], 4200);
        assert_eq!(combined["ch1"]["voltage"], json!(12.346));
        assert_eq!(combined["ch1"]["current"], json!(1.2346));
        assert_eq!(combined["ch2"]["voltage"], json!(0.0));

        let ch1 = transport.on("ch1/telemetry")[0];
        assert!(!ch1.retained);
        assert_eq!(
            ch1.json(),
            json!({
                "channel": 1,
                "voltage": 12.346,
                "current": 1.2346,
                "power": 15.242,
                "timestamp": 4200
            })
        );
    }

    #[test]
    fn status_is_retained_and_clears_change_flags() {
        let pins = [Cell::new(false), Cell::new(false)];
        let duties = [Cell::new(0), Cell::new(0)];
        let mut controller = ChannelController::new(
            ChannelOutputs::new(MockPin::new(&pins[0]), MockPwm::new(&duties[0])),
            ChannelOutputs::new(MockPin::new(&pins[1]), MockPwm::new(&duties[1])),
        );
        controller.set_switch(1, true).unwrap();
        controller.set_duty(2, 40).unwrap();
        controller.trip(ChannelId::Two, "Overvoltage: 14.20V", millis(5));

        let mut transport = MockPublisher::new();
        assert!(reporter()
            .publish_status(&mut transport, &mut controller, millis(10))
            .unwrap());
        assert!(!controller.any_dirty());

        let ch1 = transport.on("ch1/status")[0];
        assert!(ch1.retained);
        assert_eq!(
            ch1.json(),
            json!({
                "channel": 1,
                "switch": "ON",
                "switch_state": true,
                "simulator": 100,
                "state": "ON",
                "timestamp": 10
            })
        );
        let ch2 = transport.on("ch2/status")[0].json();
        assert_eq!(ch2["switch"], "OFF");
        assert_eq!(ch2["simulator"], 40);
        assert_eq!(ch2["state"], "FAULTED");
        assert_eq!(ch2["fault"], "Overvoltage: 14.20V");
    }

    #[test]
    fn disconnected_transport_is_skipped() {
        let pins = [Cell::new(false), Cell::new(false)];
        let duties = [Cell::new(0), Cell::new(0)];
        let mut controller = ChannelController::new(
            ChannelOutputs::new(MockPin::new(&pins[0]), MockPwm::new(&duties[0])),
            ChannelOutputs::new(MockPin::new(&pins[1]), MockPwm::new(&duties[1])),
        );
        controller.set_switch(1, true).unwrap();

        let mut transport = MockPublisher::new();
        transport.connected = false;
        let reporter = reporter();
        let samples = [sample(12.0, 1.0), sample(12.0, 1.0)];
        assert!(!reporter.publish_telemetry(&mut transport, &samples, millis(0)).unwrap());
        assert!(!reporter.publish_status(&mut transport, &mut controller, millis(0)).unwrap());
        assert!(!reporter
            .publish_heartbeat(&mut transport, 1, &SystemInfo::default(), millis(0))
            .unwrap());
        assert!(transport.messages.is_empty());
        assert!(!controller.any_dirty());
    }

    #[test]
    fn error_report_severity() {
        let mut transport = MockPublisher::new();
        let reporter = reporter();
        reporter
            .publish_error(&mut transport, 1, "OVERCURRENT", "Overcurrent: 3.80A", 3.8, millis(7))
            .unwrap();
        reporter
            .publish_error(&mut transport, 2, "UNDERVOLTAGE", "Undervoltage: 9.50V", 9.5, millis(8))
            .unwrap();
        reporter
            .publish_error(
                &mut transport,
                0,
                "SENSOR_MISSING",
                "Channel 2 sensor not found",
                0.0,
                millis(9),
            )
            .unwrap();

        let reports: Vec<_> = transport.on("/error").iter().map(|m| m.json()).collect();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0]["severity"], "CRITICAL");
        assert_eq!(reports[0]["action"], "AUTO_SHUTDOWN");
        assert_eq!(reports[0]["error_type"], "OVERCURRENT");
        assert_eq!(reports[0]["message"], "Overcurrent: 3.80A");
        assert_eq!(reports[0]["device_id"], "anh_hong_dep_trai_ittn");
        assert_eq!(reports[1]["severity"], "WARNING");
        assert_eq!(reports[1]["action"], "NOTIFY");
        assert_eq!(reports[2]["channel"], 0);
        assert_eq!(reports[2]["severity"], "INFO");
        assert_eq!(reports[2]["action"], "NONE");
    }

    #[test]
    fn alert_is_reported_by_kind() {
        let mut transport = MockPublisher::new();
        let alert = Alert {
            channel: ChannelId::Two,
            kind: AlertKind::Overvoltage,
            message: crate::channel::truncated("Overvoltage: 14.20V"),
            value: 14.2,
        };
        reporter().publish_alert(&mut transport, &alert, millis(1)).unwrap();
        let report = transport.messages[0].json();
        assert_eq!(report["channel"], 2);
        assert_eq!(report["error_type"], "OVERVOLTAGE");
        assert_eq!(report["severity"], "CRITICAL");
    }

    #[test]
    fn device_status_and_heartbeat() {
        let mut transport = MockPublisher::new();
        let reporter = reporter();
        let system = SystemInfo {
            ip: Some("192.168.1.50".into()),
            rssi: -61,
            free_heap: 180_000,
        };
        reporter
            .publish_device_status(&mut transport, true, &system, millis(3))
            .unwrap();
        reporter
            .publish_heartbeat(&mut transport, 42, &system, millis(42_000))
            .unwrap();

        let status = &transport.messages[0];
        assert_eq!(status.topic, "devices/anh_hong_dep_trai_ittn/status");
        assert!(status.retained);
        assert_eq!(
            status.json(),
            json!({
                "online": true,
                "device_id": "anh_hong_dep_trai_ittn",
                "device_name": "ESP32 Power Monitor",
                "firmware": "1.0.0",
                "timestamp": 3,
                "ip": "192.168.1.50",
                "rssi": -61
            })
        );
        assert_eq!(
            transport.messages[1].json(),
            json!({
                "device_id": "anh_hong_dep_trai_ittn",
                "uptime": 42,
                "free_heap": 180000,
                "wifi_rssi": -61,
                "timestamp": 42000
            })
        );
    }

    #[test]
    fn offline_status_matches_last_will() {
        let mut transport = MockPublisher::new();
        let reporter = reporter();
        reporter
            .publish_device_status(&mut transport, false, &SystemInfo::default(), millis(0))
            .unwrap();
        let status = transport.messages[0].json();
        assert_eq!(status["online"], false);
        assert!(status.get("ip").is_none());
        assert!(status.get("rssi").is_none());

        let (topic, payload) = reporter.last_will();
        assert_eq!(topic, "devices/anh_hong_dep_trai_ittn/status");
        assert_eq!(payload, r#"{"online":false}"#);
    }

    #[test]
    fn report_publishes_alerts_before_due_messages() {
        use crate::config::Config;
        use crate::mock::{MockDelay, MockI2c};
        use crate::register::Ina226Register;
        use core::cell::RefCell;
        use embedded_hal_bus::i2c::RefCellDevice;

        let bus = RefCell::new(MockI2c::new().with_ina226(0x40).with_ina226(0x41));
        let pins = [Cell::new(false), Cell::new(false)];
        let duties = [Cell::new(0), Cell::new(0)];
        let mut station = Station::new(
            &Config::default(),
            [RefCellDevice::new(&bus), RefCellDevice::new(&bus)],
            [
                ChannelOutputs::new(MockPin::new(&pins[0]), MockPwm::new(&duties[0])),
                ChannelOutputs::new(MockPin::new(&pins[1]), MockPwm::new(&duties[1])),
            ],
            millis(0),
        );
        station.begin(&mut MockDelay::default());
        bus.borrow_mut().set_register(0x40, Ina226Register::BusVoltage, 11360);
        station.controller_mut().set_switch(1, true).unwrap();

        let tick = station.tick(millis(1000));
        assert!(tick.due.telemetry && tick.due.status && !tick.due.heartbeat);

        let mut transport = MockPublisher::new();
        reporter()
            .report(&mut transport, &mut station, &tick, &SystemInfo::default(), millis(1000))
            .unwrap();

        let topics: Vec<_> = transport.messages.iter().map(|m| m.topic.as_str()).collect();
        assert_eq!(topics.len(), 6);
        assert!(topics[0].ends_with("/error"));
        assert!(topics[1].ends_with("/telemetry"));
        assert_eq!(transport.messages[0].json()["error_type"], "OVERVOLTAGE");
        assert_eq!(transport.on("ch1/status")[0].json()["state"], "FAULTED");
        assert!(!station.controller().any_dirty());
    }
}
