//! The owned aggregate behind the control loop.
//!
//! A [`Station`] holds both sensors, the channel controller, the safety monitor and the
//! cadence timers. The embedding application calls [`Station::tick`] once per loop iteration
//! with a fresh clock reading, then publishes whatever the returned [`Tick`] says is due.

use embedded_hal::{delay::DelayNs, digital::OutputPin, i2c::I2c, pwm::SetDutyCycle};
use tracing::{info, warn};

use crate::{
    channel::{ChannelController, ChannelId, ChannelOutputs},
    config::{Config, SensorConfig},
    monitor::{Alerts, SafetyMonitor},
    register::Averaging,
    schedule::{Due, Schedule},
    sensor::{Ina226, Measurement},
    time::{Instant, elapsed},
};

/// Follow-up a command asks the embedding application to carry out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Publish channel status now.
    PublishStatus,
    /// Reboot the device.
    Restart,
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub due: Due,
    /// Findings of the safety monitor, empty unless sensors were polled.
    pub alerts: Alerts,
}

pub struct Station<I2C, P, D> {
    sensors: [Ina226<I2C>; 2],
    controller: ChannelController<P, D>,
    monitor: SafetyMonitor,
    schedule: Schedule,
    samples: [Measurement; 2],
    sensor_config: SensorConfig,
    started: Instant,
}

impl<I2C: I2c, P: OutputPin, D: SetDutyCycle> Station<I2C, P, D> {
    /// `buses` are the handles each sensor uses, usually two devices on one shared bus.
    pub fn new(
        config: &Config,
        buses: [I2C; 2],
        outputs: [ChannelOutputs<P, D>; 2],
        started: Instant,
    ) -> Self {
        let [bus_1, bus_2] = buses;
        let [out_1, out_2] = outputs;
        let [addr_1, addr_2] = config.sensor.addresses;
        Self {
            sensors: [Ina226::new(bus_1, addr_1), Ina226::new(bus_2, addr_2)],
            controller: ChannelController::new(out_1, out_2),
            monitor: SafetyMonitor::new(config.thresholds()),
            schedule: Schedule::new(config.intervals()),
            samples: [Measurement::invalid(started); 2],
            sensor_config: config.sensor.clone(),
            started,
        }
    }

    /// Bring up outputs and sensors.
    ///
    /// A sensor that fails is left out of evaluation and its channel reports invalid samples.
    /// Returns which sensors came up.
    pub fn begin(&mut self, delay: &mut impl DelayNs) -> [bool; 2] {
        self.controller.begin();

        let config = &self.sensor_config;
        let averaging = config.averaging().unwrap_or(Averaging::Samples16);
        let mut found = [false; 2];
        for id in ChannelId::ALL {
            let sensor = &mut self.sensors[id.index()];
            let result = sensor.begin(delay).and_then(|_| {
                sensor.calibrate(config.shunt_ohms, config.max_current_a)?;
                if averaging != Averaging::Samples16 {
                    sensor.set_averaging(averaging)?;
                }
                Ok(())
            });
            match result {
                Ok(()) => {
                    info!(channel = id.number(), address = sensor.address(), "sensor ready");
                    found[id.index()] = true;
                }
                Err(err) => warn!(
                    channel = id.number(),
                    address = sensor.address(),
                    %err,
                    "sensor not available"
                ),
            }
        }
        found
    }

    /// One loop iteration: sample and protect when the sensor cadence is due, then work out
    /// which publications are due.
    pub fn tick(&mut self, now: Instant) -> Tick {
        let mut alerts = Alerts::new();
        let sensor = self.schedule.poll_sensor(now);
        if sensor {
            for id in ChannelId::ALL {
                self.samples[id.index()] = self.sensors[id.index()].sample(now);
            }
            alerts = self.monitor.poll(&self.samples, &mut self.controller, now);
        }

        let due = Due {
            sensor,
            ..self
                .schedule
                .poll_publications(now, self.controller.any_dirty())
        };
        Tick { due, alerts }
    }

    pub fn controller(&self) -> &ChannelController<P, D> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ChannelController<P, D> {
        &mut self.controller
    }

    pub fn monitor(&self) -> &SafetyMonitor {
        &self.monitor
    }

    pub fn samples(&self) -> &[Measurement; 2] {
        &self.samples
    }

    pub fn sample(&self, id: ChannelId) -> &Measurement {
        &self.samples[id.index()]
    }

    pub fn sensor_ok(&self, id: ChannelId) -> bool {
        self.sensors[id.index()].is_initialized()
    }

    pub fn sensor_mut(&mut self, id: ChannelId) -> &mut Ina226<I2C> {
        &mut self.sensors[id.index()]
    }

    /// Whole seconds since the station was created.
    pub fn uptime_secs(&self, now: Instant) -> u64 {
        elapsed(self.started, now).to_secs()
    }
}
