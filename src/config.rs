//! Runtime configuration.
//!
//! Every field has a default, so a configuration file only needs the keys it changes.
//!
//! ```toml
//! [device]
//! id = "bench-guard-01"
//!
//! [protection]
//! overcurrent_a = 2.5
//! overcurrent_duration_ms = 250
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    calibration::Calibration,
    channel::truncated,
    error::ConfigError,
    monitor::Thresholds,
    register::Averaging,
    schedule::Intervals,
    time::Duration,
};

pub type DeviceId = heapless::String<32>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub sensor: SensorConfig,
    pub protection: ProtectionConfig,
    pub cadence: CadenceConfig,
    pub output: OutputConfig,
}

/// Identity reported in every outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub name: heapless::String<32>,
    pub firmware: heapless::String<16>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: truncated("anh_hong_dep_trai_ittn"),
            name: truncated("ESP32 Power Monitor"),
            firmware: truncated("1.0.0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// 7-bit bus addresses of the channel 1 and channel 2 sensors.
    pub addresses: [u8; 2],
    pub shunt_ohms: f32,
    pub max_current_a: f32,
    /// Samples averaged per reading, one of 1, 4, 16, 64, 128, 256, 512, 1024.
    pub averaging: u16,
    pub i2c_frequency_hz: u32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            addresses: [0x40, 0x41],
            shunt_ohms: 0.1,
            max_current_a: 3.0,
            averaging: 16,
            i2c_frequency_hz: 400_000,
        }
    }
}

impl SensorConfig {
    pub fn averaging(&self) -> Option<Averaging> {
        Averaging::from_samples(self.averaging)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub overcurrent_a: f32,
    pub overcurrent_duration_ms: u64,
    pub overvoltage_v: f32,
    pub undervoltage_v: f32,
    pub undervoltage_cooldown_ms: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        let thresholds = Thresholds::default();
        Self {
            overcurrent_a: thresholds.overcurrent_a,
            overcurrent_duration_ms: thresholds.overcurrent_duration.to_millis(),
            overvoltage_v: thresholds.overvoltage_v,
            undervoltage_v: thresholds.undervoltage_v,
            undervoltage_cooldown_ms: thresholds.undervoltage_cooldown.to_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub sensor_ms: u64,
    pub telemetry_ms: u64,
    pub status_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        let intervals = Intervals::default();
        Self {
            sensor_ms: intervals.sensor.to_millis(),
            telemetry_ms: intervals.telemetry.to_millis(),
            status_ms: intervals.status.to_millis(),
            heartbeat_ms: intervals.heartbeat.to_millis(),
        }
    }
}

/// PWM carrier for the duty outputs. Only 8 bit resolution is supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub pwm_frequency_hz: u32,
    pub pwm_resolution_bits: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            pwm_frequency_hz: 5000,
            pwm_resolution_bits: 8,
        }
    }
}

impl Config {
    /// Parse TOML, fill in defaults and validate.
    #[cfg(feature = "std")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn thresholds(&self) -> Thresholds {
        let p = &self.protection;
        Thresholds {
            overcurrent_a: p.overcurrent_a,
            overcurrent_duration: Duration::millis(p.overcurrent_duration_ms),
            overvoltage_v: p.overvoltage_v,
            undervoltage_v: p.undervoltage_v,
            undervoltage_cooldown: Duration::millis(p.undervoltage_cooldown_ms),
        }
    }

    pub fn intervals(&self) -> Intervals {
        let c = &self.cadence;
        Intervals {
            sensor: Duration::millis(c.sensor_ms),
            telemetry: Duration::millis(c.telemetry_ms),
            status: Duration::millis(c.status_ms),
            heartbeat: Duration::millis(c.heartbeat_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(msg: &'static str) -> Result<(), ConfigError> {
            Err(ConfigError::Invalid(msg))
        }

        if self.device.id.is_empty() {
            return invalid("device.id cannot be empty");
        }

        let s = &self.sensor;
        if s.addresses[0] == s.addresses[1] {
            return invalid("sensor.addresses must differ");
        }
        if s.addresses.iter().any(|&a| a == 0 || a > 0x7F) {
            return invalid("sensor.addresses must be 7-bit and non-zero");
        }
        if Calibration::new(s.shunt_ohms, s.max_current_a).is_err() {
            return invalid("sensor.shunt_ohms and sensor.max_current_a give no usable calibration");
        }
        if s.averaging().is_none() {
            return invalid("sensor.averaging is not a supported sample count");
        }

        let p = &self.protection;
        if !(p.overcurrent_a > 0.0 && p.overvoltage_v > 0.0 && p.undervoltage_v > 0.0) {
            return invalid("protection thresholds must be positive");
        }
        if p.undervoltage_v >= p.overvoltage_v {
            return invalid("protection.undervoltage_v must be below protection.overvoltage_v");
        }

        let c = &self.cadence;
        if c.sensor_ms == 0 {
            return invalid("cadence.sensor_ms must be positive");
        }
        if c.sensor_ms >= c.telemetry_ms {
            return invalid("cadence.sensor_ms must be shorter than cadence.telemetry_ms");
        }

        if self.output.pwm_resolution_bits != 8 {
            return invalid("output.pwm_resolution_bits must be 8");
        }
        Ok(())
    }
}
