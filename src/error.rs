//! Our error types for the sensor bus and the channel controller.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, SensorError<I>>;

/// Errors raised while talking to an INA226 over I2C.
#[derive(Error, Debug)]
pub enum SensorError<I: embedded_hal::i2c::Error> {
    #[error("I2C bus error")]
    Bus(I),
    #[error("No device acknowledged at address {address:#04x}")]
    NotFound { address: u8 },
    #[error("Calibration value {value} does not fit the 16 bit register")]
    CalibrationOutOfRange { value: f32 },
    #[error("Shunt resistance and maximum current must both be positive")]
    InvalidCalibration,
}

impl<I: embedded_hal::i2c::Error> From<I> for SensorError<I> {
    fn from(err: I) -> Self {
        SensorError::Bus(err)
    }
}

/// Reasons a channel controller operation was refused.
///
/// No channel state is modified when one of these is returned.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("Invalid channel {0}, expected 1 or 2")]
    InvalidChannel(u8),
    #[error("Channel {0} is disabled")]
    Disabled(u8),
    #[error("Channel {0} has a latched fault")]
    FaultLatched(u8),
}

/// Errors raised while loading or validating a [`crate::config::Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[cfg(feature = "std")]
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration validation failed: {0}")]
    Invalid(&'static str),
}

/// Errors raised while publishing a message.
#[cfg(feature = "std")]
#[derive(Error, Debug)]
pub enum PublishError<E: core::fmt::Debug> {
    #[error("Transport rejected the message: {0:?}")]
    Transport(E),
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
