use embedded_hal::{delay::DelayNs, i2c::I2c};
use tracing::{debug, info, warn};

use crate::{
    calibration::{Calibration, CalibrationFault},
    error::{Result, SensorError},
    register::{
        Averaging, ConfigRegister, ConversionTime, Ina226Register, OperatingMode,
        TI_MANUFACTURER_ID,
    },
    time::Instant,
};

/// Shunt assumed until [`Ina226::calibrate`] is called.
pub const DEFAULT_SHUNT_OHMS: f32 = 0.1;

/// Settle time after the soft reset bit is written.
const RESET_SETTLE_MS: u32 = 1;

/// Extra settle time during bring-up before the configuration is written.
const BEGIN_SETTLE_MS: u32 = 10;

/// One bus, shunt, current and power reading in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Reading {
    /// Bus voltage in volts.
    pub bus_voltage: f32,
    /// Current in amps, never negative.
    pub current: f32,
    /// Power in watts, never negative.
    pub power: f32,
}

/// The latest reading of a channel together with when it was taken.
///
/// `valid` is false when the channel has no working sensor. Such samples carry zeros and are
/// ignored by the safety monitor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub bus_voltage: f32,
    pub current: f32,
    pub power: f32,
    pub valid: bool,
    pub timestamp: Instant,
}

impl Measurement {
    pub fn new(reading: Reading, timestamp: Instant) -> Self {
        Self {
            bus_voltage: reading.bus_voltage,
            current: reading.current,
            power: reading.power,
            valid: true,
            timestamp,
        }
    }

    pub fn invalid(timestamp: Instant) -> Self {
        Self {
            bus_voltage: 0.0,
            current: 0.0,
            power: 0.0,
            valid: false,
            timestamp,
        }
    }
}

/// You can create an Ina226 using any bus which implements [embedded_hal::i2c::I2c].
///
/// Two sensors share one physical bus in this system, so `I2C` is typically a shared-bus device
/// handle such as `embedded_hal_bus::i2c::RefCellDevice`.
///
/// Raw register accessors propagate bus errors. The unit-converting `read_*` methods instead
/// report a failed transfer as a zero reading. Retrying is left to the caller.
pub struct Ina226<I2C> {
    i2c: I2C,
    /// 7-bit bus address. Default for the part is 0x40.
    address: u8,
    calibration: Calibration,
    initialized: bool,
}

impl<I2C: I2c> Ina226<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self {
            i2c,
            address,
            calibration: Calibration::uncalibrated(DEFAULT_SHUNT_OHMS),
            initialized: false,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Whether [`Self::begin`] has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Access the underlying bus, e.g. to scan it.
    pub fn bus_mut(&mut self) -> &mut I2C {
        &mut self.i2c
    }

    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Probe the address. Succeeds if the device acknowledges.
    pub fn connect(&mut self) -> Result<(), I2C::Error> {
        self.i2c
            .write(self.address, &[])
            .map_err(|_| SensorError::NotFound {
                address: self.address,
            })
    }

    /// Full bring-up: probe, check identity, reset and apply [`ConfigRegister::recommended`].
    ///
    /// A foreign manufacturer id is only logged, some clones report something else but work fine.
    pub fn begin(&mut self, delay: &mut impl DelayNs) -> Result<(), I2C::Error> {
        self.initialized = false;
        self.connect()?;

        let manufacturer = self.manufacturer_id()?;
        if manufacturer != TI_MANUFACTURER_ID {
            warn!(
                address = self.address,
                manufacturer, "unexpected INA226 manufacturer id"
            );
        }
        let die = self.die_id()?;
        debug!(address = self.address, die, "INA226 die id");

        self.reset(delay)?;
        delay.delay_ms(BEGIN_SETTLE_MS);
        self.set_config(ConfigRegister::recommended())?;

        self.initialized = true;
        info!(address = self.address, "INA226 initialized");
        Ok(())
    }

    /// Soft reset to power-on defaults.
    ///
    /// The device forgets its calibration register, so we drop back to the uncalibrated
    /// fallback until [`Self::calibrate`] is called again.
    pub fn reset(&mut self, delay: &mut impl DelayNs) -> Result<(), I2C::Error> {
        self.write_register(Ina226Register::Config, ConfigRegister::soft_reset())?;
        delay.delay_ms(RESET_SETTLE_MS);
        self.calibration = Calibration::uncalibrated(self.calibration.shunt_ohms);
        Ok(())
    }

    /// Write the whole configuration register.
    pub fn set_config(&mut self, config: ConfigRegister) -> Result<(), I2C::Error> {
        self.write_register(Ina226Register::Config, config)
    }

    /// Read back the configuration register.
    pub fn config(&mut self) -> Result<ConfigRegister, I2C::Error> {
        Ok(ConfigRegister::from(
            self.read_register(Ina226Register::Config)?,
        ))
    }

    /// Set the number of averaged samples, leaving the other fields untouched.
    pub fn set_averaging(&mut self, averaging: Averaging) -> Result<(), I2C::Error> {
        let config = self.config()?.with_averaging(averaging as u8);
        self.set_config(config)
    }

    /// Set the bus voltage conversion time, leaving the other fields untouched.
    pub fn set_bus_conversion_time(&mut self, time: ConversionTime) -> Result<(), I2C::Error> {
        let config = self.config()?.with_bus_conversion(time as u8);
        self.set_config(config)
    }

    /// Set the shunt voltage conversion time, leaving the other fields untouched.
    pub fn set_shunt_conversion_time(&mut self, time: ConversionTime) -> Result<(), I2C::Error> {
        let config = self.config()?.with_shunt_conversion(time as u8);
        self.set_config(config)
    }

    /// Set the operating mode, leaving the other fields untouched.
    pub fn set_mode(&mut self, mode: OperatingMode) -> Result<(), I2C::Error> {
        let config = self.config()?.with_mode(mode as u8);
        self.set_config(config)
    }

    /// Compute and write the calibration register.
    ///
    /// # Arguments
    ///
    /// * `shunt_ohms` - Shunt resistance in ohms.
    /// * `max_current_a` - Maximum expected current in amps.
    pub fn calibrate(&mut self, shunt_ohms: f32, max_current_a: f32) -> Result<(), I2C::Error> {
        let calibration = Calibration::new(shunt_ohms, max_current_a).map_err(|e| match e {
            CalibrationFault::NonPositive => SensorError::InvalidCalibration,
            CalibrationFault::OutOfRange(value) => SensorError::CalibrationOutOfRange { value },
        })?;

        self.write_register(Ina226Register::Calibration, calibration.register_value)?;
        self.calibration = calibration;

        info!(
            address = self.address,
            current_lsb = calibration.current_lsb,
            power_lsb = calibration.power_lsb,
            register = calibration.register_value,
            "INA226 calibrated"
        );
        Ok(())
    }

    /// Should be `0x5449` for TI.
    pub fn manufacturer_id(&mut self) -> Result<u16, I2C::Error> {
        self.read_register(Ina226Register::ManufacturerId)
    }

    /// Should be `0x2260` for the INA226.
    pub fn die_id(&mut self) -> Result<u16, I2C::Error> {
        self.read_register(Ina226Register::DieId)
    }

    /// Return the bus voltage in volts.
    pub fn read_bus_voltage(&mut self) -> f32 {
        Calibration::raw_to_bus_volts(self.read_or_zero(Ina226Register::BusVoltage))
    }

    /// Return the shunt voltage in volts. May be negative.
    pub fn read_shunt_voltage(&mut self) -> f32 {
        Calibration::raw_to_shunt_volts(self.read_or_zero(Ina226Register::ShuntVoltage))
    }

    /// Return the current in amps.
    ///
    /// Uses the current register once calibrated, otherwise shunt voltage over resistance.
    pub fn read_current(&mut self) -> f32 {
        if self.calibration.is_calibrated() {
            let raw = self.read_or_zero(Ina226Register::Current);
            self.calibration.raw_to_amps(raw)
        } else {
            let shunt = self.read_shunt_voltage();
            self.calibration.shunt_volts_to_amps(shunt)
        }
    }

    /// Return the power in watts.
    ///
    /// Uses the power register once calibrated, otherwise bus voltage times current.
    pub fn read_power(&mut self) -> f32 {
        if self.calibration.power_lsb != 0.0 {
            let raw = self.read_or_zero(Ina226Register::Power);
            self.calibration.raw_to_watts(raw)
        } else {
            self.read_bus_voltage() * self.read_current()
        }
    }

    /// Read voltage, current and power in one go.
    ///
    /// Each register is read exactly once. Noise around zero can make current and power
    /// slightly negative, which means nothing for a load, so both are clamped to zero.
    ///
    /// Returns `None` until [`Self::begin`] has succeeded.
    pub fn read_all(&mut self) -> Option<Reading> {
        if !self.initialized {
            return None;
        }

        let bus_voltage = self.read_bus_voltage();
        let (current, power) = if self.calibration.is_calibrated() {
            let current_raw = self.read_or_zero(Ina226Register::Current);
            let power_raw = self.read_or_zero(Ina226Register::Power);
            (
                self.calibration.raw_to_amps(current_raw),
                self.calibration.raw_to_watts(power_raw),
            )
        } else {
            let shunt = self.read_shunt_voltage();
            let current = self.calibration.shunt_volts_to_amps(shunt);
            (current, bus_voltage * current)
        };

        Some(Reading {
            bus_voltage,
            current: current.max(0.0),
            power: power.max(0.0),
        })
    }

    /// Take a timestamped sample. Invalid if the sensor never came up.
    pub fn sample(&mut self, now: Instant) -> Measurement {
        match self.read_all() {
            Some(reading) => Measurement::new(reading, now),
            None => Measurement::invalid(now),
        }
    }

    /// Write a register: `[register][MSB][LSB]` in one transaction.
    pub fn write_register(
        &mut self,
        register: Ina226Register,
        value: impl Into<u16>,
    ) -> Result<(), I2C::Error> {
        let [msb, lsb] = value.into().to_be_bytes();
        self.i2c.write(self.address, &[register as u8, msb, lsb])?;
        Ok(())
    }

    /// Read a register: write the pointer, then a repeated-start read of two bytes.
    pub fn read_register(&mut self, register: Ina226Register) -> Result<u16, I2C::Error> {
        let mut buff = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register as u8], &mut buff)?;
        Ok(u16::from_be_bytes(buff))
    }

    fn read_or_zero(&mut self, register: Ina226Register) -> u16 {
        match self.read_register(register) {
            Ok(value) => value,
            Err(err) => {
                warn!(address = self.address, ?register, error = ?err, "INA226 read failed");
                0
            }
        }
    }
}
