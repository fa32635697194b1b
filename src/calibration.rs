//! Calibration and LSB scaling for the INA226.
//!
//! The bus and shunt voltage registers have fixed scaling. Current and power depend on the
//! shunt resistor and the largest current we expect to measure, which together determine the
//! calibration register value.

/// Bus voltage register LSB, in volts.
pub const BUS_VOLTAGE_LSB_V: f32 = 0.001_25;

/// Shunt voltage register LSB, in volts.
pub const SHUNT_VOLTAGE_LSB_V: f32 = 0.000_002_5;

/// Fixed internal scaling constant from the datasheet calibration equation.
const CALIBRATION_SCALE: f32 = 0.005_12;

/// Power LSB is always this multiple of the current LSB.
const POWER_LSB_RATIO: f32 = 25.0;

/// Full scale of the signed current register.
const CURRENT_FULL_SCALE: f32 = 32_768.0;

/// Scaling derived from the shunt and expected current range.
///
/// A default (all zero) value means "not calibrated". Current and power are then computed from
/// the shunt voltage instead of the calibrated registers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Calibration {
    /// Shunt resistance in ohms.
    pub shunt_ohms: f32,
    /// Amps per current register count.
    pub current_lsb: f32,
    /// Watts per power register count.
    pub power_lsb: f32,
    /// Value written to the calibration register.
    pub register_value: u16,
}

/// Why a calibration could not be derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationFault {
    /// Shunt or current was zero, negative or not a number.
    NonPositive,
    /// The register value would not fit in 16 bits.
    OutOfRange(f32),
}

impl Calibration {
    /// Uncalibrated scaling with the given shunt, used for the shunt-voltage fallback path.
    pub const fn uncalibrated(shunt_ohms: f32) -> Self {
        Self {
            shunt_ohms,
            current_lsb: 0.0,
            power_lsb: 0.0,
            register_value: 0,
        }
    }

    /// Derive scaling from the shunt resistance and the maximum expected current.
    ///
    /// # Arguments
    ///
    /// * `shunt_ohms` - Shunt resistance in ohms.
    /// * `max_current_a` - Largest current that should be representable, in amps.
    pub fn new(shunt_ohms: f32, max_current_a: f32) -> Result<Self, CalibrationFault> {
        if !(shunt_ohms > 0.0) || !(max_current_a > 0.0) {
            return Err(CalibrationFault::NonPositive);
        }

        let current_lsb = max_current_a / CURRENT_FULL_SCALE;
        let power_lsb = POWER_LSB_RATIO * current_lsb;
        let value = CALIBRATION_SCALE / (current_lsb * shunt_ohms);
        if !(value < 65_536.0) {
            return Err(CalibrationFault::OutOfRange(value));
        }

        Ok(Self {
            shunt_ohms,
            current_lsb,
            power_lsb,
            // Truncation is what the datasheet asks for.
            register_value: value as u16,
        })
    }

    /// Whether the calibrated current and power registers can be trusted.
    #[inline]
    pub fn is_calibrated(&self) -> bool {
        self.current_lsb != 0.0
    }

    /// Convert the raw bus voltage register to volts.
    #[inline]
    pub fn raw_to_bus_volts(raw: u16) -> f32 {
        raw as f32 * BUS_VOLTAGE_LSB_V
    }

    /// Convert the raw (two's complement) shunt voltage register to volts.
    #[inline]
    pub fn raw_to_shunt_volts(raw: u16) -> f32 {
        raw as i16 as f32 * SHUNT_VOLTAGE_LSB_V
    }

    /// Convert the raw (two's complement) current register to amps.
    #[inline]
    pub fn raw_to_amps(&self, raw: u16) -> f32 {
        raw as i16 as f32 * self.current_lsb
    }

    /// Convert the raw power register to watts.
    #[inline]
    pub fn raw_to_watts(&self, raw: u16) -> f32 {
        raw as f32 * self.power_lsb
    }

    /// Ohm's law fallback: shunt voltage over shunt resistance.
    #[inline]
    pub fn shunt_volts_to_amps(&self, shunt_volts: f32) -> f32 {
        if self.shunt_ohms > 0.0 {
            shunt_volts / self.shunt_ohms
        } else {
            0.0
        }
    }
}
