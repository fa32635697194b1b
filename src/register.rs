//! This module is used to define the registers on the INA226.
//!
//! Every register is 16 bits wide and transferred most significant byte first.

use modular_bitfield::prelude::*;
use strum_macros::EnumIter;

#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum Ina226Register {
    /// __R/W__ - Configuration.
    ///
    /// See [`ConfigRegister`] for the layout.
    Config = 0x00,
    /// __R__ - Shunt voltage.
    ///
    /// Signed, LSB = 2.5 µV.
    ShuntVoltage = 0x01,
    /// __R__ - Bus voltage.
    ///
    /// Unsigned, LSB = 1.25 mV.
    BusVoltage = 0x02,
    /// __R__ - Power. Scaled by the power LSB derived from calibration.
    Power = 0x03,
    /// __R__ - Current. Signed, scaled by the current LSB derived from calibration.
    Current = 0x04,
    /// __R/W__ - Calibration.
    Calibration = 0x05,
    /// __R/W__ - Alert configuration and conversion ready flag.
    MaskEnable = 0x06,
    /// __R/W__ - Alert limit.
    AlertLimit = 0x07,
    /// __R__ - Manufacturer ID. `0x5449` for TI parts.
    ManufacturerId = 0xFE,
    /// __R__ - Die ID. `0x2260` for the INA226.
    DieId = 0xFF,
}

impl From<Ina226Register> for u8 {
    fn from(value: Ina226Register) -> Self {
        value as u8
    }
}

/// Manufacturer ID reported by genuine Texas Instruments parts.
pub const TI_MANUFACTURER_ID: u16 = 0x5449;

/// Die ID reported by the INA226.
pub const INA226_DIE_ID: u16 = 0x2260;

/// Configuration register value after power-on or soft reset.
pub const POWER_ON_CONFIG: u16 = 0x4127;

/// Layout of the configuration register.
///
/// Fields are listed from the least significant bit upwards. Bits 12-14 are read-only
/// and ignored.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigRegister {
    pub mode: B3,
    pub shunt_conversion: B3,
    pub bus_conversion: B3,
    pub averaging: B3,
    #[skip]
    __: B3,
    pub reset: bool,
}

impl From<u16> for ConfigRegister {
    fn from(value: u16) -> Self {
        ConfigRegister::from_bytes(value.to_le_bytes())
    }
}

impl From<ConfigRegister> for u16 {
    fn from(value: ConfigRegister) -> Self {
        u16::from_le_bytes(value.into_bytes())
    }
}

impl ConfigRegister {
    /// 16 averages, 1.1 ms bus and shunt conversions, continuous shunt and bus.
    pub fn recommended() -> Self {
        ConfigRegister::new()
            .with_averaging(Averaging::Samples16 as u8)
            .with_bus_conversion(ConversionTime::Us1100 as u8)
            .with_shunt_conversion(ConversionTime::Us1100 as u8)
            .with_mode(OperatingMode::ShuntAndBusContinuous as u8)
    }

    /// Configuration word with only the reset bit set.
    pub fn soft_reset() -> Self {
        ConfigRegister::new().with_reset(true)
    }
}

/// Number of samples averaged per reported value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum Averaging {
    Samples1 = 0,
    Samples4 = 1,
    Samples16 = 2,
    Samples64 = 3,
    Samples128 = 4,
    Samples256 = 5,
    Samples512 = 6,
    Samples1024 = 7,
}

impl Averaging {
    /// Number of samples this setting averages over.
    pub const fn samples(self) -> u16 {
        match self {
            Averaging::Samples1 => 1,
            Averaging::Samples4 => 4,
            Averaging::Samples16 => 16,
            Averaging::Samples64 => 64,
            Averaging::Samples128 => 128,
            Averaging::Samples256 => 256,
            Averaging::Samples512 => 512,
            Averaging::Samples1024 => 1024,
        }
    }

    /// Pick the setting for an exact sample count.
    pub fn from_samples(samples: u16) -> Option<Self> {
        use strum::IntoEnumIterator;
        Averaging::iter().find(|a| a.samples() == samples)
    }
}

impl TryFrom<u8> for Averaging {
    type Error = ();
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use strum::IntoEnumIterator;
        Averaging::iter().find(|a| *a as u8 == value).ok_or(())
    }
}

/// Conversion time for either the bus or the shunt measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum ConversionTime {
    Us140 = 0,
    Us204 = 1,
    Us332 = 2,
    Us588 = 3,
    /// Power-on default.
    Us1100 = 4,
    Us2116 = 5,
    Us4156 = 6,
    Us8244 = 7,
}

impl TryFrom<u8> for ConversionTime {
    type Error = ();
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use strum::IntoEnumIterator;
        ConversionTime::iter().find(|t| *t as u8 == value).ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum OperatingMode {
    PowerDown = 0,
    ShuntTriggered = 1,
    BusTriggered = 2,
    ShuntAndBusTriggered = 3,
    PowerDownAlt = 4,
    ShuntContinuous = 5,
    BusContinuous = 6,
    /// Power-on default.
    ShuntAndBusContinuous = 7,
}

impl TryFrom<u8> for OperatingMode {
    type Error = ();
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use strum::IntoEnumIterator;
        OperatingMode::iter().find(|m| *m as u8 == value).ok_or(())
    }
}
