//! This crate provides the control core of a dual channel load guard built around two TI INA226
//! current/power monitors.
//!
//! Each channel has a load switch and a PWM driven load simulator. The safety monitor watches
//! both sensors and latches a fault, switching the channel off, on sustained overcurrent or on
//! overvoltage. Undervoltage is only reported.
//!
//! The core is `no_std` and talks to hardware through `embedded-hal` traits:
//! * sensors over I2C, usually two devices sharing one bus
//! * switches as `OutputPin`
//! * simulators as `SetDutyCycle`
//! * the debug console over `embedded-io`
//!
//! With the default `std` feature the crate also provides JSON telemetry, inbound command
//! handling and TOML configuration loading. Disable default features for bare metal targets.
//!
//! Default wiring:
//! * Channel 1 sensor: 0x40
//! * Channel 2 sensor: 0x41
//! * Shunt: 0.1 Ohm, 3.0 A full scale
//! * Simulator PWM: 5 kHz, 8 bit

#![cfg_attr(not(feature = "std"), no_std)]

pub mod calibration;
pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod monitor;
pub mod register;
pub mod schedule;
pub mod sensor;
pub mod station;
pub mod time;

#[cfg(feature = "std")]
pub mod command;
#[cfg(feature = "std")]
pub mod telemetry;

#[cfg(test)]
mod mock;
