//! We use this mocking module in unit tests to emulate the I2C bus, the output pins and the
//! debug serial port.

use core::cell::Cell;
use core::convert::Infallible;

use crate::register::{INA226_DIE_ID, Ina226Register, POWER_ON_CONFIG, TI_MANUFACTURER_ID};

/// One emulated INA226 on the mock bus.
struct MockDevice {
    address: u8,
    /// Register file, indexed by register address.
    registers: [u16; 256],
    /// Register pointer, as left by the last write.
    pointer: u8,
}

impl MockDevice {
    fn new(address: u8) -> Self {
        let mut device = Self {
            address,
            registers: [0; 256],
            pointer: 0,
        };
        device.power_on();
        device
    }

    fn power_on(&mut self) {
        self.registers = [0; 256];
        self.registers[Ina226Register::Config as usize] = POWER_ON_CONFIG;
        self.registers[Ina226Register::ManufacturerId as usize] = TI_MANUFACTURER_ID;
        self.registers[Ina226Register::DieId as usize] = INA226_DIE_ID;
    }

    fn write(&mut self, register: u8, value: u16) {
        if register == Ina226Register::Config as u8 && value & 0x8000 != 0 {
            self.power_on();
        } else {
            self.registers[register as usize] = value;
        }
    }
}

/// A single register write seen on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub address: u8,
    pub register: u8,
    pub value: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockI2cError {
    /// Nothing answered at the requested address.
    NoAcknowledge,
    /// Simulated bus fault on read.
    Bus,
}

impl embedded_hal::i2c::Error for MockI2cError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            MockI2cError::NoAcknowledge => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            MockI2cError::Bus => ErrorKind::Bus,
        }
    }
}

/// Our mock type used to emulate a shared I2C bus with INA226 devices on it.
pub struct MockI2c {
    devices: heapless::Vec<MockDevice, 4>,
    /// Every register write, in order.
    writes: heapless::Vec<RegisterWrite, 64>,
    /// Flag to simulate read errors
    should_error_on_read: bool,
}

impl embedded_hal::i2c::ErrorType for MockI2c {
    type Error = MockI2cError;
}

impl embedded_hal::i2c::I2c for MockI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        use embedded_hal::i2c::Operation;

        let fail_reads = self.should_error_on_read;
        let device = self
            .devices
            .iter_mut()
            .find(|d| d.address == address)
            .ok_or(MockI2cError::NoAcknowledge)?;

        for operation in operations.iter_mut() {
            match operation {
                Operation::Write(bytes) => {
                    // An empty write is a bare address probe.
                    if let Some(&register) = bytes.first() {
                        device.pointer = register;
                    }
                    if let &[register, msb, lsb, ..] = &bytes[..] {
                        let value = u16::from_be_bytes([msb, lsb]);
                        device.write(register, value);
                        let _ = self.writes.push(RegisterWrite {
                            address,
                            register,
                            value,
                        });
                    }
                }
                Operation::Read(buffer) => {
                    if fail_reads {
                        return Err(MockI2cError::Bus);
                    }
                    let bytes = device.registers[device.pointer as usize].to_be_bytes();
                    for (i, byte) in buffer.iter_mut().enumerate() {
                        *byte = bytes.get(i).copied().unwrap_or(0);
                    }
                }
            }
        }
        Ok(())
    }
}

impl MockI2c {
    /// Create a bus with nothing attached.
    pub fn new() -> Self {
        Self {
            devices: heapless::Vec::new(),
            writes: heapless::Vec::new(),
            should_error_on_read: false,
        }
    }

    /// Attach an INA226 in its power-on state at `address`.
    pub fn with_ina226(mut self, address: u8) -> Self {
        let _ = self.devices.push(MockDevice::new(address));
        self
    }

    /// Preload a register, as if the device had measured something.
    pub fn set_register(&mut self, address: u8, register: Ina226Register, value: u16) {
        if let Some(device) = self.devices.iter_mut().find(|d| d.address == address) {
            device.registers[register as usize] = value;
        }
    }

    /// Current content of a device register.
    pub fn register(&self, address: u8, register: Ina226Register) -> u16 {
        self.devices
            .iter()
            .find(|d| d.address == address)
            .map(|d| d.registers[register as usize])
            .unwrap_or(0)
    }

    /// Every register write seen so far.
    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Configure whether read operations should fail with an error
    pub fn set_read_error(&mut self, should_error: bool) {
        self.should_error_on_read = should_error;
    }
}

/// Output pin whose level is observable through a borrowed cell.
pub struct MockPin<'a> {
    level: &'a Cell<bool>,
}

impl<'a> MockPin<'a> {
    pub fn new(level: &'a Cell<bool>) -> Self {
        Self { level }
    }
}

impl embedded_hal::digital::ErrorType for MockPin<'_> {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for MockPin<'_> {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.level.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.level.set(true);
        Ok(())
    }
}

/// 8 bit PWM output whose duty is observable through a borrowed cell.
pub struct MockPwm<'a> {
    duty: &'a Cell<u16>,
}

impl<'a> MockPwm<'a> {
    pub fn new(duty: &'a Cell<u16>) -> Self {
        Self { duty }
    }
}

impl embedded_hal::pwm::ErrorType for MockPwm<'_> {
    type Error = Infallible;
}

impl embedded_hal::pwm::SetDutyCycle for MockPwm<'_> {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<(), Self::Error> {
        self.duty.set(duty);
        Ok(())
    }
}

/// Delay which returns immediately but remembers how long it was asked to wait.
#[derive(Default)]
pub struct MockDelay {
    pub total_ns: u64,
}

impl embedded_hal::delay::DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}

/// Our mock type used to emulate the debug serial port.
pub struct MockSerial {
    /// Buffer to store data written to the mock serial port
    write_buffer: heapless::Vec<u8, 1024>,
    /// Buffer containing pre-configured data to be read
    read_buffer: heapless::Vec<u8, 256>,
    /// Current position in the read buffer
    read_position: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum MockSerialError {
    /// Simulated buffer overflow
    #[error("Mock serial write buffer overflowed")]
    BufferOverflow,
    /// Would block - no data available
    #[error("Mock serial has no data to read")]
    WouldBlock,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
            MockSerialError::WouldBlock => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.write_buffer
            .extend_from_slice(buf)
            .map_err(|_| MockSerialError::BufferOverflow)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.read_position >= self.read_buffer.len() {
            return Err(MockSerialError::WouldBlock);
        }

        let available = &self.read_buffer[self.read_position..];
        let count = core::cmp::min(buf.len(), available.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.read_position += count;
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_position < self.read_buffer.len())
    }
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            write_buffer: heapless::Vec::new(),
            read_buffer: heapless::Vec::new(),
            read_position: 0,
        }
    }

    /// Queue bytes to be returned by `read()`, after anything not yet read.
    pub fn push_input(&mut self, data: &[u8]) {
        let _ = self.read_buffer.extend_from_slice(data);
    }

    /// Everything written so far, as text.
    pub fn output(&self) -> &str {
        core::str::from_utf8(&self.write_buffer).unwrap_or("")
    }

    pub fn clear_output(&mut self) {
        self.write_buffer.clear();
    }
}

/// One message handed to [`MockPublisher`].
#[cfg(feature = "std")]
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retained: bool,
}

#[cfg(feature = "std")]
impl Published {
    /// Payload parsed as JSON.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

/// Transport which records every publication.
#[cfg(feature = "std")]
pub struct MockPublisher {
    pub connected: bool,
    pub messages: Vec<Published>,
}

#[cfg(feature = "std")]
impl MockPublisher {
    pub fn new() -> Self {
        Self {
            connected: true,
            messages: Vec::new(),
        }
    }

    /// Messages published to topics ending in `suffix`.
    pub fn on(&self, suffix: &str) -> Vec<&Published> {
        self.messages
            .iter()
            .filter(|m| m.topic.ends_with(suffix))
            .collect()
    }
}

#[cfg(feature = "std")]
impl crate::telemetry::Publisher for MockPublisher {
    type Error = ();

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), Self::Error> {
        self.messages.push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retained,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{Error, ErrorKind, I2c};
    use embedded_io::{Read, ReadReady, Write};

    #[test]
    fn absent_address_is_not_acknowledged() {
        let mut bus = MockI2c::new().with_ina226(0x40);
        assert!(bus.write(0x40, &[]).is_ok());
        let err = bus.write(0x41, &[]).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::NoAcknowledge(_)));
    }

    #[test]
    fn register_write_then_read_back() {
        let mut bus = MockI2c::new().with_ina226(0x40);
        bus.write(0x40, &[0x05, 0x02, 0x2F]).unwrap();
        let mut buf = [0u8; 2];
        bus.write_read(0x40, &[0x05], &mut buf).unwrap();
        assert_eq!(buf, [0x02, 0x2F]);
        assert_eq!(
            bus.writes(),
            &[RegisterWrite {
                address: 0x40,
                register: 0x05,
                value: 0x022F
            }]
        );
    }

    #[test]
    fn soft_reset_restores_power_on_state() {
        let mut bus = MockI2c::new().with_ina226(0x40);
        bus.set_register(0x40, Ina226Register::Calibration, 559);
        bus.write(0x40, &[0x00, 0x80, 0x00]).unwrap();
        assert_eq!(bus.register(0x40, Ina226Register::Calibration), 0);
        assert_eq!(bus.register(0x40, Ina226Register::Config), POWER_ON_CONFIG);
    }

    #[test]
    fn read_error_simulation() {
        let mut bus = MockI2c::new().with_ina226(0x40);
        bus.set_read_error(true);
        let mut buf = [0u8; 2];
        assert_eq!(
            bus.write_read(0x40, &[0x02], &mut buf),
            Err(MockI2cError::Bus)
        );
    }

    #[test]
    fn serial_round_trip() {
        let mut serial = MockSerial::new();
        assert!(!serial.read_ready().unwrap());
        serial.push_input(b"help\n");
        assert!(serial.read_ready().unwrap());

        let mut buf = [0u8; 3];
        assert_eq!(serial.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(serial.read(&mut buf).unwrap(), 2);
        assert!(matches!(
            serial.read(&mut buf),
            Err(MockSerialError::WouldBlock)
        ));

        serial.write_all(b"ok\r\n").unwrap();
        assert_eq!(serial.output(), "ok\r\n");
    }
}
