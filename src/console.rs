//! Line oriented debug console over a serial port.
//!
//! ```text
//! status   - Show system status
//! on1/off1 - Turn channel 1 ON/OFF
//! on2/off2 - Turn channel 2 ON/OFF
//! sim1 XX  - Set channel 1 simulator (0-100)
//! sim2 XX  - Set channel 2 simulator (0-100)
//! clear1   - Clear channel 1 fault
//! clear2   - Clear channel 2 fault
//! scan     - Scan I2C bus
//! restart  - Restart device
//! help     - Show this help
//! ```

use core::fmt::{self, Write as _};

use embedded_hal::{digital::OutputPin, i2c::I2c, pwm::SetDutyCycle};
use embedded_io::{Read, ReadReady, Write};
use tracing::{debug, warn};

use crate::{
    channel::ChannelId,
    station::{Effect, Station},
    time::Instant,
};

/// Longest accepted command line.
pub const LINE_LEN: usize = 64;

/// Longest single line of output, longer output is cut.
const OUTPUT_LEN: usize = 128;

const HELP: &[&str] = &[
    "--- Available Commands ---",
    "status   - Show system status",
    "on1/off1 - Turn channel 1 ON/OFF",
    "on2/off2 - Turn channel 2 ON/OFF",
    "sim1 XX  - Set channel 1 simulator (0-100)",
    "sim2 XX  - Set channel 2 simulator (0-100)",
    "clear1   - Clear channel 1 fault",
    "clear2   - Clear channel 2 fault",
    "scan     - Scan I2C bus",
    "restart  - Restart device",
    "help     - Show this help",
];

/// C `atoi`: optional leading whitespace and sign, then digits up to the first non-digit.
/// Anything unparsable is 0. Saturates instead of overflowing.
pub fn atoi(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| {
            acc.saturating_mul(10).saturating_add((d - b'0') as i64)
        });
    if negative { -magnitude } else { magnitude }
}

pub fn clamp_percent(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Collects bytes into lines without blocking.
pub struct LineReader<const N: usize = LINE_LEN> {
    buffer: heapless::Vec<u8, N>,
    overflowed: bool,
}

impl<const N: usize> Default for LineReader<N> {
    fn default() -> Self {
        Self {
            buffer: heapless::Vec::new(),
            overflowed: false,
        }
    }
}

impl<const N: usize> LineReader<N> {
    /// Consume whatever is available. Returns a complete, trimmed line once `\n` arrives.
    ///
    /// Lines longer than `N` are dropped whole. Bytes after the newline stay in the port for
    /// the next call.
    pub fn poll<S: Read + ReadReady>(
        &mut self,
        serial: &mut S,
    ) -> Result<Option<heapless::String<N>>, S::Error> {
        let mut byte = [0u8; 1];
        while serial.read_ready()? {
            if serial.read(&mut byte)? == 0 {
                break;
            }
            match byte[0] {
                b'\n' => {
                    let overflowed = core::mem::take(&mut self.overflowed);
                    let bytes = core::mem::take(&mut self.buffer);
                    if overflowed {
                        warn!("console line too long, dropped");
                        continue;
                    }
                    let Ok(text) = core::str::from_utf8(&bytes) else {
                        warn!("console line is not UTF-8, dropped");
                        continue;
                    };
                    let mut line = heapless::String::new();
                    // Trimmed text is never longer than the buffer it came from.
                    let _ = line.push_str(text.trim());
                    return Ok(Some(line));
                }
                b'\r' => {}
                other => {
                    if self.buffer.push(other).is_err() {
                        self.overflowed = true;
                    }
                }
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Status,
    Switch { channel: ChannelId, on: bool },
    /// Raw value as typed, clamped when applied.
    Duty { channel: ChannelId, value: i64 },
    Clear(ChannelId),
    Scan,
    Restart,
    Help,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        use ConsoleCommand::*;
        let switch = |channel, on| Switch { channel, on };
        let duty = |channel, value: &str| Duty {
            channel,
            value: atoi(value),
        };
        let command = match line {
            "status" => Status,
            "on1" => switch(ChannelId::One, true),
            "off1" => switch(ChannelId::One, false),
            "on2" => switch(ChannelId::Two, true),
            "off2" => switch(ChannelId::Two, false),
            "clear1" => Clear(ChannelId::One),
            "clear2" => Clear(ChannelId::Two),
            "scan" => Scan,
            "restart" => Restart,
            "help" => Help,
            _ => {
                if let Some(value) = line.strip_prefix("sim1 ") {
                    duty(ChannelId::One, value)
                } else if let Some(value) = line.strip_prefix("sim2 ") {
                    duty(ChannelId::Two, value)
                } else {
                    return None;
                }
            }
        };
        Some(command)
    }
}

/// Host details shown by `status`, supplied by the embedding application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStatus<'a> {
    pub network_connected: bool,
    pub ip: &'a str,
    pub transport_connected: bool,
    pub free_heap: u32,
}

/// Write one line of output followed by CRLF.
fn emit<S: Write>(serial: &mut S, args: fmt::Arguments<'_>) -> Result<(), S::Error> {
    let mut text = heapless::String::<OUTPUT_LEN>::new();
    // Overlong output is cut, not an error.
    let _ = text.write_fmt(args);
    serial.write_all(text.as_bytes())?;
    serial.write_all(b"\r\n")
}

/// Probe every 7-bit address and list the ones that acknowledge. Returns how many did.
pub fn scan<S: Write, B: I2c>(serial: &mut S, bus: &mut B) -> Result<usize, S::Error> {
    emit(serial, format_args!("I2C Scanning..."))?;
    let mut found = 0;
    for address in 1u8..127 {
        if bus.write(address, &[]).is_ok() {
            emit(serial, format_args!("Found device at 0x{address:02X}"))?;
            found += 1;
        }
    }
    emit(serial, format_args!("Scan complete"))?;
    Ok(found)
}

/// Debug console bound to one serial port.
#[derive(Default)]
pub struct Console {
    reader: LineReader<LINE_LEN>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle at most one complete command line from `serial`.
    pub fn poll<S, I2C, P, D>(
        &mut self,
        serial: &mut S,
        station: &mut Station<I2C, P, D>,
        host: &HostStatus<'_>,
        now: Instant,
    ) -> Result<Option<Effect>, S::Error>
    where
        S: Read + ReadReady + Write,
        I2C: I2c,
        P: OutputPin,
        D: SetDutyCycle,
    {
        let Some(line) = self.reader.poll(serial)? else {
            return Ok(None);
        };
        if line.is_empty() {
            return Ok(None);
        }
        match ConsoleCommand::parse(&line) {
            Some(command) => execute(command, serial, station, host, now),
            None => {
                emit(serial, format_args!("Unknown command: {line} (type help)"))?;
                Ok(None)
            }
        }
    }
}

/// Run one console command, writing its output to `serial`.
pub fn execute<S, I2C, P, D>(
    command: ConsoleCommand,
    serial: &mut S,
    station: &mut Station<I2C, P, D>,
    host: &HostStatus<'_>,
    now: Instant,
) -> Result<Option<Effect>, S::Error>
where
    S: Write,
    I2C: I2c,
    P: OutputPin,
    D: SetDutyCycle,
{
    debug!(?command, "console command");
    match command {
        ConsoleCommand::Status => print_status(serial, station, host, now)?,
        ConsoleCommand::Switch { channel, on } => {
            let n = channel.number();
            let word = if on { "ON" } else { "OFF" };
            match station.controller_mut().set_switch(n, on) {
                Ok(()) => emit(serial, format_args!("Channel {n} {word}"))?,
                Err(err) => emit(serial, format_args!("Channel {n}: {err}"))?,
            }
        }
        ConsoleCommand::Duty { channel, value } => {
            let n = channel.number();
            let percent = clamp_percent(value);
            match station.controller_mut().set_duty(n, percent) {
                Ok(()) => emit(serial, format_args!("Channel {n} Simulator: {percent}%"))?,
                Err(err) => emit(serial, format_args!("Channel {n}: {err}"))?,
            }
        }
        ConsoleCommand::Clear(channel) => {
            let n = channel.number();
            match station.controller_mut().clear_fault(n) {
                Ok(()) => emit(serial, format_args!("Channel {n} fault cleared"))?,
                Err(err) => emit(serial, format_args!("Channel {n}: {err}"))?,
            }
        }
        ConsoleCommand::Scan => {
            scan(serial, station.sensor_mut(ChannelId::One).bus_mut())?;
        }
        ConsoleCommand::Restart => {
            emit(serial, format_args!("Restarting..."))?;
            return Ok(Some(Effect::Restart));
        }
        ConsoleCommand::Help => {
            for line in HELP {
                emit(serial, format_args!("{line}"))?;
            }
        }
    }
    Ok(None)
}

fn print_status<S, I2C, P, D>(
    serial: &mut S,
    station: &Station<I2C, P, D>,
    host: &HostStatus<'_>,
    now: Instant,
) -> Result<(), S::Error>
where
    S: Write,
    I2C: I2c,
    P: OutputPin,
    D: SetDutyCycle,
{
    let connected = |up: bool| if up { "Connected" } else { "Disconnected" };
    emit(serial, format_args!("--- System Status ---"))?;
    let network = connected(host.network_connected);
    let transport = connected(host.transport_connected);
    emit(serial, format_args!("Network: {network}"))?;
    emit(serial, format_args!("IP: {}", host.ip))?;
    emit(serial, format_args!("Transport: {transport}"))?;
    emit(serial, format_args!("Free Heap: {} bytes", host.free_heap))?;
    emit(serial, format_args!("Uptime: {} seconds", station.uptime_secs(now)))?;

    for id in ChannelId::ALL {
        let sample = station.sample(id);
        let state = station.controller().state(id);
        emit(serial, format_args!("--- Channel {} ---", id.number()))?;
        let sensor = if station.sensor_ok(id) { "OK" } else { "Not Found" };
        emit(serial, format_args!("Sensor: {sensor}"))?;
        emit(serial, format_args!("Voltage: {:.3} V", sample.bus_voltage))?;
        emit(serial, format_args!("Current: {:.4} A", sample.current))?;
        emit(serial, format_args!("Power: {:.3} W", sample.power))?;
        let switch = if state.switch_on { "ON" } else { "OFF" };
        emit(serial, format_args!("Switch: {switch}"))?;
        emit(serial, format_args!("Simulator: {}%", state.duty_percent))?;
        let fault = if state.faulted { state.fault_reason.as_str() } else { "None" };
        emit(serial, format_args!("Fault: {fault}"))?;
    }
    Ok(())
}
