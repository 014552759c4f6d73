//! Serial transport session for the line-oriented sensor protocol.
//!
//! Wraps one open `serialport` handle and provides the query primitive the
//! rest of the crate is built on: write an ASCII command, accumulate bytes
//! until a line terminator arrives, give up after a deadline. Byte
//! availability is handled by a short internal port timeout inside the
//! deadline loop, so a silent device costs at most the configured timeout
//! and never blocks forever.

use crate::error::{ThlError, ThlResult};
use log::{debug, trace};
use serialport::{ClearBuffer, SerialPort};
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

/// Command sent to confirm the device is ours.
pub const CMD_IDENTITY: &str = "I\n";

/// Exact identity line, trailing carriage return included.
pub const RESP_IDENTITY: &str = "thlogger\r\n";

/// Command requesting a temperature reading.
pub const CMD_TEMPERATURE: &str = "T\n";

/// Command requesting a relative-humidity reading.
pub const CMD_HUMIDITY: &str = "H\n";

/// Wait after opening a port before any traffic is sent. Opening the port
/// toggles DTR and reboots the sensor firmware, which needs a moment before
/// it starts listening.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Internal serialport read timeout; `read_line` loops on this under its own
/// deadline instead of busy-waiting on byte availability.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause before retrying a read that returned no bytes.
const IDLE_READ_PAUSE: Duration = Duration::from_millis(10);

/// One open serial connection to the sensor.
///
/// The handle is released by [`Session::close`] (idempotent) and as a
/// backstop on drop, so every exit path of the callers gives the device
/// back.
pub struct Session {
    port_name: String,
    port: Option<Box<dyn SerialPort>>,
}

impl Session {
    /// Open `port_name` at `baud` and wait out the settle delay.
    pub fn open(port_name: &str, baud: u32) -> ThlResult<Session> {
        let port = serialport::new(port_name, baud)
            .timeout(PORT_READ_TIMEOUT)
            .open()
            .map_err(|source| ThlError::Connection {
                port: port_name.to_string(),
                source,
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud);
        thread::sleep(SETTLE_DELAY);

        Ok(Session {
            port_name: port_name.to_string(),
            port: Some(port),
        })
    }

    /// Port identifier this session was opened on.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Read one line from the device, terminator included.
    ///
    /// Fails with [`ThlError::Timeout`] if no `\n` arrives within `timeout`;
    /// whatever partial bytes accumulated are discarded with the attempt.
    pub fn read_line(&mut self, timeout: Duration) -> ThlResult<String> {
        let port = self.port.as_mut().ok_or_else(closed_session_error)?;
        let line = read_line_with_deadline(port, timeout)?;
        trace!(
            "Received from {}: '{}'",
            self.port_name,
            line.escape_default()
        );
        Ok(line)
    }

    /// Send `message` and read the response line.
    pub fn query(&mut self, message: &str, timeout: Duration) -> ThlResult<String> {
        trace!(
            "Sending to {}: '{}'",
            self.port_name,
            message.escape_default()
        );
        let port = self.port.as_mut().ok_or_else(closed_session_error)?;
        port.write_all(message.as_bytes())?;
        let line = read_line_with_deadline(port, timeout)?;
        trace!(
            "Received from {}: '{}'",
            self.port_name,
            line.escape_default()
        );
        Ok(line)
    }

    /// Discard any buffered unread bytes.
    ///
    /// Issued before every query so a stale response from a previous command
    /// cannot be misread as the answer to the next one.
    pub fn flush_input(&mut self) -> ThlResult<()> {
        if let Some(port) = self.port.as_mut() {
            port.clear(ClearBuffer::Input)
                .map_err(std::io::Error::from)?;
        }
        Ok(())
    }

    /// Release the underlying connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

fn closed_session_error() -> ThlError {
    ThlError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "serial session is closed",
    ))
}

/// Accumulate bytes from `reader` until a `\n` arrives or `timeout` elapses.
///
/// Generic over `io::Read` so the timeout contract is testable without
/// hardware; the production reader is the serial port handle, whose own
/// short read timeout keeps each pass through the loop bounded.
pub(crate) fn read_line_with_deadline<R: Read>(
    reader: &mut R,
    timeout: Duration,
) -> ThlResult<String> {
    let mut line: Vec<u8> = Vec::new();
    let mut buf = [0u8; 64];
    let start = Instant::now();

    loop {
        if start.elapsed() >= timeout {
            return Err(ThlError::Timeout(timeout));
        }

        match reader.read(&mut buf) {
            Ok(0) => thread::sleep(IDLE_READ_PAUSE),
            Ok(n) => {
                line.extend_from_slice(&buf[..n]);
                if let Some(pos) = line.iter().position(|&b| b == b'\n') {
                    line.truncate(pos + 1);
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ThlError::Io(e)),
        }
    }
}
