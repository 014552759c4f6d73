//! Polling loop state machine and cancellation token.
//!
//! The loop runs one logical thread of control forever: resolve a port,
//! open a session, poll on a fixed interval, and on any transient failure
//! tear the session down and start over from discovery. It is written as an
//! explicit `Connecting -> Polling -> Terminated` state loop, never as
//! recursion, so an unattended multi-week run cannot grow the call stack.
//! Only user cancellation reaches `Terminated`.

use crate::config::RunConfig;
use crate::discovery;
use crate::error::{ThlError, ThlResult};
use crate::rotation::{Reading, RotationManager};
use crate::transport::{Session, CMD_HUMIDITY, CMD_TEMPERATURE};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wait between failed connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Read deadline for one sensor value.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Granularity at which sleeps observe cancellation.
const CANCEL_POLL_STEP: Duration = Duration::from_millis(100);

/// Shared flag flipped by the interrupt handler and observed by the loop.
///
/// Cloning is cheap; every clone refers to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether termination has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`ThlError::Cancelled`] if termination was requested.
    pub fn check(&self) -> ThlResult<()> {
        if self.is_cancelled() {
            Err(ThlError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `total`, waking early with [`ThlError::Cancelled`] if the
    /// token fires. The wait is chunked so a long poll interval cannot delay
    /// shutdown by more than a fraction of a second.
    pub fn sleep(&self, total: Duration) -> ThlResult<()> {
        let mut remaining = total;
        while remaining > Duration::ZERO {
            self.check()?;
            let step = remaining.min(CANCEL_POLL_STEP);
            std::thread::sleep(step);
            remaining = remaining.saturating_sub(step);
        }
        self.check()
    }
}

/// One poll's worth of sensor traffic.
///
/// [`Session`] is the production implementation; tests substitute scripted
/// fakes to drive the loop without hardware.
pub trait SensorLink {
    /// Query the temperature in degrees Celsius.
    fn read_temperature(&mut self) -> ThlResult<f64>;

    /// Query the relative humidity in percent.
    fn read_humidity(&mut self) -> ThlResult<f64>;
}

impl SensorLink for Session {
    fn read_temperature(&mut self) -> ThlResult<f64> {
        self.flush_input()?;
        let line = self.query(CMD_TEMPERATURE, READ_TIMEOUT)?;
        parse_reading(&line)
    }

    fn read_humidity(&mut self) -> ThlResult<f64> {
        self.flush_input()?;
        let line = self.query(CMD_HUMIDITY, READ_TIMEOUT)?;
        parse_reading(&line)
    }
}

/// The device already returns converted decimals; a line that does not parse
/// means the session is out of sync and is treated like any other I/O fault.
fn parse_reading(line: &str) -> ThlResult<f64> {
    line.trim().parse::<f64>().map_err(|_| {
        ThlError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("unparseable sensor response: '{}'", line.escape_default()),
        ))
    })
}

/// Read both values, then write exactly one record.
///
/// A failure in either query aborts the iteration before anything reaches
/// the file, so a humidity timeout after a successful temperature read never
/// leaves a partial record behind.
pub fn poll_once<L: SensorLink>(link: &mut L, logs: &mut RotationManager) -> ThlResult<()> {
    let temperature = link.read_temperature()?;
    let humidity = link.read_humidity()?;

    let reading = Reading::now(temperature, humidity);
    debug!(
        "Read {} degC / {} %RH at {}",
        reading.temperature, reading.humidity, reading.timestamp
    );
    logs.append(&reading)
}

enum LoopState {
    Connecting,
    Polling(Session),
    Terminated,
}

/// Run the collection loop until cancelled.
///
/// Transient failures log a warning and re-enter discovery; the loop never
/// gives up on its own. The only error this function returns is a fatal
/// configuration problem caught before polling starts; cancellation is a
/// clean `Ok(())`.
pub fn run(config: &RunConfig, cancel: &CancelToken) -> ThlResult<()> {
    config.validate()?;
    let mut logs = RotationManager::new(&config.dir, config.max_lines)?;
    info!(
        "Appending to {} ({} lines so far)",
        logs.active().path.display(),
        logs.active().line_count
    );

    // The fixed override is only honored once; after any failure the device
    // may have reappeared under a different port.
    let mut fixed_port = config.port.clone();
    let mut state = LoopState::Connecting;

    loop {
        state = match state {
            LoopState::Connecting => match connect(&mut fixed_port, config.baud, cancel) {
                Ok(session) => LoopState::Polling(session),
                Err(ThlError::Cancelled) => LoopState::Terminated,
                Err(err) => {
                    warn!(
                        "Connection attempt failed: {}; retrying in {}s",
                        err,
                        RECONNECT_DELAY.as_secs()
                    );
                    match cancel.sleep(RECONNECT_DELAY) {
                        Ok(()) => LoopState::Connecting,
                        Err(_) => LoopState::Terminated,
                    }
                }
            },
            LoopState::Polling(mut session) => {
                let err = poll_cycle(&mut session, &mut logs, config.interval, cancel);
                session.close();
                match err {
                    ThlError::Cancelled => LoopState::Terminated,
                    err => {
                        warn!("Polling failed: {}; reconnecting", err);
                        LoopState::Connecting
                    }
                }
            }
            LoopState::Terminated => break,
        };
    }

    info!("Logger stopped");
    Ok(())
}

/// Resolve a port and open a session on it.
fn connect(fixed_port: &mut Option<String>, baud: u32, cancel: &CancelToken) -> ThlResult<Session> {
    cancel.check()?;

    let port = match fixed_port.take() {
        Some(port) => {
            debug!("Using configured port {}", port);
            port
        }
        None => discovery::find_port(baud)?,
    };

    cancel.check()?;
    Session::open(&port, baud)
}

/// Poll until something goes wrong; returns the error that ended the cycle.
fn poll_cycle(
    session: &mut Session,
    logs: &mut RotationManager,
    interval: Duration,
    cancel: &CancelToken,
) -> ThlError {
    info!(
        "Connected to {}; polling every {}s",
        session.port_name(),
        interval.as_secs()
    );

    loop {
        if let Err(err) = cancel.check() {
            return err;
        }
        if let Err(err) = poll_once(session, logs) {
            return err;
        }
        if let Err(err) = cancel.sleep(interval) {
            return err;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    struct FakeLink {
        temperature: Option<f64>,
        humidity: Option<f64>,
    }

    impl SensorLink for FakeLink {
        fn read_temperature(&mut self) -> ThlResult<f64> {
            self.temperature.ok_or(ThlError::Timeout(READ_TIMEOUT))
        }

        fn read_humidity(&mut self) -> ThlResult<f64> {
            self.humidity.ok_or(ThlError::Timeout(READ_TIMEOUT))
        }
    }

    #[test]
    fn successful_poll_appends_one_record() {
        let dir = tempdir().unwrap();
        let mut logs = RotationManager::new(dir.path(), 10).unwrap();
        let mut link = FakeLink {
            temperature: Some(23.21),
            humidity: Some(50.21),
        };

        poll_once(&mut link, &mut logs).unwrap();

        let body = fs::read_to_string(&logs.active().path).unwrap();
        let fields: Vec<&str> = body.trim_end().split('\t').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1], "23.21");
        assert_eq!(fields[2], "50.21");
        assert_eq!(logs.active().line_count, 1);
    }

    #[test]
    fn humidity_timeout_writes_nothing() {
        let dir = tempdir().unwrap();
        let mut logs = RotationManager::new(dir.path(), 10).unwrap();
        let mut link = FakeLink {
            temperature: Some(23.21),
            humidity: None,
        };

        let result = poll_once(&mut link, &mut logs);

        assert!(matches!(result, Err(ThlError::Timeout(_))));
        assert_eq!(fs::read_to_string(&logs.active().path).unwrap(), "");
        assert_eq!(logs.active().line_count, 0);
    }

    #[test]
    fn parse_accepts_crlf_terminated_decimals() {
        assert_eq!(parse_reading("23.21\r\n").unwrap(), 23.21);
        assert_eq!(parse_reading("-4.5\r\n").unwrap(), -4.5);
        assert!(matches!(
            parse_reading("ERR\r\n"),
            Err(ThlError::Io(_))
        ));
    }

    #[test]
    fn cancelled_token_cuts_the_sleep_short() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = std::time::Instant::now();
        let result = cancel.sleep(Duration::from_secs(60));
        assert!(matches!(result, Err(ThlError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn uncancelled_sleep_runs_to_completion() {
        let cancel = CancelToken::new();
        assert!(cancel.sleep(Duration::from_millis(30)).is_ok());
        assert!(cancel.check().is_ok());
    }

    #[test]
    fn run_rejects_a_zero_line_budget_up_front() {
        let dir = tempdir().unwrap();
        let config = RunConfig {
            dir: dir.path().to_path_buf(),
            max_lines: 0,
            ..RunConfig::default()
        };
        let result = run(&config, &CancelToken::new());
        assert!(matches!(result, Err(ThlError::Config(_))));
    }

    #[test]
    fn run_stops_cleanly_when_already_cancelled() {
        // With the token already fired, the loop must terminate without ever
        // touching a serial port, and cancellation must not surface as an
        // error.
        let dir = tempdir().unwrap();
        let config = RunConfig {
            dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(run(&config, &cancel).is_ok());
    }
}
