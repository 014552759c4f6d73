//! Run configuration.

use crate::error::{ThlError, ThlResult};
use std::path::PathBuf;
use std::time::Duration;

/// Default output directory for log files.
pub const DEFAULT_DIR: &str = "log";

/// Default serial baud rate.
pub const DEFAULT_BAUD: u32 = 9600;

/// Default seconds between polls.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// Default number of lines per log file before rotation.
pub const DEFAULT_MAX_LINES: u64 = 135_000;

/// Parameters for one run of the collection loop.
///
/// Immutable for the duration of a run; the loop carries it unchanged across
/// automatic retries. The one exception is `port`: a fixed override only
/// applies to the first connection attempt, because after a failure the
/// device may have reappeared under a different identifier.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory the log files are written to; created if absent.
    pub dir: PathBuf,
    /// Serial baud rate.
    pub baud: u32,
    /// Fixed serial port; `None` means auto-discover.
    pub port: Option<String>,
    /// Pause between polls.
    pub interval: Duration,
    /// Lines per log file before rotation.
    pub max_lines: u64,
    /// Verbose logging.
    pub debug: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_DIR),
            baud: DEFAULT_BAUD,
            port: None,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            max_lines: DEFAULT_MAX_LINES,
            debug: false,
        }
    }
}

impl RunConfig {
    /// Reject values that would make the run misbehave rather than fail.
    ///
    /// A zero line budget would force a new file on every write, so it is a
    /// fatal configuration error instead of something the retry loop papers
    /// over.
    pub fn validate(&self) -> ThlResult<()> {
        if self.max_lines == 0 {
            return Err(ThlError::Config(
                "max lines per file must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
