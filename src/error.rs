//! Custom error types for the logger.
//!
//! This module defines the primary error type, `ThlError`, for the entire
//! application. Using the `thiserror` crate, it provides a single tagged
//! enumeration that the polling state machine can inspect to decide between
//! automatic recovery and termination:
//!
//! - **`Connection`**: a serial port could not be opened. Recoverable; the
//!   loop waits and retries discovery plus connect from scratch.
//! - **`NotFound`**: no system-visible port answered the identity probe after
//!   a full enumeration. Recoverable in the same way.
//! - **`Timeout`**: an open session produced no line terminator within the
//!   read deadline. Recoverable; the session is torn down and rebuilt.
//! - **`Io`**: a read or write on an already-open session failed, or a file
//!   operation in the log directory failed. Recoverable like `Timeout`.
//! - **`Config`**: a caller mistake (e.g. a zero line budget) that retries
//!   cannot fix. Fatal, surfaced at startup.
//! - **`Cancelled`**: the user asked the process to stop. The one clean,
//!   intentional termination path; never reported as an error.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type ThlResult<T> = std::result::Result<T, ThlError>;

/// All failure kinds the logger distinguishes.
#[derive(Error, Debug)]
pub enum ThlError {
    /// The serial device could not be opened.
    #[error("failed to open serial port '{port}': {source}")]
    Connection {
        /// Port identifier the open was attempted on.
        port: String,
        /// Underlying serial stack error.
        #[source]
        source: serialport::Error,
    },

    /// No enumerated port answered the identity probe.
    #[error("no serial port answered the identity probe")]
    NotFound,

    /// No response line arrived within the read deadline.
    #[error("no response from device within {0:?}")]
    Timeout(std::time::Duration),

    /// Read/write failure on an open session or in the log directory.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// User-initiated stop.
    #[error("cancelled by user")]
    Cancelled,
}
