//! # thlogger
//!
//! Polls a serial-connected temperature/humidity sensor at a fixed interval
//! and appends timestamped records to rotating log files. Built for
//! unattended long-running collection: the device is discovered by an
//! identity probe, every transient failure triggers a full
//! teardown-and-reconnect cycle, and log state is resumed across restarts.
//!
//! ## Crate Structure
//!
//! - **`config`**: the [`config::RunConfig`] parameter struct with the
//!   defaults and validation for one run of the loop.
//! - **`discovery`**: enumerates serial ports and identifies the logger by
//!   its identity probe.
//! - **`error`**: the crate-wide [`error::ThlError`] enumeration the polling
//!   state machine inspects to choose a recovery path.
//! - **`poll`**: the top-level polling loop state machine and the
//!   cancellation token the interrupt handler fires.
//! - **`rotation`**: selects, resumes and rotates the log files records are
//!   appended to.
//! - **`transport`**: the serial session with its line-oriented,
//!   timeout-bounded query primitive.

pub mod config;
pub mod discovery;
pub mod error;
pub mod poll;
pub mod rotation;
pub mod transport;
