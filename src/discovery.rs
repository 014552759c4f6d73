//! Port discovery via identity probe.
//!
//! Scans every system-visible serial port, challenges each with the identity
//! command and accepts the first one that answers with the exact logger
//! identity line. Probing opens real ports, so every candidate session is
//! closed before the scan moves on or returns, match or not.

use crate::error::{ThlError, ThlResult};
use crate::transport::{Session, CMD_IDENTITY, RESP_IDENTITY};
use log::{debug, info};
use std::time::Duration;

/// Read deadline for the identity response. The device answers quickly once
/// booted; a short window keeps a full scan of silent ports fast.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Find the port the logger is connected to.
///
/// Candidates are tried in enumeration order and the first identity match
/// wins; [`ThlError::NotFound`] is returned only after the whole list has
/// been exhausted.
pub fn find_port(baud: u32) -> ThlResult<String> {
    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();

    if names.is_empty() {
        debug!("No serial ports present on this system");
    }

    scan_ports(&names, |name| probe_port(name, baud))
}

/// Walk `candidates` in order, returning the first one `probe` accepts.
///
/// Split out from [`find_port`] so the ordering and first-match-wins
/// behavior can be exercised with fake probers.
pub(crate) fn scan_ports<F>(candidates: &[String], mut probe: F) -> ThlResult<String>
where
    F: FnMut(&str) -> bool,
{
    for name in candidates {
        debug!("Probing {}", name);
        if probe(name) {
            info!("Found logger on {}", name);
            return Ok(name.clone());
        }
    }
    Err(ThlError::NotFound)
}

/// One identity exchange against `name`.
///
/// Any failure (port busy, no response, wrong answer) just disqualifies the
/// candidate. The session is closed before the verdict is returned.
fn probe_port(name: &str, baud: u32) -> bool {
    let mut session = match Session::open(name, baud) {
        Ok(session) => session,
        Err(err) => {
            debug!("Skipping {}: {}", name, err);
            return false;
        }
    };

    let matched = identity_matches(&mut session);
    session.close();
    matched
}

fn identity_matches(session: &mut Session) -> bool {
    if let Err(err) = session.flush_input() {
        debug!("Could not flush {}: {}", session.port_name(), err);
        return false;
    }

    match session.query(CMD_IDENTITY, PROBE_TIMEOUT) {
        Ok(response) if response == RESP_IDENTITY => true,
        Ok(response) => {
            debug!(
                "{} answered '{}', not ours",
                session.port_name(),
                response.escape_default()
            );
            false
        }
        Err(err) => {
            debug!("Identity probe on {} failed: {}", session.port_name(), err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn ports_are_probed_in_enumeration_order() {
        let candidates = names(&["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0"]);
        let mut probed = Vec::new();

        let result = scan_ports(&candidates, |name| {
            probed.push(name.to_string());
            false
        });

        assert!(matches!(result, Err(ThlError::NotFound)));
        assert_eq!(probed, candidates);
    }

    #[test]
    fn first_match_wins_and_later_ports_are_untouched() {
        let candidates = names(&["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0"]);
        let mut probed = Vec::new();

        let result = scan_ports(&candidates, |name| {
            probed.push(name.to_string());
            name == "/dev/ttyUSB1"
        });

        assert_eq!(result.unwrap(), "/dev/ttyUSB1");
        assert_eq!(probed, names(&["/dev/ttyUSB0", "/dev/ttyUSB1"]));
    }

    #[test]
    fn wrong_identity_moves_on_to_the_next_port() {
        // A port that answers, but with the wrong identity, must be treated
        // exactly like a silent one.
        let candidates = names(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        let mut responses = vec!["wrong\r\n", RESP_IDENTITY].into_iter();

        let result = scan_ports(&candidates, |_| {
            responses.next().map(|r| r == RESP_IDENTITY).unwrap_or(false)
        });

        assert_eq!(result.unwrap(), "/dev/ttyUSB1");
    }

    #[test]
    fn empty_enumeration_reports_not_found() {
        let result = scan_ports(&[], |_| true);
        assert!(matches!(result, Err(ThlError::NotFound)));
    }
}
