//! Log file selection and rotation.
//!
//! The rotation manager owns the "active" log file: the one append target of
//! the whole process. On startup it resumes the most recent non-full file in
//! the output directory so a restart continues where the previous run left
//! off; once a file holds the configured number of lines, the next write
//! opens a fresh one. Files are named after their creation timestamp, so
//! lexicographic order is also chronological order and "most recent" is just
//! the last name in a sorted listing.
//!
//! Rotation policy: the capacity check runs before each write, so no file
//! ever exceeds the line budget and N appends land in exactly
//! ceil(N / budget) files.

use crate::error::{ThlError, ThlResult};
use chrono::Local;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Prefix of every log file this crate creates.
pub const FILE_PREFIX: &str = "hty939";

/// Wall-clock format used for record timestamps and (with `:` replaced by
/// `_`) for file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One converted sensor poll, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Preformatted local wall-clock instant of the poll.
    pub timestamp: String,
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
}

impl Reading {
    /// Build a reading stamped with the current local time.
    pub fn now(temperature: f64, humidity: f64) -> Self {
        Reading {
            timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
            temperature,
            humidity,
        }
    }

    /// Tab-separated record line, newline-terminated.
    pub fn record(&self) -> String {
        format!(
            "{}\t{}\t{}\n",
            self.timestamp, self.temperature, self.humidity
        )
    }
}

/// The file currently receiving appends.
#[derive(Debug, Clone)]
pub struct ActiveFile {
    /// Location of the file.
    pub path: PathBuf,
    /// Newline-terminated lines it holds so far.
    pub line_count: u64,
}

/// Decides which file each record goes to.
pub struct RotationManager {
    dir: PathBuf,
    max_lines: u64,
    active: ActiveFile,
}

impl RotationManager {
    /// Set up rotation over `dir`, resuming an existing file if possible.
    pub fn new(dir: &Path, max_lines: u64) -> ThlResult<Self> {
        let active = select_file(dir, max_lines)?;
        Ok(RotationManager {
            dir: dir.to_path_buf(),
            max_lines,
            active,
        })
    }

    /// The file appends currently go to.
    pub fn active(&self) -> &ActiveFile {
        &self.active
    }

    /// Write one record, rotating first if the active file is full.
    ///
    /// The file is opened and closed around every single write; an abrupt
    /// process death between polls cannot hold a dirty handle.
    pub fn append(&mut self, reading: &Reading) -> ThlResult<()> {
        if self.active.line_count >= self.max_lines {
            self.active = create_file(&self.dir)?;
            info!("Rotated to {}", self.active.path.display());
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.active.path)?;
        file.write_all(reading.record().as_bytes())?;
        self.active.line_count += 1;
        Ok(())
    }
}

/// Pick the file to append to.
///
/// Creates `dir` recursively if absent, then resumes the lexicographically
/// last log file when it still has room; otherwise starts a fresh one.
/// A zero `max_lines` is rejected here as fatal, since it would force a new
/// file on every write.
pub fn select_file(dir: &Path, max_lines: u64) -> ThlResult<ActiveFile> {
    if max_lines == 0 {
        return Err(ThlError::Config(
            "max lines per file must be greater than zero".to_string(),
        ));
    }

    fs::create_dir_all(dir)?;

    let mut logs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| is_log_file(path))
        .collect();
    logs.sort();

    if let Some(latest) = logs.last() {
        let count = count_lines(latest)?;
        if count < max_lines {
            debug!("Resuming {} at line {}", latest.display(), count);
            return Ok(ActiveFile {
                path: latest.clone(),
                line_count: count,
            });
        }
    }

    create_file(dir)
}

fn is_log_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(FILE_PREFIX) && name.ends_with(".log"))
        .unwrap_or(false)
}

/// Create an empty log file named after the current timestamp.
///
/// Rotations within one wall-clock second would produce the same name and
/// truncate the file that just filled up, so collisions get a `_<n>` suffix
/// (which still sorts after the base name).
fn create_file(dir: &Path) -> ThlResult<ActiveFile> {
    let stamp = Local::now()
        .format(TIMESTAMP_FORMAT)
        .to_string()
        .replace(':', "_");

    let mut path = dir.join(format!("{}_{}.log", FILE_PREFIX, stamp));
    let mut seq = 1;
    while path.exists() {
        path = dir.join(format!("{}_{}_{}.log", FILE_PREFIX, stamp, seq));
        seq += 1;
    }

    File::create(&path)?;
    info!("Writing to new log file {}", path.display());
    Ok(ActiveFile {
        path,
        line_count: 0,
    })
}

/// Count newline-terminated lines by scanning raw bytes.
fn count_lines(path: &Path) -> ThlResult<u64> {
    let mut file = File::open(path)?;
    let mut buf = [0u8; 8192];
    let mut count: u64 = 0;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        count += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_is_tab_separated_and_newline_terminated() {
        let reading = Reading {
            timestamp: "2026-08-30T12:00:00".to_string(),
            temperature: 23.21,
            humidity: 50.21,
        };
        assert_eq!(reading.record(), "2026-08-30T12:00:00\t23.21\t50.21\n");
    }

    #[test]
    fn counts_newline_terminated_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.log");
        fs::write(&path, "a\nb\nc\n").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 3);

        // An unterminated trailing fragment is not a line yet.
        fs::write(&path, "a\nb\npartial").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 2);

        fs::write(&path, "").unwrap();
        assert_eq!(count_lines(&path).unwrap(), 0);
    }

    #[test]
    fn only_prefixed_log_files_are_considered() {
        assert!(is_log_file(Path::new("log/hty939_2026-08-30T12_00_00.log")));
        assert!(!is_log_file(Path::new("log/notes.txt")));
        assert!(!is_log_file(Path::new("log/other_2026.log")));
        assert!(!is_log_file(Path::new("log/hty939_summary.csv")));
    }

    #[test]
    fn zero_line_budget_is_a_config_error() {
        let dir = tempdir().unwrap();
        match select_file(dir.path(), 0) {
            Err(ThlError::Config(_)) => {}
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("data").join("log");
        let active = select_file(&nested, 10).unwrap();
        assert!(nested.is_dir());
        assert_eq!(active.line_count, 0);
        assert!(active.path.exists());
    }

    #[test]
    fn resumes_the_most_recent_file_with_room() {
        let dir = tempdir().unwrap();
        let older = dir.path().join("hty939_2026-08-29T10_00_00.log");
        let newer = dir.path().join("hty939_2026-08-30T10_00_00.log");
        fs::write(&older, "x\ty\tz\n".repeat(5)).unwrap();
        fs::write(&newer, "x\ty\tz\n".repeat(2)).unwrap();
        // Unrelated files must not influence the choice.
        fs::write(dir.path().join("zzz_readme.txt"), "ignore me\n").unwrap();

        let active = select_file(dir.path(), 5).unwrap();
        assert_eq!(active.path, newer);
        assert_eq!(active.line_count, 2);
    }

    #[test]
    fn full_latest_file_forces_a_new_one() {
        let dir = tempdir().unwrap();
        let full = dir.path().join("hty939_2026-08-30T10_00_00.log");
        fs::write(&full, "x\ty\tz\n".repeat(3)).unwrap();

        let active = select_file(dir.path(), 3).unwrap();
        assert_ne!(active.path, full);
        assert_eq!(active.line_count, 0);
    }

    #[test]
    fn same_second_rotation_does_not_clobber_the_full_file() {
        let dir = tempdir().unwrap();
        let mut logs = RotationManager::new(dir.path(), 1).unwrap();

        logs.append(&Reading::now(20.0, 40.0)).unwrap();
        let first = logs.active().path.clone();
        logs.append(&Reading::now(21.0, 41.0)).unwrap();
        let second = logs.active().path.clone();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(&first).unwrap().lines().count(), 1);
        assert_eq!(fs::read_to_string(&second).unwrap().lines().count(), 1);
    }
}
