//! Append-only activity log.
//!
//! One line per observed event, `[<asctime>] <text>`, flushed on every write
//! so the file is current even if the process is killed.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// `time.asctime` layout, e.g. `Sun Oct 19 09:05:01 2026`.
const ASCTIME: &str = "%a %b %e %H:%M:%S %Y";

#[derive(Debug, thiserror::Error)]
#[error("cannot open activity log {}: {source}", .path.display())]
pub struct LogError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Writes timestamped records to a sink it owns.
///
/// [`close`](ActivityLogger::close) takes the logger by value, so the sink is
/// released at most once.
#[derive(Debug)]
pub struct ActivityLogger<W: Write = File> {
    sink: W,
}

impl ActivityLogger<File> {
    /// Open `path` for appending, creating it if missing.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| LogError {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { sink: file })
    }
}

impl<W: Write> ActivityLogger<W> {
    pub fn from_writer(sink: W) -> Self {
        Self { sink }
    }

    /// Append one record stamped with the current local time.
    pub fn log(&mut self, text: &str) -> io::Result<()> {
        self.log_at(Local::now(), text)
    }

    pub fn log_at(&mut self, at: DateTime<Local>, text: &str) -> io::Result<()> {
        writeln!(self.sink, "{} {}", format_stamp(at), text)?;
        self.sink.flush()
    }

    /// Flush and hand back the sink.
    pub fn close(mut self) -> io::Result<W> {
        self.sink.flush()?;
        Ok(self.sink)
    }
}

fn format_stamp(at: DateTime<Local>) -> String {
    format!("[{}]", at.format(ASCTIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn is_record(line: &str) -> bool {
        // "[Sun Oct 19 09:05:01 2026] text"
        let Some(rest) = line.strip_prefix('[') else {
            return false;
        };
        let Some((stamp, _)) = rest.split_once("] ") else {
            return false;
        };
        stamp.len() == 24 && stamp.as_bytes()[3] == b' ' && stamp.as_bytes()[7] == b' '
    }

    #[test]
    fn stamp_matches_asctime() {
        let at = Local.with_ymd_and_hms(2026, 10, 4, 9, 5, 1).unwrap();
        let mut logger = ActivityLogger::from_writer(Vec::new());
        logger.log_at(at, "Connected").unwrap();
        let out = String::from_utf8(logger.close().unwrap()).unwrap();
        assert_eq!(out, "[Sun Oct  4 09:05:01 2026] Connected\n");
    }

    #[test]
    fn n_calls_make_n_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.log");

        let mut logger = ActivityLogger::open(&path).unwrap();
        for i in 0..5 {
            logger.log(&format!("<alice> message {i}")).unwrap();
        }
        logger.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines.iter().all(|l| is_record(l)), "bad lines: {lines:?}");
        assert!(lines[4].ends_with("] <alice> message 4"));
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.log");

        let mut first = ActivityLogger::open(&path).unwrap();
        first.log("Connected").unwrap();
        first.close().unwrap();
        let mut second = ActivityLogger::open(&path).unwrap();
        second.log("Connected").unwrap();
        second.close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("activity.log");
        let err = ActivityLogger::open(&path).unwrap_err();
        assert_eq!(err.path, path);
        assert_eq!(err.source.kind(), io::ErrorKind::NotFound);
    }
}
