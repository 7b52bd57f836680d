//! Where `start` leaves its PID so `stop` and `restart` can find the bot.
//!
//! The file is a small JSON record. A record whose process has died is stale
//! and gets cleared the next time anyone looks.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidInfo {
    pub pid: u32,
    pub server: String,
    pub nick: String,
    pub started_at: DateTime<Utc>,
}

impl PidInfo {
    /// A record for this process.
    pub fn current(server: &str, nick: &str) -> Self {
        Self {
            pid: std::process::id(),
            server: server.to_string(),
            nick: nick.to_string(),
            started_at: Utc::now(),
        }
    }

    /// Write the record, owner-readable only.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing PID file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn load(path: &Path) -> Result<Option<Self>> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("reading PID file {}", path.display())),
        };
        let info = serde_json::from_str(&json)
            .with_context(|| format!("PID file {} is not a logbot record", path.display()))?;
        Ok(Some(info))
    }
}

/// Delete the PID file. Already gone is fine.
pub fn clear(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => {
            Err(e).with_context(|| format!("removing PID file {}", path.display()))
        }
        _ => Ok(()),
    }
}

/// Whether `pid` names a process we could signal.
pub fn is_alive(pid: u32) -> bool {
    match i32::try_from(pid) {
        Ok(raw) => kill(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

/// The bot recorded at `path`, if it is still alive.
pub fn running(path: &Path) -> Result<Option<PidInfo>> {
    match PidInfo::load(path)? {
        Some(info) if is_alive(info.pid) => Ok(Some(info)),
        Some(info) => {
            tracing::debug!(pid = info.pid, path = %path.display(), "Clearing stale PID file");
            clear(path)?;
            Ok(None)
        }
        None => Ok(None),
    }
}

/// Ask the bot to shut down.
pub fn terminate(pid: u32) -> Result<()> {
    let raw = i32::try_from(pid).with_context(|| format!("{pid} is not a valid PID"))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).with_context(|| format!("signalling PID {pid}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_find_ourselves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("logbot.pid");
        assert!(running(&path).unwrap().is_none());

        let info = PidInfo::current("irc.example:6667", "bot");
        info.save(&path).unwrap();
        assert_eq!(running(&path).unwrap(), Some(info));

        clear(&path).unwrap();
        assert!(!path.exists());
        clear(&path).unwrap();
    }

    #[test]
    fn dead_process_record_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logbot.pid");
        let info = PidInfo {
            // Above any real pid_max.
            pid: i32::MAX as u32,
            ..PidInfo::current("irc.example:6667", "bot")
        };
        info.save(&path).unwrap();

        assert!(running(&path).unwrap().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn unreadable_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logbot.pid");
        fs::write(&path, "not json").unwrap();
        assert!(running(&path).is_err());
        assert!(!is_alive(u32::MAX));
    }
}
