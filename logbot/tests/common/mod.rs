//! Shared fixtures for the logbot integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use logbot::config::Identity;
use logbot_sdk::Command;
use tokio::sync::mpsc;

pub fn identity(log_path: &Path) -> Arc<Identity> {
    Arc::new(Identity {
        nickname: "bot".to_string(),
        channel: "#test".to_string(),
        log_path: log_path.to_path_buf(),
        host: "irc.example".to_string(),
        port: 6667,
        tls: false,
    })
}

/// Log texts with the timestamp stripped.
pub fn log_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| {
            assert!(line.starts_with('['), "unstamped line: {line}");
            line.split_once("] ").unwrap().1.to_string()
        })
        .collect()
}

pub fn drain(commands: &mut mpsc::UnboundedReceiver<Command>) -> Vec<Command> {
    let mut out = Vec::new();
    while let Ok(cmd) = commands.try_recv() {
        out.push(cmd);
    }
    out
}

pub fn privmsg(target: &str, text: &str) -> Command {
    Command::Privmsg {
        target: target.to_string(),
        text: text.to_string(),
    }
}
