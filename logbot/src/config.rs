//! Command line and the identity it resolves to.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use logbot_sdk::ConnectConfig;

#[derive(Debug, Parser)]
#[command(name = "logbot", version, about = "IRC channel log bot")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub action: Action,

    #[command(flatten)]
    pub bot: BotArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Action {
    /// Run the bot (in the foreground) and record its PID.
    Start,
    /// Signal a running bot to shut down.
    Stop,
    /// Stop a running bot, then start a new one.
    Restart,
}

#[derive(Debug, Clone, Args)]
pub struct BotArgs {
    /// IRC server host
    #[arg(long, global = true, env = "LOGBOT_HOST", default_value = "irc.snoonet.org")]
    pub host: String,

    /// IRC server port
    #[arg(long, global = true, env = "LOGBOT_PORT", default_value_t = 6667)]
    pub port: u16,

    /// Use TLS (implied by port 6697)
    #[arg(long, global = true, env = "LOGBOT_TLS")]
    pub tls: bool,

    /// Bot nick
    #[arg(long, global = true, env = "LOGBOT_NICK", default_value = "ircbot")]
    pub nick: String,

    /// Channel to join; `#` is added when missing
    #[arg(long, global = true, env = "LOGBOT_CHANNEL", default_value = "bottest")]
    pub channel: String,

    /// Activity log file (appended to)
    #[arg(long, global = true, env = "LOGBOT_LOG_FILE", default_value = "/tmp/ircbot.log")]
    pub log_file: PathBuf,

    /// PID file used by start/stop/restart
    #[arg(long, global = true, env = "LOGBOT_PID_FILE", default_value = "/tmp/logbot.pid")]
    pub pid_file: PathBuf,
}

/// Who the bot is and where it goes. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub nickname: String,
    pub channel: String,
    pub log_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Identity {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            server_addr: self.server_addr(),
            nick: self.nickname.clone(),
            user: self.nickname.clone(),
            realname: "logbot".to_string(),
            tls: self.tls,
        }
    }
}

impl From<&BotArgs> for Identity {
    fn from(args: &BotArgs) -> Self {
        Self {
            nickname: args.nick.clone(),
            channel: args.channel.clone(),
            log_path: args.log_file.clone(),
            host: args.host.clone(),
            port: args.port,
            tls: args.tls,
        }
    }
}
