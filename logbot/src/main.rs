//! logbot: sits in one IRC channel and writes down everything it sees.
//!
//!   logbot start     run the bot in the foreground, recording its PID
//!   logbot stop      signal the running bot to shut down
//!   logbot restart   stop, then start
//!
//! Detaching from the terminal is left to the service manager.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use logbot::config::{Action, BotArgs, Cli, Identity};
use logbot::handler::LogBot;
use logbot::pidfile::{self, PidInfo};
use logbot::scheduler::TokioScheduler;
use logbot::supervisor::{Supervisor, TcpConnector};

/// How long `restart` waits for the old process to exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // JSON logs when LOGBOT_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("LOGBOT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "logbot=info,logbot_sdk=info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cli = Cli::parse();
    match cli.action {
        Action::Start => start(&cli.bot).await,
        Action::Stop => stop(&cli.bot.pid_file, false).await,
        Action::Restart => {
            stop(&cli.bot.pid_file, true).await?;
            start(&cli.bot).await
        }
    }
}

async fn start(args: &BotArgs) -> Result<()> {
    let existing = pidfile::running(&args.pid_file).context("Cannot check for a running bot")?;
    if let Some(info) = existing {
        bail!("logbot is already running (PID {})", info.pid);
    }

    let identity = Arc::new(Identity::from(args));
    PidInfo::current(&identity.server_addr(), &identity.nickname).save(&args.pid_file)?;

    tracing::info!(
        server = %identity.server_addr(),
        nick = %identity.nickname,
        channel = %identity.channel,
        log = %identity.log_path.display(),
        "Starting logbot"
    );

    let connector = TcpConnector::new(identity.connect_config());
    let mut supervisor = Supervisor::new(identity, Arc::new(LogBot), Arc::new(TokioScheduler), connector);
    let result = supervisor.run_until(shutdown_signal()).await;

    if result.is_ok() {
        // Give the QUIT a moment to reach the server.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    pidfile::clear(&args.pid_file)?;
    Ok(result?)
}

/// Signal the running bot. With `quiet`, a bot that is not running is fine
/// and we wait for a running one to exit.
async fn stop(pid_path: &Path, quiet: bool) -> Result<()> {
    let Some(info) = pidfile::running(pid_path)? else {
        if quiet {
            return Ok(());
        }
        bail!("logbot is not running (no live PID in {})", pid_path.display());
    };

    pidfile::terminate(info.pid).context("Cannot stop logbot")?;
    println!("Sent SIGTERM to logbot (PID {})", info.pid);

    if quiet {
        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        while pidfile::is_alive(info.pid) {
            if tokio::time::Instant::now() >= deadline {
                bail!("logbot (PID {}) did not exit within {STOP_TIMEOUT:?}", info.pid);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        pidfile::clear(pid_path)?;
    }
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot watch SIGTERM; only Ctrl+C will stop the bot");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
    tracing::info!("Shutdown requested");
}
