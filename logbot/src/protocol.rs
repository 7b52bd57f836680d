//! One connection's worth of bot: state machine, activity log, dispatch.
//!
//! A [`ProtocolClient`] is built fresh for every connection attempt. It
//! consumes transport [`Event`]s in arrival order, writes what it sees to its
//! [`ActivityLogger`], and hands typed events to the installed
//! [`EventHandler`].
//!
//! ```text
//! Disconnected --begin_connect--> Connecting --on_connected--> Connected
//!     ^                                                           |
//!     |                                                     on_signed_on
//!     +-------------------- on_disconnected ---------------- Joined
//! ```
//!
//! The log is open exactly while the state is `Connected` or `Joined`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use logbot_sdk::event::Event;
use logbot_sdk::irc::nick_of;
use logbot_sdk::{ClientError, ClientHandle};

use crate::activity::ActivityLogger;
use crate::config::Identity;
use crate::error::BotError;
use crate::handler::{EventHandler, Responder};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Joined,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Joined => "joined",
        };
        f.write_str(name)
    }
}

/// What the bot reacts to, with nicknames already extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    ChannelMessage { user: String, channel: String, text: String },
    PrivateMessage { user: String, text: String },
    Action { user: String, channel: String, text: String },
    NickChange { old_nick: String, new_nick: String },
    Joined { channel: String },
    SignedOn { nick: String },
}

impl InboundEvent {
    /// The activity-log line for this event, if it gets one.
    pub fn record(&self) -> Option<String> {
        let line = match self {
            Self::ChannelMessage { user, text, .. } | Self::PrivateMessage { user, text } => {
                format!("<{user}> {text}")
            }
            Self::Action { user, text, .. } => format!("* {user} {text}"),
            Self::NickChange { old_nick, new_nick } => {
                format!("{old_nick} is now known as {new_nick}")
            }
            Self::Joined { channel } => format!("Joined channel [{channel}]"),
            Self::SignedOn { .. } => return None,
        };
        Some(line)
    }
}

/// A message waiting to go out, now or after `delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundIntent {
    pub target: String,
    pub text: String,
    pub delay: Option<Duration>,
}

/// Outbound side of one connection.
///
/// Delayed sends carry the connection's liveness flag and are dropped once
/// the connection that scheduled them has gone away.
#[derive(Clone)]
pub struct Outbox {
    handle: ClientHandle,
    scheduler: Arc<dyn Scheduler>,
    live: Arc<AtomicBool>,
}

impl Outbox {
    pub fn new(handle: ClientHandle, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            handle,
            scheduler,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn submit(&self, intent: OutboundIntent) -> Result<(), ClientError> {
        match intent.delay {
            None => self.handle.privmsg(&intent.target, &intent.text),
            Some(delay) => {
                let handle = self.handle.clone();
                let live = Arc::clone(&self.live);
                self.scheduler.after(
                    delay,
                    Box::new(move || {
                        if !live.load(Ordering::Acquire) {
                            tracing::debug!(recipient = %intent.target, "Dropping delayed send for a closed connection");
                            return;
                        }
                        if let Err(e) = handle.privmsg(&intent.target, &intent.text) {
                            tracing::debug!(error = %e, "Delayed send failed");
                        }
                    }),
                );
                Ok(())
            }
        }
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.submit(OutboundIntent {
            target: target.to_string(),
            text: text.to_string(),
            delay: None,
        })
    }

    pub fn send_message_delayed(&self, delay: Duration, target: &str, text: &str) {
        // Only the immediate path can fail.
        let _ = self.submit(OutboundIntent {
            target: target.to_string(),
            text: text.to_string(),
            delay: Some(delay),
        });
    }

    pub fn send_action(&self, target: &str, text: &str) -> Result<(), ClientError> {
        self.handle.action(target, text)
    }

    pub fn join(&self, channel: &str) -> Result<(), ClientError> {
        self.handle.join(channel)
    }

    pub fn set_nick(&self, nick: &str) -> Result<(), ClientError> {
        self.handle.nick(nick)
    }

    pub fn quit(&self, message: &str) -> Result<(), ClientError> {
        self.handle.quit(Some(message))
    }

    fn retire(&self) {
        self.live.store(false, Ordering::Release);
    }
}

/// The bot's view of a single connection.
pub struct ProtocolClient {
    identity: Arc<Identity>,
    handler: Arc<dyn EventHandler>,
    outbox: Outbox,
    nickname: String,
    state: ConnectionState,
    logger: Option<ActivityLogger>,
}

impl ProtocolClient {
    pub fn new(
        identity: Arc<Identity>,
        handler: Arc<dyn EventHandler>,
        handle: ClientHandle,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            nickname: identity.nickname.clone(),
            identity,
            handler,
            outbox: Outbox::new(handle, scheduler),
            state: ConnectionState::Disconnected,
            logger: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Our nickname as the server currently knows it.
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Nicknames compare case-insensitively on the wire.
    fn is_own_nick(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.nickname)
    }

    pub fn has_open_log(&self) -> bool {
        self.logger.is_some()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// A dial for this client has started.
    pub fn begin_connect(&mut self) {
        self.transition(ConnectionState::Connecting);
    }

    /// Feed one transport event. Events the bot has no use for are ignored.
    pub fn handle_event(&mut self, event: Event) -> Result<(), BotError> {
        match event {
            Event::Connected => self.on_connected()?,
            Event::Registered { nick } => self.on_signed_on(&nick),
            Event::NickInUse { rejected, alternate } => {
                tracing::info!(%rejected, %alternate, "Nickname collision");
                self.nickname = alternate;
            }
            Event::Joined { channel, nick } if self.is_own_nick(&nick) => self.on_joined(&channel),
            Event::Message { from, target, text } => self.on_channel_line(&from, &target, &text),
            Event::Action { from, target, text } => self.on_action_line(&from, &target, &text),
            Event::NickChanged { from, new_nick } => self.on_nick_change_line(&from, &new_nick),
            Event::Disconnected { reason } => self.on_disconnected(&reason),
            Event::RawLine(line) => tracing::trace!(%line, "<- server"),
            Event::Joined { .. } => {}
        }
        Ok(())
    }

    /// Transport is ready: open the activity log.
    pub fn on_connected(&mut self) -> Result<(), BotError> {
        if self.logger.is_some() {
            tracing::warn!("Connected twice on one client; keeping the open log");
            return Ok(());
        }
        let logger = ActivityLogger::open(&self.identity.log_path)?;
        self.logger = Some(logger);
        self.transition(ConnectionState::Connected);
        self.record("Connected");
        Ok(())
    }

    /// Connection is gone, for whatever reason. Closes the log once.
    pub fn on_disconnected(&mut self, reason: &str) {
        self.outbox.retire();
        if let Some(mut logger) = self.logger.take() {
            if let Err(e) = logger.log("Disconnected") {
                tracing::warn!(error = %e, "Failed to write activity log");
            }
            if let Err(e) = logger.close() {
                tracing::warn!(error = %e, "Failed to close activity log");
            }
        }
        tracing::info!(%reason, "Disconnected");
        self.transition(ConnectionState::Disconnected);
    }

    /// Registration acknowledged: remember the nick we got and join.
    pub fn on_signed_on(&mut self, nick: &str) {
        self.nickname = nick.to_string();
        self.transition(ConnectionState::Joined);
        self.observe(InboundEvent::SignedOn { nick: nick.to_string() });
        tracing::info!(nick, channel = %self.identity.channel, "Signed on, joining");
        if let Err(e) = self.outbox.join(&self.identity.channel) {
            tracing::warn!(error = %e, "Failed to send JOIN");
        }
    }

    pub fn on_joined(&mut self, channel: &str) {
        self.observe(InboundEvent::Joined { channel: channel.to_string() });
    }

    /// A PRIVMSG. Addressed to our own nick it is a whisper, otherwise a
    /// channel message.
    pub fn on_channel_line(&mut self, raw_user: &str, channel: &str, text: &str) {
        let user = nick_of(raw_user).to_string();
        let event = if self.is_own_nick(channel) {
            InboundEvent::PrivateMessage { user, text: text.to_string() }
        } else {
            InboundEvent::ChannelMessage {
                user,
                channel: channel.to_string(),
                text: text.to_string(),
            }
        };
        self.observe(event);
    }

    pub fn on_action_line(&mut self, raw_user: &str, channel: &str, text: &str) {
        let event = InboundEvent::Action {
            user: nick_of(raw_user).to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
        };
        self.observe(event);
    }

    /// Logged only; handlers are not told about nick changes.
    pub fn on_nick_change_line(&mut self, raw_old_user: &str, new_nick: &str) {
        let old_nick = nick_of(raw_old_user).to_string();
        if self.is_own_nick(&old_nick) {
            self.nickname = new_nick.to_string();
        }
        self.observe(InboundEvent::NickChange {
            old_nick,
            new_nick: new_nick.to_string(),
        });
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<(), BotError> {
        Ok(self.outbox.send_message(target, text)?)
    }

    pub fn send_message_delayed(&self, delay: Duration, target: &str, text: &str) {
        self.outbox.send_message_delayed(delay, target, text);
    }

    pub fn send_action(&self, target: &str, text: &str) -> Result<(), BotError> {
        Ok(self.outbox.send_action(target, text)?)
    }

    pub fn join(&self, channel: &str) -> Result<(), BotError> {
        Ok(self.outbox.join(channel)?)
    }

    pub fn set_nick(&self, nick: &str) -> Result<(), BotError> {
        Ok(self.outbox.set_nick(nick)?)
    }

    /// Ask the server to close the connection.
    pub fn quit(&self, message: &str) -> Result<(), BotError> {
        Ok(self.outbox.quit(message)?)
    }

    /// Log the event, then hand it to the handler.
    fn observe(&mut self, event: InboundEvent) {
        if let Some(line) = event.record() {
            self.record(&line);
        }
        self.dispatch(&event);
    }

    fn dispatch(&self, event: &InboundEvent) {
        let bot = Responder::new(&self.nickname, &self.outbox);
        let result = match event {
            InboundEvent::PrivateMessage { user, text } => self.handler.handle_whisper(&bot, user, text),
            InboundEvent::ChannelMessage { user, channel, text } => {
                self.handler.handle_channel_message(&bot, user, channel, text)
            }
            InboundEvent::Action { user, text, .. } => self.handler.handle_action(&bot, user, text),
            InboundEvent::NickChange { .. } | InboundEvent::Joined { .. } | InboundEvent::SignedOn { .. } => {
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Handler error");
        }
    }

    fn record(&mut self, text: &str) {
        let Some(logger) = self.logger.as_mut() else {
            tracing::debug!(text, "No activity log open; record dropped");
            return;
        };
        if let Err(e) = logger.log(text) {
            tracing::warn!(error = %e, "Failed to write activity log");
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "Connection state");
            self.state = next;
        }
    }
}
