//! The bot's behavior, separate from the connection that carries it.
//!
//! A handler is any value implementing [`EventHandler`]. Every method has a
//! default, so a variant overrides only what it wants to change; [`LogBot`]
//! is the stock variant and overrides nothing.

use std::time::Duration;

use anyhow::Result;

use crate::protocol::Outbox;

/// Sent to anyone who messages the bot privately.
pub const WHISPER_REFUSAL: &str = "It isn't nice to whisper!  Play nice with the group.";

/// Delay before the follow-up to a greeting.
pub const FOLLOW_UP_DELAY: Duration = Duration::from_millis(3500);

/// What a handler can see and do while reacting to one event.
pub struct Responder<'a> {
    nickname: &'a str,
    outbox: &'a Outbox,
}

impl<'a> Responder<'a> {
    pub fn new(nickname: &'a str, outbox: &'a Outbox) -> Self {
        Self { nickname, outbox }
    }

    /// Our current nickname on the server.
    pub fn nickname(&self) -> &str {
        self.nickname
    }

    pub fn send_message(&self, target: &str, text: &str) -> Result<()> {
        Ok(self.outbox.send_message(target, text)?)
    }

    /// Send later without holding up event processing. Dropped if this
    /// connection is gone by the time it fires.
    pub fn send_message_delayed(&self, delay: Duration, target: &str, text: &str) {
        self.outbox.send_message_delayed(delay, target, text);
    }

    pub fn send_action(&self, target: &str, text: &str) -> Result<()> {
        Ok(self.outbox.send_action(target, text)?)
    }
}

/// Callbacks the protocol client invokes after logging an event.
///
/// Handlers run on the event loop: they must not block. Errors are logged by
/// the caller and never end the connection.
pub trait EventHandler: Send + Sync {
    /// A private message addressed to the bot.
    fn handle_whisper(&self, bot: &Responder<'_>, user: &str, _text: &str) -> Result<()> {
        bot.send_message(user, WHISPER_REFUSAL)
    }

    /// A message in a channel.
    fn handle_channel_message(
        &self,
        bot: &Responder<'_>,
        user: &str,
        channel: &str,
        text: &str,
    ) -> Result<()> {
        let addressed = text
            .strip_prefix(bot.nickname())
            .is_some_and(|rest| rest.starts_with(':'));
        if addressed {
            bot.send_message(channel, &format!("{user}: I am a log bot"))?;
            bot.send_message_delayed(FOLLOW_UP_DELAY, channel, &format!("{user}: How are you?"));
        }
        Ok(())
    }

    /// Someone did a `/me` where we could see it.
    fn handle_action(&self, _bot: &Responder<'_>, _user: &str, _text: &str) -> Result<()> {
        Ok(())
    }
}

/// Baseline behavior: refuse whispers, answer when addressed, ignore actions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBot;

impl EventHandler for LogBot {}
