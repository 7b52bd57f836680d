//! IRC line codec.
//!
//! Parses a single server line into a [`Message`] and serializes outbound
//! messages. Only the subset the bot needs is understood: an optional
//! tag segment (skipped), an optional prefix, the command, and parameters
//! with a trailing `:` parameter.

use std::fmt;

/// Characters that mark a channel name.
pub const CHANNEL_PREFIXES: &[char] = &['#', '&', '!', '+'];

/// Marker appended to a nickname the server rejected as already in use.
pub const COLLISION_MARKER: char = '^';

/// CTCP delimiter used by ACTION payloads.
const CTCP_DELIM: char = '\x01';

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Build a message with no prefix.
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.to_string(),
            params,
        }
    }

    /// Parse one raw line. Returns `None` for anything that is not a
    /// well-formed IRC message; callers are expected to skip such lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        // IRCv3 tags are not negotiated; tolerate and drop them.
        if let Some(tagged) = rest.strip_prefix('@') {
            let (_, after) = tagged.split_once(' ')?;
            rest = after.trim_start_matches(' ');
        }

        let prefix = if let Some(prefixed) = rest.strip_prefix(':') {
            let (prefix, after) = prefixed.split_once(' ')?;
            if prefix.is_empty() {
                return None;
            }
            rest = after.trim_start_matches(' ');
            Some(prefix.to_string())
        } else {
            None
        };

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, after)) => (command, after),
            None => (rest, ""),
        };
        if command.is_empty() || !command.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, after)) => {
                    params.push(param.to_string());
                    rest = after;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// The nickname portion of the prefix, if any.
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix.as_deref().map(nick_of)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let Some((last, middle)) = self.params.split_last() else {
            return Ok(());
        };
        for param in middle {
            write!(f, " {param}")?;
        }
        if last.is_empty() || last.contains(' ') || last.starts_with(':') {
            write!(f, " :{last}")
        } else {
            write!(f, " {last}")
        }
    }
}

/// Bare nickname from a `nick!user@host` identifier. An identifier without
/// `!` is already a nickname and comes back unchanged.
pub fn nick_of(user: &str) -> &str {
    user.split_once('!').map_or(user, |(nick, _)| nick)
}

/// Alternate nickname to register with after `nickname` collided.
pub fn alter_collided_nick(nickname: &str) -> String {
    let mut alt = String::with_capacity(nickname.len() + 1);
    alt.push_str(nickname);
    alt.push(COLLISION_MARKER);
    alt
}

/// Prefix `#` onto a channel name that has no channel prefix.
pub fn normalize_channel(channel: &str) -> String {
    if channel.starts_with(CHANNEL_PREFIXES) {
        channel.to_string()
    } else {
        format!("#{channel}")
    }
}

/// What a PRIVMSG body carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// Ordinary chat text.
    Text(&'a str),
    /// A CTCP ACTION (`/me`), with the action text.
    Action(&'a str),
    /// Any other CTCP request (VERSION, PING, TIME, ...).
    Ctcp { command: &'a str, args: &'a str },
}

impl<'a> Payload<'a> {
    pub fn of(text: &'a str) -> Self {
        let Some(inner) = text.strip_prefix(CTCP_DELIM) else {
            return Self::Text(text);
        };
        // Some clients leave off the closing delimiter.
        let inner = inner.strip_suffix(CTCP_DELIM).unwrap_or(inner);
        let (command, args) = inner.split_once(' ').unwrap_or((inner, ""));
        if command.eq_ignore_ascii_case("ACTION") {
            Self::Action(args)
        } else {
            Self::Ctcp { command, args }
        }
    }
}

/// Wrap `body` as a CTCP ACTION payload.
pub fn action_payload(body: &str) -> String {
    format!("{CTCP_DELIM}ACTION {body}{CTCP_DELIM}")
}
