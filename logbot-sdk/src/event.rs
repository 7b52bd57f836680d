//! Events emitted by the IRC client for the bot layer to consume.

/// Events that the SDK emits to the consumer.
///
/// Fields named `from` carry the raw message prefix (`nick!user@host`);
/// consumers decide how much of it they care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Transport is up; registration has been sent.
    Connected,

    /// IRC registration complete. `nick` is our confirmed nick.
    Registered {
        nick: String,
    },

    /// The server rejected `rejected`; registration is retried as `alternate`.
    NickInUse {
        rejected: String,
        alternate: String,
    },

    /// Someone (possibly us) joined a channel.
    Joined {
        channel: String,
        nick: String,
    },

    /// A PRIVMSG to a channel or to us.
    Message {
        from: String,
        target: String,
        text: String,
    },

    /// A CTCP ACTION (`/me`), with the CTCP framing stripped.
    Action {
        from: String,
        target: String,
        text: String,
    },

    /// A user changed nick.
    NickChanged {
        from: String,
        new_nick: String,
    },

    /// Connection was closed, cleanly or not.
    Disconnected {
        reason: String,
    },

    /// Raw server line (for debugging).
    RawLine(String),
}
