//! IRC client transport.
//!
//! Manages the TCP (optionally TLS) connection, IRC registration, keepalive
//! and nickname-collision retry, and turns server lines into [`Event`]s.
//! Outbound traffic goes through a [`ClientHandle`].
//!
//! ## Reconnection
//!
//! The SDK does not reconnect on its own. A session ends with exactly one
//! [`Event::Disconnected`]; the consumer decides what happens next.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::error::{ClientError, Result};
use crate::event::Event;
use crate::irc::{self, Message};

/// Quiet time before we probe the link with a PING.
const PING_INTERVAL: Duration = Duration::from_secs(60);
/// Quiet time after which the link is given up for dead.
const PING_TIMEOUT: Duration = Duration::from_secs(120);

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Use TLS.
    pub tls: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "ircbot".to_string(),
            user: "ircbot".to_string(),
            realname: "logbot".to_string(),
            tls: false,
        }
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Privmsg { target: String, text: String },
    Action { target: String, text: String },
    Nick(String),
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
///
/// Sends never wait: commands are queued on an unbounded channel and written
/// by the connection task in order.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ClientHandle {
    /// A detached handle and the receiving end of its command queue.
    ///
    /// The connection task owns the receiver in production; tests read it
    /// directly to observe what would go on the wire.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        (Self { cmd_tx }, cmd_rx)
    }

    pub fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| ClientError::Closed)
    }

    pub fn join(&self, channel: &str) -> Result<()> {
        self.send(Command::Join(irc::normalize_channel(channel)))
    }

    pub fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::Privmsg {
            target: target.to_string(),
            text: text.to_string(),
        })
    }

    /// Send a CTCP ACTION (`/me`).
    pub fn action(&self, target: &str, text: &str) -> Result<()> {
        self.send(Command::Action {
            target: target.to_string(),
            text: text.to_string(),
        })
    }

    pub fn nick(&self, nick: &str) -> Result<()> {
        self.send(Command::Nick(nick.to_string()))
    }

    pub fn quit(&self, message: Option<&str>) -> Result<()> {
        self.send(Command::Quit(message.map(|s| s.to_string())))
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish TCP (and optionally TLS) connection to the server.
///
/// Kept separate from [`connect_with_stream`] so that a failure to reach the
/// server is reported before any session state exists.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    let use_tls = config.tls || config.server_addr.ends_with(":6697");
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: config.server_addr.clone(),
            source,
        })?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let connector = TlsConnector::from(Arc::new(rustls_default_config()));
    let host = config
        .server_addr
        .rsplit_once(':')
        .map_or(config.server_addr.as_str(), |(host, _)| host);
    let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .map_err(|_| ClientError::ServerName(host.to_string()))?;
    let tls = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|source| ClientError::Tls {
            addr: config.server_addr.clone(),
            source,
        })?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls)))
}

fn rustls_default_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Start an IRC session over an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The session runs in a spawned task.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    match conn {
        EstablishedConnection::Plain(tcp) => spawn_session(tcp, config),
        EstablishedConnection::Tls(tls) => spawn_session(*tls, config),
    }
}

/// Run an IRC session over any byte stream.
///
/// Emits [`Event::Connected`] first and [`Event::Disconnected`] exactly once
/// when the session ends, whatever the cause.
pub fn spawn_session<S>(stream: S, config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (handle, cmd_rx) = ClientHandle::channel();

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let (reader, writer) = tokio::io::split(stream);
        let reason = match run_irc(BufReader::new(reader), writer, &config, &event_tx, cmd_rx).await
        {
            Ok(reason) => reason,
            Err(e) => e.to_string(),
        };
        tracing::debug!(%reason, "IRC session ended");
        let _ = event_tx.send(Event::Disconnected { reason }).await;
    });

    (handle, event_rx)
}

/// Drive one session. Returns the reason the session ended cleanly.
async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: &mpsc::Sender<Event>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut nick = config.nick.clone();
    write_message(&mut writer, &Message::new("NICK", vec![nick.clone()])).await?;
    write_message(
        &mut writer,
        &Message::new(
            "USER",
            vec![
                config.user.clone(),
                "0".to_string(),
                "*".to_string(),
                config.realname.clone(),
            ],
        ),
    )
    .await?;

    let mut registered = false;
    let mut pending_commands: Vec<Command> = Vec::new();
    let mut line_buf = Vec::new();
    let mut last_activity = Instant::now();
    // One keepalive PING per quiet spell; any inbound line clears it.
    let mut awaiting_pong = false;

    loop {
        let quiet_limit = if awaiting_pong { PING_TIMEOUT } else { PING_INTERVAL };
        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                if result? == 0 {
                    return Ok("EOF".to_string());
                }
                last_activity = Instant::now();
                awaiting_pong = false;
                // Servers are not obliged to speak UTF-8; never drop the session over it.
                let line = String::from_utf8_lossy(&line_buf).into_owned();
                line_buf.clear();
                let raw = line.trim_end().to_string();
                let _ = event_tx.send(Event::RawLine(raw.clone())).await;

                let Some(msg) = Message::parse(&line) else {
                    tracing::trace!(line = %raw, "Ignoring unparseable line");
                    continue;
                };
                match msg.command.as_str() {
                    "PING" => {
                        let token = msg.params.first().cloned().unwrap_or_default();
                        write_message(&mut writer, &Message::new("PONG", vec![token])).await?;
                    }
                    // RPL_WELCOME
                    "001" => {
                        if let Some(confirmed) = msg.params.first() {
                            nick = confirmed.clone();
                        }
                        registered = true;
                        let _ = event_tx.send(Event::Registered { nick: nick.clone() }).await;
                        for cmd in pending_commands.drain(..) {
                            execute_command(&mut writer, cmd, &mut nick).await?;
                        }
                    }
                    // ERR_NICKNAMEINUSE
                    "433" => {
                        let rejected = std::mem::take(&mut nick);
                        nick = irc::alter_collided_nick(&rejected);
                        tracing::info!(%rejected, alternate = %nick, "Nickname in use, retrying");
                        write_message(&mut writer, &Message::new("NICK", vec![nick.clone()])).await?;
                        let _ = event_tx.send(Event::NickInUse { rejected, alternate: nick.clone() }).await;
                    }
                    "JOIN" => {
                        if let (Some(channel), Some(who)) = (msg.params.first(), msg.source_nick()) {
                            let _ = event_tx.send(Event::Joined {
                                channel: channel.clone(),
                                nick: who.to_string(),
                            }).await;
                        }
                    }
                    "NICK" => {
                        if let (Some(from), Some(new_nick)) = (msg.prefix.clone(), msg.params.first()) {
                            if irc::nick_of(&from).eq_ignore_ascii_case(&nick) {
                                nick = new_nick.clone();
                            }
                            let _ = event_tx.send(Event::NickChanged {
                                from,
                                new_nick: new_nick.clone(),
                            }).await;
                        }
                    }
                    "PRIVMSG" => {
                        if let (Some(from), [target, text, ..]) = (msg.prefix.clone(), msg.params.as_slice()) {
                            let event = match irc::Payload::of(text) {
                                irc::Payload::Text(text) => Event::Message {
                                    from,
                                    target: target.clone(),
                                    text: text.to_string(),
                                },
                                irc::Payload::Action(body) => Event::Action {
                                    from,
                                    target: target.clone(),
                                    text: body.to_string(),
                                },
                                irc::Payload::Ctcp { command, .. } => {
                                    tracing::debug!(%from, command, "Ignoring CTCP query");
                                    continue;
                                }
                            };
                            let _ = event_tx.send(event).await;
                        }
                    }
                    "ERROR" => {
                        let text = msg.params.join(" ");
                        tracing::warn!(%text, "Server sent ERROR");
                    }
                    _ => {}
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if let Command::Quit(_) = cmd {
                    execute_command(&mut writer, cmd, &mut nick).await?;
                    return Ok("Quit".to_string());
                }
                if registered {
                    execute_command(&mut writer, cmd, &mut nick).await?;
                } else {
                    // Servers drop most commands before registration.
                    pending_commands.push(cmd);
                }
            }
            _ = tokio::time::sleep_until(last_activity + quiet_limit) => {
                if awaiting_pong {
                    return Ok("Ping timeout".to_string());
                }
                write_message(&mut writer, &Message::new("PING", vec!["keepalive".to_string()])).await?;
                awaiting_pong = true;
            }
        }
    }
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    cmd: Command,
    nick: &mut String,
) -> Result<()> {
    let msg = match cmd {
        Command::Join(channel) => Message::new("JOIN", vec![channel]),
        Command::Privmsg { target, text } => {
            Message::new("PRIVMSG", vec![target, single_line(&text)])
        }
        Command::Action { target, text } => {
            Message::new("PRIVMSG", vec![target, irc::action_payload(&single_line(&text))])
        }
        Command::Nick(new_nick) => {
            *nick = new_nick.clone();
            Message::new("NICK", vec![new_nick])
        }
        Command::Quit(reason) => Message::new("QUIT", reason.into_iter().collect()),
    };
    write_message(writer, &msg).await
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    tracing::trace!(line = %msg, "-> server");
    writer.write_all(format!("{msg}\r\n").as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Outbound text must not smuggle extra protocol lines.
fn single_line(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

    struct Server {
        reader: BufReader<tokio::io::ReadHalf<DuplexStream>>,
        writer: tokio::io::WriteHalf<DuplexStream>,
    }

    impl Server {
        async fn expect(&mut self) -> String {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.unwrap();
            line.trim_end().to_string()
        }

        async fn say(&mut self, line: &str) {
            self.writer.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
        }
    }

    fn start(nick: &str) -> (ClientHandle, mpsc::Receiver<Event>, Server) {
        let (client_side, server_side) = tokio::io::duplex(8192);
        let config = ConnectConfig {
            nick: nick.to_string(),
            user: nick.to_string(),
            ..Default::default()
        };
        let (handle, events) = spawn_session(client_side, config);
        let (reader, writer) = tokio::io::split(server_side);
        let server = Server {
            reader: BufReader::new(reader),
            writer,
        };
        (handle, events, server)
    }

    async fn next_non_raw(events: &mut mpsc::Receiver<Event>) -> Event {
        loop {
            match events.recv().await.unwrap() {
                Event::RawLine(_) => continue,
                other => return other,
            }
        }
    }

    #[tokio::test]
    async fn registers_and_answers_ping() {
        let (_handle, mut events, mut server) = start("bot");
        assert_eq!(events.recv().await.unwrap(), Event::Connected);
        assert_eq!(server.expect().await, "NICK bot");
        assert_eq!(server.expect().await, "USER bot 0 * logbot");

        server.say("PING :irc.example").await;
        assert_eq!(server.expect().await, "PONG irc.example");

        server.say(":irc.example 001 bot :Welcome").await;
        assert_eq!(
            next_non_raw(&mut events).await,
            Event::Registered { nick: "bot".to_string() }
        );
    }

    #[tokio::test]
    async fn nick_collisions_compound() {
        let (_handle, mut events, mut server) = start("bot");
        assert_eq!(events.recv().await.unwrap(), Event::Connected);
        server.expect().await;
        server.expect().await;

        server.say(":irc.example 433 * bot :Nickname is already in use").await;
        assert_eq!(server.expect().await, "NICK bot^");
        server.say(":irc.example 433 * bot^ :Nickname is already in use").await;
        assert_eq!(server.expect().await, "NICK bot^^");

        assert_eq!(
            next_non_raw(&mut events).await,
            Event::NickInUse { rejected: "bot".into(), alternate: "bot^".into() }
        );
        assert_eq!(
            next_non_raw(&mut events).await,
            Event::NickInUse { rejected: "bot^".into(), alternate: "bot^^".into() }
        );
    }

    #[tokio::test]
    async fn commands_wait_for_registration() {
        let (handle, mut events, mut server) = start("bot");
        assert_eq!(events.recv().await.unwrap(), Event::Connected);
        server.expect().await;
        server.expect().await;

        handle.join("bottest").unwrap();
        handle.privmsg("#bottest", "hello\r\nQUIT").unwrap();
        server.say(":irc.example 001 bot :Welcome").await;

        assert_eq!(server.expect().await, "JOIN #bottest");
        assert_eq!(server.expect().await, "PRIVMSG #bottest :hello  QUIT");
    }

    #[tokio::test]
    async fn inbound_lines_become_events() {
        let (_handle, mut events, mut server) = start("bot");
        assert_eq!(events.recv().await.unwrap(), Event::Connected);

        server.say(":bot!b@h JOIN #test").await;
        server.say(":alice!a@h PRIVMSG #test :bot: hi").await;
        server.say(":alice!a@h PRIVMSG #test :\x01ACTION waves\x01").await;
        server.say("this is not irc at all ::").await;
        server.say(":alice!a@h NICK alicia").await;

        assert_eq!(
            next_non_raw(&mut events).await,
            Event::Joined { channel: "#test".into(), nick: "bot".into() }
        );
        assert_eq!(
            next_non_raw(&mut events).await,
            Event::Message { from: "alice!a@h".into(), target: "#test".into(), text: "bot: hi".into() }
        );
        assert_eq!(
            next_non_raw(&mut events).await,
            Event::Action { from: "alice!a@h".into(), target: "#test".into(), text: "waves".into() }
        );
        assert_eq!(
            next_non_raw(&mut events).await,
            Event::NickChanged { from: "alice!a@h".into(), new_nick: "alicia".into() }
        );
    }

    #[tokio::test]
    async fn server_close_emits_one_disconnect() {
        let (handle, mut events, server) = start("bot");
        assert_eq!(events.recv().await.unwrap(), Event::Connected);
        drop(server);

        let mut disconnects = 0;
        while let Some(event) = events.recv().await {
            if let Event::Disconnected { .. } = event {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        assert!(handle.privmsg("#test", "late").is_err());
    }

    #[tokio::test]
    async fn ctcp_queries_are_not_chat() {
        let (_handle, mut events, mut server) = start("bot");
        assert_eq!(events.recv().await.unwrap(), Event::Connected);

        server.say(":bob!b@h PRIVMSG bot :\x01VERSION\x01").await;
        server.say(":bob!b@h PRIVMSG #test :\x01PING 1700000000\x01").await;
        server.say(":bob!b@h PRIVMSG bot :psst").await;

        assert_eq!(
            next_non_raw(&mut events).await,
            Event::Message { from: "bob!b@h".into(), target: "bot".into(), text: "psst".into() }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_link_gets_one_ping_per_interval() {
        let (_handle, _events, mut server) = start("bot");
        server.expect().await;
        server.expect().await;
        server.say(":irc.example 001 bot :Welcome").await;

        let quiet_since = Instant::now();
        assert_eq!(server.expect().await, "PING keepalive");
        assert!(quiet_since.elapsed() >= PING_INTERVAL);

        // The reply restarts the quiet period.
        server.say(":irc.example PONG irc.example :keepalive").await;
        let answered = Instant::now();
        assert_eq!(server.expect().await, "PING keepalive");
        assert!(answered.elapsed() >= PING_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_ping_times_out() {
        let (_handle, mut events, mut server) = start("bot");
        server.expect().await;
        server.expect().await;
        server.say(":irc.example 001 bot :Welcome").await;
        let quiet_since = Instant::now();

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if server.reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            lines.push(line.trim_end().to_string());
        }
        assert_eq!(lines, vec!["PING keepalive"]);
        assert!(quiet_since.elapsed() >= PING_TIMEOUT);

        let mut reason = None;
        while let Some(event) = events.recv().await {
            if let Event::Disconnected { reason: r } = event {
                reason = Some(r);
            }
        }
        assert_eq!(reason.as_deref(), Some("Ping timeout"));
    }
}
