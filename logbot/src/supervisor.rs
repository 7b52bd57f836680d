//! Connection factory and retry loop.
//!
//! The supervisor dials, builds a fresh [`ProtocolClient`] for every
//! connection, drives it until the connection ends, and dials again. A drop
//! after connecting is always retried immediately, with no backoff and no
//! attempt cap. A dial that fails outright is fatal.

use std::future::Future;
use std::sync::Arc;

use logbot_sdk::client::{self, ConnectConfig};
use logbot_sdk::event::Event;
use logbot_sdk::{ClientError, ClientHandle};
use tokio::sync::mpsc;

use crate::config::Identity;
use crate::error::BotError;
use crate::handler::EventHandler;
use crate::protocol::ProtocolClient;
use crate::scheduler::Scheduler;

/// A live transport: where to send commands and where events arrive.
pub struct Session {
    pub handle: ClientHandle,
    pub events: mpsc::Receiver<Event>,
}

/// Opens transports to the configured server.
pub trait Connector {
    fn connect(&self) -> impl Future<Output = Result<Session, ClientError>>;
}

/// Dials the real server over TCP, or TLS when configured.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    config: ConnectConfig,
}

impl TcpConnector {
    pub fn new(config: ConnectConfig) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Session, ClientError> {
        let conn = client::establish_connection(&self.config).await?;
        let (handle, events) = client::connect_with_stream(conn, self.config.clone());
        Ok(Session { handle, events })
    }
}

/// What to do after a connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Reconnect,
    Stop,
}

pub struct Supervisor<C> {
    identity: Arc<Identity>,
    handler: Arc<dyn EventHandler>,
    scheduler: Arc<dyn Scheduler>,
    connector: C,
    attempts: u64,
}

impl<C: Connector> Supervisor<C> {
    pub fn new(
        identity: Arc<Identity>,
        handler: Arc<dyn EventHandler>,
        scheduler: Arc<dyn Scheduler>,
        connector: C,
    ) -> Self {
        Self {
            identity,
            handler,
            scheduler,
            connector,
            attempts: 0,
        }
    }

    /// Connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// A brand-new client for one connection. Nothing carries over from
    /// earlier connections except the shared identity and handler.
    pub fn build_connection(&self, handle: ClientHandle) -> ProtocolClient {
        ProtocolClient::new(
            Arc::clone(&self.identity),
            Arc::clone(&self.handler),
            handle,
            Arc::clone(&self.scheduler),
        )
    }

    /// An established connection ended, cleanly or not.
    pub fn on_connection_lost(&self, reason: &str) -> Verdict {
        tracing::warn!(%reason, server = %self.identity.server_addr(), "Connection lost, reconnecting");
        Verdict::Reconnect
    }

    /// The transport could not be opened at all.
    pub fn on_connection_failed(&self, error: &ClientError) -> Verdict {
        tracing::error!(%error, server = %self.identity.server_addr(), "Connection failed");
        Verdict::Stop
    }

    /// Run until a fatal error. Never returns `Ok`.
    pub async fn run(&mut self) -> Result<(), BotError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until a fatal error or until `shutdown` completes. On shutdown the
    /// current connection is closed the same way a drop would close it.
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) -> Result<(), BotError> {
        tokio::pin!(shutdown);
        loop {
            self.attempts += 1;
            tracing::info!(
                attempt = self.attempts,
                server = %self.identity.server_addr(),
                "Connecting"
            );

            let connected = tokio::select! {
                result = self.connector.connect() => result,
                () = &mut shutdown => return Ok(()),
            };
            let session = match connected {
                Ok(session) => session,
                Err(e) => match self.on_connection_failed(&e) {
                    Verdict::Stop => return Err(BotError::ConnectFailed(e)),
                    Verdict::Reconnect => continue,
                },
            };

            let mut client = self.build_connection(session.handle);
            client.begin_connect();
            let ended = tokio::select! {
                ended = self.run_session(&mut client, session.events) => Some(ended?),
                () = &mut shutdown => None,
            };
            let Some(reason) = ended else {
                let _ = client.quit("Shutting down");
                client.on_disconnected("shutdown");
                return Ok(());
            };

            match self.on_connection_lost(&reason) {
                Verdict::Reconnect => continue,
                Verdict::Stop => return Ok(()),
            }
        }
    }

    /// Feed one connection's events to `client` in order until it ends.
    /// Returns the disconnect reason.
    pub async fn run_session(
        &self,
        client: &mut ProtocolClient,
        mut events: mpsc::Receiver<Event>,
    ) -> Result<String, BotError> {
        while let Some(event) = events.recv().await {
            let ended = match &event {
                Event::Disconnected { reason } => Some(reason.clone()),
                _ => None,
            };
            if let Err(e) = client.handle_event(event) {
                let _ = client.quit("Cannot continue");
                client.on_disconnected(&e.to_string());
                return Err(e);
            }
            if let Some(reason) = ended {
                return Ok(reason);
            }
        }
        // Transport went away without saying so.
        let reason = "event stream closed".to_string();
        client.on_disconnected(&reason);
        Ok(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::LogBot;
    use crate::scheduler::ManualScheduler;

    fn identity(dir: &tempfile::TempDir) -> Arc<Identity> {
        Arc::new(Identity {
            nickname: "bot".to_string(),
            channel: "#test".to_string(),
            log_path: dir.path().join("bot.log"),
            host: "irc.example".to_string(),
            port: 6667,
            tls: false,
        })
    }

    struct NeverConnects;

    impl Connector for NeverConnects {
        async fn connect(&self) -> Result<Session, ClientError> {
            Err(ClientError::Closed)
        }
    }

    #[test]
    fn verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(
            identity(&dir),
            Arc::new(LogBot),
            Arc::new(ManualScheduler::new()),
            NeverConnects,
        );
        assert_eq!(supervisor.on_connection_lost("EOF"), Verdict::Reconnect);
        assert_eq!(supervisor.on_connection_lost("Ping timeout"), Verdict::Reconnect);
        assert_eq!(supervisor.on_connection_failed(&ClientError::Closed), Verdict::Stop);
    }

    #[test]
    fn each_connection_gets_a_fresh_client() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Supervisor::new(
            identity(&dir),
            Arc::new(LogBot),
            Arc::new(ManualScheduler::new()),
            NeverConnects,
        );
        let (handle, _rx) = ClientHandle::channel();
        let mut first = supervisor.build_connection(handle.clone());
        first.on_connected().unwrap();
        first.on_signed_on("bot^");

        let second = supervisor.build_connection(handle);
        assert_eq!(second.nickname(), "bot");
        assert!(!second.has_open_log());
    }

    #[tokio::test]
    async fn dial_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut supervisor = Supervisor::new(
            identity(&dir),
            Arc::new(LogBot),
            Arc::new(ManualScheduler::new()),
            NeverConnects,
        );
        let err = supervisor.run().await.unwrap_err();
        assert!(matches!(err, BotError::ConnectFailed(_)));
        assert_eq!(supervisor.attempts(), 1);
        assert!(!dir.path().join("bot.log").exists());
    }
}
