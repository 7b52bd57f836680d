//! logbot: an IRC bot that keeps a channel log.
//!
//! - [`activity`]: the append-only activity log file
//! - [`protocol`]: one connection's state machine and event dispatch
//! - [`handler`]: the replaceable bot behavior
//! - [`supervisor`]: builds a client per connection and reconnects forever
//! - [`scheduler`]: timer capability behind delayed sends
//! - [`config`], [`pidfile`]: command line and process control for the binary

pub mod activity;
pub mod config;
pub mod error;
pub mod handler;
pub mod pidfile;
pub mod protocol;
pub mod scheduler;
pub mod supervisor;

pub use error::BotError;
pub use handler::{EventHandler, LogBot, Responder};
pub use protocol::ProtocolClient;
pub use supervisor::Supervisor;
