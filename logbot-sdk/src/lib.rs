//! logbot-sdk: the IRC transport underneath logbot.
//!
//! Owns byte framing and the protocol chores a bot should not care about
//! (registration, PING/PONG, nickname-collision retry) and hands the rest
//! up as [`event::Event`]s. Outbound traffic goes through
//! [`client::ClientHandle`].

pub mod client;
pub mod error;
pub mod event;
pub mod irc;

pub use client::{ClientHandle, Command, ConnectConfig};
pub use error::ClientError;
pub use event::Event;
