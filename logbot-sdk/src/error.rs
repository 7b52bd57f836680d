//! Errors surfaced by the client transport.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("TCP connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The host part of the address is not a valid TLS server name.
    #[error("invalid TLS server name {0:?}")]
    ServerName(String),

    #[error("TLS handshake with {addr} failed: {source}")]
    Tls {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The connection task is gone; the command was not sent.
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
