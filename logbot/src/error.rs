//! Bot-level errors.

use logbot_sdk::ClientError;

use crate::activity::LogError;

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// The activity log could not be opened; the connection cannot proceed.
    #[error(transparent)]
    LogSink(#[from] LogError),

    /// The transport could not be established. Not retried.
    #[error("connection failed: {0}")]
    ConnectFailed(#[source] ClientError),

    #[error(transparent)]
    Client(#[from] ClientError),
}
