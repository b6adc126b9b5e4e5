//! Store error types.

/// Errors that can occur while talking to the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the connection was lost.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// The store rejected or failed to execute a command.
    #[error("Command error: {message}")]
    Command {
        /// Description of the command failure.
        message: String,
    },

    /// Subscribing to a pub/sub channel failed.
    #[error("Subscribe error on {channel}: {message}")]
    Subscribe {
        /// The channel that could not be subscribed to.
        channel: String,
        /// Description of the failure.
        message: String,
    },

    /// Publishing to a pub/sub channel failed.
    #[error("Publish error on {channel}: {message}")]
    Publish {
        /// The channel that could not be published to.
        channel: String,
        /// Description of the failure.
        message: String,
    },

    /// The connection settings are unusable.
    #[error("Invalid store configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Connection` error.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a new `Command` error.
    #[must_use]
    pub fn command(message: impl Into<String>) -> Self {
        Self::Command {
            message: message.into(),
        }
    }

    /// Creates a new `Subscribe` error.
    #[must_use]
    pub fn subscribe(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Publish` error.
    #[must_use]
    pub fn publish(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidConfig` error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` if the error means the store is unreachable.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            Self::connection(err.to_string())
        } else {
            Self::command(err.to_string())
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
