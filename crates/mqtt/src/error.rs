//! Error type shared by every operation of the transport crate.
//!
//! Variants fall into three groups:
//!
//! * **setup** (`ConfigError`, `ClientSetup`, `Io`): the configuration or the
//!   TLS material is unusable, nothing was sent yet;
//! * **connect** (`ConnectTimeout`, `ConnectionRejected`, `ClientConnection`,
//!   `RetriesPolicy`): the broker could not be reached or refused us;
//! * **publish** (`InvalidMetadata`, `Serialization`, `ClientTransfer`,
//!   `ConnectionClosed`): a single message could not be handed to the broker.
//!
//! Callers above this crate treat all of them as fatal for the current run.

use thiserror::Error;

use super::backoff::BackoffError;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Topic, QoS or retain settings of an endpoint are unusable.
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The payload could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The rumqttc client could not be constructed (bad TLS settings etc).
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// `Config` failed its validation rules.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// The request channel towards the event loop is closed or full.
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Network or protocol level failure reported by the event loop.
    ///
    /// Boxed, `ConnectionError` is large.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// No CONNACK arrived within `connection_timeout` seconds.
    #[error("Timed out after {0}s waiting for the broker to accept the connection")]
    ConnectTimeout(u64),

    /// The connection kernel gave up before the first CONNACK.
    #[error("Connection rejected: {0}")]
    ConnectionRejected(String),

    /// The connection kernel has stopped; nothing can be published any more.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Reconnect attempts after a lost connection were exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] BackoffError),

    /// Reading TLS material from disk failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
