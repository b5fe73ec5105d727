//! Observable state of the broker connection, published by the kernel over a
//! `tokio::sync::watch` channel.
//!
//! ```text
//! Connecting -> Connected -> Reconnecting(delay) -> Connected ...
//!      |             |               |
//!      +-------------+---------------+--> Disconnected(reason) | Closed
//! ```
//! `Disconnected` and `Closed` are terminal: the kernel has stopped.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    Connected,
    /// Connection lost, waiting this many seconds before the next attempt.
    Reconnecting(f64),
    /// The kernel gave up; the string is the last error.
    Disconnected(String),
    /// Orderly shutdown after cancellation.
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Closed => "Closed",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True once the kernel has stopped and will never connect again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_) | ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Reconnecting(secs) => write!(f, "Reconnecting (in {secs} seconds)"),
            ConnectionState::Disconnected(reason) => write!(f, "Disconnected ({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(ConnectionState::Closed.to_string(), "Closed");
        assert_eq!(
            ConnectionState::Reconnecting(2.5).to_string(),
            "Reconnecting (in 2.5 seconds)"
        );
        assert_eq!(
            ConnectionState::Disconnected("refused".into()).to_string(),
            "Disconnected (refused)"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Disconnected("x".into()).is_terminal());
        assert!(!ConnectionState::Connecting.is_terminal());
        assert!(!ConnectionState::Reconnecting(1.0).is_terminal());
        assert!(!ConnectionState::Connected.is_terminal());
    }

    #[test]
    fn test_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting(1.0).is_connected());
    }
}
