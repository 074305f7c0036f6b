use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a connection.
///
/// `Ready` is the state of a transport that was never connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Ready,
    Connecting,
    Connected,
    Closing,
    Closed,
    Error,
}

impl ConnectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection status change.
///
/// `is_reconnecting` is only set by a reconnecting transport: `Some(true)`
/// while a reconnection process will retry, `Some(false)` once it gave up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConnectionStatusEvent {
    Connecting,
    Connected,
    Closing,
    Closed,
    Error {
        error_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_reconnecting: Option<bool>,
    },
}

impl ConnectionStatusEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error_message: message.into(),
            is_reconnecting: None,
        }
    }

    pub const fn status(&self) -> ConnectionStatus {
        match self {
            Self::Connecting => ConnectionStatus::Connecting,
            Self::Connected => ConnectionStatus::Connected,
            Self::Closing => ConnectionStatus::Closing,
            Self::Closed => ConnectionStatus::Closed,
            Self::Error { .. } => ConnectionStatus::Error,
        }
    }

    /// An error after which no further reconnection will happen.
    pub const fn is_terminal_error(&self) -> bool {
        matches!(
            self,
            Self::Error {
                is_reconnecting: None | Some(false),
                ..
            }
        )
    }
}
