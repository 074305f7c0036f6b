use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Boxed error kept as the cause of an [`OmnistonError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the duplex channel itself.
///
/// Cloneable so that one reconnection outcome can be handed to every caller
/// blocked on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection is closed")]
    Closed,

    #[error("Cancelled by client")]
    CancelledByClient,

    #[error("Unable to reconnect after {attempts} attempts. Last error: {last_error}")]
    ReconnectFailed { attempts: u32, last_error: String },

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Failed to send message: {0}")]
    Send(String),

    #[error("Connection timeout after {0} ms")]
    Timeout(u64),
}

/// Failures of a JSON-RPC call or notification stream.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{message}")]
    Server {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("Server error: {0}")]
    UnexpectedServerError(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("ApiClient is closed")]
    ClientClosed,

    #[error("Request {method} timed out after {timeout_ms} ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Quote event received out of the order the protocol allows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unexpected {event} event before ack")]
    EventBeforeAck { event: &'static str },

    #[error("Duplicate ack for rfq {rfq_id}")]
    DuplicateAck { rfq_id: String },
}

/// Well-known values of [`OmnistonError::code`].
pub struct ErrorCode;

impl ErrorCode {
    pub const UNKNOWN: i64 = -1;
}

/// Reason attached by the server to an application error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorReason {
    QuoteValidationFailed,
    InvalidArgument,
    NotFound,
    SwapLimitExceeded,
    Internal,
    InvalidParameters,
    Unsupported,
    #[serde(other)]
    Unknown,
}

/// Structured `error_info` block of a server error.
///
/// `metadata` depends on `reason`: expected/actual values for validation
/// failures, `object_type`/`object_id` for `NOT_FOUND`, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub reason: ErrorReason,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub metadata: Value,
}

/// The `data` object of a JSON-RPC error returned by Omniston.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OmnistonErrorDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_info: Option<ErrorInfo>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// The single error type returned by the public SDK surface.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct OmnistonError {
    pub code: i64,
    pub message: String,
    pub details: Option<OmnistonErrorDetails>,
    #[source]
    source: Option<BoxError>,
}

impl OmnistonError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Wrap any error with [`ErrorCode::UNKNOWN`], keeping it as the cause.
    pub fn wrap<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            code: ErrorCode::UNKNOWN,
            message: error.to_string(),
            details: None,
            source: Some(Box::new(error)),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: OmnistonErrorDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// The error that caused this one, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// True when the operation was aborted by `connect()` or `close()`
    /// rather than by a network failure.
    pub fn is_cancelled(&self) -> bool {
        self.find_transport_error()
            .is_some_and(|e| *e == TransportError::CancelledByClient)
    }

    /// True when the connection failed or was closed.
    pub fn is_connection_error(&self) -> bool {
        if let Some(rpc) = self.cause().and_then(|c| c.downcast_ref::<RpcError>()) {
            if matches!(rpc, RpcError::ConnectionClosed | RpcError::ClientClosed) {
                return true;
            }
        }
        self.find_transport_error()
            .is_some_and(|e| *e != TransportError::CancelledByClient)
    }

    fn find_transport_error(&self) -> Option<&TransportError> {
        let cause = self.cause()?;
        if let Some(transport) = cause.downcast_ref::<TransportError>() {
            return Some(transport);
        }
        match cause.downcast_ref::<RpcError>() {
            Some(RpcError::Transport(transport)) => Some(transport),
            _ => None,
        }
    }
}

impl From<RpcError> for OmnistonError {
    fn from(error: RpcError) -> Self {
        let (code, details) = match &error {
            RpcError::Server { code, data, .. } => (
                *code,
                data.clone()
                    .and_then(|d| serde_json::from_value::<OmnistonErrorDetails>(d).ok()),
            ),
            _ => (ErrorCode::UNKNOWN, None),
        };
        Self {
            code,
            message: error.to_string(),
            details,
            source: Some(Box::new(error)),
        }
    }
}

impl From<TransportError> for OmnistonError {
    fn from(error: TransportError) -> Self {
        Self::wrap(error)
    }
}

impl From<ProtocolError> for OmnistonError {
    fn from(error: ProtocolError) -> Self {
        Self::wrap(error)
    }
}

impl From<serde_json::Error> for OmnistonError {
    fn from(error: serde_json::Error) -> Self {
        Self::wrap(error)
    }
}

impl From<hex::FromHexError> for OmnistonError {
    fn from(error: hex::FromHexError) -> Self {
        Self::wrap(error)
    }
}

impl From<crate::core::config::ConfigError> for OmnistonError {
    fn from(error: crate::core::config::ConfigError) -> Self {
        Self::wrap(error)
    }
}
