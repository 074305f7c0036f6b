use crate::core::errors::TransportError;
use crate::core::types::ConnectionStatusEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bidirectional text-message channel with connection status reporting.
///
/// Implementations publish inbound frames and status changes to every
/// receiver handed out by [`Transport::messages`] and
/// [`Transport::connection_status_events`]. Receivers only see events
/// published after they subscribed, so callers subscribe before `connect`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection. Resolves once it is usable.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, message: String) -> Result<(), TransportError>;

    /// Close the connection. Never fails; a second call is a no-op.
    fn close(&self);

    /// Inbound text frames. The channel completes on a hard close.
    fn messages(&self) -> mpsc::UnboundedReceiver<String>;

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent>;
}

/// Builds a fresh underlying transport for every connection attempt.
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;
