//! Omniston SDK kernel - transport layer shared by every API surface
//!
//! The kernel knows nothing about quotes or trades. It moves text frames over
//! a WebSocket, keeps the connection alive, and frames JSON-RPC messages.
//!
//! # Architecture
//!
//! ## Transport Layer
//! - `Transport`: duplex text channel with connection status events
//! - `WebSocketTransport`: tokio-tungstenite implementation
//! - `ReconnectingTransport`: rebuilds the underlying transport through a
//!   `TransportFactory` and retries with exponential backoff
//!
//! ## Message Handling
//! - `codec`: JSON-RPC 2.0 request encoding and response/notification
//!   classification
//!
//! # Key Principles
//!
//! 1. **Transport Only**: no Omniston method names or payload types live here
//! 2. **Pluggable**: transports are trait objects built by a factory
//! 3. **Testable**: all waiting goes through the injected `Timer`
//!
//! # Usage
//!
//! ```rust,no_run
//! use omniston_sdk::core::kernel::*;
//! use omniston_sdk::core::timer::TokioTimer;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory: TransportFactory = Arc::new(|| {
//!     Arc::new(WebSocketTransport::new("wss://omni-ws.ston.fi")) as Arc<dyn Transport>
//! });
//! let transport = ReconnectingTransport::new(
//!     factory,
//!     Arc::new(TokioTimer),
//!     ReconnectPolicy::default(),
//! );
//!
//! let mut frames = transport.messages();
//! transport.connect().await?;
//! transport.send(r#"{"jsonrpc":"2.0","id":1,"method":"v1beta7.asset.query","params":{}}"#.to_string()).await?;
//! let _reply = frames.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod reconnect;
pub mod transport;
pub mod ws;

pub use codec::{JsonRpcErrorObject, JsonRpcMessage};
pub use reconnect::{ReconnectPolicy, ReconnectingTransport};
pub use transport::{Transport, TransportFactory};
pub use ws::WebSocketTransport;
