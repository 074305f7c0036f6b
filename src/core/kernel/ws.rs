use crate::core::errors::TransportError;
use crate::core::kernel::codec::truncate_for_log;
use crate::core::kernel::transport::Transport;
use crate::core::lock;
use crate::core::stream::EventBus;
use crate::core::types::ConnectionStatusEvent;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, instrument, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

struct Socket {
    state: SocketState,
    // bumped on every connect so a superseded socket task stays silent
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

struct Shared {
    url: String,
    socket: Mutex<Socket>,
    messages: EventBus<String>,
    status_events: EventBus<ConnectionStatusEvent>,
}

/// [`Transport`] over a single tokio-tungstenite WebSocket.
///
/// Reading and writing happen on a spawned task per connection; `send` only
/// queues the frame for that task. Status events follow the socket lifecycle:
/// `Connecting`/`Connected` on connect, `Closing`/`Closed` when the client
/// closes, and `Error` with the reason when the connection fails or the
/// server drops it.
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                socket: Mutex::new(Socket {
                    state: SocketState::Idle,
                    generation: 0,
                    outbound: None,
                }),
                messages: EventBus::new(),
                status_events: EventBus::new(),
            }),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    fn complete_connect(
        &self,
        generation: u64,
        result: Result<WsStream, TransportError>,
    ) -> Result<(), TransportError> {
        let mut socket = lock(&self.shared.socket);
        if socket.generation != generation {
            return Err(TransportError::Closed);
        }

        if socket.state == SocketState::Closing {
            socket.state = SocketState::Closed;
            drop(socket);
            debug!("Connection closed by client during handshake");
            self.shared.status_events.publish(ConnectionStatusEvent::Closed);
            self.shared.messages.close();
            return Err(TransportError::Closed);
        }

        match result {
            Err(e) => {
                socket.state = SocketState::Closed;
                drop(socket);
                error!(url = %self.shared.url, error = %e, "WebSocket connection failed");
                self.shared
                    .status_events
                    .publish(ConnectionStatusEvent::error(e.to_string()));
                Err(e)
            }
            Ok(stream) => {
                let (tx, rx) = mpsc::unbounded_channel();
                socket.outbound = Some(tx);
                socket.state = SocketState::Open;
                drop(socket);

                info!(url = %self.shared.url, "WebSocket connected");
                self.shared.status_events.publish(ConnectionStatusEvent::Connected);
                tokio::spawn(run_socket(self.shared.clone(), generation, stream, rx));
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    #[instrument(skip(self), fields(url = %self.shared.url))]
    async fn connect(&self) -> Result<(), TransportError> {
        let generation = {
            let mut socket = lock(&self.shared.socket);
            // a previous socket task shuts down once its sender is gone
            socket.outbound = None;
            socket.generation += 1;
            socket.state = SocketState::Connecting;
            socket.generation
        };
        self.shared
            .status_events
            .publish(ConnectionStatusEvent::Connecting);

        let timeout_ms = self.connect_timeout.as_millis() as u64;
        let result =
            match tokio::time::timeout(self.connect_timeout, connect_async(self.shared.url.as_str()))
                .await
            {
                Err(_) => Err(TransportError::Timeout(timeout_ms)),
                Ok(Err(e)) => Err(TransportError::Connect(e.to_string())),
                Ok(Ok((stream, _))) => Ok(stream),
            };

        self.complete_connect(generation, result)
    }

    #[instrument(skip(self, message), fields(len = message.len()))]
    async fn send(&self, message: String) -> Result<(), TransportError> {
        let socket = lock(&self.shared.socket);
        match (socket.state, socket.outbound.as_ref()) {
            (SocketState::Open, Some(outbound)) => {
                debug!(frame = %truncate_for_log(&message, 512), "Sending frame");
                outbound
                    .send(Message::Text(message))
                    .map_err(|_| TransportError::Send("WebSocket is not ready".to_string()))
            }
            _ => Err(TransportError::NotConnected),
        }
    }

    fn close(&self) {
        let outbound = {
            let mut socket = lock(&self.shared.socket);
            match socket.state {
                SocketState::Connecting | SocketState::Open => {
                    socket.state = SocketState::Closing;
                    socket.outbound.take()
                }
                _ => return,
            }
        };

        debug!(url = %self.shared.url, "Closing WebSocket");
        self.shared.status_events.publish(ConnectionStatusEvent::Closing);
        // the socket task sends the close frame and reports `Closed`
        drop(outbound);
    }

    fn messages(&self) -> mpsc::UnboundedReceiver<String> {
        self.shared.messages.subscribe()
    }

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent> {
        self.shared.status_events.subscribe()
    }
}

async fn run_socket(
    shared: Arc<Shared>,
    generation: u64,
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
) {
    let (mut write, mut read) = stream.split();

    let failure = loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        break Some(format!("Failed to send message: {}", e));
                    }
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break None;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    debug!(frame = %truncate_for_log(&text, 512), "Received frame");
                    shared.messages.publish(text);
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => shared.messages.publish(text),
                    Err(_) => warn!("Dropping binary frame that is not valid UTF-8"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break Some(frame.map_or_else(
                        || "Connection closed by server".to_string(),
                        |f| format!("Connection closed by server: {} {}", u16::from(f.code), f.reason),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(format!("WebSocket error: {}", e)),
                None => break Some("Connection lost".to_string()),
            }
        }
    };

    shared.finish(generation, failure);
}

impl Shared {
    fn finish(&self, generation: u64, failure: Option<String>) {
        let closed_by_client = {
            let mut socket = lock(&self.socket);
            if socket.generation != generation {
                return;
            }
            socket.outbound = None;
            let by_client = failure.is_none() || socket.state == SocketState::Closing;
            socket.state = SocketState::Closed;
            by_client
        };

        match failure {
            Some(reason) if !closed_by_client => {
                warn!(url = %self.url, %reason, "WebSocket connection dropped");
                self.status_events
                    .publish(ConnectionStatusEvent::error(reason));
            }
            _ => {
                info!(url = %self.url, "WebSocket closed");
                self.status_events.publish(ConnectionStatusEvent::Closed);
                self.messages.close();
            }
        }
    }
}
