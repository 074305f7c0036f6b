use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OnceCell};
use tracing::{debug, instrument, warn};

use super::methods::EventMethod;
use crate::core::errors::{RpcError, TransportError};
use crate::core::kernel::codec::{self, truncate_for_log, JsonRpcErrorObject, JsonRpcMessage};
use crate::core::kernel::Transport;
use crate::core::lock;
use crate::core::stream::{EventBus, EventStream};
use crate::core::types::{ConnectionStatus, ConnectionStatusEvent};

/// Server-assigned id of a notification stream.
pub type SubscriptionId = u64;

/// JSON-RPC client seam used by the [`Omniston`](super::Omniston) facade.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Connect once; later calls reuse the first outcome.
    async fn ensure_connection(&self) -> Result<(), RpcError>;

    /// Call `method` and wait for its result.
    async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError>;

    /// Call a subscribing `method` and open the stream of `event_method`
    /// notifications for the subscription id it returns.
    ///
    /// Notifications that follow the response on the wire are never missed:
    /// the stream exists before the next frame is handled.
    async fn subscribe(
        &self,
        method: &str,
        params: Value,
        event_method: &str,
    ) -> Result<(SubscriptionId, EventStream<Value, RpcError>), RpcError>;

    /// Notifications of `method` for one subscription.
    fn read_stream(&self, method: &str, subscription_id: SubscriptionId)
        -> EventStream<Value, RpcError>;

    /// Ask the server to stop a subscription. Resolves to the server's answer,
    /// or `true` without any network traffic when not connected.
    async fn unsubscribe_from_stream(
        &self,
        method: &str,
        subscription_id: SubscriptionId,
    ) -> Result<Value, RpcError>;

    fn close(&self);

    fn connection_status(&self) -> ConnectionStatus;

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApiClientOptions {
    /// Reject calls that get no response in time. Off by default.
    pub request_timeout: Option<Duration>,
}

type StreamSink = mpsc::UnboundedSender<Result<Value, RpcError>>;

struct PendingCall {
    response: oneshot::Sender<Result<Value, RpcError>>,
    // registered for the subscription id carried by a successful response
    stream: Option<(EventMethod, StreamSink)>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    options: ApiClientOptions,
    connection: OnceCell<Result<(), TransportError>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingCall>>,
    streams: Mutex<HashMap<EventMethod, HashMap<SubscriptionId, StreamSink>>>,
    status: Mutex<ConnectionStatus>,
    status_events: EventBus<ConnectionStatusEvent>,
}

/// JSON-RPC 2.0 client over a [`Transport`].
///
/// Requests are correlated with responses by id, so any number of calls can
/// be in flight. Notifications are routed to the stream registered for their
/// `(method, subscription)` pair; unmatched ones are dropped.
///
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, ApiClientOptions::default())
    }

    pub fn with_options(transport: Arc<dyn Transport>, options: ApiClientOptions) -> Self {
        let mut messages = transport.messages();
        let mut status_events = transport.connection_status_events();

        let inner = Arc::new(ClientInner {
            transport,
            options,
            connection: OnceCell::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            status: Mutex::new(ConnectionStatus::Ready),
            status_events: EventBus::new(),
        });

        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(frame) = messages.recv().await {
                let Some(inner) = weak.upgrade() else { return };
                inner.handle_frame(&frame);
            }
            if let Some(inner) = weak.upgrade() {
                debug!("Transport message stream ended");
                inner.fail_all(|| RpcError::ConnectionClosed);
            }
        });

        let weak: Weak<ClientInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(event) = status_events.recv().await {
                let Some(inner) = weak.upgrade() else { return };
                inner.handle_status_event(event);
            }
        });

        Self { inner }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, params, stream), fields(method = %method))]
    async fn call(
        &self,
        method: &str,
        params: Value,
        stream: Option<(EventMethod, StreamSink)>,
    ) -> Result<Value, RpcError> {
        self.ensure_connection().await?;

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = codec::encode_request(id, method, &params)?;
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(
            id,
            PendingCall {
                response: tx,
                stream,
            },
        );

        debug!(id, "Sending request");
        if let Err(e) = self.inner.transport.send(frame).await {
            lock(&self.inner.pending).remove(&id);
            return Err(e.into());
        }

        self.await_response(id, method, rx).await
    }

    fn stream_handle(
        &self,
        method: EventMethod,
        subscription_id: SubscriptionId,
        sink: StreamSink,
        receiver: mpsc::UnboundedReceiver<Result<Value, RpcError>>,
    ) -> EventStream<Value, RpcError> {
        let weak = Arc::downgrade(&self.inner);
        EventStream::new(receiver, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_stream(&method, subscription_id, &sink);
            }
        })
    }

    async fn await_response(
        &self,
        id: u64,
        method: &str,
        response: oneshot::Receiver<Result<Value, RpcError>>,
    ) -> Result<Value, RpcError> {
        let received = match self.inner.options.request_timeout {
            Some(timeout) => {
                if let Ok(received) = tokio::time::timeout(timeout, response).await {
                    received
                } else {
                    lock(&self.inner.pending).remove(&id);
                    return Err(RpcError::Timeout {
                        method: method.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
            None => response.await,
        };
        received.map_err(|_| RpcError::ConnectionClosed)?
    }
}

impl ClientInner {
    fn handle_frame(&self, frame: &str) {
        let message = match codec::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, frame = %truncate_for_log(frame, 256), "Dropping malformed frame");
                return;
            }
        };

        match message {
            JsonRpcMessage::Response { id, outcome } => {
                let call = lock(&self.pending).remove(&id);
                match call {
                    Some(call) => {
                        let outcome = outcome.map_err(server_error);
                        if let (Some((method, sink)), Ok(result)) = (call.stream, &outcome) {
                            if let Some(subscription_id) = result.as_u64() {
                                self.install_stream(method, subscription_id, sink);
                            }
                        }
                        let _ = call.response.send(outcome);
                    }
                    None => debug!(id, "Response for unknown request"),
                }
            }
            JsonRpcMessage::Notification {
                method,
                subscription,
                outcome,
            } => {
                let key = EventMethod::from(method.as_str());
                let mut streams = lock(&self.streams);
                let Some(sinks) = streams.get_mut(&key) else {
                    debug!(%method, subscription, "No stream for notification");
                    return;
                };
                let delivered = match sinks.get(&subscription) {
                    Some(sink) => sink.send(outcome.map_err(server_error)).is_ok(),
                    None => {
                        debug!(%method, subscription, "No stream for notification");
                        return;
                    }
                };
                if !delivered {
                    // the stream handed out by `subscribe` was never read
                    sinks.remove(&subscription);
                    if sinks.is_empty() {
                        streams.remove(&key);
                    }
                }
            }
            JsonRpcMessage::Unknown => {
                debug!(frame = %truncate_for_log(frame, 256), "Ignoring unrecognised frame");
            }
        }
    }

    fn install_stream(&self, method: EventMethod, subscription_id: SubscriptionId, sink: StreamSink) {
        lock(&self.streams)
            .entry(method)
            .or_default()
            .insert(subscription_id, sink);
    }

    fn handle_status_event(&self, event: ConnectionStatusEvent) {
        *lock(&self.status) = event.status();
        let terminal = event.is_terminal_error();
        self.status_events.publish(event);
        if terminal {
            self.fail_all(|| RpcError::ConnectionClosed);
        }
    }

    fn fail_all(&self, error: impl Fn() -> RpcError) {
        let pending: Vec<_> = lock(&self.pending).drain().map(|(_, c)| c).collect();
        for call in pending {
            let _ = call.response.send(Err(error()));
        }

        let streams: Vec<_> = lock(&self.streams)
            .drain()
            .flat_map(|(_, sinks)| sinks.into_values())
            .collect();
        for sink in streams {
            let _ = sink.send(Err(error()));
        }
    }

    fn remove_stream(&self, method: &EventMethod, subscription_id: SubscriptionId, sink: &StreamSink) {
        let mut streams = lock(&self.streams);
        if let Some(sinks) = streams.get_mut(method) {
            if sinks
                .get(&subscription_id)
                .is_some_and(|s| s.same_channel(sink))
            {
                sinks.remove(&subscription_id);
            }
            if sinks.is_empty() {
                streams.remove(method);
            }
        }
    }
}

/// Turn a JSON-RPC error payload into an [`RpcError`].
fn server_error(error: Value) -> RpcError {
    match JsonRpcErrorObject::from_value(&error) {
        Some(object) => RpcError::Server {
            code: object.code,
            message: object.message,
            data: object.data,
        },
        None => RpcError::UnexpectedServerError(error.to_string()),
    }
}

#[async_trait]
impl RpcClient for ApiClient {
    async fn ensure_connection(&self) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::ClientClosed);
        }
        let transport = self.inner.transport.clone();
        self.inner
            .connection
            .get_or_init(|| async move { transport.connect().await })
            .await
            .clone()
            .map_err(RpcError::from)
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call(method, params, None).await
    }

    async fn subscribe(
        &self,
        method: &str,
        params: Value,
        event_method: &str,
    ) -> Result<(SubscriptionId, EventStream<Value, RpcError>), RpcError> {
        let key = EventMethod::from(event_method);
        let (tx, rx) = mpsc::unbounded_channel();
        let result = self
            .call(method, params, Some((key.clone(), tx.clone())))
            .await?;
        let subscription_id = result.as_u64().ok_or_else(|| {
            RpcError::UnexpectedResponse(format!(
                "expected subscription id from {}, got {}",
                method, result
            ))
        })?;
        debug!(%method, subscription_id, "Subscribed");
        Ok((subscription_id, self.stream_handle(key, subscription_id, tx, rx)))
    }

    fn read_stream(
        &self,
        method: &str,
        subscription_id: SubscriptionId,
    ) -> EventStream<Value, RpcError> {
        let key = EventMethod::from(method);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .install_stream(key.clone(), subscription_id, tx.clone());
        self.stream_handle(key, subscription_id, tx, rx)
    }

    #[instrument(skip(self), fields(method = %method))]
    async fn unsubscribe_from_stream(
        &self,
        method: &str,
        subscription_id: SubscriptionId,
    ) -> Result<Value, RpcError> {
        if self.is_closed() || self.connection_status() != ConnectionStatus::Connected {
            debug!(subscription_id, "Not connected, nothing to unsubscribe");
            return Ok(Value::Bool(true));
        }
        self.send(method, json!([subscription_id])).await
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Closing API client");
        self.inner.transport.close();
        self.inner.fail_all(|| RpcError::ClientClosed);
    }

    fn connection_status(&self) -> ConnectionStatus {
        *lock(&self.inner.status)
    }

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent> {
        self.inner.status_events.subscribe()
    }
}
