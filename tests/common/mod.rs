#![allow(dead_code)]

use async_trait::async_trait;
use omniston_sdk::core::errors::{RpcError, TransportError};
use omniston_sdk::core::kernel::{Transport, TransportFactory};
use omniston_sdk::core::stream::{EventBus, EventStream};
use omniston_sdk::omniston::{RpcClient, SubscriptionId};
use omniston_sdk::{ConnectionStatus, ConnectionStatusEvent};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

/// Let spawned tasks run until they block again.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// In-memory transport driven by the test.
#[derive(Default)]
pub struct MockTransport {
    messages: EventBus<String>,
    status_events: EventBus<ConnectionStatusEvent>,
    sent: Mutex<Vec<String>>,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_connect: AtomicBool,
    send_error: Mutex<Option<TransportError>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail_connect.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    pub fn fail_sends_with(&self, error: TransportError) {
        *self.send_error.lock().unwrap() = Some(error);
    }

    pub fn push_message(&self, frame: impl Into<String>) {
        self.messages.publish(frame.into());
    }

    pub fn push_json(&self, value: Value) {
        self.push_message(value.to_string());
    }

    pub fn emit(&self, event: ConnectionStatusEvent) {
        self.status_events.publish(event);
    }

    pub fn end_messages(&self) {
        self.messages.close();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionStatusEvent::Connecting);
        if self.fail_connect.load(Ordering::SeqCst) {
            self.emit(ConnectionStatusEvent::error("Connection refused"));
            return Err(TransportError::Connect("Connection refused".to_string()));
        }
        self.emit(ConnectionStatusEvent::Connected);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<(), TransportError> {
        if let Some(error) = self.send_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionStatusEvent::Closing);
        self.emit(ConnectionStatusEvent::Closed);
    }

    fn messages(&self) -> mpsc::UnboundedReceiver<String> {
        self.messages.subscribe()
    }

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent> {
        self.status_events.subscribe()
    }
}

/// Factory that records every transport it builds.
#[derive(Default)]
pub struct MockTransportFactory {
    created: Mutex<Vec<Arc<MockTransport>>>,
    fail_connect: AtomicBool,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let factory = Self::default();
        factory.fail_connect.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_connect.store(failing, Ordering::SeqCst);
    }

    pub fn as_factory(self: &Arc<Self>) -> TransportFactory {
        let this = self.clone();
        Arc::new(move || {
            let transport = if this.fail_connect.load(Ordering::SeqCst) {
                MockTransport::failing()
            } else {
                MockTransport::new()
            };
            this.created.lock().unwrap().push(transport.clone());
            transport as Arc<dyn Transport>
        })
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().unwrap().clone()
    }

    pub fn latest(&self) -> Arc<MockTransport> {
        self.created().last().cloned().expect("no transport created")
    }

    pub fn total_connect_calls(&self) -> usize {
        self.created().iter().map(|t| t.connect_calls()).sum()
    }
}

enum Scripted {
    Reply(Result<Value, String>),
    Deferred(watch::Receiver<Option<Value>>),
}

/// RPC client double for facade tests.
#[derive(Default)]
pub struct FakeRpcClient {
    calls: Mutex<Vec<(String, Value)>>,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    streams: Mutex<HashMap<(String, SubscriptionId), mpsc::UnboundedSender<Result<Value, RpcError>>>>,
    read_streams: Mutex<Vec<(String, SubscriptionId)>>,
    close_calls: AtomicUsize,
    status_events: EventBus<ConnectionStatusEvent>,
}

impl FakeRpcClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, method: &str, value: Value) {
        self.push_script(method, Scripted::Reply(Ok(value)));
    }

    pub fn fail(&self, method: &str, message: &str) {
        self.push_script(method, Scripted::Reply(Err(message.to_string())));
    }

    /// Hold the next call to `method` until the returned sender publishes a value.
    pub fn respond_later(&self, method: &str) -> watch::Sender<Option<Value>> {
        let (tx, rx) = watch::channel(None);
        self.push_script(method, Scripted::Deferred(rx));
        tx
    }

    fn push_script(&self, method: &str, script: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params)
            .collect()
    }

    pub fn read_streams(&self) -> Vec<(String, SubscriptionId)> {
        self.read_streams.lock().unwrap().clone()
    }

    pub fn has_stream(&self, method: &str, id: SubscriptionId) -> bool {
        self.streams
            .lock()
            .unwrap()
            .contains_key(&(method.to_string(), id))
    }

    pub fn push_event(&self, method: &str, id: SubscriptionId, value: Value) {
        if let Some(sink) = self.streams.lock().unwrap().get(&(method.to_string(), id)) {
            let _ = sink.send(Ok(value));
        }
    }

    pub fn push_error(&self, method: &str, id: SubscriptionId, error: RpcError) {
        if let Some(sink) = self.streams.lock().unwrap().get(&(method.to_string(), id)) {
            let _ = sink.send(Err(error));
        }
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn emit_status(&self, event: ConnectionStatusEvent) {
        self.status_events.publish(event);
    }
}

#[async_trait]
impl RpcClient for FakeRpcClient {
    async fn ensure_connection(&self) -> Result<(), RpcError> {
        Ok(())
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);

        match script {
            Some(Scripted::Reply(Ok(value))) => Ok(value),
            Some(Scripted::Reply(Err(message))) => Err(RpcError::Server {
                code: 1,
                message,
                data: None,
            }),
            Some(Scripted::Deferred(mut rx)) => {
                let value = rx
                    .wait_for(Option::is_some)
                    .await
                    .map_err(|_| RpcError::ConnectionClosed)?
                    .clone();
                Ok(value.unwrap_or(Value::Null))
            }
            None => Ok(Value::Bool(true)),
        }
    }

    async fn subscribe(
        &self,
        method: &str,
        params: Value,
        event_method: &str,
    ) -> Result<(SubscriptionId, EventStream<Value, RpcError>), RpcError> {
        let result = self.send(method, params).await?;
        let subscription_id = result
            .as_u64()
            .ok_or_else(|| RpcError::UnexpectedResponse(result.to_string()))?;
        Ok((subscription_id, self.read_stream(event_method, subscription_id)))
    }

    fn read_stream(&self, method: &str, subscription_id: SubscriptionId) -> EventStream<Value, RpcError> {
        let key = (method.to_string(), subscription_id);
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(key.clone(), tx);
        self.read_streams.lock().unwrap().push(key);
        EventStream::from_receiver(rx)
    }

    async fn unsubscribe_from_stream(
        &self,
        method: &str,
        subscription_id: SubscriptionId,
    ) -> Result<Value, RpcError> {
        self.streams
            .lock()
            .unwrap()
            .remove(&(method.replace("_unsubscribe", ""), subscription_id));
        self.send(method, json!([subscription_id])).await
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }

    fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent> {
        self.status_events.subscribe()
    }
}

pub fn address(value: &str) -> Value {
    json!({"blockchain": 607, "address": value})
}

pub fn quote_json(quote_id: &str, trade_start_deadline: u64) -> Value {
    json!({
        "quote_id": quote_id,
        "resolver_id": "testResolverId",
        "resolver_name": "testResolverName",
        "bid_asset_address": address("kQDLvsZol3juZyOAVG8tWsJntOxeEZWEaWCbbSjYakQpuYN5"),
        "ask_asset_address": address("kQB_TOJSB7q3-Jm1O8s0jKFtqLElZDPjATs5uJGsujcjznq3"),
        "bid_units": "1000",
        "ask_units": "1000",
        "referrer_address": address("EQCXSs2xZ2dhk9TAxzGzXra2EbG_S2SqyN8Tfi6fJ82EYiVj"),
        "referrer_fee_units": "0",
        "protocol_fee_units": "0",
        "quote_timestamp": 0,
        "trade_start_deadline": trade_start_deadline,
        "params": {}
    })
}
