use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use super::api_client::{RpcClient, SubscriptionId};
use super::builder::OmnistonBuilder;
use super::methods::{EventMethod, RpcMethod};
use super::quote_controller::QuoteResponseController;
use super::types::{
    AssetsResponse, BuildTransferRequest, BuildWithdrawalRequest, EscrowOrderListRequest,
    EscrowOrderListResponse, QuoteEvent, QuoteRequest, QuoteResponseEvent, TrackTradeRequest,
    TradeStatus, TransactionResponse,
};
use crate::core::config::OmnistonConfig;
use crate::core::errors::{OmnistonError, RpcError};
use crate::core::stream::EventStream;
use crate::core::timer::Timer;
use crate::core::types::{ConnectionStatus, ConnectionStatusEvent};

type EventSink<T> = mpsc::UnboundedSender<Result<T, OmnistonError>>;

/// Entry point of the SDK.
///
/// Every error leaving this type is an [`OmnistonError`]. Streaming calls
/// return immediately; the subscription is set up in the background and
/// dropping the returned [`EventStream`] cancels it on the server, unless the
/// server already ended it.
///
/// Must be used inside a Tokio runtime.
pub struct Omniston {
    client: Arc<dyn RpcClient>,
    timer: Arc<dyn Timer>,
    expire_quotes_locally: bool,
}

impl Omniston {
    /// Connect to `config.api_url` with the default WebSocket stack.
    pub fn new(config: OmnistonConfig) -> Self {
        OmnistonBuilder::new(config).build()
    }

    pub fn builder(config: OmnistonConfig) -> OmnistonBuilder {
        OmnistonBuilder::new(config)
    }

    pub(crate) fn from_parts(
        client: Arc<dyn RpcClient>,
        timer: Arc<dyn Timer>,
        expire_quotes_locally: bool,
    ) -> Self {
        Self {
            client,
            timer,
            expire_quotes_locally,
        }
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.client.connection_status()
    }

    pub fn connection_status_events(&self) -> mpsc::UnboundedReceiver<ConnectionStatusEvent> {
        self.client.connection_status_events()
    }

    /// Request quotes for a trade.
    ///
    /// The stream starts with `Ack`, then carries `QuoteUpdated`/`NoQuote` as
    /// resolvers change their offers. It ends after `Unsubscribed` or on the
    /// first error.
    #[instrument(skip_all)]
    pub fn request_for_quote(&self, request: &QuoteRequest) -> EventStream<QuoteResponseEvent> {
        let (tx, stream) = EventStream::channel();
        match serde_json::to_value(request) {
            Ok(params) => {
                let controller = QuoteResponseController::new(self.timer.clone())
                    .with_local_expiry(self.expire_quotes_locally);
                tokio::spawn(drive_quote_stream(
                    self.client.clone(),
                    params,
                    controller,
                    tx,
                ));
            }
            Err(e) => {
                let _ = tx.send(Err(e.into()));
            }
        }
        stream
    }

    /// Follow the settlement of a trade. Keep-alive statuses are filtered out.
    #[instrument(skip_all, fields(quote_id = %request.quote_id))]
    pub fn track_trade(&self, request: &TrackTradeRequest) -> EventStream<TradeStatus> {
        let (tx, stream) = EventStream::channel();
        match serde_json::to_value(request) {
            Ok(params) => {
                tokio::spawn(drive_trade_stream(self.client.clone(), params, tx));
            }
            Err(e) => {
                let _ = tx.send(Err(e.into()));
            }
        }
        stream
    }

    /// Build the transaction that executes a quote.
    ///
    /// Message payloads come back base64-encoded.
    #[instrument(skip_all, fields(quote_id = %request.quote.quote_id))]
    pub async fn build_transfer(
        &self,
        request: &BuildTransferRequest,
    ) -> Result<TransactionResponse, OmnistonError> {
        let response = self.call(RpcMethod::BuildTransfer, request).await?;
        TransactionResponse::from_wire(response)
    }

    /// Build the transaction that withdraws funds from an escrow.
    #[instrument(skip_all, fields(quote_id = %request.quote_id))]
    pub async fn build_withdrawal(
        &self,
        request: &BuildWithdrawalRequest,
    ) -> Result<TransactionResponse, OmnistonError> {
        let response = self.call(RpcMethod::BuildWithdrawal, request).await?;
        TransactionResponse::from_wire(response)
    }

    pub async fn asset_list(&self) -> Result<AssetsResponse, OmnistonError> {
        self.call_typed(RpcMethod::AssetQuery, &json!({})).await
    }

    pub async fn escrow_list(
        &self,
        request: &EscrowOrderListRequest,
    ) -> Result<EscrowOrderListResponse, OmnistonError> {
        self.call_typed(RpcMethod::EscrowList, request).await
    }

    /// Close the connection. Pending calls and open streams fail.
    pub fn close(&self) {
        self.client.close();
    }

    async fn call<R: Serialize + Sync>(
        &self,
        method: RpcMethod,
        request: &R,
    ) -> Result<Value, OmnistonError> {
        self.client.ensure_connection().await?;
        let params = serde_json::to_value(request)?;
        Ok(self.client.send(method.as_str(), params).await?)
    }

    async fn call_typed<R, T>(&self, method: RpcMethod, request: &R) -> Result<T, OmnistonError>
    where
        R: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.call(method, request).await?;
        Ok(serde_json::from_value(response)?)
    }
}

impl std::fmt::Debug for Omniston {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Omniston")
            .field("connection_status", &self.connection_status())
            .field("expire_quotes_locally", &self.expire_quotes_locally)
            .finish_non_exhaustive()
    }
}

async fn subscribe(
    client: &dyn RpcClient,
    method: RpcMethod,
    event: &EventMethod,
    params: Value,
) -> Result<(SubscriptionId, EventStream<Value, RpcError>), OmnistonError> {
    client.ensure_connection().await?;
    Ok(client
        .subscribe(method.as_str(), params, event.as_str())
        .await?)
}

async fn unsubscribe(client: &dyn RpcClient, event: &EventMethod, subscription_id: SubscriptionId) {
    let method = event.unsubscribe_method();
    match client.unsubscribe_from_stream(&method, subscription_id).await {
        Ok(Value::Bool(true)) => debug!(%method, subscription_id, "Unsubscribed"),
        Ok(other) => warn!(
            "Failed to unsubscribe with method {} and subscription ID {}. Server returned {}",
            method, subscription_id, other
        ),
        Err(e) => warn!(
            "Failed to unsubscribe with method {} and subscription ID {}: {}",
            method, subscription_id, e
        ),
    }
}

async fn next_expiration(expirations: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match expirations {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn drive_quote_stream(
    client: Arc<dyn RpcClient>,
    params: Value,
    mut controller: QuoteResponseController,
    tx: EventSink<QuoteResponseEvent>,
) {
    let event_method = EventMethod::QuoteEvent;
    let (subscription_id, mut events) =
        match subscribe(client.as_ref(), RpcMethod::Quote, &event_method, params).await {
            Ok(opened) => opened,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
    debug!(subscription_id, "Quote subscription opened");
    let mut expirations = controller.take_expirations();

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            Some(quote_id) = next_expiration(&mut expirations) => {
                if let Some(event) = controller.handle_expiry(&quote_id) {
                    if tx.send(Ok(event)).is_err() {
                        break;
                    }
                }
            }
            item = events.next() => {
                let raw = match item {
                    Some(Ok(raw)) => raw,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e.into()));
                        break;
                    }
                    None => {
                        let _ = tx.send(Err(RpcError::ConnectionClosed.into()));
                        break;
                    }
                };

                let outcome = serde_json::from_value::<QuoteEvent>(raw)
                    .map_err(OmnistonError::from)
                    .and_then(|event| controller.handle_event(event).map_err(OmnistonError::from));
                match outcome {
                    Ok(Some(event)) => {
                        let finished = matches!(event, QuoteResponseEvent::Unsubscribed { .. });
                        if tx.send(Ok(event)).is_err() || finished {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        }
    }

    drop(events);
    let server_unsubscribed = controller.is_server_unsubscribed();
    drop(controller);
    if !server_unsubscribed {
        unsubscribe(client.as_ref(), &event_method, subscription_id).await;
    }
}

async fn drive_trade_stream(client: Arc<dyn RpcClient>, params: Value, tx: EventSink<TradeStatus>) {
    let event_method = EventMethod::TrackTradeEvent;
    let (subscription_id, mut events) =
        match subscribe(client.as_ref(), RpcMethod::TrackTrade, &event_method, params).await {
            Ok(opened) => opened,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
    debug!(subscription_id, "Trade tracking opened");

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            item = events.next() => {
                let status = match item {
                    Some(Ok(raw)) => serde_json::from_value::<TradeStatus>(raw).map_err(OmnistonError::from),
                    Some(Err(e)) => Err(e.into()),
                    None => Err(RpcError::ConnectionClosed.into()),
                };
                match status {
                    Ok(status) if status.is_keep_alive() => {}
                    Ok(status) => {
                        if tx.send(Ok(status)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        }
    }

    drop(events);
    unsubscribe(client.as_ref(), &event_method, subscription_id).await;
}
