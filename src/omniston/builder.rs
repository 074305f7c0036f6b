use std::sync::Arc;

use super::api_client::{ApiClient, ApiClientOptions, RpcClient};
use super::client::Omniston;
use crate::core::config::OmnistonConfig;
use crate::core::kernel::{
    ReconnectPolicy, ReconnectingTransport, Transport, TransportFactory, WebSocketTransport,
};
use crate::core::timer::{Timer, TokioTimer};

/// Builder for [`Omniston`] with pluggable client, transport and timer.
///
/// By default the SDK runs an [`ApiClient`] over a [`ReconnectingTransport`]
/// that opens a [`WebSocketTransport`] to `config.api_url` per attempt.
pub struct OmnistonBuilder {
    config: OmnistonConfig,
    client: Option<Arc<dyn RpcClient>>,
    transport_factory: Option<TransportFactory>,
    timer: Option<Arc<dyn Timer>>,
}

impl OmnistonBuilder {
    pub fn new(config: OmnistonConfig) -> Self {
        Self {
            config,
            client: None,
            transport_factory: None,
            timer: None,
        }
    }

    /// Use a ready-made RPC client; transport settings are then ignored.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn RpcClient>) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn build(self) -> Omniston {
        let timer = self.timer.unwrap_or_else(|| Arc::new(TokioTimer));

        let client = match self.client {
            Some(client) => client,
            None => {
                let factory = self
                    .transport_factory
                    .unwrap_or_else(|| websocket_factory(&self.config));
                let policy = ReconnectPolicy {
                    max_retries: self.config.max_reconnect_attempts,
                    reconnect_delay: self.config.reconnect_delay(),
                };
                let transport = ReconnectingTransport::new(factory, timer.clone(), policy);
                let options = ApiClientOptions {
                    request_timeout: self.config.request_timeout(),
                };
                Arc::new(ApiClient::with_options(Arc::new(transport), options))
            }
        };

        Omniston::from_parts(client, timer, self.config.expire_quotes_locally)
    }
}

fn websocket_factory(config: &OmnistonConfig) -> TransportFactory {
    let url = config.api_url.clone();
    let connect_timeout = config.connect_timeout();
    Arc::new(move || {
        Arc::new(WebSocketTransport::new(url.clone()).with_connect_timeout(connect_timeout))
            as Arc<dyn Transport>
    })
}
