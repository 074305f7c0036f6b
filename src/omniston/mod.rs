pub mod api_client;
pub mod builder;
pub mod client;
pub mod methods;
pub mod quote_controller;
pub mod types;

pub use api_client::{ApiClient, ApiClientOptions, RpcClient, SubscriptionId};
pub use builder::OmnistonBuilder;
pub use client::Omniston;
pub use methods::{EventMethod, RpcMethod};
pub use quote_controller::QuoteResponseController;
