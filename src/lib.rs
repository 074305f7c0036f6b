pub mod core;
pub mod omniston;

pub use core::{
    config::OmnistonConfig,
    errors::{ErrorCode, OmnistonError, OmnistonErrorDetails},
    stream::EventStream,
    types::{ConnectionStatus, ConnectionStatusEvent},
};
pub use omniston::types::*;
pub use omniston::{Omniston, OmnistonBuilder};
