use std::fmt;

/// RPC methods exposed by the Omniston service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Quote,
    QuoteUnsubscribe,
    BuildTransfer,
    BuildWithdrawal,
    TrackTrade,
    TrackTradeUnsubscribe,
    AssetQuery,
    EscrowList,
}

impl RpcMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quote => "v1beta7.quote",
            Self::QuoteUnsubscribe => "v1beta7.quote_event_unsubscribe",
            Self::BuildTransfer => "v1beta7.transaction.build_transfer",
            Self::BuildWithdrawal => "v1beta7.transaction.build_withdrawal",
            Self::TrackTrade => "v1beta7.trade.track",
            Self::TrackTradeUnsubscribe => "v1beta7.trade.track_event_unsubscribe",
            Self::AssetQuery => "v1beta7.asset.query",
            Self::EscrowList => "v1beta7.escrow.list",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification method of a server-pushed stream.
///
/// Unknown names are kept verbatim so any stream can be routed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventMethod {
    QuoteEvent,
    TrackTradeEvent,
    Other(String),
}

impl EventMethod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::QuoteEvent => "v1beta7.quote_event",
            Self::TrackTradeEvent => "v1beta7.trade.track_event",
            Self::Other(name) => name,
        }
    }

    /// Method that cancels a subscription to this stream.
    pub fn unsubscribe_method(&self) -> String {
        format!("{}_unsubscribe", self.as_str())
    }
}

impl From<&str> for EventMethod {
    fn from(name: &str) -> Self {
        match name {
            "v1beta7.quote_event" => Self::QuoteEvent,
            "v1beta7.trade.track_event" => Self::TrackTradeEvent,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
