use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::core::errors::OmnistonError;

/// Chain identifier, serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Blockchain {
    Ton,
    Tron,
    Other(u32),
}

impl Blockchain {
    pub const TON_CODE: u32 = 607;
    pub const TRON_CODE: u32 = 195;
}

impl From<u32> for Blockchain {
    fn from(code: u32) -> Self {
        match code {
            Self::TON_CODE => Self::Ton,
            Self::TRON_CODE => Self::Tron,
            other => Self::Other(other),
        }
    }
}

impl From<Blockchain> for u32 {
    fn from(chain: Blockchain) -> Self {
        match chain {
            Blockchain::Ton => Blockchain::TON_CODE,
            Blockchain::Tron => Blockchain::TRON_CODE,
            Blockchain::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub blockchain: Blockchain,
    pub address: String,
}

impl Address {
    pub fn ton(address: impl Into<String>) -> Self {
        Self {
            blockchain: Blockchain::Ton,
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementMethod {
    #[serde(rename = "SETTLEMENT_METHOD_SWAP")]
    Swap,
    #[serde(rename = "SETTLEMENT_METHOD_ESCROW")]
    Escrow,
    #[serde(rename = "SETTLEMENT_METHOD_HTLC")]
    Htlc,
    #[serde(other)]
    Unknown,
}

/// Fixed side of an RFQ, in the asset's smallest units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteAmount {
    BidUnits(String),
    AskUnits(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSettlementParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price_slippage_bps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_outgoing_messages: Option<u32>,
    #[serde(default)]
    pub flexible_referrer_fee: bool,
}

/// Request for quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub bid_asset_address: Address,
    pub ask_asset_address: Address,
    pub amount: QuoteAmount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_address: Option<Address>,
    #[serde(default)]
    pub referrer_fee_bps: u32,
    pub settlement_methods: Vec<SettlementMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_params: Option<RequestSettlementParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapChunk {
    pub protocol: String,
    pub bid_amount: String,
    pub ask_amount: String,
    pub extra_version: u32,
    pub extra: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapStep {
    pub bid_asset_address: Option<Address>,
    pub ask_asset_address: Option<Address>,
    pub chunks: Vec<SwapChunk>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapRoute {
    pub steps: Vec<SwapStep>,
    pub gas_budget: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapSettlementParams {
    pub routes: Vec<SwapRoute>,
    pub min_ask_amount: String,
    pub recommended_min_ask_amount: String,
    pub recommended_slippage_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowSettlementParams {
    pub contract_address: Address,
    pub resolver_address: Address,
    #[serde(default)]
    pub resolve_timeout: u64,
    #[serde(default)]
    pub gas_budget: String,
}

/// Settlement-specific part of a quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteParams {
    Swap(SwapSettlementParams),
    Escrow(EscrowSettlementParams),
}

// `{}` on the wire means "no params".
fn deserialize_params<'de, D>(deserializer: D) -> Result<Option<QuoteParams>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wire {
        #[serde(default)]
        swap: Option<SwapSettlementParams>,
        #[serde(default)]
        escrow: Option<EscrowSettlementParams>,
    }

    let wire = Option::<Wire>::deserialize(deserializer)?;
    Ok(wire.and_then(|w| match (w.swap, w.escrow) {
        (Some(swap), _) => Some(QuoteParams::Swap(swap)),
        (None, Some(escrow)) => Some(QuoteParams::Escrow(escrow)),
        (None, None) => None,
    }))
}

/// A resolver's offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub quote_id: String,
    pub resolver_id: String,
    #[serde(default)]
    pub resolver_name: String,
    pub bid_asset_address: Address,
    pub ask_asset_address: Address,
    pub bid_units: String,
    pub ask_units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer_address: Option<Address>,
    #[serde(default)]
    pub referrer_fee_units: String,
    #[serde(default)]
    pub protocol_fee_units: String,
    #[serde(default)]
    pub quote_timestamp: u64,
    /// Epoch seconds after which the trade can no longer start; 0 when unset
    #[serde(default)]
    pub trade_start_deadline: u64,
    #[serde(default)]
    pub gas_budget: String,
    #[serde(default)]
    pub estimated_gas_consumption: String,
    #[serde(
        default,
        deserialize_with = "deserialize_params",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<QuoteParams>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteAck {
    pub rfq_id: String,
}

/// Raw event of the quote stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteEvent {
    pub event: QuoteEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteEventKind {
    Ack(QuoteAck),
    QuoteUpdated(Quote),
    NoQuote(Empty),
    Unsubscribed(Empty),
    KeepAlive(Empty),
}

impl QuoteEventKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ack(_) => "ack",
            Self::QuoteUpdated(_) => "quote_updated",
            Self::NoQuote(_) => "no_quote",
            Self::Unsubscribed(_) => "unsubscribed",
            Self::KeepAlive(_) => "keep_alive",
        }
    }
}

/// Event delivered to the application by `request_for_quote`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuoteResponseEvent {
    Ack { rfq_id: String },
    QuoteUpdated { quote: Quote, rfq_id: String },
    NoQuote { rfq_id: String },
    Unsubscribed { rfq_id: String },
}

impl QuoteResponseEvent {
    pub fn rfq_id(&self) -> &str {
        match self {
            Self::Ack { rfq_id }
            | Self::QuoteUpdated { rfq_id, .. }
            | Self::NoQuote { rfq_id }
            | Self::Unsubscribed { rfq_id } => rfq_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTradeRequest {
    pub quote_id: String,
    pub trader_wallet_address: Address,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub outgoing_tx_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResult {
    #[serde(rename = "TRADE_RESULT_FULLY_FILLED")]
    FullyFilled,
    #[serde(rename = "TRADE_RESULT_PARTIALLY_FILLED")]
    PartiallyFilled,
    #[serde(rename = "TRADE_RESULT_ABORTED")]
    Aborted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSettled {
    pub result: TradeResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatusKind {
    KeepAlive(Empty),
    AwaitingTransfer(Empty),
    Transferring(Empty),
    Swapping(Empty),
    AwaitingFill(Empty),
    FillingTrade(Empty),
    ClaimAvailable(Empty),
    ReceivingFunds(Empty),
    RefundAvailable(Empty),
    TradeSettled(TradeSettled),
    Unsubscribed(Empty),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStatus {
    #[serde(default)]
    pub status: Option<TradeStatusKind>,
    #[serde(default)]
    pub transfer_timestamp: u64,
    #[serde(default)]
    pub estimated_finish_timestamp: u64,
}

impl TradeStatus {
    pub fn is_keep_alive(&self) -> bool {
        matches!(self.status, Some(TradeStatusKind::KeepAlive(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTransferRequest {
    pub source_address: Address,
    pub destination_address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_excess_address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_address: Option<Address>,
    pub quote: Quote,
    #[serde(default)]
    pub use_recommended_slippage: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildWithdrawalRequest {
    pub source_address: Address,
    pub quote_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_excess_address: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonMessage {
    pub target_address: String,
    pub send_amount: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub jetton_wallet_state_init: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TonTransaction {
    #[serde(default)]
    pub messages: Vec<TonMessage>,
}

/// Transaction built by the server, ready for wallet signing.
///
/// The server sends BoC payloads hex-encoded; [`TransactionResponse::from_wire`]
/// re-encodes them as base64, which is what TON wallets accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ton: Option<TonTransaction>,
}

impl TransactionResponse {
    pub fn from_wire(value: Value) -> Result<Self, OmnistonError> {
        let mut response: Self = serde_json::from_value(value)?;
        if let Some(ton) = response.ton.as_mut() {
            for message in &mut ton.messages {
                message.payload = hex_to_base64(&message.payload)?;
                message.jetton_wallet_state_init =
                    hex_to_base64(&message.jetton_wallet_state_init)?;
            }
        }
        Ok(response)
    }
}

pub fn hex_to_base64(hex_data: &str) -> Result<String, hex::FromHexError> {
    Ok(BASE64.encode(hex::decode(hex_data)?))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    pub decimals: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetsResponse {
    #[serde(default)]
    pub assets: Vec<AssetInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowOrderListRequest {
    pub trader_wallet_address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowOrderData {
    pub quote_id: String,
    pub escrow_item_address: Address,
    #[serde(default)]
    pub outgoing_tx_hash: String,
    pub quote: Quote,
    #[serde(default)]
    pub deposit_deadline: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowOrderListResponse {
    #[serde(default)]
    pub orders: Vec<EscrowOrderData>,
}
