//! Wire types for the subset of LND's REST API we consume.
//!
//! LND encodes int64 fields as JSON strings; `string_as_u64` bridges that.

use serde::{Deserialize, Serialize, Serializer};

fn string_as_u64<'de, T, D>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    String::deserialize(de)?
        .parse()
        .map_err(serde::de::Error::custom)
}

fn u64_as_string<S>(x: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&x.to_string())
}

fn default_u64() -> u64 {
    0
}

// ---------------------------------------------------------------------------
// GetInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GetInfoResponse {
    pub identity_pubkey: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub block_height: u32,
    #[serde(default)]
    pub synced_to_graph: bool,
}

// ---------------------------------------------------------------------------
// ListChannels
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListChannelsResponse {
    #[serde(default)]
    pub channels: Vec<RpcChannel>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RpcChannel {
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub chan_id: u64,
    pub remote_pubkey: String,
    pub channel_point: String,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub capacity: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub local_balance: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub remote_balance: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub local_chan_reserve_sat: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub remote_chan_reserve_sat: u64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub initiator: bool,
}

// ---------------------------------------------------------------------------
// FeeReport (our advertised policies, one row per open channel)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct FeeReportResponse {
    #[serde(default)]
    pub channel_fees: Vec<ChannelFeeReport>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChannelFeeReport {
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub chan_id: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub base_fee_msat: u64,
    /// Fractional fee rate, e.g. 0.000150.
    #[serde(default)]
    pub fee_rate: f64,
}

// ---------------------------------------------------------------------------
// DescribeGraph
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DescribeGraphResponse {
    #[serde(default)]
    pub nodes: Vec<LightningNode>,
    #[serde(default)]
    pub edges: Vec<ChannelEdge>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct LightningNode {
    pub pub_key: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ChannelEdge {
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub channel_id: u64,
    pub node1_pub: String,
    pub node2_pub: String,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub capacity: u64,
    #[serde(default)]
    pub node1_policy: Option<RoutingPolicy>,
    #[serde(default)]
    pub node2_policy: Option<RoutingPolicy>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default)]
    pub time_lock_delta: u32,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub fee_base_msat: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub fee_rate_milli_msat: u64,
    #[serde(default)]
    pub disabled: bool,
}

// ---------------------------------------------------------------------------
// ForwardingHistory
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct ForwardingHistoryRequest {
    #[serde(serialize_with = "u64_as_string")]
    pub start_time: u64,
    #[serde(serialize_with = "u64_as_string")]
    pub end_time: u64,
    pub index_offset: u32,
    pub num_max_events: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ForwardingHistoryResponse {
    #[serde(default)]
    pub forwarding_events: Vec<RpcForwardingEvent>,
    #[serde(default)]
    pub last_offset_index: u32,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RpcForwardingEvent {
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub timestamp: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub chan_id_in: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub chan_id_out: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub amt_in_msat: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub amt_out_msat: u64,
    #[serde(deserialize_with = "string_as_u64", default = "default_u64")]
    pub fee_msat: u64,
}

// ---------------------------------------------------------------------------
// Invoices and route submission
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct AddInvoiceRequest {
    #[serde(serialize_with = "u64_as_string")]
    pub value_msat: u64,
    pub memo: String,
    #[serde(serialize_with = "u64_as_string")]
    pub expiry: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct AddInvoiceResponse {
    /// Payment hash, base64-encoded.
    pub r_hash: String,
    /// Payment secret, base64-encoded.
    #[serde(default)]
    pub payment_addr: String,
    #[serde(default)]
    pub payment_request: String,
}

/// One hop of a route as submitted to the router API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcHop {
    #[serde(
        serialize_with = "u64_as_string",
        deserialize_with = "string_as_u64",
        default = "default_u64"
    )]
    pub chan_id: u64,
    pub pub_key: String,
    #[serde(
        serialize_with = "u64_as_string",
        deserialize_with = "string_as_u64",
        default = "default_u64"
    )]
    pub amt_to_forward_msat: u64,
    #[serde(
        serialize_with = "u64_as_string",
        deserialize_with = "string_as_u64",
        default = "default_u64"
    )]
    pub fee_msat: u64,
    pub expiry: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct SendToRouteRequest {
    /// Payment hash, base64-encoded.
    pub payment_hash: String,
    pub route: RpcRoute,
}

#[derive(Clone, Debug, Serialize)]
pub struct RpcRoute {
    pub total_time_lock: u32,
    #[serde(serialize_with = "u64_as_string")]
    pub total_amt_msat: u64,
    #[serde(serialize_with = "u64_as_string")]
    pub total_fees_msat: u64,
    pub hops: Vec<RpcHop>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SendToRouteResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub failure: Option<RpcFailure>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RpcFailure {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub failure_source_index: u32,
}

/// Typed classification of a send failure, derived from the wire code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCode {
    TemporaryChannelFailure,
    ChannelDisabled,
    UnknownNextPeer,
    FeeInsufficient,
    IncorrectCltvExpiry,
    TemporaryNodeFailure,
    Other(String),
}

impl FailureCode {
    pub fn from_wire(code: &str) -> Self {
        match code {
            "TEMPORARY_CHANNEL_FAILURE" => FailureCode::TemporaryChannelFailure,
            "CHANNEL_DISABLED" => FailureCode::ChannelDisabled,
            "UNKNOWN_NEXT_PEER" => FailureCode::UnknownNextPeer,
            "FEE_INSUFFICIENT" => FailureCode::FeeInsufficient,
            "INCORRECT_CLTV_EXPIRY" => FailureCode::IncorrectCltvExpiry,
            "TEMPORARY_NODE_FAILURE" => FailureCode::TemporaryNodeFailure,
            other => FailureCode::Other(other.to_string()),
        }
    }

    /// Route-level failures are worth re-planning around; anything else
    /// fails the rebalance immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureCode::TemporaryChannelFailure
                | FailureCode::ChannelDisabled
                | FailureCode::UnknownNextPeer
                | FailureCode::FeeInsufficient
                | FailureCode::IncorrectCltvExpiry
                | FailureCode::TemporaryNodeFailure
        )
    }
}

// ---------------------------------------------------------------------------
// UpdateChanPolicy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize)]
pub struct UpdateChanPolicyRequest {
    pub chan_point: ChanPoint,
    #[serde(serialize_with = "u64_as_string")]
    pub base_fee_msat: u64,
    pub fee_rate: f64,
    pub time_lock_delta: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChanPoint {
    pub funding_txid_str: String,
    pub output_index: u32,
}

impl ChanPoint {
    /// Parses the `txid:index` form used by the channel list.
    pub fn parse(channel_point: &str) -> Option<Self> {
        let (txid, index) = channel_point.split_once(':')?;
        Some(ChanPoint {
            funding_txid_str: txid.to_string(),
            output_index: index.parse().ok()?,
        })
    }
}
