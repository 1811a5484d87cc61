use crate::model::ChannelId;

/// Failure taxonomy of the decision core.
///
/// Everything here is value-returned; the CLI boundary wraps with anyhow
/// context. `PolicyClamped` is deliberately absent: a truncated fee
/// adjustment is information, not an error (see `FeeAdjustment::clamped`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The daemon snapshot could not be obtained. Not retried here; the
    /// REST client owns transport-level retry for idempotent reads.
    #[error("node data unavailable: {context}")]
    DataUnavailable { context: String },

    #[error("invalid channel pair {from_chan} -> {target}: {reason}")]
    InvalidChannelPair {
        from_chan: ChannelId,
        target: ChannelId,
        reason: String,
    },

    #[error("invalid amount {amount_sat} sat: {reason}")]
    InvalidAmount { amount_sat: u64, reason: String },

    #[error("no route found for {amount_sat} sat: {detail}")]
    NoRouteFound { amount_sat: u64, detail: String },

    /// The requested amount exceeds what source can send or target can
    /// receive.
    #[error("insufficient liquidity on {side} side: requested {amount_sat} sat, available {available_sat} sat")]
    InsufficientLiquidity {
        amount_sat: u64,
        available_sat: u64,
        side: &'static str,
    },

    /// A payment submission timed out. The payment may still settle
    /// out-of-band, so this is inconclusive, not a confirmed failure.
    #[error("payment timed out after {attempts} attempts ({amount_moved_sat} sat moved so far)")]
    PaymentTimeout {
        amount_moved_sat: u64,
        attempts: u32,
    },

    #[error("rebalancing trials exhausted after {attempts} attempts ({amount_moved_sat} sat moved)")]
    TrialsExhausted {
        amount_moved_sat: u64,
        attempts: u32,
    },

    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
