use std::fmt;
use std::str::FromStr;

/// Short channel id: block height, funding tx index and output index packed
/// into 64 bits (height in bits 40..64, tx index in 16..40, output in 0..16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl ChannelId {
    pub fn from_parts(block_height: u32, tx_index: u32, output_index: u16) -> Self {
        ChannelId(
            ((block_height as u64) << 40)
                | (((tx_index as u64) & 0xFF_FFFF) << 16)
                | output_index as u64,
        )
    }

    pub fn block_height(&self) -> u32 {
        (self.0 >> 40) as u32
    }

    pub fn tx_index(&self) -> u32 {
        ((self.0 >> 16) & 0xFF_FFFF) as u32
    }

    pub fn output_index(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(raw: u64) -> Self {
        ChannelId(raw)
    }
}

impl FromStr for ChannelId {
    type Err = String;

    /// Accepts the raw decimal form and the `HHHxTTTxO` human notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(raw) = s.parse::<u64>() {
            return Ok(ChannelId(raw));
        }
        let parts: Vec<&str> = s.split('x').collect();
        if parts.len() == 3 {
            let height = parts[0].parse::<u32>().map_err(|e| e.to_string())?;
            let tx = parts[1].parse::<u32>().map_err(|e| e.to_string())?;
            let out = parts[2].parse::<u16>().map_err(|e| e.to_string())?;
            return Ok(ChannelId::from_parts(height, tx, out));
        }
        Err(format!("not a channel id: {}", s))
    }
}

/// Our advertised policy on a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPolicy {
    pub base_fee_msat: u64,
    /// Fractional fee rate (ppm / 1e6), e.g. 0.000150 for 150 ppm.
    pub fee_rate: f64,
    pub time_lock_delta: u32,
}

/// Normalized view of one of our channels, materialized fresh per cycle.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub remote_pubkey: String,
    pub capacity_sat: u64,
    pub local_balance_sat: u64,
    pub remote_balance_sat: u64,
    pub local_reserve_sat: u64,
    pub remote_reserve_sat: u64,
    pub local_policy: LocalPolicy,
    pub active: bool,
    pub private: bool,
    pub initiator: bool,
    /// Funding outpoint `txid:index`, needed for policy updates.
    pub channel_point: String,
}

impl Channel {
    /// Balance skew in [-1, 1]: positive means the local side is depleted.
    pub fn unbalancedness(&self) -> f64 {
        if self.capacity_sat == 0 {
            return 0.0;
        }
        (self.remote_balance_sat as f64 - self.local_balance_sat as f64)
            / self.capacity_sat as f64
    }

    /// Maximum we can send out of this channel, respecting our reserve.
    pub fn max_can_send_sat(&self) -> u64 {
        self.local_balance_sat.saturating_sub(self.local_reserve_sat)
    }

    /// Maximum we can receive into this channel, respecting the remote
    /// reserve.
    pub fn max_can_receive_sat(&self) -> u64 {
        self.remote_balance_sat.saturating_sub(self.remote_reserve_sat)
    }
}
