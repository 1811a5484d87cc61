use std::collections::HashMap;

use log::debug;

use crate::client::LndClient;
use crate::error::Error;
use crate::model::{Channel, ChannelId, GraphSnapshot, LocalPolicy};

/// Shared snapshot of node state collected at the start of each operation.
///
/// Balances and policies are materialized fresh here and passed around as
/// explicit arguments; nothing mutates them in place. Re-collect to observe
/// the effect of a rebalance.
pub struct NodeState {
    pub own_pubkey: String,
    pub block_height: u32,
    pub channels: Vec<Channel>,
    pub graph: GraphSnapshot,
}

impl NodeState {
    /// Collect fresh node state. An unreachable daemon surfaces
    /// `DataUnavailable`; retry belongs to the transport layer.
    pub async fn collect(client: &(impl LndClient + Sync)) -> Result<Self, Error> {
        let info = client.get_info().await.map_err(|e| Error::DataUnavailable {
            context: format!("getinfo: {e:#}"),
        })?;
        let channels_resp = client
            .list_channels()
            .await
            .map_err(|e| Error::DataUnavailable {
                context: format!("listchannels: {e:#}"),
            })?;
        let fee_report = client.fee_report().await.map_err(|e| Error::DataUnavailable {
            context: format!("feereport: {e:#}"),
        })?;
        let graph_resp = client
            .describe_graph()
            .await
            .map_err(|e| Error::DataUnavailable {
                context: format!("describegraph: {e:#}"),
            })?;

        let policies: HashMap<u64, &crate::api::ChannelFeeReport> = fee_report
            .channel_fees
            .iter()
            .map(|f| (f.chan_id, f))
            .collect();

        let channels: Vec<Channel> = channels_resp
            .channels
            .iter()
            .map(|c| {
                let policy = policies.get(&c.chan_id);
                Channel {
                    id: ChannelId(c.chan_id),
                    remote_pubkey: c.remote_pubkey.clone(),
                    capacity_sat: c.capacity,
                    local_balance_sat: c.local_balance,
                    remote_balance_sat: c.remote_balance,
                    local_reserve_sat: c.local_chan_reserve_sat,
                    remote_reserve_sat: c.remote_chan_reserve_sat,
                    local_policy: LocalPolicy {
                        base_fee_msat: policy.map(|p| p.base_fee_msat).unwrap_or(0),
                        fee_rate: policy.map(|p| p.fee_rate).unwrap_or(0.0),
                        time_lock_delta: 40,
                    },
                    active: c.active,
                    private: c.private,
                    initiator: c.initiator,
                    channel_point: c.channel_point.clone(),
                }
            })
            .collect();

        let graph = GraphSnapshot::from_api(info.identity_pubkey.clone(), &graph_resp);

        debug!(
            "Collected state: {} channels, {} graph edges, height {}",
            channels.len(),
            graph.num_edges(),
            info.block_height,
        );

        Ok(Self {
            own_pubkey: info.identity_pubkey,
            block_height: info.block_height,
            channels,
            graph,
        })
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Active channels in listing order.
    pub fn active_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| c.active)
    }
}
