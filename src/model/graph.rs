use std::collections::HashMap;

use crate::api;
use crate::model::ChannelId;

/// Directional fee policy advertised by one endpoint of a public channel.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgePolicy {
    pub base_fee_msat: u64,
    pub fee_rate_ppm: u64,
    pub time_lock_delta: u32,
    pub disabled: bool,
}

impl EdgePolicy {
    /// Fee charged by the forwarding node for pushing `amt_msat` through
    /// this direction.
    pub fn fee_msat(&self, amt_msat: u64) -> u64 {
        self.base_fee_msat + amt_msat * self.fee_rate_ppm / 1_000_000
    }
}

/// A public channel edge with both directional policies.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub channel_id: ChannelId,
    pub node1: String,
    pub node2: String,
    pub capacity_sat: u64,
    pub node1_policy: Option<EdgePolicy>,
    pub node2_policy: Option<EdgePolicy>,
}

impl GraphEdge {
    /// The policy that prices a forward sent by `node` over this channel.
    pub fn policy_from(&self, node: &str) -> Option<&EdgePolicy> {
        if node == self.node1 {
            self.node1_policy.as_ref()
        } else if node == self.node2 {
            self.node2_policy.as_ref()
        } else {
            None
        }
    }

    pub fn other_end(&self, node: &str) -> Option<&str> {
        if node == self.node1 {
            Some(&self.node2)
        } else if node == self.node2 {
            Some(&self.node1)
        } else {
            None
        }
    }
}

/// Read-only snapshot of the public routing graph, refreshed once per
/// logical operation (building it dominates RPC cost).
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub own_pubkey: String,
    edges: HashMap<ChannelId, GraphEdge>,
    adjacency: HashMap<String, Vec<ChannelId>>,
}

impl GraphSnapshot {
    pub fn new(own_pubkey: String, edge_list: Vec<GraphEdge>) -> Self {
        let mut edges = HashMap::with_capacity(edge_list.len());
        let mut adjacency: HashMap<String, Vec<ChannelId>> = HashMap::new();
        for edge in edge_list {
            adjacency
                .entry(edge.node1.clone())
                .or_default()
                .push(edge.channel_id);
            adjacency
                .entry(edge.node2.clone())
                .or_default()
                .push(edge.channel_id);
            edges.insert(edge.channel_id, edge);
        }
        Self {
            own_pubkey,
            edges,
            adjacency,
        }
    }

    pub fn from_api(own_pubkey: String, resp: &api::DescribeGraphResponse) -> Self {
        let to_policy = |p: &Option<api::RoutingPolicy>| {
            p.as_ref().map(|p| EdgePolicy {
                base_fee_msat: p.fee_base_msat,
                fee_rate_ppm: p.fee_rate_milli_msat,
                time_lock_delta: p.time_lock_delta,
                disabled: p.disabled,
            })
        };
        let edge_list = resp
            .edges
            .iter()
            .map(|e| GraphEdge {
                channel_id: ChannelId(e.channel_id),
                node1: e.node1_pub.clone(),
                node2: e.node2_pub.clone(),
                capacity_sat: e.capacity,
                node1_policy: to_policy(&e.node1_policy),
                node2_policy: to_policy(&e.node2_policy),
            })
            .collect();
        Self::new(own_pubkey, edge_list)
    }

    pub fn edge(&self, id: ChannelId) -> Option<&GraphEdge> {
        self.edges.get(&id)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Edges adjacent to `node`, in insertion order (stable for a given
    /// snapshot, which keeps path discovery deterministic).
    pub fn edges_at<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.adjacency
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.edges.get(id))
    }
}
