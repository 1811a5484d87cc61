//! Fee-weighted route search for circular rebalancing.
//!
//! A route leaves through the source channel, crosses public intermediary
//! edges and re-enters through the target channel. The search excludes our
//! own node as an intermediary, so the degenerate one-hop source/target
//! loop cannot be produced.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::api::{RpcHop, RpcRoute};
use crate::error::Error;
use crate::model::{ChannelId, GraphSnapshot};

/// Fee and search bounds for one planning call. Both fee ceilings must
/// hold; the more restrictive wins.
#[derive(Debug, Clone)]
pub struct RouteLimits {
    pub max_fee_msat: u64,
    pub max_fee_rate: f64,
    /// Total hop ceiling, own channels included.
    pub max_hops: usize,
}

impl RouteLimits {
    pub fn fee_ceiling_msat(&self, amt_msat: u64) -> u64 {
        let rate_ceiling = (self.max_fee_rate * amt_msat as f64) as u64;
        self.max_fee_msat.min(rate_ceiling)
    }
}

/// One traversed channel with its exact fee contribution.
#[derive(Debug, Clone)]
pub struct Hop {
    pub channel_id: ChannelId,
    pub from_pubkey: String,
    pub to_pubkey: String,
    /// Amount entering this channel.
    pub amt_to_forward_msat: u64,
    /// Fee charged by `from_pubkey`; zero for our own first hop.
    pub fee_msat: u64,
    pub time_lock_delta: u32,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub hops: Vec<Hop>,
    /// Delivered amount.
    pub amt_msat: u64,
    /// Amount leaving the source channel: delivered + fees.
    pub total_amt_msat: u64,
    pub total_fee_msat: u64,
    pub total_time_lock_delta: u32,
}

impl Route {
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.hops.iter().map(|h| h.channel_id).collect()
    }

    /// Effective fee rate paid on the delivered amount.
    pub fn fee_rate(&self) -> f64 {
        if self.amt_msat == 0 {
            return 0.0;
        }
        self.total_fee_msat as f64 / self.amt_msat as f64
    }

    /// Marshals into the router API form. LND's hop list attributes the
    /// forward amount and fee to the node reached by each hop, so ours are
    /// shifted by one.
    pub fn to_rpc(&self, payment_hash: &str, block_height: u32) -> crate::api::SendToRouteRequest {
        const FINAL_CLTV: u32 = 144;
        let n = self.hops.len();
        let mut expiry = block_height + FINAL_CLTV + self.total_time_lock_delta;
        let hops: Vec<RpcHop> = self
            .hops
            .iter()
            .enumerate()
            .map(|(i, hop)| {
                let (amt_fwd, fee) = if i + 1 < n {
                    (
                        self.hops[i + 1].amt_to_forward_msat,
                        self.hops[i + 1].fee_msat,
                    )
                } else {
                    (self.amt_msat, 0)
                };
                if i + 1 < n {
                    expiry -= self.hops[i + 1].time_lock_delta;
                }
                RpcHop {
                    chan_id: hop.channel_id.0,
                    pub_key: hop.to_pubkey.clone(),
                    amt_to_forward_msat: amt_fwd,
                    fee_msat: fee,
                    expiry,
                }
            })
            .collect();

        crate::api::SendToRouteRequest {
            payment_hash: payment_hash.to_string(),
            route: RpcRoute {
                total_time_lock: block_height + FINAL_CLTV + self.total_time_lock_delta,
                total_amt_msat: self.total_amt_msat,
                total_fees_msat: self.total_fee_msat,
                hops,
            },
        }
    }
}

/// Finds the cheapest circular route for `amt_msat` from `source` back
/// through `target`, or fails with `NoRouteFound`. Restartable with a
/// smaller amount or a larger exclusion set; the search itself is
/// amount-parametric.
pub fn find_route(
    graph: &GraphSnapshot,
    source: ChannelId,
    target: ChannelId,
    amt_msat: u64,
    limits: &RouteLimits,
    excluded: &HashSet<ChannelId>,
) -> Result<Route, Error> {
    let own = graph.own_pubkey.as_str();

    let source_edge = graph.edge(source).ok_or_else(|| Error::NoRouteFound {
        amount_sat: amt_msat / 1000,
        detail: format!("source channel {source} not in graph (needs confirmations?)"),
    })?;
    let target_edge = graph.edge(target).ok_or_else(|| Error::NoRouteFound {
        amount_sat: amt_msat / 1000,
        detail: format!("target channel {target} not in graph (needs confirmations?)"),
    })?;

    let src_peer = source_edge
        .other_end(own)
        .ok_or_else(|| Error::InvalidChannelPair {
            from_chan: source,
            target,
            reason: "source channel does not touch our node".to_string(),
        })?;
    let tgt_peer = target_edge
        .other_end(own)
        .ok_or_else(|| Error::InvalidChannelPair {
            from_chan: source,
            target,
            reason: "target channel does not touch our node".to_string(),
        })?;

    if src_peer == tgt_peer {
        // A circular payment through one peer cannot be steered onto a
        // specific channel (non-strict forwarding), and the one-hop loop
        // has no rebalancing effect at all.
        return Err(Error::InvalidChannelPair {
            from_chan: source,
            target,
            reason: "both channels lead to the same peer".to_string(),
        });
    }

    // Own channels never serve as intermediaries.
    let mut blocked: HashSet<ChannelId> = excluded.clone();
    blocked.insert(source);
    blocked.insert(target);

    let max_inner_hops = limits.max_hops.saturating_sub(2);
    let inner = dijkstra(graph, src_peer, tgt_peer, own, amt_msat, max_inner_hops, &blocked)
        .ok_or_else(|| Error::NoRouteFound {
            amount_sat: amt_msat / 1000,
            detail: format!(
                "no path {src_peer} -> {tgt_peer} within {} hops",
                max_inner_hops
            ),
        })?;

    let mut channels = Vec::with_capacity(inner.len() + 2);
    channels.push(source);
    channels.extend(inner);
    channels.push(target);

    let route = build_route(graph, &channels, amt_msat)?;

    let ceiling = limits.fee_ceiling_msat(amt_msat);
    if route.total_fee_msat > ceiling {
        return Err(Error::NoRouteFound {
            amount_sat: amt_msat / 1000,
            detail: format!(
                "cheapest route costs {} msat, ceiling {} msat over {} hops",
                route.total_fee_msat,
                ceiling,
                route.hops.len()
            ),
        });
    }

    Ok(route)
}

/// Cheapest path by cumulative hop fee, tie-broken by hop count and then
/// discovery order for determinism.
fn dijkstra(
    graph: &GraphSnapshot,
    from: &str,
    to: &str,
    own: &str,
    amt_msat: u64,
    max_hops: usize,
    blocked: &HashSet<ChannelId>,
) -> Option<Vec<ChannelId>> {
    if max_hops == 0 {
        return None;
    }

    // (cost, hops, seq) priority; seq freezes discovery order among equals.
    let mut heap: BinaryHeap<Reverse<(u64, usize, u64, String)>> = BinaryHeap::new();
    let mut best: HashMap<String, (u64, usize)> = HashMap::new();
    let mut prev: HashMap<String, (String, ChannelId)> = HashMap::new();
    let mut seq = 0u64;

    heap.push(Reverse((0, 0, seq, from.to_string())));
    best.insert(from.to_string(), (0, 0));

    while let Some(Reverse((cost, hops, _, node))) = heap.pop() {
        if node == to {
            // Rebuild channel path backwards.
            let mut path = Vec::new();
            let mut cur = node;
            while let Some((parent, channel)) = prev.get(&cur) {
                path.push(*channel);
                cur = parent.clone();
            }
            path.reverse();
            return Some(path);
        }
        if let Some(&(bc, bh)) = best.get(&node) {
            if (cost, hops) > (bc, bh) {
                continue; // stale heap entry
            }
        }
        if hops == max_hops {
            continue;
        }

        for edge in graph.edges_at(&node) {
            if blocked.contains(&edge.channel_id) {
                continue;
            }
            let next = match edge.other_end(&node) {
                Some(n) if n != own => n,
                _ => continue,
            };
            let policy = match edge.policy_from(&node) {
                Some(p) if !p.disabled => p,
                _ => continue,
            };
            if edge.capacity_sat * 1000 < amt_msat {
                continue;
            }

            let next_cost = cost + policy.fee_msat(amt_msat);
            let next_hops = hops + 1;
            let improved = match best.get(next) {
                Some(&(bc, bh)) => (next_cost, next_hops) < (bc, bh),
                None => true,
            };
            if improved {
                best.insert(next.to_string(), (next_cost, next_hops));
                prev.insert(next.to_string(), (node.clone(), edge.channel_id));
                seq += 1;
                heap.push(Reverse((next_cost, next_hops, seq, next.to_string())));
            }
        }
    }

    None
}

/// Exact fee accumulation over a fixed channel sequence, traversed
/// backwards: each forwarding node prices the amount it must push onward,
/// downstream fees included. The first hop is ours and costs nothing.
fn build_route(
    graph: &GraphSnapshot,
    channels: &[ChannelId],
    amt_msat: u64,
) -> Result<Route, Error> {
    let own = graph.own_pubkey.clone();

    // Forward pass for the node sequence.
    let mut nodes = vec![own.clone()];
    for id in channels {
        let edge = graph.edge(*id).ok_or_else(|| Error::NoRouteFound {
            amount_sat: amt_msat / 1000,
            detail: format!("channel {id} vanished from graph"),
        })?;
        let cur = nodes.last().expect("nodes never empty");
        let next = edge.other_end(cur).ok_or_else(|| Error::NoRouteFound {
            amount_sat: amt_msat / 1000,
            detail: format!("channel {id} does not continue the path"),
        })?;
        nodes.push(next.to_string());
    }

    let mut hops_rev: Vec<Hop> = Vec::with_capacity(channels.len());
    let mut forward = amt_msat;
    let mut total_fee = 0u64;
    let mut total_tld = 0u32;

    for i in (0..channels.len()).rev() {
        let edge = graph.edge(channels[i]).expect("checked above");
        if edge.capacity_sat * 1000 < forward {
            return Err(Error::NoRouteFound {
                amount_sat: amt_msat / 1000,
                detail: format!("channel {} too small for {} msat", channels[i], forward),
            });
        }
        let (fee, tld) = if i == 0 {
            (0, 0)
        } else {
            let policy = edge
                .policy_from(&nodes[i])
                .ok_or_else(|| Error::NoRouteFound {
                    amount_sat: amt_msat / 1000,
                    detail: format!("no policy for {} on channel {}", nodes[i], channels[i]),
                })?;
            (policy.fee_msat(forward), policy.time_lock_delta)
        };
        hops_rev.push(Hop {
            channel_id: channels[i],
            from_pubkey: nodes[i].clone(),
            to_pubkey: nodes[i + 1].clone(),
            amt_to_forward_msat: forward,
            fee_msat: fee,
            time_lock_delta: tld,
        });
        forward += fee;
        total_fee += fee;
        total_tld += tld;
    }

    hops_rev.reverse();
    Ok(Route {
        hops: hops_rev,
        amt_msat,
        total_amt_msat: amt_msat + total_fee,
        total_fee_msat: total_fee,
        total_time_lock_delta: total_tld,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::testutil::{edge, policy};
    use crate::model::GraphEdge;

    const SRC: ChannelId = ChannelId(1);
    const TGT: ChannelId = ChannelId(2);

    fn limits() -> RouteLimits {
        RouteLimits {
            max_fee_msat: 1_000_000,
            max_fee_rate: 0.01,
            max_hops: 10,
        }
    }

    /// me --1-- a --3-- c --4-- b --2-- me, plus direct a --5-- b (pricey).
    fn diamond() -> GraphSnapshot {
        GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(1000, 100)),
                edge(2, "b", "me", 10_000_000, policy(1000, 100)),
                edge(3, "a", "c", 10_000_000, policy(500, 50)),
                edge(4, "c", "b", 10_000_000, policy(0, 200)),
                edge(5, "a", "b", 10_000_000, policy(50_000, 900)),
            ],
        )
    }

    #[test]
    fn test_route_enters_and_exits_own_channels() {
        let g = diamond();
        let route = find_route(&g, SRC, TGT, 100_000_000, &limits(), &HashSet::new()).unwrap();
        let ids = route.channel_ids();
        assert_eq!(*ids.first().unwrap(), SRC);
        assert_eq!(*ids.last().unwrap(), TGT);
        // Never just the source/target pair: at least one intermediary hop.
        assert!(ids.len() >= 3);
    }

    #[test]
    fn test_picks_cheapest_path() {
        let g = diamond();
        let route = find_route(&g, SRC, TGT, 100_000_000, &limits(), &HashSet::new()).unwrap();
        // a->c->b beats the expensive direct a->b edge.
        assert_eq!(
            route.channel_ids(),
            vec![SRC, ChannelId(3), ChannelId(4), TGT]
        );
    }

    #[test]
    fn test_exact_backward_fee_accumulation() {
        let g = diamond();
        let route = find_route(&g, SRC, TGT, 100_000_000, &limits(), &HashSet::new()).unwrap();
        // Backwards from 100_000_000 msat delivered:
        //   b charges on channel 2: 1000 + 100ppm = 11_000
        //   c charges on channel 4 for 100_011_000: 200ppm = 20_002
        //   a charges on channel 3 for 100_031_002: 500 + 50ppm = 5_501
        assert_eq!(route.total_fee_msat, 36_503);
        assert_eq!(route.total_amt_msat, 100_036_503);
        assert_eq!(route.hops[0].fee_msat, 0);
        assert_eq!(route.hops[0].amt_to_forward_msat, 100_036_503);
        assert_eq!(route.hops[3].amt_to_forward_msat, 100_000_000);
    }

    #[test]
    fn test_fee_respects_both_ceilings() {
        let g = diamond();
        let amt = 100_000_000u64;
        let route = find_route(&g, SRC, TGT, amt, &limits(), &HashSet::new()).unwrap();
        let l = limits();
        assert!(route.total_fee_msat <= l.max_fee_msat);
        assert!(route.total_fee_msat as f64 <= l.max_fee_rate * amt as f64);
    }

    #[test]
    fn test_absolute_ceiling_rejects() {
        let g = diamond();
        let tight = RouteLimits {
            max_fee_msat: 10_000, // cheapest costs 36_503
            max_fee_rate: 0.01,
            max_hops: 10,
        };
        let err = find_route(&g, SRC, TGT, 100_000_000, &tight, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::NoRouteFound { .. }));
    }

    #[test]
    fn test_rate_ceiling_rejects() {
        let g = diamond();
        let tight = RouteLimits {
            max_fee_msat: 1_000_000,
            max_fee_rate: 0.0001, // 10_000 msat on 100M
            max_hops: 10,
        };
        assert!(find_route(&g, SRC, TGT, 100_000_000, &tight, &HashSet::new()).is_err());
    }

    #[test]
    fn test_smaller_amount_can_pass_rate_ceiling() {
        // Rate-dominated fees scale with the amount; the base-fee share
        // shrinks only with smaller amounts.
        let g = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(0, 0)),
                edge(2, "b", "me", 10_000_000, policy(0, 100)),
                edge(3, "a", "b", 10_000_000, policy(20_000, 0)),
            ],
        );
        let l = RouteLimits {
            max_fee_msat: 1_000_000,
            max_fee_rate: 0.0003,
            max_hops: 10,
        };
        // 90M msat: fee 20_000 + 9_000 = 29_000, rate ceiling 27_000 -> rejected
        assert!(find_route(&g, SRC, TGT, 90_000_000, &l, &HashSet::new()).is_err());
        // 200M msat: fee 20_000 + 20_000 = 40_000, rate ceiling 60_000 -> accepted
        assert!(find_route(&g, SRC, TGT, 200_000_000, &l, &HashSet::new()).is_ok());
    }

    #[test]
    fn test_same_peer_pair_rejected() {
        let g = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(0, 0)),
                edge(2, "a", "me", 10_000_000, policy(0, 0)),
            ],
        );
        let err = find_route(&g, SRC, TGT, 1_000_000, &limits(), &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidChannelPair { .. }));
    }

    #[test]
    fn test_own_node_not_an_intermediary() {
        // Only way from a to b that is not the expensive edge would be back
        // through us; the planner must take the expensive edge instead.
        let g = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(0, 0)),
                edge(2, "b", "me", 10_000_000, policy(0, 0)),
                edge(6, "me", "a", 10_000_000, policy(0, 0)),
                edge(5, "a", "b", 10_000_000, policy(50_000, 900)),
            ],
        );
        let route = find_route(&g, SRC, TGT, 1_000_000, &limits(), &HashSet::new()).unwrap();
        assert_eq!(route.channel_ids(), vec![SRC, ChannelId(5), TGT]);
    }

    #[test]
    fn test_excluded_channel_forces_detour() {
        let g = diamond();
        let mut excluded = HashSet::new();
        excluded.insert(ChannelId(4)); // break a->c->b
        let route = find_route(&g, SRC, TGT, 100_000_000, &limits(), &excluded).unwrap();
        assert_eq!(route.channel_ids(), vec![SRC, ChannelId(5), TGT]);
    }

    #[test]
    fn test_hop_ceiling() {
        let g = diamond();
        let mut excluded = HashSet::new();
        excluded.insert(ChannelId(5));
        let short = RouteLimits {
            max_fee_msat: 1_000_000,
            max_fee_rate: 0.01,
            max_hops: 3, // a->c->b needs 4 total
        };
        assert!(find_route(&g, SRC, TGT, 1_000_000, &short, &excluded).is_err());
    }

    #[test]
    fn test_disabled_edge_skipped() {
        let mut p = policy(0, 10);
        p.disabled = true;
        let g = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(0, 0)),
                edge(2, "b", "me", 10_000_000, policy(0, 0)),
                GraphEdge {
                    channel_id: ChannelId(3),
                    node1: "a".to_string(),
                    node2: "b".to_string(),
                    capacity_sat: 10_000_000,
                    node1_policy: Some(p),
                    node2_policy: None,
                },
            ],
        );
        assert!(find_route(&g, SRC, TGT, 1_000_000, &limits(), &HashSet::new()).is_err());
    }

    #[test]
    fn test_capacity_bound() {
        let g = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(0, 0)),
                edge(2, "b", "me", 10_000_000, policy(0, 0)),
                edge(3, "a", "b", 50, policy(0, 0)), // 50 sat capacity
            ],
        );
        assert!(find_route(&g, SRC, TGT, 1_000_000_000, &limits(), &HashSet::new()).is_err());
    }

    #[test]
    fn test_equal_fee_prefers_fewer_hops() {
        // Two zero-fee paths a->b: direct (6) and via c (3, 4).
        let g = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 10_000_000, policy(0, 0)),
                edge(2, "b", "me", 10_000_000, policy(0, 0)),
                edge(3, "a", "c", 10_000_000, policy(0, 0)),
                edge(4, "c", "b", 10_000_000, policy(0, 0)),
                edge(6, "a", "b", 10_000_000, policy(0, 0)),
            ],
        );
        let route = find_route(&g, SRC, TGT, 1_000_000, &limits(), &HashSet::new()).unwrap();
        assert_eq!(route.channel_ids(), vec![SRC, ChannelId(6), TGT]);
    }

    #[test]
    fn test_search_is_deterministic() {
        let g = diamond();
        let a = find_route(&g, SRC, TGT, 100_000_000, &limits(), &HashSet::new()).unwrap();
        for _ in 0..5 {
            let b = find_route(&g, SRC, TGT, 100_000_000, &limits(), &HashSet::new()).unwrap();
            assert_eq!(a.channel_ids(), b.channel_ids());
            assert_eq!(a.total_fee_msat, b.total_fee_msat);
        }
    }

    #[test]
    fn test_to_rpc_shifts_fee_attribution() {
        let g = diamond();
        let route = find_route(&g, SRC, TGT, 100_000_000, &limits(), &HashSet::new()).unwrap();
        let req = route.to_rpc("aGFzaA==", 800_000);
        assert_eq!(req.route.hops.len(), 4);
        assert_eq!(req.route.total_fees_msat, route.total_fee_msat);
        // Final hop delivers the bare amount and charges nothing.
        let last = req.route.hops.last().unwrap();
        assert_eq!(last.amt_to_forward_msat, 100_000_000);
        assert_eq!(last.fee_msat, 0);
        // First hop reaches the source peer.
        assert_eq!(req.route.hops[0].pub_key, "a");
    }
}
