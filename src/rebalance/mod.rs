pub mod executor;
pub mod planner;

use log::{debug, info, warn};

use crate::client::LndClient;
use crate::config::{Config, RebalanceConfig};
use crate::db::Database;
use crate::error::Error;
use crate::model::{Channel, ChannelId};
use crate::rebalance::executor::{RebalanceOutcome, RebalanceStatus};
use crate::rebalance::planner::{Route, RouteLimits};
use crate::state::NodeState;

/// A validated rebalance order: move `amount_sat` of local balance from
/// `source` (outgoing side) to `target` (receiving side). Ephemeral,
/// constructed per invocation.
#[derive(Debug, Clone)]
pub struct RebalancePlan {
    pub source: ChannelId,
    pub target: ChannelId,
    pub amount_sat: u64,
    pub fee_budget_msat: u64,
    pub max_fee_rate: f64,
    pub max_hops: usize,
    pub max_attempts: u32,
    pub chunk_fraction: f64,
    pub min_chunk_sat: u64,
}

impl RebalancePlan {
    pub fn limits(&self) -> RouteLimits {
        RouteLimits {
            max_fee_msat: self.fee_budget_msat,
            max_fee_rate: self.max_fee_rate,
            max_hops: self.max_hops,
        }
    }
}

/// Validates a channel pair and amount against the current snapshot and
/// returns the plan together with a route cost estimate. No side effects.
pub fn plan(
    state: &NodeState,
    source: ChannelId,
    target: ChannelId,
    amount_sat: u64,
    cfg: &RebalanceConfig,
) -> Result<(RebalancePlan, Route), Error> {
    if source == target {
        return Err(Error::InvalidChannelPair {
            from_chan: source,
            target,
            reason: "source and target are the same channel".to_string(),
        });
    }
    let source_channel = state.channel(source).ok_or_else(|| Error::InvalidChannelPair {
        from_chan: source,
        target,
        reason: format!("channel {source} not in our channel list"),
    })?;
    let target_channel = state.channel(target).ok_or_else(|| Error::InvalidChannelPair {
        from_chan: source,
        target,
        reason: format!("channel {target} not in our channel list"),
    })?;
    if source_channel.remote_pubkey == target_channel.remote_pubkey {
        return Err(Error::InvalidChannelPair {
            from_chan: source,
            target,
            reason: "both channels lead to the same peer".to_string(),
        });
    }
    if amount_sat == 0 {
        return Err(Error::InvalidAmount {
            amount_sat,
            reason: "amount must be positive".to_string(),
        });
    }
    let can_send = source_channel.max_can_send_sat();
    if amount_sat > can_send {
        return Err(Error::InsufficientLiquidity {
            amount_sat,
            available_sat: can_send,
            side: "source",
        });
    }
    let can_receive = target_channel.max_can_receive_sat();
    if amount_sat > can_receive {
        return Err(Error::InsufficientLiquidity {
            amount_sat,
            available_sat: can_receive,
            side: "target",
        });
    }

    let plan = RebalancePlan {
        source,
        target,
        amount_sat,
        fee_budget_msat: cfg.max_fee_sat * 1000,
        max_fee_rate: cfg.max_fee_rate,
        max_hops: cfg.max_hops,
        max_attempts: cfg.max_attempts,
        chunk_fraction: cfg.chunk_fraction,
        min_chunk_sat: cfg.min_chunk_sat,
    };

    let estimate = planner::find_route(
        &state.graph,
        source,
        target,
        amount_sat * 1000,
        &plan.limits(),
        &Default::default(),
    )?;

    Ok((plan, estimate))
}

/// Daemon-mode entry: picks the most skewed source/target pair and runs one
/// rebalance, recording the outcome.
pub async fn run(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &Database,
    state: &NodeState,
) -> anyhow::Result<()> {
    let cfg = &config.rebalance;
    let channels: Vec<&Channel> = state.active_channels().collect();
    if channels.len() < 2 {
        debug!("Rebalancer: need at least 2 active channels");
        return Ok(());
    }

    let Some((source, target, amount_sat)) = select_candidate_pair(&channels, cfg) else {
        debug!("Rebalancer: nothing to do (no source/target pair)");
        return Ok(());
    };

    info!(
        "Rebalancer: candidate pair {} -> {} for {} sat",
        source, target, amount_sat
    );

    let (plan, estimate) = match plan(state, source, target, amount_sat, cfg) {
        Ok(p) => p,
        Err(e) => {
            info!("Rebalancer: not viable: {e}");
            return Ok(());
        }
    };
    debug!(
        "Rebalancer: estimated fee {} msat over {} hops",
        estimate.total_fee_msat,
        estimate.hops.len()
    );

    let reckless = !config.general.dry_run;
    match executor::execute(client, &state.graph, state.block_height, &plan, reckless).await {
        Ok(outcome) => record_outcome(db, &plan, &outcome)?,
        Err(e @ Error::PaymentTimeout { .. }) => {
            // Inconclusive: the payment may still settle. Leave balances to
            // the next snapshot and only report.
            warn!("Rebalancer: {e}");
        }
        Err(e) => info!("Rebalancer: failed: {e}"),
    }
    Ok(())
}

/// Targets are depleted channels (high unbalancedness), sources carry
/// surplus. Extremes are paired first.
fn select_candidate_pair(
    channels: &[&Channel],
    cfg: &RebalanceConfig,
) -> Option<(ChannelId, ChannelId, u64)> {
    let mut targets: Vec<&&Channel> = channels
        .iter()
        .filter(|c| c.unbalancedness() > cfg.unbalanced_threshold && c.max_can_receive_sat() > 0)
        .collect();
    let mut sources: Vec<&&Channel> = channels
        .iter()
        .filter(|c| {
            c.unbalancedness() < cfg.unbalanced_threshold - cfg.source_gap
                && c.max_can_send_sat() > 0
        })
        .collect();

    if targets.is_empty() || sources.is_empty() {
        return None;
    }

    targets.sort_by(|a, b| {
        b.unbalancedness()
            .partial_cmp(&a.unbalancedness())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    sources.sort_by(|a, b| {
        a.unbalancedness()
            .partial_cmp(&b.unbalancedness())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let target = targets[0];
    let source = sources
        .iter()
        .find(|c| c.remote_pubkey != target.remote_pubkey)?;

    // Bring the target halfway to balance, bounded by what the source can
    // spare without tipping over itself.
    let target_need =
        (target.remote_balance_sat.saturating_sub(target.local_balance_sat)) / 2;
    let source_surplus =
        (source.local_balance_sat.saturating_sub(source.remote_balance_sat)) / 2;
    let amount = target_need
        .min(source_surplus)
        .min(source.max_can_send_sat())
        .min(target.max_can_receive_sat());

    if amount < cfg.min_chunk_sat {
        return None;
    }
    Some((source.id, target.id, amount))
}

fn record_outcome(
    db: &Database,
    plan: &RebalancePlan,
    outcome: &RebalanceOutcome,
) -> anyhow::Result<()> {
    info!(
        "Rebalancer: {} after {} attempts: {} sat moved, {} msat fees",
        outcome.status.as_str(),
        outcome.attempts,
        outcome.amount_moved_sat,
        outcome.fee_paid_msat,
    );
    if outcome.status == RebalanceStatus::Planned {
        // Dry-run projection only.
        return Ok(());
    }
    let hops: Vec<u64> = outcome.hops.iter().map(|c| c.0).collect();
    db.record_rebalance(
        plan.source.0,
        plan.target.0,
        outcome.amount_moved_sat,
        outcome.fee_paid_msat,
        outcome.attempts,
        outcome.status.as_str(),
        &serde_json::to_string(&hops)?,
        chrono::Utc::now().timestamp(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::testutil::{edge, policy};
    use crate::model::{GraphSnapshot, LocalPolicy};

    fn channel(id: u64, peer: &str, capacity: u64, local: u64) -> Channel {
        Channel {
            id: ChannelId(id),
            remote_pubkey: peer.to_string(),
            capacity_sat: capacity,
            local_balance_sat: local,
            remote_balance_sat: capacity - local,
            local_reserve_sat: 0,
            remote_reserve_sat: 0,
            local_policy: LocalPolicy {
                base_fee_msat: 1000,
                fee_rate: 0.000100,
                time_lock_delta: 40,
            },
            active: true,
            private: false,
            initiator: true,
            channel_point: format!("txid_{id}:0"),
        }
    }

    fn test_state() -> NodeState {
        let graph = GraphSnapshot::new(
            "me".to_string(),
            vec![
                edge(1, "me", "a", 2_000_000, policy(0, 0)),
                edge(2, "b", "me", 2_000_000, policy(0, 100)),
                edge(3, "a", "b", 2_000_000, policy(0, 100)),
            ],
        );
        NodeState {
            own_pubkey: "me".to_string(),
            block_height: 800_000,
            channels: vec![
                channel(1, "a", 2_000_000, 1_600_000),
                channel(2, "b", 2_000_000, 100_000),
            ],
            graph,
        }
    }

    #[test]
    fn test_plan_validates_and_estimates() {
        let state = test_state();
        let cfg = RebalanceConfig::default();
        let (plan, route) = plan(&state, ChannelId(1), ChannelId(2), 300_000, &cfg).unwrap();
        assert_eq!(plan.amount_sat, 300_000);
        assert!(route.total_fee_msat > 0);
        assert!(
            route.total_fee_msat <= plan.fee_budget_msat
                && route.total_fee_msat as f64 <= plan.max_fee_rate * 300_000_000.0
        );
    }

    #[test]
    fn test_plan_rejects_same_channel() {
        let state = test_state();
        let cfg = RebalanceConfig::default();
        let err = plan(&state, ChannelId(1), ChannelId(1), 100_000, &cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidChannelPair { .. }));
    }

    #[test]
    fn test_plan_rejects_unknown_channel() {
        let state = test_state();
        let cfg = RebalanceConfig::default();
        let err = plan(&state, ChannelId(1), ChannelId(99), 100_000, &cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidChannelPair { .. }));
    }

    #[test]
    fn test_plan_rejects_zero_amount() {
        let state = test_state();
        let cfg = RebalanceConfig::default();
        let err = plan(&state, ChannelId(1), ChannelId(2), 0, &cfg).unwrap_err();
        assert!(matches!(err, Error::InvalidAmount { .. }));
    }

    #[test]
    fn test_plan_rejects_amount_beyond_source() {
        let state = test_state();
        let cfg = RebalanceConfig::default();
        let err = plan(&state, ChannelId(1), ChannelId(2), 1_700_000, &cfg).unwrap_err();
        match err {
            Error::InsufficientLiquidity { side, .. } => assert_eq!(side, "source"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_plan_rejects_amount_beyond_target_headroom() {
        let mut state = test_state();
        // Target has little room left to receive.
        state.channels[1] = channel(2, "b", 2_000_000, 1_900_000);
        let cfg = RebalanceConfig::default();
        let err = plan(&state, ChannelId(1), ChannelId(2), 500_000, &cfg).unwrap_err();
        match err {
            Error::InsufficientLiquidity { side, .. } => assert_eq!(side, "target"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_candidate_pairing_picks_extremes() {
        let cfg = RebalanceConfig::default();
        let depleted = channel(2, "b", 2_000_000, 100_000); // ub 0.9
        let mildly_depleted = channel(4, "d", 2_000_000, 700_000); // ub 0.3
        let rich = channel(1, "a", 2_000_000, 1_800_000); // ub -0.8
        let balanced = channel(3, "c", 2_000_000, 1_000_000); // ub 0
        let channels: Vec<&Channel> = vec![&depleted, &mildly_depleted, &rich, &balanced];

        let (source, target, amount) = select_candidate_pair(&channels, &cfg).unwrap();
        assert_eq!(source, ChannelId(1));
        assert_eq!(target, ChannelId(2));
        // Half of the target deficit: (1_900_000 - 100_000) / 2
        assert_eq!(amount, 900_000.min((1_800_000u64 - 200_000) / 2));
    }

    #[test]
    fn test_candidate_pairing_skips_same_peer() {
        let cfg = RebalanceConfig::default();
        let depleted = channel(2, "b", 2_000_000, 100_000);
        let rich_same_peer = channel(1, "b", 2_000_000, 1_800_000);
        let channels: Vec<&Channel> = vec![&depleted, &rich_same_peer];
        assert!(select_candidate_pair(&channels, &cfg).is_none());
    }

    #[test]
    fn test_candidate_pairing_none_when_balanced() {
        let cfg = RebalanceConfig::default();
        let a = channel(1, "a", 2_000_000, 1_000_000);
        let b = channel(2, "b", 2_000_000, 1_050_000);
        let channels: Vec<&Channel> = vec![&a, &b];
        assert!(select_candidate_pair(&channels, &cfg).is_none());
    }
}
