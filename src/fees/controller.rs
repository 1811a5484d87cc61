//! Multiplicative fee adjustment from forwarding demand.
//!
//! Channels forwarding more than the target daily volume get a higher fee
//! rate and a lower base fee, shifting revenue toward marginal pricing.
//! Channels below target get cheaper, except when they are drained on the
//! local side already: lowering a depleted channel's rate would only
//! accelerate depletion, so the rate is held or nudged up instead.

use crate::config::FeesConfig;
use crate::demand::ChannelFlowStats;
use crate::model::{Channel, ChannelId};

/// Proposed policy change for one channel. Application is a separate step.
#[derive(Debug, Clone)]
pub struct FeeAdjustment {
    pub channel_id: ChannelId,
    pub old_base_fee_msat: u64,
    pub new_base_fee_msat: u64,
    pub old_fee_rate: f64,
    pub new_fee_rate: f64,
    pub rate_factor: f64,
    pub base_factor: f64,
    /// True when a bound truncated the raw adjustment. Informational.
    pub clamped: bool,
}

/// Computes the new policy for `channel` from its demand statistics.
///
/// `bootstrap` assigns starting values to channels without forwarding
/// history instead of running the demand formula against a zero baseline.
pub fn propose(
    cfg: &FeesConfig,
    channel: &Channel,
    stats: Option<&ChannelFlowStats>,
    window_days: f64,
    bootstrap: bool,
) -> FeeAdjustment {
    let old_rate = channel.local_policy.fee_rate;
    let old_base = channel.local_policy.base_fee_msat;

    let no_history = stats.map_or(true, |s| s.forwardings == 0);
    if bootstrap && no_history {
        let new_rate = round_rate(cfg.max_fee_rate / 2.0);
        let new_base = cfg.bootstrap_base_fee_msat;
        return FeeAdjustment {
            channel_id: channel.id,
            old_base_fee_msat: old_base,
            new_base_fee_msat: new_base,
            old_fee_rate: old_rate,
            new_fee_rate: new_rate,
            rate_factor: if old_rate > 0.0 { new_rate / old_rate } else { 1.0 },
            base_factor: if old_base > 0 {
                new_base as f64 / old_base as f64
            } else {
                1.0
            },
            clamped: false,
        };
    }

    let out_sat = stats.map_or(0, |s| s.total_out_sat());
    let observed_rate = out_sat as f64 / window_days;

    let (rate_factor, base_factor) = if observed_rate >= cfg.target_rate_sat_per_day {
        (cfg.excess_rate_factor, cfg.excess_base_factor)
    } else if channel.unbalancedness() > cfg.depletion_threshold {
        (depletion_floor(cfg, channel), 1.0)
    } else {
        (cfg.deficit_rate_factor, 1.0)
    };

    let raw_rate = round_rate(old_rate * rate_factor);
    let new_rate = raw_rate.clamp(cfg.min_fee_rate, cfg.max_fee_rate);

    let raw_base = (old_base as f64 * base_factor).round() as u64;
    let new_base = raw_base.clamp(cfg.min_base_fee_msat, cfg.max_base_fee_msat);

    FeeAdjustment {
        channel_id: channel.id,
        old_base_fee_msat: old_base,
        new_base_fee_msat: new_base,
        old_fee_rate: old_rate,
        new_fee_rate: new_rate,
        rate_factor,
        base_factor,
        clamped: (raw_rate - new_rate).abs() > f64::EPSILON || raw_base != new_base,
    }
}

/// Rate floor for drained channels: the closer the local balance sits to
/// zero relative to the reserve, the stronger the upward nudge. Never
/// below 1 so a depleted channel's rate cannot drop.
fn depletion_floor(cfg: &FeesConfig, channel: &Channel) -> f64 {
    let mut reserve = cfg.local_balance_reserve_sat;
    // Small channels cannot respect the full reserve.
    if reserve > channel.capacity_sat / 2 {
        reserve = channel.capacity_sat / 3;
    }
    if reserve == 0 {
        return 1.0;
    }
    let shortfall = (reserve as f64 - channel.local_balance_sat as f64) / reserve as f64;
    (1.0 + cfg.depletion_nudge * shortfall).max(1.0)
}

/// The daemon API carries fee rates with 6-decimal granularity.
fn round_rate(rate: f64) -> f64 {
    (rate * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LocalPolicy;

    fn channel(capacity: u64, local: u64, base_msat: u64, fee_rate: f64) -> Channel {
        Channel {
            id: ChannelId(42),
            remote_pubkey: "peer".to_string(),
            capacity_sat: capacity,
            local_balance_sat: local,
            remote_balance_sat: capacity - local,
            local_reserve_sat: 0,
            remote_reserve_sat: 0,
            local_policy: LocalPolicy {
                base_fee_msat: base_msat,
                fee_rate,
                time_lock_delta: 40,
            },
            active: true,
            private: false,
            initiator: true,
            channel_point: "txid:0".to_string(),
        }
    }

    fn stats_out(out_sat: u64) -> ChannelFlowStats {
        ChannelFlowStats {
            forwardings: if out_sat > 0 { 3 } else { 0 },
            forwardings_out: if out_sat > 0 { 3 } else { 0 },
            fee_msat: 1000,
            total_in_msat: 0,
            total_out_msat: out_sat * 1000,
        }
    }

    fn cfg() -> FeesConfig {
        FeesConfig::default()
    }

    /// Busy channel: rate up by 1.5, base down by 0.75.
    #[test]
    fn test_excess_demand_scenario() {
        let ch = channel(5_000_000, 1_033_113, 1000, 0.000150);
        let stats = stats_out(1_521_253);
        let adj = propose(&cfg(), &ch, Some(&stats), 7.0, false);

        assert!((adj.new_fee_rate - 0.000225).abs() < 1e-9, "{}", adj.new_fee_rate);
        assert_eq!(adj.new_base_fee_msat, 750);
        assert!(!adj.clamped);
        assert!(adj.new_fee_rate > adj.old_fee_rate);
        assert!(adj.new_base_fee_msat <= adj.old_base_fee_msat);
    }

    /// Depleted channel with no demand: rate nudged up, never lowered.
    #[test]
    fn test_depleted_channel_scenario() {
        let ch = channel(2_000_000, 20_810, 1000, 0.000150);
        let adj = propose(&cfg(), &ch, None, 7.0, false);

        // ub = (1_979_190 - 20_810) / 2_000_000 = 0.979, above 0.95
        assert!((adj.rate_factor - 1.048).abs() < 0.001, "{}", adj.rate_factor);
        assert!(adj.new_fee_rate >= adj.old_fee_rate);
        assert_eq!(adj.new_base_fee_msat, adj.old_base_fee_msat);
    }

    #[test]
    fn test_deficit_lowers_rate() {
        let ch = channel(2_000_000, 1_000_000, 1000, 0.000200);
        let stats = stats_out(1_000); // far below target
        let adj = propose(&cfg(), &ch, Some(&stats), 7.0, false);

        assert!(adj.new_fee_rate < adj.old_fee_rate);
        assert!((adj.rate_factor - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
        assert_eq!(adj.new_base_fee_msat, adj.old_base_fee_msat);
    }

    #[test]
    fn test_deficit_on_depleted_channel_never_lowers() {
        // Just past the depletion threshold.
        let ch = channel(2_000_000, 40_000, 1000, 0.000200);
        let adj = propose(&cfg(), &ch, Some(&stats_out(0)), 7.0, false);
        assert!(adj.new_fee_rate >= adj.old_fee_rate);
    }

    #[test]
    fn test_depletion_floor_reserve_reduction_for_small_channels() {
        // 600k capacity: the 500k reserve exceeds half, drops to cap/3.
        let ch = channel(600_000, 10_000, 1000, 0.000200);
        let c = cfg();
        let floor = depletion_floor(&c, &ch);
        let reserve = 200_000.0;
        let expected = 1.0 + 0.05 * (reserve - 10_000.0) / reserve;
        assert!((floor - expected).abs() < 1e-12);
    }

    #[test]
    fn test_rate_clamped_at_ceiling() {
        let ch = channel(5_000_000, 1_000_000, 1000, 0.004);
        let stats = stats_out(2_000_000); // excess demand, 0.004 * 1.5 > max
        let adj = propose(&cfg(), &ch, Some(&stats), 7.0, false);

        assert!((adj.new_fee_rate - cfg().max_fee_rate).abs() < 1e-12);
        assert!(adj.clamped);
    }

    #[test]
    fn test_rate_clamped_at_floor() {
        let ch = channel(5_000_000, 2_500_000, 1000, 0.000006);
        let adj = propose(&cfg(), &ch, Some(&stats_out(10)), 7.0, false);

        // 0.000006 * 0.7071 rounds to 0.000004, below the floor.
        assert!((adj.new_fee_rate - cfg().min_fee_rate).abs() < 1e-12);
        assert!(adj.clamped);
    }

    #[test]
    fn test_base_fee_clamped_at_ceiling() {
        let mut c = cfg();
        c.max_base_fee_msat = 600;
        let ch = channel(5_000_000, 1_000_000, 1000, 0.000150);
        // Deficit holds the base at 1000, above the 600 ceiling.
        let adj = propose(&c, &ch, Some(&stats_out(10)), 7.0, false);
        assert_eq!(adj.new_base_fee_msat, 600);
        assert!(adj.clamped);
    }

    #[test]
    fn test_bootstrap_assigns_starting_policy() {
        let ch = channel(5_000_000, 2_500_000, 0, 0.0);
        let c = cfg();
        let adj = propose(&c, &ch, None, 7.0, true);

        assert!((adj.new_fee_rate - c.max_fee_rate / 2.0).abs() < 1e-9);
        assert_eq!(adj.new_base_fee_msat, c.bootstrap_base_fee_msat);
        assert!(!adj.clamped);
    }

    #[test]
    fn test_bootstrap_leaves_active_channels_to_the_formula() {
        let ch = channel(5_000_000, 1_033_113, 1000, 0.000150);
        let stats = stats_out(1_521_253);
        let adj = propose(&cfg(), &ch, Some(&stats), 7.0, true);

        // History exists, so the demand formula runs even in bootstrap mode.
        assert!((adj.new_fee_rate - 0.000225).abs() < 1e-9);
    }

    #[test]
    fn test_exact_target_rate_counts_as_excess() {
        let c = cfg();
        let out = (c.target_rate_sat_per_day * 7.0).ceil() as u64;
        let ch = channel(5_000_000, 2_500_000, 1000, 0.000100);
        let adj = propose(&c, &ch, Some(&stats_out(out)), 7.0, false);
        assert!((adj.rate_factor - c.excess_rate_factor).abs() < 1e-12);
    }
}
