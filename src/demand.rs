//! Aggregation of forwarding history into per-channel flow statistics.
//!
//! Feeds both the fee controller (outward demand) and rebalance candidate
//! selection (flow direction). Pure: same event set in, same stats out,
//! independent of iteration order.

use std::collections::HashMap;

use crate::api::RpcForwardingEvent;
use crate::model::ChannelId;

/// A single payment forwarded through the node.
#[derive(Debug, Clone)]
pub struct ForwardingEvent {
    pub timestamp: u64,
    pub chan_id_in: ChannelId,
    pub chan_id_out: ChannelId,
    pub amt_in_msat: u64,
    pub amt_out_msat: u64,
    pub fee_msat: u64,
}

impl From<&RpcForwardingEvent> for ForwardingEvent {
    fn from(e: &RpcForwardingEvent) -> Self {
        ForwardingEvent {
            timestamp: e.timestamp,
            chan_id_in: ChannelId(e.chan_id_in),
            chan_id_out: ChannelId(e.chan_id_out),
            amt_in_msat: e.amt_in_msat,
            amt_out_msat: e.amt_out_msat,
            fee_msat: e.fee_msat,
        }
    }
}

/// Half-open day window `[from, to)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: u64,
    pub to: u64,
}

impl TimeWindow {
    pub fn last_days(now: u64, days: u64) -> Self {
        TimeWindow {
            from: now.saturating_sub(days * 86_400),
            to: now,
        }
    }

    pub fn contains(&self, t: u64) -> bool {
        self.from <= t && t < self.to
    }

    pub fn days(&self) -> f64 {
        self.to.saturating_sub(self.from) as f64 / 86_400.0
    }
}

/// Per-channel forwarding statistics over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelFlowStats {
    /// Number of forwardings touching the channel in either direction.
    pub forwardings: u64,
    /// Number of forwardings leaving through the channel.
    pub forwardings_out: u64,
    /// Fees earned, attributed to the outbound channel.
    pub fee_msat: u64,
    pub total_in_msat: u64,
    pub total_out_msat: u64,
}

impl ChannelFlowStats {
    /// Net flow direction in [-1, 1]: positive when the channel mostly
    /// sends, negative when it mostly receives, 0 with no activity.
    pub fn flow(&self) -> f64 {
        let total = self.total_in_msat + self.total_out_msat;
        if total == 0 {
            return 0.0;
        }
        (self.total_out_msat as f64 - self.total_in_msat as f64) / total as f64
    }

    pub fn total_out_sat(&self) -> u64 {
        self.total_out_msat / 1000
    }

    /// Combines two partial aggregations. Associative and commutative, so
    /// event sets may be split arbitrarily and merged.
    pub fn merge(&mut self, other: &ChannelFlowStats) {
        self.forwardings += other.forwardings;
        self.forwardings_out += other.forwardings_out;
        self.fee_msat += other.fee_msat;
        self.total_in_msat += other.total_in_msat;
        self.total_out_msat += other.total_out_msat;
    }
}

/// Sums events within `window` into per-channel statistics.
pub fn aggregate<'a, I>(events: I, window: TimeWindow) -> HashMap<ChannelId, ChannelFlowStats>
where
    I: IntoIterator<Item = &'a ForwardingEvent>,
{
    let mut stats: HashMap<ChannelId, ChannelFlowStats> = HashMap::new();
    for event in events {
        if !window.contains(event.timestamp) {
            continue;
        }
        let inbound = stats.entry(event.chan_id_in).or_default();
        inbound.forwardings += 1;
        inbound.total_in_msat += event.amt_in_msat;

        let outbound = stats.entry(event.chan_id_out).or_default();
        outbound.forwardings += 1;
        outbound.forwardings_out += 1;
        outbound.total_out_msat += event.amt_out_msat;
        outbound.fee_msat += event.fee_msat;
    }
    stats
}

/// Merges a partial aggregation into an accumulator.
pub fn merge_into(
    acc: &mut HashMap<ChannelId, ChannelFlowStats>,
    part: &HashMap<ChannelId, ChannelFlowStats>,
) {
    for (id, stats) in part {
        acc.entry(*id).or_default().merge(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(t: u64, cin: u64, cout: u64, amt_msat: u64, fee_msat: u64) -> ForwardingEvent {
        ForwardingEvent {
            timestamp: t,
            chan_id_in: ChannelId(cin),
            chan_id_out: ChannelId(cout),
            amt_in_msat: amt_msat + fee_msat,
            amt_out_msat: amt_msat,
            fee_msat,
        }
    }

    const WINDOW: TimeWindow = TimeWindow {
        from: 1000,
        to: 2000,
    };

    #[test]
    fn test_window_is_half_open() {
        assert!(WINDOW.contains(1000));
        assert!(WINDOW.contains(1999));
        assert!(!WINDOW.contains(2000));
        assert!(!WINDOW.contains(999));
    }

    #[test]
    fn test_window_days() {
        let w = TimeWindow::last_days(7 * 86_400, 7);
        assert_eq!(w.from, 0);
        assert!((w.days() - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_aggregate_attributes_fees_outbound() {
        let events = vec![event(1500, 1, 2, 100_000, 250)];
        let stats = aggregate(&events, WINDOW);

        let inbound = &stats[&ChannelId(1)];
        assert_eq!(inbound.forwardings, 1);
        assert_eq!(inbound.forwardings_out, 0);
        assert_eq!(inbound.fee_msat, 0);
        assert_eq!(inbound.total_in_msat, 100_250);

        let outbound = &stats[&ChannelId(2)];
        assert_eq!(outbound.forwardings_out, 1);
        assert_eq!(outbound.fee_msat, 250);
        assert_eq!(outbound.total_out_msat, 100_000);
    }

    #[test]
    fn test_aggregate_filters_window() {
        let events = vec![
            event(500, 1, 2, 100_000, 10),
            event(1500, 1, 2, 100_000, 10),
            event(2000, 1, 2, 100_000, 10),
        ];
        let stats = aggregate(&events, WINDOW);
        assert_eq!(stats[&ChannelId(2)].forwardings_out, 1);
    }

    #[test]
    fn test_aggregate_partition_associative() {
        let events: Vec<ForwardingEvent> = (0..20)
            .map(|i| event(1000 + i * 37, 1 + i % 3, 4 + i % 2, 50_000 + i * 1000, 7 * i))
            .collect();

        let whole = aggregate(&events, WINDOW);

        // Split at an arbitrary point and merge the partial results.
        let (left, right) = events.split_at(7);
        let mut merged = aggregate(left, WINDOW);
        let part = aggregate(right, WINDOW);
        merge_into(&mut merged, &part);

        assert_eq!(whole, merged);
    }

    #[test]
    fn test_aggregate_order_independent() {
        let events: Vec<ForwardingEvent> = (0..10)
            .map(|i| event(1100 + i, 1, 2, 10_000 * (i + 1), 3 * i))
            .collect();
        let mut reversed = events.clone();
        reversed.reverse();
        assert_eq!(aggregate(&events, WINDOW), aggregate(&reversed, WINDOW));
    }

    #[test]
    fn test_flow_range_and_zero_case() {
        assert_eq!(ChannelFlowStats::default().flow(), 0.0);

        let all_out = ChannelFlowStats {
            total_out_msat: 1000,
            ..Default::default()
        };
        assert_eq!(all_out.flow(), 1.0);

        let all_in = ChannelFlowStats {
            total_in_msat: 1000,
            ..Default::default()
        };
        assert_eq!(all_in.flow(), -1.0);

        let mixed = ChannelFlowStats {
            total_in_msat: 250,
            total_out_msat: 750,
            ..Default::default()
        };
        let f = mixed.flow();
        assert!((-1.0..=1.0).contains(&f));
        assert!((f - 0.5).abs() < f64::EPSILON);
    }
}
