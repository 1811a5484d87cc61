pub mod controller;
pub mod setter;

use log::{debug, info};

use crate::client::{fetch_forwarding_events, LndClient};
use crate::config::Config;
use crate::db::Database;
use crate::demand::{self, TimeWindow};
use crate::error::Error;
use crate::fees::controller::FeeAdjustment;
use crate::state::NodeState;

/// Computes proposed fee adjustments for all eligible channels. Pure with
/// respect to daemon state: nothing is applied here.
pub async fn propose(
    config: &Config,
    client: &(impl LndClient + Sync),
    state: &NodeState,
    bootstrap: bool,
) -> Result<Vec<FeeAdjustment>, Error> {
    let cfg = &config.fees;
    let now = chrono::Utc::now().timestamp() as u64;
    let window = TimeWindow::last_days(now, cfg.window_days);

    let events = fetch_forwarding_events(client, window)
        .await
        .map_err(|e| Error::DataUnavailable {
            context: format!("forwardinghistory: {e:#}"),
        })?;
    let stats = demand::aggregate(&events, window);

    let mut adjustments = Vec::new();
    for channel in state.active_channels() {
        if cfg.exclude.contains(&channel.id.0) {
            info!("Fee optimization: channel {} excluded by config", channel.id);
            continue;
        }
        let channel_stats = stats.get(&channel.id);
        let adjustment =
            controller::propose(cfg, channel, channel_stats, window.days(), bootstrap);

        let s = channel_stats.copied().unwrap_or_default();
        info!(
            "Fee optimization: channel {} ub: {:.2} flow: {:.2} out: {} sat in: {} sat \
             nfwd: {} -> rate {:.6} -> {:.6} (factor {:.3}), base {} -> {} (factor {:.3})",
            channel.id,
            channel.unbalancedness(),
            s.flow(),
            s.total_out_msat / 1000,
            s.total_in_msat / 1000,
            s.forwardings,
            adjustment.old_fee_rate,
            adjustment.new_fee_rate,
            adjustment.rate_factor,
            adjustment.old_base_fee_msat,
            adjustment.new_base_fee_msat,
            adjustment.base_factor,
        );
        adjustments.push(adjustment);
    }
    Ok(adjustments)
}

/// Confirm step: submits the proposed adjustments through the set-policy
/// capability (a no-op under dry-run) and records them.
pub async fn apply(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &Database,
    state: &NodeState,
    adjustments: &[FeeAdjustment],
) -> anyhow::Result<()> {
    for adjustment in adjustments {
        let Some(channel) = state.channel(adjustment.channel_id) else {
            debug!(
                "Fee setter: channel {} vanished between propose and apply",
                adjustment.channel_id
            );
            continue;
        };
        setter::apply_if_changed(config, client, db, channel, adjustment).await?;
    }
    Ok(())
}

/// Daemon-mode entry: propose and apply in one cycle.
pub async fn run(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &Database,
    state: &NodeState,
) -> anyhow::Result<()> {
    if state.active_channels().next().is_none() {
        debug!("Fee optimization: no active channels");
        return Ok(());
    }
    let adjustments = propose(config, client, state, false).await?;
    apply(config, client, db, state, &adjustments).await
}
