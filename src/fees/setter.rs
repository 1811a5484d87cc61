use log::{debug, info};

use crate::api::{ChanPoint, UpdateChanPolicyRequest};
use crate::client::LndClient;
use crate::config::Config;
use crate::db::Database;
use crate::fees::controller::FeeAdjustment;
use crate::model::Channel;

/// Applies a fee adjustment to a channel, but only if it differs from the
/// current policy. Dry-run reports and returns.
pub async fn apply_if_changed(
    config: &Config,
    client: &(impl LndClient + Sync),
    db: &Database,
    channel: &Channel,
    adjustment: &FeeAdjustment,
) -> anyhow::Result<()> {
    let unchanged = adjustment.new_base_fee_msat == adjustment.old_base_fee_msat
        && (adjustment.new_fee_rate - adjustment.old_fee_rate).abs() < 1e-9;
    if unchanged {
        debug!(
            "Fee setter: channel {} unchanged (base={}msat, rate={:.6})",
            channel.id, adjustment.new_base_fee_msat, adjustment.new_fee_rate
        );
        return Ok(());
    }

    info!(
        "Fee setter: channel {} with {} -- base: {}->{}msat, rate: {:.6}->{:.6}{}",
        channel.id,
        channel.remote_pubkey,
        adjustment.old_base_fee_msat,
        adjustment.new_base_fee_msat,
        adjustment.old_fee_rate,
        adjustment.new_fee_rate,
        if adjustment.clamped { " (clamped)" } else { "" },
    );

    if config.general.dry_run {
        info!("  (dry-run: not applying)");
        return Ok(());
    }

    let chan_point = ChanPoint::parse(&channel.channel_point).ok_or_else(|| {
        anyhow::anyhow!(
            "channel {} has unparsable channel point {}",
            channel.id,
            channel.channel_point
        )
    })?;

    client
        .update_channel_policy(UpdateChanPolicyRequest {
            chan_point,
            base_fee_msat: adjustment.new_base_fee_msat,
            fee_rate: adjustment.new_fee_rate,
            time_lock_delta: config.fees.time_lock_delta,
        })
        .await?;

    db.record_fee_adjustment(
        channel.id.0,
        adjustment.old_base_fee_msat,
        adjustment.new_base_fee_msat,
        adjustment.old_fee_rate,
        adjustment.new_fee_rate,
        adjustment.clamped,
        chrono::Utc::now().timestamp(),
    )?;

    Ok(())
}
