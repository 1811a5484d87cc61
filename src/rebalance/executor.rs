//! Drives a validated `RebalancePlan` through repeated payment attempts.
//!
//! The loop is strictly sequential: each attempt consumes real liquidity,
//! so attempt N+1 must observe the outcome of attempt N. Balances are not
//! mutated in memory; the next snapshot collection reflects them.

use std::collections::HashSet;

use log::{info, warn};

use crate::api::AddInvoiceRequest;
use crate::client::{LndClient, SendOutcome};
use crate::error::Error;
use crate::model::{ChannelId, GraphSnapshot};
use crate::rebalance::planner::{self, RouteLimits};
use crate::rebalance::RebalancePlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceStatus {
    Planned,
    Attempting,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RebalanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceStatus::Planned => "planned",
            RebalanceStatus::Attempting => "attempting",
            RebalanceStatus::Succeeded => "succeeded",
            RebalanceStatus::PartiallyFailed => "partially_failed",
            RebalanceStatus::Failed => "failed",
        }
    }
}

/// Structured outcome record for the caller to log and persist.
#[derive(Debug, Clone)]
pub struct RebalanceOutcome {
    pub status: RebalanceStatus,
    pub amount_moved_sat: u64,
    pub fee_paid_msat: u64,
    pub attempts: u32,
    /// Channels of the last route tried (projection in dry-run).
    pub hops: Vec<ChannelId>,
    /// Fee projection of the planned route; only set in dry-run.
    pub projected_fee_msat: Option<u64>,
}

/// Once at least this share of the requested amount has moved, perfect is
/// the enemy of done.
const COMPLETION_REMAINDER: f64 = 0.10;

/// Executes `plan`. Dry-run (reckless = false) reports the route and fee
/// projection without submitting anything; this is the default posture.
///
/// Ok statuses follow the `Planned -> Attempting -> {Succeeded,
/// PartiallyFailed, Failed}` machine. A payment timeout surfaces as
/// `Err(PaymentTimeout)` with progress attached: the in-flight payment may
/// still settle, so it must not be read as a confirmed failure.
pub async fn execute(
    client: &(impl LndClient + Sync),
    graph: &GraphSnapshot,
    block_height: u32,
    plan: &RebalancePlan,
    reckless: bool,
) -> Result<RebalanceOutcome, Error> {
    let total_sat = plan.amount_sat;
    let mut excluded: HashSet<ChannelId> = HashSet::new();
    let mut amount_sat = total_sat;
    let mut moved_sat = 0u64;
    let mut fee_paid_msat = 0u64;
    let mut attempts = 0u32;
    let mut last_hops: Vec<ChannelId> = Vec::new();

    if !reckless {
        let route = planner::find_route(
            graph,
            plan.source,
            plan.target,
            amount_sat * 1000,
            &plan.limits(),
            &excluded,
        )?;
        info!(
            "Dry-run: would move {} sat {} -> {} over {} hops for {} msat (rate {:.6})",
            amount_sat,
            plan.source,
            plan.target,
            route.hops.len(),
            route.total_fee_msat,
            route.fee_rate(),
        );
        return Ok(RebalanceOutcome {
            status: RebalanceStatus::Planned,
            amount_moved_sat: 0,
            fee_paid_msat: 0,
            attempts: 0,
            hops: route.channel_ids(),
            projected_fee_msat: Some(route.total_fee_msat),
        });
    }

    loop {
        if attempts >= plan.max_attempts {
            return finish_exhausted(moved_sat, fee_paid_msat, attempts, last_hops);
        }
        attempts += 1;

        let limits = RouteLimits {
            max_fee_msat: plan.fee_budget_msat.saturating_sub(fee_paid_msat),
            max_fee_rate: plan.max_fee_rate,
            max_hops: plan.max_hops,
        };

        let route = match planner::find_route(
            graph,
            plan.source,
            plan.target,
            amount_sat * 1000,
            &limits,
            &excluded,
        ) {
            Ok(route) => route,
            Err(err @ Error::NoRouteFound { .. }) => {
                let next = (amount_sat as f64 * plan.chunk_fraction) as u64;
                if next < plan.min_chunk_sat {
                    info!(
                        "No route left even for {} sat chunks: {}",
                        amount_sat, err
                    );
                    if moved_sat > 0 {
                        return Ok(outcome(
                            RebalanceStatus::PartiallyFailed,
                            moved_sat,
                            fee_paid_msat,
                            attempts,
                            last_hops,
                        ));
                    }
                    return Err(err);
                }
                info!(
                    "No route for {} sat within fee bounds, retrying with {} sat",
                    amount_sat, next
                );
                amount_sat = next;
                continue;
            }
            Err(e) => return Err(e),
        };

        info!(
            "Attempt {}: {} sat over {} hops, fee {} msat (rate {:.6})",
            attempts,
            amount_sat,
            route.hops.len(),
            route.total_fee_msat,
            route.fee_rate(),
        );

        let invoice = client
            .add_invoice(AddInvoiceRequest {
                value_msat: amount_sat * 1000,
                memo: format!("lndwarden: rebalance {} -> {}", plan.source, plan.target),
                expiry: 600,
            })
            .await?;

        let request = route.to_rpc(&invoice.r_hash, block_height);
        last_hops = route.channel_ids();

        match client.send_to_route(request).await? {
            SendOutcome::Settled { fee_msat } => {
                moved_sat += amount_sat;
                fee_paid_msat += fee_msat;
                let remaining = total_sat - moved_sat;
                info!(
                    "Attempt {} settled: {} sat moved, {} sat remaining, fee so far {} msat",
                    attempts, moved_sat, remaining, fee_paid_msat
                );
                if (remaining as f64) <= total_sat as f64 * COMPLETION_REMAINDER {
                    return Ok(outcome(
                        RebalanceStatus::Succeeded,
                        moved_sat,
                        fee_paid_msat,
                        attempts,
                        last_hops,
                    ));
                }
                amount_sat = remaining;
            }
            SendOutcome::Failed {
                code,
                failure_source_index,
            } => {
                let failed_channel = route.hops.get(failure_source_index).map(|h| h.channel_id);
                warn!(
                    "Attempt {} failed at hop {} ({:?}): {:?}",
                    attempts, failure_source_index, failed_channel, code
                );

                if !code.is_retryable() {
                    return Ok(outcome(
                        terminal_status(moved_sat),
                        moved_sat,
                        fee_paid_msat,
                        attempts,
                        last_hops,
                    ));
                }
                match failed_channel {
                    Some(ch) if ch == plan.source || ch == plan.target => {
                        // Our own channel failed; re-planning cannot route
                        // around it.
                        warn!("Own channel {} failed, giving up", ch);
                        return Ok(outcome(
                            terminal_status(moved_sat),
                            moved_sat,
                            fee_paid_msat,
                            attempts,
                            last_hops,
                        ));
                    }
                    Some(ch) => {
                        excluded.insert(ch);
                    }
                    None => {}
                }
            }
            SendOutcome::Timeout => {
                return Err(Error::PaymentTimeout {
                    amount_moved_sat: moved_sat,
                    attempts,
                });
            }
        }
    }
}

fn outcome(
    status: RebalanceStatus,
    amount_moved_sat: u64,
    fee_paid_msat: u64,
    attempts: u32,
    hops: Vec<ChannelId>,
) -> RebalanceOutcome {
    RebalanceOutcome {
        status,
        amount_moved_sat,
        fee_paid_msat,
        attempts,
        hops,
        projected_fee_msat: None,
    }
}

fn terminal_status(moved_sat: u64) -> RebalanceStatus {
    if moved_sat > 0 {
        RebalanceStatus::PartiallyFailed
    } else {
        RebalanceStatus::Failed
    }
}

fn finish_exhausted(
    moved_sat: u64,
    fee_paid_msat: u64,
    attempts: u32,
    hops: Vec<ChannelId>,
) -> Result<RebalanceOutcome, Error> {
    if moved_sat > 0 {
        Ok(outcome(
            RebalanceStatus::PartiallyFailed,
            moved_sat,
            fee_paid_msat,
            attempts,
            hops,
        ))
    } else {
        Err(Error::TrialsExhausted {
            amount_moved_sat: 0,
            attempts,
        })
    }
}
