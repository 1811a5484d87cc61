use anyhow::Context;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use crate::api::*;
use crate::config::Config;
use crate::demand::{ForwardingEvent, TimeWindow};

/// Outcome of a route submission. A timeout is inconclusive: the payment
/// may still settle out-of-band, so it is kept distinct from a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Settled { fee_msat: u64 },
    Failed { code: FailureCode, failure_source_index: usize },
    Timeout,
}

/// Trait abstracting the LND API surface used by lndwarden.
///
/// This enables mock-based integration testing without a live node.
#[async_trait::async_trait]
pub trait LndClient: Send + Sync {
    async fn get_info(&self) -> anyhow::Result<GetInfoResponse>;
    async fn list_channels(&self) -> anyhow::Result<ListChannelsResponse>;
    async fn fee_report(&self) -> anyhow::Result<FeeReportResponse>;
    async fn describe_graph(&self) -> anyhow::Result<DescribeGraphResponse>;
    async fn forwarding_history(
        &self,
        request: ForwardingHistoryRequest,
    ) -> anyhow::Result<ForwardingHistoryResponse>;
    async fn add_invoice(&self, request: AddInvoiceRequest) -> anyhow::Result<AddInvoiceResponse>;
    /// Submitted exactly once; never retried at this layer.
    async fn send_to_route(&self, request: SendToRouteRequest) -> anyhow::Result<SendOutcome>;
    async fn update_channel_policy(
        &self,
        request: UpdateChanPolicyRequest,
    ) -> anyhow::Result<()>;
}

/// Fetches all forwarding events in `window`, following LND's offset
/// pagination.
pub async fn fetch_forwarding_events(
    client: &(impl LndClient + Sync),
    window: TimeWindow,
) -> anyhow::Result<Vec<ForwardingEvent>> {
    const PAGE_SIZE: u32 = 5000;
    let mut events = Vec::new();
    let mut index_offset = 0u32;

    loop {
        let resp = client
            .forwarding_history(ForwardingHistoryRequest {
                start_time: window.from,
                end_time: window.to,
                index_offset,
                num_max_events: PAGE_SIZE,
            })
            .await?;

        events.extend(resp.forwarding_events.iter().map(ForwardingEvent::from));

        if resp.forwarding_events.len() < PAGE_SIZE as usize {
            break;
        }
        index_offset = resp.last_offset_index;
    }

    debug!("Fetched {} forwarding events", events.len());
    Ok(events)
}

/// Rate-limited, retrying REST client for LND.
///
/// Only idempotent reads are retried; payment submission and policy updates
/// go out exactly once.
pub struct LndRestClient {
    http: reqwest::Client,
    base_url: String,
    macaroon_hex: String,
    payment_timeout: Duration,
    /// Semaphore for rate limiting (1 concurrent request)
    rate_limiter: Arc<Semaphore>,
}

const MAX_RETRIES: u32 = 3;
const RETRY_BASE_MS: u64 = 1000;
const RATE_LIMIT_DELAY_MS: u64 = 100;

impl LndRestClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let macaroon_hex = std::fs::read_to_string(&config.server.macaroon_path)
            .with_context(|| {
                format!(
                    "Failed to read macaroon at {}",
                    config.server.macaroon_path.display()
                )
            })?
            .trim()
            .to_string();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.server.rpc_timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to build http client")?;

        let scheme = if config.server.secure { "https" } else { "http" };
        Ok(Self {
            http,
            base_url: format!("{}://{}", scheme, config.server.rest_host),
            macaroon_hex,
            payment_timeout: Duration::from_secs(config.server.payment_timeout_secs),
            rate_limiter: Arc::new(Semaphore::new(1)),
        })
    }

    async fn rate_limit(&self) -> anyhow::Result<()> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("Rate limiter semaphore closed"))?;
        sleep(Duration::from_millis(RATE_LIMIT_DELAY_MS)).await;
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        for attempt in 0..MAX_RETRIES {
            self.rate_limit().await?;
            let result = self
                .http
                .get(format!("{}{}", self.base_url, path))
                .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
                .send()
                .await;

            match result {
                Ok(resp) => match resp.error_for_status() {
                    Ok(resp) => {
                        debug!("GET {}: success", path);
                        return resp.json::<T>().await.context("Failed to decode response");
                    }
                    Err(e) => {
                        if attempt < MAX_RETRIES - 1 {
                            let delay = RETRY_BASE_MS * 2u64.pow(attempt);
                            warn!(
                                "GET {}: attempt {} failed ({}), retrying in {}ms",
                                path,
                                attempt + 1,
                                e,
                                delay
                            );
                            sleep(Duration::from_millis(delay)).await;
                        } else {
                            return Err(anyhow::anyhow!(
                                "GET {}: all {} attempts failed: {}",
                                path,
                                MAX_RETRIES,
                                e
                            ));
                        }
                    }
                },
                Err(e) => {
                    if attempt < MAX_RETRIES - 1 {
                        let delay = RETRY_BASE_MS * 2u64.pow(attempt);
                        warn!(
                            "GET {}: attempt {} failed ({}), retrying in {}ms",
                            path,
                            attempt + 1,
                            e,
                            delay
                        );
                        sleep(Duration::from_millis(delay)).await;
                    } else {
                        return Err(anyhow::anyhow!(
                            "GET {}: all {} attempts failed: {}",
                            path,
                            MAX_RETRIES,
                            e
                        ));
                    }
                }
            }
        }
        unreachable!()
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<T, reqwest::Error> {
        let mut req = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("Grpc-Metadata-macaroon", &self.macaroon_hex)
            .json(body);
        if let Some(t) = timeout {
            req = req.timeout(t);
        }
        let resp = req.send().await?;
        resp.error_for_status()?.json::<T>().await
    }
}

#[async_trait::async_trait]
impl LndClient for LndRestClient {
    async fn get_info(&self) -> anyhow::Result<GetInfoResponse> {
        self.get_json("/v1/getinfo").await
    }

    async fn list_channels(&self) -> anyhow::Result<ListChannelsResponse> {
        self.get_json("/v1/channels").await
    }

    async fn fee_report(&self) -> anyhow::Result<FeeReportResponse> {
        self.get_json("/v1/fees").await
    }

    async fn describe_graph(&self) -> anyhow::Result<DescribeGraphResponse> {
        self.get_json("/v1/graph").await
    }

    async fn forwarding_history(
        &self,
        request: ForwardingHistoryRequest,
    ) -> anyhow::Result<ForwardingHistoryResponse> {
        self.rate_limit().await?;
        self.post_json("/v1/switch", &request, None)
            .await
            .context("ForwardingHistory failed")
    }

    async fn add_invoice(&self, request: AddInvoiceRequest) -> anyhow::Result<AddInvoiceResponse> {
        self.rate_limit().await?;
        self.post_json("/v1/invoices", &request, None)
            .await
            .context("AddInvoice failed")
    }

    async fn send_to_route(&self, request: SendToRouteRequest) -> anyhow::Result<SendOutcome> {
        self.rate_limit().await?;
        let fee_msat = request.route.total_fees_msat;
        let result: Result<SendToRouteResponse, reqwest::Error> = self
            .post_json("/v2/router/route/send", &request, Some(self.payment_timeout))
            .await;

        match result {
            Ok(resp) => match resp.status.as_str() {
                "SUCCEEDED" => Ok(SendOutcome::Settled { fee_msat }),
                "FAILED" => {
                    let failure = resp.failure.unwrap_or_default();
                    Ok(SendOutcome::Failed {
                        code: FailureCode::from_wire(&failure.code),
                        failure_source_index: failure.failure_source_index as usize,
                    })
                }
                // Still in flight when the response came back: inconclusive.
                _ => Ok(SendOutcome::Timeout),
            },
            Err(e) if e.is_timeout() => Ok(SendOutcome::Timeout),
            Err(e) => Err(anyhow::anyhow!("SendToRoute failed: {}", e)),
        }
    }

    async fn update_channel_policy(
        &self,
        request: UpdateChanPolicyRequest,
    ) -> anyhow::Result<()> {
        self.rate_limit().await?;
        let _: serde_json::Value = self
            .post_json("/v1/chanpolicy", &request, None)
            .await
            .context("UpdateChanPolicy failed")?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Mock client for integration testing
// ---------------------------------------------------------------------------
