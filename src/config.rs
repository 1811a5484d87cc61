use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub fees: FeesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// LND REST endpoint (host:port, no scheme)
    pub rest_host: String,
    /// Path to the admin macaroon (hex-encoded file)
    pub macaroon_path: PathBuf,
    /// Whether to connect over https
    #[serde(default = "default_true")]
    pub secure: bool,
    /// Per-request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Timeout for payment submission (settlement can be slow)
    #[serde(default = "default_payment_timeout")]
    pub payment_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Path to lndwarden's SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Master enable/disable
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Dry-run mode: log decisions but execute nothing
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Control loop interval in seconds
    #[serde(default = "default_loop_interval")]
    pub loop_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Absolute fee budget per rebalance in satoshis
    #[serde(default = "default_max_fee_sat")]
    pub max_fee_sat: u64,
    /// Maximum effective fee rate (total fee / amount)
    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: f64,
    /// Hop-count ceiling for route search
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    /// Maximum payment attempts per rebalance run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Factor by which the amount shrinks when no route fits the fee bounds
    #[serde(default = "default_chunk_fraction")]
    pub chunk_fraction: f64,
    /// Give up once chunks get smaller than this
    #[serde(default = "default_min_chunk_sat")]
    pub min_chunk_sat: u64,
    /// Channels beyond this unbalancedness are rebalance targets
    #[serde(default = "default_unbalanced_threshold")]
    pub unbalanced_threshold: f64,
    /// Extra margin a source must have beyond the negated threshold
    #[serde(default = "default_source_gap")]
    pub source_gap: f64,
    /// Probability of triggering per scheduled tick (0.0 to 1.0)
    #[serde(default = "default_trigger_probability")]
    pub trigger_probability: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Forwarding history window in days
    #[serde(default = "default_window_days")]
    pub window_days: u64,
    /// Target outward forwarding volume in sat per day
    #[serde(default = "default_target_rate")]
    pub target_rate_sat_per_day: f64,
    /// Fee rate multiplier under excess demand
    #[serde(default = "default_excess_rate_factor")]
    pub excess_rate_factor: f64,
    /// Base fee multiplier under excess demand
    #[serde(default = "default_excess_base_factor")]
    pub excess_base_factor: f64,
    /// Fee rate multiplier under deficient demand (two deficient periods
    /// roughly halve the rate)
    #[serde(default = "default_deficit_rate_factor")]
    pub deficit_rate_factor: f64,
    /// Unbalancedness above which a channel counts as depleted
    #[serde(default = "default_depletion_threshold")]
    pub depletion_threshold: f64,
    /// Slope of the depletion nudge
    #[serde(default = "default_depletion_nudge")]
    pub depletion_nudge: f64,
    /// Local balance below this reserve triggers the depletion nudge slope
    #[serde(default = "default_balance_reserve")]
    pub local_balance_reserve_sat: u64,
    #[serde(default = "default_min_base_fee")]
    pub min_base_fee_msat: u64,
    #[serde(default = "default_max_base_fee")]
    pub max_base_fee_msat: u64,
    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate: f64,
    #[serde(default = "default_max_fee_rate_policy")]
    pub max_fee_rate: f64,
    /// Base fee assigned in bootstrap mode
    #[serde(default = "default_bootstrap_base_fee")]
    pub bootstrap_base_fee_msat: u64,
    /// Time-lock delta written with every policy update
    #[serde(default = "default_cltv_delta")]
    pub time_lock_delta: u32,
    /// Channel ids excluded from fee optimization
    #[serde(default)]
    pub exclude: Vec<u64>,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_rpc_timeout() -> u64 {
    30
}
fn default_payment_timeout() -> u64 {
    120
}
fn default_database_path() -> PathBuf {
    PathBuf::from("lndwarden.db")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_loop_interval() -> u64 {
    600
}
fn default_max_fee_sat() -> u64 {
    100
}
fn default_max_fee_rate() -> f64 {
    0.001000
}
fn default_max_hops() -> usize {
    10
}
fn default_max_attempts() -> u32 {
    10
}
fn default_chunk_fraction() -> f64 {
    0.5
}
fn default_min_chunk_sat() -> u64 {
    20_000
}
fn default_unbalanced_threshold() -> f64 {
    0.2
}
fn default_source_gap() -> f64 {
    0.05
}
fn default_trigger_probability() -> f64 {
    0.5
}
fn default_window_days() -> u64 {
    7
}
fn default_target_rate() -> f64 {
    100_000.0 / 7.0
}
fn default_excess_rate_factor() -> f64 {
    1.5
}
fn default_excess_base_factor() -> f64 {
    0.75
}
fn default_deficit_rate_factor() -> f64 {
    std::f64::consts::FRAC_1_SQRT_2
}
fn default_depletion_threshold() -> f64 {
    0.95
}
fn default_depletion_nudge() -> f64 {
    0.05
}
fn default_balance_reserve() -> u64 {
    500_000
}
fn default_min_base_fee() -> u64 {
    0
}
fn default_max_base_fee() -> u64 {
    5000
}
fn default_min_fee_rate() -> f64 {
    0.000005
}
fn default_max_fee_rate_policy() -> f64 {
    0.005000
}
fn default_bootstrap_base_fee() -> u64 {
    1000
}
fn default_cltv_delta() -> u32 {
    40
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            enabled: true,
            dry_run: true,
            loop_interval_secs: default_loop_interval(),
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_fee_sat: default_max_fee_sat(),
            max_fee_rate: default_max_fee_rate(),
            max_hops: default_max_hops(),
            max_attempts: default_max_attempts(),
            chunk_fraction: default_chunk_fraction(),
            min_chunk_sat: default_min_chunk_sat(),
            unbalanced_threshold: default_unbalanced_threshold(),
            source_gap: default_source_gap(),
            trigger_probability: default_trigger_probability(),
        }
    }
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_days: default_window_days(),
            target_rate_sat_per_day: default_target_rate(),
            excess_rate_factor: default_excess_rate_factor(),
            excess_base_factor: default_excess_base_factor(),
            deficit_rate_factor: default_deficit_rate_factor(),
            depletion_threshold: default_depletion_threshold(),
            depletion_nudge: default_depletion_nudge(),
            local_balance_reserve_sat: default_balance_reserve(),
            min_base_fee_msat: default_min_base_fee(),
            max_base_fee_msat: default_max_base_fee(),
            min_fee_rate: default_min_fee_rate(),
            max_fee_rate: default_max_fee_rate_policy(),
            bootstrap_base_fee_msat: default_bootstrap_base_fee(),
            time_lock_delta: default_cltv_delta(),
            exclude: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // Hard limits (non-configurable safety rails)
        const ABS_MAX_FEE_RATE: f64 = 0.05;
        const ABS_MAX_ATTEMPTS: u32 = 50;

        if self.rebalance.max_fee_rate <= 0.0 || self.rebalance.max_fee_rate > ABS_MAX_FEE_RATE {
            anyhow::bail!(
                "rebalance.max_fee_rate ({}) must be in (0, {}]",
                self.rebalance.max_fee_rate,
                ABS_MAX_FEE_RATE
            );
        }
        if self.rebalance.max_attempts == 0 || self.rebalance.max_attempts > ABS_MAX_ATTEMPTS {
            anyhow::bail!(
                "rebalance.max_attempts ({}) must be in [1, {}]",
                self.rebalance.max_attempts,
                ABS_MAX_ATTEMPTS
            );
        }
        if self.rebalance.chunk_fraction <= 0.0 || self.rebalance.chunk_fraction >= 1.0 {
            anyhow::bail!("rebalance.chunk_fraction must be between 0 and 1 exclusive");
        }
        if self.rebalance.trigger_probability < 0.0 || self.rebalance.trigger_probability > 1.0 {
            anyhow::bail!("rebalance.trigger_probability must be between 0.0 and 1.0");
        }
        if self.rebalance.unbalanced_threshold <= 0.0 || self.rebalance.unbalanced_threshold >= 1.0
        {
            anyhow::bail!("rebalance.unbalanced_threshold must be between 0 and 1 exclusive");
        }
        if self.rebalance.max_hops < 2 {
            anyhow::bail!("rebalance.max_hops must allow at least the two own channels");
        }
        if self.fees.window_days == 0 {
            anyhow::bail!("fees.window_days must be at least 1");
        }
        if self.fees.min_fee_rate > self.fees.max_fee_rate {
            anyhow::bail!("fees.min_fee_rate > fees.max_fee_rate");
        }
        if self.fees.min_base_fee_msat > self.fees.max_base_fee_msat {
            anyhow::bail!("fees.min_base_fee_msat > fees.max_base_fee_msat");
        }
        if self.fees.depletion_threshold <= 0.0 || self.fees.depletion_threshold >= 1.0 {
            anyhow::bail!("fees.depletion_threshold must be between 0 and 1 exclusive");
        }
        if self.fees.excess_rate_factor <= 1.0 {
            anyhow::bail!("fees.excess_rate_factor must be greater than 1");
        }
        if self.fees.deficit_rate_factor <= 0.0 || self.fees.deficit_rate_factor >= 1.0 {
            anyhow::bail!("fees.deficit_rate_factor must be between 0 and 1 exclusive");
        }
        if !self.server.macaroon_path.exists() {
            anyhow::bail!(
                "macaroon not found at: {}",
                self.server.macaroon_path.display()
            );
        }
        Ok(())
    }

    /// Create a config with all defaults for testing purposes.
    /// The macaroon path is set to the provided path (must exist for validation).
    #[cfg(test)]
    pub fn test_default(macaroon_path: std::path::PathBuf) -> Self {
        Self {
            server: ServerConfig {
                rest_host: "localhost:8080".to_string(),
                macaroon_path,
                secure: true,
                rpc_timeout_secs: default_rpc_timeout(),
                payment_timeout_secs: default_payment_timeout(),
            },
            general: GeneralConfig::default(),
            rebalance: RebalanceConfig::default(),
            fees: FeesConfig::default(),
        }
    }
}
