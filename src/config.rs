use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{BatchId, BPS_DENOMINATOR};

/// Longest accepted batch interval (ten years)
pub const MAX_INVESTMENT_INTERVAL_SECS: u64 = 10 * 366 * 86_400;

/// Decimal places allowed in `rewards.floor_ratio`
pub const MAX_FLOOR_RATIO_SCALE: u32 = 18;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub protocol: ProtocolConfig,
    pub execution: ExecutionConfig,
    pub rewards: RewardConfig,
    #[serde(default)]
    pub keeper: KeeperConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// How first-time depositors are placed into batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAssignment {
    /// Fixed set of `batch_count` batches, join the one with the fewest members
    FewestMembers,
    /// Fill the open batch up to `batch_capacity`, then open a new one
    Capacity,
}

impl Default for BatchAssignment {
    fn default() -> Self {
        Self::Capacity
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Minimum deposit and default per-cycle invest amount (funding asset units)
    pub min_deposit: u64,
    /// Seconds that must pass between two executions of the same batch
    pub investment_interval_secs: u64,
    #[serde(default)]
    pub batch_assignment: BatchAssignment,
    /// Number of batches for the fewest-members policy
    #[serde(default = "default_batch_count")]
    pub batch_count: u64,
    /// Members per batch for the capacity policy
    #[serde(default = "default_batch_capacity")]
    pub batch_capacity: usize,
}

fn default_batch_count() -> u64 {
    1
}

fn default_batch_capacity() -> usize {
    100
}

/// Who receives the rounding remainder of a pro-rata split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DustRecipient {
    /// The keeper that triggered the execution
    Caller,
    /// The last included member in batch order
    LastMember,
}

impl Default for DustRecipient {
    fn default() -> Self {
        Self::Caller
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Maximum tolerated shortfall versus the oracle quote, in bps
    pub max_slippage_bps: u32,
    /// Keeper incentive skimmed from the swap output when the caller is not a member, in bps
    #[serde(default)]
    pub caller_incentive_bps: u32,
    /// Protocol fee skimmed into the reserve, in bps
    #[serde(default)]
    pub protocol_fee_bps: u32,
    #[serde(default)]
    pub dust_recipient: DustRecipient,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    /// Age at which receipts become redeemable
    pub min_age_days: u32,
    /// Age at which the full ratio is reached
    pub max_age_days: u32,
    /// Ratio paid at exactly `min_age_days` (e.g., 0.40)
    pub floor_ratio: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// Identity the keeper triggers executions as
    #[serde(default = "default_keeper_identity")]
    pub identity: String,
    /// Batches to watch (empty = all)
    #[serde(default)]
    pub batch_ids: Vec<BatchId>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Attempts per batch for retryable adapter failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_keeper_identity() -> String {
    "keeper".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10_800 // every 3 hours
}

fn default_max_retries() -> u8 {
    5
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            identity: default_keeper_identity(),
            batch_ids: Vec::new(),
            poll_interval_secs: default_poll_interval_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PersistenceConfig {
    /// Where ledger snapshots are written (disabled when unset)
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("protocol.min_deposit", 1_000_000u64)?
            .set_default("protocol.investment_interval_secs", 86_400u64)?
            .set_default("execution.max_slippage_bps", 100u64)?
            .set_default("rewards.min_age_days", 30u64)?
            .set_default("rewards.max_age_days", 180u64)?
            .set_default("rewards.floor_ratio", "0.40")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DCAE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (DCAE_PROTOCOL__MIN_DEPOSIT, etc.)
            .add_source(
                Environment::with_prefix("DCAE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config() -> Self {
        use rust_decimal_macros::dec;

        Self {
            protocol: ProtocolConfig {
                min_deposit: 1_000_000, // 1 USDC at 6 decimals
                investment_interval_secs: 86_400,
                batch_assignment: BatchAssignment::Capacity,
                batch_count: 1,
                batch_capacity: 100,
            },
            execution: ExecutionConfig {
                max_slippage_bps: 100,
                caller_incentive_bps: 10,
                protocol_fee_bps: 30,
                dust_recipient: DustRecipient::Caller,
            },
            rewards: RewardConfig {
                min_age_days: 30,
                max_age_days: 180,
                floor_ratio: dec!(0.40),
            },
            keeper: KeeperConfig::default(),
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.protocol.min_deposit == 0 {
            errors.push("min_deposit must be positive".to_string());
        }

        if self.protocol.investment_interval_secs > MAX_INVESTMENT_INTERVAL_SECS {
            errors.push(format!(
                "investment_interval_secs must not exceed {MAX_INVESTMENT_INTERVAL_SECS}"
            ));
        }

        match self.protocol.batch_assignment {
            BatchAssignment::FewestMembers if self.protocol.batch_count == 0 => {
                errors.push("batch_count must be positive for fewest_members".to_string());
            }
            BatchAssignment::Capacity if self.protocol.batch_capacity == 0 => {
                errors.push("batch_capacity must be positive for capacity".to_string());
            }
            _ => {}
        }

        if self.execution.max_slippage_bps > BPS_DENOMINATOR {
            errors.push("max_slippage_bps must not exceed 10000".to_string());
        }

        let skimmed = u64::from(self.execution.caller_incentive_bps)
            + u64::from(self.execution.protocol_fee_bps);
        if skimmed > u64::from(BPS_DENOMINATOR) {
            errors.push(format!(
                "caller_incentive_bps + protocol_fee_bps = {skimmed} exceeds 10000"
            ));
        }

        if self.rewards.max_age_days <= self.rewards.min_age_days {
            errors.push("max_age_days must be greater than min_age_days".to_string());
        }

        if self.rewards.floor_ratio < Decimal::ZERO || self.rewards.floor_ratio > Decimal::ONE {
            errors.push("floor_ratio must be between 0 and 1".to_string());
        }
        if self.rewards.floor_ratio.normalize().scale() > MAX_FLOOR_RATIO_SCALE {
            errors.push(format!(
                "floor_ratio must have at most {MAX_FLOOR_RATIO_SCALE} decimal places"
            ));
        }

        if self.keeper.poll_interval_secs > MAX_INVESTMENT_INTERVAL_SECS {
            errors.push(format!(
                "keeper.poll_interval_secs must not exceed {MAX_INVESTMENT_INTERVAL_SECS}"
            ));
        }

        if self.keeper.max_retries == 0 {
            errors.push("keeper.max_retries must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
