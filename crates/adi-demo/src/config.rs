//! Application configuration.

use crate::error::{AppError, AppResult};
use adi_core::{AccountId, DataDefinition, InstrumentId};
use adi_feed::ServiceConfig;
use serde::{Deserialize, Serialize};

/// Simulated gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Exercise ticks from open to first snapshot. Default: 3.
    #[serde(default = "default_sync_ticks")]
    pub sync_ticks: u32,
    /// Accounts visible to the session. Account-scoped feeds of any other
    /// account are rejected.
    #[serde(default = "default_accounts")]
    pub accounts: Vec<AccountId>,
    /// Records per non-account snapshot. Default: 5.
    #[serde(default = "default_records_per_feed")]
    pub records_per_feed: usize,
}

fn default_sync_ticks() -> u32 {
    3
}

fn default_accounts() -> Vec<AccountId> {
    vec![AccountId::new("A-1001"), AccountId::new("A-1002")]
}

fn default_records_per_feed() -> usize {
    5
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sync_ticks: default_sync_ticks(),
            accounts: default_accounts(),
            records_per_feed: default_records_per_feed(),
        }
    }
}

/// Demo configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Account looked up through the brokerage account list.
    #[serde(default = "default_account")]
    pub account: AccountId,
    /// Give up on an incubation after this long (ms). Default: 5,000.
    #[serde(default = "default_incubation_timeout_ms")]
    pub incubation_timeout_ms: u64,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
    /// Feeds incubated one by one.
    #[serde(default = "default_definitions")]
    pub definitions: Vec<DataDefinition>,
}

fn default_account() -> AccountId {
    AccountId::new("A-1001")
}

fn default_definitions() -> Vec<DataDefinition> {
    vec![
        DataDefinition::depth(InstrumentId::new("BHP", "ASX")),
        DataDefinition::trades(InstrumentId::new("BHP", "ASX")),
        DataDefinition::orders(default_account()),
    ]
}

fn default_incubation_timeout_ms() -> u64 {
    5_000
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            simulator: SimulatorConfig::default(),
            account: default_account(),
            definitions: default_definitions(),
            incubation_timeout_ms: default_incubation_timeout_ms(),
        }
    }
}

impl DemoConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.service.exercise_interval_ms == 0 {
            return Err(AppError::Config(
                "service.exercise_interval_ms must be positive".to_string(),
            ));
        }
        if self.definitions.is_empty() {
            return Err(AppError::Config("definitions must not be empty".to_string()));
        }
        if self.incubation_timeout_ms == 0 {
            return Err(AppError::Config(
                "incubation_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
