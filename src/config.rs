//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files, with `.env` and
//! environment variable overrides for the broker settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub paper: PaperConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env()?;
        Ok(config)
    }

    /// Override settings from `.env` / the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        dotenv::dotenv().ok();

        if let Ok(rebuild) = std::env::var("OMS_REBUILD") {
            self.broker.rebuild = parse_flag(&rebuild)
                .with_context(|| format!("OMS_REBUILD must be a boolean, got '{}'", rebuild))?;
        }
        if let Ok(mult) = std::env::var("OMS_COMMISSION_MULT") {
            self.broker.commission_multiplier = mult
                .trim()
                .parse()
                .with_context(|| format!("OMS_COMMISSION_MULT must be a number, got '{}'", mult))?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Rebuild orders and positions from the terminal on start
    pub rebuild: bool,
    /// Multiplier applied to fill values
    pub commission_multiplier: f64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            rebuild: true,
            commission_multiplier: 1.0,
        }
    }
}

impl BrokerConfig {
    pub fn with_rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_commission_multiplier(mut self, multiplier: f64) -> Self {
        self.commission_multiplier = multiplier;
        self
    }
}

/// Paper terminal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    pub balance: f64,
    pub equity: f64,
    /// First ticket handed out for created orders
    pub first_ticket: u64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        PaperConfig {
            balance: 10_000.0,
            equity: 10_000.0,
            first_ticket: 1000,
        }
    }
}

impl PaperConfig {
    pub fn with_balance(mut self, balance: f64) -> Self {
        self.balance = balance;
        self.equity = balance;
        self
    }

    pub fn with_first_ticket(mut self, ticket: u64) -> Self {
        self.first_ticket = ticket;
        self
    }
}
