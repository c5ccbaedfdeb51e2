//! Configuration management for the issuance service
//!
//! Loads configuration from environment variables with defaults matching the
//! production deployment.

use anyhow::{Context, Result};
use khqr_common::Currency;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::payload::MerchantProfile;

/// Accounts allowed to issue codes when `ALLOWED_ACCOUNT_IDS` is not set
pub const DEFAULT_ALLOWED_ACCOUNTS: &[&str] = &[
    "sotheasok@aclb",
    "nimol_nhen@trmc",
    "sao_meas@aclb",
    "rithsender@aclb",
    "rithsender@trmc",
    "chhunlichhean_kun@wing",
    "ouch_nhel@trmc",
    "meng_vathana1@aclb",
];

pub const DEFAULT_STATUS_URL: &str = "https://api-bakong.nbc.gov.kh/v1/check_transaction_by_md5";

/// Where issued bill numbers are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerBackend {
    File,
    Redis,
}

impl std::str::FromStr for LedgerBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(LedgerBackend::File),
            "redis" => Ok(LedgerBackend::Redis),
            other => anyhow::bail!("Unknown LEDGER_BACKEND: {}", other),
        }
    }
}

/// Where the emblem image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmblemSource {
    None,
    Path(PathBuf),
    Url(String),
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,

    /// Base of image URLs in responses; derived from the Host header when unset
    pub public_base_url: Option<String>,

    pub ledger_backend: LedgerBackend,
    pub ledger_path: PathBuf,
    pub redis_url: String,

    /// Directory holding rendered images
    pub image_dir: PathBuf,

    pub allowed_accounts: Vec<String>,

    /// Bearer tokens for the status API
    pub access_tokens: Vec<String>,
    pub status_url: String,
    pub status_timeout: Duration,

    pub emblem: EmblemSource,
    pub emblem_timeout: Duration,

    pub bill_prefix: String,
    pub merchant: MerchantProfile,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        let defaults = MerchantProfile::default();

        let emblem = match (optional_var("EMBLEM_PATH"), optional_var("EMBLEM_URL")) {
            (Some(path), _) => EmblemSource::Path(path.into()),
            (None, Some(url)) => EmblemSource::Url(url),
            (None, None) => EmblemSource::None,
        };

        let config = Config {
            api_host: var_or("API_HOST", "0.0.0.0"),

            api_port: var_or("API_PORT", "3008")
                .parse()
                .context("Invalid API_PORT")?,

            public_base_url: optional_var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string()),

            ledger_backend: var_or("LEDGER_BACKEND", "file").parse()?,
            ledger_path: var_or("LEDGER_PATH", "./tran.log").into(),
            redis_url: var_or("REDIS_URL", "redis://127.0.0.1:6379"),

            image_dir: var_or("IMAGE_DIR", "./image").into(),

            allowed_accounts: match optional_var("ALLOWED_ACCOUNT_IDS") {
                Some(list) => parse_list(&list),
                None => DEFAULT_ALLOWED_ACCOUNTS.iter().map(|s| s.to_string()).collect(),
            },

            access_tokens: parse_list(&var_or("BAKONG_ACCESS_TOKENS", "")),
            status_url: var_or("STATUS_URL", DEFAULT_STATUS_URL),
            status_timeout: Duration::from_secs(
                var_or("STATUS_TIMEOUT_SECS", "15")
                    .parse()
                    .context("Invalid STATUS_TIMEOUT_SECS")?,
            ),

            emblem,
            emblem_timeout: Duration::from_secs(
                var_or("EMBLEM_TIMEOUT_SECS", "5")
                    .parse()
                    .context("Invalid EMBLEM_TIMEOUT_SECS")?,
            ),

            bill_prefix: var_or("BILL_PREFIX", "NV"),
            merchant: MerchantProfile {
                city: var_or("MERCHANT_CITY", &defaults.city),
                merchant_id: var_or("MERCHANT_ID", &defaults.merchant_id),
                acquiring_bank: var_or("ACQUIRING_BANK", &defaults.acquiring_bank),
                store_label: var_or("STORE_LABEL", &defaults.store_label),
                currency: var_or("CURRENCY", "USD")
                    .parse::<Currency>()
                    .context("Invalid CURRENCY")?,
            },
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.access_tokens.is_empty() {
            anyhow::bail!("BAKONG_ACCESS_TOKENS must contain at least one token");
        }

        if self.allowed_accounts.is_empty() {
            anyhow::bail!("ALLOWED_ACCOUNT_IDS must contain at least one account");
        }

        if self.bill_prefix.is_empty() || !self.bill_prefix.bytes().all(|b| b.is_ascii_alphabetic())
        {
            anyhow::bail!("BILL_PREFIX must be alphabetic");
        }

        if self.status_timeout.is_zero() || self.emblem_timeout.is_zero() {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Comma-separated list, blanks dropped
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
