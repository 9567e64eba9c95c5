// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default backend URL.
pub const DEFAULT_URL: &str = "https://acpx.virtuals.io";
/// Default poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 15_000;
/// Lower bound on the poll interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 2_000;
/// Default active-jobs page size.
pub const DEFAULT_POLL_PAGE_SIZE: u32 = 50;
/// Upper bound on the active-jobs page size.
pub const MAX_POLL_PAGE_SIZE: u32 = 200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised when a required setting is absent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("required environment variable {name} is not set")]
    MissingVar {
        /// Variable name.
        name: &'static str,
    },
}

// ---------------------------------------------------------------------------
// SellerConfig
// ---------------------------------------------------------------------------

/// Runtime settings for the seller process.
#[derive(Debug, Clone, PartialEq)]
pub struct SellerConfig {
    /// Backend base URL (`ACP_URL`).
    pub base_url: String,

    /// Static API key for the backend (`ACP_API_KEY`).
    pub api_key: Option<String>,

    /// Wallet address override (`ACP_WALLET_ADDRESS`); when absent the
    /// supervisor resolves it from the backend's agent-info endpoint.
    pub wallet_address: Option<String>,

    /// Whether the poll reconciler runs at all (`ACP_SELLER_POLL`, "0"
    /// disables).
    pub poll_enabled: bool,

    /// Poll interval (`ACP_SELLER_POLL_INTERVAL_MS`, clamped to the minimum).
    pub poll_interval: Duration,

    /// Active-jobs page size (`ACP_SELLER_POLL_PAGE_SIZE`, clamped to
    /// `[1, 200]`).
    pub poll_page_size: u32,

    /// Delivery-root override (`ACP_DELIVERY_ROOT`).
    pub delivery_root: Option<PathBuf>,

    /// Root directory holding `<offering>/offering.json` configs
    /// (`ACP_OFFERINGS_ROOT`).
    pub offerings_root: PathBuf,

    /// Persistent config store holding the PID file (`ACP_CONFIG_DIR`).
    pub config_dir: PathBuf,

    /// PagerDuty routing key (`PAGERDUTY_ROUTING_KEY`); absent means
    /// operational alerting is a no-op.
    pub pagerduty_routing_key: Option<String>,
}

impl Default for SellerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_URL.to_string(),
            api_key: None,
            wallet_address: None,
            poll_enabled: true,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_page_size: DEFAULT_POLL_PAGE_SIZE,
            delivery_root: None,
            offerings_root: PathBuf::from("offerings"),
            config_dir: default_config_dir(),
            pagerduty_routing_key: None,
        }
    }
}

impl SellerConfig {
    /// Load settings from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary lookup. Exists so tests do not
    /// have to mutate the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(url) = nonempty(lookup("ACP_URL")) {
            cfg.base_url = url.trim_end_matches('/').to_string();
        }
        cfg.api_key = nonempty(lookup("ACP_API_KEY"));
        cfg.wallet_address = nonempty(lookup("ACP_WALLET_ADDRESS"));
        cfg.poll_enabled = lookup("ACP_SELLER_POLL").as_deref().map_or(true, |v| v.trim() != "0");

        let interval_ms = parse_or_default(
            "ACP_SELLER_POLL_INTERVAL_MS",
            lookup("ACP_SELLER_POLL_INTERVAL_MS"),
            DEFAULT_POLL_INTERVAL_MS,
        )
        .max(MIN_POLL_INTERVAL_MS);
        cfg.poll_interval = Duration::from_millis(interval_ms);

        cfg.poll_page_size = parse_or_default(
            "ACP_SELLER_POLL_PAGE_SIZE",
            lookup("ACP_SELLER_POLL_PAGE_SIZE"),
            DEFAULT_POLL_PAGE_SIZE,
        )
        .clamp(1, MAX_POLL_PAGE_SIZE);

        cfg.delivery_root = nonempty(lookup("ACP_DELIVERY_ROOT")).map(PathBuf::from);
        if let Some(root) = nonempty(lookup("ACP_OFFERINGS_ROOT")) {
            cfg.offerings_root = PathBuf::from(root);
        }
        if let Some(dir) = nonempty(lookup("ACP_CONFIG_DIR")) {
            cfg.config_dir = PathBuf::from(dir);
        }
        cfg.pagerduty_routing_key = nonempty(lookup("PAGERDUTY_ROUTING_KEY"));

        cfg
    }

    /// The API key, or an error naming the missing variable.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingVar { name: "ACP_API_KEY" })
    }
}

fn default_config_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => PathBuf::from(home).join(".acp-seller"),
        _ => PathBuf::from(".acp-seller"),
    }
}

fn nonempty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_or_default<T: std::str::FromStr + Copy + std::fmt::Display>(
    name: &str,
    raw: Option<String>,
    default: T,
) -> T {
    match raw {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    target: "acp.config",
                    var = name,
                    value = %raw,
                    fallback = %default,
                    "unparseable numeric setting, using default"
                );
                default
            }
        },
    }
}
