// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! acp-offering
#![deny(unsafe_code)]
#![warn(missing_docs)]

use acp_core::{ExecuteJobResult, FundsRequest, JobContext, Validation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Config file name expected inside each offering directory.
pub const CONFIG_FILE: &str = "offering.json";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while resolving an offering by logical name.
#[derive(Debug, thiserror::Error)]
pub enum OfferingError {
    /// No directory or config matched the requested name.
    #[error("offering '{name}' not found under {root}")]
    NotFound {
        /// Requested logical name.
        name: String,
        /// Offerings root that was searched.
        root: PathBuf,
    },

    /// The offering directory exists but its config is missing or invalid.
    #[error("offering '{name}' has an invalid config: {reason}")]
    InvalidConfig {
        /// Requested logical name.
        name: String,
        /// Parse or I/O detail.
        reason: String,
    },

    /// The offering has a config but no registered handlers.
    #[error("offering '{name}' has no registered handlers")]
    MissingHandlers {
        /// Requested logical name.
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// How the offering's fee is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobFeeType {
    /// Absolute token amount.
    #[default]
    Fixed,
    /// Percentage of the job price.
    Percentage,
}

/// An offering's `offering.json` document. Unknown fields are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferingConfig {
    /// Unique logical key buyers use to address the offering.
    pub name: String,

    /// Buyer-facing description.
    #[serde(default)]
    pub description: String,

    /// Fee charged per job.
    #[serde(default)]
    pub job_fee: f64,

    /// Fee interpretation.
    #[serde(default)]
    pub job_fee_type: JobFeeType,

    /// Whether the accept stage should request additional escrowed funds.
    #[serde(default)]
    pub required_funds: bool,

    /// Arbitrary extension fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// The behavior of one offering.
///
/// `execute_job` is required; the remaining hooks default to "not provided",
/// matching offerings that only implement execution.
#[async_trait]
pub trait OfferingHandlers: Send + Sync {
    /// Produce the job's deliverable. The only place arbitrary offering code
    /// runs; may suspend. Errors are fatal to the stage attempt and are never
    /// retried.
    async fn execute_job(
        &self,
        requirements: &Map<String, Value>,
        ctx: &JobContext,
    ) -> anyhow::Result<ExecuteJobResult>;

    /// Validate buyer requirements before accepting.
    async fn validate_requirements(
        &self,
        _requirements: &Map<String, Value>,
        _ctx: &JobContext,
    ) -> anyhow::Result<Validation> {
        Ok(Validation::Valid)
    }

    /// Custom payment-request text; `None` falls back to the funds-request
    /// content or the default text.
    async fn request_payment(
        &self,
        _requirements: &Map<String, Value>,
        _ctx: &JobContext,
    ) -> anyhow::Result<Option<String>> {
        Ok(None)
    }

    /// Additional escrowed funds for offerings with `required_funds`.
    async fn request_additional_funds(
        &self,
        _requirements: &Map<String, Value>,
        _ctx: &JobContext,
    ) -> anyhow::Result<Option<FundsRequest>> {
        Ok(None)
    }
}

/// A resolved offering: parsed config plus its handlers.
#[derive(Clone)]
pub struct LoadedOffering {
    /// Parsed `offering.json`.
    pub config: OfferingConfig,
    /// Registered handler implementation.
    pub handlers: Arc<dyn OfferingHandlers>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Boot-time registry mapping logical offering names to handlers and configs.
///
/// Handlers are registered in code at startup; configs are read through from
/// `<root>/<offering>/offering.json` on every load (no caching, so config
/// edits are picked up without a restart). Built-ins may register an in-code
/// config instead of a directory.
#[derive(Default)]
pub struct OfferingRegistry {
    root: PathBuf,
    handlers: HashMap<String, Arc<dyn OfferingHandlers>>,
    builtin_configs: HashMap<String, OfferingConfig>,
}

impl OfferingRegistry {
    /// Create a registry over the given offerings root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            handlers: HashMap::new(),
            builtin_configs: HashMap::new(),
        }
    }

    /// Register handlers under a logical name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, handlers: impl OfferingHandlers + 'static) {
        self.handlers.insert(name.into(), Arc::new(handlers));
    }

    /// Register a built-in offering whose config lives in code rather than on
    /// disk.
    pub fn register_builtin(
        &mut self,
        config: OfferingConfig,
        handlers: impl OfferingHandlers + 'static,
    ) {
        self.handlers
            .insert(config.name.clone(), Arc::new(handlers));
        self.builtin_configs.insert(config.name.clone(), config);
    }

    /// Whether handlers are registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Immediate subdirectories of the offerings root, sorted.
    #[must_use]
    pub fn list_offerings(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    /// Resolve an offering by logical name.
    ///
    /// Resolution order: built-in config; direct directory name match; a scan
    /// of every subdirectory's config for `config.name == name`. Unknown
    /// config fields are tolerated; a missing config or missing handlers is
    /// an error.
    pub fn load(&self, name: &str) -> Result<LoadedOffering, OfferingError> {
        let config = match self.builtin_configs.get(name) {
            Some(config) => config.clone(),
            None => self.load_config_from_disk(name)?,
        };
        let handlers =
            self.handlers
                .get(name)
                .cloned()
                .ok_or_else(|| OfferingError::MissingHandlers {
                    name: name.to_string(),
                })?;
        Ok(LoadedOffering { config, handlers })
    }

    fn load_config_from_disk(&self, name: &str) -> Result<OfferingConfig, OfferingError> {
        let direct = self.root.join(name).join(CONFIG_FILE);
        if direct.is_file() {
            return parse_config(&direct, name);
        }

        // No directory named after the offering; scan configs for a matching
        // `name` field.
        for dir in self.list_offerings() {
            let candidate = self.root.join(&dir).join(CONFIG_FILE);
            if !candidate.is_file() {
                continue;
            }
            if let Ok(config) = parse_config(&candidate, &dir) {
                if config.name == name {
                    return Ok(config);
                }
            }
        }

        Err(OfferingError::NotFound {
            name: name.to_string(),
            root: self.root.clone(),
        })
    }

    /// Startup sweep: log every discoverable offering, warning about (and
    /// skipping) any with an invalid config or no registered handlers.
    /// Returns the names that resolved cleanly.
    pub fn discover(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .builtin_configs
            .keys()
            .filter(|name| self.contains(name))
            .cloned()
            .collect();

        for dir in self.list_offerings() {
            let path = self.root.join(&dir).join(CONFIG_FILE);
            let config = match parse_config(&path, &dir) {
                Ok(config) => config,
                Err(err) => {
                    warn!(
                        target: "acp.offering",
                        offering = %dir,
                        error = %err,
                        "skipping offering with invalid config"
                    );
                    continue;
                }
            };
            if !self.contains(&config.name) {
                warn!(
                    target: "acp.offering",
                    offering = %config.name,
                    "skipping offering with no registered handlers"
                );
                continue;
            }
            ready.push(config.name);
        }

        ready.sort();
        ready.dedup();
        ready
    }
}

fn parse_config(path: &Path, name: &str) -> Result<OfferingConfig, OfferingError> {
    let raw = fs::read_to_string(path).map_err(|e| OfferingError::InvalidConfig {
        name: name.to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| OfferingError::InvalidConfig {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
