//! Per-tenant configuration: a `serde::Deserialize` struct with per-field
//! defaults, layered through `figment`.

pub mod defaults {
    use std::time::Duration;

    pub fn max_depth() -> usize {
        10
    }
    pub fn min_score() -> f64 {
        0.5
    }
    pub fn max_loops_per_request() -> usize {
        1000
    }
    pub fn enable_collection_trading() -> bool {
        true
    }
    pub fn scc_concurrency() -> usize {
        6
    }
    pub fn max_nfts_per_wallet() -> usize {
        10_000
    }
    pub fn max_wants_per_wallet() -> usize {
        10_000
    }
    pub fn blacklisted_collections() -> Vec<String> {
        Vec::new()
    }
    pub fn webhook_enabled() -> bool {
        false
    }
    pub fn webhook_url() -> String {
        String::new()
    }
    pub fn webhook_secret() -> String {
        String::new()
    }
    pub fn max_collection_expansion() -> usize {
        64
    }
    pub fn max_vertices() -> usize {
        100_000
    }
    pub fn mutation_queue_capacity() -> usize {
        10_000
    }
    pub fn change_log_capacity() -> usize {
        10_000
    }
    pub fn projection_build_timeout() -> Duration {
        Duration::from_secs(5)
    }
    pub fn scc_timeout() -> Duration {
        Duration::from_secs(45)
    }
    pub fn enumerator_timeout() -> Duration {
        Duration::from_secs(45)
    }
    pub fn cache_ttl() -> Duration {
        Duration::from_secs(5 * 60)
    }
    pub fn cache_max_entries() -> usize {
        100
    }
}

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// `serde(with = "duration_secs")`: (de)serializes a `Duration` as whole
/// seconds, for the plain-TOML/env-friendly timeout fields below.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Per-tenant security limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    pub max_nfts_per_wallet: usize,
    pub max_wants_per_wallet: usize,
    pub blacklisted_collections: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_nfts_per_wallet: defaults::max_nfts_per_wallet(),
            max_wants_per_wallet: defaults::max_wants_per_wallet(),
            blacklisted_collections: defaults::blacklisted_collections(),
        }
    }
}

/// Per-tenant webhook settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebhookSettings {
    pub url: String,
    pub secret: String,
    pub enabled: bool,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            url: defaults::webhook_url(),
            secret: defaults::webhook_secret(),
            enabled: defaults::webhook_enabled(),
        }
    }
}

/// The full per-tenant knob set: discovery thresholds, cache/queue
/// capacities, and webhook/security settings, all configurable per tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantConfig {
    pub max_depth: usize,
    pub min_score: f64,
    pub max_loops_per_request: usize,
    pub enable_collection_trading: bool,
    pub scc_concurrency: usize,
    pub webhook: WebhookSettings,
    pub security: SecurityConfig,

    pub max_collection_expansion: usize,
    pub max_vertices: usize,
    pub mutation_queue_capacity: usize,
    pub change_log_capacity: usize,

    #[serde(with = "duration_secs")]
    pub projection_build_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub scc_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub enumerator_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            max_depth: defaults::max_depth(),
            min_score: defaults::min_score(),
            max_loops_per_request: defaults::max_loops_per_request(),
            enable_collection_trading: defaults::enable_collection_trading(),
            scc_concurrency: defaults::scc_concurrency(),
            webhook: WebhookSettings::default(),
            security: SecurityConfig::default(),
            max_collection_expansion: defaults::max_collection_expansion(),
            max_vertices: defaults::max_vertices(),
            mutation_queue_capacity: defaults::mutation_queue_capacity(),
            change_log_capacity: defaults::change_log_capacity(),
            projection_build_timeout: defaults::projection_build_timeout(),
            scc_timeout: defaults::scc_timeout(),
            enumerator_timeout: defaults::enumerator_timeout(),
            cache_ttl: defaults::cache_ttl(),
            cache_max_entries: defaults::cache_max_entries(),
        }
    }
}

impl TenantConfig {
    /// Validates the allowed ranges (`maxDepth: 2..12`, `sccConcurrency:
    /// 1..16`, `minScore: 0..1`).
    pub fn validate(&self) -> EngineResult<()> {
        if !(2..=12).contains(&self.max_depth) {
            return Err(EngineError::InvalidInput(format!(
                "maxDepth must be 2..=12, got {}",
                self.max_depth
            )));
        }
        if !(1..=16).contains(&self.scc_concurrency) {
            return Err(EngineError::InvalidInput(format!(
                "sccConcurrency must be 1..=16, got {}",
                self.scc_concurrency
            )));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(EngineError::InvalidInput(format!(
                "minScore must be 0..=1, got {}",
                self.min_score
            )));
        }
        Ok(())
    }

    /// Loads a tenant config by layering a base file, then
    /// `TRADELOOP_`-prefixed environment variables, over the struct's own
    /// defaults.
    pub fn load(base_file: Option<&std::path::Path>) -> EngineResult<Self> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        let mut figment = Figment::from(figment::providers::Serialized::defaults(TenantConfig::default()));
        if let Some(path) = base_file {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("TRADELOOP_"));

        let config: TenantConfig = figment
            .extract()
            .map_err(|e| EngineError::InvalidInput(format!("config load failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}
