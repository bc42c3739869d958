//! Coordinator configuration
//!
//! Values come from, in increasing precedence: built-in defaults, an optional
//! TOML file, and `SLUICE_*` environment variables (nested keys use `__`,
//! e.g. `SLUICE_ADMISSION__MODE=identity_hash`). A `.env` file is honored.

use serde::{Deserialize, Serialize};
use sluice_common::identity;
use std::path::Path;
use std::time::Duration;

use crate::error::{CoordinationError, Result};
use crate::gate::{AdmissionMode, MAX_SHARE};

// ============================================================================
// Coordination Defaults
// ============================================================================

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SLUICE";

/// Default lease length (10 minutes).
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 600;

/// Longest lease accepted (7 days).
pub const MAX_LEASE_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Default attempts per store call, including the first.
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default ceiling on retry delay.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Name of the data source whose partitions are coordinated
    pub source_identifier: String,
    /// Optional scope shared by several sources in one store
    pub partition_prefix: Option<String>,
    /// Identity written as partition owner; derived from the hostname if unset
    pub owner_id: Option<String>,
    pub lease_duration_secs: u64,
    /// Closing a partition this many times completes it
    pub max_closed_count: Option<u32>,
    pub admission: AdmissionConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdmissionConfig {
    pub mode: AdmissionMode,
    /// Share in `0..=MAX_SHARE`; only used in `fixed` mode
    pub share: Option<u8>,
    /// Seed for reproducible decisions
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            source_identifier: String::new(),
            partition_prefix: None,
            owner_id: None,
            lease_duration_secs: DEFAULT_LEASE_DURATION_SECS,
            max_closed_count: None,
            admission: AdmissionConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new(source_identifier: impl Into<String>) -> Self {
        Self {
            source_identifier: source_identifier.into(),
            ..Self::default()
        }
    }

    /// Load from an optional TOML file and `SLUICE_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| CoordinationError::config(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_partition_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.partition_prefix = Some(prefix.into());
        self
    }

    /// Leases are kept in whole seconds; a partial second rounds up.
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration_secs = lease
            .as_secs()
            .saturating_add(u64::from(lease.subsec_nanos() > 0));
        self
    }

    pub fn with_max_closed_count(mut self, max_closed_count: u32) -> Self {
        self.max_closed_count = Some(max_closed_count);
        self
    }

    pub fn with_admission_mode(mut self, mode: AdmissionMode) -> Self {
        self.admission.mode = mode;
        self
    }

    pub fn with_admission_share(mut self, share: u8) -> Self {
        self.admission.share = Some(share);
        self
    }

    pub fn with_admission_seed(mut self, seed: u64) -> Self {
        self.admission.seed = Some(seed);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    /// `{prefix}|{source_identifier}`, or the bare source identifier
    pub fn scoped_source(&self) -> Result<String> {
        Ok(identity::scoped_source(
            self.partition_prefix.as_deref(),
            &self.source_identifier,
        )?)
    }

    /// Namespace of this source's partition records
    pub fn namespace(&self) -> Result<String> {
        Ok(identity::partition_namespace(&self.scoped_source()?))
    }

    /// Configured owner id, or `{scoped_source}:{hostname}`
    pub fn resolve_owner_id(&self) -> Result<String> {
        match self.owner_id {
            Some(ref owner_id) => {
                identity::validate_identity(owner_id)?;
                Ok(owner_id.clone())
            }
            None => Ok(identity::owner_id(
                &self.scoped_source()?,
                &identity::local_hostname(),
            )?),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.source_identifier.is_empty() {
            return Err(CoordinationError::config("source_identifier must be set"));
        }

        self.scoped_source()?;
        self.resolve_owner_id()?;

        if self.lease_duration_secs == 0 {
            return Err(CoordinationError::config(
                "lease_duration_secs must be greater than 0",
            ));
        }
        if self.lease_duration_secs > MAX_LEASE_DURATION_SECS {
            return Err(CoordinationError::config(format!(
                "lease_duration_secs ({}) cannot exceed {}",
                self.lease_duration_secs, MAX_LEASE_DURATION_SECS
            )));
        }

        if self.max_closed_count == Some(0) {
            return Err(CoordinationError::config(
                "max_closed_count must be greater than 0 when set",
            ));
        }

        if let Some(share) = self.admission.share {
            if share > MAX_SHARE {
                return Err(CoordinationError::config(format!(
                    "admission share ({}) cannot exceed {}",
                    share, MAX_SHARE
                )));
            }
            if self.admission.mode != AdmissionMode::Fixed {
                tracing::warn!(
                    mode = %self.admission.mode,
                    "admission.share is only used in fixed mode and will be ignored"
                );
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(CoordinationError::config(
                "retry.max_attempts must be greater than 0",
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(CoordinationError::config(format!(
                "retry.base_delay_ms ({}) cannot be greater than retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }

        Ok(())
    }
}
