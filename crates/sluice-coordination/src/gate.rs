//! Admission control for lease acquisition and renewal
//!
//! Before acquiring an eligible partition, or renewing one it already holds,
//! a coordinator asks its [`AdmissionGate`]. The gate holds a share in
//! `0..=MAX_SHARE` and favors this process when a uniform roll in
//! `0..MAX_SHARE` lands below the share. Processes with different shares end
//! up holding proportionally different slices of the partition space.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Mutex, PoisonError};

use crate::config::AdmissionConfig;

/// Upper bound of an admission share. A share of `MAX_SHARE` always admits,
/// a share of 0 never does.
pub const MAX_SHARE: u8 = 4;

/// How the share of a coordinator is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Always admit
    Disabled,
    /// Configured share, or one drawn once at startup
    #[default]
    Fixed,
    /// Share derived from a hash of the owner id
    IdentityHash,
    /// New share drawn for every decision
    PerCall,
}

impl AdmissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionMode::Disabled => "disabled",
            AdmissionMode::Fixed => "fixed",
            AdmissionMode::IdentityHash => "identity_hash",
            AdmissionMode::PerCall => "per_call",
        }
    }
}

impl std::fmt::Display for AdmissionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AdmissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "disabled" | "off" => Ok(AdmissionMode::Disabled),
            "fixed" => Ok(AdmissionMode::Fixed),
            "identity_hash" | "hash" => Ok(AdmissionMode::IdentityHash),
            "per_call" => Ok(AdmissionMode::PerCall),
            other => Err(format!("unknown admission mode '{}'", other)),
        }
    }
}

#[derive(Debug)]
pub struct AdmissionGate {
    mode: AdmissionMode,
    share: u8,
    rng: Mutex<StdRng>,
}

impl AdmissionGate {
    pub fn new(config: &AdmissionConfig, owner_id: &str) -> Self {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let share = match config.mode {
            AdmissionMode::Disabled => MAX_SHARE,
            AdmissionMode::Fixed => config
                .share
                .unwrap_or_else(|| rng.gen_range(1..=MAX_SHARE))
                .min(MAX_SHARE),
            AdmissionMode::IdentityHash => identity_share(owner_id),
            // Redrawn on every call
            AdmissionMode::PerCall => 0,
        };

        Self {
            mode: config.mode,
            share,
            rng: Mutex::new(rng),
        }
    }

    /// Gate that admits every request
    pub fn always() -> Self {
        Self::new(
            &AdmissionConfig {
                mode: AdmissionMode::Disabled,
                ..AdmissionConfig::default()
            },
            "",
        )
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    /// Share used for every decision, `None` when it is redrawn per call
    pub fn share(&self) -> Option<u8> {
        match self.mode {
            AdmissionMode::PerCall => None,
            _ => Some(self.share),
        }
    }

    /// Whether this process should take (or keep) a lease right now
    pub fn admits(&self) -> bool {
        if self.mode == AdmissionMode::Disabled {
            return true;
        }

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let share = match self.mode {
            AdmissionMode::PerCall => rng.gen_range(1..=MAX_SHARE),
            _ => self.share,
        };
        if share >= MAX_SHARE {
            return true;
        }
        rng.gen_range(0..MAX_SHARE) < share
    }
}

/// Deterministic share in `1..=MAX_SHARE` for an owner id
fn identity_share(owner_id: &str) -> u8 {
    let digest = Sha256::digest(owner_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let bucket = u64::from_be_bytes(prefix) % u64::from(MAX_SHARE);
    // bucket < MAX_SHARE, so the cast is lossless
    bucket as u8 + 1
}
