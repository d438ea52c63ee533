//! Runtime configuration
//!
//! Loaded from TOML, with `HANDOFF_*` environment variables applied on top.
//!
//! ```toml
//! alignment = 64
//! max_allocation_bytes = 4294967296
//! capsule_format = "versioned"   # or "legacy"
//! read_only_exports = false
//! ```

use crate::error::{HandoffError, HandoffResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Managed tensor struct a capsule carries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsuleFormat {
    /// `DLManagedTensor`, capsule name `dltensor`
    Legacy,
    /// `DLManagedTensorVersioned` (DLPack >= 1.0), capsule name `dltensor_versioned`
    #[default]
    Versioned,
}

impl CapsuleFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "legacy" | "v0" => Some(CapsuleFormat::Legacy),
            "versioned" | "v1" => Some(CapsuleFormat::Versioned),
            _ => None,
        }
    }
}

/// Exchange layer configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Alignment of host allocations in bytes, a power of two (default: 64, cache-line)
    pub alignment: usize,
    /// Largest single allocation in bytes (default: 4GB)
    pub max_allocation_bytes: usize,
    /// Format used when wrapping buffers into capsules
    pub capsule_format: CapsuleFormat,
    /// Set `DLPACK_FLAG_BITMASK_READ_ONLY` on versioned exports
    pub read_only_exports: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            alignment: 64,
            max_allocation_bytes: 4 * 1024 * 1024 * 1024,
            capsule_format: CapsuleFormat::Versioned,
            read_only_exports: false,
        }
    }
}

impl HandoffConfig {
    /// Parse from a TOML string
    pub fn from_toml(contents: &str) -> HandoffResult<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> HandoffResult<Self> {
        let path = path.as_ref();
        log::debug!("loading handoff config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> HandoffResult<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `HANDOFF_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> HandoffResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HANDOFF_ALIGNMENT") {
            self.alignment = v
                .trim()
                .parse()
                .map_err(|e| HandoffError::config(format!("HANDOFF_ALIGNMENT={}: {}", v, e)))?;
        }
        if let Some(v) = lookup("HANDOFF_MAX_ALLOCATION") {
            self.max_allocation_bytes = v.trim().parse().map_err(|e| {
                HandoffError::config(format!("HANDOFF_MAX_ALLOCATION={}: {}", v, e))
            })?;
        }
        if let Some(v) = lookup("HANDOFF_CAPSULE_FORMAT") {
            self.capsule_format = CapsuleFormat::parse(&v).ok_or_else(|| {
                HandoffError::config(format!("HANDOFF_CAPSULE_FORMAT={}: expected legacy or versioned", v))
            })?;
        }
        if let Some(v) = lookup("HANDOFF_READ_ONLY") {
            self.read_only_exports = match v.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(HandoffError::config(format!(
                        "HANDOFF_READ_ONLY={}: expected a boolean",
                        other
                    )))
                }
            };
        }
        self.validate()
    }

    pub fn validate(&self) -> HandoffResult<()> {
        if !self.alignment.is_power_of_two() {
            return Err(HandoffError::config(format!(
                "alignment must be a power of two, got {}",
                self.alignment
            )));
        }
        if self.alignment > 4096 {
            return Err(HandoffError::config(format!(
                "alignment {} exceeds a page",
                self.alignment
            )));
        }
        Ok(())
    }
}
