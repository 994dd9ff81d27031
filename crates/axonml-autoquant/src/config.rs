//! Quantization Configuration
//!
//! Per-op quantization settings, the execution context threaded through
//! convert passes, and the top-level configuration loaded from TOML.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dtype::DType;
use crate::error::{QuantError, QuantResult};

// =============================================================================
// QuantConfig
// =============================================================================

/// Weight quantization granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// One scale/zero-point for the whole tensor.
    PerTensor,
    /// One scale/zero-point per output channel.
    #[default]
    PerChannel,
}

/// Quantization settings attached to one op occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantConfig {
    /// Inference dtype for float32 activations.
    #[serde(default = "default_activation_dtype")]
    pub activation_dtype: DType,
    /// Inference dtype for float32 weights.
    #[serde(default = "default_weight_dtype")]
    pub weight_dtype: DType,
    /// Granularity the statistics step should use for weights.
    ///
    /// Read by whoever fills the [`ScaleZeroPointMap`]; conversion itself
    /// picks per-channel or per-tensor from the length of the recorded
    /// scale.
    ///
    /// [`ScaleZeroPointMap`]: crate::policy::ScaleZeroPointMap
    #[serde(default)]
    pub weight_granularity: Granularity,
}

fn default_activation_dtype() -> DType {
    DType::QUInt8
}
fn default_weight_dtype() -> DType {
    DType::QInt8
}

impl Default for QuantConfig {
    fn default() -> Self {
        Self {
            activation_dtype: default_activation_dtype(),
            weight_dtype: default_weight_dtype(),
            weight_granularity: Granularity::default(),
        }
    }
}

impl QuantConfig {
    /// Checks that both target dtypes are quantized kinds.
    pub fn validate(&self) -> QuantResult<()> {
        for (field, dtype) in [
            ("activation_dtype", self.activation_dtype),
            ("weight_dtype", self.weight_dtype),
        ] {
            if !dtype.is_quantized() {
                return Err(QuantError::Config(format!(
                    "{field} must be qint8 or quint8, got {dtype}"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// ExecutionContext
// =============================================================================

/// Mixed-precision state of the pass being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Whether autocast is active.
    #[serde(default)]
    pub autocast_enabled: bool,
    /// Dtype autocast narrows to.
    #[serde(default = "default_autocast_dtype")]
    pub autocast_dtype: DType,
}

fn default_autocast_dtype() -> DType {
    DType::BF16
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            autocast_enabled: false,
            autocast_dtype: default_autocast_dtype(),
        }
    }
}

impl ExecutionContext {
    /// Context with bfloat16 autocast active.
    pub fn bf16_autocast() -> Self {
        Self {
            autocast_enabled: true,
            autocast_dtype: DType::BF16,
        }
    }

    /// True when bfloat16 autocast is active.
    pub fn is_autocast_bf16(&self) -> bool {
        self.autocast_enabled && self.autocast_dtype == DType::BF16
    }
}

// =============================================================================
// AutoQuantConfig
// =============================================================================

/// Qconfig applied to ops owned by modules under `owner_prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QConfigOverride {
    /// Owner path prefix, e.g. `encoder.layer1`.
    pub owner_prefix: String,
    /// Settings for matching ops.
    #[serde(default)]
    pub qconfig: QuantConfig,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutoQuantConfig {
    /// Qconfig for ops without an override.
    #[serde(default)]
    pub default_qconfig: QuantConfig,
    /// Execution context for convert passes.
    #[serde(default)]
    pub execution: ExecutionContext,
    /// Per-owner-path overrides.
    #[serde(default)]
    pub overrides: Vec<QConfigOverride>,
}

impl AutoQuantConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> QuantResult<Self> {
        let config: AutoQuantConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> QuantResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validates every qconfig.
    pub fn validate(&self) -> QuantResult<()> {
        self.default_qconfig.validate()?;
        for o in &self.overrides {
            o.qconfig.validate()?;
        }
        Ok(())
    }

    /// Qconfig for an op owned by `owner_path`; the longest matching
    /// prefix wins.
    pub fn qconfig_for(&self, owner_path: &str) -> QuantConfig {
        self.overrides
            .iter()
            .filter(|o| owner_matches(owner_path, &o.owner_prefix))
            .max_by_key(|o| o.owner_prefix.len())
            .map_or(self.default_qconfig, |o| o.qconfig)
    }
}

fn owner_matches(owner_path: &str, prefix: &str) -> bool {
    match owner_path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || prefix.is_empty(),
        None => false,
    }
}

// =============================================================================
// Tests
// =============================================================================
