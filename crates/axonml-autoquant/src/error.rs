//! Quantization Error Types
//!
//! Error types for calibration and conversion passes.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use thiserror::Error;

use crate::dtype::DType;

/// Result type for quantization operations.
pub type QuantResult<T> = Result<T, QuantError>;

/// How a replay pass diverged from the calibrated op sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlowViolation {
    /// More eligible ops were encountered than calibration recorded.
    LedgerExhausted,
    /// The op at this position differs from the recorded one.
    OpMismatch,
}

/// Errors that can occur during quantization.
#[derive(Error, Debug)]
pub enum QuantError {
    /// The op sequence differs between calibration and a later pass.
    #[error("{}", dynamic_control_flow_message(.kind, .encountered, .recorded))]
    DynamicControlFlow {
        /// Kind of divergence.
        kind: ControlFlowViolation,
        /// Op encountered by the live pass.
        encountered: String,
        /// Op recorded during calibration at the same position, if any.
        recorded: Option<String>,
    },

    /// Flattened tensor infos do not line up with the argument leaves.
    #[error("Shape mismatch: {actual} argument leaves but {expected} tensor infos")]
    ShapeMismatch {
        /// Number of flattened infos supplied.
        expected: usize,
        /// Number of leaves actually visited.
        actual: usize,
    },

    /// A ledger handle that does not refer to a recorded occurrence.
    #[error("Invalid ledger handle: {0}")]
    InvalidHandle(usize),

    /// Calibration bookkeeping attempted after finalization.
    #[error("Ledger is finalized; calibration records are read-only")]
    LedgerFinalized,

    /// Scale or zero point is malformed for the requested quantization.
    #[error("Invalid scale/zero-point: {0}")]
    InvalidScale(String),

    /// The runtime cannot represent the requested dtype.
    #[error("Unsupported dtype for {op}: {dtype}")]
    UnsupportedDType {
        /// Operation that rejected the dtype.
        op: &'static str,
        /// Offending dtype.
        dtype: DType,
    },

    /// Tensor conversion error raised by the runtime.
    #[error("Tensor conversion error: {0}")]
    TensorConversion(String),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

impl QuantError {
    /// Returns true for errors that must abort the pass and never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            QuantError::DynamicControlFlow { .. } | QuantError::ShapeMismatch { .. }
        )
    }
}

impl From<toml::de::Error> for QuantError {
    fn from(e: toml::de::Error) -> Self {
        QuantError::Config(e.to_string())
    }
}

fn dynamic_control_flow_message(
    kind: &ControlFlowViolation,
    encountered: &str,
    recorded: &Option<String>,
) -> String {
    match kind {
        ControlFlowViolation::LedgerExhausted => format!(
            "Encountered arithmetic operation {encountered} but we have encountered fewer \
             arithmetic operations in previous calibration runs. This likely indicates that \
             the program contains dynamic control flow. Quantization is not defined over \
             dynamic control flow!"
        ),
        ControlFlowViolation::OpMismatch => format!(
            "Encountered arithmetic operation {encountered} but previously recorded operation \
             was {}! This likely indicates that the program contains dynamic control flow. \
             Quantization is not defined over dynamic control flow!",
            recorded.as_deref().unwrap_or("<none>")
        ),
    }
}

// =============================================================================
// Tests
// =============================================================================
