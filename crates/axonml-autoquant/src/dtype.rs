//! Data Types - Observation/Inference Type System
//!
//! Runtime dtype tags seen while tracing and configured for inference.
//! Covers the floating point kinds that autocast moves between and the
//! affine-quantized integer kinds that fake quantization targets.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use serde::{Deserialize, Serialize};

// =============================================================================
// DType Enum
// =============================================================================

/// Runtime representation of tensor data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 16-bit floating point (half precision).
    F16,
    /// 16-bit brain floating point.
    BF16,
    /// 32-bit floating point (single precision).
    #[default]
    F32,
    /// 64-bit floating point (double precision).
    F64,
    /// 8-bit signed integer.
    I8,
    /// 8-bit unsigned integer.
    U8,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Boolean type.
    Bool,
    /// Affine-quantized signed 8-bit integer.
    QInt8,
    /// Affine-quantized unsigned 8-bit integer.
    QUInt8,
}

impl DType {
    /// Returns the size in bytes of this data type.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::I8 | Self::U8 | Self::Bool | Self::QInt8 | Self::QUInt8 => 1,
            Self::F16 | Self::BF16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    /// Returns true if this is a floating point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::BF16 | Self::F32 | Self::F64)
    }

    /// Returns true if this is one of the affine-quantized integer kinds.
    #[must_use]
    pub const fn is_quantized(self) -> bool {
        matches!(self, Self::QInt8 | Self::QUInt8)
    }

    /// Integer range `[qmin, qmax]` of a quantized kind.
    #[must_use]
    pub const fn quant_range(self) -> Option<(i32, i32)> {
        match self {
            Self::QInt8 => Some((-128, 127)),
            Self::QUInt8 => Some((0, 255)),
            _ => None,
        }
    }

    /// Returns the name of this data type as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::BF16 => "bf16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I8 => "i8",
            Self::U8 => "u8",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Bool => "bool",
            Self::QInt8 => "qint8",
            Self::QUInt8 => "quint8",
        }
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// True when a tensor traced as `orig` and configured as `inf` gets a
/// quantize→dequantize pair inserted. Only float32 → 8-bit is supported.
#[must_use]
pub fn needs_fake_quant(orig: DType, inf: DType) -> bool {
    orig == DType::F32 && inf.is_quantized()
}

// =============================================================================
// Tests
// =============================================================================
