//! CPU Reference Runtime
//!
//! A dense, host-memory implementation of [`TensorOps`]. Values are held as
//! f32; reduced precision dtypes are modelled by rounding through `half`
//! on every cast, so bf16 precision loss is observable in tests.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::sync::atomic::{AtomicU64, Ordering};

use half::{bf16, f16};
use rayon::prelude::*;

use crate::dtype::DType;
use crate::error::{QuantError, QuantResult};
use crate::tensor::TensorOps;

static NEXT_OBJECT_KEY: AtomicU64 = AtomicU64::new(1);

fn next_object_key() -> u64 {
    NEXT_OBJECT_KEY.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// CpuTensor
// =============================================================================

/// Dense host tensor. Clones share the object key of the original.
#[derive(Debug, Clone)]
pub struct CpuTensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    dtype: DType,
    key: u64,
}

impl CpuTensor {
    /// Creates a float32 tensor from a flat vector.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> QuantResult<Self> {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(QuantError::TensorConversion(format!(
                "data length {} does not match shape {:?}",
                data.len(),
                shape
            )));
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
            dtype: DType::F32,
            key: next_object_key(),
        })
    }

    /// Returns the shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the values as f32.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.clone()
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    fn with_data(&self, data: Vec<f32>, dtype: DType) -> Self {
        Self {
            data,
            shape: self.shape.clone(),
            dtype,
            key: next_object_key(),
        }
    }

    fn require_f32(&self, op: &'static str) -> QuantResult<()> {
        if self.dtype == DType::F32 {
            Ok(())
        } else {
            Err(QuantError::UnsupportedDType {
                op,
                dtype: self.dtype,
            })
        }
    }
}

impl PartialEq for CpuTensor {
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype && self.shape == other.shape && self.data == other.data
    }
}

// =============================================================================
// Quantized Storage
// =============================================================================

/// Affine parameters attached to quantized storage.
#[derive(Debug, Clone, PartialEq)]
pub enum QParams {
    /// One scale/zero-point for the whole tensor.
    PerTensor {
        /// Scale.
        scale: f32,
        /// Zero point.
        zero_point: i32,
    },
    /// One scale/zero-point per slice along `axis`.
    PerChannel {
        /// Scales, one per channel.
        scales: Vec<f32>,
        /// Zero points, one per channel.
        zero_points: Vec<i32>,
        /// Channel axis.
        axis: usize,
    },
}

/// Quantized integer storage produced by the CPU runtime.
#[derive(Debug, Clone)]
pub struct CpuQuantized {
    /// Integer grid values.
    pub values: Vec<i32>,
    /// Original shape.
    pub shape: Vec<usize>,
    /// Quantized dtype.
    pub dtype: DType,
    /// Affine parameters.
    pub params: QParams,
}

// Clamped in f32 before the cast so infinities saturate to the range ends.
fn quantize_value(x: f32, scale: f32, zero_point: i32, qmin: i32, qmax: i32) -> i32 {
    if x.is_nan() {
        return zero_point.clamp(qmin, qmax);
    }
    let q = (x / scale).round_ties_even() + zero_point as f32;
    q.clamp(qmin as f32, qmax as f32) as i32
}

fn check_scale(scale: f32) -> QuantResult<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(QuantError::InvalidScale(format!(
            "scale must be finite and positive, got {scale}"
        )))
    }
}

fn quant_range(op: &'static str, dtype: DType) -> QuantResult<(i32, i32)> {
    dtype
        .quant_range()
        .ok_or(QuantError::UnsupportedDType { op, dtype })
}

// =============================================================================
// TensorOps
// =============================================================================

impl TensorOps for CpuTensor {
    type Quantized = CpuQuantized;

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn object_key(&self) -> u64 {
        self.key
    }

    fn to_dtype(&self, dtype: DType) -> QuantResult<Self> {
        if dtype == self.dtype {
            return Ok(self.clone());
        }
        let data: Vec<f32> = match dtype {
            DType::F32 | DType::F64 => self.data.clone(),
            DType::BF16 => self
                .data
                .par_iter()
                .map(|&x| bf16::from_f32(x).to_f32())
                .collect(),
            DType::F16 => self
                .data
                .par_iter()
                .map(|&x| f16::from_f32(x).to_f32())
                .collect(),
            other => {
                return Err(QuantError::UnsupportedDType {
                    op: "to_dtype",
                    dtype: other,
                })
            }
        };
        Ok(self.with_data(data, dtype))
    }

    fn quantize_per_tensor(
        &self,
        scale: f32,
        zero_point: i32,
        dtype: DType,
    ) -> QuantResult<CpuQuantized> {
        self.require_f32("quantize_per_tensor")?;
        check_scale(scale)?;
        let (qmin, qmax) = quant_range("quantize_per_tensor", dtype)?;

        let values = self
            .data
            .par_iter()
            .map(|&x| quantize_value(x, scale, zero_point, qmin, qmax))
            .collect();

        Ok(CpuQuantized {
            values,
            shape: self.shape.clone(),
            dtype,
            params: QParams::PerTensor { scale, zero_point },
        })
    }

    fn quantize_per_channel(
        &self,
        scales: &[f32],
        zero_points: &[i32],
        axis: usize,
        dtype: DType,
    ) -> QuantResult<CpuQuantized> {
        self.require_f32("quantize_per_channel")?;
        let (qmin, qmax) = quant_range("quantize_per_channel", dtype)?;

        let channels = *self.shape.get(axis).ok_or_else(|| {
            QuantError::InvalidScale(format!(
                "channel axis {axis} out of range for shape {:?}",
                self.shape
            ))
        })?;
        if scales.len() != channels || zero_points.len() != channels {
            return Err(QuantError::InvalidScale(format!(
                "expected {channels} scales and zero points along axis {axis}, got {} and {}",
                scales.len(),
                zero_points.len()
            )));
        }
        for &scale in scales {
            check_scale(scale)?;
        }

        let inner: usize = self.shape[axis + 1..].iter().product();
        let values = self
            .data
            .par_iter()
            .enumerate()
            .map(|(i, &x)| {
                let ch = (i / inner) % channels;
                quantize_value(x, scales[ch], zero_points[ch], qmin, qmax)
            })
            .collect();

        Ok(CpuQuantized {
            values,
            shape: self.shape.clone(),
            dtype,
            params: QParams::PerChannel {
                scales: scales.to_vec(),
                zero_points: zero_points.to_vec(),
                axis,
            },
        })
    }

    fn dequantize(quantized: &CpuQuantized) -> QuantResult<Self> {
        let data: Vec<f32> = match &quantized.params {
            QParams::PerTensor { scale, zero_point } => quantized
                .values
                .par_iter()
                .map(|&q| (q - zero_point) as f32 * scale)
                .collect(),
            QParams::PerChannel {
                scales,
                zero_points,
                axis,
            } => {
                let channels = quantized.shape[*axis];
                let inner: usize = quantized.shape[axis + 1..].iter().product();
                quantized
                    .values
                    .par_iter()
                    .enumerate()
                    .map(|(i, &q)| {
                        let ch = (i / inner) % channels;
                        (q - zero_points[ch]) as f32 * scales[ch]
                    })
                    .collect()
            }
        };
        CpuTensor::from_vec(data, &quantized.shape)
    }
}

// =============================================================================
// Tests
// =============================================================================
