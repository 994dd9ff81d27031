//! Tensor Runtime Contract
//!
//! The calls this crate makes into the tensor runtime. The runtime owns
//! storage, kernels and device placement; the observation and conversion
//! passes only need dtype queries, object identity, casts and the three
//! affine quantization primitives.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::dtype::DType;
use crate::error::QuantResult;

// =============================================================================
// TensorOps Trait
// =============================================================================

/// Operations a tensor runtime provides to the quantization layer.
pub trait TensorOps: Clone {
    /// Storage type produced by the quantize primitives.
    type Quantized;

    /// Current dtype of the tensor.
    fn dtype(&self) -> DType;

    /// Identity of the underlying tensor object.
    ///
    /// Two handles to the same logical tensor must report the same key so
    /// calibration can reuse its provenance id.
    fn object_key(&self) -> u64;

    /// Casts to another floating point dtype.
    fn to_dtype(&self, dtype: DType) -> QuantResult<Self>;

    /// Affine per-tensor quantization.
    fn quantize_per_tensor(
        &self,
        scale: f32,
        zero_point: i32,
        dtype: DType,
    ) -> QuantResult<Self::Quantized>;

    /// Affine per-channel quantization along `axis`.
    fn quantize_per_channel(
        &self,
        scales: &[f32],
        zero_points: &[i32],
        axis: usize,
        dtype: DType,
    ) -> QuantResult<Self::Quantized>;

    /// Maps quantized storage back to float32.
    fn dequantize(quantized: &Self::Quantized) -> QuantResult<Self>;
}
