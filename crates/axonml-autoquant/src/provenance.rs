//! Tensor Provenance
//!
//! Per-tensor descriptors that tie a logical tensor seen during
//! calibration to the same tensor position in later passes.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fmt;

use rustc_hash::FxHashMap;

use crate::dtype::DType;
use crate::tensor::TensorOps;

// =============================================================================
// TensorId
// =============================================================================

/// Logical tensor identity, stable across calibration and inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(pub u64);

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TensorProvenance
// =============================================================================

/// Dtype history of one logical tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorProvenance {
    /// Logical tensor identity.
    pub id: TensorId,
    /// Dtype seen while tracing with example input.
    pub orig_dtype: DType,
    /// Dtype at inference.
    pub inf_dtype: DType,
}

impl TensorProvenance {
    /// A fresh record; inference dtype equals the traced dtype until
    /// calibration is finalized.
    pub fn new(id: TensorId, orig_dtype: DType) -> Self {
        Self {
            id,
            orig_dtype,
            inf_dtype: orig_dtype,
        }
    }

    /// True when this position gets a quantize→dequantize pair.
    pub fn needs_fake_quant(&self) -> bool {
        crate::dtype::needs_fake_quant(self.orig_dtype, self.inf_dtype)
    }
}

impl fmt::Display for TensorProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TensorProvenance(id={}, orig_dtype={}, inf_dtype={})",
            self.id, self.orig_dtype, self.inf_dtype
        )
    }
}

// =============================================================================
// Allocator
// =============================================================================

/// Hands out tensor ids during calibration, reusing the id of a tensor
/// object that has been seen before.
#[derive(Debug, Default)]
pub struct ProvenanceAllocator {
    next_id: u64,
    by_object: FxHashMap<u64, TensorProvenance>,
}

impl ProvenanceAllocator {
    /// Creates an empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the provenance for `tensor`, allocating a fresh id on first
    /// sight.
    pub fn provenance_of<T: TensorOps>(&mut self, tensor: &T) -> TensorProvenance {
        let key = tensor.object_key();
        if let Some(existing) = self.by_object.get(&key) {
            return *existing;
        }
        let info = TensorProvenance::new(TensorId(self.next_id), tensor.dtype());
        self.next_id += 1;
        self.by_object.insert(key, info);
        info
    }

    /// Number of distinct tensors seen.
    pub fn len(&self) -> usize {
        self.by_object.len()
    }

    /// Returns true if no tensor has been seen.
    pub fn is_empty(&self) -> bool {
        self.by_object.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuTensor;

    #[test]
    fn test_allocator_reuses_ids() {
        let mut alloc = ProvenanceAllocator::new();
        let a = CpuTensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        let b = CpuTensor::from_vec(vec![3.0], &[1]).unwrap();

        let pa = alloc.provenance_of(&a);
        let pb = alloc.provenance_of(&b);
        let pa_again = alloc.provenance_of(&a.clone());

        assert_ne!(pa.id, pb.id);
        assert_eq!(pa, pa_again);
        assert_eq!(alloc.len(), 2);
    }

    #[test]
    fn test_new_provenance_is_passthrough() {
        let info = TensorProvenance::new(TensorId(3), DType::F32);
        assert_eq!(info.inf_dtype, DType::F32);
        assert!(!info.needs_fake_quant());

        let quantized = TensorProvenance {
            inf_dtype: DType::QUInt8,
            ..info
        };
        assert!(quantized.needs_fake_quant());
        assert!(quantized.to_string().contains("quint8"));
    }
}
