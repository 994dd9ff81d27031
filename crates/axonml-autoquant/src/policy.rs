//! Conversion Policy
//!
//! Decides, per recorded input and weight slot, whether a
//! quantize→dequantize pair is needed and with which parameters, and which
//! conversion branch applies to a given op and slot.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use rustc_hash::FxHashMap;

use crate::dtype::DType;
use crate::error::{QuantError, QuantResult};
use crate::ledger::QuantizableOpRecord;
use crate::op::OpKind;
use crate::provenance::{TensorId, TensorProvenance};
use crate::registry;

// =============================================================================
// Scale / Zero Point
// =============================================================================

/// Affine parameters of one tensor: a single pair, or one pair per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleZeroPoint {
    /// Scales; one element for per-tensor parameters.
    pub scale: Vec<f32>,
    /// Zero points, same length as `scale`.
    pub zero_point: Vec<i32>,
}

impl ScaleZeroPoint {
    /// Single scale/zero-point pair.
    pub fn per_tensor(scale: f32, zero_point: i32) -> Self {
        Self {
            scale: vec![scale],
            zero_point: vec![zero_point],
        }
    }

    /// One pair per channel.
    pub fn per_channel(scale: Vec<f32>, zero_point: Vec<i32>) -> QuantResult<Self> {
        if scale.is_empty() || scale.len() != zero_point.len() {
            return Err(QuantError::InvalidScale(format!(
                "{} scales vs {} zero points",
                scale.len(),
                zero_point.len()
            )));
        }
        Ok(Self { scale, zero_point })
    }

    /// True when the scale holds more than one element.
    pub fn is_per_channel(&self) -> bool {
        self.scale.len() > 1
    }

    /// The single scale/zero-point pair.
    pub fn scalar(&self) -> QuantResult<(f32, i32)> {
        match (self.scale.as_slice(), self.zero_point.as_slice()) {
            ([s], [zp]) => Ok((*s, *zp)),
            _ => Err(QuantError::InvalidScale(format!(
                "expected a single scale/zero-point, got {} scales",
                self.scale.len()
            ))),
        }
    }
}

/// Weight key: the same weight used by two occurrences may be quantized
/// differently, so the order index is part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeightKey {
    /// Order index of the occurrence.
    pub order_index: usize,
    /// Weight tensor id.
    pub tensor_id: TensorId,
}

/// Scale/zero-point snapshot produced by statistics finalization.
#[derive(Debug, Clone, Default)]
pub struct ScaleZeroPointMap {
    activations: FxHashMap<TensorId, ScaleZeroPoint>,
    weights: FxHashMap<WeightKey, ScaleZeroPoint>,
}

impl ScaleZeroPointMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parameters of an activation tensor.
    pub fn insert_activation(&mut self, id: TensorId, params: ScaleZeroPoint) {
        self.activations.insert(id, params);
    }

    /// Sets the parameters of a weight as used by one occurrence.
    pub fn insert_weight(&mut self, order_index: usize, id: TensorId, params: ScaleZeroPoint) {
        self.weights.insert(
            WeightKey {
                order_index,
                tensor_id: id,
            },
            params,
        );
    }

    /// Activation parameters.
    pub fn activation(&self, id: TensorId) -> Option<&ScaleZeroPoint> {
        self.activations.get(&id)
    }

    /// Weight parameters for one occurrence.
    pub fn weight(&self, order_index: usize, id: TensorId) -> Option<&ScaleZeroPoint> {
        self.weights.get(&WeightKey {
            order_index,
            tensor_id: id,
        })
    }

    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.activations.len() + self.weights.len()
    }

    /// Returns true if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Conversion Plans
// =============================================================================

/// Parameters for one slot: `(scale, zero_point, inf_dtype)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantInfo<'a> {
    /// Affine parameters.
    pub params: &'a ScaleZeroPoint,
    /// Target quantized dtype.
    pub dtype: DType,
}

/// Per-slot conversion decisions for the flattened inputs or weights of
/// one occurrence.
///
/// `needs_conversion` is three-way: `None` means the slot holds no tensor
/// at all, `Some(false)` that it holds one that is left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionPlan<'a> {
    /// Parameters per slot, `None` when the map has no entry.
    pub quant_infos: Vec<Option<QuantInfo<'a>>>,
    /// Whether each slot is converted.
    pub needs_conversion: Vec<Option<bool>>,
}

/// One walker entry: parameters plus the conversion flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionSlot<'a> {
    /// Parameters.
    pub info: QuantInfo<'a>,
    /// Whether the slot is converted.
    pub needed: bool,
}

impl<'a> ConversionPlan<'a> {
    /// Number of slots.
    pub fn len(&self) -> usize {
        self.quant_infos.len()
    }

    /// Returns true if the plan has no slots.
    pub fn is_empty(&self) -> bool {
        self.quant_infos.is_empty()
    }

    /// Appends the slots of `other`.
    pub fn extend(&mut self, other: ConversionPlan<'a>) {
        self.quant_infos.extend(other.quant_infos);
        self.needs_conversion.extend(other.needs_conversion);
    }

    /// Walker entries; present wherever parameters exist.
    pub fn slots(&self) -> Vec<Option<ConversionSlot<'a>>> {
        self.quant_infos
            .iter()
            .zip(&self.needs_conversion)
            .map(|(info, needed)| {
                info.map(|info| ConversionSlot {
                    info,
                    needed: needed.unwrap_or(false),
                })
            })
            .collect()
    }

    fn push(&mut self, slot: Option<(&TensorProvenance, Option<&'a ScaleZeroPoint>)>) {
        match slot {
            None => {
                self.quant_infos.push(None);
                self.needs_conversion.push(None);
            }
            Some((_, None)) => {
                self.quant_infos.push(None);
                self.needs_conversion.push(Some(false));
            }
            Some((info, Some(params))) => {
                self.quant_infos.push(Some(QuantInfo {
                    params,
                    dtype: info.inf_dtype,
                }));
                self.needs_conversion.push(Some(info.needs_fake_quant()));
            }
        }
    }
}

/// Conversion plan for the recorded inputs, looked up by tensor id.
pub fn input_conversion_plan<'a>(
    record: &QuantizableOpRecord,
    scales: &'a ScaleZeroPointMap,
) -> ConversionPlan<'a> {
    let mut plan = ConversionPlan::default();
    for slot in &record.inputs {
        plan.push(slot.as_ref().map(|info| (info, scales.activation(info.id))));
    }
    plan
}

/// Conversion plan for the recorded weights, looked up by
/// `(order_index, tensor_id)`.
pub fn weight_conversion_plan<'a>(
    record: &QuantizableOpRecord,
    scales: &'a ScaleZeroPointMap,
) -> ConversionPlan<'a> {
    let mut plan = ConversionPlan::default();
    for slot in &record.weights {
        plan.push(
            slot.as_ref()
                .map(|info| (info, scales.weight(record.order_index, info.id))),
        );
    }
    plan
}

// =============================================================================
// Branch Selection
// =============================================================================

/// How a tensor slot is fake-quantized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionBranch {
    /// Per-channel weight quantization along `axis`.
    PerChannel {
        /// Channel axis.
        axis: usize,
    },
    /// Per-tensor quantization for conv/linear/matmul/embedding ops;
    /// honours bf16 autocast.
    PerTensor,
    /// Per-tensor quantization for every other op; restores bf16 inputs
    /// without consulting autocast.
    Fallback,
}

/// Picks the branch for a slot. `weight_slot` marks the weight of a
/// conv/linear op.
pub fn select_branch(
    kind: &OpKind,
    weight_slot: bool,
    params: &ScaleZeroPoint,
) -> ConversionBranch {
    let conv_linear =
        registry::is_conv_linear_function(kind) || registry::is_conv_linear_module(kind);
    if conv_linear && weight_slot && params.is_per_channel() {
        ConversionBranch::PerChannel {
            axis: registry::weight_channel_axis(kind),
        }
    } else if registry::uses_family_policy(kind) {
        ConversionBranch::PerTensor
    } else {
        ConversionBranch::Fallback
    }
}

/// True when flat slot `index` of a function's converted arguments belongs
/// to its weight. Input slots come first, so every slot past
/// `input_slots` is a weight slot of an op that takes a weight argument.
pub fn is_weight_slot(kind: &OpKind, index: usize, input_slots: usize) -> bool {
    registry::weight_arg_position(kind).is_some() && index >= input_slots
}

// =============================================================================
// Tests
// =============================================================================
