//! Convert Pass
//!
//! Replays a finalized ledger over live call arguments and inserts
//! quantize→dequantize pairs wherever calibration decided a float32
//! tensor runs quantized at inference.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use tracing::{debug, trace};

use crate::args::{walk, Arg};
use crate::config::ExecutionContext;
use crate::dtype::DType;
use crate::error::{QuantError, QuantResult};
use crate::guard::ReplayGuard;
use crate::ledger::{Ledger, QuantizableOpRecord};
use crate::op::OperationRef;
use crate::policy::{
    input_conversion_plan, is_weight_slot, select_branch, weight_conversion_plan,
    ConversionBranch, ConversionSlot, QuantInfo, ScaleZeroPointMap,
};
use crate::registry;
use crate::tensor::TensorOps;

// =============================================================================
// Fake Quantization
// =============================================================================

/// Quantizes `tensor` per tensor and immediately dequantizes it.
pub fn fake_quantize<T: TensorOps>(tensor: &T, info: QuantInfo<'_>) -> QuantResult<T> {
    let (scale, zero_point) = info.params.scalar()?;
    let q = tensor.quantize_per_tensor(scale, zero_point, info.dtype)?;
    T::dequantize(&q)
}

/// Quantizes `tensor` per channel along `axis` and immediately
/// dequantizes it.
pub fn fake_quantize_per_channel<T: TensorOps>(
    tensor: &T,
    info: QuantInfo<'_>,
    axis: usize,
) -> QuantResult<T> {
    let q = tensor.quantize_per_channel(
        &info.params.scale,
        &info.params.zero_point,
        axis,
        info.dtype,
    )?;
    T::dequantize(&q)
}

/// Applies one conversion branch to a tensor.
pub fn apply_branch<T: TensorOps>(
    tensor: T,
    info: QuantInfo<'_>,
    branch: ConversionBranch,
    ctx: &ExecutionContext,
) -> QuantResult<T> {
    match branch {
        ConversionBranch::PerChannel { axis } => autocast_round_trip(tensor, ctx, |t| {
            fake_quantize_per_channel(t, info, axis)
        }),
        ConversionBranch::PerTensor => {
            autocast_round_trip(tensor, ctx, |t| fake_quantize(t, info))
        }
        ConversionBranch::Fallback => {
            let arrived_bf16 = tensor.dtype() == DType::BF16;
            let input = if arrived_bf16 {
                tensor.to_dtype(DType::F32)?
            } else {
                tensor
            };
            let out = fake_quantize(&input, info)?;
            if arrived_bf16 {
                out.to_dtype(DType::BF16)
            } else {
                Ok(out)
            }
        }
    }
}

// Under bf16 autocast the tensor is rounded through bf16 first so the
// quantized values match what the autocast kernel would have consumed.
fn autocast_round_trip<T, F>(tensor: T, ctx: &ExecutionContext, quantize: F) -> QuantResult<T>
where
    T: TensorOps,
    F: FnOnce(&T) -> QuantResult<T>,
{
    if !ctx.is_autocast_bf16() {
        return quantize(&tensor);
    }
    let rounded = tensor.to_dtype(DType::BF16)?.to_dtype(DType::F32)?;
    quantize(&rounded)?.to_dtype(DType::BF16)
}

// =============================================================================
// Argument Conversion
// =============================================================================

/// Converts the call arguments of one occurrence.
///
/// Ops with observed positions only have those positional arguments
/// walked; the rest are returned untouched. Function records walk their
/// inputs followed by their weights, module records their inputs only.
pub fn convert_args<T: TensorOps>(
    record: &QuantizableOpRecord,
    args: Arg<T>,
    scales: &ScaleZeroPointMap,
    ctx: &ExecutionContext,
) -> QuantResult<Arg<T>> {
    let mut plan = input_conversion_plan(record, scales);
    let input_slots = plan.len();
    if !record.is_module() {
        plan.extend(weight_conversion_plan(record, scales));
    }
    let slots = plan.slots();

    let transform = |tensor: T, slot: &ConversionSlot<'_>, index: usize| -> QuantResult<T> {
        if !slot.needed {
            return Ok(tensor);
        }
        let weight_slot = is_weight_slot(&record.op, index, input_slots);
        let branch = select_branch(&record.op, weight_slot, slot.info.params);
        debug!(
            order_index = record.order_index,
            op = %record.op,
            slot = index,
            branch = ?branch,
            dtype = %slot.info.dtype,
            "fake-quantizing argument"
        );
        apply_branch(tensor, slot.info, branch, ctx)
    };

    match registry::observed_input_positions(&record.op) {
        Some(positions) => convert_positional(args, positions, &slots, transform),
        None => walk(args, &slots, transform),
    }
}

// Pulls the observed positions out into a temporary tuple, walks it and
// writes the converted items back.
fn convert_positional<'s, T, F>(
    args: Arg<T>,
    positions: &[usize],
    slots: &[Option<ConversionSlot<'s>>],
    transform: F,
) -> QuantResult<Arg<T>>
where
    F: FnMut(T, &ConversionSlot<'s>, usize) -> QuantResult<T>,
{
    let (mut items, rebuild): (Vec<Arg<T>>, fn(Vec<Arg<T>>) -> Arg<T>) = match args {
        Arg::Tuple(items) => (items, Arg::Tuple),
        Arg::List(items) => (items, Arg::List),
        leaf => return walk(Arg::Tuple(Vec::new()), slots, transform).map(|_| leaf),
    };

    let present: Vec<usize> = positions
        .iter()
        .copied()
        .filter(|&p| p < items.len())
        .collect();
    let subset = present
        .iter()
        .map(|&p| std::mem::replace(&mut items[p], Arg::none()))
        .collect();

    let converted = match walk(Arg::Tuple(subset), slots, transform)? {
        Arg::Tuple(items) | Arg::List(items) => items,
        leaf => vec![leaf],
    };
    for (p, item) in present.into_iter().zip(converted) {
        items[p] = item;
    }
    Ok(rebuild(items))
}

/// Converts the parameters of a module occurrence, in the order they
/// were recorded. The number of weights must match the recorded count.
pub fn convert_module_weights<T: TensorOps>(
    record: &QuantizableOpRecord,
    weights: Vec<T>,
    scales: &ScaleZeroPointMap,
    ctx: &ExecutionContext,
) -> QuantResult<Vec<T>> {
    let slots = weight_conversion_plan(record, scales).slots();
    if slots.len() != weights.len() {
        return Err(QuantError::ShapeMismatch {
            expected: slots.len(),
            actual: weights.len(),
        });
    }

    weights
        .into_iter()
        .zip(slots)
        .enumerate()
        .map(|(index, (tensor, slot))| match slot {
            Some(slot) if slot.needed => {
                let branch = select_branch(&record.op, true, slot.info.params);
                debug!(
                    order_index = record.order_index,
                    op = %record.op,
                    weight = index,
                    branch = ?branch,
                    "fake-quantizing module weight"
                );
                apply_branch(tensor, slot.info, branch, ctx)
            }
            _ => Ok(tensor),
        })
        .collect()
}

// =============================================================================
// ConvertPass
// =============================================================================

/// One inference pass over a finalized ledger.
///
/// Every pass owns its replay position, so several passes may borrow the
/// same ledger at once.
#[derive(Debug)]
pub struct ConvertPass<'a> {
    ledger: &'a Ledger,
    scales: &'a ScaleZeroPointMap,
    ctx: ExecutionContext,
    guard: ReplayGuard,
}

impl<'a> ConvertPass<'a> {
    /// Starts a pass.
    pub fn new(ledger: &'a Ledger, scales: &'a ScaleZeroPointMap, ctx: ExecutionContext) -> Self {
        Self {
            ledger,
            scales,
            ctx,
            guard: ReplayGuard::new(),
        }
    }

    /// Converts the arguments of the next op. Ineligible ops pass through
    /// without advancing the replay position.
    pub fn convert<T: TensorOps>(
        &mut self,
        op: &OperationRef,
        args: Arg<T>,
    ) -> QuantResult<Arg<T>> {
        if !registry::is_quantizable(op) {
            trace!(op = %op, "op not eligible; arguments passed through");
            return Ok(args);
        }
        let record = self.guard.check(self.ledger, op)?;
        convert_args(record, args, self.scales, &self.ctx)
    }

    /// Converts the arguments and parameters of a module occurrence.
    pub fn convert_with_weights<T: TensorOps>(
        &mut self,
        op: &OperationRef,
        args: Arg<T>,
        weights: Vec<T>,
    ) -> QuantResult<(Arg<T>, Vec<T>)> {
        if !registry::is_quantizable(op) {
            trace!(op = %op, "op not eligible; arguments passed through");
            return Ok((args, weights));
        }
        let record = self.guard.check(self.ledger, op)?;
        let args = convert_args(record, args, self.scales, &self.ctx)?;
        let weights = convert_module_weights(record, weights, self.scales, &self.ctx)?;
        Ok((args, weights))
    }

    /// Execution context of this pass.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Number of eligible ops converted so far.
    pub fn position(&self) -> usize {
        self.guard.position()
    }
}

// =============================================================================
// Tests
// =============================================================================
