//! Seen-Op Ledger
//!
//! Records every op occurrence of a calibration pass in program order.
//! Quantizable occurrences are numbered; that number is the only key used
//! to find "the same occurrence" again in later passes.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fmt;

use tracing::{debug, info, trace};

use crate::args::Arg;
use crate::config::QuantConfig;
use crate::dtype::DType;
use crate::error::{QuantError, QuantResult};
use crate::op::{OpKind, OperationRef};
use crate::provenance::{ProvenanceAllocator, TensorProvenance};
use crate::registry;
use crate::tensor::TensorOps;

// =============================================================================
// Records
// =============================================================================

/// Calibration record of one quantizable op occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizableOpRecord {
    /// Position among quantizable occurrences in calibration order.
    pub order_index: usize,
    /// Op identity; modules are recorded by type.
    pub op: OpKind,
    /// Path of the owning module. For modules this is the module itself,
    /// for functions the module that called them.
    pub owner_path: String,
    /// Observed inputs; non-tensor leaves are `None`.
    pub inputs: Vec<Option<TensorProvenance>>,
    /// Tensor outputs.
    pub outputs: Vec<TensorProvenance>,
    /// Weight tensors; non-tensor leaves are `None`.
    pub weights: Vec<Option<TensorProvenance>>,
    /// Quantization settings.
    pub qconfig: QuantConfig,
}

impl QuantizableOpRecord {
    /// True when the op was a module instance.
    pub fn is_module(&self) -> bool {
        self.op.is_module()
    }
}

fn fmt_infos(f: &mut fmt::Formatter<'_>, infos: &[Option<TensorProvenance>]) -> fmt::Result {
    f.write_str("[")?;
    for (i, info) in infos.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        match info {
            Some(p) => write!(f, "{p}")?,
            None => f.write_str("None")?,
        }
    }
    f.write_str("]")
}

impl fmt::Display for QuantizableOpRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "(op): {}", self.op)?;
        writeln!(f, "     (owner): {}", self.owner_path)?;
        f.write_str("     (inputs): ")?;
        fmt_infos(f, &self.inputs)?;
        f.write_str("\n     (outputs): ")?;
        let outputs: Vec<_> = self.outputs.iter().copied().map(Some).collect();
        fmt_infos(f, &outputs)?;
        f.write_str("\n     (weights): ")?;
        fmt_infos(f, &self.weights)?;
        write!(f, "\n     (qconfig): {:?}", self.qconfig)
    }
}

/// Calibration record of an op that is not quantized.
#[derive(Debug, Clone, PartialEq)]
pub struct NonQuantizableOpRecord {
    /// Op identity.
    pub op: OpKind,
    /// Path of the owning module.
    pub owner_path: String,
    /// Inputs; non-tensor leaves are `None`.
    pub inputs: Vec<Option<TensorProvenance>>,
    /// Tensor outputs.
    pub outputs: Vec<TensorProvenance>,
}

/// Handle to a record created by [`Ledger::begin_op_occurrence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpHandle {
    /// Index into the quantizable records (the order index).
    Quantizable(usize),
    /// Index into the non-quantizable records.
    NonQuantizable(usize),
}

// =============================================================================
// Ledger
// =============================================================================

/// All op occurrences seen by a calibration pass.
#[derive(Debug, Default)]
pub struct Ledger {
    quantizable: Vec<QuantizableOpRecord>,
    non_quantizable: Vec<NonQuantizableOpRecord>,
    allocator: ProvenanceAllocator,
    finalized: bool,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new op occurrence from its positional call arguments.
    ///
    /// `args` is the tuple of positional arguments. For conv/linear
    /// functions the weight position is recorded under `weights`.
    pub fn begin_op_occurrence<T: TensorOps>(
        &mut self,
        op: &OperationRef,
        owner_path: &str,
        args: &Arg<T>,
        qconfig: QuantConfig,
    ) -> QuantResult<OpHandle> {
        self.ensure_open()?;
        let kind = op.kind();

        if !registry::is_quantizable(op) {
            let inputs = self.observe(args);
            self.non_quantizable.push(NonQuantizableOpRecord {
                op: kind,
                owner_path: owner_path.to_string(),
                inputs,
                outputs: Vec::new(),
            });
            trace!(op = %op, owner = owner_path, "recorded non-quantizable op");
            return Ok(OpHandle::NonQuantizable(self.non_quantizable.len() - 1));
        }

        let mut inputs = Vec::new();
        let mut weights = Vec::new();
        match registry::observed_input_positions(&kind) {
            Some(positions) => {
                let weight_pos = registry::weight_arg_position(&kind);
                for &pos in positions {
                    let Some(arg) = args.positional(pos) else {
                        continue;
                    };
                    let infos = self.observe(arg);
                    if Some(pos) == weight_pos {
                        weights.extend(infos);
                    } else {
                        inputs.extend(infos);
                    }
                }
            }
            None => inputs = self.observe(args),
        }

        let order_index = self.quantizable.len();
        debug!(
            order_index,
            op = %op,
            owner = owner_path,
            inputs = inputs.len(),
            weights = weights.len(),
            "recorded quantizable op"
        );
        self.quantizable.push(QuantizableOpRecord {
            order_index,
            op: kind,
            owner_path: owner_path.to_string(),
            inputs,
            outputs: Vec::new(),
            weights,
            qconfig,
        });
        Ok(OpHandle::Quantizable(order_index))
    }

    /// Records the tensor outputs of an occurrence.
    pub fn record_outputs<T: TensorOps>(
        &mut self,
        handle: OpHandle,
        outputs: &Arg<T>,
    ) -> QuantResult<()> {
        self.ensure_open()?;
        let infos: Vec<TensorProvenance> = outputs
            .leaves()
            .into_iter()
            .flatten()
            .map(|t| self.allocator.provenance_of(t))
            .collect();
        match handle {
            OpHandle::Quantizable(i) => {
                let record = self
                    .quantizable
                    .get_mut(i)
                    .ok_or(QuantError::InvalidHandle(i))?;
                record.outputs = infos;
            }
            OpHandle::NonQuantizable(i) => {
                let record = self
                    .non_quantizable
                    .get_mut(i)
                    .ok_or(QuantError::InvalidHandle(i))?;
                record.outputs = infos;
            }
        }
        Ok(())
    }

    /// Records a module parameter used as the weight of a quantizable
    /// module occurrence. Ignored for non-quantizable occurrences.
    pub fn record_module_weight<T: TensorOps>(
        &mut self,
        handle: OpHandle,
        weight: &T,
    ) -> QuantResult<()> {
        self.ensure_open()?;
        let OpHandle::Quantizable(i) = handle else {
            return Ok(());
        };
        let info = self.allocator.provenance_of(weight);
        let record = self
            .quantizable
            .get_mut(i)
            .ok_or(QuantError::InvalidHandle(i))?;
        record.weights.push(Some(info));
        Ok(())
    }

    /// Replaces the qconfig of a recorded occurrence.
    pub fn set_qconfig(&mut self, order_index: usize, qconfig: QuantConfig) -> QuantResult<()> {
        self.ensure_open()?;
        let record = self
            .quantizable
            .get_mut(order_index)
            .ok_or(QuantError::InvalidHandle(order_index))?;
        record.qconfig = qconfig;
        Ok(())
    }

    /// Ends calibration: assigns inference dtypes from each record's
    /// qconfig and freezes the ledger.
    pub fn finalize(&mut self) -> QuantResult<()> {
        self.ensure_open()?;
        for record in &mut self.quantizable {
            let act = record.qconfig.activation_dtype;
            let wgt = record.qconfig.weight_dtype;
            for info in record.inputs.iter_mut().flatten() {
                assign_inf_dtype(info, act);
            }
            for info in record.outputs.iter_mut() {
                assign_inf_dtype(info, act);
            }
            for info in record.weights.iter_mut().flatten() {
                assign_inf_dtype(info, wgt);
            }
        }
        self.finalized = true;
        info!(
            quantizable = self.quantizable.len(),
            non_quantizable = self.non_quantizable.len(),
            tensors = self.allocator.len(),
            "calibration ledger finalized"
        );
        Ok(())
    }

    /// True once calibration has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Quantizable records in calibration order.
    pub fn quantizable(&self) -> &[QuantizableOpRecord] {
        &self.quantizable
    }

    /// Non-quantizable records in calibration order.
    pub fn non_quantizable(&self) -> &[NonQuantizableOpRecord] {
        &self.non_quantizable
    }

    /// The quantizable record at `order_index`.
    pub fn record(&self, order_index: usize) -> Option<&QuantizableOpRecord> {
        self.quantizable.get(order_index)
    }

    /// Number of quantizable records.
    pub fn len(&self) -> usize {
        self.quantizable.len()
    }

    /// Returns true if no quantizable op was recorded.
    pub fn is_empty(&self) -> bool {
        self.quantizable.is_empty()
    }

    fn ensure_open(&self) -> QuantResult<()> {
        if self.finalized {
            Err(QuantError::LedgerFinalized)
        } else {
            Ok(())
        }
    }

    fn observe<T: TensorOps>(&mut self, args: &Arg<T>) -> Vec<Option<TensorProvenance>> {
        args.leaves()
            .into_iter()
            .map(|leaf| leaf.map(|t| self.allocator.provenance_of(t)))
            .collect()
    }
}

fn assign_inf_dtype(info: &mut TensorProvenance, target: DType) {
    if info.orig_dtype == DType::F32 {
        info.inf_dtype = target;
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for record in &self.quantizable {
            writeln!(f, "({}): {record}", record.order_index)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::CpuTensor;
    use crate::op::{FunctionOp, ModuleKind, ModuleOp};

    fn tensor(values: &[f32]) -> CpuTensor {
        CpuTensor::from_vec(values.to_vec(), &[values.len()]).unwrap()
    }

    #[test]
    fn test_linear_function_splits_weight() {
        let mut ledger = Ledger::new();
        let x = tensor(&[1.0, 2.0]);
        let w = tensor(&[0.5, 0.5]);
        let args = Arg::Tuple(vec![Arg::Tensor(x), Arg::Tensor(w), Arg::none()]);

        let handle = ledger
            .begin_op_occurrence(&FunctionOp::Linear.into(), "fc", &args, QuantConfig::default())
            .unwrap();
        assert_eq!(handle, OpHandle::Quantizable(0));

        let record = ledger.record(0).unwrap();
        assert_eq!(record.inputs.len(), 1);
        assert_eq!(record.weights.len(), 1);
        assert_ne!(record.inputs[0].unwrap().id, record.weights[0].unwrap().id);
        assert!(!record.is_module());
    }

    #[test]
    fn test_observe_all_leaves_and_reuse_ids() {
        let mut ledger = Ledger::new();
        let a = tensor(&[1.0]);
        let args = Arg::Tuple(vec![
            Arg::List(vec![Arg::Tensor(a.clone()), Arg::int(3)]),
            Arg::Tensor(a.clone()),
        ]);
        ledger
            .begin_op_occurrence(&FunctionOp::Add.into(), "", &args, QuantConfig::default())
            .unwrap();

        let record = ledger.record(0).unwrap();
        assert_eq!(record.inputs.len(), 3);
        assert!(record.inputs[1].is_none());
        assert_eq!(record.inputs[0], record.inputs[2]);
    }

    #[test]
    fn test_module_observes_first_arg_and_weight() {
        let mut ledger = Ledger::new();
        let x = tensor(&[1.0, 2.0]);
        let extra = tensor(&[3.0]);
        let weight = tensor(&[0.1, 0.2]);
        let args = Arg::Tuple(vec![Arg::Tensor(x), Arg::Tensor(extra)]);

        let handle = ledger
            .begin_op_occurrence(
                &OperationRef::module(ModuleKind::Linear),
                "encoder.fc",
                &args,
                QuantConfig::default(),
            )
            .unwrap();
        ledger.record_module_weight(handle, &weight).unwrap();

        let record = ledger.record(0).unwrap();
        assert!(record.is_module());
        assert_eq!(record.inputs.len(), 1);
        assert_eq!(record.weights.len(), 1);
    }

    #[test]
    fn test_non_quantizable_and_outputs() {
        let mut ledger = Ledger::new();
        let x = tensor(&[1.0]);
        let relu = OperationRef::Module(ModuleOp::inplace(ModuleKind::ReLU));
        let handle = ledger
            .begin_op_occurrence(
                &relu,
                "act",
                &Arg::Tuple(vec![Arg::Tensor(x.clone())]),
                QuantConfig::default(),
            )
            .unwrap();
        assert_eq!(handle, OpHandle::NonQuantizable(0));
        assert!(ledger.is_empty());

        ledger
            .record_outputs(handle, &Arg::Tuple(vec![Arg::Tensor(x), Arg::int(1)]))
            .unwrap();
        assert_eq!(ledger.non_quantizable()[0].outputs.len(), 1);
        let missing = ledger.record_outputs(OpHandle::Quantizable(5), &Arg::<CpuTensor>::none());
        assert!(missing.is_err());
    }

    #[test]
    fn test_order_index_counts_quantizable_only() {
        let mut ledger = Ledger::new();
        let x = Arg::Tuple(vec![Arg::Tensor(tensor(&[1.0]))]);
        let other: OperationRef = FunctionOp::Other("softmax".to_string()).into();

        let relu: OperationRef = FunctionOp::Relu.into();
        let qconfig = QuantConfig::default();

        ledger.begin_op_occurrence(&relu, "", &x, qconfig).unwrap();
        ledger.begin_op_occurrence(&other, "", &x, qconfig).unwrap();
        let h = ledger
            .begin_op_occurrence(&FunctionOp::Sigmoid.into(), "", &x, QuantConfig::default())
            .unwrap();
        assert_eq!(h, OpHandle::Quantizable(1));
        assert_eq!(ledger.record(1).unwrap().order_index, 1);
    }

    #[test]
    fn test_finalize_assigns_dtypes_and_freezes() {
        let mut ledger = Ledger::new();
        let x = tensor(&[1.0]);
        let w = tensor(&[1.0]);
        let bf = tensor(&[1.0]).to_dtype(DType::BF16).unwrap();
        let args = Arg::Tuple(vec![Arg::Tensor(x), Arg::Tensor(w)]);
        let handle = ledger
            .begin_op_occurrence(&FunctionOp::Conv2d.into(), "conv", &args, QuantConfig::default())
            .unwrap();
        ledger
            .record_outputs(handle, &Arg::Tuple(vec![Arg::Tensor(bf)]))
            .unwrap();
        ledger.finalize().unwrap();

        let record = ledger.record(0).unwrap();
        assert_eq!(record.inputs[0].unwrap().inf_dtype, DType::QUInt8);
        assert_eq!(record.weights[0].unwrap().inf_dtype, DType::QInt8);
        // Non-float32 originals keep their dtype.
        assert_eq!(record.outputs[0].inf_dtype, DType::BF16);

        assert!(ledger.is_finalized());
        assert!(matches!(
            ledger.set_qconfig(0, QuantConfig::default()),
            Err(QuantError::LedgerFinalized)
        ));
        assert!(ledger.to_string().contains("(op): conv2d"));
    }
}
