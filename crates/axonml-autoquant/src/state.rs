//! Quantization State
//!
//! Entry point used by a model runtime: classifies ops, records the
//! calibration pass and hands out convert passes over the finished ledger.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::args::Arg;
use crate::config::{AutoQuantConfig, ExecutionContext};
use crate::convert::ConvertPass;
use crate::error::{QuantError, QuantResult};
use crate::ledger::{Ledger, OpHandle};
use crate::op::OperationRef;
use crate::policy::ScaleZeroPointMap;
use crate::registry;
use crate::tensor::TensorOps;

/// Result of classifying an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// The op takes part in quantization.
    Eligible,
    /// The op is left in float.
    NotEligible,
}

/// Configuration plus the ledger of one model.
#[derive(Debug, Default)]
pub struct QuantizationState {
    config: AutoQuantConfig,
    ledger: Ledger,
}

impl QuantizationState {
    /// Creates a state with a validated configuration.
    pub fn new(config: AutoQuantConfig) -> QuantResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ledger: Ledger::new(),
        })
    }

    /// Classifies an op.
    pub fn classify(op: &OperationRef) -> Eligibility {
        if registry::is_quantizable(op) {
            Eligibility::Eligible
        } else {
            Eligibility::NotEligible
        }
    }

    /// Records an op occurrence of the calibration pass. The qconfig comes
    /// from the override matching `owner_path`.
    pub fn begin_op_occurrence<T: TensorOps>(
        &mut self,
        op: &OperationRef,
        owner_path: &str,
        args: &Arg<T>,
    ) -> QuantResult<OpHandle> {
        let qconfig = self.config.qconfig_for(owner_path);
        self.ledger.begin_op_occurrence(op, owner_path, args, qconfig)
    }

    /// Records the outputs of an occurrence.
    pub fn record_outputs<T: TensorOps>(
        &mut self,
        handle: OpHandle,
        outputs: &Arg<T>,
    ) -> QuantResult<()> {
        self.ledger.record_outputs(handle, outputs)
    }

    /// Records a module parameter used as a weight.
    pub fn record_module_weight<T: TensorOps>(
        &mut self,
        handle: OpHandle,
        weight: &T,
    ) -> QuantResult<()> {
        self.ledger.record_module_weight(handle, weight)
    }

    /// Ends calibration.
    pub fn finalize(&mut self) -> QuantResult<()> {
        self.ledger.finalize()
    }

    /// The calibration ledger.
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The configuration.
    pub fn config(&self) -> &AutoQuantConfig {
        &self.config
    }

    /// Starts a convert pass with the configured execution context.
    pub fn convert_pass<'a>(
        &'a self,
        scales: &'a ScaleZeroPointMap,
    ) -> QuantResult<ConvertPass<'a>> {
        self.convert_pass_with_context(scales, self.config.execution)
    }

    /// Starts a convert pass with an explicit execution context.
    pub fn convert_pass_with_context<'a>(
        &'a self,
        scales: &'a ScaleZeroPointMap,
        ctx: ExecutionContext,
    ) -> QuantResult<ConvertPass<'a>> {
        if !self.ledger.is_finalized() {
            return Err(QuantError::Config(
                "convert pass requested before calibration was finalized".to_string(),
            ));
        }
        Ok(ConvertPass::new(&self.ledger, scales, ctx))
    }
}

// =============================================================================
// Tests
// =============================================================================
