//! Axonml AutoQuant - Runtime Quantization Observation and Conversion
//!
//! Observes the ops a model runs during a calibration pass, records which
//! tensors flow through quantizable ops, and on later passes inserts
//! quantize→dequantize pairs at the recorded positions.
//!
//! - **Registry**: which ops and modules take part in quantization
//! - **Ledger**: the calibration record of every op occurrence
//! - **Walker**: pairs nested call arguments with recorded tensor infos
//! - **Policy**: per-slot conversion decisions and branch selection
//! - **Guard**: fails fast when control flow diverges from calibration
//!
//! # Example
//! ```ignore
//! use axonml_autoquant::{Arg, AutoQuantConfig, FunctionOp, QuantizationState};
//!
//! let mut state = QuantizationState::new(AutoQuantConfig::default())?;
//! let handle = state.begin_op_occurrence(&FunctionOp::Linear.into(), "fc", &args)?;
//! state.record_outputs(handle, &outputs)?;
//! state.finalize()?;
//!
//! let mut pass = state.convert_pass(&scales)?;
//! let args = pass.convert(&FunctionOp::Linear.into(), args)?;
//! ```
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

pub mod args;
pub mod config;
pub mod convert;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod op;
pub mod policy;
pub mod provenance;
pub mod registry;
pub mod state;
pub mod tensor;

pub use args::{walk, Arg, Value, WalkCursor};
pub use config::{AutoQuantConfig, ExecutionContext, Granularity, QConfigOverride, QuantConfig};
pub use convert::{convert_args, convert_module_weights, fake_quantize, ConvertPass};
pub use cpu::{CpuQuantized, CpuTensor, QParams};
pub use dtype::DType;
pub use error::{ControlFlowViolation, QuantError, QuantResult};
pub use guard::ReplayGuard;
pub use ledger::{Ledger, NonQuantizableOpRecord, OpHandle, QuantizableOpRecord};
pub use op::{FunctionOp, ModuleKind, ModuleOp, OpKind, OperationRef};
pub use policy::{ConversionBranch, ConversionPlan, QuantInfo, ScaleZeroPoint, ScaleZeroPointMap};
pub use provenance::{TensorId, TensorProvenance};
pub use state::{Eligibility, QuantizationState};
pub use tensor::TensorOps;

// =============================================================================
// Tests
// =============================================================================
