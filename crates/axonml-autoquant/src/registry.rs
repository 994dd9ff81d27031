//! Eligibility Registry
//!
//! Static tables describing which operations take part in quantization,
//! which argument positions carry weights, and which call sites count as
//! the same operation across passes. All lookups are pure; unknown ops get
//! the conservative answer.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::op::{FunctionOp, ModuleKind, OpKind, OperationRef};

// =============================================================================
// Tables
// =============================================================================

/// Functions and methods that support quantization.
pub const FUNCTIONS_SUPPORTED: &[FunctionOp] = &[
    FunctionOp::Add,
    FunctionOp::TensorAdd,
    FunctionOp::Relu,
    FunctionOp::TensorRelu,
    FunctionOp::Sigmoid,
    FunctionOp::TensorSigmoid,
    FunctionOp::Gelu,
    FunctionOp::Flatten,
    FunctionOp::AdaptiveAvgPool2d,
    FunctionOp::AdaptiveAvgPool3d,
    FunctionOp::AvgPool2d,
    FunctionOp::AvgPool3d,
    FunctionOp::MaxPool2d,
    FunctionOp::MaxPool3d,
    FunctionOp::Conv2d,
    FunctionOp::Conv3d,
    FunctionOp::ConvTranspose2d,
    FunctionOp::ConvTranspose3d,
    FunctionOp::Linear,
    FunctionOp::Matmul,
    FunctionOp::EmbeddingBag,
    FunctionOp::Interaction,
    FunctionOp::InteractionForward,
];

/// Module types that support quantization.
pub const MODULES_SUPPORTED: &[ModuleKind] = &[
    ModuleKind::Conv2d,
    ModuleKind::Conv3d,
    ModuleKind::ConvTranspose2d,
    ModuleKind::ConvTranspose3d,
    ModuleKind::Linear,
    ModuleKind::MaxPool2d,
    ModuleKind::MaxPool3d,
    ModuleKind::AvgPool2d,
    ModuleKind::AvgPool3d,
    ModuleKind::AdaptiveAvgPool2d,
    ModuleKind::AdaptiveAvgPool3d,
    ModuleKind::ReLU,
    ModuleKind::Sigmoid,
    ModuleKind::GELU,
    ModuleKind::EmbeddingBag,
    ModuleKind::Flatten,
    ModuleKind::LSTM,
];

/// Module types that may be configured to overwrite their input.
pub const MAY_INPLACE_MODULES: &[ModuleKind] = &[ModuleKind::ReLU];

/// Function pairs treated as the same operation.
pub const RELATED_FUNCTIONS: &[(FunctionOp, FunctionOp)] =
    &[(FunctionOp::Add, FunctionOp::TensorAdd)];

/// Convolution and linear functions; their weight sits at position 1.
pub const CONV_LINEAR_FUNCTIONS: &[FunctionOp] = &[
    FunctionOp::Conv2d,
    FunctionOp::Conv3d,
    FunctionOp::ConvTranspose2d,
    FunctionOp::ConvTranspose3d,
    FunctionOp::Linear,
];

/// Convolution and linear module types.
pub const CONV_LINEAR_MODULES: &[ModuleKind] = &[
    ModuleKind::Conv2d,
    ModuleKind::Conv3d,
    ModuleKind::ConvTranspose2d,
    ModuleKind::ConvTranspose3d,
    ModuleKind::Linear,
];

/// Bag-style embedding functions.
pub const EMBEDDING_FUNCTIONS: &[FunctionOp] = &[FunctionOp::EmbeddingBag];

const WEIGHT_ARG_POSITION: usize = 1;

const MODULE_OBSERVED_ARGS: &[usize] = &[0];
const CONV_LINEAR_OBSERVED_ARGS: &[usize] = &[0, WEIGHT_ARG_POSITION];
const EMBEDDING_OBSERVED_ARGS: &[usize] = &[1];

// =============================================================================
// Classification
// =============================================================================

/// Returns true when `op` takes part in quantization.
///
/// A module that may run in place is rejected while its in-place flag is
/// set: the overwritten input is needed later for requantization.
pub fn is_quantizable(op: &OperationRef) -> bool {
    match op {
        OperationRef::Function(f) => FUNCTIONS_SUPPORTED.contains(f),
        OperationRef::Module(m) => {
            if !MODULES_SUPPORTED.contains(&m.kind) {
                return false;
            }
            !(MAY_INPLACE_MODULES.contains(&m.kind) && m.inplace)
        }
    }
}

/// Checks that a live op matches the identity recorded during calibration.
pub fn are_same_operation(observed: &OperationRef, recorded: &OpKind) -> bool {
    let observed = observed.kind();
    if observed == *recorded {
        return true;
    }
    match (&observed, recorded) {
        (OpKind::Function(a), OpKind::Function(b)) => RELATED_FUNCTIONS
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a)),
        _ => false,
    }
}

/// Positional arguments to observe for an op; `None` observes every
/// tensor leaf.
pub fn observed_input_positions(kind: &OpKind) -> Option<&'static [usize]> {
    match kind {
        // TODO: recurrent modules observe only their first input for now.
        OpKind::Module(m) if *m != ModuleKind::EmbeddingBag => Some(MODULE_OBSERVED_ARGS),
        OpKind::Function(f) if CONV_LINEAR_FUNCTIONS.contains(f) => {
            Some(CONV_LINEAR_OBSERVED_ARGS)
        }
        OpKind::Function(f) if EMBEDDING_FUNCTIONS.contains(f) => Some(EMBEDDING_OBSERVED_ARGS),
        _ => None,
    }
}

/// Position of the weight argument for weight-bearing functions.
pub fn weight_arg_position(kind: &OpKind) -> Option<usize> {
    match kind {
        OpKind::Function(f) if CONV_LINEAR_FUNCTIONS.contains(f) => Some(WEIGHT_ARG_POSITION),
        _ => None,
    }
}

// =============================================================================
// Families
// =============================================================================

/// Convolution or linear function.
pub fn is_conv_linear_function(kind: &OpKind) -> bool {
    kind.as_function()
        .is_some_and(|f| CONV_LINEAR_FUNCTIONS.contains(f))
}

/// Convolution or linear module type.
pub fn is_conv_linear_module(kind: &OpKind) -> bool {
    kind.as_module().is_some_and(|m| CONV_LINEAR_MODULES.contains(m))
}

/// Ops converted with the weight/activation family policy: conv, linear,
/// matmul and embedding-bag functions plus conv/linear modules.
pub fn uses_family_policy(kind: &OpKind) -> bool {
    match kind {
        OpKind::Function(f) => {
            CONV_LINEAR_FUNCTIONS.contains(f)
                || EMBEDDING_FUNCTIONS.contains(f)
                || *f == FunctionOp::Matmul
        }
        OpKind::Module(m) => CONV_LINEAR_MODULES.contains(m),
    }
}

/// Channel axis of a per-channel weight. Transposed convolutions store
/// input channels first, so their output channels sit on axis 1.
pub fn weight_channel_axis(kind: &OpKind) -> usize {
    match kind {
        OpKind::Function(FunctionOp::ConvTranspose2d | FunctionOp::ConvTranspose3d)
        | OpKind::Module(ModuleKind::ConvTranspose2d | ModuleKind::ConvTranspose3d) => 1,
        _ => 0,
    }
}

// =============================================================================
// Tests
// =============================================================================
