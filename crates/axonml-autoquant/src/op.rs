//! Operation Identities
//!
//! Closed descriptions of the call sites the tracer reports: free
//! functions and methods on one side, stateful module instances on the
//! other. Identity comparison is structural; modules compare by type.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use std::fmt;

// =============================================================================
// Functions
// =============================================================================

/// A free function or tensor method seen by the tracer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FunctionOp {
    /// `add(a, b)`.
    Add,
    /// `a.add(b)`.
    TensorAdd,
    /// `relu(x)`.
    Relu,
    /// `x.relu()`.
    TensorRelu,
    /// `sigmoid(x)`.
    Sigmoid,
    /// `x.sigmoid()`.
    TensorSigmoid,
    /// `gelu(x)`.
    Gelu,
    /// `flatten(x, ...)`.
    Flatten,
    /// `adaptive_avg_pool2d`.
    AdaptiveAvgPool2d,
    /// `adaptive_avg_pool3d`.
    AdaptiveAvgPool3d,
    /// `avg_pool2d`.
    AvgPool2d,
    /// `avg_pool3d`.
    AvgPool3d,
    /// `max_pool2d`.
    MaxPool2d,
    /// `max_pool3d`.
    MaxPool3d,
    /// `conv2d(input, weight, bias, ...)`.
    Conv2d,
    /// `conv3d(input, weight, bias, ...)`.
    Conv3d,
    /// `conv_transpose2d(input, weight, bias, ...)`.
    ConvTranspose2d,
    /// `conv_transpose3d(input, weight, bias, ...)`.
    ConvTranspose3d,
    /// `linear(input, weight, bias)`.
    Linear,
    /// `matmul(a, b)`.
    Matmul,
    /// `embedding_bag(input, weight, offsets, ...)`.
    EmbeddingBag,
    /// Feature interaction of recommendation models.
    Interaction,
    /// Kernel-level entry point of the feature interaction.
    InteractionForward,
    /// Any other function, by qualified name.
    Other(String),
}

impl FunctionOp {
    /// Returns the display name of this function.
    pub fn name(&self) -> &str {
        match self {
            FunctionOp::Add => "add",
            FunctionOp::TensorAdd => "Tensor.add",
            FunctionOp::Relu => "relu",
            FunctionOp::TensorRelu => "Tensor.relu",
            FunctionOp::Sigmoid => "sigmoid",
            FunctionOp::TensorSigmoid => "Tensor.sigmoid",
            FunctionOp::Gelu => "gelu",
            FunctionOp::Flatten => "flatten",
            FunctionOp::AdaptiveAvgPool2d => "adaptive_avg_pool2d",
            FunctionOp::AdaptiveAvgPool3d => "adaptive_avg_pool3d",
            FunctionOp::AvgPool2d => "avg_pool2d",
            FunctionOp::AvgPool3d => "avg_pool3d",
            FunctionOp::MaxPool2d => "max_pool2d",
            FunctionOp::MaxPool3d => "max_pool3d",
            FunctionOp::Conv2d => "conv2d",
            FunctionOp::Conv3d => "conv3d",
            FunctionOp::ConvTranspose2d => "conv_transpose2d",
            FunctionOp::ConvTranspose3d => "conv_transpose3d",
            FunctionOp::Linear => "linear",
            FunctionOp::Matmul => "matmul",
            FunctionOp::EmbeddingBag => "embedding_bag",
            FunctionOp::Interaction => "interaction",
            FunctionOp::InteractionForward => "interaction_forward",
            FunctionOp::Other(name) => name,
        }
    }
}

impl fmt::Display for FunctionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Modules
// =============================================================================

/// Runtime type of a stateful module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// 2-D convolution.
    Conv2d,
    /// 3-D convolution.
    Conv3d,
    /// 2-D transposed convolution.
    ConvTranspose2d,
    /// 3-D transposed convolution.
    ConvTranspose3d,
    /// Fully connected layer.
    Linear,
    /// 2-D max pooling.
    MaxPool2d,
    /// 3-D max pooling.
    MaxPool3d,
    /// 2-D average pooling.
    AvgPool2d,
    /// 3-D average pooling.
    AvgPool3d,
    /// 2-D adaptive average pooling.
    AdaptiveAvgPool2d,
    /// 3-D adaptive average pooling.
    AdaptiveAvgPool3d,
    /// ReLU activation.
    ReLU,
    /// Sigmoid activation.
    Sigmoid,
    /// GELU activation.
    GELU,
    /// Bag-of-embeddings lookup.
    EmbeddingBag,
    /// Flatten.
    Flatten,
    /// LSTM recurrent layer.
    LSTM,
    /// Any other module type, by type name.
    Other(String),
}

impl ModuleKind {
    /// Returns the type name of this module.
    pub fn name(&self) -> &str {
        match self {
            ModuleKind::Conv2d => "Conv2d",
            ModuleKind::Conv3d => "Conv3d",
            ModuleKind::ConvTranspose2d => "ConvTranspose2d",
            ModuleKind::ConvTranspose3d => "ConvTranspose3d",
            ModuleKind::Linear => "Linear",
            ModuleKind::MaxPool2d => "MaxPool2d",
            ModuleKind::MaxPool3d => "MaxPool3d",
            ModuleKind::AvgPool2d => "AvgPool2d",
            ModuleKind::AvgPool3d => "AvgPool3d",
            ModuleKind::AdaptiveAvgPool2d => "AdaptiveAvgPool2d",
            ModuleKind::AdaptiveAvgPool3d => "AdaptiveAvgPool3d",
            ModuleKind::ReLU => "ReLU",
            ModuleKind::Sigmoid => "Sigmoid",
            ModuleKind::GELU => "GELU",
            ModuleKind::EmbeddingBag => "EmbeddingBag",
            ModuleKind::Flatten => "Flatten",
            ModuleKind::LSTM => "LSTM",
            ModuleKind::Other(name) => name,
        }
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nn.{}", self.name())
    }
}

/// A live module instance as seen at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleOp {
    /// Runtime type.
    pub kind: ModuleKind,
    /// Whether the module was configured to overwrite its input.
    pub inplace: bool,
}

impl ModuleOp {
    /// Creates a module op that does not run in place.
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            inplace: false,
        }
    }

    /// Creates a module op configured to run in place.
    pub fn inplace(kind: ModuleKind) -> Self {
        Self {
            kind,
            inplace: true,
        }
    }
}

// =============================================================================
// OperationRef / OpKind
// =============================================================================

/// An operation encountered at a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationRef {
    /// Free function or tensor method.
    Function(FunctionOp),
    /// Stateful module instance.
    Module(ModuleOp),
}

impl OperationRef {
    /// Shorthand for a module instance that does not run in place.
    pub fn module(kind: ModuleKind) -> Self {
        OperationRef::Module(ModuleOp::new(kind))
    }

    /// Identity of this op as recorded in the ledger. Modules collapse to
    /// their runtime type.
    pub fn kind(&self) -> OpKind {
        match self {
            OperationRef::Function(f) => OpKind::Function(f.clone()),
            OperationRef::Module(m) => OpKind::Module(m.kind.clone()),
        }
    }

    /// Returns true for module instances.
    pub fn is_module(&self) -> bool {
        matches!(self, OperationRef::Module(_))
    }
}

impl From<FunctionOp> for OperationRef {
    fn from(f: FunctionOp) -> Self {
        OperationRef::Function(f)
    }
}

impl From<ModuleOp> for OperationRef {
    fn from(m: ModuleOp) -> Self {
        OperationRef::Module(m)
    }
}

impl fmt::Display for OperationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationRef::Function(func) => write!(f, "{func}"),
            OperationRef::Module(m) => write!(f, "{}", m.kind),
        }
    }
}

/// Normalized op identity stored in ledger records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Free function or tensor method.
    Function(FunctionOp),
    /// Module type.
    Module(ModuleKind),
}

impl OpKind {
    /// Returns true for module types.
    pub fn is_module(&self) -> bool {
        matches!(self, OpKind::Module(_))
    }

    /// Returns the function, if this is a function identity.
    pub fn as_function(&self) -> Option<&FunctionOp> {
        match self {
            OpKind::Function(f) => Some(f),
            OpKind::Module(_) => None,
        }
    }

    /// Returns the module type, if this is a module identity.
    pub fn as_module(&self) -> Option<&ModuleKind> {
        match self {
            OpKind::Module(m) => Some(m),
            OpKind::Function(_) => None,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Function(func) => write!(f, "{func}"),
            OpKind::Module(m) => write!(f, "{m}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
