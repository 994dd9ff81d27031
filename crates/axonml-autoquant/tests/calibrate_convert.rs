//! Integration tests for calibration followed by convert passes.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use axonml_autoquant::{
    Arg, AutoQuantConfig, ControlFlowViolation, CpuTensor, DType, ExecutionContext, FunctionOp,
    ModuleKind, OperationRef, QuantError, QuantizationState, ScaleZeroPoint, ScaleZeroPointMap,
    TensorOps,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn tensor(data: &[f32], shape: &[usize]) -> CpuTensor {
    CpuTensor::from_vec(data.to_vec(), shape).unwrap()
}

fn pair(a: &CpuTensor, b: &CpuTensor) -> Arg<CpuTensor> {
    Arg::Tuple(vec![Arg::Tensor(a.clone()), Arg::Tensor(b.clone())])
}

fn calibrate(ops: &[FunctionOp]) -> QuantizationState {
    let mut state = QuantizationState::default();
    let x = tensor(&[0.5, 1.5], &[2]);
    for f in ops {
        let op = OperationRef::Function(f.clone());
        let handle = state.begin_op_occurrence(&op, "", &pair(&x, &x)).unwrap();
        state.record_outputs(handle, &Arg::Tensor(x.clone())).unwrap();
    }
    state.finalize().unwrap();
    state
}

fn linear_weight() -> CpuTensor {
    tensor(
        &[
            0.13, -0.27, 0.31, //
            0.44, -0.52, 0.05, //
            0.07, 0.21, -0.33, //
            0.90, -0.18, 0.36,
        ],
        &[4, 3],
    )
}

// =============================================================================
// Consistency Guard
// =============================================================================

#[test]
fn test_divergent_control_flow_is_fatal() {
    let state = calibrate(&[FunctionOp::Add, FunctionOp::Relu]);
    let scales = ScaleZeroPointMap::new();
    let x = tensor(&[1.0], &[1]);

    let mut pass = state.convert_pass(&scales).unwrap();
    pass.convert(&FunctionOp::Add.into(), pair(&x, &x)).unwrap();
    let err = pass
        .convert(&FunctionOp::Sigmoid.into(), pair(&x, &x))
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        QuantError::DynamicControlFlow {
            kind: ControlFlowViolation::OpMismatch,
            ..
        }
    ));
    let message = err.to_string();
    assert!(message.contains("sigmoid"));
    assert!(message.contains("relu"));

    let mut replay = state.convert_pass(&scales).unwrap();
    replay.convert(&FunctionOp::Add.into(), pair(&x, &x)).unwrap();
    replay.convert(&FunctionOp::Relu.into(), pair(&x, &x)).unwrap();
    assert_eq!(replay.position(), 2);
}

#[test]
fn test_extra_eligible_op_exhausts_ledger() {
    let state = calibrate(&[FunctionOp::Add]);
    let scales = ScaleZeroPointMap::new();
    let x = tensor(&[1.0], &[1]);

    let mut pass = state.convert_pass(&scales).unwrap();
    pass.convert(&FunctionOp::TensorAdd.into(), pair(&x, &x)).unwrap();
    let err = pass
        .convert(&FunctionOp::Add.into(), pair(&x, &x))
        .unwrap_err();
    assert!(matches!(
        err,
        QuantError::DynamicControlFlow {
            kind: ControlFlowViolation::LedgerExhausted,
            ..
        }
    ));
}

#[test]
fn test_ineligible_ops_pass_through() {
    let state = calibrate(&[FunctionOp::Add]);
    let scales = ScaleZeroPointMap::new();
    let x = tensor(&[0.123], &[1]);

    let mut pass = state.convert_pass(&scales).unwrap();
    let softmax = OperationRef::Function(FunctionOp::Other("softmax".to_string()));
    let out = pass.convert(&softmax, pair(&x, &x)).unwrap();
    assert_eq!(out, pair(&x, &x));
    assert_eq!(pass.position(), 0);

    let inplace_relu = OperationRef::Module(axonml_autoquant::ModuleOp::inplace(ModuleKind::ReLU));
    pass.convert(&inplace_relu, Arg::Tuple(vec![Arg::Tensor(x.clone())]))
        .unwrap();
    assert_eq!(pass.position(), 0);
}

// =============================================================================
// Conversion
// =============================================================================

#[test]
fn test_linear_per_channel_weight() {
    let mut state = QuantizationState::default();
    let x = tensor(&[0.12, 0.43, 0.81, 0.33, 0.67, 0.21], &[2, 3]);
    let w = linear_weight();
    let bias = tensor(&[0.01, 0.02, 0.03, 0.04], &[4]);
    let args = Arg::Tuple(vec![
        Arg::Tensor(x.clone()),
        Arg::Tensor(w.clone()),
        Arg::Tensor(bias.clone()),
    ]);

    let op: OperationRef = FunctionOp::Linear.into();
    state.begin_op_occurrence(&op, "fc", &args).unwrap();
    state.finalize().unwrap();

    let record = &state.ledger().quantizable()[0];
    let x_id = record.inputs[0].unwrap().id;
    let w_id = record.weights[0].unwrap().id;
    assert_eq!(record.weights[0].unwrap().inf_dtype, DType::QInt8);

    let channel_scales = [0.1, 0.2, 0.1, 0.2];
    let mut scales = ScaleZeroPointMap::new();
    scales.insert_activation(x_id, ScaleZeroPoint::per_tensor(0.05, 0));
    scales.insert_weight(
        0,
        w_id,
        ScaleZeroPoint::per_channel(channel_scales.to_vec(), vec![0; 4]).unwrap(),
    );

    let mut pass = state.convert_pass(&scales).unwrap();
    let out = pass.convert(&op, args).unwrap();
    let leaves: Vec<&CpuTensor> = out.leaves().into_iter().flatten().collect();

    let converted_w = leaves[1];
    assert_eq!(converted_w.dtype(), DType::F32);
    assert_eq!(converted_w.shape(), &[4, 3]);
    for (i, (q, orig)) in converted_w
        .to_vec()
        .iter()
        .zip(w.to_vec().iter())
        .enumerate()
    {
        let step = channel_scales[i / 3];
        assert!((q - orig).abs() <= step + 1e-6, "weight {i}: {q} vs {orig}");
        let steps = q / step;
        assert!((steps - steps.round()).abs() < 1e-4);
    }

    assert_ne!(leaves[0].to_vec(), x.to_vec());
    assert_eq!(leaves[2], &bias);
}

#[test]
fn test_conv_transpose_channel_axis() {
    let mut state = QuantizationState::default();
    // [in=1, out=3, 1, 1] weight: output channels on axis 1.
    let w = tensor(&[0.33, 0.33, 0.33], &[1, 3, 1, 1]);
    let x = tensor(&[1.0], &[1, 1, 1, 1]);
    let args = pair(&x, &w);

    let op: OperationRef = FunctionOp::ConvTranspose2d.into();
    state.begin_op_occurrence(&op, "up", &args).unwrap();
    state.finalize().unwrap();
    let w_id = state.ledger().quantizable()[0].weights[0].unwrap().id;

    let mut scales = ScaleZeroPointMap::new();
    scales.insert_weight(
        0,
        w_id,
        ScaleZeroPoint::per_channel(vec![0.1, 0.2, 0.4], vec![0, 0, 0]).unwrap(),
    );

    let mut pass = state.convert_pass(&scales).unwrap();
    let out = pass.convert(&op, args).unwrap();
    let converted = out.positional(1).and_then(Arg::as_tensor).unwrap();
    let values = converted.to_vec();
    assert!((values[0] - 0.3).abs() < 1e-6);
    assert!((values[1] - 0.4).abs() < 1e-6);
    assert!((values[2] - 0.4).abs() < 1e-6);
    // The activation has no scale entry and is left alone.
    assert_eq!(out.positional(0).and_then(Arg::as_tensor), Some(&x));
}

#[test]
fn test_per_channel_weight_under_autocast() {
    let mut state = QuantizationState::default();
    let x = tensor(&[0.3, 0.7, 0.2], &[1, 3]);
    let w = linear_weight();
    let op: OperationRef = FunctionOp::Linear.into();
    state.begin_op_occurrence(&op, "fc", &pair(&x, &w)).unwrap();
    state.finalize().unwrap();
    let w_id = state.ledger().quantizable()[0].weights[0].unwrap().id;

    let channel_scales = [0.1, 0.2, 0.1, 0.2];
    let mut scales = ScaleZeroPointMap::new();
    let per_channel = ScaleZeroPoint::per_channel(channel_scales.to_vec(), vec![0; 4]).unwrap();
    scales.insert_weight(0, w_id, per_channel);

    let mut pass = state
        .convert_pass_with_context(&scales, ExecutionContext::bf16_autocast())
        .unwrap();
    let out = pass.convert(&op, pair(&x, &w)).unwrap();

    // The activation has no scale entry and keeps its dtype.
    assert_eq!(out.positional(0).and_then(Arg::as_tensor), Some(&x));

    let converted = out.positional(1).and_then(Arg::as_tensor).unwrap();
    assert_eq!(converted.dtype(), DType::BF16);
    assert_eq!(converted.shape(), &[4, 3]);

    // Every value is a grid point of its channel, rounded to bf16.
    let rounded_input = w.to_dtype(DType::BF16).unwrap().to_vec();
    for (i, (&q, &orig)) in converted.to_vec().iter().zip(rounded_input.iter()).enumerate() {
        let step: f32 = channel_scales[i / 3];
        let grid = (orig / step).round_ties_even() * step;
        let expected = tensor(&[grid], &[1]).to_dtype(DType::BF16).unwrap().to_vec()[0];
        assert_eq!(q, expected, "weight {i}");
    }
}

#[test]
fn test_infinite_activation_is_clamped() {
    let mut state = QuantizationState::default();
    let x = tensor(&[f32::INFINITY, 1.0, f32::NEG_INFINITY], &[3]);
    let op: OperationRef = FunctionOp::Add.into();
    state.begin_op_occurrence(&op, "", &pair(&x, &x)).unwrap();
    state.finalize().unwrap();
    let x_id = state.ledger().quantizable()[0].inputs[0].unwrap().id;

    let mut scales = ScaleZeroPointMap::new();
    scales.insert_activation(x_id, ScaleZeroPoint::per_tensor(0.1, 3));

    let mut pass = state.convert_pass(&scales).unwrap();
    let out = pass.convert(&op, pair(&x, &x)).unwrap();
    let values = out.positional(0).and_then(Arg::as_tensor).unwrap().to_vec();
    assert!((values[0] - 25.2).abs() < 1e-4);
    assert!((values[1] - 1.0).abs() < 1e-6);
    assert!((values[2] + 0.3).abs() < 1e-6);
}

#[test]
fn test_quantized_or_reduced_origin_is_noop() {
    let mut state = QuantizationState::default();
    let x = tensor(&[0.37, 0.81], &[2]).to_dtype(DType::BF16).unwrap();
    let args = pair(&x, &x);
    let op: OperationRef = FunctionOp::Add.into();
    state.begin_op_occurrence(&op, "", &args).unwrap();
    state.finalize().unwrap();

    let record = &state.ledger().quantizable()[0];
    assert_eq!(record.inputs[0].unwrap().inf_dtype, DType::BF16);

    let mut scales = ScaleZeroPointMap::new();
    scales.insert_activation(record.inputs[0].unwrap().id, ScaleZeroPoint::per_tensor(0.5, 0));

    let mut pass = state.convert_pass(&scales).unwrap();
    assert_eq!(pass.convert(&op, args.clone()).unwrap(), args);
}

#[test]
fn test_autocast_dtypes() {
    let mut state = QuantizationState::default();
    let x = tensor(&[0.3, 0.7], &[1, 2]);
    let w = tensor(&[0.2, 0.6], &[1, 2]);
    let op: OperationRef = FunctionOp::Linear.into();
    state.begin_op_occurrence(&op, "fc", &pair(&x, &w)).unwrap();

    let add: OperationRef = FunctionOp::Add.into();
    state.begin_op_occurrence(&add, "", &pair(&x, &x)).unwrap();
    state.finalize().unwrap();

    let mut scales = ScaleZeroPointMap::new();
    let records = state.ledger().quantizable();
    scales.insert_activation(records[0].inputs[0].unwrap().id, ScaleZeroPoint::per_tensor(0.1, 0));
    scales.insert_weight(0, records[0].weights[0].unwrap().id, ScaleZeroPoint::per_tensor(0.1, 0));

    let mut pass = state
        .convert_pass_with_context(&scales, ExecutionContext::bf16_autocast())
        .unwrap();
    let out = pass.convert(&op, pair(&x, &w)).unwrap();
    for leaf in out.leaves().into_iter().flatten() {
        assert_eq!(leaf.dtype(), DType::BF16);
    }

    // Fallback branch: a bf16 input comes back as bf16, a float32 one as
    // float32, whatever the autocast state.
    let bf = x.to_dtype(DType::BF16).unwrap();
    let out = pass.convert(&add, pair(&bf, &x)).unwrap();
    let dtypes: Vec<DType> = out.leaves().into_iter().flatten().map(TensorOps::dtype).collect();
    assert_eq!(dtypes, vec![DType::BF16, DType::F32]);
}

#[test]
fn test_linear_module_weights() {
    let mut state = QuantizationState::default();
    let x = tensor(&[0.25, 0.5], &[1, 2]);
    let w = tensor(&[0.11, 0.52, -0.37, 0.74], &[2, 2]);
    let module = OperationRef::module(ModuleKind::Linear);

    let args = Arg::Tuple(vec![Arg::Tensor(x.clone())]);
    let handle = state.begin_op_occurrence(&module, "fc", &args).unwrap();
    state.record_module_weight(handle, &w).unwrap();
    state.finalize().unwrap();

    let record = &state.ledger().quantizable()[0];
    assert!(record.is_module());
    assert_eq!(record.inputs.len(), 1);
    let w_id = record.weights[0].unwrap().id;

    let mut scales = ScaleZeroPointMap::new();
    let per_channel = ScaleZeroPoint::per_channel(vec![0.1, 0.25], vec![0, 0]).unwrap();
    scales.insert_weight(0, w_id, per_channel);

    let mut pass = state.convert_pass(&scales).unwrap();
    let (out_args, weights) = pass.convert_with_weights(&module, args.clone(), vec![w]).unwrap();
    assert_eq!(out_args, args);

    let expected = [0.1, 0.5, -0.25, 0.75];
    for (a, b) in weights[0].to_vec().iter().zip(expected.iter()) {
        assert!((a - b).abs() < 1e-6, "{a} vs {b}");
    }
}

#[test]
fn test_config_drives_execution_context() {
    let config = AutoQuantConfig::from_toml_str("[execution]\nautocast_enabled = true").unwrap();
    let state = QuantizationState::new(config).unwrap();
    assert!(state.config().execution.is_autocast_bf16());

    let mut calibrated = QuantizationState::new(state.config().clone()).unwrap();
    calibrated.finalize().unwrap();
    let scales = ScaleZeroPointMap::new();
    let pass = calibrated.convert_pass(&scales).unwrap();
    assert!(pass.context().is_autocast_bf16());
}
