//! Quantization parameters of `u8` network inputs and outputs.
//!
//! Quantized ONNX graphs keep the affine parameters on the `DequantizeLinear` node consuming a
//! graph input and on the `QuantizeLinear` node producing a graph output. Both engines attach
//! them to their [`TensorInfo`]s from here, so a model behaves the same on every backend.

use std::collections::HashMap;

use anyhow::Context;
use tract_onnx::{
    pb::{GraphProto, TensorProto},
    prelude::Framework,
};

use super::{tensor::ElementType, TensorInfo};
use crate::num::QuantParams;

const FLOAT: i32 = 1;
const UINT8: i32 = 2;
const INT8: i32 = 3;
const INT32: i32 = 6;

/// Reads the quantization parameters of the graph inputs and outputs of an ONNX model.
pub fn from_onnx(model_data: &[u8]) -> anyhow::Result<HashMap<String, QuantParams>> {
    let model = tract_onnx::onnx()
        .proto_model_for_read(&mut &*model_data)
        .context("failed to decode ONNX model")?;
    Ok(model.graph.as_ref().map(from_graph).unwrap_or_default())
}

/// Collects the parameters of quantize/dequantize nodes directly attached to graph inputs and
/// outputs. Nodes whose parameters are not constant initializers are skipped.
pub fn from_graph(graph: &GraphProto) -> HashMap<String, QuantParams> {
    let initializer = |name: &str| graph.initializer.iter().find(|t| t.name == name);
    let is_input = |name: &str| graph.input.iter().any(|i| i.name == name);
    let is_output = |name: &str| graph.output.iter().any(|o| o.name == name);

    let mut params = HashMap::new();
    for node in &graph.node {
        let tensor = match node.op_type.as_str() {
            "DequantizeLinear" => node.input.first().filter(|name| is_input(name)),
            "QuantizeLinear" => node.output.first().filter(|name| is_output(name)),
            _ => None,
        };
        let Some(tensor) = tensor else { continue };

        let scale = node.input.get(1).and_then(|name| initializer(name)).and_then(scalar_f32);
        // The zero point input is optional and defaults to 0.
        let zero_point = match node.input.get(2).filter(|name| !name.is_empty()) {
            Some(name) => initializer(name).and_then(scalar_i32),
            None => Some(0),
        };
        match (scale, zero_point) {
            (Some(scale), Some(zero_point)) => {
                log::trace!("'{tensor}' is quantized: scale={scale}, zero_point={zero_point}");
                params.insert(tensor.clone(), QuantParams::new(scale, zero_point));
            }
            _ => log::debug!("'{tensor}' has non-constant quantization parameters"),
        }
    }
    params
}

/// Attaches `params` to the `u8` tensors in `infos` that don't have quantization parameters yet.
pub fn attach(infos: &mut [TensorInfo], params: &HashMap<String, QuantParams>) {
    for info in infos {
        if info.element_type() != ElementType::U8 || info.quantization().is_some() {
            continue;
        }
        if let Some(&quant) = params.get(info.name()) {
            info.quant = Some(quant);
        }
    }
}

fn scalar_f32(tensor: &TensorProto) -> Option<f32> {
    if tensor.data_type != FLOAT {
        return None;
    }
    if let Some(&value) = tensor.float_data.first() {
        return Some(value);
    }
    let bytes = tensor.raw_data.get(..4)?;
    Some(f32::from_le_bytes(bytes.try_into().ok()?))
}

fn scalar_i32(tensor: &TensorProto) -> Option<i32> {
    if let Some(&value) = tensor.int32_data.first() {
        return Some(value);
    }
    let raw = &tensor.raw_data;
    match tensor.data_type {
        UINT8 => raw.first().map(|&b| i32::from(b)),
        INT8 => raw.first().map(|&b| i32::from(b as i8)),
        INT32 => Some(i32::from_le_bytes(raw.get(..4)?.try_into().ok()?)),
        _ => None,
    }
}
