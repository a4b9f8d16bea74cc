//! CPU engine backed by `tract`.

use std::sync::Arc;

use anyhow::Context;
use itertools::zip_eq;
use tract_onnx::prelude::{
    DatumType, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, Tensor as TractTensor,
    TypedFact, TypedOp,
};

use super::{
    tensor::{AnyTensor, ElementType, Tensor},
    quant, Engine, Inputs, Outputs, TensorInfo,
};
use crate::num::QuantParams;

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct TractEngine {
    model: Model,
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
    input_types: Vec<DatumType>,
}

impl TractEngine {
    /// Loads and optimizes an ONNX network.
    pub fn load(model_data: &[u8]) -> anyhow::Result<Self> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*model_data)?
            .into_optimized()?;
        let outputs = graph.output_outlets()?.to_vec();
        let model = SimplePlan::new_for_outputs(graph, &outputs)?;

        let quantization = quant::from_onnx(model_data)?;
        let typed = model.model();
        let mut inputs = Vec::new();
        let mut input_types = Vec::new();
        for (id, outlet) in typed.input_outlets()?.iter().enumerate() {
            let fact = typed.input_fact(id)?;
            inputs.push(tensor_info(&typed.node(outlet.node).name, fact)?);
            input_types.push(fact.datum_type);
        }
        let mut outputs = typed
            .output_outlets()?
            .iter()
            .enumerate()
            .map(|(id, &outlet)| {
                // Output nodes are named after the operation, the label is the ONNX tensor name.
                let name = typed
                    .outlet_label(outlet)
                    .unwrap_or(typed.node(outlet.node).name.as_str());
                tensor_info(name, typed.output_fact(id)?)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        quant::attach(&mut inputs, &quantization);
        quant::attach(&mut outputs, &quantization);

        Ok(Self {
            model,
            inputs,
            outputs,
            input_types,
        })
    }
}

fn tensor_info(name: &str, fact: &TypedFact) -> anyhow::Result<TensorInfo> {
    let shape = fact
        .shape
        .as_concrete()
        .with_context(|| format!("network tensor '{name}' has a symbolic shape"))?;
    let element_type = match fact.datum_type.unquantized() {
        DatumType::F32 => ElementType::F32,
        DatumType::U8 => ElementType::U8,
        other => anyhow::bail!("network tensor '{name}' has unsupported element type {other:?}"),
    };

    let info = TensorInfo::new(name, shape, element_type);
    Ok(match fact.datum_type.qparams() {
        Some(qparams) => {
            let (zero_point, scale) = qparams.zp_scale();
            info.with_quantization(QuantParams::new(scale, zero_point))
        }
        None => info,
    })
}

fn to_tract(tensor: &AnyTensor, datum_type: DatumType) -> anyhow::Result<TractTensor> {
    let tract = match tensor {
        AnyTensor::F32(t) => TractTensor::from_shape(t.shape(), t.as_raw_data())?,
        AnyTensor::U8(t) => TractTensor::from_shape(t.shape(), t.as_raw_data())?,
    };
    if tract.datum_type() != datum_type && tract.datum_type() == datum_type.unquantized() {
        // Only attaches the quantization parameters, the bytes are kept as they are.
        return Ok(tract.cast_to_dt(datum_type)?.into_owned());
    }
    Ok(tract)
}

fn from_tract(tract: &TractTensor) -> anyhow::Result<AnyTensor> {
    Ok(match tract.datum_type().unquantized() {
        DatumType::U8 => Tensor::from_vec(tract.shape(), tract.as_slice::<u8>()?.to_vec())?.into(),
        DatumType::F32 => {
            Tensor::from_vec(tract.shape(), tract.as_slice::<f32>()?.to_vec())?.into()
        }
        _ => {
            let tract = tract.cast_to::<f32>()?;
            Tensor::from_vec(tract.shape(), tract.as_slice::<f32>()?.to_vec())?.into()
        }
    })
}

impl Engine for TractEngine {
    fn description(&self) -> String {
        "tract (CPU)".into()
    }

    fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let values = zip_eq(inputs.iter(), &self.input_types)
            .map(|(tensor, &dt)| Ok(TValue::from_const(Arc::new(to_tract(tensor, dt)?))))
            .collect::<anyhow::Result<TVec<_>>>()?;
        let outputs = self.model.run(values)?;
        outputs.iter().map(|tract| from_tract(tract)).collect()
    }
}

#[cfg(test)]
mod tests {
    use tract_onnx::prelude::QParams;

    use super::*;

    #[test]
    fn quantized_input_keeps_bytes() {
        let dt = DatumType::QU8(QParams::ZpScale {
            zero_point: 128,
            scale: 0.02,
        });
        let input = AnyTensor::from(Tensor::from_vec(&[1, 3], vec![0u8, 128, 255]).unwrap());
        let tract = to_tract(&input, dt).unwrap();
        assert_eq!(tract.datum_type(), dt);
        assert_eq!(tract.as_slice::<u8>().unwrap(), [0, 128, 255]);

        let plain = to_tract(&input, DatumType::U8).unwrap();
        assert_eq!(plain.datum_type(), DatumType::U8);
    }

    #[test]
    fn quantized_fact_is_reported() {
        let dt = DatumType::QU8(QParams::ZpScale {
            zero_point: 3,
            scale: 0.5,
        });
        let info = tensor_info("logits", &TypedFact::dt_shape(dt, [1, 5])).unwrap();
        assert_eq!(info.element_type(), ElementType::U8);
        assert_eq!(info.shape(), [1, 5]);
        assert_eq!(info.quantization(), Some(QuantParams::new(0.5, 3)));

        let info = tensor_info("input", &TypedFact::dt_shape(DatumType::F32, [1, 63])).unwrap();
        assert_eq!(info.quantization(), None);
    }
}
