//! Accelerated engine backed by ONNX Runtime execution providers.

use std::{
    path::Path,
    sync::{Arc, Mutex, OnceLock},
};

use anyhow::Context;
use itertools::Itertools;
use ndarray::{ArrayD, CowArray, IxDyn};
use ort::{
    tensor::{OrtOwnedTensor, TensorElementDataType},
    Environment, ExecutionProvider, GraphOptimizationLevel, LoggingLevel, Session,
    SessionBuilder, Value,
};

use super::{
    backend::BackendKind, quant,
    tensor::{AnyTensor, ElementType, Tensor},
    Engine, Inputs, Outputs, TensorInfo,
};

static ENVIRONMENT: OnceLock<Arc<Environment>> = OnceLock::new();

fn environment() -> anyhow::Result<Arc<Environment>> {
    if let Some(env) = ENVIRONMENT.get() {
        return Ok(env.clone());
    }
    let env = Environment::builder()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_log_level(LoggingLevel::Warning)
        .build()?
        .into_arc();
    Ok(ENVIRONMENT.get_or_init(|| env).clone())
}

/// A constructed hardware backend.
pub struct Delegate {
    kind: BackendKind,
    provider: ExecutionProvider,
}

impl Delegate {
    pub fn create(kind: BackendKind) -> anyhow::Result<Self> {
        // The execution provider registry is only available once the runtime is loaded.
        environment().context("failed to initialize ONNX Runtime")?;

        let provider = match kind {
            BackendKind::Npu => ExecutionProvider::tensorrt(),
            BackendKind::NpuQuantized => ExecutionProvider::acl(),
            BackendKind::Gpu => ExecutionProvider::cuda(),
        };
        if !provider.is_available() {
            anyhow::bail!("execution provider for {kind} is not available");
        }
        Ok(Self { kind, provider })
    }
}

impl Drop for Delegate {
    fn drop(&mut self) {
        log::trace!("released {} delegate", self.kind);
    }
}

pub struct OrtEngine {
    session: Mutex<Session>,
    kinds: Vec<BackendKind>,
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
}

impl OrtEngine {
    /// Creates a session for the network at `path` that runs on exactly `delegates`.
    ///
    /// `model_data` is the content of `path`, used to read quantization parameters that the
    /// session does not expose.
    pub fn load(path: &Path, model_data: &[u8], delegates: &[&Delegate]) -> anyhow::Result<Self> {
        let providers = delegates.iter().map(|d| d.provider.clone()).collect::<Vec<_>>();
        let session = SessionBuilder::new(&environment()?)?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers(providers)?
            .with_model_from_file(path)?;

        let mut inputs = session
            .inputs
            .iter()
            .map(|input| tensor_info(&input.name, input.input_type, &input.dimensions))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let mut outputs = session
            .outputs
            .iter()
            .map(|output| tensor_info(&output.name, output.output_type, &output.dimensions))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let quantization = quant::from_onnx(model_data)?;
        quant::attach(&mut inputs, &quantization);
        quant::attach(&mut outputs, &quantization);

        Ok(Self {
            session: Mutex::new(session),
            kinds: delegates.iter().map(|d| d.kind).collect(),
            inputs,
            outputs,
        })
    }
}

fn tensor_info(
    name: &str,
    ty: TensorElementDataType,
    dimensions: &[Option<u32>],
) -> anyhow::Result<TensorInfo> {
    let element_type = match ty {
        TensorElementDataType::Float32 => ElementType::F32,
        TensorElementDataType::Uint8 => ElementType::U8,
        other => anyhow::bail!("network tensor '{name}' has unsupported element type {other:?}"),
    };
    let shape = dimensions
        .iter()
        .map(|dim| dim.map(|d| d as usize))
        .collect::<Option<Vec<_>>>()
        .with_context(|| format!("network tensor '{name}' has a symbolic shape"))?;
    Ok(TensorInfo::new(name, &shape, element_type))
}

enum InputArray {
    F32(CowArray<'static, f32, IxDyn>),
    U8(CowArray<'static, u8, IxDyn>),
}

fn to_array(tensor: &AnyTensor) -> anyhow::Result<InputArray> {
    Ok(match tensor {
        AnyTensor::F32(t) => InputArray::F32(
            ArrayD::from_shape_vec(IxDyn(t.shape()), t.as_raw_data().to_vec())?.into(),
        ),
        AnyTensor::U8(t) => InputArray::U8(
            ArrayD::from_shape_vec(IxDyn(t.shape()), t.as_raw_data().to_vec())?.into(),
        ),
    })
}

fn from_value(value: &Value<'_>, info: &TensorInfo) -> anyhow::Result<AnyTensor> {
    Ok(match info.element_type() {
        ElementType::F32 => {
            let extracted: OrtOwnedTensor<'_, f32, IxDyn> = value.try_extract()?;
            let view = extracted.view();
            Tensor::from_vec(view.shape(), view.iter().copied().collect())?.into()
        }
        ElementType::U8 => {
            let extracted: OrtOwnedTensor<'_, u8, IxDyn> = value.try_extract()?;
            let view = extracted.view();
            Tensor::from_vec(view.shape(), view.iter().copied().collect())?.into()
        }
    })
}

impl Engine for OrtEngine {
    fn description(&self) -> String {
        format!("onnxruntime [{}]", self.kinds.iter().join("+"))
    }

    fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());

        let arrays = inputs.iter().map(to_array).collect::<anyhow::Result<Vec<_>>>()?;
        let values = arrays
            .iter()
            .map(|array| {
                Ok(match array {
                    InputArray::F32(array) => Value::from_array(session.allocator(), array)?,
                    InputArray::U8(array) => Value::from_array(session.allocator(), array)?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let outputs = session.run(values)?;
        outputs
            .iter()
            .zip(&self.outputs)
            .map(|(value, info)| from_value(value, info))
            .collect()
    }
}
