//! Neural Network inference.
//!
//! Networks are loaded from ONNX files and executed by an [`Engine`]. Which engine runs a network
//! is decided once at load time by the [`backend`] resolver: accelerated combinations go through
//! ONNX Runtime, the CPU-only fallback through `tract`.

pub mod backend;
mod onnxruntime;
mod quant;
pub mod tensor;
mod tract;

use std::{
    borrow::Cow,
    fmt,
    ops::{Index, RangeInclusive},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use tract_onnx::prelude::{tvec, TVec};

use crate::{
    image::{self, Resolution, RgbaImage},
    num::QuantParams,
};
use backend::{BackendKind, BackendPriority, BackendProvider, Combination};
use tensor::{AnyTensor, Element, ElementType, Tensor};

/// Static information about a network input or output tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    name: String,
    shape: Vec<usize>,
    element_type: ElementType,
    quant: Option<QuantParams>,
}

impl TensorInfo {
    pub fn new<N: Into<String>>(name: N, shape: &[usize], element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            shape: shape.to_vec(),
            element_type,
            quant: None,
        }
    }

    /// Attaches affine quantization parameters to this tensor.
    pub fn with_quantization(mut self, quant: QuantParams) -> Self {
        self.quant = Some(quant);
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Returns the quantization parameters of this tensor, if it is quantized.
    #[inline]
    pub fn quantization(&self) -> Option<QuantParams> {
        self.quant
    }
}

/// A numeric execution engine that can run one loaded network.
///
/// Implementations must be usable from any thread. Inference is a blocking call.
pub trait Engine: Send + Sync {
    /// A short human-readable description of the engine and its hardware backends.
    fn description(&self) -> String;

    fn inputs(&self) -> &[TensorInfo];

    fn outputs(&self) -> &[TensorInfo];

    /// Runs the network. `inputs` has already been checked against [`Engine::inputs`].
    fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs>;
}

/// Neural network loader.
pub struct Loader<'a> {
    model_data: Cow<'a, [u8]>,
    path: Option<PathBuf>,
    backends: Option<BackendPriority>,
}

impl<'a> Loader<'a> {
    fn new(data: Cow<'a, [u8]>, path: Option<PathBuf>) -> Self {
        Self {
            model_data: data,
            path,
            backends: None,
        }
    }

    /// Sets the prioritized list of backend combinations to try.
    ///
    /// By default, [`BackendPriority::for_element_type`] for `f32` models is used.
    pub fn with_backends(mut self, priority: BackendPriority) -> Self {
        self.backends = Some(priority);
        self
    }

    /// Loads the network using the first backend combination that can be constructed.
    ///
    /// Returns an error if the network data is malformed or uses unsupported operations, or if no
    /// combination could be constructed.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let priority = self
            .backends
            .unwrap_or_else(|| BackendPriority::for_element_type(ElementType::F32));
        let mut provider = OnnxProvider {
            model_data: &self.model_data,
            path: self.path.as_deref(),
        };
        let resolved = backend::resolve(&mut provider, &priority)?;
        log::debug!(
            "loaded network{} on {}",
            self.path
                .as_deref()
                .map(|p| format!(" '{}'", p.display()))
                .unwrap_or_default(),
            resolved.engine.description(),
        );

        Ok(NeuralNetwork(Arc::new(NeuralNetworkImpl {
            engine: resolved.engine,
            combination: resolved.combination,
            _delegates: resolved.delegates,
        })))
    }
}

/// Constructs ONNX Runtime delegates and builds engines for one model.
struct OnnxProvider<'a> {
    model_data: &'a [u8],
    path: Option<&'a Path>,
}

impl BackendProvider for OnnxProvider<'_> {
    type Handle = onnxruntime::Delegate;
    type Engine = Box<dyn Engine>;

    fn create_delegate(&mut self, kind: BackendKind) -> anyhow::Result<Self::Handle> {
        onnxruntime::Delegate::create(kind)
    }

    fn build_engine(&mut self, delegates: &[&Self::Handle]) -> anyhow::Result<Self::Engine> {
        if delegates.is_empty() {
            return Ok(Box::new(tract::TractEngine::load(self.model_data)?));
        }

        let Some(path) = self.path else {
            anyhow::bail!("accelerated backends need the network to be loaded from a file");
        };
        Ok(Box::new(onnxruntime::OrtEngine::load(
            path,
            self.model_data,
            delegates,
        )?))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures. The engine and
/// its backend delegates are released when the last handle is dropped.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

struct NeuralNetworkImpl {
    // Field order matters: the engine has to be dropped before the delegates it is bound to.
    engine: Box<dyn Engine>,
    combination: Combination,
    _delegates: Vec<onnxruntime::Delegate>,
}

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Loader<'static>> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Loader<'static>> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read network '{}'", path.display()))?;
        Ok(Loader::new(model_data.into(), Some(path.to_path_buf())))
    }

    /// Loads a pre-trained model from an in-memory ONNX file.
    ///
    /// Networks loaded this way can only use the CPU engine.
    pub fn from_onnx(raw: &[u8]) -> anyhow::Result<Loader<'_>> {
        Ok(Loader::new(raw.into(), None))
    }

    /// Wraps an already constructed [`Engine`].
    ///
    /// The network is treated as running on the CPU-only combination.
    pub fn from_engine<E: Engine + 'static>(engine: E) -> Self {
        Self(Arc::new(NeuralNetworkImpl {
            engine: Box::new(engine),
            combination: Combination::cpu(),
            _delegates: Vec::new(),
        }))
    }

    /// Returns the backend combination this network runs on.
    pub fn combination(&self) -> &Combination {
        &self.0.combination
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs().len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs().len()
    }

    /// Returns the network's input tensor information.
    ///
    /// To perform inference, a matching input tensor has to be provided for each input.
    pub fn inputs(&self) -> &[TensorInfo] {
        self.0.engine.inputs()
    }

    /// Returns the network's output tensor information.
    pub fn outputs(&self) -> &[TensorInfo] {
        self.0.engine.outputs()
    }

    /// Returns the index of the output called `name`, or `fallback` if there is none.
    pub fn output_index(&self, name: &str, fallback: usize) -> usize {
        self.outputs()
            .iter()
            .position(|info| info.name() == name)
            .unwrap_or(fallback)
    }

    /// Runs the network on a set of [`Inputs`], returning the estimated [`Outputs`].
    ///
    /// Returns an error if the inputs don't match the network's input tensors, if the engine
    /// fails, or if the engine produces a different number of outputs than it declares.
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let infos = self.inputs();
        if inputs.len() != infos.len() {
            anyhow::bail!(
                "network takes {} inputs, but {} were provided",
                infos.len(),
                inputs.len()
            );
        }
        for (info, tensor) in infos.iter().zip(inputs.iter()) {
            if tensor.shape() != info.shape() || tensor.element_type() != info.element_type() {
                anyhow::bail!(
                    "input '{}' expects {:?} tensor of shape {:?}, got {:?}",
                    info.name(),
                    info.element_type(),
                    info.shape(),
                    tensor,
                );
            }
        }

        let outputs = self.0.engine.run(inputs)?;
        if outputs.len() != self.num_outputs() {
            anyhow::bail!(
                "network declares {} outputs, but produced {}",
                self.num_outputs(),
                outputs.len()
            );
        }
        Ok(outputs)
    }
}

impl fmt::Debug for NeuralNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeuralNetwork")
            .field("engine", &self.0.engine.description())
            .field("inputs", &self.inputs())
            .field("outputs", &self.outputs())
            .finish()
    }
}

/// A convolutional neural network (CNN) that operates on image data.
///
/// Like the underlying [`NeuralNetwork`], this is a cheaply [`Clone`]able handle.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    shape: CnnInputShape,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input with a shape that matches the given
    /// [`CnnInputShape`].
    pub fn new(
        nn: NeuralNetwork,
        shape: CnnInputShape,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let input_res = Self::get_input_res(&nn, shape)?;
        Ok(Self {
            nn,
            shape,
            input_res,
            color_mapper,
        })
    }

    /// Creates a CNN wrapper, taking the input layout from the network's input shape.
    ///
    /// Inputs of shape `[1, 3, H, W]` are treated as NCHW, everything else as NHWC.
    pub fn with_inferred_shape(nn: NeuralNetwork, color_mapper: ColorMapper) -> anyhow::Result<Self> {
        let shape = match nn.inputs() {
            [info] if matches!(info.shape(), [1, 3, _, _]) => CnnInputShape::NCHW,
            _ => CnnInputShape::NHWC,
        };
        Self::new(nn, shape, color_mapper)
    }

    fn get_input_res(nn: &NeuralNetwork, shape: CnnInputShape) -> anyhow::Result<Resolution> {
        let [input_info] = nn.inputs() else {
            anyhow::bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        };
        let tensor_shape = input_info.shape();

        let (w, h) = match (shape, tensor_shape) {
            (CnnInputShape::NCHW, [1, 3, h, w]) | (CnnInputShape::NHWC, [1, h, w, 3]) => (*w, *h),
            _ => {
                anyhow::bail!(
                    "invalid model input shape for {:?} CNN: {:?}",
                    shape,
                    tensor_shape,
                );
            }
        };

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok(Resolution::new(w, h))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Returns the underlying network.
    #[inline]
    pub fn network(&self) -> &NeuralNetwork {
        &self.nn
    }

    /// Converts an image into the network's input tensor.
    ///
    /// If the image's resolution differs from the network's input resolution, it is stretched to
    /// fit.
    pub fn image_to_tensor(&self, image: &RgbaImage) -> AnyTensor {
        let (w, h) = (self.input_res.width(), self.input_res.height());
        let resized;
        let image = if Resolution::of(image) == self.input_res {
            image
        } else {
            resized = image::resize(image, w, h);
            &resized
        };

        let (w, h) = (w as usize, h as usize);
        let pixel = |x: usize, y: usize, c: usize| {
            let rgba = image.get_pixel(x as u32, y as u32).0;
            self.color_mapper.map(rgba[c])
        };
        let floats = match self.shape {
            CnnInputShape::NCHW => {
                Tensor::from_array_shape_fn([1, 3, h, w], |[_, c, y, x]| pixel(x, y, c))
            }
            CnnInputShape::NHWC => {
                Tensor::from_array_shape_fn([1, h, w, 3], |[_, y, x, c]| pixel(x, y, c))
            }
        };

        let info = &self.nn.inputs()[0];
        match info.element_type() {
            ElementType::F32 => floats.into(),
            ElementType::U8 => {
                let quant = info
                    .quantization()
                    .unwrap_or(QuantParams::new(self.color_mapper.step(), 0));
                let bytes = floats.as_raw_data().iter().map(|&v| quant.quantize(v));
                Tensor::<u8>::from_iter(floats.shape(), bytes).into()
            }
        }
    }

    /// Runs the network on an input image, returning the estimated outputs.
    pub fn estimate(&self, image: &RgbaImage) -> anyhow::Result<Outputs> {
        let tensor = self.image_to_tensor(image);
        self.nn.estimate(&Inputs::from(tensor))
    }
}

/// Maps 8-bit color channel values to the value range a network expects.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// This operates on *non-linear* sRGB values, but maps them linearly to the target range.
    ///
    /// # Panics
    ///
    /// Panics if `target_range` is empty.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());
        Self { target_range }
    }

    fn step(&self) -> f32 {
        (self.target_range.end() - self.target_range.start()) / 255.0
    }

    fn map(&self, channel: u8) -> f32 {
        channel as f32 * self.step() + self.target_range.start()
    }
}

/// Describes in what order a CNN expects its input image data.
///
/// - `N` is the number of images, fixed at 1.
/// - `C` is the number of color channels, 3 for RGB inputs.
/// - `H` and `W` are the height and width of the input, respectively.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// Shape is `[N, C, H, W]`.
    NCHW,
    /// Shape is `[N, H, W, C]`.
    NHWC,
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug, Clone)]
pub struct Outputs {
    inner: TVec<AnyTensor>,
}

impl Outputs {
    /// Returns the number of tensors in this inference output.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the output tensor at `index`, checking that it stores elements of type `T`.
    pub fn get<T: Element>(&self, index: usize) -> anyhow::Result<&Tensor<T>> {
        let tensor = self
            .inner
            .get(index)
            .with_context(|| format!("no output tensor at index {index}"))?;
        tensor.downcast::<T>().with_context(|| {
            format!(
                "output tensor {index} has element type {:?}, expected {:?}",
                tensor.element_type(),
                T::TYPE
            )
        })
    }

    /// Returns the output tensor at `index` as `f32` values.
    ///
    /// `u8` outputs are dequantized with `quant`, or taken as-is if it is [`None`].
    pub fn get_f32(
        &self,
        index: usize,
        quant: Option<QuantParams>,
    ) -> anyhow::Result<Cow<'_, Tensor<f32>>> {
        let tensor = self
            .inner
            .get(index)
            .with_context(|| format!("no output tensor at index {index}"))?;
        Ok(match tensor {
            AnyTensor::F32(t) => Cow::Borrowed(t),
            AnyTensor::U8(t) => {
                let quant = quant.unwrap_or(QuantParams::new(1.0, 0));
                let values = t.as_raw_data().iter().map(|&b| quant.dequantize(b));
                Cow::Owned(Tensor::from_iter(t.shape(), values))
            }
        })
    }

    /// Returns an iterator over the output tensors.
    pub fn iter(&self) -> std::slice::Iter<'_, AnyTensor> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = AnyTensor;

    fn index(&self, index: usize) -> &AnyTensor {
        &self.inner[index]
    }
}

impl<'a> IntoIterator for &'a Outputs {
    type Item = &'a AnyTensor;
    type IntoIter = std::slice::Iter<'a, AnyTensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<AnyTensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = AnyTensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<T: Into<AnyTensor>, const N: usize> From<[T; N]> for Outputs {
    fn from(tensors: [T; N]) -> Self {
        tensors.into_iter().map(Into::into).collect()
    }
}

/// List of input tensors for neural network inference.
#[derive(Debug, Clone)]
pub struct Inputs {
    inner: TVec<AnyTensor>,
}

impl Inputs {
    /// Returns the number of input tensors stored in `self`.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnyTensor> {
        self.inner.iter()
    }
}

impl From<AnyTensor> for Inputs {
    fn from(t: AnyTensor) -> Self {
        Self { inner: tvec![t] }
    }
}

impl From<Tensor<f32>> for Inputs {
    fn from(t: Tensor<f32>) -> Self {
        AnyTensor::from(t).into()
    }
}

impl From<Tensor<u8>> for Inputs {
    fn from(t: Tensor<u8>) -> Self {
        AnyTensor::from(t).into()
    }
}

impl FromIterator<AnyTensor> for Inputs {
    fn from_iter<T: IntoIterator<Item = AnyTensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engines for exercising inference code without model files.

    use std::sync::Mutex;

    use super::*;

    type Script = Box<dyn FnMut(&Inputs) -> anyhow::Result<Outputs> + Send>;

    /// An [`Engine`] whose outputs are produced by a closure.
    pub struct ScriptedEngine {
        inputs: Vec<TensorInfo>,
        outputs: Vec<TensorInfo>,
        script: Mutex<Script>,
    }

    impl ScriptedEngine {
        pub fn new(
            inputs: Vec<TensorInfo>,
            outputs: Vec<TensorInfo>,
            script: impl FnMut(&Inputs) -> anyhow::Result<Outputs> + Send + 'static,
        ) -> Self {
            Self {
                inputs,
                outputs,
                script: Mutex::new(Box::new(script)),
            }
        }
    }

    impl Engine for ScriptedEngine {
        fn description(&self) -> String {
            "scripted".into()
        }

        fn inputs(&self) -> &[TensorInfo] {
            &self.inputs
        }

        fn outputs(&self) -> &[TensorInfo] {
            &self.outputs
        }

        fn run(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
            let script = &mut *self.script.lock().unwrap();
            script(inputs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::ScriptedEngine, *};

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(0), -1.0);
        assert_eq!(mapper.map(255), 1.0);

        let mapper = ColorMapper::linear(0.0..=1.0);
        assert_eq!(mapper.map(0), 0.0);
        assert_eq!(mapper.map(255), 1.0);
    }

    fn image_net(element_type: ElementType, quant: Option<QuantParams>) -> NeuralNetwork {
        let mut input = TensorInfo::new("image", &[1, 2, 2, 3], element_type);
        if let Some(q) = quant {
            input = input.with_quantization(q);
        }
        NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![input],
            vec![TensorInfo::new("out", &[1], ElementType::F32)],
            |inputs| {
                let sum = match &inputs.iter().next().unwrap() {
                    AnyTensor::F32(t) => t.as_raw_data().iter().sum::<f32>(),
                    AnyTensor::U8(t) => t.as_raw_data().iter().map(|&b| b as f32).sum(),
                };
                Ok(Outputs::from([Tensor::from([sum])]))
            },
        ))
    }

    #[test]
    fn cnn_normalizes_pixels() {
        let cnn = Cnn::new(
            image_net(ElementType::F32, None),
            CnnInputShape::NHWC,
            ColorMapper::linear(0.0..=1.0),
        )
        .unwrap();
        assert_eq!(cnn.input_resolution(), Resolution::new(2, 2));

        let white = RgbaImage::from_pixel(2, 2, ::image::Rgba([255, 255, 255, 255]));
        let out = cnn.estimate(&white).unwrap();
        assert_eq!(out.get::<f32>(0).unwrap().as_slice(), [12.0]);

        // Larger images are resized to the input resolution.
        let white = RgbaImage::from_pixel(8, 4, ::image::Rgba([255, 255, 255, 255]));
        let out = cnn.estimate(&white).unwrap();
        assert_eq!(out.get::<f32>(0).unwrap().as_slice(), [12.0]);
    }

    #[test]
    fn cnn_quantizes_u8_inputs() {
        let cnn = Cnn::new(
            image_net(ElementType::U8, Some(QuantParams::new(1.0 / 255.0, 0))),
            CnnInputShape::NHWC,
            ColorMapper::linear(0.0..=1.0),
        )
        .unwrap();
        let white = RgbaImage::from_pixel(2, 2, ::image::Rgba([255, 255, 255, 255]));
        let tensor = cnn.image_to_tensor(&white);
        let bytes = tensor.downcast::<u8>().unwrap();
        assert!(bytes.as_raw_data().iter().all(|&b| b == 255));
    }

    #[test]
    fn cnn_rejects_bad_shape() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("image", &[1, 4, 4, 4], ElementType::F32)],
            vec![],
            |_| unreachable!(),
        ));
        assert!(Cnn::new(nn, CnnInputShape::NHWC, ColorMapper::linear(0.0..=1.0)).is_err());
    }

    #[test]
    fn estimate_checks_inputs_and_outputs() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("x", &[2], ElementType::F32)],
            vec![
                TensorInfo::new("a", &[1], ElementType::F32),
                TensorInfo::new("b", &[1], ElementType::F32),
            ],
            |_| Ok(Outputs::from([Tensor::from([1.0f32])])),
        ));

        let err = nn.estimate(&Inputs::from(Tensor::from([1u8, 2]))).unwrap_err();
        assert!(err.to_string().contains("expects"), "{err}");

        let err = nn.estimate(&Inputs::from(Tensor::from([1.0f32, 2.0]))).unwrap_err();
        assert!(err.to_string().contains("produced 1"), "{err}");
    }

    #[test]
    fn outputs_typed_access() {
        let outputs = Outputs::from([
            AnyTensor::from(Tensor::from([1.0f32])),
            Tensor::from([2u8]).into(),
        ]);
        assert!(outputs.get::<f32>(0).is_ok());
        assert!(outputs.get::<u8>(0).is_err());
        assert_eq!(outputs.get::<u8>(1).unwrap().as_slice(), [2]);
        assert!(outputs.get::<u8>(2).is_err());
    }

    #[test]
    fn outputs_dequantized_access() {
        let outputs = Outputs::from([
            AnyTensor::from(Tensor::from([1.5f32])),
            Tensor::from([138u8]).into(),
        ]);
        assert_eq!(outputs.get_f32(0, None).unwrap().as_slice(), [1.5]);
        let deq = outputs.get_f32(1, Some(QuantParams::new(0.5, 128))).unwrap();
        assert_eq!(deq.as_slice(), [5.0]);
        assert_eq!(outputs.get_f32(1, None).unwrap().as_slice(), [138.0]);
        assert!(outputs.get_f32(2, None).is_err());
    }

    #[test]
    fn output_lookup_by_name() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![],
            vec![
                TensorInfo::new("scores", &[1], ElementType::F32),
                TensorInfo::new("landmarks", &[1, 21, 3], ElementType::F32),
            ],
            |_| unreachable!(),
        ));
        assert_eq!(nn.output_index("landmarks", 0), 1);
        assert_eq!(nn.output_index("lr", 2), 2);
    }
}
