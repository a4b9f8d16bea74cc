//! Hand landmark prediction.
//!
//! Besides plain inference, [`LandmarkDetector`] supports a *collection* mode that records the
//! landmarks of a user-demonstrated gesture, so that the gesture classifier can be retrained
//! externally (see [`PersonalizationWorkflow`]).

use std::{fmt, ops::Index};

use ::image::Rgba;
use serde::{Deserialize, Serialize};

use crate::{
    image::{self, RgbaImage, Rotation},
    landmark::{HandLandmarks, Point3},
    nn::{Cnn, ColorMapper, NeuralNetwork},
    timer::Timer,
};

/// Default presence score below which the crop is considered to contain no hand.
pub const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.005;

/// Default handedness score above which a hand is considered a right hand.
pub const DEFAULT_HANDEDNESS_THRESHOLD: f32 = 0.5;

const MARKER_RADIUS: u32 = 5;
const MARKER_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const BONE_COLOR: Rgba<u8> = Rgba([127, 127, 127, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Handedness {
    #[default]
    Left,
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names for the hand pose landmarks.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

impl Index<LandmarkIdx> for HandLandmarks {
    type Output = Point3<f32>;

    fn index(&self, index: LandmarkIdx) -> &Point3<f32> {
        &self[index as usize]
    }
}

const CONNECTIVITY: &[(LandmarkIdx, LandmarkIdx)] = {
    use LandmarkIdx::*;
    &[
        // Palm outline:
        (Wrist, ThumbCmc),
        (ThumbCmc, IndexFingerMcp),
        (IndexFingerMcp, MiddleFingerMcp),
        (MiddleFingerMcp, RingFingerMcp),
        (RingFingerMcp, PinkyMcp),
        (PinkyMcp, Wrist),
        // Fingers:
        (ThumbCmc, ThumbMcp),
        (ThumbMcp, ThumbIp),
        (ThumbIp, ThumbTip),
        (IndexFingerMcp, IndexFingerPip),
        (IndexFingerPip, IndexFingerDip),
        (IndexFingerDip, IndexFingerTip),
        (MiddleFingerMcp, MiddleFingerPip),
        (MiddleFingerPip, MiddleFingerDip),
        (MiddleFingerDip, MiddleFingerTip),
        (RingFingerMcp, RingFingerPip),
        (RingFingerPip, RingFingerDip),
        (RingFingerDip, RingFingerTip),
        (PinkyMcp, PinkyPip),
        (PinkyPip, PinkyDip),
        (PinkyDip, PinkyTip),
    ]
};

/// Draws landmarks given in normalized coordinates onto `target`.
pub fn draw_landmarks(target: &mut RgbaImage, landmarks: &HandLandmarks) {
    let (w, h) = (target.width() as f32, target.height() as f32);
    let to_px = |p: &Point3<f32>| {
        (
            (p.x * w).clamp(0.0, w - 1.0),
            (p.y * h).clamp(0.0, h - 1.0),
        )
    };

    for &(a, b) in CONNECTIVITY {
        image::draw_line(target, to_px(&landmarks[a]), to_px(&landmarks[b]), BONE_COLOR);
    }
    for p in landmarks {
        let (x, y) = to_px(p);
        image::draw_marker(target, x, y, MARKER_RADIUS, MARKER_COLOR);
    }
}

/// Receives progress updates of the gesture personalization process.
///
/// All methods default to doing nothing.
pub trait TrainingProgressListener {
    /// Called whenever a sample was collected, with the collection progress in percent.
    fn on_collection_progress(&mut self, percent: u32) {
        let _ = percent;
    }

    fn on_training_started(&mut self) {}

    fn on_model_download_started(&mut self) {}

    fn on_model_download_complete(&mut self) {}
}

/// A [`TrainingProgressListener`] that ignores all updates.
#[derive(Debug, Default)]
pub struct IgnoreProgress;

impl TrainingProgressListener for IgnoreProgress {}

/// Parameters of the sample collection mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionParams {
    /// Number of samples to collect before collection stops.
    pub target_samples: usize,
    /// Only every `frame_interval`th frame with a hand is recorded.
    pub frame_interval: u32,
}

impl Default for CollectionParams {
    fn default() -> Self {
        Self {
            target_samples: 100,
            frame_interval: 3,
        }
    }
}

/// The collected landmarks of one demonstrated gesture.
///
/// Serializes to the JSON body expected by the retraining service:
/// `{"model_code": .., "gesture": .., "landmarks": [[[x, y, z], ..], ..]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingBatch {
    pub model_code: String,
    pub gesture: String,
    pub landmarks: Vec<Vec<[f32; 3]>>,
}

/// Describes the classifier produced by a [`PersonalizationWorkflow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrainedModel {
    pub model_code: String,
    pub model_url: String,
}

/// The external retraining process a completed [`TrainingBatch`] is handed to.
pub trait PersonalizationWorkflow {
    /// Retrains the classifier with `batch`.
    fn train(&mut self, batch: &TrainingBatch) -> anyhow::Result<RetrainedModel>;

    /// Fetches the retrained classifier and installs it.
    fn download_model(&mut self, model: &RetrainedModel) -> anyhow::Result<()>;
}

struct Collection {
    params: CollectionParams,
    collecting: bool,
    frame_counter: u32,
    samples: Vec<HandLandmarks>,
    label: Option<String>,
}

impl Collection {
    fn new(params: CollectionParams) -> Self {
        Self {
            params,
            collecting: true,
            frame_counter: 0,
            samples: Vec::new(),
            label: None,
        }
    }

    fn record(
        &mut self,
        landmarks: &HandLandmarks,
        label: &str,
        listener: &mut dyn TrainingProgressListener,
    ) {
        let target = self.params.target_samples;
        if self.samples.len() < target {
            if self.frame_counter % self.params.frame_interval.max(1) == 0 {
                self.samples.push(landmarks.clone());
                let percent = self.samples.len() * 100 / target;
                log::debug!("collected {}/{target} samples", self.samples.len());
                listener.on_collection_progress(percent as u32);
            }
            self.frame_counter += 1;
        }

        if self.samples.len() == target {
            self.label = Some(label.to_string());
            self.collecting = false;
            log::info!("collected {target} samples of '{label}'");
        }
    }

    fn is_ready(&self) -> bool {
        self.label.is_some() && self.samples.len() == self.params.target_samples
    }
}

/// Raw result of one landmark inference pass.
struct Estimate {
    landmarks: HandLandmarks,
    presence: f32,
    handedness: f32,
}

/// Estimates hand landmarks in cropped hand images.
pub struct LandmarkDetector {
    cnn: Option<Cnn>,
    landmark_output: usize,
    score_output: usize,
    handedness_output: usize,
    presence_threshold: f32,
    handedness_threshold: f32,
    last_landmarks: Option<HandLandmarks>,
    last_handedness: Handedness,
    last_presence: f32,
    collection: Collection,
    t_rotate: Timer,
    t_infer: Timer,
}

impl LandmarkDetector {
    /// Creates a landmark detector.
    ///
    /// The network takes a single RGB image and has 3 outputs: the 21x3 landmark coordinates
    /// (`landmarks`), the hand presence score (`scores`) and the handedness score (`lr`). If the
    /// outputs are not named like that, they are used in this order.
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        if nn.num_outputs() < 3 {
            anyhow::bail!(
                "hand landmark network needs 3 outputs, this one has {}",
                nn.num_outputs()
            );
        }
        let landmark_output = nn.output_index("landmarks", 0);
        let score_output = nn.output_index("scores", 1);
        let handedness_output = nn.output_index("lr", 2);

        Ok(Self {
            cnn: Some(Cnn::with_inferred_shape(nn, ColorMapper::linear(0.0..=1.0))?),
            landmark_output,
            score_output,
            handedness_output,
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
            handedness_threshold: DEFAULT_HANDEDNESS_THRESHOLD,
            last_landmarks: None,
            last_handedness: Handedness::default(),
            last_presence: 0.0,
            collection: Collection::new(CollectionParams::default()),
            t_rotate: Timer::new("rotate"),
            t_infer: Timer::new("landmarks"),
        })
    }

    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold;
        self
    }

    pub fn with_handedness_threshold(mut self, threshold: f32) -> Self {
        self.handedness_threshold = threshold;
        self
    }

    pub fn with_collection_params(mut self, params: CollectionParams) -> Self {
        self.collection = Collection::new(params);
        self
    }

    /// Releases the landmark network. Further calls find no landmarks.
    pub fn release(&mut self) {
        if self.cnn.take().is_some() {
            log::debug!("released landmark detector");
        }
        self.last_landmarks = None;
    }

    pub fn is_released(&self) -> bool {
        self.cnn.is_none()
    }

    /// Returns the landmarks found by the last call to [`predict`] or [`transfer`], if any.
    ///
    /// [`predict`]: LandmarkDetector::predict
    /// [`transfer`]: LandmarkDetector::transfer
    pub fn last_landmarks(&self) -> Option<&HandLandmarks> {
        self.last_landmarks.as_ref()
    }

    /// Returns the handedness of the last detected hand.
    pub fn last_handedness(&self) -> Handedness {
        self.last_handedness
    }

    /// Returns the presence score of the last inference pass.
    pub fn last_presence(&self) -> f32 {
        self.last_presence
    }

    /// Clears the landmark state of the last prediction.
    pub fn clear(&mut self) {
        self.last_landmarks = None;
    }

    fn estimate(&self, image: &RgbaImage) -> Option<Estimate> {
        let Some(cnn) = &self.cnn else {
            log::warn!("landmark detector used after release");
            return None;
        };

        let outputs = match self.t_infer.time(|| cnn.estimate(image)) {
            Ok(outputs) => outputs,
            Err(e) => {
                log::warn!("landmark estimation failed: {e:#}");
                return None;
            }
        };

        let infos = cnn.network().outputs();
        let output = |index: usize| outputs.get_f32(index, infos[index].quantization());
        let decode = || -> anyhow::Result<Estimate> {
            let landmarks = output(self.landmark_output)?;
            let scores = output(self.score_output)?;
            let lr = output(self.handedness_output)?;
            let (Some(&presence), Some(&handedness)) =
                (scores.as_raw_data().first(), lr.as_raw_data().first())
            else {
                anyhow::bail!("empty landmark score output");
            };
            Ok(Estimate {
                landmarks: HandLandmarks::from_coords(landmarks.as_raw_data())?,
                presence,
                handedness,
            })
        };

        match decode() {
            Ok(estimate) => Some(estimate),
            Err(e) => {
                log::warn!("invalid landmark output: {e:#}");
                None
            }
        }
    }

    /// Runs inference on the rotated crop and updates the landmark state.
    ///
    /// Returns the rotated crop if a hand is present.
    fn update(&mut self, crop: &RgbaImage, rotation: Rotation) -> Option<RgbaImage> {
        self.last_landmarks = None;

        let rotated = self
            .t_rotate
            .time(|| image::rotate(crop, rotation).into_owned());
        let estimate = self.estimate(&rotated)?;
        self.last_presence = estimate.presence;
        if estimate.presence < self.presence_threshold {
            log::trace!("no hand present ({:.3})", estimate.presence);
            return None;
        }

        self.last_handedness = if estimate.handedness > self.handedness_threshold {
            Handedness::Right
        } else {
            Handedness::Left
        };
        self.last_landmarks = Some(estimate.landmarks);
        Some(rotated)
    }

    /// Estimates the landmarks of the hand in `crop`.
    ///
    /// `crop` is first rotated clockwise by `rotation`. Returns the rotated crop with the landmarks
    /// drawn onto it, or `crop` unchanged if no hand was found (in which case
    /// [`last_landmarks`](Self::last_landmarks) returns [`None`]).
    pub fn predict(&mut self, crop: &RgbaImage, rotation: Rotation) -> RgbaImage {
        match self.update(crop, rotation) {
            Some(mut annotated) => {
                if let Some(landmarks) = &self.last_landmarks {
                    draw_landmarks(&mut annotated, landmarks);
                }
                annotated
            }
            None => crop.clone(),
        }
    }

    /// Estimates landmarks like [`predict`](Self::predict), and records them as a sample of the
    /// gesture `label` while collecting.
    ///
    /// Every `frame_interval`th frame with a hand is recorded. Once `target_samples` samples were
    /// collected, collection stops and the batch can be submitted using
    /// [`finish_collection`](Self::finish_collection).
    ///
    /// When not collecting, this does nothing and returns `crop` unchanged.
    pub fn transfer(
        &mut self,
        crop: &RgbaImage,
        rotation: Rotation,
        label: &str,
        listener: &mut dyn TrainingProgressListener,
    ) -> RgbaImage {
        if !self.collection.collecting {
            log::trace!("not collecting, ignoring frame");
            return crop.clone();
        }

        let Some(mut annotated) = self.update(crop, rotation) else {
            return crop.clone();
        };
        if let Some(landmarks) = &self.last_landmarks {
            self.collection.record(landmarks, label, listener);
            draw_landmarks(&mut annotated, landmarks);
        }
        annotated
    }

    /// Returns whether samples are still being collected.
    pub fn is_collecting(&self) -> bool {
        self.collection.collecting
    }

    /// Starts collecting, discarding previously collected samples.
    pub fn start_collecting(&mut self) {
        self.collection = Collection::new(self.collection.params);
    }

    pub fn stop_collecting(&mut self) {
        self.collection.collecting = false;
    }

    /// Discards all collected samples and starts collecting again.
    pub fn reset_collection(&mut self, listener: &mut dyn TrainingProgressListener) {
        let params = self.collection.params;
        self.collection = Collection::new(params);
        listener.on_collection_progress(0);
        log::debug!("reset landmark collection");
    }

    /// Returns the number of collected samples.
    pub fn collected_samples(&self) -> usize {
        self.collection.samples.len()
    }

    /// Returns the collected batch, if collection has completed.
    pub fn training_batch(&self, model_code: &str) -> Option<TrainingBatch> {
        if !self.collection.is_ready() {
            return None;
        }
        Some(TrainingBatch {
            model_code: model_code.to_string(),
            gesture: self.collection.label.clone().unwrap_or_default(),
            landmarks: self
                .collection
                .samples
                .iter()
                .map(HandLandmarks::to_arrays)
                .collect(),
        })
    }

    /// Hands the completed batch to `workflow` for retraining and installs the resulting model.
    ///
    /// Fails if collection has not completed. On success, the collected samples are discarded.
    pub fn finish_collection(
        &mut self,
        model_code: &str,
        workflow: &mut dyn PersonalizationWorkflow,
        listener: &mut dyn TrainingProgressListener,
    ) -> anyhow::Result<RetrainedModel> {
        let Some(batch) = self.training_batch(model_code) else {
            anyhow::bail!(
                "collection incomplete ({}/{} samples)",
                self.collection.samples.len(),
                self.collection.params.target_samples
            );
        };

        listener.on_training_started();
        let model = workflow.train(&batch)?;
        listener.on_model_download_started();
        workflow.download_model(&model)?;
        listener.on_model_download_complete();
        log::info!("installed retrained model '{}'", model.model_code);

        self.collection.samples.clear();
        self.collection.label = None;
        Ok(model)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_rotate, &self.t_infer].into_iter()
    }
}
