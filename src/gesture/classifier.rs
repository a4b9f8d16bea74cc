//! Gesture classification from hand landmarks.
//!
//! The classifier network takes the 63 coordinates of a normalized landmark set. Landmarks are
//! made translation invariant by moving the wrist to the origin, and scale invariant by dividing by
//! the average wrist-to-knuckle distance.

use nalgebra::Vector3;

use crate::{
    hand::landmark::{Handedness, LandmarkIdx},
    landmark::{HandLandmarks, Point3, NUM_LANDMARKS},
    nn::{
        tensor::{AnyTensor, ElementType, Tensor},
        Inputs, NeuralNetwork, TensorInfo,
    },
    num::{QuantParams, TotalF32},
    timer::Timer,
};

/// Default confidence below which no gesture is reported.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;

/// Class index reported when no class is confident enough.
pub const NO_GESTURE: i32 = -1;

const NUM_FEATURES: usize = NUM_LANDMARKS * 3;

/// Result of [`GestureClassifier::classify`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    class: i32,
    confidence: f32,
}

impl Classification {
    /// Returns the index of the detected gesture class, or [`NO_GESTURE`].
    pub fn class(&self) -> i32 {
        self.class
    }

    /// Returns the confidence of the most likely class, between 0.0 and 1.0.
    ///
    /// This is also reported if the class is [`NO_GESTURE`].
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn is_gesture(&self) -> bool {
        self.class != NO_GESTURE
    }

    /// A [`NO_GESTURE`] result with zero confidence, for frames that were not classified.
    pub fn no_gesture() -> Self {
        Self {
            class: NO_GESTURE,
            confidence: 0.0,
        }
    }
}

/// Makes landmarks translation and scale invariant.
///
/// The wrist is moved to the origin, then everything is divided by the mean distance from the
/// wrist to the middle, index and pinky MCP joints. If that distance is 0, only the translation is
/// applied.
pub fn normalize(landmarks: &HandLandmarks) -> [Vector3<f32>; NUM_LANDMARKS] {
    let origin = landmarks[LandmarkIdx::Wrist];
    let translated: [Vector3<f32>; NUM_LANDMARKS] =
        std::array::from_fn(|i| landmarks[i] - origin);

    let scale = [
        LandmarkIdx::MiddleFingerMcp,
        LandmarkIdx::IndexFingerMcp,
        LandmarkIdx::PinkyMcp,
    ]
    .iter()
    .map(|&idx| translated[idx as usize].norm())
    .sum::<f32>()
        / 3.0;

    if scale > 0.0 {
        translated.map(|v| v / scale)
    } else {
        translated
    }
}

/// Classifies hand gestures from hand landmarks.
pub struct GestureClassifier {
    nn: Option<NeuralNetwork>,
    input: TensorInfo,
    output_quant: Option<QuantParams>,
    num_classes: usize,
    confidence_threshold: f32,
    t_infer: Timer,
}

impl GestureClassifier {
    /// Creates a gesture classifier.
    ///
    /// The network must take a single tensor of 63 elements (`f32`, or quantized `u8`) and output
    /// the class confidences as a `[1, classes]` tensor.
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        let [input] = nn.inputs() else {
            anyhow::bail!(
                "gesture classifier must take 1 input, this one takes {}",
                nn.num_inputs()
            );
        };
        let elements = input.shape().iter().product::<usize>();
        if elements != NUM_FEATURES {
            anyhow::bail!(
                "gesture classifier input has shape {:?}, expected {NUM_FEATURES} elements",
                input.shape()
            );
        }
        if input.element_type() == ElementType::U8 && input.quantization().is_none() {
            anyhow::bail!("gesture classifier input is `u8`, but not quantized");
        }

        let Some(output) = nn.outputs().first() else {
            anyhow::bail!("gesture classifier has no outputs");
        };
        let num_classes = match output.shape() {
            [1, n] if *n > 0 => *n,
            shape => anyhow::bail!("gesture classifier output has unexpected shape {shape:?}"),
        };
        if output.element_type() == ElementType::U8 && output.quantization().is_none() {
            anyhow::bail!("gesture classifier output is `u8`, but not quantized");
        }

        log::debug!(
            "gesture classifier: {num_classes} classes, {:?} input",
            input.element_type()
        );
        Ok(Self {
            input: input.clone(),
            output_quant: output.quantization(),
            num_classes,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            t_infer: Timer::new("classify"),
            nn: Some(nn),
        })
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Releases the classifier network. Further classifications fail.
    pub fn release(&mut self) {
        if self.nn.take().is_some() {
            log::debug!("released gesture classifier");
        }
    }

    pub fn is_released(&self) -> bool {
        self.nn.is_none()
    }

    /// Classifies a raw point list. Fails if it does not contain exactly 21 points.
    pub fn classify_points(
        &self,
        points: &[Point3<f32>],
        handedness: Handedness,
    ) -> anyhow::Result<Classification> {
        let landmarks = HandLandmarks::from_points(points.iter().copied())?;
        self.classify(&landmarks, handedness)
    }

    /// Classifies the gesture shown by a hand.
    ///
    /// The stock networks are trained on landmark geometry only, so `handedness` does not affect
    /// the result.
    ///
    /// If the most likely class has a confidence below the configured threshold, the result has
    /// the class [`NO_GESTURE`].
    pub fn classify(
        &self,
        landmarks: &HandLandmarks,
        handedness: Handedness,
    ) -> anyhow::Result<Classification> {
        let Some(nn) = &self.nn else {
            log::warn!("gesture classifier used after release");
            anyhow::bail!("gesture classifier has been released");
        };

        let features = normalize(landmarks);
        let values = features.iter().flat_map(|v| [v.x, v.y, v.z]);
        let tensor: AnyTensor = match self.input.quantization() {
            Some(quant) if self.input.element_type() == ElementType::U8 => {
                Tensor::from_iter(self.input.shape(), values.map(|v| quant.quantize(v))).into()
            }
            _ => Tensor::from_iter(self.input.shape(), values).into(),
        };

        let outputs = self.t_infer.time(|| nn.estimate(&Inputs::from(tensor)))?;
        let scores = outputs.get_f32(0, self.output_quant)?;
        if scores.as_raw_data().len() != self.num_classes {
            anyhow::bail!(
                "gesture classifier produced {} scores, expected {}",
                scores.as_raw_data().len(),
                self.num_classes
            );
        }

        let (class, confidence) = scores
            .as_raw_data()
            .iter()
            .copied()
            .enumerate()
            .max_by_key(|&(_, conf)| TotalF32(conf))
            .map(|(i, conf)| (i as i32, conf))
            .unwrap_or((NO_GESTURE, 0.0));
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        if confidence < self.confidence_threshold {
            log::trace!("low confidence ({confidence:.3}) for class {class} of {handedness} hand");
            return Ok(Classification {
                class: NO_GESTURE,
                confidence,
            });
        }
        log::trace!("class {class} ({confidence:.3}) for {handedness} hand");
        Ok(Classification { class, confidence })
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        std::iter::once(&self.t_infer)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use approx::assert_relative_eq;

    use super::*;
    use crate::nn::{testing::ScriptedEngine, Outputs};

    fn hand() -> HandLandmarks {
        // Wrist at (0.5, 0.9), knuckles 0.2 above it.
        HandLandmarks::from_points((0..21).map(|i| match i {
            0 => Point3::new(0.5, 0.9, 0.0),
            5 | 9 | 17 => Point3::new(0.5, 0.7, 0.0),
            _ => Point3::new(0.5 + i as f32 * 0.01, 0.5, 0.1),
        }))
        .unwrap()
    }

    #[test]
    fn normalization() {
        let features = normalize(&hand());
        assert_eq!(features[0], Vector3::zeros());
        assert_relative_eq!(features[9], Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-5);
        assert_relative_eq!(features[1].z, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn degenerate_hand_is_only_translated() {
        let lms = HandLandmarks::from_points([Point3::new(0.3, 0.3, 0.3); 21]).unwrap();
        let features = normalize(&lms);
        assert!(features.iter().all(|v| *v == Vector3::zeros()));
    }

    /// A quantized 3-class classifier returning fixed output bytes, recording its input.
    fn quantized(bytes: [u8; 3]) -> (GestureClassifier, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("features", &[1, 63], ElementType::U8)
                .with_quantization(QuantParams::new(0.05, 128))],
            vec![TensorInfo::new("probs", &[1, 3], ElementType::U8)
                .with_quantization(QuantParams::new(1.0 / 256.0, 0))],
            move |inputs| {
                let input = inputs.iter().next().unwrap().downcast::<u8>().unwrap();
                *s.lock().unwrap() = input.as_raw_data().to_vec();
                Ok(Outputs::from([Tensor::<u8>::from_iter(&[1, 3], bytes)]))
            },
        ));
        (GestureClassifier::new(nn).unwrap(), seen)
    }

    #[test]
    fn quantized_classification() {
        let (classifier, seen) = quantized([10, 200, 46]);
        let result = classifier.classify(&hand(), Handedness::Right).unwrap();
        assert_eq!(result.class(), 1);
        assert_relative_eq!(result.confidence(), 200.0 / 256.0);

        let input = seen.lock().unwrap().clone();
        assert_eq!(input.len(), 63);
        // Wrist maps to the zero point, the middle MCP's y = -1.0 to 128 - 20.
        assert_eq!(&input[..3], &[128, 128, 128]);
        assert_eq!(input[9 * 3 + 1], 108);
    }

    #[test]
    fn low_confidence_is_no_gesture() {
        let (classifier, _) = quantized([10, 100, 46]);
        let result = classifier.classify(&hand(), Handedness::Left).unwrap();
        assert_eq!(result.class(), NO_GESTURE);
        assert!(!result.is_gesture());
        assert_relative_eq!(result.confidence(), 100.0 / 256.0);
    }

    #[test]
    fn degenerate_hand_still_classifies() {
        let (classifier, _) = quantized([0, 0, 255]);
        let lms = HandLandmarks::from_points([Point3::new(0.3, 0.3, 0.3); 21]).unwrap();
        let result = classifier.classify(&lms, Handedness::Left).unwrap();
        assert_eq!(result.class(), 2);
    }

    #[test]
    fn rejects_wrong_landmark_count() {
        let (classifier, _) = quantized([0, 0, 255]);
        let points = vec![Point3::new(0.0, 0.0, 0.0); 20];
        assert!(classifier.classify_points(&points, Handedness::Left).is_err());
        let points = vec![Point3::new(0.0, 0.0, 0.0); 21];
        assert!(classifier.classify_points(&points, Handedness::Left).is_ok());
    }

    #[test]
    fn float_classifier() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("features", &[1, 21, 3], ElementType::F32)],
            vec![TensorInfo::new("probs", &[1, 2], ElementType::F32)],
            |inputs| {
                let input = inputs.iter().next().unwrap().downcast::<f32>().unwrap();
                assert_eq!(input.shape(), &[1, 21, 3]);
                Ok(Outputs::from([Tensor::<f32>::from_iter(&[1, 2], [0.3, 1.7])]))
            },
        ));
        let classifier = GestureClassifier::new(nn).unwrap();
        let result = classifier.classify(&hand(), Handedness::Left).unwrap();
        assert_eq!(result.class(), 1);
        assert_eq!(result.confidence(), 1.0);
    }

    #[test]
    fn randomized_results_are_in_range() {
        let mut rng = fastrand::Rng::with_seed(42);
        for _ in 0..200 {
            let bytes = [rng.u8(..), rng.u8(..), rng.u8(..)];
            let (classifier, _) = quantized(bytes);
            let lms = HandLandmarks::from_points(
                (0..21).map(|_| Point3::new(rng.f32(), rng.f32(), rng.f32() - 0.5)),
            )
            .unwrap();
            let result = classifier.classify(&lms, Handedness::Right).unwrap();
            assert!((-1..3).contains(&result.class()));
            assert!((0.0..=1.0).contains(&result.confidence()));
            if result.confidence() < DEFAULT_CONFIDENCE_THRESHOLD {
                assert_eq!(result.class(), NO_GESTURE);
            }
        }
    }

    #[test]
    fn released_classifier_fails() {
        let (mut classifier, _) = quantized([0, 0, 255]);
        classifier.release();
        assert!(classifier.classify(&hand(), Handedness::Left).is_err());
    }

    #[test]
    fn rejects_bad_networks() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("features", &[1, 42], ElementType::F32)],
            vec![TensorInfo::new("probs", &[1, 2], ElementType::F32)],
            |_| unreachable!(),
        ));
        assert!(GestureClassifier::new(nn).is_err());

        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("features", &[1, 63], ElementType::U8)],
            vec![TensorInfo::new("probs", &[1, 2], ElementType::F32)],
            |_| unreachable!(),
        ));
        assert!(GestureClassifier::new(nn).is_err());
    }
}
