//! Hand detection.
//!
//! The detector is an anchor-based single-shot network (like MediaPipe's palm detector). Frames are
//! letterboxed into the network's square input, the single most confident box is decoded and
//! mapped back into the frame, and a square region around it is cropped for landmark estimation.

use nalgebra::{Point2, Rotation2, Vector2};

use crate::{
    detection::{ssd::Anchors, BoundingBox, BoxDecoder, DecodeScales},
    image::{self, Resolution, RgbaImage, Rotation},
    nn::{Cnn, ColorMapper, NeuralNetwork},
    rect::{square_roi, PixelRect},
    timer::Timer,
};

/// Default minimum confidence of a detection.
pub const DEFAULT_THRESHOLD: f32 = 0.9;

/// Default side length of the square region of interest, relative to the longer side of the
/// detected box.
pub const DEFAULT_ROI_MARGIN: f32 = 1.8;

/// Default size of the cropped hand image.
pub const DEFAULT_CROP_SIZE: u32 = 256;

/// A hand found by [`HandDetector::detect`].
#[derive(Debug, Clone)]
pub struct HandDetection {
    bbox: BoundingBox,
    roi: PixelRect,
    crop: RgbaImage,
}

impl HandDetection {
    /// Returns the detected box, in pixel coordinates of the rotation-corrected frame.
    pub fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Returns the square region that was cropped out of the rotation-corrected frame.
    pub fn roi(&self) -> PixelRect {
        self.roi
    }

    /// Returns the cropped and resized hand image.
    pub fn crop(&self) -> &RgbaImage {
        &self.crop
    }

    pub fn into_crop(self) -> RgbaImage {
        self.crop
    }
}

/// A detected hand, described by approximate key points.
///
/// Without landmarks the wrist and middle finger positions are not known. Until then, they are
/// approximated by the bottom and top center of the bounding box, and [`is_provisional`] returns
/// `true`.
///
/// [`is_provisional`]: HandDetectionResult::is_provisional
#[derive(Debug, Clone)]
pub struct HandDetectionResult {
    detection: HandDetection,
    wrist: Point2<f32>,
    middle: Point2<f32>,
    provisional: bool,
}

impl HandDetectionResult {
    fn from_box(detection: HandDetection) -> Self {
        let rect = detection.bbox.rect();
        let (xc, _) = rect.center();
        Self {
            wrist: Point2::new(xc, rect.bottom()),
            middle: Point2::new(xc, rect.top()),
            provisional: true,
            detection,
        }
    }

    pub fn bounding_box(&self) -> &BoundingBox {
        self.detection.bounding_box()
    }

    pub fn crop(&self) -> &RgbaImage {
        self.detection.crop()
    }

    pub fn detection(&self) -> &HandDetection {
        &self.detection
    }

    pub fn wrist(&self) -> Point2<f32> {
        self.wrist
    }

    pub fn middle(&self) -> Point2<f32> {
        self.middle
    }

    /// Whether the wrist and middle points are derived from the bounding box instead of from
    /// actual landmarks.
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    /// Computes the clockwise rotation of the hand compared to an upright position, in radians.
    ///
    /// A rotation of 0° means that the fingers point upwards.
    pub fn rotation_radians(&self) -> f32 {
        let rel: Vector2<f32> = self.wrist - self.middle;
        if rel.norm_squared() == 0.0 {
            return 0.0;
        }
        Rotation2::rotation_between(&Vector2::y(), &rel).angle()
    }
}

/// Finds the most confident hand in camera frames.
pub struct HandDetector {
    cnn: Option<Cnn>,
    decoder: BoxDecoder,
    box_output: usize,
    score_output: usize,
    threshold: f32,
    roi_margin: f32,
    crop_size: u32,
    t_letterbox: Timer,
    t_infer: Timer,
    t_decode: Timer,
    t_crop: Timer,
}

impl HandDetector {
    /// Creates a hand detector from a detection network and its anchors.
    ///
    /// The network must take a single square RGB image and produce the per-anchor box regression
    /// (`box_coords`) and score (`box_scores`) outputs. If the outputs are not named like that,
    /// the first two outputs are used.
    pub fn new(nn: NeuralNetwork, anchors: Anchors) -> anyhow::Result<Self> {
        let box_output = nn.output_index("box_coords", 0);
        let score_output = nn.output_index("box_scores", 1);
        if nn.num_outputs() < 2 {
            anyhow::bail!(
                "hand detection network needs 2 outputs, this one has {}",
                nn.num_outputs()
            );
        }

        let cnn = Cnn::with_inferred_shape(nn, ColorMapper::linear(0.0..=1.0))?;
        let input_res = cnn.input_resolution();
        if input_res.width() != input_res.height() {
            anyhow::bail!("hand detection network input must be square, got {input_res}");
        }

        let expected = cnn.network().outputs()[box_output].shape();
        match expected {
            [1, n, _] if *n != anchors.anchor_count() => log::warn!(
                "hand detection network has {n} anchors, but {} were loaded; detection will fail",
                anchors.anchor_count(),
            ),
            _ => {}
        }

        Ok(Self {
            cnn: Some(cnn),
            decoder: BoxDecoder::new(anchors, input_res),
            box_output,
            score_output,
            threshold: DEFAULT_THRESHOLD,
            roi_margin: DEFAULT_ROI_MARGIN,
            crop_size: DEFAULT_CROP_SIZE,
            t_letterbox: Timer::new("letterbox"),
            t_infer: Timer::new("detect"),
            t_decode: Timer::new("decode"),
            t_crop: Timer::new("crop"),
        })
    }

    /// Sets the minimum detection confidence. Detections must *exceed* it.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Sets the size of the cropped region, relative to the longer side of the detected box.
    pub fn with_roi_margin(mut self, margin: f32) -> Self {
        self.roi_margin = margin;
        self
    }

    /// Sets the side length the cropped hand image is resized to.
    pub fn with_crop_size(mut self, size: u32) -> Self {
        self.crop_size = size;
        self
    }

    /// Overrides the divisors applied to the raw box regression outputs.
    ///
    /// By default, the network's input size is used for all of them.
    pub fn with_decode_scales(mut self, scales: DecodeScales) -> Self {
        self.decoder = self.decoder.with_scales(scales);
        self
    }

    /// Returns the expected input resolution of the detection network.
    pub fn input_resolution(&self) -> Option<Resolution> {
        self.cnn.as_ref().map(|cnn| cnn.input_resolution())
    }

    /// Releases the detection network.
    ///
    /// Any further detection attempt will log a warning and find nothing.
    pub fn release(&mut self) {
        if self.cnn.take().is_some() {
            log::debug!("released hand detector");
        }
    }

    pub fn is_released(&self) -> bool {
        self.cnn.is_none()
    }

    /// Detects the most confident hand in `frame`.
    ///
    /// `frame` is first rotated clockwise by `rotation`. All returned coordinates refer to the
    /// rotated frame.
    ///
    /// Returns [`None`] if no hand was found, or if detection failed (this is logged).
    pub fn detect(&self, frame: &RgbaImage, rotation: Rotation) -> Option<HandDetection> {
        let Some(cnn) = &self.cnn else {
            log::warn!("hand detector used after release");
            return None;
        };

        let frame = image::rotate(frame, rotation);
        let target = cnn.input_resolution().width();
        let Some((input, transform)) = self.t_letterbox.time(|| image::letterbox(&frame, target))
        else {
            log::debug!("cannot letterbox {} frame", Resolution::of(&frame));
            return None;
        };

        let outputs = match self.t_infer.time(|| cnn.estimate(&input)) {
            Ok(outputs) => outputs,
            Err(e) => {
                log::warn!("hand detection failed: {e:#}");
                return None;
            }
        };

        let best = self.t_decode.time(|| {
            let infos = cnn.network().outputs();
            let boxes = outputs.get_f32(self.box_output, infos[self.box_output].quantization())?;
            let scores =
                outputs.get_f32(self.score_output, infos[self.score_output].quantization())?;
            self.decoder.best_detection(&boxes, &scores, self.threshold)
        });
        let bbox = match best {
            Ok(Some(bbox)) => bbox.map_rect(|rect| transform.rect_to_source(rect)),
            Ok(None) => {
                log::trace!("no hand detected");
                return None;
            }
            Err(e) => {
                log::warn!("invalid hand detection output: {e:#}");
                return None;
            }
        };

        let Some(roi) = square_roi(bbox.rect(), self.roi_margin, Resolution::of(&frame)) else {
            log::debug!("degenerate hand region for {:?}", bbox.rect());
            return None;
        };
        let crop = self
            .t_crop
            .time(|| image::crop_resized(&frame, roi, self.crop_size));

        log::trace!("hand at {:?} ({:.2}), cropping {roi:?}", bbox.rect(), bbox.confidence());
        Some(HandDetection { bbox, roi, crop })
    }

    /// Like [`HandDetector::detect`], but additionally approximates the hand's orientation.
    pub fn detect_and_describe(
        &self,
        frame: &RgbaImage,
        rotation: Rotation,
    ) -> Option<HandDetectionResult> {
        self.detect(frame, rotation).map(HandDetectionResult::from_box)
    }

    /// Returns profiling timers for letterboxing, inference, decoding and cropping.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_letterbox, &self.t_infer, &self.t_decode, &self.t_crop].into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use approx::assert_relative_eq;
    use ::image::Rgba;

    use super::*;
    use crate::{
        detection::ssd::Anchor,
        nn::{tensor::ElementType, tensor::Tensor, testing::ScriptedEngine, Outputs, TensorInfo},
    };

    const N: usize = 4;

    fn anchors() -> Anchors {
        (0..N)
            .map(|i| {
                if i == 2 {
                    Anchor::new(0.5, 0.5, 0.2, 0.2)
                } else {
                    Anchor::new(0.1, 0.1, 0.1, 0.1)
                }
            })
            .collect()
    }

    /// A 16x16 detector that reports a confident hand at anchor 2 only if `hit` is true.
    fn network(hit: bool, calls: Arc<AtomicUsize>) -> NeuralNetwork {
        NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("input", &[1, 16, 16, 3], ElementType::F32)],
            vec![
                TensorInfo::new("box_scores", &[1, N, 1], ElementType::F32),
                TensorInfo::new("box_coords", &[1, N, 18], ElementType::F32),
            ],
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let scores = Tensor::<f32>::from_array_shape_fn([1, N, 1], |[_, i, _]| {
                    if hit && i == 2 {
                        10.0
                    } else {
                        -10.0
                    }
                });
                let boxes = Tensor::<f32>::from_array_shape_fn([1, N, 18], |_| 0.0);
                Ok(Outputs::from([scores, boxes]))
            },
        ))
    }

    fn detector(hit: bool) -> (HandDetector, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let det = HandDetector::new(network(hit, calls.clone()), anchors()).unwrap();
        (det, calls)
    }

    fn gray(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([90, 90, 90, 255]))
    }

    #[test]
    fn square_frame_box_is_centered() {
        let (det, _) = detector(true);
        let hand = det.detect(&gray(16, 16), Rotation::Deg0).unwrap();
        let (xc, yc) = hand.bounding_box().rect().center();
        assert_relative_eq!(xc, 8.0, epsilon = 1e-4);
        assert_relative_eq!(yc, 8.0, epsilon = 1e-4);
        assert_relative_eq!(hand.bounding_box().rect().width(), 3.2, epsilon = 1e-4);
        assert!(hand.bounding_box().confidence() > 0.9);
        assert_eq!(Resolution::of(hand.crop()), Resolution::new(256, 256));
    }

    #[test]
    fn letterboxed_frame_maps_back() {
        let (det, _) = detector(true);
        // 64x32 is scaled by 1/4 and padded by 4 pixels at the top and bottom.
        let hand = det.detect(&gray(64, 32), Rotation::Deg0).unwrap();
        let rect = hand.bounding_box().rect();
        let (xc, yc) = rect.center();
        assert_relative_eq!(xc, 32.0, epsilon = 1e-3);
        assert_relative_eq!(yc, 16.0, epsilon = 1e-3);
        assert_relative_eq!(rect.width(), 12.8, epsilon = 1e-3);

        // 12.8 * 1.8 = 23.04, rounded to 23
        assert_eq!(hand.roi().width(), 23);
        assert_eq!(hand.roi().height(), 23);
    }

    #[test]
    fn rotation_is_applied_first() {
        let (det, _) = detector(true);
        let hand = det.detect(&gray(64, 32), Rotation::Deg90).unwrap();
        let (xc, yc) = hand.bounding_box().rect().center();
        assert_relative_eq!(xc, 16.0, epsilon = 1e-3);
        assert_relative_eq!(yc, 32.0, epsilon = 1e-3);
    }

    #[test]
    fn nothing_detected() {
        let (det, calls) = detector(false);
        assert!(det.detect(&gray(16, 16), Rotation::Deg0).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn anchor_count_mismatch_aborts_detection() {
        let calls = Arc::new(AtomicUsize::new(0));
        let too_few = anchors().iter().copied().take(3).collect();
        let det = HandDetector::new(network(true, calls), too_few).unwrap();
        assert!(det.detect(&gray(16, 16), Rotation::Deg0).is_none());
    }

    #[test]
    fn engine_error_is_absorbed() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("input", &[1, 16, 16, 3], ElementType::F32)],
            vec![
                TensorInfo::new("a", &[1, N, 18], ElementType::F32),
                TensorInfo::new("b", &[1, N, 1], ElementType::F32),
            ],
            |_| anyhow::bail!("delegate crashed"),
        ));
        let det = HandDetector::new(nn, anchors()).unwrap();
        assert!(det.detect(&gray(16, 16), Rotation::Deg0).is_none());
    }

    #[test]
    fn released_detector_finds_nothing() {
        let (mut det, calls) = detector(true);
        det.release();
        assert!(det.is_released());
        assert!(det.detect(&gray(16, 16), Rotation::Deg0).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        det.release();
    }

    #[test]
    fn provisional_description() {
        let (det, _) = detector(true);
        let result = det.detect_and_describe(&gray(16, 16), Rotation::Deg0).unwrap();
        assert!(result.is_provisional());
        assert!(result.wrist().y > result.middle().y);
        assert_relative_eq!(result.wrist().x, result.middle().x);
        assert_relative_eq!(result.rotation_radians(), 0.0);
    }

    #[test]
    fn rejects_non_square_input() {
        let nn = NeuralNetwork::from_engine(ScriptedEngine::new(
            vec![TensorInfo::new("input", &[1, 16, 8, 3], ElementType::F32)],
            vec![
                TensorInfo::new("a", &[1, N, 18], ElementType::F32),
                TensorInfo::new("b", &[1, N, 1], ElementType::F32),
            ],
            |_| unreachable!(),
        ));
        assert!(HandDetector::new(nn, anchors()).is_err());
    }
}
