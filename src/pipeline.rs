//! The frame analysis pipeline.
//!
//! [`PipelineContext`] owns the networks of all stages and controls their lifecycle. An
//! [`Analyzer`] runs the stages on each frame, debounces the results and reports them to an
//! [`AnalyzerEvents`] implementation.

use std::path::Path;

use anyhow::Context;

use crate::{
    action::{ActionDispatcher, DeviceControl, GestureBindings, Outcome},
    config::PipelineConfig,
    detection::ssd::Anchors,
    gesture::{
        classifier::{Classification, GestureClassifier},
        stabilizer::{GestureStabilizer, StabilizerState},
        GestureLabels, UNKNOWN_LABEL,
    },
    hand::{
        detection::{HandDetectionResult, HandDetector},
        landmark::{LandmarkDetector, TrainingProgressListener},
    },
    image::{Frame, RgbaImage, Rotation},
    landmark::HandLandmarks,
    nn::NeuralNetwork,
    timer::{FpsCounter, Timer},
};

/// Text displayed while a hand is visible, but no landmarks could be estimated.
pub const NO_GESTURE_TEXT: &str = "No gesture";

/// Owns the hand detector, landmark detector and gesture classifier.
///
/// The networks are loaded by [`PipelineContext::initialize`] and released by
/// [`PipelineContext::shutdown`] (or when the context is dropped). After shutdown, analyzing frames
/// finds no hands.
pub struct PipelineContext {
    hand_detector: HandDetector,
    landmark_detector: LandmarkDetector,
    classifier: GestureClassifier,
    labels: GestureLabels,
    generation: u32,
}

impl PipelineContext {
    /// Loads all networks and assets referenced by `config`.
    ///
    /// Fails if any asset is missing or malformed, or if no backend combination can run one of the
    /// networks. Networks loaded before the failure are released again.
    pub fn initialize(config: &PipelineConfig) -> anyhow::Result<Self> {
        Self::load(config).map_err(|e| {
            log::error!("failed to initialize pipeline: {e:#}");
            e
        })
    }

    fn load(config: &PipelineConfig) -> anyhow::Result<Self> {
        let load_network = |path: &Path, what: &str| -> anyhow::Result<NeuralNetwork> {
            let nn = NeuralNetwork::from_path(path)?
                .with_backends(config.backends.clone())
                .load()
                .with_context(|| format!("failed to load {what} network"))?;
            log::info!("{what} running on {}", nn.combination());
            Ok(nn)
        };

        let anchors = Anchors::load(&config.anchors)?;
        let hand_detector =
            HandDetector::new(load_network(&config.detector_model, "hand detector")?, anchors)?
                .with_threshold(config.detection_threshold)
                .with_roi_margin(config.roi_margin);
        let landmark_detector =
            LandmarkDetector::new(load_network(&config.landmark_model, "hand landmark")?)?
                .with_presence_threshold(config.presence_threshold)
                .with_handedness_threshold(config.handedness_threshold)
                .with_collection_params(config.collection);
        let classifier =
            GestureClassifier::new(load_network(&config.classifier_model, "gesture classifier")?)?
                .with_confidence_threshold(config.confidence_threshold);
        let labels = match &config.labels {
            Some(path) => GestureLabels::load(path)?,
            None => GestureLabels::default(),
        };

        Ok(Self::from_parts(
            hand_detector,
            landmark_detector,
            classifier,
            labels,
        ))
    }

    /// Creates a context from already constructed stages.
    pub fn from_parts(
        hand_detector: HandDetector,
        landmark_detector: LandmarkDetector,
        classifier: GestureClassifier,
        labels: GestureLabels,
    ) -> Self {
        if labels.len() != classifier.num_classes() {
            log::warn!(
                "{} gesture labels for {} classifier classes",
                labels.len(),
                classifier.num_classes()
            );
        }
        Self {
            hand_detector,
            landmark_detector,
            classifier,
            labels,
            generation: 1,
        }
    }

    /// Releases the current networks and loads new ones from `config`.
    ///
    /// The current networks are released before loading starts. If loading fails, the context
    /// stays shut down.
    pub fn reset(&mut self, config: &PipelineConfig) -> anyhow::Result<()> {
        self.shutdown();
        let mut next = Self::initialize(config)?;
        next.generation = self.generation + 1;
        *self = next;
        log::debug!("pipeline reinitialized (generation {})", self.generation);
        Ok(())
    }

    /// Releases all networks. Calling this more than once has no further effect.
    pub fn shutdown(&mut self) {
        if self.is_shut_down() {
            return;
        }
        self.hand_detector.release();
        self.landmark_detector.release();
        self.classifier.release();
        log::debug!("pipeline shut down (generation {})", self.generation);
    }

    pub fn is_shut_down(&self) -> bool {
        self.hand_detector.is_released()
            && self.landmark_detector.is_released()
            && self.classifier.is_released()
    }

    /// Returns how many times the networks have been loaded.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Replaces the gesture classifier, for example with a retrained one.
    pub fn install_classifier(&mut self, classifier: GestureClassifier, labels: GestureLabels) {
        self.classifier.release();
        self.classifier = classifier;
        self.labels = labels;
        log::info!(
            "installed gesture classifier with {} classes",
            self.classifier.num_classes()
        );
    }

    pub fn hand_detector(&self) -> &HandDetector {
        &self.hand_detector
    }

    pub fn landmark_detector(&self) -> &LandmarkDetector {
        &self.landmark_detector
    }

    pub fn landmark_detector_mut(&mut self) -> &mut LandmarkDetector {
        &mut self.landmark_detector
    }

    pub fn classifier(&self) -> &GestureClassifier {
        &self.classifier
    }

    pub fn labels(&self) -> &GestureLabels {
        &self.labels
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        self.hand_detector
            .timers()
            .chain(self.landmark_detector.timers())
            .chain(self.classifier.timers())
    }
}

impl Drop for PipelineContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A debounced gesture, reported once per continuous run of frames with a hand.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureEvent {
    pub label: String,
    pub classification: Classification,
}

/// Receives the results of an [`Analyzer`].
///
/// The [`TrainingProgressListener`] methods are called in [`AnalyzerMode::Training`].
pub trait AnalyzerEvents: TrainingProgressListener {
    /// Called when a gesture has been shown long enough to be considered stable.
    fn on_gesture(&mut self, event: &GestureEvent) {
        let _ = event;
    }

    /// Called once sample collection has finished.
    fn on_training_complete(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerMode {
    /// Classify gestures and report stable ones.
    Inference,
    /// Collect landmark samples of the gesture `label`.
    Training { label: String },
}

/// Per-frame results kept for presentation.
#[derive(Debug, Default)]
pub struct DisplayState {
    text: String,
    landmarks: Option<HandLandmarks>,
    annotated: Option<RgbaImage>,
}

impl DisplayState {
    /// Returns the recognized gesture as `"label (NN%)"`.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn landmarks(&self) -> Option<&HandLandmarks> {
        self.landmarks.as_ref()
    }

    /// Returns the last hand crop with the landmarks drawn onto it.
    pub fn annotated(&self) -> Option<&RgbaImage> {
        self.annotated.as_ref()
    }

    fn clear(&mut self) {
        self.text.clear();
        self.landmarks = None;
        self.annotated = None;
    }
}

/// Runs the recognition stages on a stream of frames.
pub struct Analyzer {
    mode: AnalyzerMode,
    stabilizer: GestureStabilizer,
    display: DisplayState,
    fps: FpsCounter,
}

impl Analyzer {
    pub fn new(mode: AnalyzerMode, stabilization_threshold: u32) -> Self {
        Self {
            mode,
            stabilizer: GestureStabilizer::new(stabilization_threshold),
            display: DisplayState::default(),
            fps: FpsCounter::new("analyzer"),
        }
    }

    pub fn from_config(mode: AnalyzerMode, config: &PipelineConfig) -> Self {
        Self::new(mode, config.stabilization_threshold)
    }

    pub fn mode(&self) -> &AnalyzerMode {
        &self.mode
    }

    /// Switches to a different mode, starting over with stabilization.
    pub fn set_mode(&mut self, mode: AnalyzerMode) {
        self.mode = mode;
        self.reset();
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn state(&self) -> StabilizerState {
        self.stabilizer.state()
    }

    pub fn consecutive_frames(&self) -> u32 {
        self.stabilizer.consecutive_frames()
    }

    /// Forgets all per-stream state.
    pub fn reset(&mut self) {
        self.stabilizer.record_loss();
        self.display.clear();
    }

    /// Analyzes one frame.
    ///
    /// Returns the gesture event emitted for this frame, if any. Per-frame failures are logged and
    /// treated like a frame without a hand.
    pub fn analyze<E: AnalyzerEvents>(
        &mut self,
        ctx: &mut PipelineContext,
        frame: &Frame,
        events: &mut E,
    ) -> Option<GestureEvent> {
        let event = match self.mode.clone() {
            AnalyzerMode::Inference => self.infer(ctx, frame, events),
            AnalyzerMode::Training { label } => self.collect(ctx, frame, &label, events),
        };
        self.fps.tick_with(ctx.timers());
        event
    }

    fn detect(&mut self, ctx: &mut PipelineContext, frame: &Frame) -> Option<HandDetectionResult> {
        let hand = ctx
            .hand_detector
            .detect_and_describe(frame.image(), frame.rotation());
        if hand.is_none() {
            self.lose(ctx);
        }
        hand
    }

    fn lose(&mut self, ctx: &mut PipelineContext) {
        self.stabilizer.record_loss();
        self.display.clear();
        ctx.landmark_detector.clear();
    }

    fn infer<E: AnalyzerEvents>(
        &mut self,
        ctx: &mut PipelineContext,
        frame: &Frame,
        events: &mut E,
    ) -> Option<GestureEvent> {
        let hand = self.detect(ctx, frame)?;

        // The crop is taken from the rotation-corrected frame.
        let annotated = ctx.landmark_detector.predict(hand.crop(), Rotation::Deg0);
        let Some(landmarks) = ctx.landmark_detector.last_landmarks().cloned() else {
            log::trace!("hand found, but no landmarks");
            self.display.text = NO_GESTURE_TEXT.to_string();
            self.display.landmarks = None;
            return None;
        };
        let handedness = ctx.landmark_detector.last_handedness();

        let classification = match ctx.classifier.classify(&landmarks, handedness) {
            Ok(classification) => classification,
            Err(e) => {
                log::warn!("gesture classification failed: {e:#}");
                return None;
            }
        };
        let label = ctx.labels.label(classification.class());
        self.display.text = format!(
            "{label} ({}%)",
            (classification.confidence() * 100.0) as u32
        );
        self.display.landmarks = Some(landmarks);
        self.display.annotated = Some(annotated);

        if !self.stabilizer.record_valid() {
            log::trace!(
                "accumulating ({}/{})",
                self.stabilizer.consecutive_frames(),
                self.stabilizer.threshold()
            );
            return None;
        }

        log::debug!("stable gesture: {}", self.display.text);
        self.stabilizer.set_stable_label(label);
        let event = GestureEvent {
            label: label.to_string(),
            classification,
        };
        events.on_gesture(&event);
        Some(event)
    }

    fn collect<E: AnalyzerEvents>(
        &mut self,
        ctx: &mut PipelineContext,
        frame: &Frame,
        label: &str,
        events: &mut E,
    ) -> Option<GestureEvent> {
        if !ctx.landmark_detector.is_collecting() {
            self.lose(ctx);
            return None;
        }
        let hand = self.detect(ctx, frame)?;

        let annotated = ctx
            .landmark_detector
            .transfer(hand.crop(), Rotation::Deg0, label, events);
        self.display.landmarks = ctx.landmark_detector.last_landmarks().cloned();
        self.display.annotated = Some(annotated);
        self.display.text = format!(
            "{label}: {} samples",
            ctx.landmark_detector.collected_samples()
        );
        // Samples are not classified, so a stable run reports an unknown gesture.
        let event = self.stabilizer.record_valid().then(|| {
            self.stabilizer.set_stable_label(UNKNOWN_LABEL);
            let event = GestureEvent {
                label: UNKNOWN_LABEL.to_string(),
                classification: Classification::no_gesture(),
            };
            events.on_gesture(&event);
            event
        });

        if !ctx.landmark_detector.is_collecting() {
            log::info!("collection of '{label}' complete");
            self.stabilizer.record_loss();
            events.on_training_complete();
        }
        event
    }
}

/// [`AnalyzerEvents`] that execute the action bound to each stable gesture.
pub struct GestureActions<D> {
    bindings: GestureBindings,
    dispatcher: ActionDispatcher,
    device: D,
    last_outcome: Option<Outcome>,
}

impl<D: DeviceControl> GestureActions<D> {
    pub fn new(bindings: GestureBindings, dispatcher: ActionDispatcher, device: D) -> Self {
        Self {
            bindings,
            dispatcher,
            device,
            last_outcome: None,
        }
    }

    /// Uses the bindings and cooldowns of `config`.
    pub fn from_config(config: &PipelineConfig, device: D) -> Self {
        Self::new(config.gesture_bindings(), config.dispatcher(), device)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Returns the outcome of the most recent dispatch.
    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }
}

impl<D: DeviceControl> TrainingProgressListener for GestureActions<D> {}

impl<D: DeviceControl> AnalyzerEvents for GestureActions<D> {
    fn on_gesture(&mut self, event: &GestureEvent) {
        let action = self.bindings.action_for(&event.label);
        log::debug!("'{}' -> {action}", event.label);
        self.last_outcome = Some(self.dispatcher.execute(action, &mut self.device));
    }
}
