//! Pipeline configuration.
//!
//! [`PipelineConfig`] is deserialized from JSON. Every field is optional and falls back to the
//! stock defaults, so an empty object `{}` is a valid configuration.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

use crate::{
    action::{ActionDispatcher, ActionKind, GestureBindings, DEFAULT_COOLDOWN},
    gesture::{classifier, stabilizer},
    hand::{
        detection,
        landmark::{self, CollectionParams},
    },
    nn::{backend::BackendPriority, tensor::ElementType},
};

/// Model paths, thresholds and action settings of the recognition pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Hand detector network (ONNX).
    pub detector_model: PathBuf,
    /// Hand landmark network (ONNX).
    pub landmark_model: PathBuf,
    /// Gesture classifier network (ONNX).
    pub classifier_model: PathBuf,
    /// JSON list of the hand detector's anchors.
    pub anchors: PathBuf,
    /// JSON map of gesture class indices to labels. The stock labels are used if unset.
    pub labels: Option<PathBuf>,

    pub detection_threshold: f32,
    pub roi_margin: f32,
    pub presence_threshold: f32,
    pub handedness_threshold: f32,
    pub confidence_threshold: f32,
    /// Number of consecutive frames with a hand before a gesture is reported.
    pub stabilization_threshold: u32,

    /// Cooldowns in milliseconds, overriding the stock per-action cooldowns.
    pub cooldowns: HashMap<ActionKind, u64>,
    pub default_cooldown_ms: u64,
    /// Gesture bindings, overriding the stock bindings of the same labels.
    pub bindings: GestureBindings,

    pub collection: CollectionParams,

    /// Backend combinations to try when loading the networks, in order.
    pub backends: BackendPriority,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector_model: "models/handdetector.onnx".into(),
            landmark_model: "models/handlandmarkdetector.onnx".into(),
            classifier_model: "models/gesture_classifier.onnx".into(),
            anchors: "models/anchors.json".into(),
            labels: None,
            detection_threshold: detection::DEFAULT_THRESHOLD,
            roi_margin: detection::DEFAULT_ROI_MARGIN,
            presence_threshold: landmark::DEFAULT_PRESENCE_THRESHOLD,
            handedness_threshold: landmark::DEFAULT_HANDEDNESS_THRESHOLD,
            confidence_threshold: classifier::DEFAULT_CONFIDENCE_THRESHOLD,
            stabilization_threshold: stabilizer::DEFAULT_THRESHOLD,
            cooldowns: HashMap::new(),
            default_cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
            bindings: GestureBindings::empty(),
            collection: CollectionParams::default(),
            backends: BackendPriority::for_element_type(ElementType::F32),
        }
    }
}

impl PipelineConfig {
    /// Parses a JSON configuration. Relative paths are kept as they are.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    ///
    /// Relative paths in the file are resolved against the directory containing it.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration '{}'", path.display()))?;
        let mut config = Self::from_json(&json)
            .with_context(|| format!("invalid configuration '{}'", path.display()))?;
        if let Some(dir) = path.parent() {
            config.resolve_paths(dir);
        }
        Ok(config)
    }

    /// Makes all relative paths relative to `base` instead.
    pub fn resolve_paths(&mut self, base: &Path) {
        let paths = [
            &mut self.detector_model,
            &mut self.landmark_model,
            &mut self.classifier_model,
            &mut self.anchors,
        ];
        for path in paths.into_iter().chain(self.labels.as_mut()) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let unit_range = [
            ("detection_threshold", self.detection_threshold),
            ("presence_threshold", self.presence_threshold),
            ("handedness_threshold", self.handedness_threshold),
            ("confidence_threshold", self.confidence_threshold),
        ];
        for (name, value) in unit_range {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("`{name}` must be in range 0..=1, got {value}");
            }
        }
        if !(self.roi_margin > 0.0) {
            anyhow::bail!("`roi_margin` must be positive, got {}", self.roi_margin);
        }
        if self.collection.target_samples == 0 {
            anyhow::bail!("`collection.target_samples` must not be 0");
        }
        if self.backends.combinations().is_empty() {
            anyhow::bail!("`backends` must list at least one backend combination");
        }
        Ok(())
    }

    /// Returns the stock gesture bindings with the configured overrides applied.
    pub fn gesture_bindings(&self) -> GestureBindings {
        let mut bindings = GestureBindings::default();
        bindings.extend(&self.bindings);
        bindings
    }

    /// Creates an [`ActionDispatcher`] using the configured cooldowns.
    pub fn dispatcher(&self) -> ActionDispatcher {
        let mut dispatcher = ActionDispatcher::new()
            .with_default_cooldown(Duration::from_millis(self.default_cooldown_ms));
        for (&action, &ms) in &self.cooldowns {
            dispatcher.set_cooldown(action, Duration::from_millis(ms));
        }
        dispatcher
    }
}

#[cfg(test)]
mod tests {
    use crate::nn::backend::{BackendKind, Combination};

    use super::*;

    #[test]
    fn empty_config_is_default() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.detection_threshold, 0.9);
        assert_eq!(config.roi_margin, 1.8);
        assert_eq!(config.stabilization_threshold, 20);
        assert_eq!(config.collection.target_samples, 100);
        assert_eq!(
            config.backends.combinations(),
            [
                Combination::new([BackendKind::Npu, BackendKind::Gpu]),
                Combination::new([BackendKind::Gpu]),
                Combination::cpu(),
            ]
        );
    }

    #[test]
    fn partial_config() {
        let config = PipelineConfig::from_json(
            r#"{
                "stabilization_threshold": 50,
                "cooldowns": {"swipe_right": 250},
                "default_cooldown_ms": 2000,
                "bindings": {"rock": "play_pause_music"},
                "collection": {"target_samples": 10},
                "backends": [["gpu"], []]
            }"#,
        )
        .unwrap();
        assert_eq!(config.stabilization_threshold, 50);
        assert_eq!(config.collection.target_samples, 10);
        assert_eq!(config.collection.frame_interval, 3);
        assert_eq!(config.backends.combinations().len(), 2);

        let dispatcher = config.dispatcher();
        assert_eq!(
            dispatcher.cooldown(ActionKind::SwipeRight),
            Duration::from_millis(250)
        );
        assert_eq!(
            dispatcher.cooldown(ActionKind::VolumeUp),
            Duration::from_millis(500)
        );
        assert_eq!(
            dispatcher.cooldown(ActionKind::ToggleFlash),
            Duration::from_millis(2000)
        );

        let bindings = config.gesture_bindings();
        assert_eq!(bindings.action_for("rock"), ActionKind::PlayPauseMusic);
        assert_eq!(bindings.action_for("paper"), ActionKind::VolumeUp);
    }

    #[test]
    fn invalid_configs() {
        assert!(PipelineConfig::from_json(r#"{"detection_threshold": 1.5}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"roi_margin": 0}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"backends": []}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"backends": [["tpu"]]}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"threshold": 0.5}"#).is_err());
        assert!(PipelineConfig::from_json(r#"{"cooldowns": {"jump": 10}}"#).is_err());
    }

    #[test]
    fn relative_paths() {
        let mut config = PipelineConfig {
            detector_model: "/abs/det.onnx".into(),
            labels: Some("labels.json".into()),
            ..Default::default()
        };
        config.resolve_paths(Path::new("/etc/handsign"));
        assert_eq!(config.detector_model, Path::new("/abs/det.onnx"));
        assert_eq!(
            config.landmark_model,
            Path::new("/etc/handsign/models/handlandmarkdetector.onnx")
        );
        assert_eq!(config.labels.as_deref(), Some(Path::new("/etc/handsign/labels.json")));
    }
}
