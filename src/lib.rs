//! On-device hand gesture recognition.
//!
//! Frames from an external camera pass through a fixed chain of stages:
//!
//! 1. [`hand::detection::HandDetector`] finds the most confident hand using an anchor-based
//!    single-shot detector and crops a square region around it.
//! 2. [`hand::landmark::LandmarkDetector`] regresses 21 3D keypoints and the handedness from the
//!    crop.
//! 3. [`gesture::classifier::GestureClassifier`] maps the normalized keypoints to a gesture class.
//! 4. [`gesture::stabilizer::GestureStabilizer`] debounces the per-frame results.
//! 5. [`action::ActionDispatcher`] executes the action bound to the stable gesture, subject to a
//!    per-action cooldown.
//!
//! The neural networks are executed by the first backend combination that can be constructed, see
//! [`nn::backend`]. [`pipeline::PipelineContext`] owns all of them and controls their lifecycle.
//!
//! # Coordinates
//!
//! Image coordinates have their origin in the top left corner, with X pointing right and Y pointing
//! *down*. Landmarks are normalized to `[0, 1]` relative to the image they were estimated from.
//!
//! # Environment Variables
//!
//! * `HANDSIGN_BACKEND`: Restricts hardware backend selection. Allowed values are:
//!   * `auto` (or unset): try the configured backend combinations in order.
//!   * `cpu`: skip all accelerators and only use the CPU engine.
//! * `RUST_LOG`: overrides the log levels set by [`init_logger!`].

pub mod action;
pub mod config;
pub mod detection;
pub mod gesture;
pub mod hand;
pub mod image;
pub mod landmark;
pub mod nn;
pub mod num;
pub mod pipeline;
pub mod rect;
pub mod timer;
pub mod worker;

use log::LevelFilter;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .filter(Some("ort"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and this library will log at *debug* level, `ort` at *warn* level. `RUST_LOG`
/// can be used to override this.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
