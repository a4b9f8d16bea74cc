//! Detection and landmark estimation of human hands.
//!
//! [`detection::HandDetector`] locates the most confident hand in a camera frame and crops a square
//! region around it. The crop is fed into [`landmark::LandmarkDetector`], which estimates the 21
//! hand landmarks.

pub mod detection;
pub mod landmark;
