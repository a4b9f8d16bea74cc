//! Runs gesture recognition over a sequence of image files, replayed like a 30 FPS camera.
//!
//! Usage: `handsign <config.json> <rotation> <image>...`
//!
//! `rotation` is the clockwise sensor rotation in degrees. Actions bound to recognized gestures
//! are logged instead of executed.

use std::{ffi::OsString, thread, time::Duration};

use anyhow::Context;
use handsign::{
    action::LogDevice,
    config::PipelineConfig,
    image::{Frame, Rotation},
    pipeline::{Analyzer, AnalyzerMode, GestureActions, PipelineContext},
    worker::{FrameWorker, Submission},
};

const USAGE: &str = "usage: handsign <config.json> <rotation> <image>...";
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

fn main() -> anyhow::Result<()> {
    handsign::init_logger!();

    let mut args = std::env::args_os().skip(1);
    let config_path = args.next().context(USAGE)?;
    let rotation = parse_rotation(args.next().context(USAGE)?)?;
    let images: Vec<_> = args.collect();
    if images.is_empty() {
        anyhow::bail!(USAGE);
    }

    let config = PipelineConfig::load(&config_path)?;
    let mut ctx = PipelineContext::initialize(&config)?;
    let mut analyzer = Analyzer::from_config(AnalyzerMode::Inference, &config);
    let mut actions = GestureActions::from_config(&config, LogDevice);

    let worker = FrameWorker::builder()
        .name("analyzer")
        .spawn(move |frame: Frame| {
            if let Some(event) = analyzer.analyze(&mut ctx, &frame, &mut actions) {
                log::info!(
                    "gesture: {} ({:.2})",
                    event.label,
                    event.classification.confidence()
                );
            }
        })?;

    for path in &images {
        let frame = match Frame::load(path, rotation) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("{e:#}");
                continue;
            }
        };
        if worker.submit(frame) == Submission::Closed {
            anyhow::bail!("analyzer thread exited unexpectedly");
        }
        thread::sleep(FRAME_INTERVAL);
    }

    log::info!(
        "submitted {} images, {} dropped while busy",
        images.len(),
        worker.dropped_frames()
    );
    Ok(())
}

fn parse_rotation(arg: OsString) -> anyhow::Result<Rotation> {
    let degrees: i32 = arg
        .to_str()
        .and_then(|s| s.parse().ok())
        .with_context(|| format!("invalid rotation {arg:?}"))?;
    Rotation::from_degrees(degrees)
}
