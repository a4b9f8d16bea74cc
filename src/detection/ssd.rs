//! Anchors (priors) of Single Shot MultiBox Detectors (SSDs).
//!
//! Anchor order is significant: anchor `i` corresponds to row `i` of the network's box and score
//! outputs.

use std::{fs, ops::Index, path::Path};

use anyhow::Context;
use serde::Deserialize;

use crate::image::Resolution;

/// An anchor of an SSD network, in normalized input coordinates (0 to 1).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Anchor {
    #[serde(rename = "cx")]
    x_center: f32,
    #[serde(rename = "cy")]
    y_center: f32,
    #[serde(rename = "w")]
    width: f32,
    #[serde(rename = "h")]
    height: f32,
}

impl Anchor {
    pub fn new(x_center: f32, y_center: f32, width: f32, height: f32) -> Self {
        Self {
            x_center,
            y_center,
            width,
            height,
        }
    }

    pub fn x_center(&self) -> f32 {
        self.x_center
    }

    pub fn y_center(&self) -> f32 {
        self.y_center
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }
}

/// Describes an output layer of an SSD network.
pub struct LayerInfo {
    /// Number of anchors per feature map cell/pixel. Must be non-zero.
    boxes_per_cell: u32,
    /// Feature map resolution of this layer.
    resolution: Resolution,
}

impl LayerInfo {
    /// Creates a new SSD layer description.
    ///
    /// # Parameters
    ///
    /// - `boxes_per_cell`: the number of boxes associated with each cell in this feature map.
    /// - `width`/`height`: size of this layer's feature map, in output cells.
    pub fn new(boxes_per_cell: u32, width: u32, height: u32) -> Self {
        assert_ne!(boxes_per_cell, 0);
        Self {
            boxes_per_cell,
            resolution: Resolution::new(width, height),
        }
    }
}

pub struct AnchorParams<'a> {
    /// List of output layers.
    pub layers: &'a [LayerInfo],
}

/// The ordered set of anchors of a detection network.
#[derive(Debug, Clone)]
pub struct Anchors {
    anchors: Vec<Anchor>,
}

impl Anchors {
    /// Generates anchors for a grid of feature map layers.
    ///
    /// All generated anchors have a size of 1x1, as used by networks that regress absolute box
    /// sizes (the palm detector does).
    pub fn calculate(params: &AnchorParams<'_>) -> Self {
        let mut anchors = Vec::new();

        for layer in params.layers {
            let height = layer.resolution.height();
            let width = layer.resolution.width();

            for y in 0..height {
                for x in 0..width {
                    for _ in 0..layer.boxes_per_cell {
                        let x_center = (x as f32 + 0.5) / width as f32;
                        let y_center = (y as f32 + 0.5) / height as f32;

                        anchors.push(Anchor::new(x_center, y_center, 1.0, 1.0));
                    }
                }
            }
        }

        Self { anchors }
    }

    /// Parses a JSON anchor list of the form `[{"cx": .., "cy": .., "w": .., "h": ..}, ..]`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let anchors: Vec<Anchor> =
            serde_json::from_str(json).context("failed to parse anchor list")?;
        if anchors.is_empty() {
            anyhow::bail!("anchor list is empty");
        }
        if let Some(i) = anchors
            .iter()
            .position(|a| ![a.x_center, a.y_center, a.width, a.height].iter().all(|v| v.is_finite()))
        {
            anyhow::bail!("anchor {i} has non-finite coordinates");
        }
        Ok(Self { anchors })
    }

    /// Loads a JSON anchor list from a file. See [`Anchors::from_json`].
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read anchor file '{}'", path.display()))?;
        Self::from_json(&json).with_context(|| format!("invalid anchor file '{}'", path.display()))
    }

    /// Returns the total number of SSD anchors/priors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Anchor> {
        self.anchors.iter()
    }
}

impl FromIterator<Anchor> for Anchors {
    fn from_iter<T: IntoIterator<Item = Anchor>>(iter: T) -> Self {
        Self {
            anchors: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for Anchors {
    type Output = Anchor;

    fn index(&self, index: usize) -> &Anchor {
        &self.anchors[index]
    }
}
