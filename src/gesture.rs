//! Gesture classification and stabilization.

pub mod classifier;
pub mod stabilizer;

use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use serde_json::Value;

/// Label reported for class indices that have no label, including the "no confident gesture"
/// index `-1`.
pub const UNKNOWN_LABEL: &str = "Unknown";

const MODEL_CODE_KEY: &str = "model_code";

/// Maps the class indices of a gesture classifier to gesture labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GestureLabels {
    labels: BTreeMap<i32, String>,
    model_code: Option<String>,
}

impl GestureLabels {
    /// Parses a label map of the form `{"0": "none", "1": "paper", ...}`.
    ///
    /// An optional `"model_code"` entry identifies the classifier the labels belong to.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let map: BTreeMap<String, Value> =
            serde_json::from_str(json).context("failed to parse gesture label map")?;

        let mut labels = BTreeMap::new();
        let mut model_code = None;
        for (key, value) in map {
            let Value::String(value) = value else {
                anyhow::bail!("gesture label for '{key}' is not a string: {value}");
            };
            if key == MODEL_CODE_KEY {
                model_code = Some(value);
                continue;
            }
            let index = key
                .parse::<i32>()
                .with_context(|| format!("invalid gesture class index '{key}'"))?;
            labels.insert(index, value);
        }

        Ok(Self { labels, model_code })
    }

    /// Loads a JSON label map from a file. See [`GestureLabels::from_json`].
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("failed to read gesture labels '{}'", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("invalid gesture labels '{}'", path.display()))
    }

    /// Returns the label of class `index`, or [`UNKNOWN_LABEL`].
    pub fn label(&self, index: i32) -> &str {
        self.labels
            .get(&index)
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LABEL)
    }

    pub fn model_code(&self) -> Option<&str> {
        self.model_code.as_deref()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns all `(index, label)` pairs, ordered by index.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &str)> + '_ {
        self.labels.iter().map(|(&i, l)| (i, l.as_str()))
    }
}

/// The labels of the stock gesture classifier.
impl Default for GestureLabels {
    fn default() -> Self {
        let labels = ["none", "paper", "rock", "scissors", "one"]
            .iter()
            .enumerate()
            .map(|(i, l)| (i as i32, l.to_string()))
            .collect();
        Self {
            labels,
            model_code: None,
        }
    }
}
