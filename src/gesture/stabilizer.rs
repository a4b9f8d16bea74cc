//! Temporal debouncing of per-frame detections.

/// Default number of consecutive valid frames before a gesture is considered stable.
pub const DEFAULT_THRESHOLD: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilizerState {
    /// No valid frame has been seen since the last loss of detection.
    Idle,
    /// Valid frames are being counted, but the threshold hasn't been reached yet.
    Accumulating,
    /// The threshold has been reached. Stays stable until detection is lost.
    Stable,
}

/// Counts consecutive frames with a valid hand detection.
///
/// The frame on which the count reaches the threshold is reported exactly once per contiguous run
/// of valid frames. Any frame without a valid detection starts a new run.
#[derive(Debug, Clone)]
pub struct GestureStabilizer {
    threshold: u32,
    consecutive: u32,
    last_stable_label: Option<String>,
}

impl GestureStabilizer {
    /// Creates a stabilizer that becomes stable after `threshold` valid frames.
    ///
    /// A threshold of 0 is treated as 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            last_stable_label: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns the number of consecutive valid frames seen so far.
    pub fn consecutive_frames(&self) -> u32 {
        self.consecutive
    }

    pub fn state(&self) -> StabilizerState {
        match self.consecutive {
            0 => StabilizerState::Idle,
            n if n < self.threshold => StabilizerState::Accumulating,
            _ => StabilizerState::Stable,
        }
    }

    pub fn is_stable(&self) -> bool {
        self.state() == StabilizerState::Stable
    }

    /// Records a frame with a valid detection.
    ///
    /// Returns `true` if this frame made the stream stable, in which case the caller should emit a
    /// gesture event.
    pub fn record_valid(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        let became_stable = self.consecutive == self.threshold;
        if became_stable {
            log::debug!("stable after {} frames", self.consecutive);
        }
        became_stable
    }

    /// Records a frame without a valid detection, returning to [`StabilizerState::Idle`].
    pub fn record_loss(&mut self) {
        if self.consecutive > 0 {
            log::trace!("detection lost after {} frames", self.consecutive);
        }
        self.consecutive = 0;
        self.last_stable_label = None;
    }

    /// Remembers the label of the gesture emitted for the current run.
    pub fn set_stable_label(&mut self, label: &str) {
        self.last_stable_label = Some(label.to_string());
    }

    /// Returns the label emitted for the current run, if any.
    pub fn last_stable_label(&self) -> Option<&str> {
        self.last_stable_label.as_deref()
    }
}

impl Default for GestureStabilizer {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}
