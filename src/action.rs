//! Device actions triggered by stable gestures.
//!
//! [`GestureBindings`] maps gesture labels to [`ActionKind`]s, and [`ActionDispatcher`] executes
//! them through a [`DeviceControl`] implementation, rate-limited by a per-action cooldown.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Cooldown of actions that have no configured cooldown.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);

/// An action that can be bound to a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Does nothing, regardless of cooldown.
    #[default]
    None,
    ToggleFlash,
    VolumeUp,
    VolumeDown,
    SwipeRight,
    SwipeLeft,
    SwipeUp,
    SwipeDown,
    PlayPauseMusic,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        Self::None,
        Self::ToggleFlash,
        Self::VolumeUp,
        Self::VolumeDown,
        Self::SwipeRight,
        Self::SwipeLeft,
        Self::SwipeUp,
        Self::SwipeDown,
        Self::PlayPauseMusic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ToggleFlash => "toggle_flash",
            Self::VolumeUp => "volume_up",
            Self::VolumeDown => "volume_down",
            Self::SwipeRight => "swipe_right",
            Self::SwipeLeft => "swipe_left",
            Self::SwipeUp => "swipe_up",
            Self::SwipeDown => "swipe_down",
            Self::PlayPauseMusic => "play_pause_music",
        }
    }

    /// Returns the swipe stroke performed by this action, if it is a swipe.
    pub fn stroke(&self) -> Option<Stroke> {
        let (start, end) = match self {
            Self::SwipeRight => ((0.2, 0.5), (0.8, 0.5)),
            Self::SwipeLeft => ((0.8, 0.5), (0.2, 0.5)),
            Self::SwipeUp => ((0.5, 0.8), (0.5, 0.2)),
            Self::SwipeDown => ((0.5, 0.2), (0.5, 0.8)),
            _ => return None,
        };
        Some(Stroke {
            start,
            end,
            duration: Stroke::DEFAULT_DURATION,
        })
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match Self::ALL.iter().find(|a| a.name() == s) {
            Some(action) => Ok(*action),
            None => anyhow::bail!("unknown action '{s}'"),
        }
    }
}

/// A synthetic swipe across the screen.
///
/// Positions are given as fractions of the screen size, with `(0, 0)` in the top left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stroke {
    pub start: (f32, f32),
    pub end: (f32, f32),
    pub duration: Duration,
}

impl Stroke {
    pub const DEFAULT_DURATION: Duration = Duration::from_millis(500);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Up,
    Down,
}

/// The device operations actions are carried out with.
pub trait DeviceControl {
    /// Raises or lowers the media volume by one step.
    fn adjust_volume(&mut self, step: VolumeStep) -> anyhow::Result<()>;

    /// Toggles the camera flash (torch).
    fn toggle_flash(&mut self) -> anyhow::Result<()>;

    /// Performs a swipe gesture on the screen.
    fn swipe(&mut self, stroke: Stroke) -> anyhow::Result<()>;

    /// Toggles media playback.
    fn play_pause_media(&mut self) -> anyhow::Result<()>;
}

/// A [`DeviceControl`] that only logs the requested operations.
#[derive(Debug, Default)]
pub struct LogDevice;

impl DeviceControl for LogDevice {
    fn adjust_volume(&mut self, step: VolumeStep) -> anyhow::Result<()> {
        log::info!("volume {step:?}");
        Ok(())
    }

    fn toggle_flash(&mut self) -> anyhow::Result<()> {
        log::info!("toggle flash");
        Ok(())
    }

    fn swipe(&mut self, stroke: Stroke) -> anyhow::Result<()> {
        log::info!("swipe {:?} -> {:?}", stroke.start, stroke.end);
        Ok(())
    }

    fn play_pause_media(&mut self) -> anyhow::Result<()> {
        log::info!("play/pause");
        Ok(())
    }
}

/// Last execution time of each action.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    last_fired: HashMap<ActionKind, Instant>,
}

impl CooldownLedger {
    pub fn last_fired(&self, action: ActionKind) -> Option<Instant> {
        self.last_fired.get(&action).copied()
    }

    /// Records `now` as the firing time of `action` if at least `cooldown` has passed since it
    /// last fired. Returns the remaining cooldown otherwise.
    fn try_fire(
        &mut self,
        action: ActionKind,
        cooldown: Duration,
        now: Instant,
    ) -> Result<(), Duration> {
        if let Some(last) = self.last_fired.get(&action) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < cooldown {
                return Err(cooldown - elapsed);
            }
        }
        self.last_fired.insert(action, now);
        Ok(())
    }
}

/// What [`ActionDispatcher::execute`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Executed,
    /// The action is cooling down for the contained remaining time.
    CoolingDown(Duration),
    /// [`ActionKind::None`] was requested.
    NoAction,
    /// The device operation failed (this is logged).
    Failed,
}

/// Executes actions, at most once per cooldown period each.
#[derive(Debug)]
pub struct ActionDispatcher {
    ledger: CooldownLedger,
    cooldowns: HashMap<ActionKind, Duration>,
    default_cooldown: Duration,
}

impl ActionDispatcher {
    /// Creates a dispatcher with the default cooldowns: 500 ms for volume steps, 1000 ms for
    /// everything else.
    pub fn new() -> Self {
        let cooldowns = [
            (ActionKind::VolumeUp, Duration::from_millis(500)),
            (ActionKind::VolumeDown, Duration::from_millis(500)),
        ]
        .into_iter()
        .collect();
        Self {
            ledger: CooldownLedger::default(),
            cooldowns,
            default_cooldown: DEFAULT_COOLDOWN,
        }
    }

    /// Sets the cooldown of actions without a specific cooldown.
    pub fn with_default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    pub fn set_cooldown(&mut self, action: ActionKind, cooldown: Duration) {
        self.cooldowns.insert(action, cooldown);
    }

    pub fn cooldown(&self, action: ActionKind) -> Duration {
        self.cooldowns
            .get(&action)
            .copied()
            .unwrap_or(self.default_cooldown)
    }

    pub fn ledger(&self) -> &CooldownLedger {
        &self.ledger
    }

    /// Executes `action` unless it is cooling down.
    pub fn execute(&mut self, action: ActionKind, device: &mut dyn DeviceControl) -> Outcome {
        self.execute_at(action, Instant::now(), device)
    }

    /// Executes `action` as if called at time `now`.
    pub fn execute_at(
        &mut self,
        action: ActionKind,
        now: Instant,
        device: &mut dyn DeviceControl,
    ) -> Outcome {
        if action == ActionKind::None {
            log::trace!("no action bound");
            return Outcome::NoAction;
        }

        if let Err(remaining) = self.ledger.try_fire(action, self.cooldown(action), now) {
            log::debug!("{action} cooling down ({}ms left)", remaining.as_millis());
            return Outcome::CoolingDown(remaining);
        }

        let result = match action {
            ActionKind::None => Ok(()),
            ActionKind::VolumeUp => device.adjust_volume(VolumeStep::Up),
            ActionKind::VolumeDown => device.adjust_volume(VolumeStep::Down),
            ActionKind::ToggleFlash => device.toggle_flash(),
            ActionKind::PlayPauseMusic => device.play_pause_media(),
            ActionKind::SwipeRight
            | ActionKind::SwipeLeft
            | ActionKind::SwipeUp
            | ActionKind::SwipeDown => match action.stroke() {
                Some(stroke) => device.swipe(stroke),
                None => Ok(()),
            },
        };
        match result {
            Ok(()) => {
                log::debug!("executed {action}");
                Outcome::Executed
            }
            Err(e) => {
                log::warn!("failed to execute {action}: {e:#}");
                Outcome::Failed
            }
        }
    }
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps gesture labels to the actions they trigger.
///
/// Labels without a binding trigger [`ActionKind::None`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GestureBindings(HashMap<String, ActionKind>);

impl GestureBindings {
    /// Creates bindings without any bound gesture.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn bind<L: Into<String>>(&mut self, label: L, action: ActionKind) {
        self.0.insert(label.into(), action);
    }

    pub fn action_for(&self, label: &str) -> ActionKind {
        self.0.get(label).copied().unwrap_or_default()
    }

    /// Adds the bindings of `other`, replacing existing bindings of the same labels.
    pub fn extend(&mut self, other: &GestureBindings) {
        self.0
            .extend(other.0.iter().map(|(label, action)| (label.clone(), *action)));
    }
}

/// The stock bindings of the built-in gestures.
impl Default for GestureBindings {
    fn default() -> Self {
        let mut bindings = Self::empty();
        bindings.bind("scissors", ActionKind::SwipeRight);
        bindings.bind("rock", ActionKind::ToggleFlash);
        bindings.bind("paper", ActionKind::VolumeUp);
        bindings.bind("one", ActionKind::SwipeDown);
        bindings.bind("none", ActionKind::None);
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingDevice {
        calls: Vec<String>,
        broken: bool,
    }

    impl DeviceControl for RecordingDevice {
        fn adjust_volume(&mut self, step: VolumeStep) -> anyhow::Result<()> {
            self.calls.push(format!("volume {step:?}"));
            Ok(())
        }

        fn toggle_flash(&mut self) -> anyhow::Result<()> {
            if self.broken {
                anyhow::bail!("no flash");
            }
            self.calls.push("flash".into());
            Ok(())
        }

        fn swipe(&mut self, stroke: Stroke) -> anyhow::Result<()> {
            self.calls.push(format!("swipe {:?}->{:?}", stroke.start, stroke.end));
            Ok(())
        }

        fn play_pause_media(&mut self) -> anyhow::Result<()> {
            self.calls.push("media".into());
            Ok(())
        }
    }

    #[test]
    fn cooldown_suppresses_repeats() {
        let mut dispatcher = ActionDispatcher::new();
        let mut device = RecordingDevice::default();
        let t0 = Instant::now();

        assert_eq!(
            dispatcher.execute_at(ActionKind::ToggleFlash, t0, &mut device),
            Outcome::Executed
        );
        assert_eq!(
            dispatcher.execute_at(ActionKind::ToggleFlash, t0 + Duration::from_millis(999), &mut device),
            Outcome::CoolingDown(Duration::from_millis(1))
        );
        assert_eq!(device.calls, ["flash"]);

        assert_eq!(
            dispatcher.execute_at(ActionKind::ToggleFlash, t0 + Duration::from_millis(1000), &mut device),
            Outcome::Executed
        );
        assert_eq!(device.calls, ["flash", "flash"]);
    }

    #[test]
    fn cooldowns_are_per_action() {
        let mut dispatcher = ActionDispatcher::new();
        let mut device = RecordingDevice::default();
        let t0 = Instant::now();

        dispatcher.execute_at(ActionKind::VolumeUp, t0, &mut device);
        dispatcher.execute_at(ActionKind::SwipeRight, t0, &mut device);
        dispatcher.execute_at(ActionKind::VolumeUp, t0 + Duration::from_millis(500), &mut device);
        dispatcher.execute_at(ActionKind::SwipeRight, t0 + Duration::from_millis(500), &mut device);
        assert_eq!(
            device.calls,
            ["volume Up", "swipe (0.2, 0.5)->(0.8, 0.5)", "volume Up"]
        );
    }

    #[test]
    fn configured_cooldown() {
        let mut dispatcher = ActionDispatcher::new().with_default_cooldown(Duration::from_secs(3));
        dispatcher.set_cooldown(ActionKind::PlayPauseMusic, Duration::from_millis(100));
        assert_eq!(dispatcher.cooldown(ActionKind::SwipeUp), Duration::from_secs(3));
        assert_eq!(dispatcher.cooldown(ActionKind::VolumeDown), Duration::from_millis(500));

        let mut device = RecordingDevice::default();
        let t0 = Instant::now();
        dispatcher.execute_at(ActionKind::PlayPauseMusic, t0, &mut device);
        dispatcher.execute_at(ActionKind::PlayPauseMusic, t0 + Duration::from_millis(100), &mut device);
        assert_eq!(device.calls, ["media", "media"]);
    }

    #[test]
    fn no_action_never_fires() {
        let mut dispatcher = ActionDispatcher::new();
        let mut device = RecordingDevice::default();
        let t0 = Instant::now();
        for i in 0..3 {
            let now = t0 + Duration::from_secs(i * 2);
            assert_eq!(
                dispatcher.execute_at(ActionKind::None, now, &mut device),
                Outcome::NoAction
            );
        }
        assert!(device.calls.is_empty());
        assert!(dispatcher.ledger().last_fired(ActionKind::None).is_none());
    }

    #[test]
    fn failure_still_starts_cooldown() {
        let mut dispatcher = ActionDispatcher::new();
        let mut device = RecordingDevice {
            broken: true,
            ..Default::default()
        };
        let t0 = Instant::now();
        assert_eq!(
            dispatcher.execute_at(ActionKind::ToggleFlash, t0, &mut device),
            Outcome::Failed
        );
        assert!(matches!(
            dispatcher.execute_at(ActionKind::ToggleFlash, t0, &mut device),
            Outcome::CoolingDown(_)
        ));
    }

    #[test]
    fn default_bindings() {
        let bindings = GestureBindings::default();
        assert_eq!(bindings.action_for("scissors"), ActionKind::SwipeRight);
        assert_eq!(bindings.action_for("rock"), ActionKind::ToggleFlash);
        assert_eq!(bindings.action_for("paper"), ActionKind::VolumeUp);
        assert_eq!(bindings.action_for("one"), ActionKind::SwipeDown);
        assert_eq!(bindings.action_for("none"), ActionKind::None);
        assert_eq!(bindings.action_for("Unknown"), ActionKind::None);
    }

    #[test]
    fn bindings_from_json() {
        let mut bindings = GestureBindings::default();
        let custom: GestureBindings =
            serde_json::from_str(r#"{"rock": "play_pause_music", "ok": "volume_down"}"#).unwrap();
        bindings.extend(&custom);
        assert_eq!(bindings.action_for("rock"), ActionKind::PlayPauseMusic);
        assert_eq!(bindings.action_for("ok"), ActionKind::VolumeDown);
        assert_eq!(bindings.action_for("paper"), ActionKind::VolumeUp);

        assert!(serde_json::from_str::<GestureBindings>(r#"{"rock": "explode"}"#).is_err());
    }

    #[test]
    fn action_names() {
        for action in ActionKind::ALL {
            assert_eq!(action.name().parse::<ActionKind>().unwrap(), action);
            assert_eq!(
                serde_json::to_string(&action).unwrap(),
                format!("\"{}\"", action.name())
            );
        }
        assert!("go_home".parse::<ActionKind>().is_err());
    }
}
