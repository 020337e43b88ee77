//! Device State Mirror
//!
//! Client-side copy of what the LED matrix is showing. Only authoritative
//! after a successful sync. Every `apply_*` method checks the reply token
//! first and leaves the state untouched when the device reported a failure.

use crate::domain::models::{Command, DeviceError, Response, Rgb, TextAction, TextOp};

/// Visual patterns built into the device firmware, in device index order
pub const VISUALS: &[&str] = &[
    "TwinkleFOX",
    "Attract",
    "Bounce",
    "FlowField",
    "Incremental Drift",
    "PendulumWave",
    "Radar",
    "Spiral",
    "Wave",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub brightness: u8,
    pub speed: u8,
    /// `None` until the device reports a repeat count
    pub text_repeats: Option<u8>,
    pub active_color: Rgb,
    pub active_text_index: Option<usize>,
    pub active_visual_index: Option<usize>,
    pub texts: Vec<String>,
    pub visuals: Vec<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            brightness: 0,
            speed: 100,
            text_repeats: None,
            active_color: Rgb::default(),
            active_text_index: None,
            active_visual_index: None,
            texts: Vec::new(),
            visuals: VISUALS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// What a successful reply changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDelta {
    Synced,
    Brightness(u8),
    Speed(u8),
    TextRepeats(u8),
    Color(Rgb),
    TextInserted { index: usize, text: String },
    TextDeleted { index: usize, text: String },
    TextActivated(usize),
    VisualActivated(usize),
    /// Success reported but there was nothing to change locally
    Unchanged,
}

impl DeviceState {
    pub fn with_texts(texts: Vec<String>) -> Self {
        Self {
            texts,
            ..Self::default()
        }
    }

    /// Route a reply to the matching `apply_*` method
    pub fn apply(
        &mut self,
        command: &Command,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        match command {
            Command::Sync => self.apply_sync(response),
            Command::SetBrightness(v) => self.apply_brightness(*v, response),
            Command::SetSpeed(v) => self.apply_speed(*v, response),
            Command::SetRepeats(v) => self.apply_repeats(*v, response),
            Command::SetColor(rgb) => self.apply_color(*rgb, response),
            Command::ActivateVisual(index) => self.apply_visual_activate(*index, response),
            Command::TextOp(op) => self.apply_text_op(op, response),
        }
    }

    /// Replace every device-supplied field. The local text list and the visual
    /// catalog are not part of the sync reply and are kept.
    pub fn apply_sync(&mut self, response: &Response) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::Sync)?;
        let Some(snapshot) = response.snapshot else {
            return Err(DeviceError {
                op: Command::Sync.op(),
                received: response.token.clone(),
                reason: Some("sync reply carried no device state".to_string()),
            });
        };

        self.brightness = snapshot.brightness;
        self.speed = snapshot.speed;
        self.text_repeats = snapshot.repeats;
        self.active_color = snapshot.color;
        self.active_text_index = snapshot.active_text_index;
        self.active_visual_index = snapshot.active_visual_index;
        // Device reports are trusted except for the mutual exclusion rule
        if self.active_text_index.is_some() && self.active_visual_index.is_some() {
            self.active_visual_index = None;
        }
        Ok(StateDelta::Synced)
    }

    pub fn apply_text_op(
        &mut self,
        op: &TextOp,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::TextOp(op.clone()))?;

        let delta = match op.action {
            TextAction::Insert => {
                let text = op.text.clone().unwrap_or_default();
                self.texts.push(text.clone());
                StateDelta::TextInserted {
                    index: self.texts.len() - 1,
                    text,
                }
            }
            TextAction::Delete => {
                if op.index >= self.texts.len() {
                    return Ok(StateDelta::Unchanged);
                }
                let text = self.texts.remove(op.index);
                self.active_text_index = match self.active_text_index {
                    Some(active) if active == op.index => None,
                    Some(active) if active > op.index => Some(active - 1),
                    other => other,
                };
                StateDelta::TextDeleted {
                    index: op.index,
                    text,
                }
            }
            TextAction::Activate => {
                self.active_text_index = Some(op.index);
                self.active_visual_index = None;
                StateDelta::TextActivated(op.index)
            }
            TextAction::SetRepeats => match op.repeats {
                Some(repeats) => {
                    self.text_repeats = Some(repeats);
                    StateDelta::TextRepeats(repeats)
                }
                None => StateDelta::Unchanged,
            },
        };
        Ok(delta)
    }

    pub fn apply_visual_activate(
        &mut self,
        index: usize,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::ActivateVisual(index))?;
        self.active_visual_index = Some(index);
        self.active_text_index = None;
        Ok(StateDelta::VisualActivated(index))
    }

    pub fn apply_brightness(
        &mut self,
        value: u8,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::SetBrightness(value))?;
        self.brightness = value;
        Ok(StateDelta::Brightness(value))
    }

    pub fn apply_speed(
        &mut self,
        value: u8,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::SetSpeed(value))?;
        self.speed = value;
        Ok(StateDelta::Speed(value))
    }

    pub fn apply_repeats(
        &mut self,
        value: u8,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::SetRepeats(value))?;
        self.text_repeats = Some(value);
        Ok(StateDelta::TextRepeats(value))
    }

    pub fn apply_color(
        &mut self,
        rgb: Rgb,
        response: &Response,
    ) -> Result<StateDelta, DeviceError> {
        response.confirm(&Command::SetColor(rgb))?;
        self.active_color = rgb;
        Ok(StateDelta::Color(rgb))
    }

    /// Name of the active visual, if any
    pub fn active_visual(&self) -> Option<&str> {
        self.active_visual_index
            .and_then(|i| self.visuals.get(i))
            .map(String::as_str)
    }

    /// Text currently scrolling, if any
    pub fn active_text(&self) -> Option<&str> {
        self.active_text_index
            .and_then(|i| self.texts.get(i))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::DeviceSnapshot;
    use pretty_assertions::assert_eq;

    fn state_with(texts: &[&str]) -> DeviceState {
        DeviceState::with_texts(texts.iter().map(|t| t.to_string()).collect())
    }

    #[test]
    fn test_visual_activation_clears_active_text() {
        for i in [0usize, 3, 8, 42] {
            let mut state = state_with(&["a", "b"]);
            state.active_text_index = Some(1);
            let delta = state
                .apply_visual_activate(i, &Response::new("activated"))
                .unwrap();
            assert_eq!(delta, StateDelta::VisualActivated(i));
            assert_eq!(state.active_visual_index, Some(i));
            assert_eq!(state.active_text_index, None);
        }
    }

    #[test]
    fn test_text_activation_clears_active_visual() {
        let mut state = state_with(&["a", "b", "c"]);
        state.active_visual_index = Some(5);
        state
            .apply_text_op(&TextOp::activate(2), &Response::new("activated"))
            .unwrap();
        assert_eq!(state.active_text_index, Some(2));
        assert_eq!(state.active_visual_index, None);
        assert_eq!(state.active_text(), Some("c"));
    }

    #[test]
    fn test_brightness_update() {
        let mut state = DeviceState::default();
        state.apply_brightness(50, &Response::new("updated")).unwrap();
        assert_eq!(state.brightness, 50);
    }

    #[test]
    fn test_failure_reply_does_not_mutate() {
        let mut state = state_with(&["a"]);
        state.active_visual_index = Some(1);
        let before = state.clone();

        let err = state
            .apply_text_op(&TextOp::insert(1, "hi"), &Response::new("deleted"))
            .unwrap_err();
        assert_eq!(err.received, "deleted");
        assert!(state.apply_color(Rgb::new(1, 1, 1), &Response::failure("error", "busy")).is_err());
        assert!(state.apply_visual_activate(0, &Response::new("updated")).is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn test_insert_and_delete() {
        let mut state = state_with(&["a", "b", "c"]);
        state.active_text_index = Some(2);

        state
            .apply_text_op(&TextOp::insert(3, "d"), &Response::new("inserted"))
            .unwrap();
        assert_eq!(state.texts, vec!["a", "b", "c", "d"]);

        let delta = state
            .apply_text_op(&TextOp::delete(0), &Response::new("deleted"))
            .unwrap();
        assert_eq!(
            delta,
            StateDelta::TextDeleted {
                index: 0,
                text: "a".to_string()
            }
        );
        assert_eq!(state.texts, vec!["b", "c", "d"]);
        assert_eq!(state.active_text_index, Some(1));

        state
            .apply_text_op(&TextOp::delete(1), &Response::new("deleted"))
            .unwrap();
        assert_eq!(state.active_text_index, None);
    }

    #[test]
    fn test_text_repeats() {
        let mut state = DeviceState::default();
        state
            .apply_text_op(&TextOp::set_repeats(0, 4), &Response::new("updated"))
            .unwrap();
        assert_eq!(state.text_repeats, Some(4));
        state.apply(&Command::SetRepeats(7), &Response::new("updated")).unwrap();
        assert_eq!(state.text_repeats, Some(7));
    }

    #[test]
    fn test_sync_replaces_device_fields() {
        let mut state = state_with(&["keep", "these", "texts"]);
        state.brightness = 5;
        state.active_visual_index = Some(3);

        let snapshot = DeviceSnapshot {
            brightness: 70,
            speed: 90,
            repeats: Some(3),
            color: Rgb::new(10, 20, 30),
            active_text_index: Some(2),
            active_visual_index: None,
        };
        state.apply_sync(&Response::synced(snapshot)).unwrap();

        let expected = DeviceState {
            brightness: 70,
            speed: 90,
            text_repeats: Some(3),
            active_color: Rgb::new(10, 20, 30),
            active_text_index: Some(2),
            active_visual_index: None,
            ..state_with(&["keep", "these", "texts"])
        };
        assert_eq!(state, expected);
    }

    #[test]
    fn test_sync_without_snapshot_is_rejected() {
        let mut state = DeviceState::default();
        assert!(state.apply_sync(&Response::new("ok")).is_err());
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn test_visual_catalog() {
        let mut state = DeviceState::default();
        assert_eq!(state.visuals.len(), 9);
        state.apply_visual_activate(6, &Response::new("activated")).unwrap();
        assert_eq!(state.active_visual(), Some("Radar"));
    }
}
