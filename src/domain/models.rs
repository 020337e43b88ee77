use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Allowed brightness range (percent)
pub const BRIGHTNESS_RANGE: std::ops::RangeInclusive<u8> = 0..=100;
/// Allowed animation speed range
pub const SPEED_RANGE: std::ops::RangeInclusive<u8> = 1..=200;
/// Allowed text repeat count range
pub const REPEATS_RANGE: std::ops::RangeInclusive<u8> = 1..=10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::new(0, 0, 255)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Mutation applied to the device's text list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAction {
    Insert,
    Delete,
    Activate,
    SetRepeats,
}

impl TextAction {
    /// Value of the `action` field on the wire
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Delete => "delete",
            Self::Activate => "activate",
            Self::SetRepeats => "repeats",
        }
    }
}

impl fmt::Display for TextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOp {
    pub action: TextAction,
    pub index: usize,
    /// Text to insert (`Insert` only)
    pub text: Option<String>,
    /// Repeat count (`SetRepeats` only)
    pub repeats: Option<u8>,
}

impl TextOp {
    pub fn insert(index: usize, text: impl Into<String>) -> Self {
        Self {
            action: TextAction::Insert,
            index,
            text: Some(text.into()),
            repeats: None,
        }
    }

    pub fn delete(index: usize) -> Self {
        Self {
            action: TextAction::Delete,
            index,
            text: None,
            repeats: None,
        }
    }

    pub fn activate(index: usize) -> Self {
        Self {
            action: TextAction::Activate,
            index,
            text: None,
            repeats: None,
        }
    }

    pub fn set_repeats(index: usize, repeats: u8) -> Self {
        Self {
            action: TextAction::SetRepeats,
            index,
            text: None,
            repeats: Some(repeats),
        }
    }
}

/// Outbound request to the LED matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Sync,
    SetBrightness(u8),
    SetSpeed(u8),
    SetRepeats(u8),
    SetColor(Rgb),
    ActivateVisual(usize),
    TextOp(TextOp),
}

impl Command {
    /// Value of the `op` field on the wire
    pub fn op(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::SetBrightness(_) => "brightness",
            Self::SetSpeed(_) => "speed",
            Self::SetRepeats(_) => "repeats",
            Self::SetColor(_) => "color",
            Self::ActivateVisual(_) => "visual",
            Self::TextOp(_) => "text",
        }
    }

    /// The `response` token the device sends when the command succeeded
    pub fn expected_token(&self) -> &'static str {
        match self {
            Self::Sync => "ok",
            Self::SetBrightness(_)
            | Self::SetSpeed(_)
            | Self::SetRepeats(_)
            | Self::SetColor(_) => "updated",
            Self::ActivateVisual(_) => "activated",
            Self::TextOp(op) => match op.action {
                TextAction::Insert => "inserted",
                TextAction::Delete => "deleted",
                TextAction::Activate => "activated",
                TextAction::SetRepeats => "updated",
            },
        }
    }

    /// Check value ranges and per-action payloads before anything goes on the wire
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Self::Sync | Self::SetColor(_) | Self::ActivateVisual(_) => Ok(()),
            Self::SetBrightness(v) => check_range("brightness", *v, &BRIGHTNESS_RANGE),
            Self::SetSpeed(v) => check_range("speed", *v, &SPEED_RANGE),
            Self::SetRepeats(v) => check_range("repeats", *v, &REPEATS_RANGE),
            Self::TextOp(op) => match op.action {
                TextAction::Insert if op.text.is_none() => {
                    Err(CommandError::MissingField("val", op.action))
                }
                TextAction::SetRepeats => match op.repeats {
                    Some(v) => check_range("repeats", v, &REPEATS_RANGE),
                    None => Err(CommandError::MissingField("repeats", op.action)),
                },
                _ => Ok(()),
            },
        }
    }
}

fn check_range(
    field: &'static str,
    value: u8,
    range: &std::ops::RangeInclusive<u8>,
) -> Result<(), CommandError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(CommandError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("{field} value {value} out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },

    #[error("text {1} requires the `{0}` field")]
    MissingField(&'static str, TextAction),
}

/// Device-reported values carried by a successful sync reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub brightness: u8,
    pub speed: u8,
    pub repeats: Option<u8>,
    pub color: Rgb,
    pub active_text_index: Option<usize>,
    pub active_visual_index: Option<usize>,
}

/// Decoded reply to the outstanding command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Value of the `response` field
    pub token: String,
    pub reason: Option<String>,
    /// Present only on `ok` (sync) replies
    pub snapshot: Option<DeviceSnapshot>,
}

impl Response {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            reason: None,
            snapshot: None,
        }
    }

    pub fn failure(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            reason: Some(reason.into()),
            snapshot: None,
        }
    }

    pub fn synced(snapshot: DeviceSnapshot) -> Self {
        Self {
            token: "ok".to_string(),
            reason: None,
            snapshot: Some(snapshot),
        }
    }

    /// Check the reply against the token `command` expects on success
    pub fn confirm(&self, command: &Command) -> Result<(), DeviceError> {
        if self.token == command.expected_token() {
            Ok(())
        } else {
            Err(DeviceError {
                op: command.op(),
                received: self.token.clone(),
                reason: self.reason.clone(),
            })
        }
    }
}

/// Non-success reply from the device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unexpected {op} response `{received}`: {}", .reason.as_deref().unwrap_or("unknown"))]
pub struct DeviceError {
    pub op: &'static str,
    pub received: String,
    pub reason: Option<String>,
}

impl DeviceError {
    /// Reason string for user-facing display
    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    /// Characteristic discovered, read/write enabled
    Ready,
}

#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub name: String,
    pub address: String,
    pub signal_strength: Option<i16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_tokens() {
        assert_eq!(Command::Sync.expected_token(), "ok");
        assert_eq!(Command::SetColor(Rgb::new(1, 2, 3)).expected_token(), "updated");
        assert_eq!(Command::ActivateVisual(4).expected_token(), "activated");
        assert_eq!(
            Command::TextOp(TextOp::insert(0, "hi")).expected_token(),
            "inserted"
        );
        assert_eq!(Command::TextOp(TextOp::delete(0)).expected_token(), "deleted");
        assert_eq!(
            Command::TextOp(TextOp::set_repeats(0, 2)).expected_token(),
            "updated"
        );
    }

    #[test]
    fn test_validate_ranges() {
        assert!(Command::SetBrightness(100).validate().is_ok());
        assert!(Command::SetBrightness(101).validate().is_err());
        assert!(Command::SetSpeed(0).validate().is_err());
        assert!(Command::SetSpeed(200).validate().is_ok());
        assert!(Command::SetRepeats(11).validate().is_err());
        assert_eq!(
            Command::SetRepeats(0).validate(),
            Err(CommandError::OutOfRange {
                field: "repeats",
                value: 0,
                min: 1,
                max: 10
            })
        );
    }

    #[test]
    fn test_validate_text_payloads() {
        let bare_insert = TextOp {
            text: None,
            ..TextOp::insert(0, "")
        };
        assert_eq!(
            Command::TextOp(bare_insert).validate(),
            Err(CommandError::MissingField("val", TextAction::Insert))
        );
        assert!(Command::TextOp(TextOp::set_repeats(0, 0)).validate().is_err());
        assert!(Command::TextOp(TextOp::activate(3)).validate().is_ok());
    }

    #[test]
    fn test_confirm_mismatch_keeps_reason() {
        let command = Command::TextOp(TextOp::insert(0, "hi"));
        let err = Response::failure("deleted", "storage full")
            .confirm(&command)
            .unwrap_err();
        assert_eq!(err.op, "text");
        assert_eq!(err.received, "deleted");
        assert_eq!(err.reason(), "storage full");
        assert!(Response::new("inserted").confirm(&command).is_ok());
    }
}
