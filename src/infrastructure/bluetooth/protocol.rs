//! LED Matrix Protocol
//!
//! This module contains the protocol definitions for talking to the LED
//! matrix firmware over its single read/write characteristic.
//!
//! # Wire Format
//!
//! Every message is one flat JSON object encoded as UTF-8. Requests always
//! carry `op`; replies always carry `response`.
//!
//! ```text
//! {"op":"brightness","val":50}        ->  {"response":"updated"}
//! {"op":"text","action":"insert","index":0,"val":"hi"}
//!                                     ->  {"response":"inserted"}
//! {"op":"sync"}                       ->  {"response":"ok","brightness":70,"speed":90,
//!                                          "repeats":3,"r":10,"g":20,"b":30,
//!                                          "activeTextIndex":2,"activePatternIndex":-1}
//! ```
//!
//! Any other `response` token is a device-side failure and may carry a
//! `reason` string. There is no request id: a reply always belongs to the
//! last request sent.

use crate::domain::models::{
    Command, DeviceSnapshot, Response, Rgb, TextAction, BRIGHTNESS_RANGE, REPEATS_RANGE,
    SPEED_RANGE,
};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::trace;

/// LED matrix BLE Service UUID (HM-10 style serial service)
pub const SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/// Read/write/notify characteristic UUID
pub const CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/// Sentinel the firmware uses for "no index" / "unset"
const UNSET: i64 = -1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum WireRequest<'a> {
    Sync,
    Brightness {
        val: u8,
    },
    Speed {
        val: u8,
    },
    Repeats {
        val: u8,
    },
    Color {
        r: u8,
        g: u8,
        b: u8,
    },
    Visual {
        index: usize,
    },
    Text {
        action: &'static str,
        index: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        val: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        repeats: Option<u8>,
    },
}

impl<'a> From<&'a Command> for WireRequest<'a> {
    fn from(command: &'a Command) -> Self {
        match command {
            Command::Sync => Self::Sync,
            Command::SetBrightness(val) => Self::Brightness { val: *val },
            Command::SetSpeed(val) => Self::Speed { val: *val },
            Command::SetRepeats(val) => Self::Repeats { val: *val },
            Command::SetColor(Rgb { r, g, b }) => Self::Color {
                r: *r,
                g: *g,
                b: *b,
            },
            Command::ActivateVisual(index) => Self::Visual { index: *index },
            Command::TextOp(op) => Self::Text {
                action: op.action.as_wire(),
                index: op.index,
                val: match op.action {
                    TextAction::Insert => op.text.as_deref(),
                    _ => None,
                },
                repeats: match op.action {
                    TextAction::SetRepeats => op.repeats,
                    _ => None,
                },
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    brightness: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repeats: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    g: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    b: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_text_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_pattern_index: Option<i64>,
}

/// Serialize a command into its wire record
pub fn encode(command: &Command) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(&WireRequest::from(command))?;
    trace!("Encoded {}: {}", command.op(), String::from_utf8_lossy(&bytes));
    Ok(bytes)
}

/// Parse the reply to `command`
///
/// Only an `ok` reply to a sync carries device state, and then every field
/// must be present and in range. Any other token is returned as-is for the
/// caller to check against the expected one.
pub fn decode(payload: &[u8], command: &Command) -> Result<Response, CodecError> {
    let wire: WireResponse =
        serde_json::from_slice(payload).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let snapshot = match command {
        Command::Sync if wire.response == command.expected_token() => Some(snapshot(&wire)?),
        _ => None,
    };

    Ok(Response {
        token: wire.response,
        reason: wire.reason,
        snapshot,
    })
}

fn snapshot(wire: &WireResponse) -> Result<DeviceSnapshot, CodecError> {
    Ok(DeviceSnapshot {
        brightness: ranged("brightness", wire.brightness, &BRIGHTNESS_RANGE)?,
        speed: ranged("speed", wire.speed, &SPEED_RANGE)?,
        repeats: match required("repeats", wire.repeats)? {
            UNSET => None,
            v => Some(ranged("repeats", Some(v), &(0..=*REPEATS_RANGE.end()))?),
        },
        color: Rgb::new(
            ranged("r", wire.r, &(0..=u8::MAX))?,
            ranged("g", wire.g, &(0..=u8::MAX))?,
            ranged("b", wire.b, &(0..=u8::MAX))?,
        ),
        active_text_index: optional_index("activeTextIndex", wire.active_text_index)?,
        active_visual_index: optional_index("activePatternIndex", wire.active_pattern_index)?,
    })
}

/// Serialize a reply the way the firmware would send it
pub fn encode_response(response: &Response) -> Result<Vec<u8>, CodecError> {
    let mut wire = WireResponse {
        response: response.token.clone(),
        reason: response.reason.clone(),
        brightness: None,
        speed: None,
        repeats: None,
        r: None,
        g: None,
        b: None,
        active_text_index: None,
        active_pattern_index: None,
    };
    if let Some(s) = &response.snapshot {
        wire.brightness = Some(s.brightness.into());
        wire.speed = Some(s.speed.into());
        wire.repeats = Some(s.repeats.map_or(UNSET, i64::from));
        wire.r = Some(s.color.r.into());
        wire.g = Some(s.color.g.into());
        wire.b = Some(s.color.b.into());
        wire.active_text_index = Some(s.active_text_index.map_or(UNSET, |i| i as i64));
        wire.active_pattern_index = Some(s.active_visual_index.map_or(UNSET, |i| i as i64));
    }
    Ok(serde_json::to_vec(&wire)?)
}

fn required(field: &str, value: Option<i64>) -> Result<i64, CodecError> {
    value.ok_or_else(|| CodecError::Malformed(format!("missing `{}`", field)))
}

fn out_of_range(field: &str, value: i64) -> CodecError {
    CodecError::Malformed(format!("`{}` out of range: {}", field, value))
}

fn ranged(
    field: &str,
    value: Option<i64>,
    range: &RangeInclusive<u8>,
) -> Result<u8, CodecError> {
    let value = required(field, value)?;
    u8::try_from(value)
        .ok()
        .filter(|v| range.contains(v))
        .ok_or_else(|| out_of_range(field, value))
}

/// `-1` means unset, anything else must be a valid index
fn optional_index(field: &str, value: Option<i64>) -> Result<Option<usize>, CodecError> {
    match required(field, value)? {
        UNSET => Ok(None),
        v => usize::try_from(v)
            .map(Some)
            .map_err(|_| out_of_range(field, v)),
    }
}
