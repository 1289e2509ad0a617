use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::settings::SettingsRecord;

/// Typed message delivered to the watch firmware. Color fields carry the
/// base-16 parse of the form's hex strings, flag fields are 0/1 integers,
/// `ticks` and `whwidth` pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMessage {
    pub colorbg: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorm: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorh: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorp: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colort: Option<u32>,
    pub shadows: i32,
    pub rectticks: i32,
    pub btvibe: i32,
    pub invert: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whwidth: Option<String>,
}

/// Why a decoded payload did not become a device message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("Payload carries no background color")]
    MissingBackground,
    #[error("Background color {0:?} is not a hex color")]
    BadBackground(String),
}

impl TryFrom<&SettingsRecord> for DeviceMessage {
    type Error = CoercionError;

    /// Apply the coercion table. The background color doubles as the
    /// submission guard: a record without it is a cancelled form, and one
    /// with an unparseable value is refused rather than forwarded.
    fn try_from(record: &SettingsRecord) -> Result<Self, Self::Error> {
        let colorbg = match &record.colorbg {
            None => return Err(CoercionError::MissingBackground),
            Some(raw) => {
                parse_color(raw).ok_or_else(|| CoercionError::BadBackground(raw.clone()))?
            }
        };
        Ok(DeviceMessage {
            colorbg,
            colorm: coerce_color("colorm", &record.colorm),
            colorh: coerce_color("colorh", &record.colorh),
            colorp: coerce_color("colorp", &record.colorp),
            colort: coerce_color("colort", &record.colort),
            shadows: coerce_flag(&record.shadows),
            rectticks: coerce_flag(&record.rectticks),
            btvibe: coerce_flag(&record.btvibe),
            invert: coerce_flag(&record.invert),
            ticks: record.ticks.clone(),
            whwidth: record.whwidth.clone(),
        })
    }
}

fn parse_color(raw: &str) -> Option<u32> {
    let digits = raw.trim_start_matches('#');
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    u32::from_str_radix(digits, 16).ok()
}

fn coerce_color(key: &str, value: &Option<String>) -> Option<u32> {
    let raw = value.as_deref()?;
    let parsed = parse_color(raw);
    if parsed.is_none() {
        warn!("Dropping {key}: {raw:?} is not a hex color");
    }
    parsed
}

// 1 iff the stored string is exactly "true"; anything else, including an
// absent field, is 0.
fn coerce_flag(value: &Option<String>) -> i32 {
    match value.as_deref() {
        Some("true") => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> SettingsRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn coercion_matches_the_table() {
        let message = DeviceMessage::try_from(&record(
            r#"{"colorbg":"ff0000","colorm":"00ff00","shadows":"true","invert":"false","ticks":"thick","whwidth":"4"}"#,
        ))
        .unwrap();
        assert_eq!(message.colorbg, 16711680);
        assert_eq!(message.colorm, Some(65280));
        assert_eq!(message.shadows, 1);
        assert_eq!(message.invert, 0);
        assert_eq!(message.ticks.as_deref(), Some("thick"));
        assert_eq!(message.whwidth.as_deref(), Some("4"));
    }

    #[test]
    fn coercion_is_idempotent() {
        let fixed = record(r#"{"colorbg":"ff0000","shadows":"true","ticks":"thick"}"#);
        let first = DeviceMessage::try_from(&fixed).unwrap();
        let second = DeviceMessage::try_from(&fixed).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_background_is_refused() {
        assert_eq!(
            DeviceMessage::try_from(&record(r#"{"colorm":"00ff00","shadows":"true"}"#)),
            Err(CoercionError::MissingBackground)
        );
    }

    #[test]
    fn unparseable_background_is_refused() {
        assert_eq!(
            DeviceMessage::try_from(&record(r#"{"colorbg":"chartreuse"}"#)),
            Err(CoercionError::BadBackground("chartreuse".to_string()))
        );
    }

    #[test]
    fn missing_flags_coerce_to_zero() {
        let message = DeviceMessage::try_from(&record(r#"{"colorbg":"000000"}"#)).unwrap();
        assert_eq!(message.shadows, 0);
        assert_eq!(message.rectticks, 0);
        assert_eq!(message.btvibe, 0);
        assert_eq!(message.invert, 0);
        assert_eq!(message.ticks, None);
        assert_eq!(message.whwidth, None);
    }

    #[test]
    fn flags_require_the_exact_literal() {
        let message = DeviceMessage::try_from(&record(
            r#"{"colorbg":"000000","shadows":"TRUE","btvibe":"yes","invert":"1"}"#,
        ))
        .unwrap();
        assert_eq!(message.shadows, 0);
        assert_eq!(message.btvibe, 0);
        assert_eq!(message.invert, 0);
    }

    #[test]
    fn color_prefixes_are_accepted() {
        let message = DeviceMessage::try_from(&record(
            r##"{"colorbg":"#ff0000","colorm":"0x00ff00"}"##,
        ))
        .unwrap();
        assert_eq!(message.colorbg, 16711680);
        assert_eq!(message.colorm, Some(65280));
    }

    #[test]
    fn unparseable_secondary_colors_are_dropped() {
        let message =
            DeviceMessage::try_from(&record(r#"{"colorbg":"000000","colort":"teal"}"#)).unwrap();
        assert_eq!(message.colort, None);
    }

    #[test]
    fn serialized_message_uses_plain_integers() {
        let message = DeviceMessage::try_from(&record(
            r#"{"colorbg":"ff0000","shadows":"true","ticks":"thick"}"#,
        ))
        .unwrap();
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"colorbg":16711680,"shadows":1,"rectticks":0,"btvibe":0,"invert":0,"ticks":"thick"}"#
        );
    }
}
