use serde::{Deserialize, Serialize};

/// Flat record of watch-face preferences, exactly as the configuration form
/// emits them: colors as hex strings, flags as the literal strings
/// `"true"`/`"false"`, numerics as decimal strings.
///
/// The schema only ever grows by adding keys. Every field is optional so a
/// payload from an older form version deserializes cleanly, and absent fields
/// are omitted from the wire form rather than written as `null`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorbg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorh: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colorp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadows: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rectticks: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub btvibe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invert: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whwidth: Option<String>,
}
