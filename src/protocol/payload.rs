use thiserror::Error;

use crate::settings::SettingsRecord;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Webview returned an empty response")]
    Empty,
    #[error("Response is not valid percent-encoding: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
    #[error("Response is not a settings payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Percent-encoded JSON form of a settings record, as appended to the
/// configuration page's return URL.
pub fn encode(record: &SettingsRecord) -> String {
    let json = serde_json::to_string(record).unwrap();
    urlencoding::encode(&json).into_owned()
}

/// Decode the raw webview response back into a settings record.
pub fn decode(raw: &str) -> Result<SettingsRecord, PayloadError> {
    if raw.is_empty() {
        return Err(PayloadError::Empty);
    }
    let json = urlencoding::decode(raw)?;
    Ok(serde_json::from_str(&json)?)
}
