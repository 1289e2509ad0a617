use tracing::{debug, info};

use crate::protocol::payload;
use crate::settings::SettingsRecord;
use crate::storage::{SettingsStore, StoreError};

/// Sentinel return target meaning "just close the configuration webview".
pub const CLOSE_URL: &str = "pebblejs://close#";

/// Current values of the configuration form fields. The defaults mirror the
/// markup: dark face, white hands, red peg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigForm {
    pub colorbg: String,
    pub colorm: String,
    pub colorh: String,
    pub colorp: String,
    pub colort: String,
    pub shadows: bool,
    pub ticks: String,
    pub rectticks: bool,
    pub btvibe: bool,
    pub invert: bool,
    pub whwidth: String,
}

impl Default for ConfigForm {
    fn default() -> Self {
        ConfigForm {
            colorbg: "000000".to_string(),
            colorm: "ffffff".to_string(),
            colorh: "ffffff".to_string(),
            colorp: "ff0000".to_string(),
            colort: "555555".to_string(),
            shadows: true,
            ticks: "none".to_string(),
            rectticks: false,
            btvibe: false,
            invert: false,
            whwidth: "3".to_string(),
        }
    }
}

impl ConfigForm {
    /// Snapshot of the current field values as a settings record.
    pub fn to_record(&self) -> SettingsRecord {
        SettingsRecord {
            colorbg: Some(self.colorbg.clone()),
            colorm: Some(self.colorm.clone()),
            colorh: Some(self.colorh.clone()),
            colorp: Some(self.colorp.clone()),
            colort: Some(self.colort.clone()),
            shadows: Some(self.shadows.to_string()),
            ticks: Some(self.ticks.clone()),
            rectticks: Some(self.rectticks.to_string()),
            btvibe: Some(self.btvibe.to_string()),
            invert: Some(self.invert.to_string()),
            whwidth: Some(self.whwidth.clone()),
        }
    }

    /// Overlay stored values on the current fields. Fields the record does
    /// not carry keep their markup defaults.
    fn apply(&mut self, record: &SettingsRecord) {
        if let Some(v) = &record.colorbg {
            self.colorbg = v.clone();
        }
        if let Some(v) = &record.colorm {
            self.colorm = v.clone();
        }
        if let Some(v) = &record.colorh {
            self.colorh = v.clone();
        }
        if let Some(v) = &record.colorp {
            self.colorp = v.clone();
        }
        if let Some(v) = &record.colort {
            self.colort = v.clone();
        }
        if let Some(v) = &record.shadows {
            self.shadows = v == "true";
        }
        if let Some(v) = &record.ticks {
            self.ticks = v.clone();
        }
        if let Some(v) = &record.rectticks {
            self.rectticks = v == "true";
        }
        if let Some(v) = &record.btvibe {
            self.btvibe = v == "true";
        }
        if let Some(v) = &record.invert {
            self.invert = v == "true";
        }
        if let Some(v) = &record.whwidth {
            self.whwidth = v.clone();
        }
    }
}

/// The configuration page's controller: loads prior settings into the form,
/// persists submissions, and turns a submit event into the navigation URL
/// that hands the payload back to the host.
pub struct FormController<S: SettingsStore> {
    store: S,
    form: ConfigForm,
}

impl<S: SettingsStore> FormController<S> {
    pub fn new(store: S) -> Self {
        FormController {
            store,
            form: ConfigForm::default(),
        }
    }

    pub fn form(&self) -> &ConfigForm {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut ConfigForm {
        &mut self.form
    }

    /// Populate the form from the stored record, if any. A store that was
    /// never written to is a normal state: the defaults stay in place.
    pub fn load_options(&mut self) -> Result<(), StoreError> {
        if let Some(record) = self.store.load()? {
            debug!("Loaded stored options: {:?}", record);
            self.form.apply(&record);
        }
        Ok(())
    }

    /// Read the current field values into a settings record, persist it, and
    /// return it.
    pub fn get_and_store_config_data(&mut self) -> Result<SettingsRecord, StoreError> {
        let record = self.form.to_record();
        self.store.save(&record)?;
        info!("Got options: {}", serde_json::to_string(&record).unwrap());
        Ok(record)
    }

    /// Handle a submit event: persist the fields and build the navigation
    /// target from the page's query string. A missing or malformed
    /// `return_to` parameter falls back to the close sentinel.
    pub fn handle_submit(&mut self, query: &str) -> Result<String, StoreError> {
        let record = self.get_and_store_config_data()?;
        let return_to =
            query_param(query, "return_to").unwrap_or_else(|| CLOSE_URL.to_string());
        Ok(format!("{}{}", return_to, payload::encode(&record)))
    }
}

/// Look up a query parameter by name. First match wins, malformed pairs are
/// skipped, and the value comes back percent-decoded.
pub fn query_param(query: &str, name: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        match (parts.next(), parts.next()) {
            (Some(key), Some(value)) if key == name => {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
            _ => {}
        }
    }
    None
}
