use std::sync::Arc;

use derive_builder::Builder;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::protocol::dispatch::{DispatchError, Dispatcher, FirmwareLink, RetryPolicy};
use crate::protocol::messages::DeviceMessage;
use crate::protocol::payload::{self, PayloadError};

/// Configuration page opened for the watch face.
pub const DEFAULT_CONFIG_URL: &str = "http://pebble.lastfuture.de/config/supersimple/";

/// Response string some hosts deliver when the webview is dismissed without
/// submitting.
const CANCELLED_RESPONSE: &str = "CANCELLED";

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration payload could not be decoded: {0}")]
    Payload(#[from] PayloadError),
    #[error("Message dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Watch platform identifiers as the host reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Rectangular, black and white.
    Aplite,
    /// Rectangular, color.
    Basalt,
    /// Round, color.
    Chalk,
}

impl Platform {
    pub fn is_round(&self) -> bool {
        matches!(self, Platform::Chalk)
    }

    pub fn is_monochrome(&self) -> bool {
        matches!(self, Platform::Aplite)
    }
}

impl From<&str> for Platform {
    fn from(value: &str) -> Self {
        match value {
            "aplite" => Self::Aplite,
            "basalt" => Self::Basalt,
            "chalk" => Self::Chalk,
            other => {
                debug!("Unknown watch platform {other:?}, assuming a round color display");
                Self::Chalk
            }
        }
    }
}

/// Host-side services the relay depends on: the active watch descriptor and
/// the webview surface.
pub trait HostBridge: Send + Sync {
    /// Platform of the currently connected watch, if the host knows it.
    fn active_platform(&self) -> Option<Platform>;

    /// Open the configuration webview. Fire-and-forget: closure comes back
    /// later as a `WebviewClosed` event, if it comes at all.
    fn open_url(&self, url: &str);
}

/// Events the host delivers to the relay.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Ready,
    ShowConfiguration,
    /// Raw response string from the closing webview; `None` when the webview
    /// was dismissed without submitting.
    WebviewClosed(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Configuring,
    Closed,
    MessageSent,
    MessageFailed,
}

#[derive(Builder)]
pub struct RelayOptions {
    #[builder(default = "DEFAULT_CONFIG_URL.to_string()")]
    pub config_url: String,
    #[builder(default)]
    pub policy: RetryPolicy,
}

impl RelayOptions {
    pub fn builder() -> RelayOptionsBuilder {
        RelayOptionsBuilder::default()
    }
}

/// Bridges webview closure events to firmware messaging: builds the
/// configuration URL for the active watch, decodes the returned payload, and
/// forwards the coerced message to firmware.
pub struct DeviceRelay {
    session_id: Uuid,
    config_url: String,
    host: Arc<dyn HostBridge>,
    dispatcher: Dispatcher,
    state: RelayState,
}

impl DeviceRelay {
    pub fn new(options: RelayOptions, host: Arc<dyn HostBridge>, link: Arc<dyn FirmwareLink>) -> Self {
        DeviceRelay {
            session_id: Uuid::new_v4(),
            config_url: options.config_url,
            host,
            dispatcher: Dispatcher::new(link, options.policy),
            state: RelayState::Idle,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Drive the relay from host-delivered events until the channel closes.
    /// Returns the state the relay ended in.
    pub async fn run(mut self, mut events: mpsc::Receiver<HostEvent>) -> RelayState {
        info!("Relay session {} waiting for host events", self.session_id);
        while let Some(event) = events.recv().await {
            self.handle_event(event).await;
        }
        info!("Host event channel closed, relay session {} done", self.session_id);
        self.state
    }

    pub async fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Ready => info!("Host ready"),
            HostEvent::ShowConfiguration => self.show_configuration(),
            HostEvent::WebviewClosed(response) => {
                self.state = RelayState::Closed;
                match self.webview_closed(response.as_deref()).await {
                    Ok(Some(_)) => self.state = RelayState::MessageSent,
                    // Cancelled or abandoned submission: nothing to send.
                    Ok(None) => self.state = RelayState::Idle,
                    Err(RelayError::Dispatch(e)) => {
                        error!("Failed to send settings to the watch: {e}");
                        self.state = RelayState::MessageFailed;
                    }
                    Err(e) => {
                        warn!("Ignoring webview response: {e}");
                        self.state = RelayState::Idle;
                    }
                }
            }
        }
    }

    fn show_configuration(&mut self) {
        let url = self.configuration_url();
        info!("Showing configuration page: {url}");
        self.host.open_url(&url);
        self.state = RelayState::Configuring;
    }

    /// Configuration URL for the active watch. Non-round watches get
    /// `rect=true`, monochrome ones `bw=true`, so the page can adapt the
    /// fields it presents.
    pub fn configuration_url(&self) -> String {
        let mut flags: Vec<&str> = Vec::new();
        if let Some(platform) = self.host.active_platform() {
            if !platform.is_round() {
                flags.push("rect=true");
            }
            if platform.is_monochrome() {
                flags.push("bw=true");
            }
        }
        if flags.is_empty() {
            self.config_url.clone()
        } else {
            format!("{}?{}", self.config_url, flags.join("&"))
        }
    }

    /// Decode the webview response and forward it to firmware. `Ok(None)`
    /// means the session was cancelled and nothing was sent.
    pub async fn webview_closed(
        &self,
        response: Option<&str>,
    ) -> Result<Option<DeviceMessage>, RelayError> {
        let raw = match response {
            None | Some("") | Some(CANCELLED_RESPONSE) => {
                info!("Configuration closed without a submission");
                return Ok(None);
            }
            Some(raw) => raw,
        };
        let record = payload::decode(raw)?;
        debug!("Decoded settings: {record:?}");
        let message = match DeviceMessage::try_from(&record) {
            Ok(message) => message,
            Err(e) => {
                info!("Not forwarding settings: {e}");
                return Ok(None);
            }
        };
        self.dispatcher.send(&message).await?;
        info!("Settings delivered to the watch");
        Ok(Some(message))
    }
}
