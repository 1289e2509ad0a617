use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use clap_derive::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use watchface_config::protocol::dispatch::{ChannelLink, RetryPolicy};
use watchface_config::protocol::relay::{
    DEFAULT_CONFIG_URL, DeviceRelay, HostBridge, HostEvent, Platform, RelayOptions, RelayState,
};
use watchface_config::{CLOSE_URL, FileStore, FormController, MemoryStore, SettingsStore};

#[derive(Parser, Debug)]
struct Params {
    /// Watch platform to emulate (aplite, basalt, chalk)
    #[clap(long, default_value = "basalt")]
    platform: String,

    /// Configuration page base URL
    #[clap(long, default_value = DEFAULT_CONFIG_URL)]
    config_url: String,

    /// Settings file; omitted keeps the settings in memory only
    #[clap(long)]
    settings: Option<PathBuf>,

    /// Query string the form was opened with, e.g. "return_to=myapp%3A%2F%2Fdone%23"
    #[clap(long, default_value = "")]
    query: String,

    #[clap(long)]
    colorbg: Option<String>,
    #[clap(long)]
    colorm: Option<String>,
    #[clap(long)]
    colorh: Option<String>,
    #[clap(long)]
    colorp: Option<String>,
    #[clap(long)]
    colort: Option<String>,
    #[clap(long)]
    shadows: Option<bool>,
    #[clap(long)]
    ticks: Option<String>,
    #[clap(long)]
    rectticks: Option<bool>,
    #[clap(long)]
    btvibe: Option<bool>,
    #[clap(long)]
    invert: Option<bool>,
    #[clap(long)]
    whwidth: Option<String>,
}

struct CliHost {
    platform: Platform,
}

impl HostBridge for CliHost {
    fn active_platform(&self) -> Option<Platform> {
        Some(self.platform)
    }

    fn open_url(&self, url: &str) {
        info!("Opening configuration webview: {url}");
    }
}

/// Run the form side: load prior settings, apply field overrides from the
/// command line, submit, and return the navigation URL the webview would
/// redirect to.
fn run_form<S: SettingsStore>(store: S, params: &Params) -> Result<String> {
    let mut controller = FormController::new(store);
    controller.load_options()?;

    let form = controller.form_mut();
    if let Some(v) = &params.colorbg {
        form.colorbg = v.clone();
    }
    if let Some(v) = &params.colorm {
        form.colorm = v.clone();
    }
    if let Some(v) = &params.colorh {
        form.colorh = v.clone();
    }
    if let Some(v) = &params.colorp {
        form.colorp = v.clone();
    }
    if let Some(v) = &params.colort {
        form.colort = v.clone();
    }
    if let Some(v) = params.shadows {
        form.shadows = v;
    }
    if let Some(v) = &params.ticks {
        form.ticks = v.clone();
    }
    if let Some(v) = params.rectticks {
        form.rectticks = v;
    }
    if let Some(v) = params.btvibe {
        form.btvibe = v;
    }
    if let Some(v) = params.invert {
        form.invert = v;
    }
    if let Some(v) = &params.whwidth {
        form.whwidth = v.clone();
    }

    Ok(controller.handle_submit(&params.query)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let params = Params::parse();

    // Form side: what the configuration webview does on submit.
    let navigation_url = match &params.settings {
        Some(path) => run_form(FileStore::new(path), &params)?,
        None => run_form(MemoryStore::default(), &params)?,
    };
    info!("Form navigated to: {navigation_url}");

    // The host only intercepts the close navigation; any other return target
    // is an ordinary redirect.
    let Some(payload) = navigation_url.strip_prefix(CLOSE_URL) else {
        info!("Return target is external, nothing to relay");
        println!("{navigation_url}");
        return Ok(());
    };

    let (link_tx, mut link_rx) = mpsc::channel(8);
    let options = RelayOptions::builder()
        .config_url(params.config_url.clone())
        .policy(RetryPolicy::hardened())
        .build()?;
    let relay = DeviceRelay::new(
        options,
        Arc::new(CliHost {
            platform: Platform::from(params.platform.as_str()),
        }),
        Arc::new(ChannelLink::new(link_tx)),
    );

    // Watch side: print what the firmware would receive and ack it.
    tokio::spawn(async move {
        while let Some(delivery) = link_rx.recv().await {
            println!(
                "{}",
                serde_json::to_string_pretty(&delivery.message).unwrap()
            );
            delivery.ack.success(delivery.transaction_id);
        }
    });

    let (event_tx, event_rx) = mpsc::channel(4);
    let relay_task = tokio::spawn(relay.run(event_rx));
    event_tx.send(HostEvent::Ready).await?;
    event_tx.send(HostEvent::ShowConfiguration).await?;
    event_tx
        .send(HostEvent::WebviewClosed(Some(payload.to_string())))
        .await?;
    drop(event_tx);

    match relay_task.await? {
        RelayState::MessageSent => Ok(()),
        state => bail!("relay finished in state {state:?}"),
    }
}
