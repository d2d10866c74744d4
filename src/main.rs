//! aerolink demo
//!
//! Registers an app key, connects over the configured transport (or a bridge
//! when `AEROLINK_BRIDGE_IP` is set) and logs product events until ctrl-c.

use aerolink::{ChannelListener, DebugLogCapture, ProductEvent, SdkConfig, SdkEvent, SdkManager};
use anyhow::Context;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONFIG_ENV: &str = "AEROLINK_CONFIG";
const APP_KEY_ENV: &str = "AEROLINK_APP_KEY";
const BRIDGE_ENV: &str = "AEROLINK_BRIDGE_IP";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("aerolink.toml"));
    let config = SdkConfig::load_or_default(&config_path)?;

    // Console output, plus the capture files once capture is enabled
    let capture = DebugLogCapture::from_config(&config.storage);
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(capture.clone()))
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
    capture.enable();

    let sdk = SdkManager::builder(config).with_debug_log(capture).build()?;
    info!("aerolink {} demo starting", sdk.sdk_version_string());

    if let Ok(ip) = std::env::var(BRIDGE_ENV) {
        sdk.enable_bridge_mode(&ip)?;
    }

    let app_key = std::env::var(APP_KEY_ENV)
        .with_context(|| format!("{} must hold the application key", APP_KEY_ENV))?;

    let (listener, mut events) = ChannelListener::new();
    sdk.add_listener(listener.clone());
    sdk.register_application(&app_key, listener);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SdkEvent::Registration(Ok(info)) => {
                        info!("Registered (valid until {} ms)", info.expires_at_ms);
                        match sdk.start_connection() {
                            Ok(()) => info!("Connecting via {}", sdk.selected_transport()),
                            Err(e) => error!("Could not start: {}", e),
                        }
                    }
                    SdkEvent::Registration(Err(e)) => {
                        error!("Registration failed: {}", e);
                        break;
                    }
                    SdkEvent::Product(ProductEvent::Connected(device)) => {
                        info!(
                            "Product {} ({} {}) on {}",
                            device.identity,
                            device.model(),
                            device.capabilities.firmware,
                            device.transport
                        );
                    }
                    SdkEvent::Product(ProductEvent::Disconnected { identity }) => {
                        warn!("Product {} disconnected", identity);
                    }
                    SdkEvent::Product(ProductEvent::ComponentConnected(slot)) => {
                        info!("  + {}", slot);
                    }
                    SdkEvent::Product(ProductEvent::ComponentDisconnected(slot)) => {
                        info!("  - {}", slot);
                    }
                }
            }
        }
    }

    sdk.stop_connection();
    sdk.flush_events().await;
    sdk.disable_debug_log_capture();
    Ok(())
}
