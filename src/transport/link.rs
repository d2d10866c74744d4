//! Framed link loop shared by every stream-based transport
//!
//! Opens the stream, keeps it alive with heartbeats, turns device frames into
//! [`TransportEvent`]s and reconnects with exponential backoff. A device that
//! was announced is only reported lost after `max_link_retries` consecutive
//! failed reconnects, or immediately if it says goodbye.

use crate::config::LinkConfig;
use crate::registry::{ComponentDescriptor, ComponentSlot};
use crate::session::CapabilityDescriptor;
use crate::transport::traits::{LinkHandle, TransportEvent, TransportEventSender, TransportStream};
use aerolink_shared::codec::{self, FrameDecoder};
use aerolink_shared::{envelope::Payload, limits, Envelope, Heartbeat};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Produces a fresh stream for each connection attempt
#[async_trait]
pub trait StreamOpener: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn TransportStream>>;

    /// Target description for logs
    fn describe(&self) -> String;
}

/// Spawn the link loop on the current runtime
pub fn spawn_link(
    opener: Arc<dyn StreamOpener>,
    config: LinkConfig,
    events: TransportEventSender,
) -> LinkHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(link_loop(opener, config, events, cancel.clone()));
    LinkHandle::new(cancel, task)
}

enum SessionEnd {
    Cancelled,
    Dropped(anyhow::Error),
}

/// Per-link bookkeeping that survives reconnects
struct LinkState {
    announced: Option<String>,
    failures: u32,
    sequence_id: u64,
}

async fn link_loop(
    opener: Arc<dyn StreamOpener>,
    config: LinkConfig,
    events: TransportEventSender,
    cancel: CancellationToken,
) {
    let mut reconnect_delay = config.reconnect_delay();
    let mut state = LinkState {
        announced: None,
        failures: 0,
        sequence_id: 0,
    };

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = timeout(config.connect_timeout(), opener.open()) => result,
        };

        match attempt {
            Ok(Ok(mut stream)) => {
                debug!("[LINK] Opened {}", opener.describe());
                reconnect_delay = config.reconnect_delay();

                let end = run_session(&mut stream, &config, &events, &cancel, &mut state).await;
                let _ = stream.shutdown().await;

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Dropped(reason) => {
                        warn!("[LINK] {} dropped: {}", opener.describe(), reason);
                        state.failures += 1;
                    }
                }
            }
            Ok(Err(e)) => {
                debug!("[LINK] Could not open {}: {}", opener.describe(), e);
                state.failures += 1;
            }
            Err(_) => {
                debug!("[LINK] Timed out opening {}", opener.describe());
                state.failures += 1;
            }
        }

        if state.announced.is_some() && state.failures > config.max_link_retries {
            if let Some(identity) = state.announced.take() {
                info!(
                    "[LINK] Giving up on {} after {} failed attempts",
                    identity, state.failures
                );
                let _ = events.send(TransportEvent::DeviceLost {
                    reason: format!("link failed {} times", state.failures),
                });
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(reconnect_delay) => {}
        }

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay());
    }

    debug!("[LINK] Link to {} stopped", opener.describe());
}

/// Drive one open stream until it drops or the link is cancelled
async fn run_session(
    stream: &mut Box<dyn TransportStream>,
    config: &LinkConfig,
    events: &TransportEventSender,
    cancel: &CancellationToken,
    state: &mut LinkState,
) -> SessionEnd {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    let mut heartbeat = interval(Duration::from_millis(limits::HEARTBEAT_INTERVAL_MS));
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let start_time = Instant::now();
    let mut last_rx = Instant::now();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,

            _ = heartbeat.tick() => {
                if last_rx.elapsed() > config.read_timeout() {
                    return SessionEnd::Dropped(anyhow!(
                        "silent for {} ms",
                        last_rx.elapsed().as_millis()
                    ));
                }

                state.sequence_id += 1;
                let uptime_ms = start_time.elapsed().as_millis() as u64;
                let envelope = Envelope::wrap(
                    "",
                    state.sequence_id,
                    Payload::Heartbeat(Heartbeat::new(uptime_ms)),
                );

                let written = match codec::encode(&envelope) {
                    Ok(frame) => writer.write_all(&frame).await.map_err(anyhow::Error::from),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = written {
                    return SessionEnd::Dropped(e);
                }
            }

            result = reader.read(&mut read_buf) => {
                match result {
                    Ok(0) => return SessionEnd::Dropped(anyhow!("peer closed link")),
                    Ok(n) => {
                        last_rx = Instant::now();
                        decoder.extend(&read_buf[..n]);

                        // Process all complete frames
                        loop {
                            match decoder.decode_next() {
                                Ok(Some(envelope)) => handle_frame(envelope, events, state),
                                Ok(None) => break,
                                Err(e) => return SessionEnd::Dropped(anyhow!("bad frame: {}", e)),
                            }
                        }
                    }
                    Err(e) => return SessionEnd::Dropped(anyhow!("read error: {}", e)),
                }
            }
        }
    }
}

fn handle_frame(envelope: Envelope, events: &TransportEventSender, state: &mut LinkState) {
    // Any well-formed frame proves the link works again
    state.failures = 0;

    let identity = envelope.device_id().to_string();
    let Some(payload) = envelope.payload else {
        debug!("[LINK] Frame without payload from {:?}", identity);
        return;
    };

    match payload {
        Payload::Announce(announce) => {
            let identity = if identity.is_empty() {
                announce.model.clone()
            } else {
                identity
            };
            debug!("[LINK] Device {} announced", identity);
            state.announced = Some(identity.clone());
            let _ = events.send(TransportEvent::DeviceAppeared {
                identity,
                capabilities: CapabilityDescriptor::from(announce),
            });
        }
        Payload::Gone(gone) => {
            if state.announced.take().is_some() {
                let _ = events.send(TransportEvent::DeviceLost {
                    reason: gone.reason,
                });
            }
        }
        Payload::Delta(delta) => {
            if state.announced.is_none() {
                debug!("[LINK] Ignoring component delta before announce");
                return;
            }
            let added: Vec<ComponentDescriptor> = delta.added.into_iter().map(Into::into).collect();
            let removed: Vec<ComponentSlot> = delta.removed.into_iter().map(Into::into).collect();
            let _ = events.send(TransportEvent::ComponentsChanged { added, removed });
        }
        Payload::Heartbeat(_) => {}
    }
}
