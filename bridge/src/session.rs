//! One client of the bridge

use crate::product::SimulatedProduct;
use aerolink_shared::{
    codec::{self, FrameDecoder},
    envelope::Payload,
    limits, Envelope, Heartbeat,
};
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ClientSession<S> {
    stream: S,
    peer: String,
    product: SimulatedProduct,
    swap_interval: Option<Duration>,
}

/// Write side of a client session
struct Outbox<W> {
    writer: W,
    identity: String,
    sequence: u64,
}

impl<W: AsyncWrite + Unpin> Outbox<W> {
    async fn send(&mut self, payload: Payload) -> Result<()> {
        self.sequence += 1;
        let envelope = Envelope::wrap(self.identity.clone(), self.sequence, payload);
        let frame = codec::encode(&envelope)?;
        self.writer.write_all(&frame).await?;
        Ok(())
    }
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        product: SimulatedProduct,
        swap_interval: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            product,
            swap_interval,
        }
    }

    /// Announce, then heartbeat (and swap) until the client goes away
    pub async fn run(self) -> Result<()> {
        let Self {
            stream,
            peer,
            mut product,
            swap_interval,
        } = self;
        let started = Instant::now();
        let (mut reader, writer) = tokio::io::split(stream);
        let mut outbox = Outbox {
            writer,
            identity: product.identity.clone(),
            sequence: 0,
        };

        outbox.send(Payload::Announce(product.announce())).await?;
        info!("[BRIDGE] Announced {} to {}", product.identity, peer);

        let mut heartbeat = interval(Duration::from_millis(limits::HEARTBEAT_INTERVAL_MS));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Only polled when swapping is on
        let mut swap = interval(swap_interval.unwrap_or(Duration::from_secs(3600)));
        swap.tick().await;

        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let uptime = started.elapsed().as_millis() as u64;
                    outbox.send(Payload::Heartbeat(Heartbeat::new(uptime))).await?;
                }
                _ = swap.tick(), if swap_interval.is_some() => {
                    let delta = product.swap();
                    info!(
                        "[BRIDGE] Swap for {}: +{} -{}",
                        peer,
                        delta.added.len(),
                        delta.removed.len()
                    );
                    outbox.send(Payload::Delta(delta)).await?;
                }
                read = reader.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        info!("[BRIDGE] Client disconnected: {}", peer);
                        return Ok(());
                    }
                    decoder.extend(&buf[..n]);
                    while let Some(envelope) = decoder.decode_next()? {
                        log_envelope(&peer, &envelope);
                    }
                }
            }
        }
    }
}

fn log_envelope(peer: &str, envelope: &Envelope) {
    let seq = envelope.header.as_ref().map(|h| h.sequence_id).unwrap_or(0);
    match &envelope.payload {
        Some(Payload::Heartbeat(hb)) => {
            debug!("[BRIDGE] {} seq={} HEARTBEAT uptime={}ms", peer, seq, hb.uptime_ms)
        }
        Some(other) => warn!("[BRIDGE] {} seq={} unexpected {:?}", peer, seq, other),
        None => debug!("[BRIDGE] {} seq={} (no payload)", peer, seq),
    }
}
