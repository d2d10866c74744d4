//! Short-range radio transport with explicit pairing
//!
//! Pairing runs as its own small state machine on top of a [`RadioAdapter`]:
//!
//! ```text
//! Idle -> Scanning -> Pairing -> Paired -> Connecting
//!   ^________|___________|  (failure, rejection, timeout or abort)
//! ```
//!
//! Every step is bounded by the configured pairing timeout and can be
//! aborted from any thread.

use crate::config::{LinkConfig, RadioConfig};
use crate::error::{ConnectionError, PairingError};
use crate::transport::link::{spawn_link, StreamOpener};
use crate::transport::traits::{
    LinkHandle, TransportConnector, TransportEventSender, TransportKind, TransportStream,
};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioPeer {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// What the user must confirm to finish pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingChallenge {
    /// Passkey to compare with the peer's display, when it has one
    pub passkey: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Scanning { found: Vec<RadioPeer> },
    Pairing { peer: RadioPeer, challenge: PairingChallenge },
    Paired { peer: RadioPeer },
    Connecting { peer: RadioPeer },
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairingState::Idle => write!(f, "idle"),
            PairingState::Scanning { .. } => write!(f, "scanning"),
            PairingState::Pairing { peer, .. } => write!(f, "pairing with {}", peer.address),
            PairingState::Paired { peer } => write!(f, "paired with {}", peer.address),
            PairingState::Connecting { peer } => write!(f, "connected to {}", peer.address),
        }
    }
}

/// Platform radio operations
#[async_trait]
pub trait RadioAdapter: Send + Sync + 'static {
    async fn scan(
        &self,
        duration: Duration,
        name_prefix: Option<&str>,
    ) -> Result<Vec<RadioPeer>, PairingError>;

    async fn pair(&self, address: &str) -> Result<PairingChallenge, PairingError>;

    async fn confirm(&self, address: &str) -> Result<(), PairingError>;

    async fn open(&self, address: &str, channel: u8) -> Result<Box<dyn TransportStream>>;
}

/// Adapter used when the crate is built without radio support
pub struct UnsupportedRadio;

const UNSUPPORTED: &str = "radio support not built; enable the `bluez` feature";

#[async_trait]
impl RadioAdapter for UnsupportedRadio {
    async fn scan(&self, _: Duration, _: Option<&str>) -> Result<Vec<RadioPeer>, PairingError> {
        Err(PairingError::Adapter(UNSUPPORTED.into()))
    }

    async fn pair(&self, _: &str) -> Result<PairingChallenge, PairingError> {
        Err(PairingError::Adapter(UNSUPPORTED.into()))
    }

    async fn confirm(&self, _: &str) -> Result<(), PairingError> {
        Err(PairingError::Adapter(UNSUPPORTED.into()))
    }

    async fn open(&self, _: &str, _: u8) -> Result<Box<dyn TransportStream>> {
        Err(anyhow::anyhow!(UNSUPPORTED))
    }
}

/// The adapter this build provides by default
pub fn default_radio_adapter() -> Arc<dyn RadioAdapter> {
    #[cfg(feature = "bluez")]
    {
        Arc::new(crate::transport::bt_discovery::BluezAdapter::new())
    }
    #[cfg(not(feature = "bluez"))]
    {
        Arc::new(UnsupportedRadio)
    }
}

struct PairingMachine {
    state: PairingState,
    /// Cancels whatever step is in flight
    step: CancellationToken,
}

/// Radio connector; pairing must reach `Paired` before a session can use it
pub struct RadioConnector {
    adapter: Arc<dyn RadioAdapter>,
    config: RadioConfig,
    link: LinkConfig,
    machine: Mutex<PairingMachine>,
}

impl RadioConnector {
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: RadioConfig, link: LinkConfig) -> Self {
        Self {
            adapter,
            config,
            link,
            machine: Mutex::new(PairingMachine {
                state: PairingState::Idle,
                step: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> PairingState {
        self.machine.lock().state.clone()
    }

    /// Look for nearby peers. Allowed from idle, or again after a scan.
    pub async fn scan(&self) -> Result<Vec<RadioPeer>, PairingError> {
        let step = self.begin(|state| match state {
            PairingState::Idle | PairingState::Scanning { .. } => {
                Ok(PairingState::Scanning { found: Vec::new() })
            }
            other => Err(invalid("scan", other)),
        })?;

        info!("[BT] Scanning for {} ms", self.config.scan_duration_ms);
        let prefix = self.config.name_prefix.as_deref();
        // The adapter stops on its own after scan_duration; the timeout only
        // catches an adapter that hangs.
        let bound = self.config.scan_duration() + self.config.pairing_timeout();
        let found = self
            .bounded(&step, bound, self.adapter.scan(self.config.scan_duration(), prefix))
            .await?;

        self.commit(&step, PairingState::Scanning { found: found.clone() })?;
        info!("[BT] Scan found {} peer(s)", found.len());
        Ok(found)
    }

    /// Start pairing with a peer from the last scan
    pub async fn pair(&self, address: &str) -> Result<PairingChallenge, PairingError> {
        let step = self.begin(|state| match state {
            PairingState::Scanning { found } => found
                .iter()
                .find(|peer| peer.address == address)
                .map(|peer| PairingState::Pairing {
                    peer: peer.clone(),
                    challenge: PairingChallenge { passkey: None },
                })
                .ok_or_else(|| PairingError::UnknownPeer(address.to_string())),
            other => Err(invalid("pair", other)),
        })?;

        debug!("[BT] Pairing with {}", address);
        let challenge = self
            .bounded(&step, self.config.pairing_timeout(), self.adapter.pair(address))
            .await?;

        let peer = self.current_peer();
        match peer {
            Some(peer) => {
                self.commit(&step, PairingState::Pairing { peer, challenge })?;
                Ok(challenge)
            }
            None => Err(PairingError::Aborted),
        }
    }

    /// Accept or reject the pending challenge
    pub async fn confirm(&self, accept: bool) -> Result<RadioPeer, PairingError> {
        let mut peer = None;
        let step = self.begin(|state| match state {
            PairingState::Pairing { peer: pending, .. } => {
                peer = Some(pending.clone());
                Ok(state.clone())
            }
            other => Err(invalid("confirm", other)),
        })?;
        let Some(peer) = peer else {
            return Err(PairingError::Aborted);
        };

        if !accept {
            self.fail(&step);
            info!("[BT] Pairing with {} rejected", peer.address);
            return Err(PairingError::Rejected);
        }

        self.bounded(&step, self.config.pairing_timeout(), self.adapter.confirm(&peer.address))
            .await?;
        self.commit(&step, PairingState::Paired { peer: peer.clone() })?;
        info!("[BT] Paired with {}", peer.address);
        Ok(peer)
    }

    /// Cancel the step in flight and return to idle
    pub fn abort(&self) {
        let mut machine = self.machine.lock();
        machine.step.cancel();
        machine.step = CancellationToken::new();
        if !matches!(machine.state, PairingState::Idle) {
            info!("[BT] Pairing aborted while {}", machine.state);
        }
        machine.state = PairingState::Idle;
    }

    fn current_peer(&self) -> Option<RadioPeer> {
        match &self.machine.lock().state {
            PairingState::Pairing { peer, .. }
            | PairingState::Paired { peer }
            | PairingState::Connecting { peer } => Some(peer.clone()),
            _ => None,
        }
    }

    /// Enter a step if `transition` allows it from the current state
    fn begin(
        &self,
        transition: impl FnOnce(&PairingState) -> Result<PairingState, PairingError>,
    ) -> Result<CancellationToken, PairingError> {
        let mut machine = self.machine.lock();
        let next = transition(&machine.state)?;
        machine.state = next;
        Ok(machine.step.clone())
    }

    /// Store the result of a step unless it was aborted meanwhile
    fn commit(&self, step: &CancellationToken, next: PairingState) -> Result<(), PairingError> {
        let mut machine = self.machine.lock();
        if step.is_cancelled() {
            return Err(PairingError::Aborted);
        }
        machine.state = next;
        Ok(())
    }

    fn fail(&self, step: &CancellationToken) {
        let mut machine = self.machine.lock();
        if !step.is_cancelled() {
            machine.state = PairingState::Idle;
        }
    }

    async fn bounded<T>(
        &self,
        step: &CancellationToken,
        limit: Duration,
        work: impl Future<Output = Result<T, PairingError>>,
    ) -> Result<T, PairingError> {
        let outcome = tokio::select! {
            _ = step.cancelled() => Err(PairingError::Aborted),
            result = timeout(limit, work) => match result {
                Ok(inner) => inner,
                Err(_) => Err(PairingError::Timeout),
            },
        };

        if let Err(e) = &outcome {
            warn!("[BT] Pairing step failed: {}", e);
            self.fail(step);
        }
        outcome
    }
}

fn invalid(action: &'static str, state: &PairingState) -> PairingError {
    PairingError::InvalidState {
        action,
        state: state.to_string(),
    }
}

struct RadioOpener {
    adapter: Arc<dyn RadioAdapter>,
    address: String,
    channel: u8,
}

#[async_trait]
impl StreamOpener for RadioOpener {
    async fn open(&self) -> Result<Box<dyn TransportStream>> {
        self.adapter.open(&self.address, self.channel).await
    }

    fn describe(&self) -> String {
        format!("radio://{}/{}", self.address, self.channel)
    }
}

impl TransportConnector for RadioConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Radio
    }

    fn name(&self) -> &'static str {
        "Radio"
    }

    fn connect(&self) -> bool {
        matches!(
            self.machine.lock().state,
            PairingState::Paired { .. } | PairingState::Connecting { .. }
        )
    }

    fn activate(&self, events: TransportEventSender) -> Result<LinkHandle, ConnectionError> {
        let mut machine = self.machine.lock();
        let peer = match &machine.state {
            PairingState::Paired { peer } | PairingState::Connecting { peer } => peer.clone(),
            other => {
                return Err(ConnectionError::PairingFailed(format!(
                    "no paired peer ({})",
                    other
                )))
            }
        };
        machine.state = PairingState::Connecting { peer: peer.clone() };

        let opener = Arc::new(RadioOpener {
            adapter: self.adapter.clone(),
            address: peer.address,
            channel: self.config.channel,
        });
        Ok(spawn_link(opener, self.link.clone(), events))
    }

    fn deactivated(&self) {
        let mut machine = self.machine.lock();
        if let PairingState::Connecting { peer } = &machine.state {
            machine.state = PairingState::Paired { peer: peer.clone() };
        }
    }
}
