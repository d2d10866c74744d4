//! Transport trait abstraction for pluggable links

use crate::error::ConnectionError;
use crate::registry::{ComponentDescriptor, ComponentSlot};
use crate::session::CapabilityDescriptor;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Physical or logical path to a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Cable,
    Wireless,
    Radio,
    Bridge,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Cable => write!(f, "Cable"),
            TransportKind::Wireless => write!(f, "Wireless"),
            TransportKind::Radio => write!(f, "Radio"),
            TransportKind::Bridge => write!(f, "Bridge"),
        }
    }
}

/// Presence notifications a live link reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    DeviceAppeared {
        identity: String,
        capabilities: CapabilityDescriptor,
    },
    ComponentsChanged {
        added: Vec<ComponentDescriptor>,
        removed: Vec<ComponentSlot>,
    },
    DeviceLost {
        reason: String,
    },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// A transport stream that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// One way of reaching a product
pub trait TransportConnector: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;

    /// Cheap feasibility check: could `activate` reach a device right now?
    fn connect(&self) -> bool;

    /// Start the link. Presence changes are reported on `events` until the
    /// returned handle is deactivated or dropped.
    fn activate(&self, events: TransportEventSender) -> Result<LinkHandle, ConnectionError>;

    /// Called after the session tore the link down
    fn deactivated(&self) {}
}

/// Owns a running link; cancelling it ends the link task
#[derive(Debug)]
pub struct LinkHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Handle for links driven by someone else, e.g. a test harness
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, task: None }
    }

    pub fn is_finished(&self) -> bool {
        match &self.task {
            Some(task) => task.is_finished(),
            None => self.cancel.is_cancelled(),
        }
    }

    pub fn deactivate(self) {
        // Drop does the work
    }
}

impl Drop for LinkHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
