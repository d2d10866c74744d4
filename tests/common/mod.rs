#![allow(dead_code)]

use aerolink::config::SdkConfig;
use aerolink::registration::{AuthorityError, AuthorizationService, Verification};
use aerolink::session::{CapabilityDescriptor, ProductFamily};
use aerolink::registry::{ComponentDescriptor, ComponentSlot};
use aerolink::transport::{LinkHandle, TransportEventSender};
use aerolink::{
    ChannelListener, ConnectionError, ExecutionContext, SdkEvent, SdkManager, TransportConnector,
    TransportKind,
};
use aerolink::transport::TransportEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

pub const APP_KEY: &str = "a1b2c3d4e5f6a7b8c9d0";

/// Authority that accepts every key and counts how often it was asked
#[derive(Default)]
pub struct CountingAuthority {
    calls: AtomicUsize,
}

impl CountingAuthority {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthorizationService for CountingAuthority {
    async fn verify(&self, _: &str, _: &str) -> Result<Verification, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Verification { ttl: None })
    }
}

/// A product the test plugs in and out by hand
#[derive(Default)]
pub struct ScriptedConnector {
    sender: Mutex<Option<TransportEventSender>>,
    product: Mutex<Option<(String, CapabilityDescriptor)>>,
    activations: AtomicUsize,
}

impl ScriptedConnector {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    fn send(&self, event: TransportEvent) {
        if let Some(tx) = self.sender.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Attach a product; announced now if a link is up, else on activation
    pub fn plug(&self, identity: &str, components: &[(&str, u32)]) {
        let capabilities = descriptor(components);
        *self.product.lock() = Some((identity.to_string(), capabilities.clone()));
        self.send(TransportEvent::DeviceAppeared {
            identity: identity.to_string(),
            capabilities,
        });
    }

    pub fn unplug(&self, reason: &str) {
        *self.product.lock() = None;
        self.send(TransportEvent::DeviceLost {
            reason: reason.to_string(),
        });
    }

    pub fn delta(&self, added: &[(&str, u32)], removed: &[(&str, u32)]) {
        self.send(TransportEvent::ComponentsChanged {
            added: added
                .iter()
                .map(|(key, index)| ComponentDescriptor::new(*key, *index, *key))
                .collect(),
            removed: removed
                .iter()
                .map(|(key, index)| ComponentSlot::new(*key, *index))
                .collect(),
        });
    }
}

impl TransportConnector for ScriptedConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Cable
    }

    fn name(&self) -> &'static str {
        "Scripted"
    }

    fn connect(&self) -> bool {
        true
    }

    fn activate(&self, events: TransportEventSender) -> Result<LinkHandle, ConnectionError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some((identity, capabilities)) = self.product.lock().clone() {
            let _ = events.send(TransportEvent::DeviceAppeared {
                identity,
                capabilities,
            });
        }
        *self.sender.lock() = Some(events);
        Ok(LinkHandle::detached(CancellationToken::new()))
    }
}

pub fn descriptor(components: &[(&str, u32)]) -> CapabilityDescriptor {
    CapabilityDescriptor {
        model: "Surveyor".into(),
        firmware: "1.0.0".into(),
        family: ProductFamily::Aircraft,
        components: components
            .iter()
            .map(|(key, index)| ComponentDescriptor::new(*key, *index, *key))
            .collect(),
    }
}

pub fn config(data_dir: &Path) -> SdkConfig {
    let mut config = SdkConfig::default();
    config.storage.data_dir = Some(data_dir.to_path_buf());
    config.registration.retry_delay_ms = 10;
    config
}

pub fn manager(
    data_dir: &Path,
    authority: Arc<CountingAuthority>,
    connector: Arc<ScriptedConnector>,
) -> SdkManager {
    SdkManager::builder(config(data_dir))
        .with_authority(authority)
        .with_connector(connector)
        .with_context(ExecutionContext::Tokio(Handle::current()))
        .build()
        .unwrap()
}

/// Register and wait for the outcome
pub async fn register(sdk: &SdkManager) {
    let (listener, mut rx) = ChannelListener::new();
    sdk.register_application(APP_KEY, listener);
    match next_event(&mut rx).await {
        SdkEvent::Registration(Ok(_)) => {}
        other => panic!("unexpected registration outcome: {:?}", other),
    }
}

pub async fn next_event(rx: &mut UnboundedReceiver<SdkEvent>) -> SdkEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
