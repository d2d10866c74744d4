//! Outward-facing notifications
//!
//! Registration outcomes go to the listener passed with each `register`
//! call. Product and component events go to every listener added with
//! [`EventDispatcher::add_listener`]. Both are delivered on the dispatcher's
//! execution context, in the order they were emitted.

mod dispatcher;

pub use dispatcher::{EventDispatcher, ExecutionContext, ListenerId, DELIVERY_THREAD_NAME};

use crate::error::RegistrationError;
use crate::registration::RegisteredInfo;
use crate::registry::ComponentSlot;
use crate::session::Device;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type RegistrationOutcome = Result<RegisteredInfo, RegistrationError>;

/// Product and component lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ProductEvent {
    Connected(Device),
    Disconnected { identity: String },
    ComponentConnected(ComponentSlot),
    ComponentDisconnected(ComponentSlot),
}

/// Receives exactly one outcome per `register` call it was passed to
pub trait RegistrationListener: Send + Sync {
    fn on_registration(&self, outcome: &RegistrationOutcome);
}

impl<F> RegistrationListener for F
where
    F: Fn(&RegistrationOutcome) + Send + Sync,
{
    fn on_registration(&self, outcome: &RegistrationOutcome) {
        self(outcome)
    }
}

/// Receives product and component events. Every method defaults to a no-op.
pub trait ProductListener: Send + Sync {
    fn product_connected(&self, _product: &Device) {}

    fn product_disconnected(&self, _identity: &str) {}

    fn component_connected(&self, _slot: &ComponentSlot) {}

    fn component_disconnected(&self, _slot: &ComponentSlot) {}
}

/// Everything a [`ChannelListener`] forwards
#[derive(Debug, Clone, PartialEq)]
pub enum SdkEvent {
    Registration(RegistrationOutcome),
    Product(ProductEvent),
}

/// Listener that forwards every notification into a tokio channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<SdkEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SdkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn forward(&self, event: SdkEvent) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl RegistrationListener for ChannelListener {
    fn on_registration(&self, outcome: &RegistrationOutcome) {
        self.forward(SdkEvent::Registration(outcome.clone()));
    }
}

impl ProductListener for ChannelListener {
    fn product_connected(&self, product: &Device) {
        self.forward(SdkEvent::Product(ProductEvent::Connected(product.clone())));
    }

    fn product_disconnected(&self, identity: &str) {
        self.forward(SdkEvent::Product(ProductEvent::Disconnected {
            identity: identity.to_string(),
        }));
    }

    fn component_connected(&self, slot: &ComponentSlot) {
        self.forward(SdkEvent::Product(ProductEvent::ComponentConnected(slot.clone())));
    }

    fn component_disconnected(&self, slot: &ComponentSlot) {
        self.forward(SdkEvent::Product(ProductEvent::ComponentDisconnected(
            slot.clone(),
        )));
    }
}
