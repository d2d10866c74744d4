//! Session controller
//!
//! Binds the selected transport, the registration gate and the component
//! registry into one product session. Transport events reach the controller
//! through a pump task tagged with the session epoch; `stop()` bumps the
//! epoch, so anything still in flight from an older link is discarded.

use super::device::{CapabilityDescriptor, Device, DeviceConnectionState};
use crate::error::ConnectionError;
use crate::events::{EventDispatcher, ProductEvent};
use crate::registration::RegistrationCheck;
use crate::registry::{ComponentDescriptor, ComponentRegistry, ComponentSlot};
use crate::transport::{LinkHandle, TransportConnector, TransportEvent, TransportKind};
use aerolink_shared::state_machine::{
    SessionEvent, SessionState, SessionStateMachine, TransitionResult,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct ActiveLink {
    handle: LinkHandle,
    pump: CancellationToken,
}

struct ControllerState {
    fsm: SessionStateMachine,
    connector: Arc<dyn TransportConnector>,
    link: Option<ActiveLink>,
    device: Option<Device>,
    epoch: u64,
    close_on_background: bool,
    /// Set when backgrounding stopped a running session
    suspended: bool,
}

struct Inner {
    gate: Arc<dyn RegistrationCheck>,
    registry: Arc<ComponentRegistry>,
    dispatcher: EventDispatcher,
    state: Mutex<ControllerState>,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        gate: Arc<dyn RegistrationCheck>,
        registry: Arc<ComponentRegistry>,
        dispatcher: EventDispatcher,
        connector: Arc<dyn TransportConnector>,
        close_on_background: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate,
                registry,
                dispatcher,
                state: Mutex::new(ControllerState {
                    fsm: SessionStateMachine::new(),
                    connector,
                    link: None,
                    device: None,
                    epoch: 0,
                    close_on_background,
                    suspended: false,
                }),
            }),
        }
    }

    /// Activate the selected transport. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<(), ConnectionError> {
        let mut state = self.inner.state.lock();
        self.inner.start_locked(&mut state)?;
        // An explicit start supersedes a pending foreground resume
        state.suspended = false;
        Ok(())
    }

    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        self.inner.stop_locked(&mut state, "session stopped");
        state.suspended = false;
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.lock().fsm.state()
    }

    pub fn connected_product(&self) -> Option<Device> {
        self.inner.state.lock().device.clone()
    }

    pub fn device_state(&self) -> DeviceConnectionState {
        self.state().into()
    }

    /// Kind of the running link, if any
    pub fn active_transport(&self) -> Option<TransportKind> {
        let state = self.inner.state.lock();
        state.link.as_ref().map(|_| state.connector.kind())
    }

    pub fn selected_transport(&self) -> TransportKind {
        self.inner.state.lock().connector.kind()
    }

    /// Replace the connector used by the next `start`
    pub fn select_transport(
        &self,
        connector: Arc<dyn TransportConnector>,
    ) -> Result<(), ConnectionError> {
        let mut state = self.inner.state.lock();
        if !state.fsm.state().is_idle() {
            return Err(ConnectionError::TransportBusy);
        }
        info!(
            "[SESSION] Transport {} -> {}",
            state.connector.name(),
            connector.name()
        );
        state.connector = connector;
        Ok(())
    }

    pub fn set_background_behavior(&self, close_on_background: bool) {
        self.inner.state.lock().close_on_background = close_on_background;
    }

    pub fn enter_background(&self) {
        let mut state = self.inner.state.lock();
        if !state.close_on_background || state.fsm.state().is_idle() {
            return;
        }
        info!("[SESSION] Backgrounded; closing session");
        self.inner.stop_locked(&mut state, "application backgrounded");
        state.suspended = true;
    }

    pub fn enter_foreground(&self) {
        let mut state = self.inner.state.lock();
        if !std::mem::take(&mut state.suspended) {
            return;
        }
        info!("[SESSION] Foregrounded; resuming session");
        if let Err(e) = self.inner.start_locked(&mut state) {
            warn!("[SESSION] Could not resume session: {}", e);
        }
    }
}

impl Inner {
    fn start_locked(self: &Arc<Self>, state: &mut ControllerState) -> Result<(), ConnectionError> {
        if !self.gate.is_registered() {
            return Err(ConnectionError::NotRegistered);
        }
        match state.fsm.state() {
            SessionState::Idle => {}
            SessionState::Starting | SessionState::Stopping => {
                return Err(ConnectionError::AlreadyConnecting)
            }
            SessionState::Active(_) => return Err(ConnectionError::AlreadyActive),
        }
        if !state.connector.connect() {
            return Err(ConnectionError::TransportUnavailable(format!(
                "{} cannot reach a product",
                state.connector.name()
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = state.connector.activate(tx)?;

        state.fsm.process_event(SessionEvent::StartRequested);
        state.epoch += 1;

        let pump = CancellationToken::new();
        tokio::spawn(pump_events(
            Arc::downgrade(self),
            state.epoch,
            rx,
            pump.clone(),
        ));
        state.link = Some(ActiveLink { handle, pump });

        info!("[SESSION] Starting via {}", state.connector.name());
        Ok(())
    }

    fn stop_locked(&self, state: &mut ControllerState, reason: &str) {
        state.fsm.process_event(SessionEvent::StopRequested);
        state.epoch += 1;

        if let Some(link) = state.link.take() {
            link.pump.cancel();
            link.handle.deactivate();
            state.connector.deactivated();
        }
        self.drop_device(state, reason);

        state.fsm.process_event(SessionEvent::StopCompleted);
        debug!("[SESSION] Stopped ({})", reason);
    }

    fn on_transport_event(&self, epoch: u64, event: TransportEvent) {
        let mut state = self.state.lock();
        if state.epoch != epoch || !matches!(
            state.fsm.state(),
            SessionState::Starting | SessionState::Active(_)
        ) {
            debug!("[SESSION] Discarding stale transport event");
            return;
        }

        match event {
            TransportEvent::DeviceAppeared {
                identity,
                capabilities,
            } => self.on_device_appeared(&mut state, identity, capabilities),
            TransportEvent::ComponentsChanged { added, removed } => {
                self.on_components_changed(&mut state, added, removed)
            }
            TransportEvent::DeviceLost { reason } => {
                if state.device.is_some() {
                    let lost = ConnectionError::DeviceLost(reason);
                    info!("[SESSION] {}", lost);
                    self.drop_device(&mut state, &lost.to_string());
                    state.fsm.process_event(SessionEvent::ProductLost);
                }
            }
        }
    }

    fn on_device_appeared(
        &self,
        state: &mut ControllerState,
        identity: String,
        capabilities: CapabilityDescriptor,
    ) {
        if let Err(e) = capabilities.validate() {
            warn!("[SESSION] {} announced a bad descriptor: {}", identity, e);
        }

        if let Some(current) = state.device.as_mut() {
            if current.identity == identity {
                let (added, removed) = current.capabilities.diff(&capabilities);
                current.capabilities = capabilities;
                self.registry.apply_delta(&added, &removed);
                debug!("[SESSION] Refreshed capabilities of {}", identity);
                return;
            }
            info!("[SESSION] {} replaced by {}", current.identity, identity);
            self.drop_device(state, "replaced by another product");
            state.fsm.process_event(SessionEvent::ProductLost);
        }

        let device = Device::new(identity, capabilities, state.connector.kind());
        if let TransitionResult::Invalid { from, event } =
            state.fsm.process_event(SessionEvent::ProductAppeared)
        {
            warn!("[SESSION] Ignoring {:?} while {}", event, from);
            return;
        }

        info!(
            "[SESSION] Product connected: {} ({}, {} components)",
            device.identity,
            device.model(),
            device.capabilities.components.len()
        );
        self.registry.apply_delta_after(
            Some(ProductEvent::Connected(device.clone())),
            &device.capabilities.components,
            &[],
        );
        state.device = Some(device);
    }

    fn on_components_changed(
        &self,
        state: &mut ControllerState,
        added: Vec<ComponentDescriptor>,
        removed: Vec<ComponentSlot>,
    ) {
        let Some(device) = state.device.as_mut() else {
            debug!("[SESSION] Component delta without a product");
            return;
        };

        let components = &mut device.capabilities.components;
        components.retain(|c| !removed.contains(&c.slot));
        for descriptor in &added {
            components.retain(|c| c.slot != descriptor.slot);
            components.push(descriptor.clone());
        }

        self.registry.apply_delta(&added, &removed);
    }

    /// Vacate the registry and announce the product's departure
    fn drop_device(&self, state: &mut ControllerState, reason: &str) {
        match state.device.take() {
            Some(device) => {
                info!("[SESSION] Product disconnected: {} ({})", device.identity, reason);
                self.registry.clear_then(Some(ProductEvent::Disconnected {
                    identity: device.identity,
                }));
            }
            None => {
                self.registry.clear();
            }
        }
    }
}

async fn pump_events(
    inner: Weak<Inner>,
    epoch: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.on_transport_event(epoch, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ExecutionContext;
    use crate::registry::ComponentKey;
    use crate::session::ProductFamily;
    use crate::transport::TransportEventSender;
    use aerolink_shared::state_machine::ProductPresence;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::runtime::Handle;

    struct Registered(AtomicBool);

    impl RegistrationCheck for Registered {
        fn is_registered(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Connector whose link is driven by the test
    #[derive(Default)]
    struct ManualConnector {
        sender: Mutex<Option<TransportEventSender>>,
        unreachable: AtomicBool,
    }

    impl ManualConnector {
        fn push(&self, event: TransportEvent) {
            if let Some(tx) = self.sender.lock().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    impl TransportConnector for ManualConnector {
        fn kind(&self) -> TransportKind {
            TransportKind::Cable
        }
        fn name(&self) -> &'static str {
            "Manual"
        }
        fn connect(&self) -> bool {
            !self.unreachable.load(Ordering::SeqCst)
        }
        fn activate(&self, events: TransportEventSender) -> Result<LinkHandle, ConnectionError> {
            *self.sender.lock() = Some(events);
            Ok(LinkHandle::detached(CancellationToken::new()))
        }
    }

    fn appeared(identity: &str, components: &[(&str, u32)]) -> TransportEvent {
        TransportEvent::DeviceAppeared {
            identity: identity.into(),
            capabilities: CapabilityDescriptor {
                model: "Surveyor".into(),
                firmware: "1.0".into(),
                family: ProductFamily::Aircraft,
                components: components
                    .iter()
                    .map(|(key, index)| ComponentDescriptor::new(*key, *index, *key))
                    .collect(),
            },
        }
    }

    fn controller(registered: bool) -> (SessionController, Arc<ManualConnector>, Arc<ComponentRegistry>) {
        let dispatcher = EventDispatcher::new(ExecutionContext::Tokio(Handle::current()));
        let registry = Arc::new(ComponentRegistry::new(dispatcher.clone()));
        let connector = Arc::new(ManualConnector::default());
        let controller = SessionController::new(
            Arc::new(Registered(AtomicBool::new(registered))),
            registry.clone(),
            dispatcher,
            connector.clone(),
            true,
        );
        (controller, connector, registry)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_start_requires_registration() {
        let (controller, _, _) = controller(false);
        assert_eq!(controller.start(), Err(ConnectionError::NotRegistered));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_second_start_fails_while_starting() {
        let (controller, _, _) = controller(true);
        controller.start().unwrap();
        assert_eq!(controller.start(), Err(ConnectionError::AlreadyConnecting));
        assert_eq!(controller.state(), SessionState::Starting);
    }

    #[tokio::test]
    async fn test_unreachable_transport_leaves_idle() {
        let (controller, connector, _) = controller(true);
        connector.unreachable.store(true, Ordering::SeqCst);
        assert!(matches!(
            controller.start(),
            Err(ConnectionError::TransportUnavailable(_))
        ));
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_presence_populates_registry() {
        let (controller, connector, registry) = controller(true);
        controller.start().unwrap();
        connector.push(appeared("AC-1", &[("gimbal", 0), ("battery", 0)]));
        settle().await;

        assert_eq!(
            controller.state(),
            SessionState::Active(ProductPresence::ProductConnected)
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(controller.start(), Err(ConnectionError::AlreadyActive));
        assert_eq!(controller.active_transport(), Some(TransportKind::Cable));
    }

    #[tokio::test]
    async fn test_device_state_through_connect_and_loss() {
        let (controller, connector, _) = controller(true);
        assert_eq!(controller.device_state(), DeviceConnectionState::Disconnected);

        controller.start().unwrap();
        assert_eq!(controller.device_state(), DeviceConnectionState::Connecting);

        connector.push(appeared("AC-1", &[("gimbal", 0)]));
        settle().await;
        assert_eq!(controller.device_state(), DeviceConnectionState::Connected);

        connector.push(TransportEvent::DeviceLost {
            reason: "cable pulled".into(),
        });
        settle().await;
        assert_eq!(controller.device_state(), DeviceConnectionState::Disconnected);
        assert!(controller.connected_product().is_none());

        controller.stop();
        assert_eq!(controller.device_state(), DeviceConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_refresh_applies_diff() {
        let (controller, connector, registry) = controller(true);
        controller.start().unwrap();
        connector.push(appeared("AC-1", &[("gimbal", 0), ("battery", 0)]));
        settle().await;
        let battery = registry
            .lookup(&ComponentSlot::new(ComponentKey::Battery, 0))
            .unwrap();

        connector.push(appeared("AC-1", &[("battery", 0), ("camera", 0)]));
        settle().await;

        assert!(battery.is_live());
        assert!(registry
            .lookup(&ComponentSlot::new(ComponentKey::Gimbal, 0))
            .is_err());
        assert!(registry
            .lookup(&ComponentSlot::new(ComponentKey::Camera, 0))
            .is_ok());
    }

    #[tokio::test]
    async fn test_events_after_stop_are_discarded() {
        let (controller, connector, registry) = controller(true);
        controller.start().unwrap();
        controller.stop();

        connector.push(appeared("AC-1", &[("gimbal", 0)]));
        settle().await;

        assert_eq!(controller.state(), SessionState::Idle);
        assert!(registry.is_empty());
        assert!(controller.connected_product().is_none());
    }

    #[tokio::test]
    async fn test_transport_change_needs_idle() {
        let (controller, _, _) = controller(true);
        controller.start().unwrap();
        let other = Arc::new(ManualConnector::default());
        assert_eq!(
            controller.select_transport(other.clone()),
            Err(ConnectionError::TransportBusy)
        );

        controller.stop();
        assert!(controller.select_transport(other).is_ok());
    }

    #[tokio::test]
    async fn test_background_without_policy_keeps_session() {
        let (controller, _, _) = controller(true);
        controller.set_background_behavior(false);
        controller.start().unwrap();

        controller.enter_background();
        assert_eq!(controller.state(), SessionState::Starting);
    }
}
