//! SDK entry point
//!
//! [`SdkManager`] owns one registration gate, one session and everything
//! they share. Applications construct it explicitly and keep it for as long
//! as they talk to products.

use crate::config::SdkConfig;
use crate::debug_log::DebugLogCapture;
use crate::error::{ConnectionError, RegistryError};
use crate::events::{
    EventDispatcher, ExecutionContext, ListenerId, ProductListener, RegistrationListener,
};
use crate::registration::{
    AuthorizationService, HttpAuthorizationService, RegistrationCache, RegistrationCheck,
    RegistrationGate, RegistrationStatus,
};
use crate::registry::{Component, ComponentKey, ComponentRegistry, ComponentSlot};
use crate::session::{Device, DeviceConnectionState, SessionController};
use crate::transport::{
    default_radio_adapter, parse_bridge_address, CableConnector, RadioAdapter, RadioConnector,
    TcpConnector, TransportConnector, TransportKind,
};
use aerolink_shared::state_machine::SessionState;
use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct SdkManagerBuilder {
    config: SdkConfig,
    authority: Option<Arc<dyn AuthorizationService>>,
    radio_adapter: Option<Arc<dyn RadioAdapter>>,
    context: ExecutionContext,
    connector: Option<Arc<dyn TransportConnector>>,
    debug_log: Option<DebugLogCapture>,
}

impl SdkManagerBuilder {
    /// Replace the HTTP authorization service
    pub fn with_authority(mut self, authority: Arc<dyn AuthorizationService>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_radio_adapter(mut self, adapter: Arc<dyn RadioAdapter>) -> Self {
        self.radio_adapter = Some(adapter);
        self
    }

    /// Where callbacks run (a dedicated thread unless set)
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Start with this connector instead of `session.default_transport`
    pub fn with_connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Share a capture that is already wired into the process subscriber
    pub fn with_debug_log(mut self, capture: DebugLogCapture) -> Self {
        self.debug_log = Some(capture);
        self
    }

    pub fn build(self) -> Result<SdkManager> {
        let config = self.config;
        config.validate()?;

        let dispatcher = EventDispatcher::new(self.context);
        let authority: Arc<dyn AuthorizationService> = match self.authority {
            Some(authority) => authority,
            None => Arc::new(
                HttpAuthorizationService::new(
                    config.registration.authority_url.clone(),
                    config.registration.request_timeout(),
                )
                .context("building the authorization client")?,
            ),
        };
        let gate = Arc::new(RegistrationGate::new(
            config.registration.clone(),
            RegistrationCache::new(config.storage.cache_dir()),
            authority,
            dispatcher.clone(),
        ));

        let radio_adapter = self.radio_adapter.unwrap_or_else(default_radio_adapter);
        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector(&config, &radio_adapter)?,
        };

        let registry = Arc::new(ComponentRegistry::new(dispatcher.clone()));
        let session = SessionController::new(
            gate.clone(),
            registry.clone(),
            dispatcher.clone(),
            connector,
            config.session.close_on_background,
        );

        let debug_log = self
            .debug_log
            .unwrap_or_else(|| DebugLogCapture::from_config(&config.storage));

        info!(
            "[SDK] aerolink {} ready (data in {})",
            SDK_VERSION,
            config.storage.data_dir().display()
        );

        Ok(SdkManager {
            config,
            dispatcher,
            gate,
            registry,
            session,
            radio_adapter,
            debug_log,
        })
    }
}

fn default_connector(
    config: &SdkConfig,
    radio_adapter: &Arc<dyn RadioAdapter>,
) -> Result<Arc<dyn TransportConnector>> {
    let connector: Arc<dyn TransportConnector> = match config.session.default_transport {
        TransportKind::Cable => Arc::new(CableConnector::new(
            config.cable.clone(),
            config.link.clone(),
        )),
        TransportKind::Wireless => Arc::new(TcpConnector::wireless(
            wireless_address(config)?,
            config.link.clone(),
        )),
        TransportKind::Radio => Arc::new(RadioConnector::new(
            radio_adapter.clone(),
            config.radio.clone(),
            config.link.clone(),
        )),
        TransportKind::Bridge => {
            return Err(anyhow!(
                "bridge cannot be the default transport; call enable_bridge_mode"
            ))
        }
    };
    Ok(connector)
}

fn wireless_address(config: &SdkConfig) -> Result<SocketAddr, ConnectionError> {
    config.wireless.address.parse().map_err(|_| {
        ConnectionError::TransportUnavailable(format!(
            "bad wireless address {:?}",
            config.wireless.address
        ))
    })
}

pub struct SdkManager {
    config: SdkConfig,
    dispatcher: EventDispatcher,
    gate: Arc<RegistrationGate>,
    registry: Arc<ComponentRegistry>,
    session: SessionController,
    radio_adapter: Arc<dyn RadioAdapter>,
    debug_log: DebugLogCapture,
}

impl SdkManager {
    pub fn builder(config: SdkConfig) -> SdkManagerBuilder {
        SdkManagerBuilder {
            config,
            authority: None,
            radio_adapter: None,
            context: ExecutionContext::default(),
            connector: None,
            debug_log: None,
        }
    }

    pub fn new(config: SdkConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    // Registration

    /// `listener` receives exactly one outcome. Needs a tokio runtime.
    pub fn register_application(&self, app_key: &str, listener: Arc<dyn RegistrationListener>) {
        self.gate.register(app_key, listener);
    }

    pub fn is_registered(&self) -> bool {
        self.gate.is_registered()
    }

    pub fn registration_status(&self) -> RegistrationStatus {
        self.gate.status()
    }

    // Session

    pub fn start_connection(&self) -> Result<(), ConnectionError> {
        self.session.start()
    }

    pub fn stop_connection(&self) {
        self.session.stop();
    }

    pub fn set_background_behavior(&self, close_on_background: bool) {
        self.session.set_background_behavior(close_on_background);
    }

    pub fn enter_background(&self) {
        self.session.enter_background();
    }

    pub fn enter_foreground(&self) {
        self.session.enter_foreground();
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn active_transport(&self) -> Option<TransportKind> {
        self.session.active_transport()
    }

    pub fn selected_transport(&self) -> TransportKind {
        self.session.selected_transport()
    }

    // Transport selection

    /// Switch to cable or wireless. Radio and bridge have their own calls.
    pub fn select_transport(&self, kind: TransportKind) -> Result<(), ConnectionError> {
        let connector: Arc<dyn TransportConnector> = match kind {
            TransportKind::Cable => Arc::new(CableConnector::new(
                self.config.cable.clone(),
                self.config.link.clone(),
            )),
            TransportKind::Wireless => Arc::new(TcpConnector::wireless(
                wireless_address(&self.config)?,
                self.config.link.clone(),
            )),
            TransportKind::Radio => {
                self.select_radio_transport()?;
                return Ok(());
            }
            TransportKind::Bridge => {
                return Err(ConnectionError::InvalidBridgeAddress(
                    "bridge mode needs an address".into(),
                ))
            }
        };
        self.session.select_transport(connector)
    }

    /// Use a caller-supplied connector for the next session
    pub fn use_connector(&self, connector: Arc<dyn TransportConnector>) -> Result<(), ConnectionError> {
        self.session.select_transport(connector)
    }

    /// Select the short-range radio. The returned connector drives pairing,
    /// which must reach `Paired` before `start_connection`.
    pub fn select_radio_transport(&self) -> Result<Arc<RadioConnector>, ConnectionError> {
        let radio = Arc::new(RadioConnector::new(
            self.radio_adapter.clone(),
            self.config.radio.clone(),
            self.config.link.clone(),
        ));
        self.session.select_transport(radio.clone())?;
        Ok(radio)
    }

    /// Route the session through a bridge at `ip` (`host` or `host:port`)
    pub fn enable_bridge_mode(&self, ip: &str) -> Result<(), ConnectionError> {
        let address = parse_bridge_address(ip, self.config.bridge.port)?;
        let connector = TcpConnector::bridge(address.ip(), address.port(), self.config.link.clone());
        self.session.select_transport(Arc::new(connector))?;
        info!("[SDK] Bridge mode via {}", address);
        Ok(())
    }

    // Products and components

    pub fn connected_product(&self) -> Option<Device> {
        self.session.connected_product()
    }

    pub fn product_connection_state(&self) -> DeviceConnectionState {
        self.session.device_state()
    }

    pub fn lookup_component(
        &self,
        key: impl Into<ComponentKey>,
        index: u32,
    ) -> Result<Component, RegistryError> {
        self.registry.lookup(&ComponentSlot::new(key, index))
    }

    pub fn components(&self) -> Vec<Component> {
        self.registry.snapshot()
    }

    // Events

    pub fn add_listener(&self, listener: Arc<dyn ProductListener>) -> ListenerId {
        self.dispatcher.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    pub fn configure_callback_context(&self, context: ExecutionContext) {
        self.dispatcher.configure(context);
    }

    /// Resolves once every event emitted so far has been delivered
    pub async fn flush_events(&self) {
        self.dispatcher.flush().await;
    }

    // Debug logs

    /// Returns false if the debug log directory is unusable
    pub fn enable_debug_log_capture(&self) -> bool {
        self.debug_log.enable()
    }

    /// Returns whether capture was on
    pub fn disable_debug_log_capture(&self) -> bool {
        self.debug_log.disable()
    }

    pub fn purge_debug_logs(&self) -> bool {
        self.debug_log.purge()
    }

    // Info

    pub fn sdk_version_string(&self) -> &'static str {
        SDK_VERSION
    }

    /// Where products' flight logs are stored
    pub fn log_directory_path(&self) -> PathBuf {
        self.config.storage.flight_log_dir()
    }
}
