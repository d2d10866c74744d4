//! aerolink: connection and component lifecycle manager for externally
//! attached drone products.
//!
//! Construct an [`SdkManager`], register an app key, pick a transport and
//! start a connection. Product and component events arrive on the listeners
//! added to the manager.

pub mod config;
pub mod debug_log;
pub mod error;
pub mod events;
pub mod registration;
pub mod registry;
pub mod sdk;
pub mod session;
pub mod transport;

pub use config::{LogRotation, SdkConfig};
pub use debug_log::DebugLogCapture;
pub use error::{ConfigError, ConnectionError, PairingError, RegistrationError, RegistryError};
pub use events::{
    ChannelListener, EventDispatcher, ExecutionContext, ListenerId, ProductEvent,
    ProductListener, RegistrationListener, RegistrationOutcome, SdkEvent,
};
pub use registration::{RegisteredInfo, RegistrationStatus};
pub use registry::{Component, ComponentKey, ComponentSlot};
pub use sdk::{SdkManager, SdkManagerBuilder};
pub use session::{Device, DeviceConnectionState, ProductFamily};
pub use transport::{TransportConnector, TransportKind};

pub use aerolink_shared::state_machine::{ProductPresence, SessionState};
