//! The attached product as seen by the application

use crate::registry::{find_duplicate, ComponentDescriptor, ComponentSlot};
use crate::error::RegistryError;
use crate::transport::TransportKind;
use aerolink_shared::state_machine::{ProductPresence, SessionState};
use aerolink_shared::{DeviceAnnounce, ProductFamily as WireFamily};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductFamily {
    Aircraft,
    Handheld,
    Unknown,
}

impl From<i32> for ProductFamily {
    fn from(raw: i32) -> Self {
        match WireFamily::try_from(raw) {
            Ok(WireFamily::FamilyAircraft) => ProductFamily::Aircraft,
            Ok(WireFamily::FamilyHandheld) => ProductFamily::Handheld,
            _ => ProductFamily::Unknown,
        }
    }
}

impl fmt::Display for ProductFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductFamily::Aircraft => write!(f, "aircraft"),
            ProductFamily::Handheld => write!(f, "handheld"),
            ProductFamily::Unknown => write!(f, "unknown"),
        }
    }
}

/// What a product declares about itself when it appears
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    pub model: String,
    pub firmware: String,
    pub family: ProductFamily,
    pub components: Vec<ComponentDescriptor>,
}

impl CapabilityDescriptor {
    pub fn validate(&self) -> Result<(), RegistryError> {
        find_duplicate(&self.components)
    }

    /// Slots to add and remove to get from `self` to `next`
    pub fn diff(&self, next: &CapabilityDescriptor) -> (Vec<ComponentDescriptor>, Vec<ComponentSlot>) {
        let current: BTreeMap<&ComponentSlot, &ComponentDescriptor> =
            self.components.iter().map(|d| (&d.slot, d)).collect();
        let wanted: BTreeMap<&ComponentSlot, &ComponentDescriptor> =
            next.components.iter().map(|d| (&d.slot, d)).collect();

        let removed = current
            .keys()
            .filter(|slot| !wanted.contains_key(*slot))
            .map(|slot| (*slot).clone())
            .collect();

        let added = wanted
            .iter()
            .filter(|(slot, descriptor)| current.get(*slot) != Some(*descriptor))
            .map(|(_, descriptor)| (*descriptor).clone())
            .collect();

        (added, removed)
    }
}

impl From<DeviceAnnounce> for CapabilityDescriptor {
    fn from(announce: DeviceAnnounce) -> Self {
        Self {
            model: announce.model,
            firmware: announce.firmware,
            family: ProductFamily::from(announce.family),
            components: announce.components.into_iter().map(Into::into).collect(),
        }
    }
}

/// Product connectivity as an application sees it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl From<SessionState> for DeviceConnectionState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Starting => DeviceConnectionState::Connecting,
            SessionState::Active(ProductPresence::ProductConnected) => {
                DeviceConnectionState::Connected
            }
            SessionState::Idle
            | SessionState::Active(ProductPresence::NoProduct)
            | SessionState::Stopping => DeviceConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub identity: String,
    pub capabilities: CapabilityDescriptor,
    pub transport: TransportKind,
}

impl Device {
    pub fn new(
        identity: impl Into<String>,
        capabilities: CapabilityDescriptor,
        transport: TransportKind,
    ) -> Self {
        Self {
            identity: identity.into(),
            capabilities,
            transport,
        }
    }

    pub fn model(&self) -> &str {
        &self.capabilities.model
    }
}
