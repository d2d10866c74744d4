//! Component identity and live handles

use aerolink_shared::{ComponentInfo, ComponentRef};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Kind of component a product exposes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKey {
    FlightController,
    Gimbal,
    Camera,
    Battery,
    RemoteController,
    AirLink,
    Other(String),
}

impl ComponentKey {
    pub fn as_str(&self) -> &str {
        match self {
            ComponentKey::FlightController => "flight_controller",
            ComponentKey::Gimbal => "gimbal",
            ComponentKey::Camera => "camera",
            ComponentKey::Battery => "battery",
            ComponentKey::RemoteController => "remote_controller",
            ComponentKey::AirLink => "air_link",
            ComponentKey::Other(name) => name,
        }
    }
}

impl FromStr for ComponentKey {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "flight_controller" => ComponentKey::FlightController,
            "gimbal" => ComponentKey::Gimbal,
            "camera" => ComponentKey::Camera,
            "battery" => ComponentKey::Battery,
            "remote_controller" => ComponentKey::RemoteController,
            "air_link" => ComponentKey::AirLink,
            other => ComponentKey::Other(other.to_string()),
        })
    }
}

impl From<&str> for ComponentKey {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(key) => key,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(key, index)` pair addressing one component position
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentSlot {
    pub key: ComponentKey,
    pub index: u32,
}

impl ComponentSlot {
    pub fn new(key: impl Into<ComponentKey>, index: u32) -> Self {
        Self {
            key: key.into(),
            index,
        }
    }
}

impl fmt::Display for ComponentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.key, self.index)
    }
}

impl From<ComponentRef> for ComponentSlot {
    fn from(r: ComponentRef) -> Self {
        ComponentSlot::new(r.key.as_str(), r.index)
    }
}

/// A component as described by the product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentDescriptor {
    pub slot: ComponentSlot,
    pub name: String,
}

impl ComponentDescriptor {
    pub fn new(key: impl Into<ComponentKey>, index: u32, name: impl Into<String>) -> Self {
        Self {
            slot: ComponentSlot::new(key, index),
            name: name.into(),
        }
    }
}

impl From<ComponentInfo> for ComponentDescriptor {
    fn from(info: ComponentInfo) -> Self {
        ComponentDescriptor::new(info.key.as_str(), info.index, info.name)
    }
}

/// Handle to a registered component.
///
/// Handles stay valid to hold after the component goes away; [`is_live`]
/// turns false once the slot is vacated or replaced.
///
/// [`is_live`]: Component::is_live
#[derive(Debug, Clone)]
pub struct Component {
    slot: ComponentSlot,
    name: String,
    generation: u64,
    live: Arc<AtomicBool>,
}

impl Component {
    pub(crate) fn new(descriptor: ComponentDescriptor, generation: u64) -> Self {
        Self {
            slot: descriptor.slot,
            name: descriptor.name,
            generation,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn slot(&self) -> &ComponentSlot {
        &self.slot
    }

    pub fn key(&self) -> &ComponentKey {
        &self.slot.key
    }

    pub fn index(&self) -> u32 {
        self.slot.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Increases every time the slot is filled
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.live.store(false, Ordering::Release);
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl Eq for Component {}
