//! The simulated product a bridge announces

use aerolink_shared::{
    ComponentDelta, ComponentInfo, ComponentRef, DeviceAnnounce, ProductFamily,
};

const PAYLOAD_KEY: &str = "gimbal";
const PAYLOAD_INDEX: u32 = 1;

#[derive(Debug, Clone)]
pub struct SimulatedProduct {
    pub identity: String,
    pub model: String,
    pub firmware: String,
    /// Whether the swappable second gimbal is mounted
    payload_mounted: bool,
}

impl SimulatedProduct {
    pub fn new(identity: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            model: model.into(),
            firmware: "1.0.0".into(),
            payload_mounted: false,
        }
    }

    fn components(&self) -> Vec<ComponentInfo> {
        let mut components = vec![
            ComponentInfo::new("flight_controller", 0, "Flight controller"),
            ComponentInfo::new("gimbal", 0, "Main gimbal"),
            ComponentInfo::new("camera", 0, "Main camera"),
            ComponentInfo::new("battery", 0, "Battery"),
        ];
        if self.payload_mounted {
            components.push(payload());
        }
        components
    }

    pub fn announce(&self) -> DeviceAnnounce {
        DeviceAnnounce {
            model: self.model.clone(),
            firmware: self.firmware.clone(),
            family: ProductFamily::FamilyAircraft.into(),
            components: self.components(),
        }
    }

    /// Mount or unmount the payload gimbal
    pub fn swap(&mut self) -> ComponentDelta {
        self.payload_mounted = !self.payload_mounted;
        if self.payload_mounted {
            ComponentDelta {
                added: vec![payload()],
                removed: Vec::new(),
            }
        } else {
            ComponentDelta {
                added: Vec::new(),
                removed: vec![ComponentRef::new(PAYLOAD_KEY, PAYLOAD_INDEX)],
            }
        }
    }
}

fn payload() -> ComponentInfo {
    ComponentInfo::new(PAYLOAD_KEY, PAYLOAD_INDEX, "Payload gimbal")
}
