pub mod component;
pub mod store;

pub use component::{Component, ComponentDescriptor, ComponentKey, ComponentSlot};
pub use store::{find_duplicate, ComponentRegistry, DeltaReport};
