//! Concurrent component registry
//!
//! Readers take the shared lock only. Writers hold the exclusive lock while
//! they both mutate the table and enqueue the matching events, so anyone who
//! can observe a change has its event already queued behind it.

use super::component::{Component, ComponentDescriptor, ComponentSlot};
use crate::error::RegistryError;
use crate::events::{EventDispatcher, ProductEvent};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// What a delta actually changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeltaReport {
    pub connected: Vec<ComponentSlot>,
    pub disconnected: Vec<ComponentSlot>,
}

impl DeltaReport {
    pub fn is_empty(&self) -> bool {
        self.connected.is_empty() && self.disconnected.is_empty()
    }
}

#[derive(Default)]
struct Table {
    components: BTreeMap<ComponentSlot, Component>,
    next_generation: u64,
}

pub struct ComponentRegistry {
    table: RwLock<Table>,
    dispatcher: EventDispatcher,
}

impl ComponentRegistry {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            dispatcher,
        }
    }

    pub fn lookup(&self, slot: &ComponentSlot) -> Result<Component, RegistryError> {
        self.table
            .read()
            .components
            .get(slot)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                key: slot.key.to_string(),
                index: slot.index,
            })
    }

    /// Components in slot order
    pub fn snapshot(&self) -> Vec<Component> {
        self.table.read().components.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply_delta(
        &self,
        added: &[ComponentDescriptor],
        removed: &[ComponentSlot],
    ) -> DeltaReport {
        self.apply_delta_after(None, added, removed)
    }

    /// Apply a delta, queueing `prelude` ahead of the component events.
    ///
    /// Removals go first. An added slot that is still occupied is replaced:
    /// the old handle is invalidated and a disconnect precedes the connect.
    pub(crate) fn apply_delta_after(
        &self,
        prelude: Option<ProductEvent>,
        added: &[ComponentDescriptor],
        removed: &[ComponentSlot],
    ) -> DeltaReport {
        let mut table = self.table.write();
        let mut report = DeltaReport::default();

        if let Some(event) = prelude {
            self.dispatcher.emit(event);
        }

        for slot in removed {
            match table.components.remove(slot) {
                Some(component) => {
                    component.invalidate();
                    self.dispatcher
                        .emit(ProductEvent::ComponentDisconnected(slot.clone()));
                    report.disconnected.push(slot.clone());
                }
                None => debug!("[REGISTRY] Ignoring removal of vacant slot {}", slot),
            }
        }

        for descriptor in dedup_last_wins(added) {
            let slot = descriptor.slot.clone();
            table.next_generation += 1;
            let component = Component::new(descriptor.clone(), table.next_generation);

            if let Some(previous) = table.components.insert(slot.clone(), component) {
                previous.invalidate();
                self.dispatcher
                    .emit(ProductEvent::ComponentDisconnected(slot.clone()));
                report.disconnected.push(slot.clone());
            }
            self.dispatcher
                .emit(ProductEvent::ComponentConnected(slot.clone()));
            report.connected.push(slot);
        }

        if !report.is_empty() {
            debug!(
                "[REGISTRY] +{} -{} ({} live)",
                report.connected.len(),
                report.disconnected.len(),
                table.components.len()
            );
        }
        report
    }

    /// Vacate every slot, then queue `postlude` after the disconnects
    pub(crate) fn clear_then(&self, postlude: Option<ProductEvent>) -> Vec<ComponentSlot> {
        let mut table = self.table.write();
        let drained = std::mem::take(&mut table.components);

        let mut slots = Vec::with_capacity(drained.len());
        for (slot, component) in drained {
            component.invalidate();
            self.dispatcher
                .emit(ProductEvent::ComponentDisconnected(slot.clone()));
            slots.push(slot);
        }

        if let Some(event) = postlude {
            self.dispatcher.emit(event);
        }
        slots
    }

    pub fn clear(&self) -> Vec<ComponentSlot> {
        self.clear_then(None)
    }
}

/// Check a descriptor list for slots listed more than once
pub fn find_duplicate(components: &[ComponentDescriptor]) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for descriptor in components {
        if !seen.insert(&descriptor.slot) {
            return Err(RegistryError::DuplicateSlot {
                key: descriptor.slot.key.to_string(),
                index: descriptor.slot.index,
            });
        }
    }
    Ok(())
}

fn dedup_last_wins(added: &[ComponentDescriptor]) -> Vec<&ComponentDescriptor> {
    if let Err(e) = find_duplicate(added) {
        warn!("[REGISTRY] {}; keeping the last entry", e);
    }

    let mut seen = HashSet::new();
    let mut kept: Vec<&ComponentDescriptor> = added
        .iter()
        .rev()
        .filter(|d| seen.insert(&d.slot))
        .collect();
    kept.reverse();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ExecutionContext, ProductListener};
    use crate::registry::ComponentKey;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl ProductListener for Log {
        fn product_disconnected(&self, identity: &str) {
            self.0.lock().push(format!("gone {}", identity));
        }
        fn component_connected(&self, slot: &ComponentSlot) {
            self.0.lock().push(format!("+{}", slot));
        }
        fn component_disconnected(&self, slot: &ComponentSlot) {
            self.0.lock().push(format!("-{}", slot));
        }
    }

    fn registry() -> (ComponentRegistry, EventDispatcher, Arc<Log>) {
        let dispatcher = EventDispatcher::new(ExecutionContext::Tokio(Handle::current()));
        let log = Arc::new(Log::default());
        dispatcher.add_listener(log.clone());
        (ComponentRegistry::new(dispatcher.clone()), dispatcher, log)
    }

    fn gimbal(index: u32) -> ComponentDescriptor {
        ComponentDescriptor::new(ComponentKey::Gimbal, index, format!("Gimbal {}", index))
    }

    #[tokio::test]
    async fn test_lookup_follows_deltas() {
        let (registry, dispatcher, log) = registry();
        let slot = ComponentSlot::new(ComponentKey::Gimbal, 0);

        assert_eq!(
            registry.lookup(&slot),
            Err(RegistryError::NotFound {
                key: "gimbal".into(),
                index: 0
            })
        );

        registry.apply_delta(&[gimbal(0)], &[]);
        let component = registry.lookup(&slot).unwrap();
        assert!(component.is_live());
        assert_eq!(component.name(), "Gimbal 0");

        registry.apply_delta(&[], &[slot.clone()]);
        assert!(registry.lookup(&slot).is_err());
        assert!(!component.is_live());

        dispatcher.flush().await;
        assert_eq!(log.0.lock().as_slice(), &["+gimbal[0]", "-gimbal[0]"]);
    }

    #[tokio::test]
    async fn test_swap_in_one_delta_replaces_slot() {
        let (registry, dispatcher, log) = registry();
        registry.apply_delta(&[gimbal(0)], &[]);
        let old = registry.lookup(&ComponentSlot::new(ComponentKey::Gimbal, 0)).unwrap();

        let replacement = ComponentDescriptor::new(ComponentKey::Gimbal, 0, "Zoom gimbal");
        let report = registry.apply_delta(
            &[replacement],
            &[ComponentSlot::new(ComponentKey::Gimbal, 0)],
        );

        let new = registry.lookup(&ComponentSlot::new(ComponentKey::Gimbal, 0)).unwrap();
        assert!(!old.is_live());
        assert!(new.is_live());
        assert_ne!(old, new);
        assert_eq!(report.connected.len(), 1);
        assert_eq!(report.disconnected.len(), 1);

        dispatcher.flush().await;
        assert_eq!(
            log.0.lock().as_slice(),
            &["+gimbal[0]", "-gimbal[0]", "+gimbal[0]"]
        );
    }

    #[tokio::test]
    async fn test_re_adding_occupied_slot_disconnects_first() {
        let (registry, dispatcher, log) = registry();
        registry.apply_delta(&[gimbal(0)], &[]);
        registry.apply_delta(&[gimbal(0)], &[]);
        assert_eq!(registry.len(), 1);

        dispatcher.flush().await;
        assert_eq!(
            log.0.lock().as_slice(),
            &["+gimbal[0]", "-gimbal[0]", "+gimbal[0]"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_slots_resolve_last_wins() {
        let (registry, _dispatcher, _log) = registry();
        let first = ComponentDescriptor::new(ComponentKey::Camera, 0, "first");
        let second = ComponentDescriptor::new(ComponentKey::Camera, 0, "second");
        assert!(find_duplicate(&[first.clone(), second.clone()]).is_err());

        registry.apply_delta(&[first, second], &[]);
        let camera = registry.lookup(&ComponentSlot::new(ComponentKey::Camera, 0)).unwrap();
        assert_eq!(camera.name(), "second");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_then_orders_postlude_last() {
        let (registry, dispatcher, log) = registry();
        registry.apply_delta(&[gimbal(1), gimbal(0)], &[]);

        let cleared = registry.clear_then(Some(ProductEvent::Disconnected {
            identity: "AC-1".into(),
        }));
        assert_eq!(cleared.len(), 2);
        assert!(registry.is_empty());

        dispatcher.flush().await;
        assert_eq!(
            log.0.lock().as_slice(),
            &["+gimbal[1]", "+gimbal[0]", "-gimbal[0]", "-gimbal[1]", "gone AC-1"]
        );
    }

    #[test]
    fn test_readers_never_see_a_half_applied_delta() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;

        let registry = Arc::new(ComponentRegistry::new(EventDispatcher::new(
            ExecutionContext::Dedicated,
        )));
        let gimbals: Vec<_> = (0..4).map(gimbal).collect();
        let cameras: Vec<_> = (0..4)
            .map(|i| ComponentDescriptor::new(ComponentKey::Camera, i, format!("Camera {}", i)))
            .collect();
        let slots = |set: &[ComponentDescriptor]| -> Vec<ComponentSlot> {
            set.iter().map(|d| d.slot.clone()).collect()
        };
        let (gimbal_slots, camera_slots) = (slots(&gimbals[..]), slots(&cameras[..]));
        registry.apply_delta(&gimbals, &[]);

        let stop = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let stop = stop.clone();
                let (gimbal_slots, camera_slots) = (gimbal_slots.clone(), camera_slots.clone());
                thread::spawn(move || {
                    let mut reads = 0usize;
                    loop {
                        let seen: Vec<ComponentSlot> = registry
                            .snapshot()
                            .iter()
                            .map(|c| c.slot().clone())
                            .collect();
                        assert!(
                            seen == gimbal_slots || seen == camera_slots,
                            "partial set {:?}",
                            seen
                        );
                        assert_eq!(registry.len(), 4);
                        for slot in gimbal_slots.iter().chain(&camera_slots) {
                            if let Ok(component) = registry.lookup(slot) {
                                assert_eq!(component.slot(), slot);
                            }
                        }
                        reads += 1;
                        if stop.load(Ordering::Acquire) {
                            return reads;
                        }
                    }
                })
            })
            .collect();

        for round in 0..200 {
            if round % 2 == 0 {
                registry.apply_delta(&cameras, &gimbal_slots);
            } else {
                registry.apply_delta(&gimbals, &camera_slots);
            }
        }
        stop.store(true, Ordering::Release);

        for reader in readers {
            assert!(reader.join().unwrap() >= 1);
        }
        assert_eq!(
            registry.snapshot().iter().map(|c| c.slot().clone()).collect::<Vec<_>>(),
            gimbal_slots
        );
    }
}
