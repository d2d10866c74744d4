mod common;

use aerolink::registry::ComponentKey;
use aerolink::{
    ChannelListener, ConnectionError, ProductEvent, ProductPresence, RegistryError, SdkEvent,
    SessionState,
};
use common::*;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn start_before_registration_fails_without_transition() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());

    assert_eq!(sdk.start_connection(), Err(ConnectionError::NotRegistered));
    assert_eq!(sdk.session_state(), SessionState::Idle);
    assert_eq!(connector.activations(), 0);
}

#[tokio::test]
async fn second_start_while_starting_fails() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    sdk.start_connection().unwrap();
    assert_eq!(sdk.start_connection(), Err(ConnectionError::AlreadyConnecting));
    assert_eq!(sdk.session_state(), SessionState::Starting);
    assert_eq!(connector.activations(), 1);
}

#[tokio::test]
async fn cached_registration_skips_the_network() {
    let dir = TempDir::new().unwrap();
    let authority = Arc::new(CountingAuthority::default());

    let first = manager(dir.path(), authority.clone(), Arc::default());
    register(&first).await;
    assert_eq!(authority.calls(), 1);

    // Same manager, then a fresh one over the same data directory
    register(&first).await;
    let second = manager(dir.path(), authority.clone(), Arc::default());
    register(&second).await;

    assert_eq!(authority.calls(), 1);
    assert!(second.is_registered());
}

#[tokio::test]
async fn delta_scenario_swaps_battery_for_camera() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    let (listener, mut rx) = ChannelListener::new();
    sdk.add_listener(listener);

    connector.plug("AC-0001", &[("gimbal", 0), ("battery", 0)]);
    sdk.start_connection().unwrap();

    assert!(matches!(
        next_event(&mut rx).await,
        SdkEvent::Product(ProductEvent::Connected(device)) if device.identity == "AC-0001"
    ));
    let mut connected = vec![next_event(&mut rx).await, next_event(&mut rx).await];
    connected.sort_by_key(|e| format!("{:?}", e));
    assert_eq!(
        connected,
        vec![
            SdkEvent::Product(ProductEvent::ComponentConnected(aerolink::ComponentSlot::new(
                "battery", 0
            ))),
            SdkEvent::Product(ProductEvent::ComponentConnected(aerolink::ComponentSlot::new(
                "gimbal", 0
            ))),
        ]
    );

    let battery = sdk.lookup_component(ComponentKey::Battery, 0).unwrap();
    connector.delta(&[("camera", 0)], &[("battery", 0)]);

    assert_eq!(
        next_event(&mut rx).await,
        SdkEvent::Product(ProductEvent::ComponentDisconnected(aerolink::ComponentSlot::new(
            "battery", 0
        )))
    );
    assert_eq!(
        next_event(&mut rx).await,
        SdkEvent::Product(ProductEvent::ComponentConnected(aerolink::ComponentSlot::new(
            "camera", 0
        )))
    );

    assert!(!battery.is_live());
    assert_eq!(
        sdk.lookup_component(ComponentKey::Battery, 0),
        Err(RegistryError::NotFound {
            key: "battery".into(),
            index: 0
        })
    );
    assert!(sdk.lookup_component(ComponentKey::Camera, 0).unwrap().is_live());
    assert!(sdk.lookup_component(ComponentKey::Gimbal, 0).unwrap().is_live());

    let product = sdk.connected_product().unwrap();
    let mut slots: Vec<String> = product
        .capabilities
        .components
        .iter()
        .map(|c| c.slot.to_string())
        .collect();
    slots.sort();
    assert_eq!(slots, vec!["camera[0]", "gimbal[0]"]);
}

#[tokio::test]
async fn re_added_slot_returns_newest_component() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    connector.plug("AC-0001", &[("gimbal", 0)]);
    sdk.start_connection().unwrap();
    wait_until(|| sdk.lookup_component(ComponentKey::Gimbal, 0).is_ok()).await;
    let original = sdk.lookup_component(ComponentKey::Gimbal, 0).unwrap();

    connector.delta(&[], &[("gimbal", 0)]);
    wait_until(|| sdk.lookup_component(ComponentKey::Gimbal, 0).is_err()).await;

    connector.delta(&[("gimbal", 0)], &[]);
    wait_until(|| sdk.lookup_component(ComponentKey::Gimbal, 0).is_ok()).await;
    let newest = sdk.lookup_component(ComponentKey::Gimbal, 0).unwrap();

    assert!(newest.generation() > original.generation());
    assert!(!original.is_live());
    assert!(newest.is_live());
}

#[tokio::test]
async fn device_loss_keeps_session_and_reappearance_repopulates() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    connector.plug("AC-0001", &[("gimbal", 0), ("battery", 0)]);
    sdk.start_connection().unwrap();
    wait_until(|| sdk.session_state().is_product_connected()).await;
    let gimbal = sdk.lookup_component(ComponentKey::Gimbal, 0).unwrap();

    connector.unplug("cable pulled");
    wait_until(|| sdk.session_state() == SessionState::Active(ProductPresence::NoProduct)).await;

    assert!(!gimbal.is_live());
    assert!(sdk.components().is_empty());
    assert!(sdk.connected_product().is_none());

    connector.plug("AC-0001", &[("gimbal", 0), ("battery", 0)]);
    wait_until(|| sdk.session_state().is_product_connected()).await;

    assert_eq!(sdk.components().len(), 2);
    assert_eq!(connector.activations(), 1);
}

#[tokio::test]
async fn stop_emits_component_losses_before_product_loss() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    connector.plug("AC-0001", &[("gimbal", 0), ("battery", 0)]);
    sdk.start_connection().unwrap();
    wait_until(|| sdk.components().len() == 2).await;
    sdk.flush_events().await;

    let (listener, mut rx) = ChannelListener::new();
    sdk.add_listener(listener);
    sdk.stop_connection();

    for _ in 0..2 {
        assert!(matches!(
            next_event(&mut rx).await,
            SdkEvent::Product(ProductEvent::ComponentDisconnected(_))
        ));
    }
    assert_eq!(
        next_event(&mut rx).await,
        SdkEvent::Product(ProductEvent::Disconnected {
            identity: "AC-0001".into()
        })
    );
    assert_eq!(sdk.session_state(), SessionState::Idle);
    assert!(sdk.components().is_empty());
}

#[tokio::test]
async fn background_round_trip_restores_product() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    connector.plug("AC-0001", &[("gimbal", 0)]);
    sdk.start_connection().unwrap();
    wait_until(|| sdk.session_state().is_product_connected()).await;

    sdk.enter_background();
    assert_eq!(sdk.session_state(), SessionState::Idle);
    assert!(sdk.components().is_empty());
    assert!(sdk.is_registered());

    sdk.enter_foreground();
    wait_until(|| sdk.session_state().is_product_connected()).await;

    assert!(sdk.is_registered());
    assert_eq!(connector.activations(), 2);
    assert!(sdk.lookup_component(ComponentKey::Gimbal, 0).is_ok());
}

#[tokio::test]
async fn foreground_without_background_stop_does_nothing() {
    let dir = TempDir::new().unwrap();
    let connector = Arc::new(ScriptedConnector::default());
    let sdk = manager(dir.path(), Arc::default(), connector.clone());
    register(&sdk).await;

    sdk.set_background_behavior(false);
    sdk.start_connection().unwrap();
    sdk.enter_background();
    sdk.stop_connection();
    sdk.enter_foreground();

    assert_eq!(sdk.session_state(), SessionState::Idle);
    assert_eq!(connector.activations(), 1);
}
