mod common;

use std::time::Duration;

use common::{answers, naming_handler, service_on, test_config};
use groupcomm_service::{
    transport::{loopback::LoopbackNetwork, Transport},
    CallOptions, GroupCommunicationService, Payload, ServiceConfig, ServiceError, ServiceState,
};

#[test]
fn should_require_a_scope_id() {
    let network = LoopbackNetwork::new();
    let config = ServiceConfig {
        scope_id: None,
        ..test_config()
    };
    let service = GroupCommunicationService::builder()
        .with_config(config)
        .with_transport_factory(network.factory("A"))
        .build();

    assert!(matches!(service.start(), Err(ServiceError::Configuration(_))));
    assert_eq!(service.state(), ServiceState::Failed);
    assert!(network.members().is_empty());
}

#[test]
fn should_require_a_transport_or_a_factory() {
    let service = GroupCommunicationService::builder().with_config(test_config()).build();

    assert!(matches!(service.start(), Err(ServiceError::Configuration(_))));
    assert_eq!(service.state(), ServiceState::Failed);
}

#[test]
fn should_move_through_lifecycle_states() {
    let network = LoopbackNetwork::new();
    let service = service_on(&network, "A");
    assert_eq!(service.state(), ServiceState::Unregistered);

    service.create();
    assert_eq!(service.state(), ServiceState::Created);

    service.start().unwrap();
    service.start().unwrap();
    assert_eq!(service.state(), ServiceState::Started);
    assert_eq!(service.node_name().as_deref(), Some("A"));
    assert_eq!(network.members().len(), 1);

    service.stop();
    assert_eq!(service.state(), ServiceState::Stopped);
    assert!(network.members().is_empty());
    assert!(service.cluster_node().is_none());
    assert!(service.current_view().is_empty());

    service.destroy();
    assert_eq!(service.state(), ServiceState::Destroyed);
    assert!(matches!(service.request_state("cache"), Err(ServiceError::Destroyed)));
}

#[test]
fn should_rejoin_after_restart() {
    let network = LoopbackNetwork::new();
    let a = service_on(&network, "A");
    a.register_rpc_handler("echo", naming_handler("A"));
    a.start().unwrap();
    let first_view = a.current_view_id();

    a.destroy();
    a.start().unwrap();

    assert_eq!(a.state(), ServiceState::Started);
    assert!(a.current_view_id() > first_view);
    let results = a
        .call_on_cluster("echo", "ping", &Payload::default(), None, &CallOptions::new())
        .unwrap();
    assert_eq!(answers(&results), vec!["A:ping".to_owned()]);
}

#[test]
fn should_leave_a_connection_it_did_not_make() {
    let network = LoopbackNetwork::new();
    let transport = network.create_transport("A");
    transport.connect("test-group").unwrap();

    let service = GroupCommunicationService::builder()
        .with_config(test_config())
        .with_transport(transport.clone())
        .build();
    service.start().unwrap();

    assert_eq!(service.current_view(), vec!["A".to_owned()]);
    assert_eq!(service.current_view_id(), network.view_id());
    assert!(service.is_current_node_coordinator());

    service.stop();
    assert!(transport.is_connected());
    assert_eq!(network.members().len(), 1);
}

#[test]
fn should_expose_configured_values() {
    let network = LoopbackNetwork::new();
    let service = service_on(&network, "A");

    assert_eq!(service.group_name(), "test-group");
    assert_eq!(service.scope_id(), Some(7));
    assert_eq!(service.method_call_timeout(), Duration::from_secs(2));
    assert_eq!(service.state_transfer_timeout(), Duration::from_secs(2));
    assert!(service.node_name().is_none());
}
