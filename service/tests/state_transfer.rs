mod common;

use std::{io::Read, sync::Arc};

use common::{start_node, TIMEOUT};
use groupcomm_net::{CodecError, CodecResult};
use groupcomm_service::{
    transport::loopback::LoopbackNetwork, DecodeContext, Payload, StateTransferError, StateTransferProvider,
};

/// Reads state that an older version of the service stored in lower case
struct Uppercase;

impl DecodeContext for Uppercase {
    fn decode(self: &Self, bytes: &[u8]) -> CodecResult<Payload> {
        Ok(Payload::from_bytes(bytes.to_ascii_uppercase()))
    }
}

fn provider(bytes: Vec<u8>) -> Arc<dyn StateTransferProvider> {
    Arc::new(move || -> CodecResult<Payload> { Ok(Payload::from_bytes(bytes.clone())) })
}

#[test]
fn should_receive_nothing_as_the_first_member() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");

    let result = a.request_state("cache").unwrap().wait_timeout(TIMEOUT).unwrap();

    assert!(!result.state_received());
    assert!(result.state().is_none());
    assert!(result.error().is_none());
}

#[test]
fn should_receive_state_from_the_coordinator() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");
    a.register_state_transfer_provider("cache", provider(vec![1, 2, 3]));
    let b = start_node(&network, "B");

    let result = b.request_state("cache").unwrap().wait_timeout(TIMEOUT).unwrap();

    assert!(result.state_received());
    assert!(result.error().is_none());
    assert_eq!(result.into_state(), Some(Payload::from_bytes(vec![1, 2, 3])));
}

#[test]
fn should_give_concurrent_requests_the_same_state() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");
    a.register_state_transfer_provider("cache", provider(vec![4, 5, 6]));
    let b = start_node(&network, "B");

    let first = b.request_state("cache").unwrap();
    let second = b.request_state("cache").unwrap();

    let first = first.wait_timeout(TIMEOUT).unwrap();
    let second = second.wait_timeout(TIMEOUT).unwrap();
    assert!(first.state_received());
    assert_eq!(first.state(), second.state());
}

#[test]
fn should_stream_one_service_out_of_several() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");
    a.register_state_transfer_provider("cache", provider(vec![1, 2, 3]));
    a.register_state_transfer_provider("sessions", provider(b"alice,bob".to_vec()));
    let b = start_node(&network, "B");

    let result = b.request_state_as_stream("sessions").unwrap().wait_timeout(TIMEOUT).unwrap();
    assert!(result.state_received());

    let mut stream = result.into_state().unwrap();
    let mut sessions = String::new();
    stream.read_to_string(&mut sessions).unwrap();
    assert_eq!(sessions, "alice,bob");
}

#[test]
fn should_fail_when_the_provider_fails() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");
    a.register_state_transfer_provider(
        "cache",
        Arc::new(|| -> CodecResult<Payload> { Err(CodecError::EmptyBuffer) }),
    );
    let b = start_node(&network, "B");

    let result = b.request_state("cache").unwrap().wait_timeout(TIMEOUT).unwrap();

    assert!(!result.state_received());
    assert!(matches!(result.error(), Some(StateTransferError::Transport(_))));
}

#[test]
fn should_fail_when_nobody_can_supply_state() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");
    let b = start_node(&network, "B");
    network.set_reachable(a.cluster_node().unwrap().address(), false);

    let result = b.request_state("cache").unwrap().wait_timeout(TIMEOUT).unwrap();

    assert!(!result.state_received());
    assert_eq!(
        result.error(),
        Some(&StateTransferError::InitialTransferFailed {
            service: "cache".to_owned()
        })
    );
}

#[test]
fn should_decode_state_with_the_requested_context() {
    let network = LoopbackNetwork::new();
    let a = start_node(&network, "A");
    a.register_state_transfer_provider("cache", provider(b"abc".to_vec()));
    let b = start_node(&network, "B");

    let result = b
        .request_state_with_context("cache", Arc::new(Uppercase))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();

    assert!(result.state_received());
    assert_eq!(result.into_state(), Some(Payload::from_bytes(b"ABC".to_vec())));
}
