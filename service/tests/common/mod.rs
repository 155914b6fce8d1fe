#![allow(dead_code)]

use std::{
    sync::{Arc, Condvar, Mutex},
    time::{Duration, Instant},
};

use groupcomm_service::{
    transport::loopback::LoopbackNetwork, ClusterNode, GroupCommunicationService, GroupMembershipListener,
    Payload, RpcHandler, RpcResult, ServiceConfig,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> ServiceConfig {
    ServiceConfig::default()
        .with_group_name("test-group")
        .with_scope_id(7)
        .with_method_call_timeout(Duration::from_secs(2))
        .with_state_transfer_timeout(Duration::from_secs(2))
        .with_synchronous_notifications(true)
}

/// A service that joins through a transport made by the network's factory
pub fn service_on(network: &Arc<LoopbackNetwork>, name: &str) -> GroupCommunicationService {
    GroupCommunicationService::builder()
        .with_config(test_config())
        .with_transport_factory(network.factory(name))
        .build()
}

pub fn start_node(network: &Arc<LoopbackNetwork>, name: &str) -> GroupCommunicationService {
    let service = service_on(network, name);
    service.start().unwrap();
    service
}

/// Answers every call with "<node>:<method>"
pub fn naming_handler(node_name: &str) -> Arc<dyn RpcHandler> {
    let node_name = node_name.to_owned();
    Arc::new(move |method_name: &str, _args: &Payload| -> RpcResult {
        Ok(Payload::encode(&format!("{node_name}:{method_name}")).ok())
    })
}

pub fn answers(results: &[RpcResult]) -> Vec<String> {
    let mut answers: Vec<String> = results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .filter_map(|value| value.as_ref())
        .map(|payload| payload.decode::<String>().unwrap())
        .collect();
    answers.sort();
    answers
}

pub fn names(nodes: &[ClusterNode]) -> Vec<String> {
    nodes.iter().map(|node| node.name().to_owned()).collect()
}

/// Polls until the condition holds or the timeout passes
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[derive(Debug, Clone, PartialEq)]
pub struct MembershipChange {
    pub dead: Vec<String>,
    pub new: Vec<String>,
    pub all: Vec<String>,
    pub originating_groups: Option<Vec<Vec<String>>>,
}

#[derive(Default)]
pub struct RecordingListener {
    changes: Mutex<Vec<MembershipChange>>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits until at least `count` changes have been recorded
    pub fn await_changes(self: &Self, count: usize) -> Vec<MembershipChange> {
        let changes = self.changes.lock().unwrap();
        let (changes, _) = self
            .changed
            .wait_timeout_while(changes, TIMEOUT, |changes| changes.len() < count)
            .unwrap();
        changes.clone()
    }

    pub fn changes(self: &Self) -> Vec<MembershipChange> {
        self.changes.lock().unwrap().clone()
    }

    fn record(self: &Self, change: MembershipChange) {
        self.changes.lock().unwrap().push(change);
        self.changed.notify_all();
    }
}

impl GroupMembershipListener for RecordingListener {
    fn membership_changed(self: &Self, dead: &[ClusterNode], new: &[ClusterNode], all: &[ClusterNode]) {
        self.record(MembershipChange {
            dead: names(dead),
            new: names(new),
            all: names(all),
            originating_groups: None,
        });
    }

    fn membership_changed_during_merge(
        self: &Self,
        dead: &[ClusterNode],
        new: &[ClusterNode],
        all: &[ClusterNode],
        originating_groups: &[Vec<ClusterNode>],
    ) {
        self.record(MembershipChange {
            dead: names(dead),
            new: names(new),
            all: names(all),
            originating_groups: Some(originating_groups.iter().map(|group| names(group)).collect()),
        });
    }
}
