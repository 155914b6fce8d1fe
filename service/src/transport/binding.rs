use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

use groupcomm_net::Address;

use crate::{
    errors::{ServiceError, ServiceResult},
    model::node::{ClusterNode, NodeFactory},
};

use super::Transport;

/// Holds the transport a service runs on and the identity of the local node within it.
/// `self_connected` records whether the service made the connection, and therefore whether
/// it must tear the connection down again when it stops.
pub(crate) struct TransportBinding {
    transport: RwLock<Option<Arc<dyn Transport>>>,
    self_connected: AtomicBool,
    node_factory: NodeFactory,
    local_node: RwLock<Option<ClusterNode>>,
}

impl TransportBinding {
    pub(crate) fn new() -> Self {
        Self {
            transport: RwLock::new(None),
            self_connected: AtomicBool::new(false),
            node_factory: NodeFactory::new(),
            local_node: RwLock::new(None),
        }
    }

    pub(crate) fn transport(self: &Self) -> ServiceResult<Arc<dyn Transport>> {
        self.transport.read().unwrap().clone().ok_or(ServiceError::NotConnected)
    }

    pub(crate) fn current(self: &Self) -> Option<Arc<dyn Transport>> {
        self.transport.read().unwrap().clone()
    }

    pub(crate) fn attach(self: &Self, transport: Arc<dyn Transport>) {
        *self.transport.write().unwrap() = Some(transport);
    }

    pub(crate) fn detach(self: &Self) -> Option<Arc<dyn Transport>> {
        self.self_connected.store(false, Ordering::Relaxed);
        self.transport.write().unwrap().take()
    }

    pub(crate) fn is_self_connected(self: &Self) -> bool {
        self.self_connected.load(Ordering::Relaxed)
    }

    pub(crate) fn set_self_connected(self: &Self, self_connected: bool) {
        self.self_connected.store(self_connected, Ordering::Relaxed);
    }

    pub(crate) fn cluster_node(self: &Self, address: &Address) -> ServiceResult<ClusterNode> {
        let transport = self.transport()?;
        self.node_factory.resolve(address, transport.as_ref())
    }

    /// True when the node was produced by this binding's node factory
    pub(crate) fn owns(self: &Self, node: &ClusterNode) -> bool {
        self.node_factory.owns(node)
    }

    pub(crate) fn resolve_local_node(self: &Self) -> ServiceResult<ClusterNode> {
        let transport = self.transport()?;
        let address = transport.local_address().ok_or(ServiceError::NotConnected)?;
        let node = self.node_factory.resolve(&address, transport.as_ref())?;
        *self.local_node.write().unwrap() = Some(node.clone());
        Ok(node)
    }

    pub(crate) fn local_node(self: &Self) -> Option<ClusterNode> {
        self.local_node.read().unwrap().clone()
    }

    pub(crate) fn clear_local_node(self: &Self) {
        *self.local_node.write().unwrap() = None;
    }

    pub(crate) fn is_local(self: &Self, node: &ClusterNode) -> bool {
        self.local_node.read().unwrap().as_ref() == Some(node)
    }
}
