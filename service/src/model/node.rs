use std::{
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use groupcomm_net::Address;

use crate::{
    errors::{ServiceError, ServiceResult},
    transport::Transport,
};

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

/// A member of the group as seen by applications. Two nodes are the same node when they
/// share a socket address, even if the transport gave them different addresses.
#[derive(Debug, Clone)]
pub struct ClusterNode {
    name: String,
    address: Address,
    socket_address: SocketAddr,
    origin: u64,
}

impl ClusterNode {
    pub fn name(self: &Self) -> &str { &self.name }
    pub fn address(self: &Self) -> &Address { &self.address }
    pub fn socket_address(self: &Self) -> SocketAddr { self.socket_address }

    pub(crate) fn new(name: String, address: Address, socket_address: SocketAddr, origin: u64) -> Self {
        Self {
            name,
            address,
            socket_address,
            origin,
        }
    }
}

impl PartialEq for ClusterNode {
    fn eq(&self, other: &Self) -> bool {
        self.socket_address == other.socket_address
    }
}

impl Eq for ClusterNode {}

impl Hash for ClusterNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.socket_address.hash(state);
    }
}

impl fmt::Display for ClusterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Translates transport addresses into cluster nodes, remembering every node it has made.
/// Each factory has its own id which is stamped on the nodes it makes.
pub(crate) struct NodeFactory {
    id: u64,
    nodes: Mutex<HashMap<Address, ClusterNode>>,
}

impl NodeFactory {
    pub(crate) fn new() -> Self {
        Self {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn owns(self: &Self, node: &ClusterNode) -> bool {
        node.origin == self.id
    }

    pub(crate) fn resolve(self: &Self, address: &Address, transport: &dyn Transport) -> ServiceResult<ClusterNode> {
        if let Some(node) = self.nodes.lock().unwrap().get(address) {
            return Ok(node.clone());
        }

        let socket_address = transport
            .physical_address(address)
            .ok_or_else(|| ServiceError::UnresolvedAddress(address.clone()))?;
        let name = transport
            .logical_name(address)
            .unwrap_or_else(|| format!("{}:{}", socket_address.ip(), socket_address.port()));

        let node = ClusterNode::new(name, address.clone(), socket_address, self.id);
        let mut nodes = self.nodes.lock().unwrap();
        Ok(nodes.entry(address.clone()).or_insert(node).clone())
    }
}
