/// Logical identity of a group member and the factory that resolves transport addresses
pub mod node;

/// Immutable snapshots of group membership
pub mod view;

pub use node::ClusterNode;
pub use view::GroupView;
