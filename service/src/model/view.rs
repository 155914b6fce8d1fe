use groupcomm_net::{ViewId, NO_VIEW_ID};

use super::node::ClusterNode;

/// One membership snapshot. Dead and new members are relative to the view this one replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupView {
    view_id: ViewId,
    all_members: Vec<ClusterNode>,
    dead_members: Vec<ClusterNode>,
    new_members: Vec<ClusterNode>,
    originating_groups: Option<Vec<Vec<ClusterNode>>>,
}

impl GroupView {
    pub fn view_id(self: &Self) -> ViewId { self.view_id }
    pub fn all_members(self: &Self) -> &[ClusterNode] { &self.all_members }
    pub fn dead_members(self: &Self) -> &[ClusterNode] { &self.dead_members }
    pub fn new_members(self: &Self) -> &[ClusterNode] { &self.new_members }
    pub fn originating_groups(self: &Self) -> Option<&[Vec<ClusterNode>]> { self.originating_groups.as_deref() }

    /// The view before any view has been accepted
    pub fn initial() -> Self {
        Self {
            view_id: NO_VIEW_ID,
            all_members: Vec::new(),
            dead_members: Vec::new(),
            new_members: Vec::new(),
            originating_groups: None,
        }
    }

    /// Builds the view that follows `previous`
    pub fn next(
        previous: &GroupView,
        view_id: ViewId,
        all_members: Vec<ClusterNode>,
        originating_groups: Option<Vec<Vec<ClusterNode>>>,
    ) -> Self {
        let dead_members = previous
            .all_members
            .iter()
            .filter(|node| !all_members.contains(node))
            .cloned()
            .collect();
        let new_members = all_members
            .iter()
            .filter(|node| !previous.all_members.contains(node))
            .cloned()
            .collect();

        Self {
            view_id,
            all_members,
            dead_members,
            new_members,
            originating_groups,
        }
    }

    pub fn is_initial(self: &Self) -> bool {
        self.view_id == NO_VIEW_ID
    }

    pub fn is_merge(self: &Self) -> bool {
        self.originating_groups.is_some()
    }

    /// The first member coordinates the group
    pub fn coordinator(self: &Self) -> Option<&ClusterNode> {
        self.all_members.first()
    }

    pub fn contains(self: &Self, node: &ClusterNode) -> bool {
        self.all_members.contains(node)
    }

    pub fn member_names(self: &Self) -> Vec<String> {
        self.all_members.iter().map(|node| node.name().to_owned()).collect()
    }
}

impl Default for GroupView {
    fn default() -> Self {
        Self::initial()
    }
}
