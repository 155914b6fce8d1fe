use std::{
    sync::{Arc, Condvar, Mutex, RwLock},
    time::Duration,
};

use log::{debug, warn};

use crate::{
    errors::ServiceResult,
    model::{ClusterNode, GroupView},
    transport::{binding::TransportBinding, RawView},
};

/// Receives membership changes. Dead and new members are relative to the previous view.
pub trait GroupMembershipListener: Send + Sync {
    fn membership_changed(
        self: &Self,
        dead_members: &[ClusterNode],
        new_members: &[ClusterNode],
        all_members: &[ClusterNode],
    );

    /// Called instead of `membership_changed` when the view was formed by merging partitions
    fn membership_changed_during_merge(
        self: &Self,
        dead_members: &[ClusterNode],
        new_members: &[ClusterNode],
        all_members: &[ClusterNode],
        _originating_groups: &[Vec<ClusterNode>],
    ) {
        self.membership_changed(dead_members, new_members, all_members);
    }
}

/// The outcome of accepting a view from the transport
pub(crate) struct ViewChange {
    pub(crate) view: Arc<GroupView>,

    /// True for the first view this node accepted, which has no meaningful delta
    pub(crate) initial: bool,
}

/// Keeps the current view. Readers clone an `Arc` of the view so they never see it change
/// under them; accepting a view replaces the `Arc` under a short write lock.
pub(crate) struct MembershipTracker {
    current: RwLock<Arc<GroupView>>,
    has_view: Mutex<bool>,
    first_view: Condvar,
}

impl MembershipTracker {
    pub(crate) fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(GroupView::initial())),
            has_view: Mutex::new(false),
            first_view: Condvar::new(),
        }
    }

    pub(crate) fn current(self: &Self) -> Arc<GroupView> {
        self.current.read().unwrap().clone()
    }

    /// Translates the raw view and makes it current. Returns `None` for a view that is not
    /// newer than the current one. Fails without changing anything if any member cannot be
    /// resolved.
    pub(crate) fn accept(self: &Self, raw: &RawView, binding: &TransportBinding) -> ServiceResult<Option<ViewChange>> {
        let members = raw
            .members
            .iter()
            .map(|address| binding.cluster_node(address))
            .collect::<ServiceResult<Vec<ClusterNode>>>()?;

        let originating_groups = match &raw.subgroups {
            Some(subgroups) => Some(
                subgroups
                    .iter()
                    .map(|group| {
                        group
                            .iter()
                            .map(|address| binding.cluster_node(address))
                            .collect::<ServiceResult<Vec<ClusterNode>>>()
                    })
                    .collect::<ServiceResult<Vec<Vec<ClusterNode>>>>()?,
            ),
            None => None,
        };

        let change = {
            let mut current = self.current.write().unwrap();
            if !current.is_initial() && raw.view_id <= current.view_id() {
                warn!(
                    "MembershipTracker: ignoring view {} because view {} is already current",
                    raw.view_id,
                    current.view_id()
                );
                return Ok(None);
            }

            let initial = current.is_initial();
            let view = Arc::new(GroupView::next(&current, raw.view_id, members, originating_groups));
            *current = view.clone();
            ViewChange { view, initial }
        };

        if change.initial {
            let mut has_view = self.has_view.lock().unwrap();
            *has_view = true;
            self.first_view.notify_all();
        }

        #[cfg(debug_assertions)]
        debug!(
            "MembershipTracker: view {} has {} members, {} new and {} dead",
            change.view.view_id(),
            change.view.all_members().len(),
            change.view.new_members().len(),
            change.view.dead_members().len()
        );

        Ok(Some(change))
    }

    /// Blocks until the first view has been accepted. Returns false on timeout.
    pub(crate) fn await_first_view(self: &Self, timeout: Duration) -> bool {
        let has_view = self.has_view.lock().unwrap();
        let (has_view, _) = self
            .first_view
            .wait_timeout_while(has_view, timeout, |has_view| !*has_view)
            .unwrap();
        *has_view
    }

    pub(crate) fn is_coordinator(self: &Self, node: &ClusterNode) -> bool {
        self.current().coordinator() == Some(node)
    }

    /// Forgets all membership so that a restarted service waits for a new first view
    pub(crate) fn reset(self: &Self) {
        *self.current.write().unwrap() = Arc::new(GroupView::initial());
        *self.has_view.lock().unwrap() = false;
    }
}
