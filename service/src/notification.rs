use core::time::Duration;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, RwLock,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};

use crate::{membership::GroupMembershipListener, model::GroupView};

type ListenerSet = RwLock<Vec<Arc<dyn GroupMembershipListener>>>;

const ASYNC_NOTIFIER_THREAD_NAME: &str = "async-view-notifier";

struct AsyncWorker {
    sender: Option<Sender<Arc<GroupView>>>,
    queued: Vec<Arc<GroupView>>,
    stop_signal: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Delivers membership changes to listeners. Synchronous listeners run on the transport's
/// callback thread; asynchronous listeners run on one worker thread that takes views from a
/// queue in the order they were accepted. Views queued while the worker is stopped are held
/// until it starts.
pub(crate) struct NotificationFanout {
    allow_synchronous: bool,
    sync_listeners: ListenerSet,
    async_listeners: Arc<ListenerSet>,
    worker: Mutex<AsyncWorker>,
}

impl NotificationFanout {
    pub(crate) fn new(allow_synchronous: bool) -> Self {
        Self {
            allow_synchronous,
            sync_listeners: RwLock::new(Vec::new()),
            async_listeners: Arc::new(RwLock::new(Vec::new())),
            worker: Mutex::new(AsyncWorker {
                sender: None,
                queued: Vec::new(),
                stop_signal: Arc::new(AtomicBool::new(false)),
                handle: None,
            }),
        }
    }

    pub(crate) fn register_async(self: &Self, listener: Arc<dyn GroupMembershipListener>) {
        self.async_listeners.write().unwrap().push(listener);
    }

    /// Falls back to asynchronous delivery when synchronous notifications are not allowed
    pub(crate) fn register_sync(self: &Self, listener: Arc<dyn GroupMembershipListener>) {
        if self.allow_synchronous {
            self.sync_listeners.write().unwrap().push(listener);
        } else {
            warn!("NotificationFanout: synchronous notifications are not allowed, listener will be notified asynchronously");
            self.register_async(listener);
        }
    }

    /// Removes the listener from both sets. Returns false if it was not registered.
    pub(crate) fn unregister(self: &Self, listener: &Arc<dyn GroupMembershipListener>) -> bool {
        let removed_sync = remove_listener(&self.sync_listeners, listener);
        let removed_async = remove_listener(&self.async_listeners, listener);
        removed_sync || removed_async
    }

    #[cfg(test)]
    pub(crate) fn listener_count(self: &Self) -> usize {
        self.sync_listeners.read().unwrap().len() + self.async_listeners.read().unwrap().len()
    }

    /// Queues the view for the asynchronous listeners, then notifies the synchronous ones
    /// on the calling thread
    pub(crate) fn publish(self: &Self, view: &Arc<GroupView>) {
        self.enqueue(view.clone());

        if self.allow_synchronous {
            let listeners = self.sync_listeners.read().unwrap().clone();
            for listener in listeners {
                deliver(listener.as_ref(), view);
            }
        }
    }

    fn enqueue(self: &Self, view: Arc<GroupView>) {
        let mut worker = self.worker.lock().unwrap();
        let rejected = match &worker.sender {
            Some(sender) => match sender.send(view) {
                Ok(()) => None,
                Err(err) => Some(err.0),
            },
            None => Some(view),
        };
        if let Some(view) = rejected {
            worker.queued.push(view);
        }
    }

    pub(crate) fn start(self: &Self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.handle.is_some() {
            #[cfg(debug_assertions)]
            debug!("NotificationFanout: asynchronous notifier is already running");
            return;
        }

        let (sender, receiver) = channel::<Arc<GroupView>>();
        for view in worker.queued.drain(..) {
            sender.send(view).ok();
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        let notifier = AsyncNotifier {
            listeners: self.async_listeners.clone(),
            stop_signal: stop_signal.clone(),
            receiver,
        };

        match thread::Builder::new()
            .name(ASYNC_NOTIFIER_THREAD_NAME.to_owned())
            .spawn(move || notifier.run())
        {
            Ok(handle) => {
                worker.sender = Some(sender);
                worker.stop_signal = stop_signal;
                worker.handle = Some(handle);
            }
            Err(err) => error!("NotificationFanout: failed to start {ASYNC_NOTIFIER_THREAD_NAME}: {err}"),
        }
    }

    /// Stops the worker. Views that were not delivered yet are discarded.
    pub(crate) fn stop(self: &Self) {
        let handle = {
            let mut worker = self.worker.lock().unwrap();
            worker.stop_signal.store(true, Ordering::Relaxed);
            worker.sender = None;
            worker.handle.take()
        };

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("NotificationFanout: {ASYNC_NOTIFIER_THREAD_NAME} panicked");
            }
        }
    }
}

fn remove_listener(listeners: &ListenerSet, listener: &Arc<dyn GroupMembershipListener>) -> bool {
    let mut listeners = listeners.write().unwrap();
    let before = listeners.len();
    listeners.retain(|registered| !same_listener(registered, listener));
    listeners.len() != before
}

fn same_listener(a: &Arc<dyn GroupMembershipListener>, b: &Arc<dyn GroupMembershipListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Calls one listener, containing any panic so the remaining listeners still hear about the view
fn deliver(listener: &dyn GroupMembershipListener, view: &GroupView) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match view.originating_groups() {
        Some(groups) => listener.membership_changed_during_merge(
            view.dead_members(),
            view.new_members(),
            view.all_members(),
            groups,
        ),
        None => listener.membership_changed(view.dead_members(), view.new_members(), view.all_members()),
    }));

    if outcome.is_err() {
        warn!(
            "NotificationFanout: membership listener failed while handling view {}",
            view.view_id()
        );
    }
}

struct AsyncNotifier {
    listeners: Arc<ListenerSet>,
    stop_signal: Arc<AtomicBool>,
    receiver: Receiver<Arc<GroupView>>,
}

impl AsyncNotifier {
    fn run(self: Self) {
        info!("NotificationFanout: {ASYNC_NOTIFIER_THREAD_NAME} starting");

        while !self.stop_signal.load(Ordering::Relaxed) {
            match self.receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(view) => {
                    let listeners = self.listeners.read().unwrap().clone();
                    for listener in listeners {
                        deliver(listener.as_ref(), &view);
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        info!("NotificationFanout: {ASYNC_NOTIFIER_THREAD_NAME} stopping");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        sync::mpsc,
    };

    use groupcomm_net::Address;

    use super::*;
    use crate::model::ClusterNode;

    struct Recording {
        sender: Mutex<mpsc::Sender<(String, Vec<String>)>>,
    }

    impl GroupMembershipListener for Recording {
        fn membership_changed(&self, _dead: &[ClusterNode], new: &[ClusterNode], _all: &[ClusterNode]) {
            let thread_name = thread::current().name().unwrap_or("").to_owned();
            let names = new.iter().map(|node| node.name().to_owned()).collect();
            self.sender.lock().unwrap().send((thread_name, names)).ok();
        }
    }

    struct Panicking;

    impl GroupMembershipListener for Panicking {
        fn membership_changed(&self, _dead: &[ClusterNode], _new: &[ClusterNode], _all: &[ClusterNode]) {
            panic!("listener failed");
        }
    }

    fn recording() -> (Arc<dyn GroupMembershipListener>, mpsc::Receiver<(String, Vec<String>)>) {
        let (sender, receiver) = mpsc::channel();
        (Arc::new(Recording { sender: Mutex::new(sender) }), receiver)
    }

    fn view_with_new_member(view_id: i64, name: &str, port: u16) -> Arc<GroupView> {
        let node = ClusterNode::new(
            name.to_owned(),
            Address::from(name),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
            0,
        );
        Arc::new(GroupView::next(&GroupView::initial(), view_id, vec![node], None))
    }

    #[test]
    fn should_deliver_queued_views_in_order_once_started() {
        let fanout = NotificationFanout::new(false);
        let (listener, received) = recording();
        fanout.register_async(listener);

        fanout.publish(&view_with_new_member(1, "A", 7800));
        fanout.publish(&view_with_new_member(2, "B", 7801));
        fanout.start();
        fanout.publish(&view_with_new_member(3, "C", 7802));

        let names: Vec<String> = (0..3)
            .map(|_| received.recv_timeout(Duration::from_secs(5)).unwrap())
            .map(|(thread_name, mut names)| {
                assert_eq!(thread_name, ASYNC_NOTIFIER_THREAD_NAME);
                names.remove(0)
            })
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        fanout.stop();
    }

    #[test]
    fn should_notify_sync_listeners_on_calling_thread() {
        let fanout = NotificationFanout::new(true);
        let (listener, received) = recording();
        fanout.register_sync(listener);

        fanout.publish(&view_with_new_member(1, "A", 7800));

        let (thread_name, names) = received.try_recv().unwrap();
        assert_ne!(thread_name, ASYNC_NOTIFIER_THREAD_NAME);
        assert_eq!(names, vec!["A"]);
    }

    #[test]
    fn should_demote_sync_listener_when_not_allowed() {
        let fanout = NotificationFanout::new(false);
        let (listener, received) = recording();
        fanout.register_sync(listener);

        fanout.publish(&view_with_new_member(1, "A", 7800));
        assert!(received.try_recv().is_err());

        fanout.start();
        let (thread_name, _) = received.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(thread_name, ASYNC_NOTIFIER_THREAD_NAME);
        fanout.stop();
    }

    #[test]
    fn should_keep_delivering_after_a_listener_panics() {
        let fanout = NotificationFanout::new(true);
        let (listener, received) = recording();
        fanout.register_sync(Arc::new(Panicking));
        fanout.register_sync(listener);

        fanout.publish(&view_with_new_member(1, "A", 7800));
        assert!(received.try_recv().is_ok());
    }

    #[test]
    fn should_unregister_by_identity() {
        let fanout = NotificationFanout::new(true);
        let (first, _first_received) = recording();
        let (second, _second_received) = recording();
        fanout.register_sync(first.clone());
        fanout.register_async(second.clone());

        assert!(fanout.unregister(&first));
        assert!(!fanout.unregister(&first));
        assert_eq!(fanout.listener_count(), 1);
        assert!(fanout.unregister(&second));
        assert_eq!(fanout.listener_count(), 0);
    }
}
