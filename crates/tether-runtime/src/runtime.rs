//! Sync runtime - the local mirror and its protocol state machine
//!
//! Local mutations are applied to the tree first, then journaled and sent.
//! Inbound messages are matched against the journal: echoes of local
//! mutations ack them (and are applied at most once), everything else is
//! remote-originated and applied as it arrives. A rollback replays the
//! journaled inverses newest first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use tether_core::{
    EventId, Inbound, IntoPath, ListKind, Outbound, PathAddress, Scalar, TetherError, TetherResult, Value,
};
use tether_state::{Change, Emitter, ListNode, ListSnapshot, ListSubscriber, Mutation, ObjectNode, Subscriber, UnsetHook};
use tether_time::{Clock, Liveness, LivenessMonitor, SystemClock};
use tether_transport::Transport;

use crate::{EventJournal, JournalRecord, Observation, RuntimeConfig, Selector, Tree, ViewId, Views};

/// Callback invoked on every change of the disconnected flag
pub type LivenessCallback = Box<dyn FnMut(Liveness) + Send>;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Local mutations journaled and sent
    pub emitted: u64,
    pub received: u64,
    /// Inbound messages applied to the tree
    pub applied: u64,
    pub duplicates: u64,
    pub acked: u64,
    pub timeouts: u64,
    /// Rollback requests handled
    pub rollbacks: u64,
    /// Journal records undone by rollbacks
    pub reverted: u64,
    pub errors: u64,
}

/// Emitter handed to nodes during a local mutation
struct Outbox<'a> {
    journal: &'a mut EventJournal,
    transport: &'a mut (dyn Transport + 'static),
    stats: &'a mut RuntimeStats,
    now: Instant,
    timeout: Duration,
}

impl Outbox<'_> {
    fn send(&mut self, mutation: Mutation, processed: bool) -> EventId {
        let message = mutation.to_outbound(self.journal.next_id());
        let id = self.journal.record(mutation, self.now, self.timeout, processed);
        self.stats.emitted += 1;
        trace!(id = %id, path = ?message.path().map(ToString::to_string), processed, "emit");

        // The record stays pending; its timer reports the lost message
        if let Err(e) = self.transport.send(message) {
            self.stats.errors += 1;
            warn!(id = %id, error = %e, "failed to send mutation");
        }
        id
    }
}

impl Emitter for Outbox<'_> {
    fn emit(&mut self, mutation: Mutation) -> EventId {
        self.send(mutation, true)
    }

    fn emit_after_init(&mut self, mutation: Mutation) -> EventId {
        self.send(mutation, false)
    }
}

/// Client-side replication runtime
///
/// One instance owns the tree, the journal and the transport; everything
/// runs on the caller's thread. Use [`crate::spawn_dispatcher`] to drive it
/// from a tokio task.
pub struct SyncRuntime {
    config: RuntimeConfig,
    tree: Tree,
    journal: EventJournal,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    liveness: LivenessMonitor,
    on_liveness: Option<LivenessCallback>,
    views: Views,
    stats: RuntimeStats,
    ready_sent: bool,
}

impl SyncRuntime {
    pub fn new(config: RuntimeConfig, transport: impl Transport + 'static) -> TetherResult<Self> {
        Self::with_clock(config, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: RuntimeConfig,
        transport: impl Transport + 'static,
        clock: Arc<dyn Clock>,
    ) -> TetherResult<Self> {
        config.validate()?;
        let tree = Tree::new(&config.roots)?;
        info!(
            roots = ?config.roots,
            ack_timeout = ?config.ack_timeout,
            "sync runtime created"
        );
        Ok(SyncRuntime {
            journal: EventJournal::new(config.max_settled_records),
            tree,
            transport: Box::new(transport),
            clock,
            liveness: LivenessMonitor::new(),
            on_liveness: None,
            views: Views::new(),
            stats: RuntimeStats::default(),
            ready_sent: false,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn journal(&self) -> &EventJournal {
        &self.journal
    }

    pub fn record(&self, id: EventId) -> Option<&JournalRecord> {
        self.journal.get(id)
    }

    /// Request the initial snapshot; only the first call sends anything
    pub fn ready(&mut self) -> TetherResult<bool> {
        if self.ready_sent {
            return Ok(false);
        }
        self.transport.send(Outbound::Ready)?;
        self.ready_sent = true;
        info!("initial snapshot requested");
        Ok(true)
    }

    // Local mutations

    /// Write a field (or a primitive list element, for a bracketed last
    /// segment) and emit it
    pub fn set<T: Scalar>(&mut self, path: impl IntoPath, value: T) -> TetherResult<EventId> {
        let path = path.into_path()?;
        let parent = path
            .parent()
            .ok_or_else(|| TetherError::type_mismatch(&path, "a root cannot be written"))?;
        let last = path.last();
        let (tree, mut outbox) = self.split();
        let id = if last.is_bracketed() {
            let index = parse_index(&path)?;
            tree.list(&parent)?.set(index, value.into_value(), &mut outbox)?
        } else {
            tree.object(&parent)?.set(last.name(), value, &mut outbox)?
        };
        self.views.refresh(&mut self.tree);
        Ok(id)
    }

    pub fn set_element(&mut self, list_path: impl IntoPath, index: usize, value: impl Scalar) -> TetherResult<EventId> {
        let path = list_path.into_path()?;
        let (tree, mut outbox) = self.split();
        let id = tree.list(&path)?.set(index, value.into_value(), &mut outbox)?;
        self.views.refresh(&mut self.tree);
        Ok(id)
    }

    /// Append to a list; returns the id of the append itself
    pub fn append(&mut self, list_path: impl IntoPath, key: Option<&str>, value: Option<Value>) -> TetherResult<EventId> {
        let path = list_path.into_path()?;
        let (tree, mut outbox) = self.split();
        let id = tree.list(&path)?.append(key, value, &mut outbox)?.id;
        self.views.refresh(&mut self.tree);
        Ok(id)
    }

    /// Remove a list element by key (keyed lists) or index
    pub fn delete(&mut self, list_path: impl IntoPath, key: &str) -> TetherResult<EventId> {
        let path = list_path.into_path()?;
        let (tree, mut outbox) = self.split();
        let id = tree.list(&path)?.delete(key, &mut outbox)?;
        self.views.refresh(&mut self.tree);
        Ok(id)
    }

    /// Run several local mutations against one object
    pub fn update<F, R>(&mut self, path: impl IntoPath, f: F) -> TetherResult<R>
    where
        F: FnOnce(&mut ObjectNode, &mut dyn Emitter) -> TetherResult<R>,
    {
        let path = path.into_path()?;
        let (tree, mut outbox) = self.split();
        let result = f(tree.object(&path)?, &mut outbox);
        self.views.refresh(&mut self.tree);
        result
    }

    pub fn update_list<F, R>(&mut self, path: impl IntoPath, f: F) -> TetherResult<R>
    where
        F: FnOnce(&mut ListNode, &mut dyn Emitter) -> TetherResult<R>,
    {
        let path = path.into_path()?;
        let (tree, mut outbox) = self.split();
        let result = f(tree.list(&path)?, &mut outbox);
        self.views.refresh(&mut self.tree);
        result
    }

    fn split(&mut self) -> (&mut Tree, Outbox<'_>) {
        let outbox = Outbox {
            journal: &mut self.journal,
            transport: self.transport.as_mut(),
            stats: &mut self.stats,
            now: self.clock.now(),
            timeout: self.config.ack_timeout,
        };
        (&mut self.tree, outbox)
    }

    // Reads

    pub fn object(&mut self, path: impl IntoPath) -> TetherResult<&mut ObjectNode> {
        self.tree.object(&path.into_path()?)
    }

    pub fn list(&mut self, path: impl IntoPath) -> TetherResult<&mut ListNode> {
        self.tree.list(&path.into_path()?)
    }

    /// Current value of a field or primitive element
    pub fn value(&self, path: impl IntoPath) -> Option<Value> {
        self.tree.get(&path.into_path().ok()?).cloned()
    }

    pub fn concrete<T: Scalar>(&self, path: impl IntoPath) -> Option<T> {
        self.tree.get(&path.into_path().ok()?).and_then(T::from_value)
    }

    /// Read a field and subscribe to it, seeding `default` when unset
    pub fn subscribe<T: Scalar + Clone>(
        &mut self,
        path: impl IntoPath,
        default: T,
        subscriber: Subscriber,
    ) -> TetherResult<T> {
        let path = path.into_path()?;
        let owner = self.tree.field_owner(&path)?;
        Ok(owner.value(path.last().name(), default, subscriber))
    }

    /// Run `hook` when the field at `path` goes back to unset
    pub fn on_unset(&mut self, path: impl IntoPath, hook: UnsetHook) -> TetherResult<()> {
        let path = path.into_path()?;
        self.tree.field_owner(&path)?.on_unset(path.last().name(), hook);
        Ok(())
    }

    /// Subscribe to a list and to every inbound change nested under its elements
    pub fn watch_list(&mut self, path: impl IntoPath, subscriber: ListSubscriber) -> TetherResult<ListSnapshot> {
        let list = self.tree.list(&path.into_path()?)?;
        list.set_reactive(true);
        Ok(list.values(subscriber))
    }

    /// Re-deliver every current value under `path`
    pub fn flush(&mut self, path: impl IntoPath) -> TetherResult<()> {
        self.tree.flush(&path.into_path()?)
    }

    // Inbound

    /// Apply one inbound message
    ///
    /// Any message, even one that fails to apply, proves the connection is
    /// alive.
    pub fn receive(&mut self, message: Inbound) -> TetherResult<()> {
        self.stats.received += 1;
        if self.liveness.mark_alive() {
            info!("connection restored");
            self.notify_liveness();
        }

        let op = message.op_name();
        let result = self.apply(message);
        if let Err(e) = &result {
            self.stats.errors += 1;
            warn!(op, error = %e, "failed to apply inbound message");
        }
        result
    }

    fn apply(&mut self, message: Inbound) -> TetherResult<()> {
        if let Inbound::Rollback { id } = message {
            let target = EventId::from_wire(id)
                .ok_or_else(|| TetherError::InvalidWireFormat(format!("rollback of remote id {}", id)))?;
            self.rollback(target);
            return Ok(());
        }

        if let Some(id) = message.event_id() {
            match self.journal.observe(id) {
                Observation::Ack => {
                    self.stats.acked += 1;
                    trace!(id = %id, "acked");
                    return Ok(());
                }
                Observation::Duplicate => {
                    self.stats.duplicates += 1;
                    trace!(id = %id, "duplicate echo discarded");
                    return Ok(());
                }
                Observation::Reverted => {
                    debug!(id = %id, "echo of reverted mutation discarded");
                    return Ok(());
                }
                Observation::FirstEcho => self.stats.acked += 1,
                Observation::Remote => {}
            }
        }

        let (path, change) = into_change(message, &self.config.guard_key)?;
        trace!(path = %path, op = change.op_name(), "apply");
        self.tree.dispatch(path, change)?;
        self.stats.applied += 1;
        self.views.refresh(&mut self.tree);
        Ok(())
    }

    /// Undo every non-reverted mutation with id >= `target`, newest first;
    /// returns how many were undone
    pub fn rollback(&mut self, target: EventId) -> usize {
        let taken = self.journal.take_rollback(target);
        self.stats.rollbacks += 1;
        info!(target = %target, count = taken.len(), "rolling back");

        let mut reverted = 0;
        for (id, mutation) in taken {
            let path = mutation.path.clone();
            match self.tree.dispatch(path, Change::Rollback(mutation)) {
                Ok(()) => reverted += 1,
                Err(e) => {
                    self.stats.errors += 1;
                    warn!(id = %id, error = %e, "rollback step failed");
                }
            }
        }
        self.stats.reverted += reverted as u64;
        self.views.refresh(&mut self.tree);
        reverted
    }

    // Liveness

    /// Poll ack timers; raises the disconnected flag when one has expired
    pub fn tick(&mut self) -> Liveness {
        let now = self.clock.now();
        let expired = self.journal.expire(now);
        if let Some(first) = expired.first() {
            self.stats.timeouts += expired.len() as u64;
            warn!(count = expired.len(), first = %first, "acknowledgement timed out");
            if self.liveness.mark_disconnected(now) {
                warn!("connection considered lost");
                self.notify_liveness();
            }
        }
        self.liveness.status(now)
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.status(self.clock.now())
    }

    pub fn is_disconnected(&self) -> bool {
        self.liveness.is_disconnected()
    }

    pub fn on_liveness(&mut self, callback: LivenessCallback) {
        self.on_liveness = Some(callback);
    }

    fn notify_liveness(&mut self) {
        let status = self.liveness.status(self.clock.now());
        if let Some(callback) = self.on_liveness.as_mut() {
            callback(status);
        }
    }

    // Bound views

    pub fn bind(&mut self, selector: Selector) -> ViewId {
        self.views.insert(&mut self.tree, selector)
    }

    pub fn unbind(&mut self, view: ViewId) -> TetherResult<()> {
        self.views.remove(&mut self.tree, view)
    }

    /// Bind a subscriber to `relative` under whatever the view selects
    pub fn bind_value<T: Scalar + Clone>(
        &mut self,
        view: ViewId,
        relative: impl IntoPath,
        default: T,
        subscriber: Subscriber,
    ) -> TetherResult<T> {
        let relative = relative.into_path()?;
        let current = self.views.bind_value(
            &mut self.tree,
            view,
            relative,
            default.clone().into_value(),
            subscriber,
        )?;
        Ok(T::from_value(&current).unwrap_or(default))
    }

    pub fn unbind_value(&mut self, view: ViewId, relative: impl IntoPath) -> TetherResult<()> {
        self.views.unbind_value(&mut self.tree, view, &relative.into_path()?)
    }

    pub fn view_target(&self, view: ViewId) -> Option<&PathAddress> {
        self.views.target(view)
    }
}

fn parse_index(path: &PathAddress) -> TetherResult<usize> {
    let segment = path.last().name();
    segment.parse().map_err(|_| TetherError::InvalidIndex {
        path: path.to_string(),
        index: segment.to_string(),
    })
}

/// Tree change carried by a non-rollback inbound message
fn into_change(message: Inbound, guard_key: &str) -> TetherResult<(PathAddress, Change)> {
    Ok(match message {
        Inbound::Set { path, value, .. } => (path, Change::Set(value)),
        Inbound::Append { path, primitive, key, .. } => {
            let last = path.last();
            let create_only = last.is_bracketed() && last.name() == guard_key;
            let kind = ListKind::from_wire(primitive, &key);
            (path, Change::Append { kind, create_only })
        }
        Inbound::Delete { path, .. } => (path, Change::Delete),
        Inbound::Rollback { id } => {
            return Err(TetherError::InvalidWireFormat(format!("rollback {} carries no change", id)))
        }
    })
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tether_time::ManualClock;
    use tether_transport::RecordingTransport;

    use super::*;
    use crate::RecordState;

    struct Fixture {
        runtime: SyncRuntime,
        transport: RecordingTransport,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let transport = RecordingTransport::new();
        let clock = ManualClock::new();
        let runtime =
            SyncRuntime::with_clock(RuntimeConfig::default(), transport.clone(), Arc::new(clock.clone())).unwrap();
        Fixture {
            runtime,
            transport,
            clock,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, Subscriber) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, Box::new(move |v: &Value| sink.lock().push(v.clone())))
    }

    fn set(path: &str, id: i64, value: impl Into<Value>) -> Inbound {
        Inbound::Set {
            path: PathAddress::parse(path).unwrap(),
            id,
            value: value.into(),
        }
    }

    fn append(path: &str, id: i64, key: &str) -> Inbound {
        Inbound::Append {
            path: PathAddress::parse(path).unwrap(),
            id,
            primitive: false,
            key: key.to_string(),
        }
    }

    #[test]
    fn test_local_set_is_visible_and_emitted() {
        let Fixture {
            mut runtime, transport, ..
        } = fixture();
        let (seen, subscriber) = recorder();
        assert_eq!(runtime.subscribe("state.x", 0i64, subscriber).unwrap(), 0);

        let id = runtime.set("state.x", 5i64).unwrap();
        assert_eq!(id, EventId::new(0));
        assert_eq!(runtime.concrete::<i64>("state.x"), Some(5));
        assert_eq!(*seen.lock(), vec![Value::from(5i64)]);
        assert_eq!(
            transport.last(),
            Some(Outbound::Set {
                path: PathAddress::parse("state.x").unwrap(),
                value: Value::from(5i64),
                id,
            })
        );
        assert_eq!(runtime.journal().pending(), 1);
    }

    #[test]
    fn test_echo_acks_without_renotifying() {
        let Fixture { mut runtime, .. } = fixture();
        let (seen, subscriber) = recorder();
        runtime.subscribe("state.x", 0i64, subscriber).unwrap();
        runtime.set("state.x", 5i64).unwrap();

        runtime.receive(set("state.x", 0, 5i64)).unwrap();
        runtime.receive(set("state.x", 0, 5i64)).unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(runtime.stats().acked, 1);
        assert_eq!(runtime.stats().duplicates, 1);
        assert_eq!(runtime.stats().applied, 0);
        assert_eq!(runtime.record(EventId::new(0)).unwrap().state(), RecordState::Acked);
    }

    #[test]
    fn test_keyed_append_echo_is_deduplicated() {
        let Fixture {
            mut runtime, transport, ..
        } = fixture();
        runtime
            .list("state.macros")
            .unwrap()
            .stamp(&ListKind::keyed("name"))
            .unwrap();

        let id = runtime.append("state.macros", Some("a1"), None).unwrap();
        // Append plus the seeded key field
        assert_eq!(transport.len(), 2);

        runtime.receive(append("state.macros[a1]", id.to_wire(), "name")).unwrap();
        runtime.receive(set("state.macros[a1].name", id.next().to_wire(), "a1")).unwrap();

        assert_eq!(runtime.list("state.macros").unwrap().len(), 1);
        assert_eq!(runtime.value("state.macros[a1].name"), Some(Value::from("a1")));
        assert_eq!(runtime.journal().pending(), 0);
    }

    #[test]
    fn test_remote_messages_apply() {
        let Fixture { mut runtime, .. } = fixture();
        runtime.receive(append("database.accounts[bob]", -1, "name")).unwrap();
        runtime.receive(set("database.accounts[bob].score", -1, 3i64)).unwrap();
        runtime.receive(append("database.accounts[bob]", -1, "name")).unwrap();

        assert_eq!(runtime.list("database.accounts").unwrap().len(), 1);
        assert_eq!(runtime.concrete::<i64>("database.accounts[bob].score"), Some(3));

        runtime
            .receive(Inbound::Delete {
                path: PathAddress::parse("database.accounts[bob]").unwrap(),
                id: -1,
            })
            .unwrap();
        assert!(runtime.list("database.accounts").unwrap().is_empty());
        assert_eq!(runtime.stats().applied, 4);
    }

    #[test]
    fn test_guard_append_creates_empty_list() {
        let Fixture { mut runtime, .. } = fixture();
        runtime.receive(append("state.presets[_init]", -1, "name")).unwrap();

        let list = runtime.list("state.presets").unwrap();
        assert!(list.is_empty());
        assert_eq!(list.kind(), Some(ListKind::keyed("name")));
    }

    #[test]
    fn test_rollback_newest_first() {
        let Fixture { mut runtime, .. } = fixture();
        runtime.receive(append("state.items[k]", -1, "name")).unwrap();
        runtime.receive(set("state.a", -1, 1i64)).unwrap();

        let first = runtime.set("state.a", 2i64).unwrap();
        runtime.set("state.a", 3i64).unwrap();
        runtime.delete("state.items", "k").unwrap();
        assert!(runtime.list("state.items").unwrap().is_empty());

        runtime.receive(Inbound::Rollback { id: first.to_wire() }).unwrap();

        assert_eq!(runtime.concrete::<i64>("state.a"), Some(1));
        assert_eq!(runtime.list("state.items").unwrap().keys(), vec!["k"]);
        assert_eq!(runtime.stats().reverted, 3);
        assert_eq!(runtime.journal().pending(), 0);

        // Echoes of reverted mutations change nothing
        runtime.receive(set("state.a", first.to_wire(), 2i64)).unwrap();
        assert_eq!(runtime.concrete::<i64>("state.a"), Some(1));
    }

    #[test]
    fn test_rollback_of_first_write_unsets() {
        let Fixture { mut runtime, .. } = fixture();
        let id = runtime.set("settings.fresh", true).unwrap();
        assert_eq!(runtime.rollback(id), 1);
        assert_eq!(runtime.value("settings.fresh"), None);
    }

    #[test]
    fn test_timeout_sets_disconnected_until_next_receive() {
        let Fixture {
            mut runtime, clock, ..
        } = fixture();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        runtime.on_liveness(Box::new(move |status| sink.lock().push(status.disconnected)));

        runtime.set("state.x", 1i64).unwrap();
        clock.advance(Duration::from_millis(999));
        assert!(!runtime.tick().disconnected);

        clock.advance(Duration::from_millis(1));
        assert!(runtime.tick().disconnected);
        clock.advance(Duration::from_millis(500));
        assert_eq!(runtime.liveness().elapsed, Duration::from_millis(500));
        assert_eq!(runtime.stats().timeouts, 1);

        runtime.receive(set("state.y", -1, 1i64)).unwrap();
        assert!(!runtime.is_disconnected());
        assert_eq!(*changes.lock(), vec![true, false]);

        // The late echo still acks the timed out record
        runtime.receive(set("state.x", 0, 1i64)).unwrap();
        assert_eq!(runtime.record(EventId::new(0)).unwrap().state(), RecordState::Acked);
    }

    #[test]
    fn test_send_failure_keeps_record_pending() {
        let Fixture {
            mut runtime, transport, ..
        } = fixture();
        transport.close();
        let id = runtime.set("state.x", 1i64).unwrap();
        assert_eq!(runtime.stats().errors, 1);
        assert_eq!(runtime.record(id).unwrap().state(), RecordState::Pending);
        assert!(runtime.ready().is_err());
    }

    #[test]
    fn test_ready_is_sent_once() {
        let Fixture {
            mut runtime, transport, ..
        } = fixture();
        assert!(runtime.ready().unwrap());
        assert!(!runtime.ready().unwrap());
        assert_eq!(transport.sent(), vec![Outbound::Ready]);
    }

    #[test]
    fn test_bad_inbound_counts_error() {
        let Fixture { mut runtime, .. } = fixture();
        assert!(runtime.receive(set("nowhere.x", -1, 1i64)).is_err());
        assert!(runtime.receive(Inbound::Rollback { id: -1 }).is_err());
        assert_eq!(runtime.stats().errors, 2);
        assert_eq!(runtime.stats().received, 2);
    }

    #[test]
    fn test_primitive_list_entry_points() {
        let Fixture { mut runtime, .. } = fixture();
        runtime.append("state.tags", None, Some(Value::from("a"))).unwrap();
        runtime.set_element("state.tags", 1, "b".to_string()).unwrap();
        runtime.set("state.tags[0]", "z".to_string()).unwrap();

        assert_eq!(runtime.value("state.tags[0]"), Some(Value::from("z")));
        assert_eq!(runtime.value("state.tags[1]"), Some(Value::from("b")));
        assert_eq!(runtime.journal().len(), 3);
    }

    #[test]
    fn test_update_closure_emits_each_write() {
        let Fixture {
            mut runtime, transport, ..
        } = fixture();
        runtime
            .update("settings.game", |object, emitter| {
                object.set("speed", 2i64, emitter)?;
                object.set("paused", false, emitter)
            })
            .unwrap();
        assert_eq!(transport.len(), 2);
        assert_eq!(runtime.concrete::<bool>("settings.game.paused"), Some(false));
    }

    #[test]
    fn test_bound_view_follows_local_selector() {
        let Fixture { mut runtime, .. } = fixture();
        for (name, score) in [("alice", 1i64), ("bob", 2)] {
            runtime
                .receive(append(&format!("database.accounts[{}]", name), -1, "name"))
                .unwrap();
            runtime
                .receive(set(&format!("database.accounts[{}].score", name), -1, score))
                .unwrap();
        }
        let view = runtime.bind(Selector::new("settings.account", "database.accounts[{}]").unwrap());
        let (seen, subscriber) = recorder();
        assert_eq!(runtime.bind_value(view, "score", 0i64, subscriber).unwrap(), 0);

        runtime.set("settings.account", "bob".to_string()).unwrap();
        assert_eq!(
            runtime.view_target(view).map(ToString::to_string).as_deref(),
            Some("database.accounts[bob]")
        );
        assert_eq!(*seen.lock(), vec![Value::from(2i64)]);

        runtime.receive(set("settings.account", -1, "alice")).unwrap();
        assert_eq!(*seen.lock(), vec![Value::from(2i64), Value::from(1i64)]);

        runtime.unbind(view).unwrap();
        runtime.receive(set("database.accounts[alice].score", -1, 9i64)).unwrap();
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_nested_set_ahead_of_its_append_survives() {
        let Fixture { mut runtime, .. } = fixture();
        runtime.receive(set("state.macros[a1].running", -1, true)).unwrap();
        assert_eq!(runtime.value("state.macros[a1].running"), None);

        runtime.receive(append("state.macros[a1]", -1, "name")).unwrap();
        assert_eq!(runtime.concrete::<bool>("state.macros[a1].running"), Some(true));
        assert_eq!(runtime.list("state.macros").unwrap().keys(), vec!["a1"]);
        assert_eq!(runtime.stats().errors, 0);
    }

    #[test]
    fn test_unaddressable_key_is_not_sent() {
        let Fixture {
            mut runtime, transport, ..
        } = fixture();
        runtime.receive(append("state.macros[_init]", -1, "name")).unwrap();

        assert!(matches!(
            runtime.append("state.macros", Some("a["), None),
            Err(TetherError::InvalidPath { .. })
        ));
        assert!(transport.is_empty());
        assert_eq!(runtime.journal().pending(), 0);
        assert!(runtime.list("state.macros").unwrap().is_empty());
    }

    #[test]
    fn test_watched_list_sees_nested_changes() {
        let Fixture { mut runtime, .. } = fixture();
        runtime.receive(append("state.macros[m]", -1, "name")).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let snapshot = runtime
            .watch_list(
                "state.macros",
                Box::new(move |s: &ListSnapshot| sink.lock().push(s.clone())),
            )
            .unwrap();
        assert_eq!(snapshot, ListSnapshot::Keyed(vec!["m".to_string()]));
        assert!(runtime.list("state.macros").unwrap().is_reactive());

        runtime.receive(set("state.macros[m].running", -1, true)).unwrap();
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_rejected_first_write_reports_unset() {
        let Fixture { mut runtime, .. } = fixture();
        let cleared = Arc::new(Mutex::new(0));
        let sink = cleared.clone();
        runtime.on_unset("settings.fresh", Box::new(move || *sink.lock() += 1)).unwrap();

        let id = runtime.set("settings.fresh", String::from("draft")).unwrap();
        runtime.receive(Inbound::Rollback { id: id.to_wire() }).unwrap();

        assert_eq!(runtime.value("settings.fresh"), None);
        assert_eq!(*cleared.lock(), 1);
    }
}
