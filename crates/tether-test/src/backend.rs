//! Simulated authoritative backend
//!
//! Applies client mutations to its own tree and answers each with an echo
//! carrying the client's id. Tests can make it reject ids (answering with a
//! rollback), swallow echoes, or originate changes of its own.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, trace};

use tether_core::{EventId, Inbound, ListKind, Outbound, PathAddress, TetherResult, Value, REMOTE_ID};
use tether_runtime::{RuntimeConfig, Tree};
use tether_state::Change;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub received: u64,
    pub echoed: u64,
    pub rejected: u64,
    /// Applied but never echoed
    pub dropped: u64,
    /// Ignored because an earlier id of the same batch was rejected
    pub discarded: u64,
    pub originated: u64,
}

pub struct SimulatedBackend {
    store: Tree,
    guard_key: String,
    /// Everything applied so far, replayed as the initial snapshot
    history: Vec<Inbound>,
    outbox: VecDeque<Inbound>,
    reject_ids: HashSet<EventId>,
    reject_prefixes: Vec<String>,
    drop_ids: HashSet<EventId>,
    drop_all: bool,
    stats: BackendStats,
}

impl SimulatedBackend {
    /// Backend serving the roots and guard key of `config`
    pub fn new(config: &RuntimeConfig) -> TetherResult<Self> {
        Ok(SimulatedBackend {
            store: Tree::new(&config.roots)?,
            guard_key: config.guard_key.clone(),
            history: Vec::new(),
            outbox: VecDeque::new(),
            reject_ids: HashSet::new(),
            reject_prefixes: Vec::new(),
            drop_ids: HashSet::new(),
            drop_all: false,
            stats: BackendStats::default(),
        })
    }

    pub fn stats(&self) -> &BackendStats {
        &self.stats
    }

    /// Answer `id` with a rollback instead of applying it
    pub fn reject(&mut self, id: EventId) {
        self.reject_ids.insert(id);
    }

    /// Reject every mutation whose path starts with `prefix`
    pub fn reject_prefix(&mut self, prefix: impl Into<String>) {
        self.reject_prefixes.push(prefix.into());
    }

    /// Apply `id` but never echo it
    pub fn drop_ack(&mut self, id: EventId) {
        self.drop_ids.insert(id);
    }

    /// Stop (or resume) echoing anything
    pub fn set_drop_all(&mut self, drop_all: bool) {
        self.drop_all = drop_all;
    }

    /// Authoritative value at `path`
    pub fn value(&self, path: &str) -> Option<Value> {
        self.store.get(&PathAddress::parse(path).ok()?).cloned()
    }

    pub fn keys(&mut self, list_path: &str) -> Vec<String> {
        PathAddress::parse(list_path)
            .and_then(|path| self.store.list(&path).map(|list| list.keys().into_iter().map(str::to_string).collect()))
            .unwrap_or_default()
    }

    pub fn store(&self) -> &Tree {
        &self.store
    }

    /// Handle one batch of client messages in order
    ///
    /// Once an id is rejected, every later id of the same batch was sent
    /// before the client could see the rollback, which reverts it as well;
    /// those are discarded.
    pub fn handle_batch(&mut self, batch: Vec<Outbound>) {
        let mut rejected_from: Option<EventId> = None;
        for message in batch {
            self.stats.received += 1;
            let id = match message.event_id() {
                Some(id) => id,
                None => {
                    self.send_snapshot();
                    continue;
                }
            };
            if rejected_from.map_or(false, |first| id >= first) {
                self.stats.discarded += 1;
                continue;
            }
            if self.rejects(id, &message) {
                debug!(id = %id, "rejecting client mutation");
                self.stats.rejected += 1;
                rejected_from = Some(id);
                self.outbox.push_back(Inbound::Rollback { id: id.to_wire() });
                continue;
            }
            if !self.apply_client(id, message) {
                rejected_from = Some(id);
            }
        }
    }

    /// Take everything queued for the client
    pub fn drain(&mut self) -> Vec<Inbound> {
        self.outbox.drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    // Backend-originated changes

    pub fn originate_set(&mut self, path: &str, value: impl Into<Value>) -> TetherResult<()> {
        self.originate(Inbound::Set {
            path: PathAddress::parse(path)?,
            id: REMOTE_ID,
            value: value.into(),
        })
    }

    pub fn originate_append(&mut self, path: &str, kind: &ListKind) -> TetherResult<()> {
        self.originate(Inbound::Append {
            path: PathAddress::parse(path)?,
            id: REMOTE_ID,
            primitive: kind.is_primitive(),
            key: kind.key_field().to_string(),
        })
    }

    pub fn originate_delete(&mut self, path: &str) -> TetherResult<()> {
        self.originate(Inbound::Delete {
            path: PathAddress::parse(path)?,
            id: REMOTE_ID,
        })
    }

    /// Ask the client to undo everything from `id` on
    pub fn originate_rollback(&mut self, id: EventId) {
        self.outbox.push_back(Inbound::Rollback { id: id.to_wire() });
    }

    fn originate(&mut self, message: Inbound) -> TetherResult<()> {
        self.apply(&message)?;
        self.stats.originated += 1;
        self.history.push(message.clone());
        self.outbox.push_back(message);
        Ok(())
    }

    fn rejects(&self, id: EventId, message: &Outbound) -> bool {
        if self.reject_ids.contains(&id) {
            return true;
        }
        let path = match message.path() {
            Some(path) => path.to_string(),
            None => return false,
        };
        self.reject_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Apply and echo a client mutation; `false` when it had to be rejected
    fn apply_client(&mut self, id: EventId, message: Outbound) -> bool {
        let echoes = match client_to_inbound(id, message) {
            Some(echoes) => echoes,
            None => return true,
        };
        for echo in &echoes {
            if let Err(e) = self.apply(echo) {
                debug!(id = %id, error = %e, "client mutation does not apply, rejecting");
                self.stats.rejected += 1;
                self.outbox.push_back(Inbound::Rollback { id: id.to_wire() });
                return false;
            }
            self.history.push(as_remote(echo));
        }

        if self.drop_all || self.drop_ids.contains(&id) {
            trace!(id = %id, "echo dropped");
            self.stats.dropped += 1;
            return true;
        }
        self.stats.echoed += 1;
        self.outbox.extend(echoes);
        true
    }

    fn apply(&mut self, message: &Inbound) -> TetherResult<()> {
        let (path, change) = match message {
            Inbound::Set { path, value, .. } => (path.clone(), Change::Set(value.clone())),
            Inbound::Append {
                path, primitive, key, ..
            } => {
                let last = path.last();
                let create_only = last.is_bracketed() && last.name() == self.guard_key;
                (
                    path.clone(),
                    Change::Append {
                        kind: ListKind::from_wire(*primitive, key),
                        create_only,
                    },
                )
            }
            Inbound::Delete { path, .. } => (path.clone(), Change::Delete),
            Inbound::Rollback { .. } => return Ok(()),
        };
        self.store.dispatch(path, change)
    }

    /// Queue the whole history as remote-originated messages
    fn send_snapshot(&mut self) {
        debug!(messages = self.history.len(), "sending snapshot");
        self.outbox.extend(self.history.iter().cloned());
    }
}

/// Echo messages for a client mutation; a primitive append is followed by
/// the set carrying its value
fn client_to_inbound(id: EventId, message: Outbound) -> Option<Vec<Inbound>> {
    let id = id.to_wire();
    Some(match message {
        Outbound::Set { path, value, .. } => vec![Inbound::Set { path, id, value }],
        Outbound::Append {
            path,
            value,
            primitive,
            key,
            ..
        } => {
            let append = Inbound::Append {
                path: path.clone(),
                id,
                primitive,
                key,
            };
            match value {
                Some(value) => vec![append, Inbound::Set { path, id, value }],
                None => vec![append],
            }
        }
        Outbound::Delete { path, .. } => vec![Inbound::Delete { path, id }],
        Outbound::Ready => return None,
    })
}

fn as_remote(message: &Inbound) -> Inbound {
    let mut message = message.clone();
    match &mut message {
        Inbound::Set { id, .. } | Inbound::Append { id, .. } | Inbound::Delete { id, .. } => *id = REMOTE_ID,
        Inbound::Rollback { .. } => {}
    }
    message
}
