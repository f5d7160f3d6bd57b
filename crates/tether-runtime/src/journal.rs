//! Event journal - in-flight and settled locally-originated mutations
//!
//! Every local mutation gets the next id, an armed ack timer and a record
//! holding what it replaced. Records leave the pending state only through an
//! ack, a timeout or a rollback. Settled records are kept so a later rollback
//! can still undo them, up to a configured number.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tether_core::{EventId, OpKind, PathAddress};
use tether_state::Mutation;
use tether_time::AckTimer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    /// Waiting for the echo
    Pending,
    Acked,
    /// Echo overdue; a late echo still acks it
    TimedOut,
    RolledBack,
}

impl RecordState {
    pub fn is_settled(self) -> bool {
        matches!(self, RecordState::Acked | RecordState::RolledBack)
    }
}

#[derive(Debug)]
pub struct JournalRecord {
    id: EventId,
    path: PathAddress,
    op: OpKind,
    /// Taken out when the record is rolled back
    mutation: Option<Mutation>,
    timer: AckTimer,
    state: RecordState,
    processed: bool,
}

impl JournalRecord {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn path(&self) -> &PathAddress {
        &self.path
    }

    pub fn op(&self) -> OpKind {
        self.op
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    pub fn is_reverted(&self) -> bool {
        self.state == RecordState::RolledBack
    }

    pub fn timer(&self) -> &AckTimer {
        &self.timer
    }

    pub fn mutation(&self) -> Option<&Mutation> {
        self.mutation.as_ref()
    }
}

/// What an inbound id means for the journal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// No local record: remote-originated, apply it
    Remote,
    /// First echo of an already-applied mutation: ack only
    Ack,
    /// Echo of a mutation whose first echo must still be applied once
    FirstEcho,
    /// Repeated echo: discard
    Duplicate,
    /// Echo of a rolled back mutation: discard
    Reverted,
}

impl Observation {
    pub fn applies(self) -> bool {
        matches!(self, Observation::Remote | Observation::FirstEcho)
    }
}

#[derive(Debug)]
pub struct EventJournal {
    records: BTreeMap<EventId, JournalRecord>,
    next_id: EventId,
    max_settled: usize,
}

impl EventJournal {
    pub fn new(max_settled: usize) -> Self {
        EventJournal {
            records: BTreeMap::new(),
            next_id: EventId::ZERO,
            max_settled,
        }
    }

    /// Id the next recorded mutation will get
    pub fn next_id(&self) -> EventId {
        self.next_id
    }

    /// Store a mutation under the next id and arm its timer
    ///
    /// `processed == false` lets the first echo apply once more.
    pub fn record(&mut self, mutation: Mutation, now: Instant, timeout: Duration, processed: bool) -> EventId {
        let id = self.next_id;
        self.next_id = id.next();
        self.records.insert(
            id,
            JournalRecord {
                id,
                path: mutation.path.clone(),
                op: mutation.kind(),
                mutation: Some(mutation),
                timer: AckTimer::arm(now, timeout),
                state: RecordState::Pending,
                processed,
            },
        );
        id
    }

    /// Classify an inbound id, acking its record when this is the first echo
    pub fn observe(&mut self, id: EventId) -> Observation {
        let record = match self.records.get_mut(&id) {
            Some(record) => record,
            None => return Observation::Remote,
        };
        if record.state == RecordState::RolledBack {
            return Observation::Reverted;
        }

        let acked = record.timer.clear();
        if acked {
            record.state = RecordState::Acked;
        }
        let observation = if !std::mem::replace(&mut record.processed, true) {
            Observation::FirstEcho
        } else if acked {
            Observation::Ack
        } else {
            Observation::Duplicate
        };

        if acked {
            self.prune();
        }
        observation
    }

    /// Move overdue pending records to `TimedOut`, returning their ids
    pub fn expire(&mut self, now: Instant) -> Vec<EventId> {
        self.records
            .values_mut()
            .filter(|record| record.state == RecordState::Pending && record.timer.is_expired(now))
            .map(|record| {
                record.state = RecordState::TimedOut;
                record.id
            })
            .collect()
    }

    /// Take every non-reverted mutation with id >= `target`, newest first,
    /// marking the records reverted and cancelling their timers
    pub fn take_rollback(&mut self, target: EventId) -> Vec<(EventId, Mutation)> {
        let mut taken = Vec::new();
        for (id, record) in self.records.range_mut(target..).rev() {
            if record.state == RecordState::RolledBack {
                continue;
            }
            record.timer.clear();
            record.state = RecordState::RolledBack;
            if let Some(mutation) = record.mutation.take() {
                taken.push((*id, mutation));
            }
        }
        self.prune();
        taken
    }

    /// Earliest deadline among pending records
    pub fn next_deadline(&self) -> Option<Instant> {
        self.records
            .values()
            .filter(|record| record.state == RecordState::Pending)
            .map(|record| record.timer.deadline())
            .min()
    }

    pub fn get(&self, id: EventId) -> Option<&JournalRecord> {
        self.records.get(&id)
    }

    pub fn pending(&self) -> usize {
        self.count(RecordState::Pending)
    }

    pub fn timed_out(&self) -> usize {
        self.count(RecordState::TimedOut)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn count(&self, state: RecordState) -> usize {
        self.records.values().filter(|record| record.state == state).count()
    }

    /// Drop the oldest settled records beyond the retention limit
    fn prune(&mut self) {
        let settled: Vec<EventId> = self
            .records
            .values()
            .filter(|record| record.state.is_settled())
            .map(|record| record.id)
            .collect();
        if settled.len() <= self.max_settled {
            return;
        }
        for id in &settled[..settled.len() - self.max_settled] {
            self.records.remove(id);
        }
    }
}
