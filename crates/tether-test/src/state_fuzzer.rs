//! State Fuzzer - seeded random client/backend sessions
//!
//! Drives a `Harness` with random local mutations, backend-originated
//! changes, rejections and dropped echoes, then checks that:
//! - the mirror converges to the backend's authoritative state
//! - nothing is left pending once the clock passes every deadline
//! - no inbound message or rollback step failed

use std::collections::HashSet;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tether_core::{EventId, ListKind, TetherResult, Value};
use tether_runtime::RuntimeStats;

use crate::{BackendStats, Harness};

const ITEMS: &str = "state.items";
const TAGS: &str = "state.tags";

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    /// Number of operations to generate
    pub op_count: usize,
    /// Distinct scalar fields under `settings`
    pub field_count: usize,
    /// Distinct keys of the keyed list
    pub key_count: usize,
    /// Probability that the backend rejects a local mutation
    pub reject_prob: f64,
    /// Probability that the backend applies but never echoes one
    pub drop_ack_prob: f64,
    /// Probability of a backend-originated change
    pub remote_prob: f64,
    /// Probability of pumping after an operation
    pub pump_prob: f64,
    /// Random seed
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            op_count: 500,
            field_count: 8,
            key_count: 6,
            reject_prob: 0.1,
            drop_ack_prob: 0.05,
            remote_prob: 0.1,
            pump_prob: 0.3,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            op_count: 100,
            field_count: 4,
            key_count: 3,
            ..Self::default()
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            op_count: 5000,
            field_count: 32,
            key_count: 16,
            reject_prob: 0.2,
            drop_ack_prob: 0.1,
            remote_prob: 0.2,
            pump_prob: 0.2,
            seed: 42,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// One generated operation, kept for reproducing failures
#[derive(Clone, Debug, PartialEq)]
pub enum FuzzOp {
    SetField { field: usize, value: i64 },
    AppendItem { key: String },
    DeleteItem { key: String },
    SetCount { key: String, value: i64 },
    PushTag { tag: String },
    RemoteSet { field: usize, value: i64 },
    RemoteDelete { key: String },
    Pump,
}

/// Fuzzing result
#[derive(Debug)]
pub struct FuzzResult {
    pub ops: Vec<FuzzOp>,
    /// Paths whose mirrored value differs from the backend's
    pub divergent: Vec<String>,
    /// Journal records still pending after the final deadline
    pub pending: usize,
    pub runtime: RuntimeStats,
    pub backend: BackendStats,
}

impl FuzzResult {
    pub fn is_valid(&self) -> bool {
        self.divergent.is_empty() && self.pending == 0 && self.runtime.errors == 0
    }
}

pub struct StateFuzzer {
    config: FuzzerConfig,
    harness: Harness,
    rng: StdRng,
    ops: Vec<FuzzOp>,
    /// Keys appended since the last pump
    unsettled: HashSet<String>,
}

impl StateFuzzer {
    pub fn new(config: FuzzerConfig) -> TetherResult<Self> {
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(StateFuzzer {
            config,
            harness: Harness::new()?,
            rng,
            ops: Vec::new(),
            unsettled: HashSet::new(),
        })
    }

    pub fn harness(&mut self) -> &mut Harness {
        &mut self.harness
    }

    /// Run the session and check the invariants
    pub fn run(mut self) -> TetherResult<FuzzResult> {
        // The keyed list is created by the backend before any client append
        self.harness
            .backend
            .originate_append(&format!("{}[{}]", ITEMS, self.harness.runtime.config().guard_key), &ListKind::keyed("name"))?;
        self.pump();

        for _ in 0..self.config.op_count {
            let op = self.generate_op();
            self.apply(&op)?;
            self.ops.push(op);
            if self.rng.gen::<f64>() < self.config.pump_prob {
                self.pump();
                self.ops.push(FuzzOp::Pump);
            }
        }

        self.pump();
        let timeout = self.harness.runtime.config().ack_timeout;
        self.harness.advance(timeout + Duration::from_millis(1));
        Ok(self.check())
    }

    fn generate_op(&mut self) -> FuzzOp {
        let keys = self.local_keys();
        if self.rng.gen::<f64>() < self.config.remote_prob {
            if !keys.is_empty() && self.rng.gen_bool(0.2) {
                let key = keys[self.rng.gen_range(0..keys.len())].clone();
                return FuzzOp::RemoteDelete { key };
            }
            return FuzzOp::RemoteSet {
                field: self.rng.gen_range(0..self.config.field_count),
                value: self.rng.gen_range(-100..100),
            };
        }

        match self.rng.gen_range(0..5) {
            0 | 1 => FuzzOp::SetField {
                field: self.rng.gen_range(0..self.config.field_count),
                value: self.rng.gen_range(-100..100),
            },
            2 => {
                let key = format!("k{}", self.rng.gen_range(0..self.config.key_count));
                // The first echo of a fresh key's seed would re-create the
                // element, so deletes wait until the append has settled
                if self.unsettled.contains(&key) {
                    FuzzOp::SetCount { key, value: 0 }
                } else if keys.contains(&key) {
                    FuzzOp::DeleteItem { key }
                } else {
                    FuzzOp::AppendItem { key }
                }
            }
            3 if !keys.is_empty() => FuzzOp::SetCount {
                key: keys[self.rng.gen_range(0..keys.len())].clone(),
                value: self.rng.gen_range(0..1000),
            },
            _ => FuzzOp::PushTag {
                tag: format!("t{}", self.rng.gen_range(0..100)),
            },
        }
    }

    fn apply(&mut self, op: &FuzzOp) -> TetherResult<()> {
        let runtime = &mut self.harness.runtime;
        let id = match op {
            FuzzOp::SetField { field, value } => runtime.set(field_path(*field), *value)?,
            FuzzOp::AppendItem { key } => {
                let id = runtime.append(ITEMS, Some(key.as_str()), None)?;
                self.unsettled.insert(key.clone());
                id
            }
            FuzzOp::DeleteItem { key } => runtime.delete(ITEMS, key)?,
            FuzzOp::SetCount { key, value } => runtime.set(format!("{}[{}].count", ITEMS, key), *value)?,
            FuzzOp::PushTag { tag } => runtime.append(TAGS, None, Some(Value::from(tag.as_str())))?,
            FuzzOp::RemoteSet { field, value } => {
                // Settle in-flight writes first so the backend's order matches ours
                self.pump();
                self.harness.backend.originate_set(&field_path(*field), *value)?;
                self.harness.deliver();
                return Ok(());
            }
            FuzzOp::RemoteDelete { key } => {
                self.pump();
                self.harness.backend.originate_delete(&format!("{}[{}]", ITEMS, key))?;
                self.harness.deliver();
                return Ok(());
            }
            FuzzOp::Pump => {
                self.pump();
                return Ok(());
            }
        };
        self.disturb(id);
        Ok(())
    }

    fn pump(&mut self) {
        self.harness.pump();
        self.unsettled.clear();
    }

    /// Maybe have the backend reject or swallow the echo of `id`
    fn disturb(&mut self, id: EventId) {
        let roll = self.rng.gen::<f64>();
        if roll < self.config.reject_prob {
            self.harness.backend.reject(id);
        } else if roll < self.config.reject_prob + self.config.drop_ack_prob {
            self.harness.backend.drop_ack(id);
        }
    }

    fn local_keys(&mut self) -> Vec<String> {
        match self.harness.runtime.list(ITEMS) {
            Ok(list) => list.keys().into_iter().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn check(mut self) -> FuzzResult {
        let mut divergent = Vec::new();

        for field in 0..self.config.field_count {
            let path = field_path(field);
            if self.harness.runtime.value(path.as_str()) != self.harness.backend.value(&path) {
                divergent.push(path);
            }
        }

        let keys = self.local_keys();
        if keys != self.harness.backend.keys(ITEMS) {
            divergent.push(ITEMS.to_string());
        }
        for key in &keys {
            for field in ["name", "count"] {
                let path = format!("{}[{}].{}", ITEMS, key, field);
                if self.harness.runtime.value(path.as_str()) != self.harness.backend.value(&path) {
                    divergent.push(path);
                }
            }
        }

        let tags = self.harness.runtime.list(TAGS).map(|list| list.len()).unwrap_or(0);
        for index in 0..=tags {
            let path = format!("{}[{}]", TAGS, index);
            if self.harness.runtime.value(path.as_str()) != self.harness.backend.value(&path) {
                divergent.push(path);
            }
        }

        FuzzResult {
            ops: self.ops,
            divergent,
            pending: self.harness.runtime.journal().pending(),
            runtime: self.harness.runtime.stats().clone(),
            backend: self.harness.backend.stats().clone(),
        }
    }
}

fn field_path(field: usize) -> String {
    format!("settings.f{}", field)
}
