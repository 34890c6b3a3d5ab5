//! Conflict-free replicated sequences for durable shared state.
//!
//! `ReplicatedSequence` is an operation-based replicated list in the
//! Logoot style: every element owns a dense, totally-ordered position
//! identifier, deletes leave tombstones, and the whole state is a
//! position-keyed map joined by set union. Two replicas that have applied
//! the same multiset of operations therefore hold identical state no
//! matter the delivery order.
//!
//! Conflict policy: concurrent edits to *different* entities both survive.
//! When concurrent replaces leave two live elements with the same entity
//! identity, materialization keeps the insert with the greater
//! `(lamport, peer)` op id — last-writer-wins at entity granularity.
//! Callers needing field-level merge must diff and reapply themselves.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::DurableEntity;


const MIN_DIGIT: u64 = 0;
const MAX_DIGIT: u64 = u64::MAX;

/// One level of a position path. Ordered by digit, then minting peer.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ident {
    pub digit: u64,
    pub peer: u64,
}

/// Dense position identifier. Lexicographic `Vec` ordering gives the total
/// order over elements.
pub type PosId = Vec<Ident>;

/// Lamport-clocked operation identity, used for entity-granularity
/// last-writer-wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId {
    pub lamport: u64,
    pub peer: u64,
}

/// Replicated operation, serialized as-is onto the transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeqOp<T> {
    Insert { pos: PosId, op: OpId, value: T },
    Delete { pos: PosId },
}

#[derive(Clone, Debug)]
struct Entry<T> {
    op: OpId,
    /// `None` marks a tombstone.
    value: Option<T>,
}

pub struct ReplicatedSequence<T> {
    peer: u64,
    clock: u64,
    entries: BTreeMap<PosId, Entry<T>>,
    observers: Vec<Box<dyn Fn(&[T]) + Send>>,
}

/// Generate a position strictly between `left` and `right`.
///
/// Walks the two bounding paths level by level; as soon as a level has
/// room between the bounding digits the path terminates with a fresh
/// ident. Freshly minted final idents always carry a digit >= 1, which
/// keeps a slot open below any existing path.
fn pos_between(left: &[Ident], right: &[Ident], peer: u64) -> PosId {
    let mut path: Vec<Ident> = Vec::new();
    let mut l_bound = true;
    let mut r_bound = true;
    let mut depth = 0usize;
    loop {
        let left_ident = if l_bound { left.get(depth) } else { None };
        let right_ident = if r_bound { right.get(depth) } else { None };
        let lo = left_ident.map_or(MIN_DIGIT, |i| i.digit);
        let hi = right_ident.map_or(MAX_DIGIT, |i| i.digit);

        if hi.saturating_sub(lo) > 1 {
            path.push(Ident {
                digit: lo + (hi - lo) / 2,
                peer,
            });
            return path;
        }

        // No room at this level: follow left when it continues, otherwise
        // descend inside (or just below) the right bound.
        let step = if let Some(ident) = left_ident {
            ident.clone()
        } else if let Some(ident) = right_ident {
            if ident.digit == MIN_DIGIT {
                ident.clone()
            } else {
                Ident { digit: lo, peer }
            }
        } else {
            Ident { digit: lo, peer }
        };

        if left_ident != Some(&step) {
            l_bound = false;
        }
        if right_ident != Some(&step) {
            r_bound = false;
        }
        path.push(step);
        depth += 1;
    }
}

fn end_sentinel() -> PosId {
    vec![Ident {
        digit: MAX_DIGIT,
        peer: 0,
    }]
}

impl<T: Clone + DurableEntity> ReplicatedSequence<T> {
    pub fn new(peer: u64) -> Self {
        Self {
            peer,
            clock: 0,
            entries: BTreeMap::new(),
            observers: Vec::new(),
        }
    }

    fn next_op(&mut self) -> OpId {
        self.clock += 1;
        OpId {
            lamport: self.clock,
            peer: self.peer,
        }
    }

    /// Live entries after tombstone and entity-granularity LWW filtering.
    /// Local indices used by `remove_at`/`replace_at` address this view.
    fn materialized(&self) -> Vec<(&PosId, OpId, &T)> {
        let mut winners: HashMap<&str, OpId> = HashMap::new();
        for entry in self.entries.values() {
            if let Some(value) = &entry.value {
                let best = winners.entry(value.entity_id()).or_insert(entry.op);
                if entry.op > *best {
                    *best = entry.op;
                }
            }
        }
        self.entries
            .iter()
            .filter_map(|(pos, entry)| {
                let value = entry.value.as_ref()?;
                (winners.get(value.entity_id()) == Some(&entry.op))
                    .then_some((pos, entry.op, value))
            })
            .collect()
    }

    /// Materialize the current sequence content.
    pub fn to_vec(&self) -> Vec<T> {
        self.materialized()
            .into_iter()
            .map(|(_, _, value)| value.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.materialized().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<T> {
        self.materialized()
            .get(index)
            .map(|(_, _, value)| (*value).clone())
    }

    /// Local index of the entity with the given identity.
    pub fn position_of(&self, entity_id: &str) -> Option<usize> {
        self.materialized()
            .iter()
            .position(|(_, _, value)| value.entity_id() == entity_id)
    }

    /// Register a callback invoked with the full materialized sequence
    /// after every local or remote mutation.
    pub fn observe(&mut self, callback: impl Fn(&[T]) + Send + 'static) {
        self.observers.push(Box::new(callback));
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let view = self.to_vec();
        for observer in &self.observers {
            observer(&view);
        }
    }

    /// Append to the end of the sequence. Returns the op to replicate.
    pub fn append(&mut self, value: T) -> SeqOp<T> {
        let left = self
            .entries
            .keys()
            .next_back()
            .cloned()
            .unwrap_or_default();
        let pos = pos_between(&left, &end_sentinel(), self.peer);
        let op = self.next_op();
        self.entries.insert(
            pos.clone(),
            Entry {
                op,
                value: Some(value.clone()),
            },
        );
        self.notify();
        SeqOp::Insert { pos, op, value }
    }

    /// Tombstone the element at the given local index.
    pub fn remove_at(&mut self, index: usize) -> Option<SeqOp<T>> {
        let pos = self.materialized().get(index).map(|(pos, _, _)| (*pos).clone())?;
        if let Some(entry) = self.entries.get_mut(&pos) {
            entry.value = None;
        }
        self.notify();
        Some(SeqOp::Delete { pos })
    }

    /// Replace the element at the given local index, expressed as a
    /// delete plus an insert into the same slot (never in-place mutation,
    /// so replayed ops stay safe). Returns both ops in apply order.
    pub fn replace_at(&mut self, index: usize, value: T) -> Option<Vec<SeqOp<T>>> {
        let target = self.materialized().get(index).map(|(pos, _, _)| (*pos).clone())?;
        let left = self
            .entries
            .range(..target.clone())
            .next_back()
            .map(|(pos, _)| pos.clone())
            .unwrap_or_default();

        if let Some(entry) = self.entries.get_mut(&target) {
            entry.value = None;
        }
        let pos = pos_between(&left, &target, self.peer);
        let op = self.next_op();
        self.entries.insert(
            pos.clone(),
            Entry {
                op,
                value: Some(value.clone()),
            },
        );
        self.notify();
        Some(vec![
            SeqOp::Delete { pos: target },
            SeqOp::Insert { pos, op, value },
        ])
    }

    /// Apply an operation received from a peer. Commutative and
    /// idempotent: a tombstone always wins over its insert, duplicate
    /// deliveries are no-ops.
    pub fn apply(&mut self, op: SeqOp<T>) {
        match op {
            SeqOp::Insert { pos, op, value } => {
                self.clock = self.clock.max(op.lamport);
                match self.entries.get(&pos) {
                    // Delete already observed for this position.
                    Some(existing) if existing.value.is_none() => {}
                    _ => {
                        self.entries.insert(
                            pos,
                            Entry {
                                op,
                                value: Some(value),
                            },
                        );
                    }
                }
            }
            SeqOp::Delete { pos } => {
                self.entries
                    .entry(pos)
                    .and_modify(|entry| entry.value = None)
                    .or_insert(Entry {
                        op: OpId { lamport: 0, peer: 0 },
                        value: None,
                    });
            }
        }
        self.notify();
    }
}
