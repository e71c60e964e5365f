use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, OnceLock},
};

use crate::{bit_set::SparseBitvector, graph::NodeId, offset::Offset};

mod bitvectors;
#[cfg(test)]
mod tests;

pub use bitvectors::{
    DivisibleOffsetsPointsToSet, SeparateOffsetsPointsToSet, SingleBitvectorPointsToSet,
    SmallOffsetsPointsToSet,
};

/// A single abstract pointer value: a target node plus a byte offset into it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pointer {
    pub target: NodeId,
    pub offset: Offset,
}

impl Pointer {
    #[inline]
    pub fn new(target: NodeId, offset: Offset) -> Self {
        Self { target, offset }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.target == NodeId::NULLPTR
    }

    #[inline]
    pub fn is_unknown(self) -> bool {
        self.target == NodeId::UNKNOWN_MEMORY
    }

    #[inline]
    pub fn is_invalidated(self) -> bool {
        self.target == NodeId::INVALIDATED
    }
}

impl std::fmt::Debug for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:?}+{:?})", self.target, self.offset)
    }
}

/// Bit index used for the unknown offset inside per-target offset vectors.
const UNKNOWN_OFFSET_BIT: u64 = u64::MAX;

#[inline]
fn offset_bit(offset: Offset) -> u64 {
    if offset.is_unknown() {
        UNKNOWN_OFFSET_BIT
    } else {
        offset.value()
    }
}

#[inline]
fn bit_offset(bit: u64) -> Offset {
    if bit == UNKNOWN_OFFSET_BIT {
        Offset::UNKNOWN
    } else {
        Offset::new(bit)
    }
}

#[derive(Default)]
struct InternTables {
    target_ids: HashMap<NodeId, u64>,
    targets: Vec<NodeId>,
    pointer_ids: HashMap<Pointer, u64>,
    pointers: Vec<Pointer>,
}

/// The process-wide interning tables shared by the bitvector representations.
/// Single-writer discipline: every access goes through this one lock. Ids are
/// 1-based and monotone; once assigned, the inverse mapping never changes.
fn tables() -> &'static Mutex<InternTables> {
    static TABLES: OnceLock<Mutex<InternTables>> = OnceLock::new();
    TABLES.get_or_init(Default::default)
}

pub fn intern_target(target: NodeId) -> u64 {
    let mut t = tables().lock().unwrap();
    if let Some(&id) = t.target_ids.get(&target) {
        return id;
    }
    t.targets.push(target);
    let id = t.targets.len() as u64;
    t.target_ids.insert(target, id);
    id
}

pub fn target_for_id(id: u64) -> NodeId {
    let t = tables().lock().unwrap();
    t.targets[(id - 1) as usize]
}

pub fn intern_pointer(ptr: Pointer) -> u64 {
    let mut t = tables().lock().unwrap();
    if let Some(&id) = t.pointer_ids.get(&ptr) {
        return id;
    }
    t.pointers.push(ptr);
    let id = t.pointers.len() as u64;
    t.pointer_ids.insert(ptr, id);
    id
}

pub fn pointer_for_id(id: u64) -> Pointer {
    let t = tables().lock().unwrap();
    t.pointers[(id - 1) as usize]
}

/// The lattice element attached to every node: a finite set of
/// `(target, offset)` pairs with change-reporting mutators.
///
/// All representations implement this one observable contract; the graph and
/// the engines are generic over it, with [`OffsetsPointsToSet`] as the
/// default. Mutators return whether the set changed, which is what drives the
/// fixpoint worklists.
pub trait PointsToSet: Clone + Default + PartialEq + std::fmt::Debug {
    /// Inserts `(target, offset)`. An unknown offset may absorb the concrete
    /// offsets recorded for `target`.
    fn add(&mut self, target: NodeId, offset: Offset) -> bool;

    fn add_pointer(&mut self, ptr: Pointer) -> bool {
        self.add(ptr.target, ptr.offset)
    }

    /// Pointwise union of `other` into `self`.
    fn union(&mut self, other: &Self) -> bool;

    /// Removes exactly `(target, offset)`, unknown offsets included.
    fn remove(&mut self, target: NodeId, offset: Offset) -> bool;

    /// Removes every pair with this target.
    fn remove_target(&mut self, target: NodeId) -> bool;

    fn clear(&mut self);

    /// Exact membership.
    fn points_to(&self, target: NodeId, offset: Offset) -> bool;

    /// Membership modulo the unknown offset: the pair itself, or the same
    /// target with an unknown offset. Unknown memory is not counted here.
    fn may_point_to(&self, target: NodeId, offset: Offset) -> bool {
        self.points_to(target, offset) || self.points_to(target, Offset::UNKNOWN)
    }

    fn must_point_to(&self, target: NodeId, offset: Offset) -> bool {
        self.points_to(target, offset) && self.is_singleton()
    }

    /// Is some offset of `target` present?
    fn points_to_target(&self, target: NodeId) -> bool;

    /// Exactly one pair in the set.
    fn is_singleton(&self) -> bool;

    fn is_empty(&self) -> bool;

    /// The number of pairs in the set.
    fn len(&self) -> usize;

    /// The number of pairs held in an auxiliary spill set, for
    /// representations that have one.
    fn overflow_len(&self) -> usize {
        0
    }

    fn has_unknown(&self) -> bool {
        self.points_to_target(NodeId::UNKNOWN_MEMORY)
    }

    fn has_null(&self) -> bool {
        self.points_to_target(NodeId::NULLPTR)
    }

    fn has_invalidated(&self) -> bool {
        self.points_to_target(NodeId::INVALIDATED)
    }

    /// Every pair currently in the set, each exactly once, in an order that
    /// is stable for an unmodified set.
    fn iter(&self) -> Box<dyn Iterator<Item = Pointer> + '_>;
}

/// The default representation and precision reference: one sparse offset
/// bitvector per target. Adding an unknown offset drops the concrete offsets
/// recorded for that target.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OffsetsPointsToSet {
    pointers: BTreeMap<NodeId, SparseBitvector>,
}

impl OffsetsPointsToSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn add_unknown_offset(&mut self, target: NodeId) -> bool {
        let offsets = self.pointers.entry(target).or_default();
        if offsets.get(UNKNOWN_OFFSET_BIT) {
            return false;
        }
        offsets.clear();
        offsets.set(UNKNOWN_OFFSET_BIT);
        true
    }
}

impl PointsToSet for OffsetsPointsToSet {
    fn add(&mut self, target: NodeId, offset: Offset) -> bool {
        if offset.is_unknown() {
            return self.add_unknown_offset(target);
        }
        let offsets = self.pointers.entry(target).or_default();
        if offsets.get(UNKNOWN_OFFSET_BIT) {
            return false;
        }
        offsets.set(offset.value())
    }

    fn union(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (target, offsets) in &other.pointers {
            changed |= self.pointers.entry(*target).or_default().union(offsets);
        }
        changed
    }

    fn remove(&mut self, target: NodeId, offset: Offset) -> bool {
        let Some(offsets) = self.pointers.get_mut(&target) else {
            return false;
        };
        let changed = offsets.unset(offset_bit(offset));
        if offsets.is_empty() {
            self.pointers.remove(&target);
        }
        changed
    }

    fn remove_target(&mut self, target: NodeId) -> bool {
        self.pointers.remove(&target).is_some()
    }

    fn clear(&mut self) {
        self.pointers.clear();
    }

    fn points_to(&self, target: NodeId, offset: Offset) -> bool {
        self.pointers
            .get(&target)
            .is_some_and(|offsets| offsets.get(offset_bit(offset)))
    }

    fn points_to_target(&self, target: NodeId) -> bool {
        self.pointers.contains_key(&target)
    }

    fn is_singleton(&self) -> bool {
        self.len() == 1
    }

    fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    fn len(&self) -> usize {
        self.pointers.values().map(SparseBitvector::len).sum()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Pointer> + '_> {
        Box::new(self.pointers.iter().flat_map(|(target, offsets)| {
            offsets
                .iter()
                .map(move |bit| Pointer::new(*target, bit_offset(bit)))
        }))
    }
}

impl std::fmt::Debug for OffsetsPointsToSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<Pointer> for OffsetsPointsToSet {
    fn from_iter<I: IntoIterator<Item = Pointer>>(iter: I) -> Self {
        let mut set = Self::new();
        for ptr in iter {
            set.add_pointer(ptr);
        }
        set
    }
}
