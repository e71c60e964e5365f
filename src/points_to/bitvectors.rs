//! Alternative points-to set representations backed by the process-wide
//! interning tables. Interchangeable with the default representation through
//! the [`PointsToSet`] contract; each trades precision or generality for
//! packing.

use std::collections::BTreeSet;

use crate::{
    bit_set::SparseBitvector,
    graph::NodeId,
    offset::Offset,
    points_to::{
        bit_offset, intern_pointer, intern_target, offset_bit, pointer_for_id, target_for_id,
        Pointer, PointsToSet,
    },
};

/// One bitvector of target ids and one of offsets, with cross-product
/// membership.
///
/// Coarser than the default representation: recording `(a, 0)` and `(b, 8)`
/// also makes `(a, 8)` and `(b, 0)` members. That approximates the true set
/// upward, so it stays sound, and it is exact whenever every target carries
/// the same offsets by construction. `remove` only acts when the removal is
/// expressible (a single target or a single offset remains); anything else
/// reports no change, which again errs upward.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SeparateOffsetsPointsToSet {
    nodes: SparseBitvector,
    offsets: SparseBitvector,
}

impl PointsToSet for SeparateOffsetsPointsToSet {
    fn add(&mut self, target: NodeId, offset: Offset) -> bool {
        let node_changed = self.nodes.set(intern_target(target));
        self.offsets.set(offset_bit(offset)) || node_changed
    }

    fn union(&mut self, other: &Self) -> bool {
        let node_changed = self.nodes.union(&other.nodes);
        self.offsets.union(&other.offsets) || node_changed
    }

    fn remove(&mut self, target: NodeId, offset: Offset) -> bool {
        let node_bit = intern_target(target);
        let off_bit = offset_bit(offset);
        if !self.nodes.get(node_bit) || !self.offsets.get(off_bit) {
            return false;
        }
        if self.nodes.len() == 1 {
            let changed = self.offsets.unset(off_bit);
            if self.offsets.is_empty() {
                self.nodes.clear();
            }
            changed
        } else if self.offsets.len() == 1 {
            let changed = self.nodes.unset(node_bit);
            if self.nodes.is_empty() {
                self.offsets.clear();
            }
            changed
        } else {
            // the pair is entangled with others; keeping it over-approximates
            false
        }
    }

    fn remove_target(&mut self, target: NodeId) -> bool {
        let changed = self.nodes.unset(intern_target(target));
        if self.nodes.is_empty() {
            self.offsets.clear();
        }
        changed
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.offsets.clear();
    }

    fn points_to(&self, target: NodeId, offset: Offset) -> bool {
        self.nodes.get(intern_target(target)) && self.offsets.get(offset_bit(offset))
    }

    fn points_to_target(&self, target: NodeId) -> bool {
        self.nodes.get(intern_target(target))
    }

    fn is_singleton(&self) -> bool {
        self.nodes.len() == 1 && self.offsets.len() == 1
    }

    fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.offsets.is_empty()
    }

    fn len(&self) -> usize {
        self.nodes.len() * self.offsets.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Pointer> + '_> {
        Box::new(self.nodes.iter().flat_map(|node_bit| {
            let target = target_for_id(node_bit);
            self.offsets
                .iter()
                .map(move |off_bit| Pointer::new(target, bit_offset(off_bit)))
        }))
    }
}

impl std::fmt::Debug for SeparateOffsetsPointsToSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A single bitvector indexed by interned whole pointers. Best for dense
/// small programs where few distinct pointers exist.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SingleBitvectorPointsToSet {
    pointers: SparseBitvector,
}

impl PointsToSet for SingleBitvectorPointsToSet {
    fn add(&mut self, target: NodeId, offset: Offset) -> bool {
        self.pointers.set(intern_pointer(Pointer::new(target, offset)))
    }

    fn union(&mut self, other: &Self) -> bool {
        self.pointers.union(&other.pointers)
    }

    fn remove(&mut self, target: NodeId, offset: Offset) -> bool {
        self.pointers
            .unset(intern_pointer(Pointer::new(target, offset)))
    }

    fn remove_target(&mut self, target: NodeId) -> bool {
        let stale: Vec<u64> = self
            .pointers
            .iter()
            .filter(|&id| pointer_for_id(id).target == target)
            .collect();
        let mut changed = false;
        for id in stale {
            changed |= self.pointers.unset(id);
        }
        changed
    }

    fn clear(&mut self) {
        self.pointers.clear();
    }

    fn points_to(&self, target: NodeId, offset: Offset) -> bool {
        self.pointers.get(intern_pointer(Pointer::new(target, offset)))
    }

    fn points_to_target(&self, target: NodeId) -> bool {
        self.pointers.iter().any(|id| pointer_for_id(id).target == target)
    }

    fn is_singleton(&self) -> bool {
        self.pointers.len() == 1
    }

    fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    fn len(&self) -> usize {
        self.pointers.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Pointer> + '_> {
        Box::new(self.pointers.iter().map(pointer_for_id))
    }
}

impl std::fmt::Debug for SingleBitvectorPointsToSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

const SLOT_BITS: u64 = 64;
const UNKNOWN_SLOT_BIT: u64 = 63;

#[inline]
fn slot_start(target: NodeId) -> u64 {
    (intern_target(target) - 1) * SLOT_BITS
}

/// Each target owns a 64-bit slot: bits `0..=62` are the offsets `0..=62`,
/// bit 63 is the unknown offset. Larger offsets spill to a side set.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SmallOffsetsPointsToSet {
    pointers: SparseBitvector,
    overflow: BTreeSet<Pointer>,
}

impl SmallOffsetsPointsToSet {
    fn slot_bit(target: NodeId, offset: Offset) -> Option<u64> {
        if offset.is_unknown() {
            Some(slot_start(target) + UNKNOWN_SLOT_BIT)
        } else if offset.value() < UNKNOWN_SLOT_BIT {
            Some(slot_start(target) + offset.value())
        } else {
            None
        }
    }

    fn decode(bit: u64) -> Pointer {
        let target = target_for_id(bit / SLOT_BITS + 1);
        let slot = bit % SLOT_BITS;
        if slot == UNKNOWN_SLOT_BIT {
            Pointer::new(target, Offset::UNKNOWN)
        } else {
            Pointer::new(target, Offset::new(slot))
        }
    }
}

impl PointsToSet for SmallOffsetsPointsToSet {
    fn add(&mut self, target: NodeId, offset: Offset) -> bool {
        match Self::slot_bit(target, offset) {
            Some(bit) => self.pointers.set(bit),
            None => self.overflow.insert(Pointer::new(target, offset)),
        }
    }

    fn union(&mut self, other: &Self) -> bool {
        let mut changed = self.pointers.union(&other.pointers);
        for ptr in &other.overflow {
            changed |= self.overflow.insert(*ptr);
        }
        changed
    }

    fn remove(&mut self, target: NodeId, offset: Offset) -> bool {
        match Self::slot_bit(target, offset) {
            Some(bit) => self.pointers.unset(bit),
            None => self.overflow.remove(&Pointer::new(target, offset)),
        }
    }

    fn remove_target(&mut self, target: NodeId) -> bool {
        let start = slot_start(target);
        let mut changed = false;
        for bit in start..start + SLOT_BITS {
            changed |= self.pointers.unset(bit);
        }
        let before = self.overflow.len();
        self.overflow.retain(|ptr| ptr.target != target);
        changed || self.overflow.len() != before
    }

    fn clear(&mut self) {
        self.pointers.clear();
        self.overflow.clear();
    }

    fn points_to(&self, target: NodeId, offset: Offset) -> bool {
        match Self::slot_bit(target, offset) {
            Some(bit) => self.pointers.get(bit),
            None => self.overflow.contains(&Pointer::new(target, offset)),
        }
    }

    fn points_to_target(&self, target: NodeId) -> bool {
        let start = slot_start(target);
        (start..start + SLOT_BITS).any(|bit| self.pointers.get(bit))
            || self.overflow.iter().any(|ptr| ptr.target == target)
    }

    fn is_singleton(&self) -> bool {
        self.pointers.len() + self.overflow.len() == 1
    }

    fn is_empty(&self) -> bool {
        self.pointers.is_empty() && self.overflow.is_empty()
    }

    fn len(&self) -> usize {
        self.pointers.len() + self.overflow.len()
    }

    fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Pointer> + '_> {
        Box::new(
            self.pointers
                .iter()
                .map(Self::decode)
                .chain(self.overflow.iter().copied()),
        )
    }
}

impl std::fmt::Debug for SmallOffsetsPointsToSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Like [`SmallOffsetsPointsToSet`], but each slot bit `i` stands for the
/// offset `i * DIVISOR`, so slots reach `62 * DIVISOR` bytes for offsets that
/// the divisor divides. Anything else spills.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DivisibleOffsetsPointsToSet {
    pointers: SparseBitvector,
    overflow: BTreeSet<Pointer>,
}

impl DivisibleOffsetsPointsToSet {
    pub const DIVISOR: u64 = 4;

    fn slot_bit(target: NodeId, offset: Offset) -> Option<u64> {
        if offset.is_unknown() {
            return Some(slot_start(target) + UNKNOWN_SLOT_BIT);
        }
        let value = offset.value();
        if value % Self::DIVISOR == 0 && value / Self::DIVISOR < UNKNOWN_SLOT_BIT {
            Some(slot_start(target) + value / Self::DIVISOR)
        } else {
            None
        }
    }

    fn decode(bit: u64) -> Pointer {
        let target = target_for_id(bit / SLOT_BITS + 1);
        let slot = bit % SLOT_BITS;
        if slot == UNKNOWN_SLOT_BIT {
            Pointer::new(target, Offset::UNKNOWN)
        } else {
            Pointer::new(target, Offset::new(slot * Self::DIVISOR))
        }
    }
}

impl PointsToSet for DivisibleOffsetsPointsToSet {
    fn add(&mut self, target: NodeId, offset: Offset) -> bool {
        match Self::slot_bit(target, offset) {
            Some(bit) => self.pointers.set(bit),
            None => self.overflow.insert(Pointer::new(target, offset)),
        }
    }

    fn union(&mut self, other: &Self) -> bool {
        let mut changed = self.pointers.union(&other.pointers);
        for ptr in &other.overflow {
            changed |= self.overflow.insert(*ptr);
        }
        changed
    }

    fn remove(&mut self, target: NodeId, offset: Offset) -> bool {
        match Self::slot_bit(target, offset) {
            Some(bit) => self.pointers.unset(bit),
            None => self.overflow.remove(&Pointer::new(target, offset)),
        }
    }

    fn remove_target(&mut self, target: NodeId) -> bool {
        let start = slot_start(target);
        let mut changed = false;
        for bit in start..start + SLOT_BITS {
            changed |= self.pointers.unset(bit);
        }
        let before = self.overflow.len();
        self.overflow.retain(|ptr| ptr.target != target);
        changed || self.overflow.len() != before
    }

    fn clear(&mut self) {
        self.pointers.clear();
        self.overflow.clear();
    }

    fn points_to(&self, target: NodeId, offset: Offset) -> bool {
        match Self::slot_bit(target, offset) {
            Some(bit) => self.pointers.get(bit),
            None => self.overflow.contains(&Pointer::new(target, offset)),
        }
    }

    fn points_to_target(&self, target: NodeId) -> bool {
        let start = slot_start(target);
        (start..start + SLOT_BITS).any(|bit| self.pointers.get(bit))
            || self.overflow.iter().any(|ptr| ptr.target == target)
    }

    fn is_singleton(&self) -> bool {
        self.pointers.len() + self.overflow.len() == 1
    }

    fn is_empty(&self) -> bool {
        self.pointers.is_empty() && self.overflow.is_empty()
    }

    fn len(&self) -> usize {
        self.pointers.len() + self.overflow.len()
    }

    fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Pointer> + '_> {
        Box::new(
            self.pointers
                .iter()
                .map(Self::decode)
                .chain(self.overflow.iter().copied()),
        )
    }
}

impl std::fmt::Debug for DivisibleOffsetsPointsToSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
