use super::*;
use crate::graph::{AllocInfo, PointerGraph};

/// Live node ids usable as targets, backed by a real graph.
fn targets<const N: usize>() -> [NodeId; N] {
    let mut graph: PointerGraph = PointerGraph::new();
    [(); N].map(|_| graph.create_alloc(AllocInfo::default()))
}

fn ptr(target: NodeId, offset: u64) -> Pointer {
    Pointer::new(target, Offset::new(offset))
}

fn unknown(target: NodeId) -> Pointer {
    Pointer::new(target, Offset::UNKNOWN)
}

#[test]
fn test_add_and_query() {
    let [a, b] = targets();
    let mut s = OffsetsPointsToSet::new();
    assert!(s.is_empty());
    assert!(s.add(a, Offset::ZERO));
    assert!(!s.add(a, Offset::ZERO));
    assert!(s.add(a, Offset::new(4)));
    assert!(s.add(b, Offset::new(8)));
    assert_eq!(s.len(), 3);
    assert!(s.points_to(a, Offset::ZERO));
    assert!(s.points_to(a, Offset::new(4)));
    assert!(!s.points_to(a, Offset::new(8)));
    assert!(s.points_to_target(b));
    assert!(!s.is_singleton());
}

#[test]
fn test_unknown_offset_absorbs() {
    let [a] = targets();
    let mut s = OffsetsPointsToSet::new();
    s.add(a, Offset::ZERO);
    s.add(a, Offset::new(4));
    assert!(s.add(a, Offset::UNKNOWN));
    // concrete offsets are folded into the unknown one
    assert_eq!(s.len(), 1);
    assert!(s.may_point_to(a, Offset::new(12)));
    assert!(s.points_to_target(a));
    // adding under the unknown offset is a no-op now
    assert!(!s.add(a, Offset::new(16)));
    assert!(!s.add(a, Offset::UNKNOWN));
}

#[test]
fn test_must_point_to() {
    let [a, b] = targets();
    let mut s = OffsetsPointsToSet::new();
    s.add(a, Offset::ZERO);
    assert!(s.must_point_to(a, Offset::ZERO));
    s.add(b, Offset::ZERO);
    assert!(!s.must_point_to(a, Offset::ZERO));
}

#[test]
fn test_must_point_to_unknown_offset() {
    let [a] = targets();
    let mut s = OffsetsPointsToSet::new();
    s.add(a, Offset::UNKNOWN);
    // the set is definitely exactly {(a, ?)}
    assert!(s.must_point_to(a, Offset::UNKNOWN));
    assert!(!s.must_point_to(a, Offset::ZERO));
    s.add(NodeId::NULLPTR, Offset::ZERO);
    assert!(!s.must_point_to(a, Offset::UNKNOWN));
}

#[test]
fn test_union() {
    let [a, b, c] = targets();
    let mut s1: OffsetsPointsToSet = [ptr(a, 0), ptr(b, 4)].into_iter().collect();
    let s2: OffsetsPointsToSet = [ptr(b, 4), ptr(c, 8)].into_iter().collect();
    assert!(s1.union(&s2));
    assert!(!s1.union(&s2));
    assert_eq!(s1.len(), 3);
    assert!(s1.points_to(c, Offset::new(8)));
}

#[test]
fn test_remove() {
    let [a, b] = targets();
    let mut s: OffsetsPointsToSet = [ptr(a, 0), ptr(a, 4), ptr(b, 0)].into_iter().collect();
    assert!(s.remove(a, Offset::new(4)));
    assert!(!s.remove(a, Offset::new(4)));
    assert!(!s.points_to(a, Offset::new(4)));
    assert!(s.points_to(a, Offset::ZERO));
    assert!(s.remove_target(a));
    assert!(!s.remove_target(a));
    assert!(!s.points_to_target(a));
    assert!(s.points_to_target(b));
}

#[test]
fn test_remove_unknown_offset() {
    let [a] = targets();
    let mut s = OffsetsPointsToSet::new();
    s.add(a, Offset::UNKNOWN);
    assert!(s.remove(a, Offset::UNKNOWN));
    assert!(s.is_empty());
}

#[test]
fn test_iteration_exactly_once() {
    let [a, b] = targets();
    let expected = vec![ptr(a, 0), ptr(a, 7), unknown(b)];
    let s: OffsetsPointsToSet = expected.iter().copied().collect();
    let mut visited: Vec<Pointer> = s.iter().collect();
    let again: Vec<Pointer> = s.iter().collect();
    // same snapshot, same order
    assert_eq!(visited, again);
    visited.sort();
    let mut expected = expected;
    expected.sort();
    assert_eq!(visited, expected);
}

#[test]
fn test_sentinel_queries() {
    let mut s = OffsetsPointsToSet::new();
    s.add(NodeId::NULLPTR, Offset::ZERO);
    assert!(s.has_null());
    assert!(!s.has_unknown());
    s.add(NodeId::UNKNOWN_MEMORY, Offset::UNKNOWN);
    assert!(s.has_unknown());
    s.add(NodeId::INVALIDATED, Offset::ZERO);
    assert!(s.has_invalidated());
}

#[test]
fn test_interning_stable() {
    let [a, b] = targets();
    let ids: Vec<u64> = (0..100u64)
        .map(|i| intern_pointer(ptr(a, i)))
        .collect();
    let later = intern_pointer(ptr(b, 0));
    assert!(!ids.contains(&later));
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(pointer_for_id(*id), ptr(a, i as u64));
        // re-interning yields the same id
        assert_eq!(intern_pointer(ptr(a, i as u64)), *id);
    }
    let tid = intern_target(a);
    assert_eq!(target_for_id(tid), a);
    assert_eq!(intern_target(a), tid);
}

#[test]
fn test_small_offsets_spill() {
    let [a] = targets();
    let mut s = SmallOffsetsPointsToSet::default();
    s.add(a, Offset::new(4));
    s.add(a, Offset::new(100));
    s.add(a, Offset::UNKNOWN);
    assert_eq!(s.len(), 3);
    assert_eq!(s.overflow_len(), 1);
    assert!(s.points_to(a, Offset::new(4)));
    assert!(s.points_to(a, Offset::new(100)));
    assert!(s.may_point_to(a, Offset::new(33)));
    assert!(s.remove(a, Offset::new(100)));
    assert_eq!(s.overflow_len(), 0);
    assert!(s.remove_target(a));
    assert!(s.is_empty());
}

#[test]
fn test_divisible_offsets_spill() {
    let [a] = targets();
    let mut s = DivisibleOffsetsPointsToSet::default();
    s.add(a, Offset::new(8));
    s.add(a, Offset::new(6));
    assert_eq!(s.overflow_len(), 1);
    assert!(s.points_to(a, Offset::new(8)));
    assert!(s.points_to(a, Offset::new(6)));
    assert!(!s.points_to(a, Offset::new(12)));
    // in-slot range reaches 62 * divisor
    s.add(a, Offset::new(62 * DivisibleOffsetsPointsToSet::DIVISOR));
    assert_eq!(s.overflow_len(), 1);
    s.add(a, Offset::new(63 * DivisibleOffsetsPointsToSet::DIVISOR));
    assert_eq!(s.overflow_len(), 2);
}

#[test]
fn test_single_bitvector_remove() {
    let [a, b] = targets();
    let mut s = SingleBitvectorPointsToSet::default();
    s.add(a, Offset::ZERO);
    s.add(a, Offset::new(4));
    s.add(b, Offset::ZERO);
    assert!(s.remove(a, Offset::ZERO));
    assert!(!s.remove(a, Offset::ZERO));
    assert!(s.remove_target(a));
    assert!(!s.points_to_target(a));
    assert!(s.points_to_target(b));
    assert!(s.is_singleton());
}

#[test]
fn test_separate_offsets_is_coarser() {
    let [a, b] = targets();
    let mut s = SeparateOffsetsPointsToSet::default();
    s.add(a, Offset::ZERO);
    s.add(b, Offset::new(8));
    // the cross product is an upper bound of the exact set
    assert!(s.points_to(a, Offset::new(8)));
    assert!(s.points_to(b, Offset::ZERO));
    assert_eq!(s.len(), 4);
    assert!(!s.is_singleton());
    // removal acts only when expressible
    assert!(!s.remove(a, Offset::ZERO));
    assert!(s.remove_target(a));
    assert!(s.remove(b, Offset::new(8)));
    assert!(s.is_empty());
}

/// The exact representations agree on the observable queries for any
/// operation sequence; the separate-offsets one stays an upper bound.
#[test]
fn test_representations_agree() {
    let [a, b, c] = targets();
    fn script<P: PointsToSet>(a: NodeId, b: NodeId, c: NodeId) -> P {
        let mut s = P::default();
        s.add(a, Offset::ZERO);
        s.add(a, Offset::new(16));
        s.add(b, Offset::new(200));
        s.add(b, Offset::UNKNOWN);
        s.add(c, Offset::new(3));
        s.remove(c, Offset::new(3));
        let mut other = P::default();
        other.add(a, Offset::new(62));
        other.add(c, Offset::new(7));
        s.union(&other);
        s.remove_target(c);
        s
    }

    let reference: OffsetsPointsToSet = script(a, b, c);
    let single: SingleBitvectorPointsToSet = script(a, b, c);
    let small: SmallOffsetsPointsToSet = script(a, b, c);
    let divisible: DivisibleOffsetsPointsToSet = script(a, b, c);
    let separate: SeparateOffsetsPointsToSet = script(a, b, c);

    let offsets = [
        Offset::ZERO,
        Offset::new(3),
        Offset::new(7),
        Offset::new(16),
        Offset::new(62),
        Offset::new(200),
        Offset::UNKNOWN,
    ];
    for target in [a, b, c] {
        assert_eq!(
            reference.points_to_target(target),
            single.points_to_target(target)
        );
        assert_eq!(
            reference.points_to_target(target),
            small.points_to_target(target)
        );
        assert_eq!(
            reference.points_to_target(target),
            divisible.points_to_target(target)
        );
        for offset in offsets {
            let expected = reference.may_point_to(target, offset);
            assert_eq!(expected, single.may_point_to(target, offset));
            assert_eq!(expected, small.may_point_to(target, offset));
            assert_eq!(expected, divisible.may_point_to(target, offset));
            if expected {
                assert!(separate.may_point_to(target, offset));
            }
        }
    }
    assert_eq!(reference.is_empty(), single.is_empty());
    assert_eq!(reference.is_empty(), small.is_empty());
    assert_eq!(reference.is_empty(), divisible.is_empty());
}
