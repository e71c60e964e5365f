//! The flow-sensitive engine: in addition to the points-to sets, every node
//! carries a memory map from abstract objects to their per-offset contents,
//! threaded along control edges with union as the meet. A store may kill the
//! previous contents of a slot when its destination is exact.

use std::collections::{BTreeMap, HashMap, VecDeque};

use etrace::some_or;
use log::debug;

use super::{cap_offset, link_callees, AnalysisError, Options};
use crate::{
    graph::{NodeId, NodeKind, PointerGraph},
    offset::Offset,
    points_to::{Pointer, PointsToSet},
};

/// Slot width assumed for a stored pointer value.
const POINTER_BYTES: u64 = 8;

pub fn run<P: PointsToSet>(
    graph: &mut PointerGraph<P>,
    options: Options,
) -> Result<(), AnalysisError> {
    let mut solver = Solver {
        graph,
        options,
        memory: HashMap::new(),
        worklist: VecDeque::new(),
        steps: 0,
    };
    solver.run()
}

/// The contents of one abstract object: a points-to set per byte offset,
/// with the unknown-offset slot ordered last.
#[derive(Clone, Debug, Default, PartialEq)]
struct MemoryObject<P: PointsToSet> {
    slots: BTreeMap<Offset, P>,
}

impl<P: PointsToSet> MemoryObject<P> {
    fn write_weak(&mut self, offset: Offset, value: &P) -> bool {
        self.slots.entry(offset).or_default().union(value)
    }

    fn write_strong(&mut self, offset: Offset, value: P) {
        self.slots.insert(offset, value);
    }

    /// Unions the contents visible at `offset` into `out`: the slot itself
    /// and the unknown slot, or the whole column for an unknown offset.
    fn read(&self, offset: Offset, out: &mut P) -> bool {
        let mut changed = false;
        if offset.is_unknown() {
            for value in self.slots.values() {
                changed |= out.union(value);
            }
        } else {
            if let Some(value) = self.slots.get(&offset) {
                changed |= out.union(value);
            }
            if let Some(value) = self.slots.get(&Offset::UNKNOWN) {
                changed |= out.union(value);
            }
        }
        changed
    }

    fn join(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (offset, value) in &other.slots {
            changed |= self.slots.entry(*offset).or_default().union(value);
        }
        changed
    }
}

/// Memory state at one program point: abstract object -> contents.
#[derive(Clone, Debug, Default, PartialEq)]
struct MemoryMap<P: PointsToSet> {
    objects: BTreeMap<NodeId, MemoryObject<P>>,
}

impl<P: PointsToSet> MemoryMap<P> {
    fn object(&self, target: NodeId) -> Option<&MemoryObject<P>> {
        self.objects.get(&target)
    }

    fn object_mut(&mut self, target: NodeId) -> &mut MemoryObject<P> {
        self.objects.entry(target).or_default()
    }

    fn join(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for (target, object) in &other.objects {
            changed |= self.objects.entry(*target).or_default().join(object);
        }
        changed
    }
}

struct Solver<'a, P: PointsToSet> {
    graph: &'a mut PointerGraph<P>,
    options: Options,
    /// Post-state of every processed node.
    memory: HashMap<NodeId, MemoryMap<P>>,
    worklist: VecDeque<NodeId>,
    steps: usize,
}

enum Transfer {
    SelfAddress,
    Gep(Offset),
    Load,
    Store,
    Memcpy(Offset),
    UnionOperands,
    Resolve,
    Nothing,
}

impl<P: PointsToSet> Solver<'_, P> {
    fn run(&mut self) -> Result<(), AnalysisError> {
        let graph = &*self.graph;
        let seeds: Vec<NodeId> = graph
            .node_ids()
            .filter(|&id| !graph.node(id).points_to().is_empty())
            .collect();
        for id in seeds {
            self.enqueue(id);
            self.enqueue_users(id);
        }
        // globals run before anything else; the entry kicks off control flow
        if let Some(globals) = self.graph.globals() {
            for id in self.graph.nodes_from(globals, false) {
                self.enqueue(id);
            }
        }
        if let Some(entry) = self.graph.entry() {
            let entry_node = self.graph.subgraph(entry).entry();
            self.enqueue(entry_node);
        }

        while let Some(n) = self.worklist.pop_front() {
            self.bump_step()?;
            self.process(n);
        }
        debug!("flow-sensitive fixpoint after {} steps", self.steps);
        Ok(())
    }

    fn bump_step(&mut self) -> Result<(), AnalysisError> {
        self.steps += 1;
        match self.options.step_limit {
            Some(limit) if self.steps > limit => {
                Err(AnalysisError(format!("step limit {} exceeded", limit)))
            }
            _ => Ok(()),
        }
    }

    fn enqueue(&mut self, n: NodeId) {
        self.worklist.push_back(n);
    }

    fn enqueue_users(&mut self, n: NodeId) {
        let users = self.graph.node(n).users().to_vec();
        for user in users {
            self.enqueue(user);
        }
    }

    fn changed_points_to(&mut self, n: NodeId) {
        self.enqueue(n);
        self.enqueue_users(n);
    }

    fn add_pointer(&mut self, n: NodeId, ptr: Pointer) {
        if self.graph.node_mut(n).points_to_mut().add_pointer(ptr) {
            self.changed_points_to(n);
        }
    }

    fn union_points_to(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        let src = self.graph.node(from).points_to().clone();
        if self.graph.node_mut(to).points_to_mut().union(&src) {
            self.changed_points_to(to);
        }
    }

    fn pointers_of(&self, n: NodeId) -> Vec<Pointer> {
        self.graph.node(n).points_to().iter().collect()
    }

    /// Meet over the control predecessors, crossing call and return linkage:
    /// an entry additionally joins the state of every registered call site,
    /// a call-return the state of every linked callee return.
    fn input_memory(&self, n: NodeId) -> MemoryMap<P> {
        let mut mm = MemoryMap::default();
        let node = self.graph.node(n);
        for &pred in node.predecessors() {
            if let Some(state) = self.memory.get(&pred) {
                mm.join(state);
            }
        }
        match node.kind() {
            NodeKind::Entry => {
                for &site in self.graph.call_graph().callers(n) {
                    if let Some(state) = self.memory.get(&site) {
                        mm.join(state);
                    }
                }
            }
            NodeKind::CallReturn { .. } => {
                for &op in node.operands() {
                    if !matches!(self.graph.node(op).kind(), NodeKind::Return { .. }) {
                        continue;
                    }
                    if let Some(state) = self.memory.get(&op) {
                        mm.join(state);
                    }
                }
            }
            _ => {}
        }
        mm
    }

    /// Where a memory-map change flows next: the successors, plus linked
    /// callee entries after a call and linked return sites after a return.
    fn control_successors(&self, n: NodeId) -> Vec<NodeId> {
        let node = self.graph.node(n);
        let mut out = node.successors().to_vec();
        match node.kind() {
            NodeKind::Call { callees, .. } | NodeKind::Fork { callees } => {
                out.extend(callees.iter().map(|sg| self.graph.subgraph(*sg).entry()));
            }
            NodeKind::Return { return_sites } => {
                out.extend_from_slice(return_sites);
            }
            _ => {}
        }
        out
    }

    fn process(&mut self, n: NodeId) {
        let mut mm = self.input_memory(n);
        let node = self.graph.node(n);
        let operands = node.operands().to_vec();
        let transfer = match node.kind() {
            NodeKind::Alloc(_) | NodeKind::DynAlloc(_) => Transfer::SelfAddress,
            NodeKind::Gep { offset } => Transfer::Gep(*offset),
            NodeKind::Load => Transfer::Load,
            NodeKind::Store => Transfer::Store,
            NodeKind::Memcpy { len } => Transfer::Memcpy(*len),
            NodeKind::Phi | NodeKind::CallReturn { .. } | NodeKind::Return { .. } => {
                Transfer::UnionOperands
            }
            NodeKind::Call { .. } | NodeKind::Fork { .. } | NodeKind::Join { .. } => {
                Transfer::Resolve
            }
            NodeKind::Constant { .. }
            | NodeKind::Entry
            | NodeKind::Noop
            | NodeKind::NullAddr
            | NodeKind::UnknownMem
            | NodeKind::Invalidated => Transfer::Nothing,
        };

        match transfer {
            Transfer::SelfAddress => {
                self.add_pointer(n, Pointer::new(n, Offset::ZERO));
            }
            Transfer::Gep(offset) => {
                for ptr in self.pointers_of(operands[0]) {
                    let shifted = cap_offset(ptr.offset.add(offset), &self.options);
                    self.add_pointer(n, Pointer::new(ptr.target, shifted));
                }
            }
            Transfer::Load => self.transfer_load(n, operands[0], &mm),
            Transfer::Store => self.transfer_store(operands[0], operands[1], &mut mm),
            Transfer::Memcpy(len) => {
                self.transfer_memcpy(operands[0], operands[1], len, &mut mm);
            }
            Transfer::UnionOperands => {
                for op in operands {
                    self.union_points_to(op, n);
                }
            }
            Transfer::Resolve => {
                for touched in link_callees(self.graph, n) {
                    self.enqueue(touched);
                }
            }
            Transfer::Nothing => {}
        }

        let stored = self.memory.entry(n).or_default();
        if *stored != mm {
            *stored = mm;
            for succ in self.control_successors(n) {
                self.enqueue(succ);
            }
        }
    }

    fn transfer_load(&mut self, n: NodeId, src: NodeId, mm: &MemoryMap<P>) {
        let mut loaded = P::default();
        for ptr in self.pointers_of(src) {
            if ptr.is_null() || ptr.is_invalidated() {
                continue;
            }
            if ptr.is_unknown() {
                loaded.add(NodeId::UNKNOWN_MEMORY, Offset::UNKNOWN);
                continue;
            }
            let mut slot_value = P::default();
            if let Some(object) = mm.object(ptr.target) {
                object.read(ptr.offset, &mut slot_value);
            }
            if slot_value.is_empty() {
                // an untouched slot of a zeroed allocation holds null
                let zeroed = self
                    .graph
                    .node(ptr.target)
                    .alloc_info()
                    .is_some_and(|info| info.zeroed);
                if zeroed {
                    slot_value.add(NodeId::NULLPTR, Offset::ZERO);
                }
            }
            loaded.union(&slot_value);
        }
        if self.graph.node_mut(n).points_to_mut().union(&loaded) {
            self.changed_points_to(n);
        }
    }

    fn transfer_store(&mut self, value: NodeId, dst: NodeId, mm: &mut MemoryMap<P>) {
        let value_set = self.graph.node(value).points_to().clone();
        let dst_set = self.graph.node(dst).points_to();

        if dst_set.is_singleton() {
            let ptr = dst_set.iter().next().unwrap();
            if self.can_overwrite(ptr) {
                mm.object_mut(ptr.target).write_strong(ptr.offset, value_set);
                return;
            }
        }
        for ptr in self.pointers_of(dst) {
            if ptr.is_null() || ptr.is_unknown() || ptr.is_invalidated() {
                continue;
            }
            mm.object_mut(ptr.target).write_weak(ptr.offset, &value_set);
        }
    }

    /// A store may kill the previous slot contents only when it certainly
    /// writes that one slot: a single exact target with a concrete offset
    /// inside an allocation of known size.
    fn can_overwrite(&self, ptr: Pointer) -> bool {
        if ptr.offset.is_unknown() || ptr.is_null() || ptr.is_unknown() || ptr.is_invalidated() {
            return false;
        }
        let size = some_or!(self.graph.node(ptr.target).size(), return false);
        ptr.offset.value() + POINTER_BYTES <= size
    }

    fn transfer_memcpy(&mut self, src: NodeId, dst: NodeId, len: Offset, mm: &mut MemoryMap<P>) {
        for sp in self.pointers_of(src) {
            if sp.is_null() || sp.is_unknown() || sp.is_invalidated() {
                continue;
            }
            let src_object = some_or!(mm.object(sp.target), continue).clone();
            for dp in self.pointers_of(dst) {
                if dp.is_null() || dp.is_unknown() || dp.is_invalidated() {
                    continue;
                }
                let exact = !sp.offset.is_unknown() && !dp.offset.is_unknown() && !len.is_unknown();
                let dst_object = mm.object_mut(dp.target);
                for (&offset, value) in &src_object.slots {
                    if !exact {
                        // unknown bounds widen to a full copy landing in the
                        // unknown slot
                        dst_object.write_weak(Offset::UNKNOWN, value);
                    } else if offset.is_unknown() {
                        dst_object.write_weak(Offset::UNKNOWN, value);
                    } else if offset.in_range(sp.offset, sp.offset.add(len)) {
                        let delta = offset.value() - sp.offset.value();
                        let target_offset = dp.offset.add(Offset::new(delta));
                        dst_object.write_weak(target_offset, value);
                    }
                }
            }
        }
    }
}
