//! The flow-insensitive engine: an inclusion-style fixpoint with one
//! points-to set per node. Loads, stores and memory copies grow copy edges
//! between memory cells as their pointer operands gain targets; a new edge
//! propagates immediately and any set change re-enqueues the readers.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use super::{cap_offset, link_callees, AnalysisError, Options};
use crate::{
    graph::{NodeId, NodeKind, PointerGraph},
    offset::Offset,
    points_to::{Pointer, PointsToSet},
};

pub fn run<P: PointsToSet>(
    graph: &mut PointerGraph<P>,
    options: Options,
) -> Result<(), AnalysisError> {
    let mut solver = Solver {
        graph,
        options,
        worklist: VecDeque::new(),
        copy_edges: HashMap::new(),
        steps: 0,
    };
    solver.run()
}

struct Solver<'a, P: PointsToSet> {
    graph: &'a mut PointerGraph<P>,
    options: Options,
    worklist: VecDeque<NodeId>,
    /// `from -> to` means the set of `from` flows into the set of `to`.
    copy_edges: HashMap<NodeId, HashSet<NodeId>>,
    steps: usize,
}

enum Transfer {
    SelfAddress,
    Gep(Offset),
    Load,
    Store,
    Memcpy,
    UnionOperands,
    Resolve,
    Nothing,
}

impl<P: PointsToSet> Solver<'_, P> {
    fn run(&mut self) -> Result<(), AnalysisError> {
        // the sets of allocations and constants were populated at build
        // time; everything else derives from them
        let graph = &*self.graph;
        let seeds: Vec<NodeId> = graph
            .node_ids()
            .filter(|&id| !graph.node(id).points_to().is_empty())
            .collect();
        for id in seeds {
            self.enqueue(id);
            self.enqueue_users(id);
        }

        while let Some(n) = self.worklist.pop_front() {
            self.bump_step()?;
            self.process(n);
        }
        debug!("flow-insensitive fixpoint after {} steps", self.steps);
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

    /// The set of `n` grew: its own copy edges must propagate again and its
    /// users must re-run their transfer.
    fn changed(&mut self, n: NodeId) {
        self.enqueue(n);
        self.enqueue_users(n);
    }

    fn add_pointer(&mut self, n: NodeId, ptr: Pointer) {
        if self.graph.node_mut(n).points_to_mut().add_pointer(ptr) {
            self.changed(n);
        }
    }

    fn union_into(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        let src = self.graph.node(from).points_to().clone();
        if self.graph.node_mut(to).points_to_mut().union(&src) {
            self.changed(to);
        }
    }

    fn add_copy_edge(&mut self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        if self.copy_edges.entry(from).or_default().insert(to) {
            self.union_into(from, to);
        }
    }

    fn pointers_of(&self, n: NodeId) -> Vec<Pointer> {
        self.graph.node(n).points_to().iter().collect()
    }

    fn process(&mut self, n: NodeId) {
        let node = self.graph.node(n);
        let operands = node.operands().to_vec();
        let transfer = match node.kind() {
            NodeKind::Alloc(_) | NodeKind::DynAlloc(_) => Transfer::SelfAddress,
            NodeKind::Gep { offset } => Transfer::Gep(*offset),
            NodeKind::Load => Transfer::Load,
            NodeKind::Store => Transfer::Store,
            NodeKind::Memcpy { .. } => Transfer::Memcpy,
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
            Transfer::Load => {
                for ptr in self.pointers_of(operands[0]) {
                    if ptr.is_null() || ptr.is_invalidated() {
                        continue;
                    }
                    // reads through unknown memory flow its self-pointer in
                    self.add_copy_edge(ptr.target, n);
                }
            }
            Transfer::Store => {
                let (value, dst) = (operands[0], operands[1]);
                for ptr in self.pointers_of(dst) {
                    if ptr.is_null() || ptr.is_unknown() || ptr.is_invalidated() {
                        continue;
                    }
                    self.add_copy_edge(value, ptr.target);
                }
            }
            Transfer::Memcpy => {
                let (src, dst) = (operands[0], operands[1]);
                for sp in self.pointers_of(src) {
                    if sp.is_null() || sp.is_unknown() || sp.is_invalidated() {
                        continue;
                    }
                    for dp in self.pointers_of(dst) {
                        if dp.is_null() || dp.is_unknown() || dp.is_invalidated() {
                            continue;
                        }
                        self.add_copy_edge(sp.target, dp.target);
                    }
                }
            }
            Transfer::UnionOperands => {
                for op in operands {
                    self.union_into(op, n);
                }
            }
            Transfer::Resolve => {
                for touched in link_callees(self.graph, n) {
                    self.enqueue(touched);
                }
            }
            Transfer::Nothing => {}
        }

        // propagate the (possibly grown) set along this node's copy edges
        if let Some(succs) = self.copy_edges.get(&n) {
            for to in succs.iter().copied().collect::<Vec<_>>() {
                self.union_into(n, to);
            }
        }
    }
}
