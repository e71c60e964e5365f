use std::{
    any::Any,
    collections::{HashMap, HashSet, VecDeque},
};

use crate::{
    offset::Offset,
    points_to::{OffsetsPointsToSet, Pointer, PointsToSet},
};

mod call_graph;
#[cfg(test)]
mod tests;

pub use call_graph::CallGraph;

/// Identifier of a node in a [`PointerGraph`]. Ids are dense, monotone and
/// never reused; id 0 is the invalid sentinel and never names a live node.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const INVALID: Self = Self(0);
    /// The null pointer target, created by every graph as its first node.
    pub const NULLPTR: Self = Self(1);
    /// The unknown-memory target.
    pub const UNKNOWN_MEMORY: Self = Self(2);
    /// The invalidated-memory target.
    pub const INVALIDATED: Self = Self(3);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    fn is_sentinel(self) -> bool {
        (1..=3).contains(&self.0)
    }

    fn from_index(index: usize) -> Self {
        assert!(index > 0 && index < u32::MAX as usize, "node id space exhausted");
        Self(index as u32)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifier of a procedure subgraph. 1-based, assigned in creation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubgraphId(u32);

impl SubgraphId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl std::fmt::Debug for SubgraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Allocation attributes carried by `Alloc` and `DynAlloc` nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocInfo {
    /// Object size in bytes, if known.
    pub size: Option<u64>,
    pub heap: bool,
    pub zeroed: bool,
    pub global: bool,
}

/// The kind of a node together with its per-kind payload.
#[derive(Debug)]
pub enum NodeKind {
    /// A statically sized allocation; the node doubles as the abstract
    /// memory location it allocates.
    Alloc(AllocInfo),
    /// A dynamic allocation (heap objects of possibly unknown size).
    DynAlloc(AllocInfo),
    /// Pointer arithmetic: the single operand plus a constant offset.
    Gep { offset: Offset },
    /// Memory copy of `len` bytes; operands are source and destination.
    Memcpy { len: Offset },
    /// Reads pointer values stored at the operand's targets.
    Load,
    /// Writes the first operand's targets into the second operand's targets.
    Store,
    /// Weak join of all operands.
    Phi,
    /// A literal pointer; the points-to set is seeded at creation.
    Constant { ptr: Pointer },
    /// A call site. `indirect` means the first operand computes the callee;
    /// the remaining operands are the arguments.
    Call {
        indirect: bool,
        callees: Vec<SubgraphId>,
        call_return: Option<NodeId>,
    },
    /// The caller-side results of a call, linked to callee returns as they
    /// are discovered.
    CallReturn { call: NodeId },
    /// A return statement; operands are the returned values. `return_sites`
    /// grows as calls of the owning subgraph are linked.
    Return { return_sites: Vec<NodeId> },
    /// Thread creation: resolved like a call, but no caller data flow.
    Fork { callees: Vec<SubgraphId> },
    /// Thread join: records the joined subgraphs, no data flow.
    Join { joined: Vec<SubgraphId> },
    /// The distinguished first node of a subgraph.
    Entry,
    /// Control-flow placeholder.
    Noop,
    NullAddr,
    UnknownMem,
    Invalidated,
}

/// A node of the pointer graph.
pub struct Node<P: PointsToSet = OffsetsPointsToSet> {
    id: NodeId,
    kind: NodeKind,
    operands: Vec<NodeId>,
    users: Vec<NodeId>,
    successors: Vec<NodeId>,
    predecessors: Vec<NodeId>,
    points_to: P,
    user_data: Option<Box<dyn Any>>,
    dfs_mark: u32,
}

impl<P: PointsToSet> Node<P> {
    fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            operands: vec![],
            users: vec![],
            successors: vec![],
            predecessors: vec![],
            points_to: P::default(),
            user_data: None,
            dfs_mark: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub(crate) fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    #[inline]
    pub fn operands(&self) -> &[NodeId] {
        &self.operands
    }

    #[inline]
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    #[inline]
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    #[inline]
    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }

    /// The points-to set computed for this node (read-only view).
    #[inline]
    pub fn points_to(&self) -> &P {
        &self.points_to
    }

    #[inline]
    pub(crate) fn points_to_mut(&mut self) -> &mut P {
        &mut self.points_to
    }

    pub fn set_user_data(&mut self, data: Box<dyn Any>) {
        self.user_data = Some(data);
    }

    /// The opaque frontend handle attached to this node, if any.
    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_ref()?.downcast_ref()
    }

    pub fn alloc_info(&self) -> Option<&AllocInfo> {
        match &self.kind {
            NodeKind::Alloc(info) | NodeKind::DynAlloc(info) => Some(info),
            _ => None,
        }
    }

    /// Allocation size, for allocation nodes that know it.
    pub fn size(&self) -> Option<u64> {
        self.alloc_info().and_then(|info| info.size)
    }
}

impl<P: PointsToSet> std::fmt::Debug for Node<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {:?} -> {:?}", self.id, self.kind, self.points_to)
    }
}

/// A single procedure in the pointer graph.
#[derive(Debug)]
pub struct PointerSubgraph {
    id: SubgraphId,
    entry: NodeId,
    params: Vec<NodeId>,
    returns: Vec<NodeId>,
    vararg: Option<NodeId>,
}

impl PointerSubgraph {
    #[inline]
    pub fn id(&self) -> SubgraphId {
        self.id
    }

    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// The formal-parameter PHI nodes, in argument order.
    #[inline]
    pub fn params(&self) -> &[NodeId] {
        &self.params
    }

    #[inline]
    pub fn returns(&self) -> &[NodeId] {
        &self.returns
    }

    /// The node gathering variadic arguments, if the procedure has one.
    #[inline]
    pub fn vararg(&self) -> Option<NodeId> {
        self.vararg
    }
}

/// The pointer graph of a whole program: all nodes, all procedure subgraphs,
/// and the call graph discovered so far.
///
/// Nodes live in a dense id-indexed arena and refer to each other by id, so
/// the intrinsically cyclic shape of pointer programs needs no reference
/// counting. Removal clears the slot but never reassigns the id.
pub struct PointerGraph<P: PointsToSet = OffsetsPointsToSet> {
    nodes: Vec<Option<Node<P>>>,
    subgraphs: Vec<PointerSubgraph>,
    entry: Option<SubgraphId>,
    globals: Option<NodeId>,
    entry_subgraphs: HashMap<NodeId, SubgraphId>,
    call_graph: CallGraph,
    dfs_epoch: u32,
}

impl<P: PointsToSet> Default for PointerGraph<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: PointsToSet> PointerGraph<P> {
    pub fn new() -> Self {
        let mut graph = Self {
            nodes: vec![None],
            subgraphs: vec![],
            entry: None,
            globals: None,
            entry_subgraphs: HashMap::new(),
            call_graph: CallGraph::new(),
            dfs_epoch: 0,
        };
        let null = graph.create(NodeKind::NullAddr);
        let unknown = graph.create(NodeKind::UnknownMem);
        let invalidated = graph.create(NodeKind::Invalidated);
        assert_eq!(null, NodeId::NULLPTR);
        assert_eq!(unknown, NodeId::UNKNOWN_MEMORY);
        assert_eq!(invalidated, NodeId::INVALIDATED);
        // unknown memory may hold anything, itself included
        graph
            .node_mut(unknown)
            .points_to_mut()
            .add(NodeId::UNKNOWN_MEMORY, Offset::UNKNOWN);
        graph
    }

    fn create(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Some(Node::new(id, kind)));
        id
    }

    /// The number of node slots, the invalid slot 0 included.
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: NodeId) -> &Node<P> {
        self.try_node(id).expect("invalid node id")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node<P> {
        self.nodes[id.index()].as_mut().expect("invalid node id")
    }

    pub fn try_node(&self, id: NodeId) -> Option<&Node<P>> {
        self.nodes.get(id.index())?.as_ref()
    }

    /// Every live node id in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().flatten().map(Node::id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<P>> {
        self.nodes.iter().flatten()
    }

    // ------------------------------------------------------------------
    // builder API
    // ------------------------------------------------------------------

    pub fn create_alloc(&mut self, info: AllocInfo) -> NodeId {
        let id = self.create(NodeKind::Alloc(info));
        self.node_mut(id).points_to_mut().add(id, Offset::ZERO);
        id
    }

    pub fn create_dyn_alloc(&mut self, info: AllocInfo) -> NodeId {
        let id = self.create(NodeKind::DynAlloc(info));
        self.node_mut(id).points_to_mut().add(id, Offset::ZERO);
        id
    }

    pub fn create_gep(&mut self, base: NodeId, offset: Offset) -> NodeId {
        let id = self.create(NodeKind::Gep { offset });
        self.add_operand(id, base);
        id
    }

    pub fn create_memcpy(&mut self, src: NodeId, dst: NodeId, len: Offset) -> NodeId {
        let id = self.create(NodeKind::Memcpy { len });
        self.add_operand(id, src);
        self.add_operand(id, dst);
        id
    }

    pub fn create_load(&mut self, src: NodeId) -> NodeId {
        let id = self.create(NodeKind::Load);
        self.add_operand(id, src);
        id
    }

    pub fn create_store(&mut self, value: NodeId, dst: NodeId) -> NodeId {
        let id = self.create(NodeKind::Store);
        self.add_operand(id, value);
        self.add_operand(id, dst);
        id
    }

    pub fn create_phi(&mut self, operands: &[NodeId]) -> NodeId {
        let id = self.create(NodeKind::Phi);
        for &op in operands {
            self.add_operand(id, op);
        }
        id
    }

    pub fn create_constant(&mut self, target: NodeId, offset: Offset) -> NodeId {
        assert!(self.try_node(target).is_some(), "constant target must be live");
        let ptr = Pointer::new(target, offset);
        let id = self.create(NodeKind::Constant { ptr });
        self.node_mut(id).points_to_mut().add_pointer(ptr);
        id
    }

    /// Creates a call site. `callee_op` is the node computing the callee for
    /// indirect calls; direct callees are attached with [`Self::add_callee`].
    pub fn create_call(&mut self, callee_op: Option<NodeId>, args: &[NodeId]) -> NodeId {
        let id = self.create(NodeKind::Call {
            indirect: callee_op.is_some(),
            callees: vec![],
            call_return: None,
        });
        if let Some(op) = callee_op {
            self.add_operand(id, op);
        }
        for &arg in args {
            self.add_operand(id, arg);
        }
        id
    }

    pub fn create_call_return(&mut self, call: NodeId) -> NodeId {
        let id = self.create(NodeKind::CallReturn { call });
        let NodeKind::Call { call_return, .. } = self.node_mut(call).kind_mut() else {
            panic!("call-return must be paired with a call");
        };
        assert!(call_return.is_none(), "call already has a call-return");
        *call_return = Some(id);
        id
    }

    pub fn create_return(&mut self, values: &[NodeId]) -> NodeId {
        let id = self.create(NodeKind::Return {
            return_sites: vec![],
        });
        for &value in values {
            self.add_operand(id, value);
        }
        id
    }

    pub fn create_fork(&mut self, callee_op: NodeId) -> NodeId {
        let id = self.create(NodeKind::Fork { callees: vec![] });
        self.add_operand(id, callee_op);
        id
    }

    pub fn create_join(&mut self, callee_op: Option<NodeId>) -> NodeId {
        let id = self.create(NodeKind::Join { joined: vec![] });
        if let Some(op) = callee_op {
            self.add_operand(id, op);
        }
        id
    }

    pub fn create_entry(&mut self) -> NodeId {
        self.create(NodeKind::Entry)
    }

    pub fn create_noop(&mut self) -> NodeId {
        self.create(NodeKind::Noop)
    }

    /// Registers a procedure. The first subgraph becomes the program entry
    /// unless [`Self::set_entry`] overrides it later.
    pub fn create_subgraph(
        &mut self,
        entry: NodeId,
        params: &[NodeId],
        returns: &[NodeId],
        vararg: Option<NodeId>,
    ) -> SubgraphId {
        assert!(
            matches!(self.node(entry).kind(), NodeKind::Entry),
            "subgraph entry must be an entry node"
        );
        for &param in params {
            assert!(
                matches!(self.node(param).kind(), NodeKind::Phi),
                "formal parameters must be phi nodes"
            );
        }
        for &ret in returns {
            assert!(
                matches!(self.node(ret).kind(), NodeKind::Return { .. }),
                "subgraph returns must be return nodes"
            );
        }
        let id = SubgraphId(self.subgraphs.len() as u32 + 1);
        self.subgraphs.push(PointerSubgraph {
            id,
            entry,
            params: params.to_vec(),
            returns: returns.to_vec(),
            vararg,
        });
        self.entry_subgraphs.insert(entry, id);
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    pub fn subgraph(&self, id: SubgraphId) -> &PointerSubgraph {
        &self.subgraphs[id.index()]
    }

    pub fn subgraphs(&self) -> impl Iterator<Item = &PointerSubgraph> {
        self.subgraphs.iter()
    }

    /// The subgraph whose entry node this is.
    pub fn subgraph_of_entry(&self, entry: NodeId) -> Option<SubgraphId> {
        self.entry_subgraphs.get(&entry).copied()
    }

    pub fn set_entry(&mut self, subgraph: SubgraphId) {
        assert!(subgraph.index() < self.subgraphs.len());
        self.entry = Some(subgraph);
    }

    pub fn entry(&self) -> Option<SubgraphId> {
        self.entry
    }

    /// Sets the first node of the globals chain. Globals are connected by
    /// successor edges in the order they should be processed.
    pub fn set_globals(&mut self, node: NodeId) {
        assert!(self.try_node(node).is_some());
        self.globals = Some(node);
    }

    pub fn globals(&self) -> Option<NodeId> {
        self.globals
    }

    /// Adds the intra-procedural control edge `a -> b`, keeping the
    /// successor and predecessor sets mirror images.
    pub fn add_successor(&mut self, a: NodeId, b: NodeId) {
        assert!(self.try_node(b).is_some(), "invalid successor");
        let node = self.node_mut(a);
        if node.successors.contains(&b) {
            return;
        }
        node.successors.push(b);
        self.node_mut(b).predecessors.push(a);
    }

    /// Adds `src` to the operands of `n`, keeping operand and user lists
    /// mirror images.
    pub fn add_operand(&mut self, n: NodeId, src: NodeId) {
        assert!(self.try_node(src).is_some(), "invalid operand");
        self.node_mut(n).operands.push(src);
        self.node_mut(src).users.push(n);
    }

    /// Drops every operand of `n`, unregistering `n` from the operands'
    /// user lists.
    pub fn remove_all_operands(&mut self, n: NodeId) {
        let operands = std::mem::take(&mut self.node_mut(n).operands);
        for op in operands {
            let users = &mut self.node_mut(op).users;
            if let Some(i) = users.iter().position(|&u| u == n) {
                users.swap_remove(i);
            }
        }
    }

    /// Detaches `n` from control flow: all successor and predecessor edges
    /// are dropped on both sides.
    pub fn isolate(&mut self, n: NodeId) {
        let successors = std::mem::take(&mut self.node_mut(n).successors);
        for succ in successors {
            let preds = &mut self.node_mut(succ).predecessors;
            if let Some(i) = preds.iter().position(|&p| p == n) {
                preds.swap_remove(i);
            }
        }
        let predecessors = std::mem::take(&mut self.node_mut(n).predecessors);
        for pred in predecessors {
            let succs = &mut self.node_mut(pred).successors;
            if let Some(i) = succs.iter().position(|&s| s == n) {
                succs.swap_remove(i);
            }
        }
    }

    /// Removes a fully isolated node. The slot is cleared; the id is never
    /// reassigned.
    pub fn remove(&mut self, n: NodeId) {
        assert!(!n.is_sentinel(), "cannot remove a sentinel node");
        let node = self.node(n);
        assert!(node.successors.is_empty(), "node is still in the graph");
        assert!(node.predecessors.is_empty(), "node is still in the graph");
        assert!(node.users.is_empty(), "node is used by other nodes");
        assert!(node.operands.is_empty(), "node uses other nodes");
        self.entry_subgraphs.remove(&n);
        self.nodes[n.index()] = None;
    }

    // ------------------------------------------------------------------
    // call linkage
    // ------------------------------------------------------------------

    /// Records the call-graph edge `site -> callee entry`. Idempotent;
    /// returns whether the edge is new.
    pub fn register_call(&mut self, site: NodeId, entry: NodeId) -> bool {
        self.call_graph.add_call(site, entry)
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    /// The argument operands of a call site (the callee operand excluded).
    pub fn call_args(&self, site: NodeId) -> &[NodeId] {
        let node = self.node(site);
        match node.kind() {
            NodeKind::Call { indirect: true, .. } => &node.operands()[1..],
            NodeKind::Call { .. } => node.operands(),
            NodeKind::Fork { .. } | NodeKind::Join { .. } => &[],
            _ => panic!("not a call site"),
        }
    }

    /// The call-return node paired with a call, if one was created.
    pub fn call_return(&self, site: NodeId) -> Option<NodeId> {
        match self.node(site).kind() {
            NodeKind::Call { call_return, .. } => *call_return,
            _ => None,
        }
    }

    /// The operand computing the callee of an indirect site, if any.
    pub fn callee_operand(&self, site: NodeId) -> Option<NodeId> {
        let node = self.node(site);
        match node.kind() {
            NodeKind::Call { indirect: true, .. }
            | NodeKind::Fork { .. }
            | NodeKind::Join { .. } => node.operands().first().copied(),
            NodeKind::Call { .. } => None,
            _ => panic!("not a call site"),
        }
    }

    /// Wires `callee` into the call site: registers the call-graph edge,
    /// binds arguments into the callee's formal parameters (surplus
    /// arguments go to the vararg node), and links every callee return to
    /// the site's call-return. Idempotent per `(site, callee)`; returns
    /// whether the linkage is new.
    pub fn add_callee(&mut self, site: NodeId, callee: SubgraphId) -> bool {
        let entry = self.subgraph(callee).entry();
        match self.node_mut(site).kind_mut() {
            NodeKind::Call { callees, .. } | NodeKind::Fork { callees } => {
                if callees.contains(&callee) {
                    return false;
                }
                callees.push(callee);
            }
            NodeKind::Join { joined } => {
                if joined.contains(&callee) {
                    return false;
                }
                joined.push(callee);
            }
            _ => panic!("not a call site"),
        }
        self.register_call(site, entry);
        // only calls bind data flow; forks and joins stop at the linkage
        if !matches!(self.node(site).kind(), NodeKind::Call { .. }) {
            return true;
        }

        let subgraph = &self.subgraphs[callee.index()];
        let params = subgraph.params.clone();
        let returns = subgraph.returns.clone();
        let vararg = subgraph.vararg;
        let args = self.call_args(site).to_vec();

        for (i, &arg) in args.iter().enumerate() {
            match params.get(i) {
                Some(&param) => self.add_operand(param, arg),
                None => {
                    if let Some(va) = vararg {
                        self.add_operand(va, arg);
                    }
                }
            }
        }

        let call_return = match self.node(site).kind() {
            NodeKind::Call { call_return, .. } => *call_return,
            _ => unreachable!(),
        };
        if let Some(cr) = call_return {
            for &ret in &returns {
                let NodeKind::Return { return_sites } = self.node_mut(ret).kind_mut() else {
                    unreachable!();
                };
                return_sites.push(cr);
                self.add_operand(cr, ret);
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // traversal
    // ------------------------------------------------------------------

    /// The nodes reachable from `start` in BFS order over successor edges,
    /// optionally crossing call and return linkage. Uses the per-graph dfs
    /// epoch for marking; traversals must not overlap.
    pub fn nodes_from(&mut self, start: NodeId, interprocedural: bool) -> Vec<NodeId> {
        self.dfs_epoch += 1;
        let epoch = self.dfs_epoch;

        let mut order = vec![];
        let mut queue = VecDeque::new();
        self.node_mut(start).dfs_mark = epoch;
        queue.push_back(start);

        while let Some(cur) = queue.pop_front() {
            order.push(cur);
            for next in self.traversal_edges(cur, interprocedural) {
                let node = self.node_mut(next);
                if node.dfs_mark != epoch {
                    node.dfs_mark = epoch;
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Crossing edges for interprocedural traversal: a linked call continues
    /// at its callee entries, a linked return at its return sites; everything
    /// else follows successors.
    fn traversal_edges(&self, cur: NodeId, interprocedural: bool) -> Vec<NodeId> {
        let node = self.node(cur);
        if interprocedural {
            match node.kind() {
                NodeKind::Call { callees, .. } if !callees.is_empty() => {
                    return callees
                        .iter()
                        .map(|sg| self.subgraph(*sg).entry())
                        .collect();
                }
                NodeKind::Return { return_sites } if !return_sites.is_empty() => {
                    return return_sites.clone();
                }
                _ => {}
            }
        }
        node.successors.clone()
    }

    /// The set of nodes reachable from `n`, stopping (exclusively) at `exit`
    /// if given.
    pub fn reachable_from(
        &self,
        n: NodeId,
        exit: Option<NodeId>,
        interprocedural: bool,
    ) -> HashSet<NodeId> {
        let mut reached = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(n);

        while let Some(cur) = queue.pop_front() {
            if !reached.insert(cur) {
                continue;
            }
            let node = self.node(cur);
            for &succ in node.successors() {
                if Some(succ) != exit {
                    queue.push_back(succ);
                }
            }
            if interprocedural {
                match node.kind() {
                    NodeKind::Call { callees, .. } => {
                        for &sg in callees {
                            let entry = self.subgraph(sg).entry();
                            if Some(entry) != exit {
                                queue.push_back(entry);
                            }
                        }
                    }
                    NodeKind::Return { return_sites } => {
                        for &site in return_sites {
                            if Some(site) != exit {
                                queue.push_back(site);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        reached
    }
}
