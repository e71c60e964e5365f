use std::collections::HashMap;

use crate::graph::NodeId;

/// The call graph discovered so far: edges from call-site nodes to the entry
/// nodes they may invoke. Edges appear during analysis as indirect callees
/// are resolved; adding an edge is idempotent.
#[derive(Debug, Default)]
pub struct CallGraph {
    nodes: HashMap<NodeId, FuncNode>,
}

#[derive(Debug, Default)]
struct FuncNode {
    calls: Vec<NodeId>,
    callers: Vec<NodeId>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `caller -> callee`. Returns whether the edge is new.
    pub fn add_call(&mut self, caller: NodeId, callee: NodeId) -> bool {
        let node = self.nodes.entry(caller).or_default();
        if node.calls.contains(&callee) {
            return false;
        }
        node.calls.push(callee);
        self.nodes.entry(callee).or_default().callers.push(caller);
        true
    }

    pub fn contains(&self, caller: NodeId, callee: NodeId) -> bool {
        self.nodes
            .get(&caller)
            .is_some_and(|node| node.calls.contains(&callee))
    }

    /// The entries this call site may invoke.
    pub fn callees(&self, caller: NodeId) -> &[NodeId] {
        self.nodes.get(&caller).map_or(&[], |node| &node.calls)
    }

    /// The call sites that may invoke this entry.
    pub fn callers(&self, callee: NodeId) -> &[NodeId] {
        self.nodes.get(&callee).map_or(&[], |node| &node.callers)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every `caller -> callee` edge.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.nodes
            .iter()
            .flat_map(|(caller, node)| node.calls.iter().map(|callee| (*caller, *callee)))
    }
}
