use log::debug;

use crate::{
    graph::{NodeId, NodeKind, PointerGraph, SubgraphId},
    offset::Offset,
    points_to::PointsToSet,
};

pub mod flow_insensitive;
pub mod flow_sensitive;

/// Which engine [`analyze`] runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// One points-to set per node over the whole program.
    FlowInsensitive,
    /// Additionally threads a per-program-point memory map along control
    /// edges, enabling strong updates.
    FlowSensitive,
}

#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Concrete offsets above this bound widen to the unknown offset, which
    /// bounds the offset lattice for degenerate pointer-arithmetic cycles.
    /// Unlimited by default.
    pub field_sensitivity: Offset,
    /// Transfer-step budget. When exceeded the engine stops with an
    /// [`AnalysisError`]; the graph stays queryable in its partial state.
    pub step_limit: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            field_sensitivity: Offset::UNKNOWN,
            step_limit: None,
        }
    }
}

/// Resource exhaustion during analysis. Contract violations panic instead;
/// lattice "don't know" outcomes are values, not errors.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("pointer analysis failed: {0}")]
pub struct AnalysisError(pub String);

/// Runs the analysis to fixpoint. After `Ok(())`, every live node's
/// points-to set is final.
pub fn analyze<P: PointsToSet>(
    graph: &mut PointerGraph<P>,
    mode: Mode,
) -> Result<(), AnalysisError> {
    analyze_with(graph, mode, Options::default())
}

pub fn analyze_with<P: PointsToSet>(
    graph: &mut PointerGraph<P>,
    mode: Mode,
    options: Options,
) -> Result<(), AnalysisError> {
    match mode {
        Mode::FlowInsensitive => flow_insensitive::run(graph, options),
        Mode::FlowSensitive => flow_sensitive::run(graph, options),
    }
}

fn cap_offset(offset: Offset, options: &Options) -> Offset {
    if offset.is_unknown() || options.field_sensitivity.is_unknown() {
        offset
    } else if options.field_sensitivity < offset {
        Offset::UNKNOWN
    } else {
        offset
    }
}

/// Resolves the callee operand of a call-like site against the functions
/// discovered so far and wires every new target into the graph. Returns the
/// nodes whose transfer must re-run with the widened graph.
fn link_callees<P: PointsToSet>(graph: &mut PointerGraph<P>, site: NodeId) -> Vec<NodeId> {
    let Some(op) = graph.callee_operand(site) else {
        return vec![];
    };
    let mut discovered: Vec<SubgraphId> = vec![];
    for ptr in graph.node(op).points_to().iter() {
        let Some(target) = graph.try_node(ptr.target) else {
            continue;
        };
        if !matches!(target.kind(), NodeKind::Entry) {
            // pointers to data or to the sentinels are not callable;
            // skipping them is imprecision of the callee set, not an error
            continue;
        }
        if let Some(sg) = graph.subgraph_of_entry(ptr.target) {
            discovered.push(sg);
        }
    }

    let mut touched = vec![];
    for sg in discovered {
        if !graph.add_callee(site, sg) {
            continue;
        }
        debug!("linked call site {:?} to {:?}", site, sg);
        let subgraph = graph.subgraph(sg);
        touched.push(subgraph.entry());
        touched.extend_from_slice(subgraph.params());
        touched.extend_from_slice(subgraph.returns());
        if let Some(cr) = graph.call_return(site) {
            touched.push(cr);
        }
        touched.push(site);
    }
    touched
}
