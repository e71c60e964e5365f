#![deny(absolute_paths_not_starting_with_crate)]
#![deny(keyword_idents)]
#![deny(missing_abi)]
#![deny(non_ascii_idents)]
#![deny(trivial_numeric_casts)]
#![deny(unsafe_op_in_unsafe_fn)]
#![deny(unused_import_braces)]
#![deny(unused_lifetimes)]

//! Core of a static pointer analysis: an interprocedural pointer graph, the
//! points-to lattice attached to its nodes, and fixpoint engines computing a
//! sound over-approximation of what every node may point to.
//!
//! A frontend lowers its program to nodes of [`graph::NodeKind`] through the
//! builder API of [`graph::PointerGraph`], then runs [`analysis::analyze`] in
//! one of two modes and reads the result off [`graph::Node::points_to`].

pub mod analysis;
pub mod bit_set;
pub mod graph;
pub mod offset;
pub mod points_to;

pub use analysis::{analyze, analyze_with, AnalysisError, Mode, Options};
pub use graph::{AllocInfo, Node, NodeId, NodeKind, PointerGraph, PointerSubgraph, SubgraphId};
pub use offset::Offset;
pub use points_to::{
    DivisibleOffsetsPointsToSet, OffsetsPointsToSet, Pointer, PointsToSet,
    SeparateOffsetsPointsToSet, SingleBitvectorPointsToSet, SmallOffsetsPointsToSet,
};
