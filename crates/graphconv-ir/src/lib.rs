//! Canonical intermediate representation for converted models.
//!
//! An [`IrGraph`] owns its nodes and edges, keeps them in topological order and
//! exposes ordered parameter and result nodes. Graphs are assembled by the
//! [`GraphBuilder`] from name-based node drafts, or by hand through the
//! handle-based [`Composer`]. Two graphs can be checked for structural
//! equivalence with [`compare`].

mod builder;
mod compare;
mod compose;
mod graph;
mod ir;

pub use builder::*;
pub use compare::*;
pub use compose::*;
pub use graph::*;
pub use ir::*;
