//! Pipeline construction and execution for data workflows.
//!
//! The crate has two halves:
//!
//! - [`Pipeline`]: an immutable, eagerly validated DAG over named [`Node`]s.
//!   Edges are implied by dataset names (a consumer of a namespace depends on
//!   its producer). Combinators (`only_nodes`, `from_inputs`, `to_outputs`,
//!   union, ...) return new pipelines over the same node values, and the
//!   layered topological order is computed once at construction.
//! - [`PipelineRunner`]: the execution contract. [`SequentialRunner`] walks
//!   the layers in order; [`ParallelRunner`] fans each layer out over
//!   blocking tasks with a fork-join barrier between layers. Both read and
//!   write through a [`DataCatalog`](pipegraph_catalog::DataCatalog) and
//!   manufacture in-memory datasets for intermediate results.

mod dag;
pub mod error;
pub mod node;
pub mod pipeline;
pub mod runner;

pub use error::{PipelineError, Result};
pub use node::{namespace, Decorator, Node, NodeFunc, TRANSCODING_SEPARATOR};
pub use pipeline::{Pipeline, PipelineItem};
pub use runner::{run_node, ParallelRunner, PipelineRunner, RunnerConfig, SequentialRunner};

// The catalog types appear throughout the public API; re-export them so a
// single dependency is enough for most users.
pub use pipegraph_catalog::{Data, DataCatalog, Dataset, MemoryDataset};
