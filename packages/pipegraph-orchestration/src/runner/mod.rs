//! Execution drivers for validated pipelines.
//!
//! A runner owns the scheduling policy only. The shared algorithm lives in
//! the provided [`PipelineRunner::run`]: clone the catalog, check input
//! satisfiability, manufacture default datasets for everything unregistered,
//! install per-input load budgets, delegate the layered traversal to
//! [`PipelineRunner::run_inner`], and collect the free outputs.

mod parallel;
mod sequential;

pub use parallel::ParallelRunner;
pub use sequential::SequentialRunner;

use crate::error::{PipelineError, Result};
use crate::node::Node;
use crate::pipeline::Pipeline;
use async_trait::async_trait;
use pipegraph_catalog::{Data, DataCatalog, Dataset};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Runner tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on concurrently executing nodes within a layer.
    pub max_workers: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get().max(1),
        }
    }
}

/// Run a single node against the catalog: load each declared input by its
/// literal name, execute, save each produced output by its literal name.
pub fn run_node<D: Data>(node: &Node<D>, catalog: &DataCatalog<D>) -> Result<()> {
    debug!("Running node: {node}");

    let mut inputs = HashMap::with_capacity(node.inputs().len());
    for name in node.inputs() {
        inputs.insert(name.clone(), catalog.load(name)?);
    }

    let outputs = node.run(inputs)?;

    for (name, value) in outputs {
        catalog.save(&name, value)?;
    }
    Ok(())
}

/// The pluggable execution contract.
///
/// Implementors supply the traversal ([`run_inner`](Self::run_inner)) and the
/// factory for ephemeral datasets
/// ([`create_default_dataset`](Self::create_default_dataset)); the
/// higher-level entry points are provided.
#[async_trait]
pub trait PipelineRunner<D: Data>: Send + Sync {
    /// Execute every node of `pipeline` in an order consistent with its
    /// layered topology. Inputs have already been validated and every dataset
    /// name is registered in `catalog`.
    async fn run_inner(&self, pipeline: &Pipeline<D>, catalog: &DataCatalog<D>) -> Result<()>;

    /// Backing used for pipeline datasets the caller's catalog does not
    /// register (the ephemeral intermediates).
    fn create_default_dataset(&self, name: &str) -> Arc<dyn Dataset<D>>;

    /// Run `pipeline` against the datasets of `catalog` and return the free
    /// outputs the catalog did not already register.
    ///
    /// The caller's catalog is never mutated: all bookkeeping happens on a
    /// shallow copy (dataset objects stay shared, so saved data is visible
    /// through the original handles).
    async fn run(
        &self,
        pipeline: &Pipeline<D>,
        catalog: &DataCatalog<D>,
    ) -> Result<HashMap<String, D>> {
        let run_id = Uuid::new_v4();
        let mut catalog = catalog.shallow_copy();
        let registered: HashSet<String> = catalog.list().into_iter().collect();

        let mut unsatisfied: Vec<String> = pipeline
            .inputs()
            .difference(&registered)
            .cloned()
            .collect();
        if !unsatisfied.is_empty() {
            unsatisfied.sort();
            return Err(PipelineError::configuration(format!(
                "Pipeline input(s) {unsatisfied:?} not found in the data catalog"
            )));
        }

        let free_outputs: HashSet<String> = pipeline
            .outputs()
            .difference(&registered)
            .cloned()
            .collect();

        let mut unregistered: Vec<String> = pipeline
            .data_sets()
            .difference(&registered)
            .cloned()
            .collect();
        unregistered.sort();
        for name in unregistered {
            let dataset = self.create_default_dataset(&name);
            catalog.add(name, dataset)?;
        }

        // Load budgets let memory-backed intermediates be reclaimed as soon
        // as their last consumer has run.
        let mut all_inputs: Vec<String> = pipeline.all_inputs().into_iter().collect();
        all_inputs.sort();
        for name in all_inputs {
            let num_loads = pipeline.only_nodes_with_inputs(&[name.as_str()])?.len();
            catalog.set_remaining_loads(&name, num_loads)?;
        }

        info!(
            "Starting pipeline run {} with {} nodes in {} layers",
            run_id,
            pipeline.len(),
            pipeline.grouped_nodes().len()
        );
        self.run_inner(pipeline, &catalog).await?;
        info!("Pipeline run {} completed successfully", run_id);

        let mut results = HashMap::with_capacity(free_outputs.len());
        for name in free_outputs {
            let value = catalog.load(&name)?;
            results.insert(name, value);
        }
        Ok(results)
    }

    /// Re-run only what is needed to materialise outputs the catalog cannot
    /// currently serve: free outputs, registered datasets whose data is
    /// missing, and any chains of ephemeral intermediates feeding them.
    async fn run_only_missing(
        &self,
        pipeline: &Pipeline<D>,
        catalog: &DataCatalog<D>,
    ) -> Result<HashMap<String, D>> {
        let registered: HashSet<String> = catalog.list().into_iter().collect();
        let free_outputs: HashSet<String> = pipeline
            .outputs()
            .difference(&registered)
            .cloned()
            .collect();

        let mut missing: HashSet<String> = HashSet::new();
        for name in catalog.list() {
            if !catalog.exists(&name)? {
                missing.insert(name);
            }
        }

        let to_build: Vec<String> = free_outputs.union(&missing).cloned().collect();
        let to_build: Vec<&str> = to_build.iter().map(String::as_str).collect();
        let to_rerun = pipeline
            .only_nodes_with_outputs(&to_build)?
            .union(&pipeline.from_inputs(&to_build)?)?;

        // Ephemeral datasets feeding the re-run set must be rebuilt too,
        // including chains of them.
        let memory_sets: HashSet<String> = pipeline
            .data_sets()
            .difference(&registered)
            .cloned()
            .collect();
        let memory_refs: Vec<&str> = memory_sets.iter().map(String::as_str).collect();
        let output_to_memory = pipeline.only_nodes_with_outputs(&memory_refs)?;

        let input_from_memory: Vec<String> = to_rerun
            .inputs()
            .intersection(&memory_sets)
            .cloned()
            .collect();
        let input_refs: Vec<&str> = input_from_memory.iter().map(String::as_str).collect();
        let to_rerun = to_rerun.union(&output_to_memory.to_outputs(&input_refs)?)?;

        debug!(
            "run_only_missing re-runs {} of {} nodes",
            to_rerun.len(),
            pipeline.len()
        );
        self.run(&to_rerun, catalog).await
    }
}
