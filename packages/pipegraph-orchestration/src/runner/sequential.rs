use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::runner::{run_node, PipelineRunner};
use async_trait::async_trait;
use pipegraph_catalog::{Data, DataCatalog, Dataset, MemoryDataset};
use std::sync::Arc;
use tracing::{debug, info};

/// Single-threaded reference runner: layers in order, nodes within a layer in
/// their deterministic (name-sorted) order.
#[derive(Debug, Clone, Default)]
pub struct SequentialRunner;

impl SequentialRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<D: Data> PipelineRunner<D> for SequentialRunner {
    async fn run_inner(&self, pipeline: &Pipeline<D>, catalog: &DataCatalog<D>) -> Result<()> {
        let total = pipeline.len();
        let mut completed = 0usize;

        for (index, layer) in pipeline.grouped_nodes().iter().enumerate() {
            debug!("Layer {}: {} node(s)", index + 1, layer.len());
            for node in layer {
                run_node(node, catalog)?;
                completed += 1;
                info!("Completed node {}/{}: {}", completed, total, node.name());
            }
        }
        Ok(())
    }

    fn create_default_dataset(&self, name: &str) -> Arc<dyn Dataset<D>> {
        Arc::new(MemoryDataset::new(name))
    }
}
