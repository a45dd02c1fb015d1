use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;
use crate::runner::{run_node, PipelineRunner, RunnerConfig};
use anyhow::anyhow;
use async_trait::async_trait;
use pipegraph_catalog::{Data, DataCatalog, Dataset, MemoryDataset};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Layered fork-join runner.
///
/// All nodes of a layer are dispatched as blocking tasks (capped by
/// [`RunnerConfig::max_workers`]); the next layer starts only once the whole
/// layer has finished. On failure the remaining in-flight nodes of the layer
/// are awaited and the first error (in layer order) is surfaced. A
/// cancellation request stops not-yet-started layers.
pub struct ParallelRunner {
    config: RunnerConfig,
    cancellation_token: CancellationToken,
}

impl ParallelRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Token observed between layers; cancel it to abort the run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}

impl Default for ParallelRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl<D: Data> PipelineRunner<D> for ParallelRunner {
    async fn run_inner(&self, pipeline: &Pipeline<D>, catalog: &DataCatalog<D>) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));

        for (index, layer) in pipeline.grouped_nodes().iter().enumerate() {
            if self.cancellation_token.is_cancelled() {
                warn!(
                    "Cancellation requested; aborting before layer {} of {}",
                    index + 1,
                    pipeline.grouped_nodes().len()
                );
                return Err(PipelineError::Cancelled);
            }

            debug!("Layer {}: dispatching {} node(s)", index + 1, layer.len());

            let tasks: Vec<_> = layer
                .iter()
                .map(|node| {
                    let node = node.clone();
                    let catalog = catalog.shallow_copy();
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .expect("layer semaphore is never closed");
                        tokio::task::spawn_blocking(move || run_node(&node, &catalog)).await
                    }
                })
                .collect();

            // Await the whole layer even when something fails, so no node is
            // left running while the error propagates.
            let results = futures::future::join_all(tasks).await;

            let mut first_error: Option<PipelineError> = None;
            for (node, outcome) in layer.iter().zip(results) {
                let result = match outcome {
                    Ok(result) => result,
                    Err(join_err) => Err(PipelineError::node_execution(
                        node.name(),
                        anyhow!("node task panicked: {join_err}"),
                    )),
                };
                if let Err(err) = result {
                    error!("Node '{}' failed: {}", node.name(), err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }

            debug!("Layer {} complete", index + 1);
        }
        Ok(())
    }

    fn create_default_dataset(&self, name: &str) -> Arc<dyn Dataset<D>> {
        Arc::new(MemoryDataset::new(name))
    }
}
