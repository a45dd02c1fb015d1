use pipegraph_catalog::CatalogError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Output(s) {outputs:?} are produced by more than one node; node outputs must be unique")]
    OutputNotUnique { outputs: Vec<String> },

    #[error("Circular dependencies exist among these nodes: {nodes:?}")]
    CircularDependency { nodes: Vec<String> },

    #[error("Node '{node}' failed during execution")]
    NodeExecution {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Pipeline run was cancelled")]
    Cancelled,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl PipelineError {
    pub fn configuration<M: std::fmt::Display>(message: M) -> Self {
        Self::Configuration(message.to_string())
    }

    pub fn node_execution(node: impl Into<String>, source: anyhow::Error) -> Self {
        Self::NodeExecution {
            node: node.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message() {
        let err = PipelineError::configuration("bad input");
        assert_eq!(err.to_string(), "Configuration error: bad input");
    }

    #[test]
    fn test_node_execution_carries_source() {
        let err = PipelineError::node_execution("train_model", anyhow::anyhow!("boom"));
        assert!(err.to_string().contains("train_model"));

        let source = std::error::Error::source(&err).expect("source retained");
        assert!(source.to_string().contains("boom"));
    }

    #[test]
    fn test_catalog_error_propagates_transparently() {
        let err: PipelineError = CatalogError::NotRegistered("cars".to_string()).into();
        assert!(err.to_string().contains("cars"));
    }
}
