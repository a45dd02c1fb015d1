use crate::error::{PipelineError, Result};
use pipegraph_catalog::Data;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Separator between a dataset's namespace and its transcoding suffix.
pub const TRANSCODING_SEPARATOR: char = '@';

/// The namespace of a dataset name: everything before the first
/// [`TRANSCODING_SEPARATOR`], or the whole name when no suffix is present.
///
/// Two names sharing a namespace refer to the same logical dataset surface
/// even when their encodings differ (`"raw@csv"` and `"raw@parquet"` are both
/// views of `"raw"`).
pub fn namespace(name: &str) -> &str {
    match name.split_once(TRANSCODING_SEPARATOR) {
        Some((namespace, _)) => namespace,
        None => name,
    }
}

/// The executable body of a node: a pure-ish mapping from named input values
/// to named output values.
pub type NodeFunc<D> =
    Arc<dyn Fn(HashMap<String, D>) -> anyhow::Result<HashMap<String, D>> + Send + Sync>;

/// A unary wrapper over a [`NodeFunc`], e.g. for timing or tracing.
pub type Decorator<D> = Arc<dyn Fn(NodeFunc<D>) -> NodeFunc<D> + Send + Sync>;

/// A named computational unit: declared inputs, declared outputs, tags, and a
/// run function.
///
/// Nodes are immutable values; [`with_tags`](Node::with_tags) and
/// [`with_decorators`](Node::with_decorators) return modified copies. The run
/// function is shared behind an [`Arc`], so cloning a node is cheap and a
/// clone can be executed from any thread.
///
/// Identity is the node name: two nodes compare equal iff their names match.
#[derive(Clone)]
pub struct Node<D: Data> {
    name: String,
    inputs: Vec<String>,
    outputs: Vec<String>,
    tags: BTreeSet<String>,
    func: NodeFunc<D>,
}

impl<D: Data> Node<D> {
    /// Create a node from its name, ordered dataset names, and run function.
    ///
    /// Duplicate names within `inputs` or within `outputs` are rejected.
    pub fn new<I, O, F>(name: impl Into<String>, inputs: I, outputs: O, func: F) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
        F: Fn(HashMap<String, D>) -> anyhow::Result<HashMap<String, D>> + Send + Sync + 'static,
    {
        let name = name.into();
        let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
        let outputs: Vec<String> = outputs.into_iter().map(Into::into).collect();

        validate_no_duplicates(&name, "inputs", &inputs)?;
        validate_no_duplicates(&name, "outputs", &outputs)?;

        Ok(Self {
            name,
            inputs,
            outputs,
            tags: BTreeSet::new(),
            func: Arc::new(func),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared input dataset names, in order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Declared output dataset names, in order.
    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Input names with [`namespace`] applied, in declared order.
    pub fn input_namespaces(&self) -> Vec<&str> {
        self.inputs.iter().map(|name| namespace(name)).collect()
    }

    /// Output names with [`namespace`] applied, in declared order.
    pub fn output_namespaces(&self) -> Vec<&str> {
        self.outputs.iter().map(|name| namespace(name)).collect()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// A copy of this node with `extra_tags` unioned into its tag set.
    pub fn with_tags<T>(&self, extra_tags: T) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
    {
        let mut node = self.clone();
        node.tags.extend(extra_tags.into_iter().map(Into::into));
        node
    }

    /// A copy of this node whose run function is wrapped by `decorators`,
    /// applied right to left: the last decorator is the innermost wrapper and
    /// the first one observes the final result.
    pub fn with_decorators(&self, decorators: &[Decorator<D>]) -> Self {
        let mut node = self.clone();
        for decorator in decorators.iter().rev() {
            node.func = decorator(node.func);
        }
        node
    }

    /// Execute the node on `inputs`, keyed by literal dataset name.
    ///
    /// The produced key set must equal the declared outputs; any mismatch or
    /// run failure surfaces as [`PipelineError::NodeExecution`] carrying this
    /// node's name.
    pub fn run(&self, inputs: HashMap<String, D>) -> Result<HashMap<String, D>> {
        let outputs = (self.func)(inputs)
            .map_err(|source| PipelineError::node_execution(&self.name, source))?;

        let declared: HashSet<&str> = self.outputs.iter().map(String::as_str).collect();
        let produced: HashSet<&str> = outputs.keys().map(String::as_str).collect();
        if declared != produced {
            let mut missing: Vec<&&str> = declared.difference(&produced).collect();
            let mut unexpected: Vec<&&str> = produced.difference(&declared).collect();
            missing.sort();
            unexpected.sort();
            return Err(PipelineError::node_execution(
                &self.name,
                anyhow::anyhow!(
                    "produced outputs do not match the declaration (missing: {missing:?}, unexpected: {unexpected:?})"
                ),
            ));
        }

        Ok(outputs)
    }
}

fn validate_no_duplicates(node: &str, field: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut duplicates: Vec<&str> = names
        .iter()
        .filter(|name| !seen.insert(name.as_str()))
        .map(String::as_str)
        .collect();

    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort_unstable();
    duplicates.dedup();
    Err(PipelineError::configuration(format!(
        "Node '{node}' declares duplicate {field}: {duplicates:?}"
    )))
}

impl<D: Data> fmt::Display for Node<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}([{}]) -> [{}]",
            self.name,
            self.inputs.join(", "),
            self.outputs.join(", ")
        )
    }
}

impl<D: Data> fmt::Debug for Node<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("tags", &self.tags)
            .finish()
    }
}

impl<D: Data> PartialEq for Node<D> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<D: Data> Eq for Node<D> {}

impl<D: Data> std::hash::Hash for Node<D> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
