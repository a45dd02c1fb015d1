use crate::dag;
use crate::error::{PipelineError, Result};
use crate::node::{namespace, Decorator, Node};
use pipegraph_catalog::Data;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// One element of a pipeline definition: a bare node, or a whole pipeline
/// whose nodes get spliced in.
#[derive(Clone, Debug)]
pub enum PipelineItem<D: Data> {
    Node(Node<D>),
    Pipeline(Pipeline<D>),
}

impl<D: Data> From<Node<D>> for PipelineItem<D> {
    fn from(node: Node<D>) -> Self {
        Self::Node(node)
    }
}

impl<D: Data> From<Pipeline<D>> for PipelineItem<D> {
    fn from(pipeline: Pipeline<D>) -> Self {
        Self::Pipeline(pipeline)
    }
}

/// An immutable, validated DAG of [`Node`]s.
///
/// Edges are implied by dataset names: a node consuming a namespace depends
/// on the node producing it. All invariants (unique node names, unique output
/// namespaces, no raw/transcoded mixing, acyclicity) are enforced eagerly at
/// construction; no partially built pipeline is ever observable. Every
/// combinator returns a fresh pipeline over the same node values.
#[derive(Clone, Debug)]
pub struct Pipeline<D: Data> {
    name: Option<String>,
    nodes_by_name: HashMap<String, Node<D>>,
    /// input namespace -> names of consumer nodes; dependency edges only,
    /// selectors match literal names
    nodes_by_input: HashMap<String, HashSet<String>>,
    /// output namespace -> name of the unique producer; dependency edges
    /// only, selectors match literal names
    nodes_by_output: HashMap<String, String>,
    /// literal input name -> names of the nodes declaring it
    consumers_by_literal: HashMap<String, HashSet<String>>,
    /// literal output name -> name of the node declaring it
    producer_by_literal: HashMap<String, String>,
    /// node name -> names of its parents
    dependencies: HashMap<String, HashSet<String>>,
    /// topological groups, each sorted by node name
    layers: Vec<Vec<Node<D>>>,
}

impl<D: Data> Pipeline<D> {
    /// Build a pipeline from nodes and/or other pipelines (flattened in
    /// order). Runs the full validation suite.
    pub fn new<I>(items: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<PipelineItem<D>>,
    {
        Self::build(items, None)
    }

    /// Like [`new`](Self::new), but also names the pipeline and re-tags every
    /// node with that name.
    pub fn with_name<I>(items: I, name: impl Into<String>) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<PipelineItem<D>>,
    {
        Self::build(items, Some(name.into()))
    }

    fn build<I>(items: I, name: Option<String>) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<PipelineItem<D>>,
    {
        let mut nodes: Vec<Node<D>> = Vec::new();
        for item in items {
            match item.into() {
                PipelineItem::Node(node) => nodes.push(node),
                PipelineItem::Pipeline(pipeline) => nodes.extend(pipeline.nodes()),
            }
        }

        if let Some(name) = &name {
            nodes = nodes
                .into_iter()
                .map(|node| node.with_tags([name.clone()]))
                .collect();
        }

        validate_unique_names(&nodes)?;
        validate_transcoded_references(&nodes)?;
        validate_unique_outputs(&nodes)?;

        let pipeline = Self::assemble(nodes, name)?;
        debug!(
            "Assembled pipeline with {} node(s) in {} layer(s)",
            pipeline.len(),
            pipeline.layers.len()
        );
        Ok(pipeline)
    }

    /// Index the (already validated) nodes and compute the layered
    /// topological order. Fails only on cycles.
    fn assemble(nodes: Vec<Node<D>>, name: Option<String>) -> Result<Self> {
        let mut nodes_by_input: HashMap<String, HashSet<String>> = HashMap::new();
        let mut nodes_by_output: HashMap<String, String> = HashMap::new();
        let mut consumers_by_literal: HashMap<String, HashSet<String>> = HashMap::new();
        let mut producer_by_literal: HashMap<String, String> = HashMap::new();
        for node in &nodes {
            for input in node.input_namespaces() {
                nodes_by_input
                    .entry(input.to_string())
                    .or_default()
                    .insert(node.name().to_string());
            }
            for output in node.output_namespaces() {
                nodes_by_output.insert(output.to_string(), node.name().to_string());
            }
            for input in node.inputs() {
                consumers_by_literal
                    .entry(input.clone())
                    .or_default()
                    .insert(node.name().to_string());
            }
            for output in node.outputs() {
                producer_by_literal.insert(output.clone(), node.name().to_string());
            }
        }

        let mut dependencies: HashMap<String, HashSet<String>> = nodes
            .iter()
            .map(|node| (node.name().to_string(), HashSet::new()))
            .collect();
        for parent in &nodes {
            for output in parent.output_namespaces() {
                for child in nodes_by_input.get(output).into_iter().flatten() {
                    dependencies
                        .get_mut(child)
                        .expect("consumer indexed from this node set")
                        .insert(parent.name().to_string());
                }
            }
        }

        let nodes_by_name: HashMap<String, Node<D>> = nodes
            .into_iter()
            .map(|node| (node.name().to_string(), node))
            .collect();

        let layers = dag::topological_layers(&dependencies)?
            .into_iter()
            .map(|layer| {
                layer
                    .into_iter()
                    .map(|name| nodes_by_name[&name].clone())
                    .collect()
            })
            .collect();

        Ok(Self {
            name,
            nodes_by_name,
            nodes_by_input,
            nodes_by_output,
            consumers_by_literal,
            producer_by_literal,
            dependencies,
            layers,
        })
    }

    /// Sub-pipeline over the named nodes. Infallible: a subset of a valid
    /// pipeline cannot violate any construction invariant.
    fn restrict(&self, keep: &HashSet<&str>) -> Self {
        let nodes: Vec<Node<D>> = self
            .iter_nodes()
            .filter(|node| keep.contains(node.name()))
            .cloned()
            .collect();
        Self::assemble(nodes, None).expect("subset of an acyclic pipeline stays acyclic")
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes_by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_by_name.is_empty()
    }

    /// Nodes in flattened topological order (layers concatenated, each layer
    /// sorted by name).
    pub fn nodes(&self) -> Vec<Node<D>> {
        self.iter_nodes().cloned().collect()
    }

    fn iter_nodes(&self) -> impl Iterator<Item = &Node<D>> {
        self.layers.iter().flatten()
    }

    /// The topological layers themselves; layer `i` only depends on layers
    /// `< i`, so its nodes may run concurrently.
    pub fn grouped_nodes(&self) -> &[Vec<Node<D>>] {
        &self.layers
    }

    /// Direct dependencies: node name -> names of its parents. Independent
    /// nodes map to an empty set.
    pub fn node_dependencies(&self) -> &HashMap<String, HashSet<String>> {
        &self.dependencies
    }

    /// Every literal input name declared by any node.
    pub fn all_inputs(&self) -> HashSet<String> {
        self.iter_nodes()
            .flat_map(|node| node.inputs().iter().cloned())
            .collect()
    }

    /// Every literal output name declared by any node.
    pub fn all_outputs(&self) -> HashSet<String> {
        self.iter_nodes()
            .flat_map(|node| node.outputs().iter().cloned())
            .collect()
    }

    fn remove_intermediates(&self, datasets: HashSet<String>) -> HashSet<String> {
        let consumed: HashSet<&str> = self.nodes_by_input.keys().map(String::as_str).collect();
        let produced: HashSet<&str> = self.nodes_by_output.keys().map(String::as_str).collect();
        datasets
            .into_iter()
            .filter(|name| {
                let ns = namespace(name);
                !(consumed.contains(ns) && produced.contains(ns))
            })
            .collect()
    }

    /// Free inputs: datasets the pipeline consumes but does not produce.
    /// These must be provided at runtime.
    pub fn inputs(&self) -> HashSet<String> {
        self.remove_intermediates(self.all_inputs())
    }

    /// Terminal outputs: datasets the pipeline produces but does not consume
    /// internally.
    pub fn outputs(&self) -> HashSet<String> {
        self.remove_intermediates(self.all_outputs())
    }

    /// Every dataset name the pipeline touches.
    pub fn data_sets(&self) -> HashSet<String> {
        let mut datasets = self.all_inputs();
        datasets.extend(self.all_outputs());
        datasets
    }

    fn validate_node_names(&self, names: &[&str]) -> Result<()> {
        let mut unknown: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| !self.nodes_by_name.contains_key(*name))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort_unstable();
        unknown.dedup();
        Err(PipelineError::configuration(format!(
            "Pipeline does not contain nodes named {unknown:?}"
        )))
    }

    fn validate_dataset_names(&self, names: &[&str]) -> Result<()> {
        let known = self.data_sets();
        let mut unknown: Vec<&str> = names
            .iter()
            .copied()
            .filter(|name| !known.contains(*name))
            .collect();
        if unknown.is_empty() {
            return Ok(());
        }
        unknown.sort_unstable();
        unknown.dedup();
        Err(PipelineError::configuration(format!(
            "Pipeline does not contain datasets named {unknown:?}"
        )))
    }

    /// Names of nodes declaring any of the given datasets as an input.
    /// Matching is on the literal name exactly as the node declared it; a
    /// sibling encoding of the same namespace does not match.
    fn consumers_of<'p, I>(&'p self, datasets: I) -> HashSet<&'p str>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        datasets
            .into_iter()
            .flat_map(|name| {
                self.consumers_by_literal
                    .get(name.as_ref())
                    .into_iter()
                    .flatten()
            })
            .map(String::as_str)
            .collect()
    }

    /// Names of nodes declaring any of the given datasets as an output,
    /// matched on the literal name exactly as declared.
    fn producers_of<'p, I>(&'p self, datasets: I) -> HashSet<&'p str>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        datasets
            .into_iter()
            .filter_map(|name| self.producer_by_literal.get(name.as_ref()))
            .map(String::as_str)
            .collect()
    }

    /// Sub-pipeline containing exactly the named nodes.
    pub fn only_nodes(&self, names: &[&str]) -> Result<Self> {
        self.validate_node_names(names)?;
        let keep: HashSet<&str> = names.iter().copied().collect();
        Ok(self.restrict(&keep))
    }

    /// Sub-pipeline of nodes whose tag set intersects `tags`. An empty tag
    /// set yields an empty pipeline.
    pub fn only_nodes_with_tags(&self, tags: &[&str]) -> Self {
        let wanted: HashSet<&str> = tags.iter().copied().collect();
        let keep: HashSet<&str> = self
            .iter_nodes()
            .filter(|node| node.tags().iter().any(|tag| wanted.contains(tag.as_str())))
            .map(|node| node.name())
            .collect();
        self.restrict(&keep)
    }

    /// Sub-pipeline of nodes directly consuming any of `inputs`.
    pub fn only_nodes_with_inputs(&self, inputs: &[&str]) -> Result<Self> {
        self.validate_dataset_names(inputs)?;
        let keep = self.consumers_of(inputs.iter().copied());
        Ok(self.restrict(&keep))
    }

    /// Transitive closure of [`only_nodes_with_inputs`]: everything that
    /// depends, directly or indirectly, on any of `inputs`.
    pub fn from_inputs(&self, inputs: &[&str]) -> Result<Self> {
        self.validate_dataset_names(inputs)?;

        let mut keep: HashSet<&str> = HashSet::new();
        let mut frontier: HashSet<String> = inputs.iter().map(|s| (*s).to_string()).collect();
        loop {
            let consumers = self.consumers_of(frontier.iter());
            let fresh: Vec<&str> = consumers.difference(&keep).copied().collect();
            if fresh.is_empty() {
                break;
            }
            frontier = fresh
                .iter()
                .flat_map(|name| self.nodes_by_name[*name].outputs().iter().cloned())
                .collect();
            keep.extend(fresh);
        }

        Ok(self.restrict(&keep))
    }

    /// Sub-pipeline of nodes directly producing any of `outputs`.
    pub fn only_nodes_with_outputs(&self, outputs: &[&str]) -> Result<Self> {
        self.validate_dataset_names(outputs)?;
        let keep = self.producers_of(outputs.iter().copied());
        Ok(self.restrict(&keep))
    }

    /// Transitive closure of [`only_nodes_with_outputs`]: everything needed,
    /// directly or indirectly, to produce any of `outputs`.
    pub fn to_outputs(&self, outputs: &[&str]) -> Result<Self> {
        self.validate_dataset_names(outputs)?;

        let mut keep: HashSet<&str> = HashSet::new();
        let mut frontier: HashSet<String> = outputs.iter().map(|s| (*s).to_string()).collect();
        loop {
            let producers = self.producers_of(frontier.iter());
            let fresh: Vec<&str> = producers.difference(&keep).copied().collect();
            if fresh.is_empty() {
                break;
            }
            frontier = fresh
                .iter()
                .flat_map(|name| self.nodes_by_name[*name].inputs().iter().cloned())
                .collect();
            keep.extend(fresh);
        }

        Ok(self.restrict(&keep))
    }

    /// The named nodes plus everything downstream of their outputs.
    pub fn from_nodes(&self, names: &[&str]) -> Result<Self> {
        let selected = self.only_nodes(names)?;
        let outputs: Vec<String> = selected.all_outputs().into_iter().collect();
        let outputs: Vec<&str> = outputs.iter().map(String::as_str).collect();
        selected.union(&self.from_inputs(&outputs)?)
    }

    /// The named nodes plus everything upstream of their inputs.
    pub fn to_nodes(&self, names: &[&str]) -> Result<Self> {
        let selected = self.only_nodes(names)?;
        let inputs: Vec<String> = selected.all_inputs().into_iter().collect();
        let inputs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        selected.union(&self.to_outputs(&inputs)?)
    }

    /// Pipeline with every node's run function wrapped by `decorators`
    /// (right-to-left, see [`Node::with_decorators`]).
    pub fn decorate(&self, decorators: &[Decorator<D>]) -> Self {
        let nodes: Vec<Node<D>> = self
            .iter_nodes()
            .map(|node| node.with_decorators(decorators))
            .collect();
        Self::assemble(nodes, self.name.clone())
            .expect("decorating does not change the dependency graph")
    }

    /// Union of two pipelines, deduplicated by node name (this operand's
    /// node wins on a shared name). Re-validates, because two individually
    /// valid pipelines may still collide on output namespaces.
    pub fn union(&self, other: &Self) -> Result<Self> {
        let mut nodes = self.nodes();
        let names: HashSet<String> = nodes.iter().map(|n| n.name().to_string()).collect();
        for node in other.iter_nodes() {
            if !names.contains(node.name()) {
                nodes.push(node.clone());
            }
        }
        Self::new(nodes)
    }

    /// Deterministic human-readable execution report. With `names_only`,
    /// nodes render as bare names; otherwise as their full signature.
    pub fn describe(&self, names_only: bool) -> String {
        fn set_to_string(set: HashSet<String>) -> String {
            if set.is_empty() {
                return "None".to_string();
            }
            let mut names: Vec<String> = set.into_iter().collect();
            names.sort();
            names.join(", ")
        }

        let nodes_as_string = self
            .iter_nodes()
            .map(|node| {
                if names_only {
                    node.name().to_string()
                } else {
                    node.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "#### Pipeline execution order ####\n\
             Name: {}\n\
             Inputs: {}\n\n\
             {}\n\n\
             Outputs: {}\n\
             ##################################",
            self.name.as_deref().unwrap_or("None"),
            set_to_string(self.inputs()),
            nodes_as_string,
            set_to_string(self.outputs()),
        )
    }

    /// Deterministic JSON export: nodes in topological order, inputs and
    /// outputs reduced to namespaces, tags sorted. No trailing newline.
    pub fn to_json(&self) -> String {
        #[derive(Serialize)]
        struct NodeManifest<'a> {
            name: &'a str,
            inputs: Vec<&'a str>,
            outputs: Vec<&'a str>,
            tags: Vec<&'a str>,
        }

        #[derive(Serialize)]
        struct PipelineManifest<'a> {
            version: &'static str,
            pipeline: Vec<NodeManifest<'a>>,
        }

        let manifest = PipelineManifest {
            version: env!("CARGO_PKG_VERSION"),
            pipeline: self
                .iter_nodes()
                .map(|node| NodeManifest {
                    name: node.name(),
                    inputs: node.input_namespaces(),
                    outputs: node.output_namespaces(),
                    tags: node.tags().iter().map(String::as_str).collect(),
                })
                .collect(),
        };

        serde_json::to_string(&manifest).expect("manifest of plain strings always serializes")
    }
}

fn validate_unique_names<D: Data>(nodes: &[Node<D>]) -> Result<()> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        *counts.entry(node.name()).or_default() += 1;
    }
    let mut duplicates: Vec<&str> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name)
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort_unstable();
    Err(PipelineError::configuration(format!(
        "Pipeline nodes must have unique names; the following appear more than once: {duplicates:?}"
    )))
}

/// Forbid referring to a transcoded surface by its bare namespace: once
/// `raw@csv` exists somewhere, a plain `raw` reference is ambiguous.
fn validate_transcoded_references<D: Data>(nodes: &[Node<D>]) -> Result<()> {
    let referenced: HashSet<&str> = nodes
        .iter()
        .flat_map(|node| node.inputs().iter().chain(node.outputs().iter()))
        .map(String::as_str)
        .collect();

    let mut invalid: Vec<&str> = referenced
        .iter()
        .copied()
        .filter(|name| {
            let ns = namespace(name);
            ns != *name && referenced.contains(ns)
        })
        .map(namespace)
        .collect();

    if invalid.is_empty() {
        return Ok(());
    }
    invalid.sort_unstable();
    invalid.dedup();
    Err(PipelineError::configuration(format!(
        "The following datasets are used with transcoding, but were also referenced without the separator: {invalid:?}"
    )))
}

fn validate_unique_outputs<D: Data>(nodes: &[Node<D>]) -> Result<()> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        for output in node.output_namespaces() {
            *counts.entry(output).or_default() += 1;
        }
    }
    let mut duplicates: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, _)| name.to_string())
        .collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort();
    Err(PipelineError::OutputNotUnique {
        outputs: duplicates,
    })
}
