//! Runner contract: input validation, default datasets, load budgets, and
//! the missing-output re-run closure.

use pipegraph_catalog::{CatalogError, Dataset, MemoryDataset};
use pipegraph_orchestration::{
    DataCatalog, Node, Pipeline, PipelineError, PipelineRunner, SequentialRunner,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn sum_node(name: &str, inputs: &[&str], outputs: &[&str]) -> Node<i32> {
    let declared: Vec<String> = outputs.iter().map(|s| (*s).to_string()).collect();
    Node::new(
        name,
        inputs.iter().copied(),
        outputs.iter().copied(),
        move |ins: HashMap<String, i32>| {
            let sum: i32 = ins.values().sum();
            Ok(declared.iter().map(|o| (o.clone(), sum)).collect())
        },
    )
    .unwrap()
}

/// f1(a,b)->c, f2(c)->d
fn linear() -> Pipeline<i32> {
    Pipeline::new([
        sum_node("f1", &["a", "b"], &["c"]),
        sum_node("f2", &["c"], &["d"]),
    ])
    .unwrap()
}

/// f1(x)->a, f2(x)->b, f3(a,b)->y
fn diamond() -> Pipeline<i32> {
    Pipeline::new([
        sum_node("f1", &["x"], &["a"]),
        sum_node("f2", &["x"], &["b"]),
        sum_node("f3", &["a", "b"], &["y"]),
    ])
    .unwrap()
}

/// Memory dataset recording every remaining-loads hint it receives.
struct SpyDataset {
    inner: MemoryDataset<i32>,
    hints: Arc<Mutex<Vec<usize>>>,
}

impl SpyDataset {
    fn new(name: &str, value: i32) -> (Arc<Self>, Arc<Mutex<Vec<usize>>>) {
        let hints = Arc::new(Mutex::new(Vec::new()));
        let spy = Arc::new(Self {
            inner: MemoryDataset::with_value(name, value),
            hints: Arc::clone(&hints),
        });
        (spy, hints)
    }
}

impl Dataset<i32> for SpyDataset {
    fn load(&self) -> pipegraph_catalog::Result<i32> {
        self.inner.load()
    }

    fn save(&self, data: i32) -> pipegraph_catalog::Result<()> {
        self.inner.save(data)
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn set_remaining_loads(&self, loads: usize) {
        self.hints.lock().unwrap().push(loads);
        self.inner.set_remaining_loads(loads);
    }
}

#[tokio::test]
async fn test_run_returns_free_outputs_and_sets_load_budget() {
    init_logging();
    let (spy, hints) = SpyDataset::new("x", 7);
    let mut catalog: DataCatalog<i32> = DataCatalog::new();
    catalog.add("x", spy).unwrap();

    let results = SequentialRunner::new().run(&diamond(), &catalog).await.unwrap();

    assert_eq!(results, HashMap::from([("y".to_string(), 14)]));
    // x is consumed by f1 and f2: one hint, with a budget of two loads
    assert_eq!(*hints.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn test_load_budgets_count_literal_consumers_per_encoding() {
    // p(x)->raw@parquet, a(raw@csv)->left, b(raw@parquet)->right: each
    // encoding is its own catalog entry, so each budget counts only the
    // nodes loading that exact name
    let pipeline = Pipeline::new([
        sum_node("p", &["x"], &["raw@parquet"]),
        sum_node("a", &["raw@csv"], &["left"]),
        sum_node("b", &["raw@parquet"], &["right"]),
    ])
    .unwrap();

    let (csv, csv_hints) = SpyDataset::new("raw@csv", 5);
    let (parquet, parquet_hints) = SpyDataset::new("raw@parquet", 0);
    let mut catalog: DataCatalog<i32> = DataCatalog::new();
    catalog.add_value("x", 1).unwrap();
    catalog.add("raw@csv", csv).unwrap();
    catalog.add("raw@parquet", parquet).unwrap();

    let results = SequentialRunner::new().run(&pipeline, &catalog).await.unwrap();

    assert_eq!(
        results,
        HashMap::from([("left".to_string(), 5), ("right".to_string(), 1)])
    );
    // one literal consumer each, never two for the shared namespace
    assert_eq!(*csv_hints.lock().unwrap(), vec![1]);
    assert_eq!(*parquet_hints.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_run_with_missing_input_names_the_dataset() {
    init_logging();
    let mut catalog = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();

    let err = SequentialRunner::new().run(&linear(), &catalog).await.unwrap_err();
    match err {
        PipelineError::Configuration(msg) => {
            assert!(msg.contains("\"b\""), "message should name 'b': {msg}");
            assert!(!msg.contains("\"a\""));
        }
        other => panic!("expected Configuration error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_run_does_not_mutate_caller_catalog() {
    let mut catalog = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();
    catalog.add_value("b", 2).unwrap();

    SequentialRunner::new().run(&linear(), &catalog).await.unwrap();

    // intermediates and outputs were registered on the shallow copy only
    assert_eq!(catalog.list(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_node_failure_surfaces_with_identity() {
    let failing: Node<i32> =
        Node::new("f1", ["a"], ["b"], |_| Err(anyhow::anyhow!("bad data"))).unwrap();
    let pipeline = Pipeline::new([failing]).unwrap();

    let mut catalog = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();

    let err = SequentialRunner::new().run(&pipeline, &catalog).await.unwrap_err();
    assert!(matches!(err, PipelineError::NodeExecution { node, .. } if node == "f1"));
}

#[tokio::test]
async fn test_run_only_missing_rebuilds_registered_but_missing_output() {
    let mut catalog: DataCatalog<i32> = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();
    catalog.add_value("b", 2).unwrap();
    // d is registered but holds no data: the whole chain must re-run,
    // including the ephemeral intermediate c
    catalog.add("d", Arc::new(MemoryDataset::new("d"))).unwrap();

    let results = SequentialRunner::new()
        .run_only_missing(&linear(), &catalog)
        .await
        .unwrap();

    // d was registered, so it is not a free output of the re-run
    assert!(results.is_empty());
    assert!(catalog.exists("d").unwrap());
    assert_eq!(catalog.load("d").unwrap(), 3);
}

#[tokio::test]
async fn test_run_only_missing_returns_unregistered_outputs() {
    let mut catalog = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();
    catalog.add_value("b", 2).unwrap();

    let results = SequentialRunner::new()
        .run_only_missing(&linear(), &catalog)
        .await
        .unwrap();
    assert_eq!(results, HashMap::from([("d".to_string(), 3)]));
}

#[tokio::test]
async fn test_run_only_missing_skips_satisfied_outputs() {
    let mut catalog: DataCatalog<i32> = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();
    catalog.add_value("b", 2).unwrap();
    catalog.add_value("d", 99).unwrap();

    let results = SequentialRunner::new()
        .run_only_missing(&linear(), &catalog)
        .await
        .unwrap();

    // nothing to build: d is present, so f2 must not overwrite it
    assert!(results.is_empty());
    assert_eq!(catalog.load("d").unwrap(), 99);
}

#[tokio::test]
async fn test_intermediates_default_to_memory_datasets() {
    // c never touches the caller's catalog, yet the run succeeds end to end
    let mut catalog = DataCatalog::new();
    catalog.add_value("a", 10).unwrap();
    catalog.add_value("b", 20).unwrap();

    let results = SequentialRunner::new().run(&linear(), &catalog).await.unwrap();
    assert_eq!(results["d"], 30);
    assert!(!catalog.contains("c"));
}

#[tokio::test]
async fn test_released_intermediate_budget_is_exact() {
    // c is loaded exactly once (by f2); a second load would fail, so the
    // budget must be exactly one, not zero
    let pipeline = linear();
    let mut catalog = DataCatalog::new();
    catalog.add_value("a", 1).unwrap();
    catalog.add_value("b", 1).unwrap();

    let results = SequentialRunner::new().run(&pipeline, &catalog).await.unwrap();
    assert_eq!(results["d"], 2);
}

#[test]
fn test_catalog_errors_convert_into_pipeline_errors() {
    let catalog: DataCatalog<i32> = DataCatalog::new();
    let err: PipelineError = catalog.load("ghost").unwrap_err().into();
    assert!(matches!(
        err,
        PipelineError::Catalog(CatalogError::NotRegistered(name)) if name == "ghost"
    ));
}
