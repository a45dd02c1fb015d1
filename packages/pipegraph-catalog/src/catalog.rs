use crate::dataset::{Data, Dataset, MemoryDataset};
use crate::error::{CatalogError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A keyed registry of datasets, the I/O substrate for pipeline runs.
///
/// The catalog maps dataset names to shared [`Dataset`] handles. Cloning (or
/// [`shallow_copy`](DataCatalog::shallow_copy)) duplicates the registration
/// map only: the dataset objects behind the names stay shared, so data saved
/// through a copy is visible through the original, while `add` on a copy
/// leaves the original's registrations untouched.
#[derive(Clone)]
pub struct DataCatalog<D: Data> {
    datasets: HashMap<String, Arc<dyn Dataset<D>>>,
}

impl<D: Data> DataCatalog<D> {
    pub fn new() -> Self {
        Self {
            datasets: HashMap::new(),
        }
    }

    /// Register a dataset under `name`.
    ///
    /// Re-registering an existing name is rejected; use [`save`](Self::save)
    /// to overwrite data instead.
    pub fn add(&mut self, name: impl Into<String>, dataset: Arc<dyn Dataset<D>>) -> Result<()> {
        let name = name.into();
        if self.datasets.contains_key(&name) {
            return Err(CatalogError::AlreadyRegistered(name));
        }
        debug!("Registering dataset '{}'", name);
        self.datasets.insert(name, dataset);
        Ok(())
    }

    /// Register an in-memory dataset pre-populated with `value`.
    pub fn add_value(&mut self, name: impl Into<String>, value: D) -> Result<()> {
        let name = name.into();
        let dataset = MemoryDataset::with_value(name.clone(), value);
        self.add(name, Arc::new(dataset))
    }

    /// Registered dataset names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    fn get(&self, name: &str) -> Result<&Arc<dyn Dataset<D>>> {
        self.datasets
            .get(name)
            .ok_or_else(|| CatalogError::not_registered(name))
    }

    /// Does a persisted value exist for `name`?
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.exists())
    }

    pub fn load(&self, name: &str) -> Result<D> {
        debug!("Loading dataset '{}'", name);
        self.get(name)?.load()
    }

    pub fn save(&self, name: &str, data: D) -> Result<()> {
        debug!("Saving dataset '{}'", name);
        self.get(name)?.save(data)
    }

    /// Forward a remaining-loads reclamation hint to the named dataset.
    pub fn set_remaining_loads(&self, name: &str, loads: usize) -> Result<()> {
        self.get(name)?.set_remaining_loads(loads);
        Ok(())
    }

    /// A copy sharing the dataset objects but owning its registration map.
    pub fn shallow_copy(&self) -> Self {
        self.clone()
    }
}

impl<D: Data> Default for DataCatalog<D> {
    fn default() -> Self {
        Self::new()
    }
}
