use crate::error::{CatalogError, Result};
use parking_lot::Mutex;
use tracing::debug;

/// Marker for values that can flow between pipeline nodes.
///
/// Blanket-implemented for anything cloneable and shareable across threads;
/// callers never implement this by hand.
pub trait Data: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Data for T {}

/// Storage port for a single named dataset.
///
/// Implementations own their synchronization: `load` and `save` take `&self`
/// so a catalog can be shared across concurrently running nodes. Distinct
/// datasets must be safe to access concurrently.
pub trait Dataset<D: Data>: Send + Sync {
    /// Read the current value.
    fn load(&self) -> Result<D>;

    /// Write a value, replacing any previous one.
    fn save(&self, data: D) -> Result<()>;

    /// Does a value currently exist?
    fn exists(&self) -> bool;

    /// Advisory hint: the value will be loaded at most `loads` more times.
    ///
    /// Memory-backed implementations may release the value once the budget
    /// is exhausted. The default implementation ignores the hint.
    fn set_remaining_loads(&self, _loads: usize) {}
}

#[derive(Debug)]
struct MemoryState<D> {
    data: Option<D>,
    remaining_loads: Option<usize>,
    released: bool,
}

/// In-memory dataset with an optional load budget.
///
/// The backing value is guarded by a mutex so the dataset can be shared by a
/// parallel runner. When a remaining-loads budget is set, each `load`
/// decrements it and the final load releases the value to reclaim memory.
#[derive(Debug)]
pub struct MemoryDataset<D> {
    name: String,
    state: Mutex<MemoryState<D>>,
}

impl<D: Data> MemoryDataset<D> {
    /// Create an empty dataset. Loading before the first save is an error.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState {
                data: None,
                remaining_loads: None,
                released: false,
            }),
        }
    }

    /// Create a dataset pre-populated with `value`.
    pub fn with_value(name: impl Into<String>, value: D) -> Self {
        let dataset = Self::new(name);
        dataset.state.lock().data = Some(value);
        dataset
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: Data> Dataset<D> for MemoryDataset<D> {
    fn load(&self) -> Result<D> {
        let mut state = self.state.lock();

        let value = match &state.data {
            Some(value) => value.clone(),
            None if state.released => {
                return Err(CatalogError::Released(self.name.clone()));
            }
            None => return Err(CatalogError::NotSaved(self.name.clone())),
        };

        if let Some(remaining) = state.remaining_loads {
            let remaining = remaining.saturating_sub(1);
            state.remaining_loads = Some(remaining);
            if remaining == 0 {
                state.data = None;
                state.released = true;
                debug!("Released in-memory value of '{}' after its final load", self.name);
            }
        }

        Ok(value)
    }

    fn save(&self, data: D) -> Result<()> {
        let mut state = self.state.lock();
        state.data = Some(data);
        state.released = false;
        Ok(())
    }

    fn exists(&self) -> bool {
        self.state.lock().data.is_some()
    }

    fn set_remaining_loads(&self, loads: usize) {
        self.state.lock().remaining_loads = Some(loads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dataset = MemoryDataset::new("cars");
        dataset.save(42).unwrap();
        assert_eq!(dataset.load().unwrap(), 42);
    }

    #[test]
    fn test_load_before_save_fails() {
        let dataset: MemoryDataset<i32> = MemoryDataset::new("cars");
        assert!(matches!(dataset.load(), Err(CatalogError::NotSaved(name)) if name == "cars"));
    }

    #[test]
    fn test_save_replaces_existing() {
        let dataset = MemoryDataset::new("cars");
        dataset.save(1).unwrap();
        dataset.save(2).unwrap();
        assert_eq!(dataset.load().unwrap(), 2);
    }

    #[test]
    fn test_exists() {
        let dataset: MemoryDataset<String> = MemoryDataset::new("cars");
        assert!(!dataset.exists());
        dataset.save("data".to_string()).unwrap();
        assert!(dataset.exists());
    }

    #[test]
    fn test_with_value_is_loadable() {
        let dataset = MemoryDataset::with_value("cars", vec![1, 2, 3]);
        assert!(dataset.exists());
        assert_eq!(dataset.load().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_released_after_load_budget_exhausted() {
        let dataset = MemoryDataset::with_value("cars", 7);
        dataset.set_remaining_loads(2);

        assert_eq!(dataset.load().unwrap(), 7);
        assert_eq!(dataset.load().unwrap(), 7);
        assert!(!dataset.exists());
        assert!(matches!(dataset.load(), Err(CatalogError::Released(name)) if name == "cars"));
    }

    #[test]
    fn test_save_after_release_revives_dataset() {
        let dataset = MemoryDataset::with_value("cars", 7);
        dataset.set_remaining_loads(1);
        dataset.load().unwrap();

        dataset.save(8).unwrap();
        assert!(dataset.exists());
    }

    #[test]
    fn test_no_budget_means_unlimited_loads() {
        let dataset = MemoryDataset::with_value("cars", 7);
        for _ in 0..10 {
            assert_eq!(dataset.load().unwrap(), 7);
        }
        assert!(dataset.exists());
    }
}
