//! Dataset storage abstraction for pipeline runs.
//!
//! A [`DataCatalog`] maps dataset names to shared [`Dataset`] handles and is
//! the only mutable surface a pipeline runner touches. The crate ships a
//! single backing, [`MemoryDataset`], which holds its value behind a mutex
//! and honors advisory remaining-load budgets so intermediate results can be
//! reclaimed as soon as their last consumer has run.
//!
//! Persistence backends (files, databases) plug in by implementing
//! [`Dataset`] and registering through [`DataCatalog::add`].

pub mod catalog;
pub mod dataset;
pub mod error;

pub use catalog::DataCatalog;
pub use dataset::{Data, Dataset, MemoryDataset};
pub use error::{CatalogError, Result};
