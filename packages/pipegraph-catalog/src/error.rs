use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Dataset '{0}' is not registered in the catalog")]
    NotRegistered(String),

    #[error("Dataset '{0}' is already registered in the catalog")]
    AlreadyRegistered(String),

    #[error("No data has been saved for dataset '{0}' yet")]
    NotSaved(String),

    #[error("Data for dataset '{0}' was released after its final load")]
    Released(String),
}

impl CatalogError {
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered(name.into())
    }

    pub fn not_saved(name: impl Into<String>) -> Self {
        Self::NotSaved(name.into())
    }
}
