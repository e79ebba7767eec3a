//! Package persistence seam

use std::collections::HashMap;
use std::sync::RwLock;

use shared_types::PackageId;
use thiserror::Error;

use crate::error::EngineError;
use crate::model::Package;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("version conflict: expected {expected:?}, found {found:?}")]
    Conflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("{0}")]
    Backend(String),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { expected, found } => EngineError::Conflict {
                expected: expected.unwrap_or(0),
                found: found.unwrap_or(0),
            },
            StoreError::Backend(msg) => EngineError::Storage(msg),
        }
    }
}

pub trait PackageStore: Send + Sync {
    fn load(&self, id: &PackageId) -> Result<Option<Package>, StoreError>;

    /// Write `package` if the stored version still equals `expected_version`;
    /// `None` means the package must not exist yet
    fn save(&self, package: &Package, expected_version: Option<u64>) -> Result<(), StoreError>;

    fn list_ids(&self) -> Result<Vec<PackageId>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    packages: RwLock<HashMap<PackageId, Package>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packages.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PackageStore for InMemoryStore {
    fn load(&self, id: &PackageId) -> Result<Option<Package>, StoreError> {
        Ok(self
            .packages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned())
    }

    fn save(&self, package: &Package, expected_version: Option<u64>) -> Result<(), StoreError> {
        let mut packages = self.packages.write().unwrap_or_else(|e| e.into_inner());
        let found = packages.get(&package.id).map(|p| p.version);
        if found != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found,
            });
        }
        packages.insert(package.id.clone(), package.clone());
        Ok(())
    }

    fn list_ids(&self) -> Result<Vec<PackageId>, StoreError> {
        let mut ids: Vec<PackageId> = self
            .packages
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }
}
