//! Shared, hot-swappable catalog reference.
//!
//! Analyses take a [`snapshot`](CatalogHandle::snapshot) when they start and
//! keep it for their whole run. [`replace`](CatalogHandle::replace) swaps the
//! catalog for analyses that start afterwards; in-flight analyses are not
//! affected because they hold their own `Arc`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::{PatternCatalog, RuleError};

/// A cloneable handle to the current catalog.
#[derive(Debug, Clone)]
pub struct CatalogHandle {
    current: Arc<RwLock<Arc<PatternCatalog>>>,
}

impl CatalogHandle {
    /// Wraps an already-compiled catalog.
    #[must_use]
    pub fn new(catalog: Arc<PatternCatalog>) -> Self {
        Self {
            current: Arc::new(RwLock::new(catalog)),
        }
    }

    /// Returns the catalog in effect right now.
    #[must_use]
    pub fn snapshot(&self) -> Arc<PatternCatalog> {
        Arc::clone(&*self.current.read())
    }

    /// Installs `catalog` for subsequent analyses and returns the previous one.
    pub fn replace(&self, catalog: Arc<PatternCatalog>) -> Arc<PatternCatalog> {
        info!(
            version = %catalog.version(),
            fingerprint = %catalog.fingerprint(),
            "pattern catalog replaced"
        );
        std::mem::replace(&mut *self.current.write(), catalog)
    }

    /// Recompiles the catalog from `dir` and installs it.
    ///
    /// On error the current catalog stays in place.
    ///
    /// # Errors
    ///
    /// Propagates any [`RuleError`] from [`PatternCatalog::from_yaml_dir`].
    pub fn reload_from_dir(&self, dir: &Path) -> Result<Arc<PatternCatalog>, RuleError> {
        let fresh = Arc::new(PatternCatalog::from_yaml_dir(dir)?);
        self.replace(Arc::clone(&fresh));
        Ok(fresh)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
