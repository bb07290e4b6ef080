//! Two-state store binding of a collection
//!
//! A collection starts unbound. The first operation binds it (and runs index
//! setup) exactly once; concurrent first callers wait for the same binding.
//! The store handle is only reachable through [`StoreBinding::get`], which
//! fails while unbound.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::OnceCell;

use super::errors::{CollectionError, CollectionResult};
use crate::database::{Connection, DatabaseError};
use crate::store::StoreCollection;

/// Where the store handle comes from
pub(crate) enum BindingSource {
    /// Created through the database connection on first use
    Database(Arc<Connection>),
    /// Supplied at construction
    Handle(Arc<dyn StoreCollection>),
}

pub(crate) struct StoreBinding {
    source: BindingSource,
    bound: OnceCell<Arc<dyn StoreCollection>>,
}

impl StoreBinding {
    pub(crate) fn new(source: BindingSource) -> Self {
        Self {
            source,
            bound: OnceCell::new(),
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        self.bound.initialized()
    }

    /// The database connection, for database-bound collections
    pub(crate) fn connection(&self) -> Option<&Arc<Connection>> {
        match &self.source {
            BindingSource::Database(connection) => Some(connection),
            BindingSource::Handle(_) => None,
        }
    }

    /// The bound handle; `NotInitialized` before binding
    pub(crate) fn get(&self, collection: &str) -> CollectionResult<&Arc<dyn StoreCollection>> {
        self.bound
            .get()
            .ok_or_else(|| CollectionError::NotInitialized(collection.to_string()))
    }

    /// Bind once, running `setup` against the new handle
    ///
    /// A failed bind or setup leaves the binding unbound so the next call
    /// tries again.
    pub(crate) async fn bind<F, Fut>(
        &self,
        collection: &str,
        setup: F,
    ) -> CollectionResult<&Arc<dyn StoreCollection>>
    where
        F: FnOnce(Arc<dyn StoreCollection>) -> Fut,
        Fut: Future<Output = CollectionResult<()>>,
    {
        self.bound
            .get_or_try_init(|| async {
                let handle = match &self.source {
                    BindingSource::Database(connection) => connection
                        .bind_collection(collection)
                        .await
                        .map_err(|e| match e {
                            // Listing or creating failed on a live connection
                            DatabaseError::Store(e) => CollectionError::Store(e),
                            other => CollectionError::Connection(other),
                        })?,
                    BindingSource::Handle(handle) => Arc::clone(handle),
                };
                setup(Arc::clone(&handle)).await?;
                Ok::<_, CollectionError>(handle)
            })
            .await
    }
}

impl fmt::Debug for StoreBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            BindingSource::Database(_) => "database",
            BindingSource::Handle(_) => "handle",
        };
        f.debug_struct("StoreBinding")
            .field("source", &source)
            .field("bound", &self.is_bound())
            .finish()
    }
}
