//! # Database
//!
//! Owns the store connection lifecycle and the registry of collections.
//!
//! - `initialize()` builds the client; production mode waits for the first
//!   connect, other modes start it in the background
//! - `ensure_connection()` is idempotent and never runs two connects at once
//! - `collection(name, options)` creates a collection once and caches it

mod connection;
pub mod errors;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::collection::{Collection, CollectionOptions};
use crate::config::DatabaseConfig;
use crate::store::StoreDriver;

pub use connection::Connection;
pub use errors::{DatabaseError, DatabaseResult};

/// A database: one connection plus its registered collections
#[derive(Debug)]
pub struct Database {
    config: DatabaseConfig,
    connection: Arc<Connection>,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
}

impl Database {
    /// Create a database; performs no I/O
    pub fn new(config: DatabaseConfig, driver: Arc<dyn StoreDriver>) -> Self {
        let connection = Connection::new(config.uri.clone(), config.options.clone(), driver);
        Self {
            config,
            connection: Arc::new(connection),
            collections: Mutex::new(HashMap::new()),
        }
    }

    /// The configuration this database was created with
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Shared connection core
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Build the store client and start connecting
    ///
    /// In production mode this waits for the connect. Otherwise the connect
    /// runs in the background so start-up is not blocked by a slow store;
    /// the first collection operation joins it through `ensure_connection`.
    pub async fn initialize(&self) -> DatabaseResult<()> {
        self.config.validate()?;
        self.connection.build_client()?;

        if self.config.production {
            return self.connection.ensure_connection().await;
        }

        let connection = Arc::clone(&self.connection);
        tokio::spawn(async move {
            if let Err(e) = connection.ensure_connection().await {
                warn!(error = %e, "background connect failed");
            }
        });
        Ok(())
    }

    /// Perform a physical connect
    pub async fn connect(&self) -> DatabaseResult<()> {
        self.connection.connect().await
    }

    /// Connect unless connected; joins an in-flight connect
    pub async fn ensure_connection(&self) -> DatabaseResult<()> {
        self.connection.ensure_connection().await
    }

    /// Whether the connection is established
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Get or register a collection
    ///
    /// With `options.unique` set, an already registered name is an error
    /// instead of returning the cached instance.
    pub fn collection(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> DatabaseResult<Arc<Collection>> {
        let mut collections = self
            .collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(existing) = collections.get(name) {
            if options.unique {
                return Err(DatabaseError::CollectionExists(name.to_string()));
            }
            return Ok(Arc::clone(existing));
        }

        let collection = Arc::new(Collection::attached(
            name,
            options,
            Arc::clone(&self.connection),
        ));
        collections.insert(name.to_string(), Arc::clone(&collection));
        debug!(collection = name, "collection registered");

        Ok(collection)
    }

    /// Whether a collection name is registered
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections
            .lock()
            .map(|c| c.contains_key(name))
            .unwrap_or(false)
    }

    /// Close the connection; safe to call repeatedly
    pub async fn close(&self) -> DatabaseResult<()> {
        self.connection.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDriver;
    use std::time::Duration;

    fn database(uri: &str, production: bool) -> (Arc<MemoryDriver>, Database) {
        let driver = Arc::new(MemoryDriver::new());
        let config = DatabaseConfig::new(uri).production(production);
        let db = Database::new(config, driver.clone());
        (driver, db)
    }

    #[tokio::test]
    async fn test_production_initialize_waits_for_connect() {
        let (_, db) = database("memory://prod", true);
        db.initialize().await.unwrap();
        assert!(db.is_connected());
    }

    #[tokio::test]
    async fn test_development_initialize_does_not_wait() {
        let (driver, db) = database("memory://dev", false);
        driver
            .namespace("dev")
            .set_connect_delay(Some(Duration::from_millis(100)));

        db.initialize().await.unwrap();
        assert!(!db.is_connected());

        db.ensure_connection().await.unwrap();
        assert!(db.is_connected());
        assert_eq!(driver.namespace("dev").connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_invalid_uri_fails_initialize() {
        let (_, db) = database("postgres://nowhere", true);
        let err = db.initialize().await.unwrap_err();
        assert!(matches!(err, DatabaseError::ClientBuild(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_generic() {
        let (driver, db) = database("memory://down", false);
        driver.namespace("down").set_unreachable(true);
        db.connection().build_client().unwrap();

        let err = db.connect().await.unwrap_err();
        assert_eq!(err, DatabaseError::ConnectionFailed);
        assert!(!db.is_connected());

        // No retry happens on its own; the next call tries again
        driver.namespace("down").set_unreachable(false);
        db.ensure_connection().await.unwrap();
        assert_eq!(driver.namespace("down").connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_ensure_connection_before_initialize() {
        let (_, db) = database("memory://none", false);
        assert_eq!(
            db.ensure_connection().await.unwrap_err(),
            DatabaseError::NotInitialized
        );
    }

    #[test]
    fn test_collection_registry() {
        let (_, db) = database("memory://reg", false);
        let a = db.collection("users", CollectionOptions::default()).unwrap();
        let b = db.collection("users", CollectionOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(db.has_collection("users"));

        let err = db
            .collection("users", CollectionOptions::default().unique())
            .unwrap_err();
        assert_eq!(err, DatabaseError::CollectionExists("users".into()));

        assert!(db
            .collection("orders", CollectionOptions::default().unique())
            .is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_, db) = database("memory://close", true);
        db.close().await.unwrap();

        db.initialize().await.unwrap();
        db.close().await.unwrap();
        assert!(!db.is_connected());
        db.close().await.unwrap();
    }
}
