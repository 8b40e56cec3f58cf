//! Connection registry shared by every `Database` façade.

use crate::config::{ConnectionConfig, DatabaseConfig};
use crate::db::{default_driver_factory, ConnectionHandle, Driver, DriverFactory};
use crate::error::{QuarryError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// Live connections, their drivers and transaction depths, keyed by
/// connection name.
///
/// A name is connected at most once. The connection map stays locked while
/// a connection is being opened, so racing callers share one handle.
pub struct ConnectionRegistry {
    config: DatabaseConfig,
    factory: DriverFactory,
    connections: tokio::sync::Mutex<HashMap<String, ConnectionHandle>>,
    drivers: Mutex<HashMap<String, Arc<dyn Driver>>>,
    transactions: Mutex<HashMap<String, u32>>,
}

impl ConnectionRegistry {
    /// Creates a registry resolving drivers with [`crate::db::connect_driver`].
    pub fn new(config: DatabaseConfig) -> Self {
        Self::with_factory(config, default_driver_factory())
    }

    /// Creates a registry resolving drivers with `factory`.
    pub fn with_factory(config: DatabaseConfig, factory: DriverFactory) -> Self {
        Self {
            config,
            factory,
            connections: tokio::sync::Mutex::new(HashMap::new()),
            drivers: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Resolves an optional connection name to the configured default.
    pub fn resolve_name(&self, name: Option<&str>) -> String {
        name.unwrap_or_else(|| self.config.default_connection())
            .to_string()
    }

    fn connection_config(&self, name: &str) -> Result<&ConnectionConfig> {
        self.config.get_connection(Some(name)).ok_or_else(|| {
            QuarryError::config(format!("Database connection [{name}] not configured."))
        })
    }

    /// The driver bound to `name`, resolved through the factory on first use.
    pub fn driver(&self, name: &str) -> Result<Arc<dyn Driver>> {
        let mut drivers = lock(&self.drivers);
        if let Some(driver) = drivers.get(name) {
            return Ok(Arc::clone(driver));
        }

        let config = self.connection_config(name)?;
        let driver = (self.factory)(name, config)?;
        drivers.insert(name.to_string(), Arc::clone(&driver));
        Ok(driver)
    }

    /// The live connection for `name`, opened on first use.
    pub async fn connection(&self, name: &str) -> Result<ConnectionHandle> {
        let mut connections = self.connections.lock().await;
        if let Some(handle) = connections.get(name) {
            return Ok(Arc::clone(handle));
        }

        let config = self.connection_config(name)?;
        let driver = self.driver(name)?;
        let conn = driver
            .connect(config)
            .await
            .map_err(|e| QuarryError::connection(name, e))?;

        info!("Opened connection [{name}] ({})", config.display_string());

        let handle: ConnectionHandle = Arc::new(tokio::sync::Mutex::new(conn));
        connections.insert(name.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Whether `name` has been connected.
    pub async fn is_connected(&self, name: &str) -> bool {
        self.connections.lock().await.contains_key(name)
    }

    pub fn transaction_depth(&self, name: &str) -> u32 {
        lock(&self.transactions).get(name).copied().unwrap_or(0)
    }

    pub(crate) fn set_transaction_depth(&self, name: &str, depth: u32) {
        lock(&self.transactions).insert(name.to_string(), depth);
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("default", &self.config.default_connection())
            .finish_non_exhaustive()
    }
}

/// Poisoning only means another task panicked mid-update; the maps stay valid.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
