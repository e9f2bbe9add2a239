//! Named-service resolution: service name to ready-to-use connections.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::MapperConfig;
use crate::connection::{Connection, ConnectionSettings};
use crate::driver::CassandraDriver;
use crate::error::{MapperError, Result};
use crate::transport::{Connector, NativeConnector};

/// Builds connections for configured services. Settings are validated once
/// up front; every call hands out a fresh [`Connection`].
#[derive(Clone)]
pub struct ConnectionResolver {
    services: BTreeMap<String, ConnectionSettings>,
    connector: Arc<dyn Connector>,
}

impl std::fmt::Debug for ConnectionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResolver")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ConnectionResolver {
    /// Resolver over the native protocol connector.
    ///
    /// # Errors
    /// Returns the first invalid service configuration.
    pub fn from_config(config: &MapperConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(NativeConnector))
    }

    /// # Errors
    /// Returns the first invalid service configuration.
    pub fn with_connector(config: &MapperConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        let services = config
            .connections
            .iter()
            .map(|(name, cfg)| {
                let settings = cfg.resolve().map_err(|e| match e {
                    MapperError::InvalidConfig(msg) => {
                        MapperError::InvalidConfig(format!("service '{name}': {msg}"))
                    }
                    other => other,
                })?;
                Ok((name.clone(), settings))
            })
            .collect::<Result<_>>()?;
        Ok(Self { services, connector })
    }

    /// Add or replace one service.
    pub fn insert(&mut self, name: impl Into<String>, settings: ConnectionSettings) {
        self.services.insert(name.into(), settings);
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    /// # Errors
    /// Returns `InvalidConfig` for an unknown service.
    pub fn settings(&self, name: &str) -> Result<&ConnectionSettings> {
        self.services
            .get(name)
            .ok_or_else(|| MapperError::InvalidConfig(format!("unknown service '{name}'")))
    }

    /// Unconnected [`Connection`]; the first operation opens a host.
    ///
    /// # Errors
    /// Returns `InvalidConfig` for an unknown service.
    pub fn connect(&self, name: &str) -> Result<Connection> {
        let settings = self.settings(name)?.clone();
        tracing::debug!(service = name, hosts = ?settings.hosts, "Resolved service");
        Ok(Connection::new(settings, self.connector.clone()))
    }

    /// # Errors
    /// Returns `InvalidConfig` for an unknown service.
    pub fn driver(&self, name: &str) -> Result<CassandraDriver> {
        self.connect(name).map(CassandraDriver::new)
    }
}
