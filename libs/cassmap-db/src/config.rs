//! Configuration types for connections and entities.
//!
//! Everything is read from a `Figment` under the `cassmap` key, so YAML
//! files, environment variables and serialized defaults layer the usual way.

use std::collections::BTreeMap;
use std::time::Duration;

use figment::Figment;
use serde::{Deserialize, Deserializer, Serialize};

use crate::connection::ConnectionSettings;
use crate::consistency::Consistency;
use crate::error::{MapperError, Result};
use crate::metadata::EntityDefinition;
use crate::registry::MetadataRegistry;
use crate::transport::{Credentials, Timeouts};

/// Figment key holding [`MapperConfig`].
pub const CONFIG_KEY: &str = "cassmap";

/// One named Cassandra service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CassandraConfig {
    /// A single host, a list, or a comma-separated string.
    #[serde(alias = "host", deserialize_with = "one_or_many")]
    pub hosts: Vec<String>,
    pub port: u16,
    pub keyspace: Option<String>,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub send_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub receive_timeout: Duration,
    pub host_retry_attempts: u32,
    pub all_hosts_attempts: u32,
    pub consistency: Consistency,
    pub statement_cache_capacity: Option<usize>,
    pub username: Option<String>,
    /// Supports `${VAR}` expansion.
    pub password: Option<String>,
    pub auto_create_tables: bool,
}

impl Default for CassandraConfig {
    fn default() -> Self {
        let timeouts = Timeouts::default();
        Self {
            hosts: vec!["localhost".to_owned()],
            port: 9042,
            keyspace: None,
            connect_timeout: timeouts.connect,
            send_timeout: timeouts.send,
            receive_timeout: timeouts.receive,
            host_retry_attempts: 2,
            all_hosts_attempts: 1,
            consistency: Consistency::Quorum,
            statement_cache_capacity: None,
            username: None,
            password: None,
            auto_create_tables: true,
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let hosts: Vec<String> = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(|h| h.trim().to_owned()).collect(),
        OneOrMany::Many(v) => v.into_iter().map(|h| h.trim().to_owned()).collect(),
    };
    Ok(hosts.into_iter().filter(|h| !h.is_empty()).collect())
}

/// Expand `${VAR}` references from the environment.
fn expand_env_vars(input: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| MapperError::InvalidConfig(e.to_string()))?;
    let mut result = input.to_owned();

    for caps in re.captures_iter(input) {
        let full_match = &caps[0];
        let var_name = &caps[1];
        let value = std::env::var(var_name)?;
        result = result.replace(full_match, &value);
    }

    Ok(result)
}

impl CassandraConfig {
    /// Expand environment references and validate into connection settings.
    ///
    /// # Errors
    /// Returns `MapperError::InvalidConfig` for empty host lists, a zero port
    /// or budget, or a password without a username, and
    /// `MapperError::EnvVar` when a referenced variable is not set.
    pub fn resolve(&self) -> Result<ConnectionSettings> {
        let hosts = self
            .hosts
            .iter()
            .map(|h| expand_env_vars(h))
            .collect::<Result<Vec<_>>>()?;
        if hosts.is_empty() {
            return Err(MapperError::InvalidConfig("no hosts configured".to_owned()));
        }
        if self.port == 0 {
            return Err(MapperError::InvalidConfig("port must be non-zero".to_owned()));
        }
        if self.host_retry_attempts == 0 || self.all_hosts_attempts == 0 {
            return Err(MapperError::InvalidConfig(
                "retry attempts must be at least 1".to_owned(),
            ));
        }
        let credentials = match (&self.username, &self.password) {
            (Some(user), password) => Some(Credentials {
                username: expand_env_vars(user)?,
                password: password.as_deref().map(expand_env_vars).transpose()?.unwrap_or_default(),
            }),
            (None, Some(_)) => {
                return Err(MapperError::InvalidConfig(
                    "password configured without a username".to_owned(),
                ));
            }
            (None, None) => None,
        };
        let keyspace = self.keyspace.as_deref().map(expand_env_vars).transpose()?;

        tracing::debug!(hosts = ?hosts, port = self.port, keyspace = ?keyspace, "Resolved connection settings");

        Ok(ConnectionSettings {
            hosts,
            port: self.port,
            keyspace,
            timeouts: Timeouts {
                connect: self.connect_timeout,
                send: self.send_timeout,
                receive: self.receive_timeout,
            },
            host_retry_attempts: self.host_retry_attempts,
            all_hosts_attempts: self.all_hosts_attempts,
            consistency: self.consistency,
            statement_cache_capacity: self.statement_cache_capacity,
            credentials,
            auto_create_tables: self.auto_create_tables,
        })
    }
}

/// Connections by service name plus entity definitions by entity name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub connections: BTreeMap<String, CassandraConfig>,
    pub entities: BTreeMap<String, EntityDefinition>,
}

impl MapperConfig {
    /// Extract from `figment` under [`CONFIG_KEY`]. A missing section yields the default.
    ///
    /// # Errors
    /// Returns `MapperError::Config` when the section does not deserialize.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        if figment.find_value(CONFIG_KEY).is_err() {
            return Ok(Self::default());
        }
        Ok(figment.extract_inner(CONFIG_KEY)?)
    }

    /// Build a registry holding every configured entity.
    ///
    /// # Errors
    /// Returns `MapperError::InvalidMetadata` for the first invalid entity.
    pub fn registry(&self) -> Result<MetadataRegistry> {
        let registry = MetadataRegistry::new();
        for (name, def) in &self.entities {
            registry.register(name, def.clone())?;
        }
        Ok(registry)
    }
}
