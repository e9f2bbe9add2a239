#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Cassandra data-mapper.
//!
//! Maps records of declared entities onto Cassandra tables over the native
//! protocol. The layers, bottom up:
//! - `codec`: typed values to and from wire bytes
//! - `transport`: the `Connector`/`Transport` seam and the native protocol
//! - `connection`: host selection, bounded retry with failover, the
//!   prepared-statement cache
//! - `translate`: server failures to typed store errors
//! - `metadata`/`registry`: validated entity descriptions
//! - `driver`/`mapper`/`record`: record-level load, save, delete and counters
//! - `schema`: idempotent table and index creation
//!
//! # Example
//! ```rust,no_run
//! use cassmap_db::{ConnectionResolver, Mapper, MapperConfig};
//! use figment::{Figment, providers::Serialized};
//!
//! # fn main() -> cassmap_db::Result<()> {
//! let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
//!     "cassmap": {
//!         "connections": { "main": { "hosts": ["10.0.0.1", "10.0.0.2"], "keyspace": "app" } },
//!         "entities": { "User": {
//!             "table": "users",
//!             "fields": [{ "name": "id", "type": "uuid" }, { "name": "email" }]
//!         } }
//!     }
//! })));
//!
//! let config = MapperConfig::from_figment(&figment)?;
//! let registry = config.registry()?;
//! let resolver = ConnectionResolver::from_config(&config)?;
//!
//! let mut users = Mapper::new(resolver.driver("main")?, registry.require("User")?);
//! let mut user = users.new_record();
//! user.set("id", uuid::Uuid::new_v4())?;
//! user.set("email", "ada@example.com")?;
//! users.save(&mut user)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod consistency;
pub mod driver;
pub mod error;
pub mod mapper;
pub mod metadata;
pub mod query;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod statement;
pub mod translate;
pub mod transport;

pub use codec::{ColumnType, CodecError, Value};
pub use config::{CONFIG_KEY, CassandraConfig, MapperConfig};
pub use connection::{ClusterInfo, Connection, ConnectionSettings};
pub use consistency::Consistency;
pub use driver::{CassandraDriver, CounterStore, StorageDriver};
pub use error::{MapperError, Result};
pub use mapper::{Mapper, RecordHooks};
pub use metadata::{EntityDefinition, EntityMetadata, FieldDefinition};
pub use query::{Criteria, Criterion, Direction, LoadOptions};
pub use record::{Change, Delta, Id, Record};
pub use registry::MetadataRegistry;
pub use resolver::ConnectionResolver;
pub use schema::{SchemaBootstrapper, SchemaReport};
pub use translate::{StoreError, StoreErrorKind};
pub use transport::{Connector, NativeConnector, Timeouts, Transport};
