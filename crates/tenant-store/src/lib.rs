//! Schema-driven, tenant-isolated storage.
//!
//! A [`SchemaDefinition`] declares tables as field schemas. The
//! [`ProvisioningManager`] compiles each table to DDL and creates it in the
//! tenant's namespace on first use, through a [`ControlPlane`]. A
//! [`TableClient`] validates payloads locally and forwards typed CRUD to the
//! control plane's query endpoint.

pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod http;
pub mod mapper;
pub mod memory;
pub mod namespace;
pub mod naming;
pub mod provisioning;
pub mod query;
pub mod schema;
pub mod table;
pub mod transport;
pub mod validate;

pub use compiler::{TableDefinition, compile};
pub use config::{ConfigError, RetryPolicy, StoreConfig};
pub use descriptor::{TableDescriptor, serialize};
pub use error::{ProvisioningError, QueryError, StoreError, TransportError};
pub use http::HttpControlPlane;
pub use mapper::{ColumnDefinition, ColumnType, map_field};
pub use memory::MemoryControlPlane;
pub use namespace::{Namespace, TenantId};
pub use provisioning::ProvisioningManager;
pub use query::{Condition, Operator, OrderBy, QueryOptions};
pub use schema::{
    FieldKind, FieldSchema, SchemaDefinition, SchemaDefinitionError, TableSchema,
};
pub use table::TableClient;
pub use transport::ControlPlane;
pub use validate::{FieldViolation, Record, SchemaValidationError};
