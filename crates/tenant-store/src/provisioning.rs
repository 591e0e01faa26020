//! Ensure-before-use provisioning with per-table memoization.
//!
//! The cache maps `namespace.table` to either a confirmed marker or the shared
//! future of the attempt in flight. Concurrent first callers for one table all
//! await the same attempt, so the check/create sequence runs once. Confirmed
//! entries are never removed. A failed attempt, or one every caller abandoned,
//! leaves no entry behind so the next call starts over.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};

use crate::compiler::compile;
use crate::config::{RetryPolicy, StoreConfig};
use crate::descriptor::serialize;
use crate::error::{ProvisioningError, ProvisioningStage, StoreError, TransportError};
use crate::http::HttpControlPlane;
use crate::namespace::{Namespace, TenantId};
use crate::naming::relationship_target;
use crate::schema::{SchemaDefinition, TableSchema};
use crate::table::TableClient;
use crate::transport::{
    CheckTableRequest, ControlPlane, EnsureSchemaRequest, EnsureTableRequest, MutationResponse,
};

type Attempt = Shared<BoxFuture<'static, Result<(), ProvisioningError>>>;

enum Slot {
    Confirmed,
    InFlight {
        id: u64,
        attempt: Attempt,
        waiters: usize,
    },
}

pub struct ProvisioningManager {
    control_plane: Arc<dyn ControlPlane>,
    tenant: TenantId,
    namespace: Namespace,
    retry: RetryPolicy,
    tables: Mutex<HashMap<String, Slot>>,
    next_attempt: AtomicU64,
}

impl ProvisioningManager {
    #[must_use]
    pub fn new(control_plane: Arc<dyn ControlPlane>, tenant: TenantId, retry: RetryPolicy) -> Self {
        let namespace = Namespace::derive(&tenant);
        Self {
            control_plane,
            tenant,
            namespace,
            retry,
            tables: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Manager over the HTTP control plane described by `config`.
    pub fn connect(config: &StoreConfig, tenant: TenantId) -> Result<Self, TransportError> {
        let control_plane = HttpControlPlane::new(config)?;
        Ok(Self::new(Arc::new(control_plane), tenant, config.retry))
    }

    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub(crate) fn control_plane(&self) -> &dyn ControlPlane {
        self.control_plane.as_ref()
    }

    /// Whether `table` has been confirmed to exist. In-flight attempts do not count.
    #[must_use]
    pub fn is_provisioned(&self, table: &str) -> bool {
        let key = self.namespace.table_key(table);
        self.lock_tables()
            .get(&key)
            .is_some_and(|slot| matches!(slot, Slot::Confirmed))
    }

    /// Typed operations for one declared table.
    pub fn table<'a>(
        &'a self,
        definition: &'a SchemaDefinition,
        name: &'a str,
    ) -> Result<TableClient<'a>, StoreError> {
        let schema = definition
            .table(name)
            .ok_or_else(|| StoreError::UnknownTable {
                table: name.to_string(),
            })?;
        Ok(TableClient::new(self, name, schema, definition.version()))
    }

    /// Provisions every table in the definition. Tables named by a declared
    /// relationship are created before the tables that reference them; tables
    /// within one wave run concurrently.
    pub async fn ensure_all(&self, definition: &SchemaDefinition) -> Result<(), ProvisioningError> {
        for wave in provisioning_waves(definition) {
            try_join_all(wave.into_iter().filter_map(|name| {
                definition
                    .table(name)
                    .map(|schema| self.ensure_table(name, schema, definition.version()))
            }))
            .await?;
        }
        Ok(())
    }

    /// Makes sure `namespace.table` exists, at most one check/create sequence
    /// per table per manager.
    pub async fn ensure_table(
        &self,
        table: &str,
        schema: &TableSchema,
        schema_version: u32,
    ) -> Result<(), ProvisioningError> {
        let key = self.namespace.table_key(table);
        let (id, attempt) = {
            let mut tables = self.lock_tables();
            match tables.get_mut(&key) {
                Some(Slot::Confirmed) => {
                    tracing::debug!(namespace = %self.namespace, table, "table already confirmed");
                    return Ok(());
                }
                Some(Slot::InFlight {
                    id,
                    attempt,
                    waiters,
                }) => {
                    *waiters += 1;
                    (*id, attempt.clone())
                }
                None => {
                    let id = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let attempt = self.start_attempt(table, schema, schema_version);
                    tables.insert(
                        key.clone(),
                        Slot::InFlight {
                            id,
                            attempt: attempt.clone(),
                            waiters: 1,
                        },
                    );
                    (id, attempt)
                }
            }
        };

        let mut waiter = Waiter {
            manager: self,
            key,
            id,
            settled: false,
        };
        let result = attempt.await;
        waiter.settle(result.is_ok());
        result
    }

    fn start_attempt(&self, table: &str, schema: &TableSchema, schema_version: u32) -> Attempt {
        let job = ProvisionJob {
            control_plane: Arc::clone(&self.control_plane),
            tenant: self.tenant.clone(),
            namespace: self.namespace.clone(),
            table: table.to_string(),
            schema: schema.clone(),
            schema_version,
            retry: self.retry,
        };
        job.run().boxed().shared()
    }

    fn lock_tables(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        // The map is never left mid-update, so a poisoned lock is still usable.
        self.tables
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Groups tables so every declared relationship target lands in an earlier
/// wave than the tables referencing it. Self references are ignored; tables
/// caught in a cycle share the final wave.
fn provisioning_waves(definition: &SchemaDefinition) -> Vec<Vec<&str>> {
    let mut pending: Vec<(&str, Vec<String>)> = definition
        .tables()
        .map(|(name, schema)| {
            let mut targets: Vec<String> = schema
                .fields()
                .iter()
                .filter_map(|field| relationship_target(&field.name))
                .filter(|target| target != name && definition.table(target).is_some())
                .collect();
            targets.dedup();
            (name, targets)
        })
        .collect();

    let mut done: HashSet<&str> = HashSet::new();
    let mut waves = Vec::new();
    while !pending.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = pending
            .into_iter()
            .partition(|(_, targets)| targets.iter().all(|target| done.contains(target.as_str())));
        if ready.is_empty() {
            let cycle: Vec<&str> = blocked.iter().map(|(name, _)| *name).collect();
            tracing::warn!(tables = ?cycle, "relationship cycle; provisioning together");
            waves.push(cycle);
            break;
        }
        let wave: Vec<&str> = ready.into_iter().map(|(name, _)| name).collect();
        done.extend(wave.iter().copied());
        waves.push(wave);
        pending = blocked;
    }
    waves
}

/// One caller's claim on an in-flight attempt. Settling records the outcome;
/// dropping it unsettled abandons the attempt once no caller is left waiting,
/// which drops the in-flight request.
struct Waiter<'a> {
    manager: &'a ProvisioningManager,
    key: String,
    id: u64,
    settled: bool,
}

impl Waiter<'_> {
    fn settle(&mut self, confirmed: bool) {
        self.settled = true;
        let mut tables = self.manager.lock_tables();
        if !is_current(&tables, &self.key, self.id) {
            return;
        }
        if confirmed {
            tables.insert(self.key.clone(), Slot::Confirmed);
        } else {
            tables.remove(&self.key);
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut tables = self.manager.lock_tables();
        let abandoned = match tables.get_mut(&self.key) {
            Some(Slot::InFlight { id, waiters, .. }) if *id == self.id => {
                *waiters = waiters.saturating_sub(1);
                *waiters == 0
            }
            _ => false,
        };
        if abandoned {
            tables.remove(&self.key);
            tracing::debug!(key = %self.key, "provisioning attempt abandoned");
        }
    }
}

fn is_current(tables: &HashMap<String, Slot>, key: &str, attempt_id: u64) -> bool {
    matches!(tables.get(key), Some(Slot::InFlight { id, .. }) if *id == attempt_id)
}

/// Owned inputs for one provisioning attempt.
struct ProvisionJob {
    control_plane: Arc<dyn ControlPlane>,
    tenant: TenantId,
    namespace: Namespace,
    table: String,
    schema: TableSchema,
    schema_version: u32,
    retry: RetryPolicy,
}

impl ProvisionJob {
    async fn run(self) -> Result<(), ProvisioningError> {
        if self.table_exists().await {
            tracing::debug!(namespace = %self.namespace, table = %self.table, "table exists");
            return Ok(());
        }

        let schema_request = EnsureSchemaRequest {
            namespace: self.namespace.to_string(),
            app_id: self.tenant.app_id.clone(),
            company_id: self.tenant.company_id.clone(),
        };
        let response = with_retry(self.retry, "ensure_schema", || {
            self.control_plane.ensure_schema(&schema_request)
        })
        .await
        .map_err(|source| ProvisioningError::Transport {
            stage: ProvisioningStage::EnsureSchema,
            source,
        })?;
        if !response.success {
            return Err(ProvisioningError::SchemaRejected {
                namespace: self.namespace.to_string(),
                message: failure_message(response),
            });
        }

        let ddl = compile(&self.table, &self.schema)
            .in_namespace(self.namespace.as_str())
            .render();
        let table_request = EnsureTableRequest {
            namespace: self.namespace.to_string(),
            table_name: self.table.clone(),
            ddl,
            schema: serialize(&self.schema),
            schema_version: self.schema_version,
        };
        let response = with_retry(self.retry, "ensure_table", || {
            self.control_plane.ensure_table(&table_request)
        })
        .await
        .map_err(|source| ProvisioningError::Transport {
            stage: ProvisioningStage::EnsureTable,
            source,
        })?;
        if !response.success {
            return Err(ProvisioningError::TableRejected {
                namespace: self.namespace.to_string(),
                table: self.table.clone(),
                message: failure_message(response),
            });
        }

        tracing::info!(namespace = %self.namespace, table = %self.table, "table provisioned");
        Ok(())
    }

    /// A check that cannot be answered counts as "does not exist".
    async fn table_exists(&self) -> bool {
        let request = CheckTableRequest {
            namespace: self.namespace.to_string(),
            table_name: self.table.clone(),
        };
        match with_retry(self.retry, "check_table", || {
            self.control_plane.check_table(&request)
        })
        .await
        {
            Ok(response) => response.exists,
            Err(error) => {
                tracing::warn!(
                    namespace = %self.namespace,
                    table = %self.table,
                    reason = %error,
                    "table existence check failed; provisioning anyway"
                );
                false
            }
        }
    }
}

fn failure_message(response: MutationResponse) -> String {
    response
        .error
        .unwrap_or_else(|| "control plane reported failure".to_string())
}

/// Retries transport failures of an idempotent call with linear backoff.
async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < attempts => {
                tracing::warn!(operation, attempt, reason = %error, "retrying control plane call");
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
