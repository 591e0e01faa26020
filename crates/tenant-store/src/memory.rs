//! In-process control plane for tests and local development.
//!
//! Tables live in memory keyed by namespace and name. Every endpoint call is
//! counted, and latency or failures can be injected per endpoint.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::TransportError;
use crate::query::{Condition, Operator, OrderBy, QueryOptions};
use crate::schema::{CREATED_AT_COLUMN, ID_COLUMN, UPDATED_AT_COLUMN};
use crate::transport::{
    CheckTableRequest, CheckTableResponse, ControlPlane, EnsureSchemaRequest, EnsureTableRequest,
    MutationResponse, QueryOperation, QueryRequest, QueryResponse,
};
use crate::validate::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    CheckTable,
    EnsureSchema,
    EnsureTable,
    Query,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub check_table: usize,
    pub ensure_schema: usize,
    pub ensure_table: usize,
    pub query: usize,
}

impl CallCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.check_table + self.ensure_schema + self.ensure_table + self.query
    }
}

#[derive(Default)]
struct Counters {
    check_table: AtomicUsize,
    ensure_schema: AtomicUsize,
    ensure_table: AtomicUsize,
    query: AtomicUsize,
}

impl Counters {
    fn bump(&self, endpoint: Endpoint) {
        let counter = match endpoint {
            Endpoint::CheckTable => &self.check_table,
            Endpoint::EnsureSchema => &self.ensure_schema,
            Endpoint::EnsureTable => &self.ensure_table,
            Endpoint::Query => &self.query,
        };
        counter.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

#[derive(Default)]
struct MemoryState {
    schemas: HashSet<String>,
    tables: HashMap<(String, String), MemoryTable>,
    transport_failures: HashMap<Endpoint, usize>,
    rejected_tables: HashMap<String, String>,
    rejected_queries: HashMap<String, String>,
    created: Vec<String>,
}

#[derive(Default)]
struct MemoryTable {
    ddl: Option<String>,
    rows: Vec<Record>,
}

#[derive(Default)]
pub struct MemoryControlPlane {
    state: Mutex<MemoryState>,
    counters: Counters,
    latency: Option<Duration>,
}

impl MemoryControlPlane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `latency` before touching state.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            check_table: self.counters.check_table.load(AtomicOrdering::SeqCst),
            ensure_schema: self.counters.ensure_schema.load(AtomicOrdering::SeqCst),
            ensure_table: self.counters.ensure_table.load(AtomicOrdering::SeqCst),
            query: self.counters.query.load(AtomicOrdering::SeqCst),
        }
    }

    /// Registers a table as already provisioned, without DDL.
    pub async fn seed_table(&self, namespace: &str, table: &str) {
        let mut state = self.state.lock().await;
        state.schemas.insert(namespace.to_string());
        state
            .tables
            .entry((namespace.to_string(), table.to_string()))
            .or_default();
    }

    /// The next `count` calls to `endpoint` fail at the transport level.
    pub async fn fail_transport(&self, endpoint: Endpoint, count: usize) {
        self.state
            .lock()
            .await
            .transport_failures
            .insert(endpoint, count);
    }

    /// `ensure-table` answers `success: false` for `table` until cleared.
    pub async fn reject_table(&self, table: &str, message: &str) {
        self.state
            .lock()
            .await
            .rejected_tables
            .insert(table.to_string(), message.to_string());
    }

    /// `query` answers `success: false` for `table` until cleared.
    pub async fn reject_queries(&self, table: &str, message: &str) {
        self.state
            .lock()
            .await
            .rejected_queries
            .insert(table.to_string(), message.to_string());
    }

    pub async fn clear_rejections(&self) {
        let mut state = self.state.lock().await;
        state.rejected_tables.clear();
        state.rejected_queries.clear();
    }

    /// Tables created through `ensure-table`, in creation order.
    pub async fn created_tables(&self) -> Vec<String> {
        self.state.lock().await.created.clone()
    }

    pub async fn ddl(&self, namespace: &str, table: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .tables
            .get(&(namespace.to_string(), table.to_string()))
            .and_then(|table| table.ddl.clone())
    }

    pub async fn rows(&self, namespace: &str, table: &str) -> Vec<Record> {
        self.state
            .lock()
            .await
            .tables
            .get(&(namespace.to_string(), table.to_string()))
            .map(|table| table.rows.clone())
            .unwrap_or_default()
    }

    async fn enter(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        self.counters.bump(endpoint);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.transport_failures.get_mut(&endpoint)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(TransportError::Request {
                message: format!("injected failure for {endpoint:?}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn check_table(
        &self,
        request: &CheckTableRequest,
    ) -> Result<CheckTableResponse, TransportError> {
        self.enter(Endpoint::CheckTable).await?;
        let state = self.state.lock().await;
        let exists = state
            .tables
            .contains_key(&(request.namespace.clone(), request.table_name.clone()));
        Ok(CheckTableResponse { exists })
    }

    async fn ensure_schema(
        &self,
        request: &EnsureSchemaRequest,
    ) -> Result<MutationResponse, TransportError> {
        self.enter(Endpoint::EnsureSchema).await?;
        self.state
            .lock()
            .await
            .schemas
            .insert(request.namespace.clone());
        Ok(MutationResponse::ok())
    }

    async fn ensure_table(
        &self,
        request: &EnsureTableRequest,
    ) -> Result<MutationResponse, TransportError> {
        self.enter(Endpoint::EnsureTable).await?;
        let mut state = self.state.lock().await;
        if let Some(message) = state.rejected_tables.get(&request.table_name) {
            return Ok(MutationResponse::failed(message.clone()));
        }
        if !state.schemas.contains(&request.namespace) {
            return Ok(MutationResponse::failed(format!(
                "schema \"{}\" does not exist",
                request.namespace
            )));
        }
        let table = state
            .tables
            .entry((request.namespace.clone(), request.table_name.clone()))
            .or_default();
        table.ddl = Some(request.ddl.clone());
        state.created.push(request.table_name.clone());
        Ok(MutationResponse::ok())
    }

    async fn query(&self, request: &QueryRequest) -> Result<QueryResponse, TransportError> {
        self.enter(Endpoint::Query).await?;
        let mut state = self.state.lock().await;
        if let Some(message) = state.rejected_queries.get(&request.table_name) {
            return Ok(QueryResponse::failed(message.clone()));
        }
        let key = (request.namespace.clone(), request.table_name.clone());
        let Some(table) = state.tables.get_mut(&key) else {
            return Ok(QueryResponse::failed(format!(
                "relation \"{}.{}\" does not exist",
                request.namespace, request.table_name
            )));
        };
        Ok(execute(table, request))
    }
}

fn execute(table: &mut MemoryTable, request: &QueryRequest) -> QueryResponse {
    let options = &request.options;
    match request.operation {
        QueryOperation::Select => {
            let mut rows: Vec<Record> = table
                .rows
                .iter()
                .filter(|row| matches_all(row, &options.conditions))
                .cloned()
                .collect();
            if options.count {
                return QueryResponse::ok(json!({ "count": rows.len() }));
            }
            sort_rows(&mut rows, &options.order_by);
            QueryResponse::ok(Value::Array(paginate(rows, options)))
        }
        QueryOperation::Insert => {
            let incoming = match &request.data {
                Some(Value::Array(items)) => items.clone(),
                Some(item @ Value::Object(_)) => vec![item.clone()],
                _ => return QueryResponse::failed("insert requires object data"),
            };
            let now = timestamp();
            let mut inserted = Vec::with_capacity(incoming.len());
            for item in incoming {
                let Value::Object(mut row) = item else {
                    return QueryResponse::failed("insert requires object data");
                };
                row.entry(ID_COLUMN)
                    .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
                row.entry(CREATED_AT_COLUMN)
                    .or_insert_with(|| Value::String(now.clone()));
                row.entry(UPDATED_AT_COLUMN)
                    .or_insert_with(|| Value::String(now.clone()));
                inserted.push(row);
            }
            table.rows.extend(inserted.iter().cloned());
            QueryResponse::ok(Value::Array(
                inserted.into_iter().map(Value::Object).collect(),
            ))
        }
        QueryOperation::Update => {
            let Some(Value::Object(patch)) = &request.data else {
                return QueryResponse::failed("update requires object data");
            };
            let now = timestamp();
            let mut updated = Vec::new();
            for row in table
                .rows
                .iter_mut()
                .filter(|row| matches_all(row, &options.conditions))
            {
                for (column, value) in patch {
                    row.insert(column.clone(), value.clone());
                }
                row.insert(UPDATED_AT_COLUMN.to_string(), Value::String(now.clone()));
                updated.push(Value::Object(row.clone()));
            }
            QueryResponse::ok(Value::Array(updated))
        }
        QueryOperation::Delete => {
            let (deleted, kept): (Vec<Record>, Vec<Record>) = table
                .rows
                .drain(..)
                .partition(|row| matches_all(row, &options.conditions));
            table.rows = kept;
            QueryResponse::ok(Value::Array(
                deleted.into_iter().map(Value::Object).collect(),
            ))
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn paginate(rows: Vec<Record>, options: &QueryOptions) -> Vec<Value> {
    let offset = usize::try_from(options.offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let limit = options
        .limit
        .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
    rows.into_iter()
        .skip(offset)
        .take(limit)
        .map(Value::Object)
        .collect()
}

fn sort_rows(rows: &mut [Record], order_by: &[OrderBy]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|left, right| {
        for order in order_by {
            let ordering = compare_for_sort(
                left.get(&order.column).unwrap_or(&Value::Null),
                right.get(&order.column).unwrap_or(&Value::Null),
            );
            let ordering = if order.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Total order for sorting; nulls sort last.
fn compare_for_sort(left: &Value, right: &Value) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(left, right).unwrap_or(Ordering::Equal),
    }
}

fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            compare_values(left, right) == Some(Ordering::Equal)
        }
        _ => left == right,
    }
}

fn matches_all(row: &Record, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| {
        let cell = row.get(&condition.column).unwrap_or(&Value::Null);
        matches_condition(cell, condition.operator, &condition.value)
    })
}

fn matches_condition(cell: &Value, operator: Operator, value: &Value) -> bool {
    match operator {
        Operator::Eq => values_equal(cell, value),
        Operator::Neq => !cell.is_null() && !values_equal(cell, value),
        Operator::Gt => compare_values(cell, value) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare_values(cell, value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare_values(cell, value) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare_values(cell, value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Like => match (cell.as_str(), value.as_str()) {
            (Some(text), Some(pattern)) => like(text, pattern),
            _ => false,
        },
        Operator::Ilike => match (cell.as_str(), value.as_str()) {
            (Some(text), Some(pattern)) => like(&text.to_lowercase(), &pattern.to_lowercase()),
            _ => false,
        },
        Operator::In => value
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|item| values_equal(cell, item))),
        Operator::Is => cell == value,
        Operator::Not => cell != value,
    }
}

/// SQL `LIKE` with `%` and `_` wildcards.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some('_') => {
                t += 1;
                p += 1;
            }
            Some(ch) if *ch == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|ch| *ch == '%')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn like_supports_both_wildcards() {
        assert!(like("john@example.com", "%@example.com"));
        assert!(like("john", "j_hn"));
        assert!(like("john", "%"));
        assert!(like("abcabc", "%bc%c"));
        assert!(!like("john", "jo"));
        assert!(!like("john", "_"));
    }

    #[test]
    fn operators_follow_sql_semantics() {
        let record = row(json!({"age": 30, "name": "Ann", "deleted_at": null}));
        let cell = |column: &str| record.get(column).cloned().unwrap_or(Value::Null);
        assert!(matches_condition(&cell("age"), Operator::Eq, &json!(30.0)));
        assert!(matches_condition(&cell("age"), Operator::Gte, &json!(30)));
        assert!(!matches_condition(&cell("age"), Operator::Gt, &json!(30)));
        assert!(matches_condition(&cell("age"), Operator::In, &json!([10, 30])));
        assert!(matches_condition(&cell("name"), Operator::Ilike, &json!("a%")));
        assert!(!matches_condition(&cell("name"), Operator::Like, &json!("a%")));
        assert!(matches_condition(&cell("deleted_at"), Operator::Is, &Value::Null));
        assert!(matches_condition(&cell("missing"), Operator::Is, &Value::Null));
        assert!(matches_condition(&cell("name"), Operator::Not, &Value::Null));
        assert!(!matches_condition(&cell("deleted_at"), Operator::Neq, &json!(1)));
    }

    #[test]
    fn sorting_puts_nulls_last() {
        let mut rows = vec![
            row(json!({"n": 2})),
            row(json!({"n": null})),
            row(json!({"n": 1})),
        ];
        sort_rows(&mut rows, &[OrderBy::asc("n")]);
        let order: Vec<Value> = rows.iter().map(|r| r["n"].clone()).collect();
        assert_eq!(order, vec![json!(1), json!(2), Value::Null]);

        sort_rows(&mut rows, &[OrderBy::desc("n")]);
        assert_eq!(rows[0]["n"], Value::Null);
    }

    #[tokio::test]
    async fn injected_transport_failures_are_consumed() {
        let plane = MemoryControlPlane::new();
        plane.fail_transport(Endpoint::CheckTable, 1).await;
        let request = CheckTableRequest {
            namespace: "ns".to_string(),
            table_name: "users".to_string(),
        };
        assert!(plane.check_table(&request).await.is_err());
        assert_eq!(
            plane.check_table(&request).await,
            Ok(CheckTableResponse { exists: false })
        );
        assert_eq!(plane.calls().check_table, 2);
    }
}
