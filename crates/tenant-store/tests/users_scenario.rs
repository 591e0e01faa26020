use std::sync::Arc;

use serde_json::{Value, json};
use tenant_store::{
    ColumnType, ControlPlane, FieldSchema, MemoryControlPlane, ProvisioningManager, Record,
    RetryPolicy, SchemaDefinition, StoreError, TableSchema, TenantId, compile,
};

fn users_definition() -> anyhow::Result<SchemaDefinition> {
    Ok(SchemaDefinition::builder(1)
        .table(
            "users",
            TableSchema::new()
                .field(FieldSchema::string("name").max_length(100))
                .field(FieldSchema::string("email"))
                .field(FieldSchema::enumeration("role", ["admin", "user"]))
                .field(FieldSchema::date("lastActive").optional()),
        )
        .build()?)
}

fn payload(value: Value) -> anyhow::Result<Record> {
    match value {
        Value::Object(record) => Ok(record),
        other => Err(anyhow::anyhow!("expected object payload, got {other}")),
    }
}

#[test]
fn users_table_compiles_to_expected_columns() -> anyhow::Result<()> {
    let definition = users_definition()?;
    let schema = definition
        .table("users")
        .ok_or_else(|| anyhow::anyhow!("users table missing"))?;
    let table = compile("users", schema);

    let rendered: Vec<String> = table.columns.iter().map(|column| column.render()).collect();
    assert_eq!(
        rendered,
        vec![
            "\"id\" UUID PRIMARY KEY DEFAULT gen_random_uuid()".to_string(),
            "\"name\" VARCHAR(100) NOT NULL".to_string(),
            "\"email\" TEXT NOT NULL".to_string(),
            "\"role\" TEXT NOT NULL".to_string(),
            "\"lastActive\" TIMESTAMP WITH TIME ZONE NULL".to_string(),
            "\"created_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()".to_string(),
            "\"updated_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()".to_string(),
        ]
    );
    assert_eq!(
        table.column("name").map(|column| column.column_type),
        Some(ColumnType::Varchar(100))
    );

    let indexes: Vec<&str> = table.indexes.iter().map(|index| index.name.as_str()).collect();
    assert_eq!(indexes, vec!["idx_users_name", "idx_users_email"]);
    assert!(table.constraints.is_empty());
    Ok(())
}

#[tokio::test]
async fn insert_provisions_then_returns_generated_id() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    let manager = ProvisioningManager::new(
        Arc::clone(&plane) as Arc<dyn ControlPlane>,
        TenantId::new("crm", "acme"),
        RetryPolicy::none(),
    );
    let definition = users_definition()?;
    let users = manager.table(&definition, "users")?;

    let created = users
        .insert(payload(json!({"name": "John", "email": "j@x.com", "role": "user"}))?)
        .await?;
    let id = created
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing generated id"))?;
    assert!(uuid_like(id));
    assert_eq!(created.get("name"), Some(&json!("John")));

    let calls = plane.calls();
    assert_eq!(calls.check_table, 1);
    assert_eq!(calls.ensure_schema, 1);
    assert_eq!(calls.ensure_table, 1);
    assert_eq!(calls.query, 1);

    let ddl = plane
        .ddl("tenant_crm_acme", "users")
        .await
        .ok_or_else(|| anyhow::anyhow!("ddl not recorded"))?;
    assert!(ddl.starts_with("CREATE SCHEMA IF NOT EXISTS \"tenant_crm_acme\";"));
    assert!(ddl.contains("CREATE INDEX IF NOT EXISTS \"idx_users_email\""));
    assert!(ddl.contains("CREATE TRIGGER \"trg_users_updated_at\""));

    users
        .insert(payload(json!({"name": "Ann", "email": "a@x.com", "role": "admin"}))?)
        .await?;
    let calls = plane.calls();
    assert_eq!(calls.check_table, 1);
    assert_eq!(calls.ensure_table, 1);
    assert_eq!(calls.query, 2);
    Ok(())
}

#[tokio::test]
async fn missing_required_field_fails_without_network_calls() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    let manager = ProvisioningManager::new(
        Arc::clone(&plane) as Arc<dyn ControlPlane>,
        TenantId::new("crm", "acme"),
        RetryPolicy::none(),
    );
    let definition = users_definition()?;
    let users = manager.table(&definition, "users")?;

    let result = users
        .insert(payload(json!({"email": "j@x.com", "role": "user"}))?)
        .await;
    match result {
        Err(StoreError::Validation(error)) => {
            assert_eq!(error.table, "users");
            assert_eq!(error.paths(), vec!["name"]);
        }
        other => return Err(anyhow::anyhow!("expected validation failure, got {other:?}")),
    }

    let wrong_role = users
        .insert(payload(json!({"name": "John", "email": "j@x.com", "role": "owner"}))?)
        .await;
    assert!(matches!(wrong_role, Err(StoreError::Validation(_))));

    assert_eq!(plane.calls().total(), 0);
    assert!(!manager.is_provisioned("users"));
    Ok(())
}

fn uuid_like(value: &str) -> bool {
    value.len() == 36 && value.chars().filter(|ch| *ch == '-').count() == 4
}
