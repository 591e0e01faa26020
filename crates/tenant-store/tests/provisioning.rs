use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tenant_store::memory::Endpoint;
use tenant_store::{
    ControlPlane, FieldSchema, MemoryControlPlane, ProvisioningError, ProvisioningManager,
    Record, RetryPolicy, SchemaDefinition, StoreError, TableSchema, TenantId,
};

fn definition() -> anyhow::Result<SchemaDefinition> {
    Ok(SchemaDefinition::builder(3)
        .table(
            "companies",
            TableSchema::new().field(FieldSchema::string("name").max_length(200)),
        )
        .table(
            "projects",
            TableSchema::new()
                .field(FieldSchema::string("name"))
                .field(FieldSchema::uuid("company_id"))
                .field(FieldSchema::uuid("owner_id").optional())
                .field(FieldSchema::string("status").default_value(json!("active"))),
        )
        .build()?)
}

fn manager(plane: &Arc<MemoryControlPlane>, retry: RetryPolicy) -> ProvisioningManager {
    ProvisioningManager::new(
        Arc::clone(plane) as Arc<dyn ControlPlane>,
        TenantId::new("planner", "acme"),
        retry,
    )
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        backoff_ms: 1,
    }
}

#[tokio::test]
async fn concurrent_first_operations_create_each_table_once() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new().with_latency(Duration::from_millis(15)));
    let manager = manager(&plane, RetryPolicy::none());
    let definition = definition()?;
    let companies = manager.table(&definition, "companies")?;
    let projects = manager.table(&definition, "projects")?;

    let company_counts = join_all((0..12).map(|_| companies.count(None)));
    let project_counts = join_all((0..12).map(|_| projects.count(None)));
    let (company_counts, project_counts) = tokio::join!(company_counts, project_counts);

    for result in company_counts.into_iter().chain(project_counts) {
        assert_eq!(result?, 0);
    }
    let calls = plane.calls();
    assert_eq!(calls.check_table, 2);
    assert_eq!(calls.ensure_table, 2);
    assert_eq!(calls.query, 24);
    Ok(())
}

#[tokio::test]
async fn relationship_columns_become_foreign_keys() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    let manager = manager(&plane, RetryPolicy::none());
    let definition = definition()?;
    manager.ensure_all(&definition).await?;

    let ddl = plane
        .ddl("tenant_planner_acme", "projects")
        .await
        .ok_or_else(|| anyhow::anyhow!("projects ddl missing"))?;
    assert!(ddl.contains(
        "CONSTRAINT \"fk_projects_company_id\" FOREIGN KEY (\"company_id\") REFERENCES \"tenant_planner_acme\".\"companies\" (\"id\")"
    ));
    assert!(ddl.contains(
        "CONSTRAINT \"fk_projects_owner_id\" FOREIGN KEY (\"owner_id\") REFERENCES \"tenant_planner_acme\".\"owners\" (\"id\")"
    ));
    assert!(ddl.contains("\"status\" TEXT NOT NULL DEFAULT 'active'"));
    assert!(ddl.contains("CREATE INDEX IF NOT EXISTS \"idx_projects_status\""));
    Ok(())
}

#[tokio::test]
async fn failed_create_is_not_cached_and_is_retried_later() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.reject_table("companies", "quota exceeded").await;
    let manager = manager(&plane, quick_retry());
    let definition = definition()?;
    let companies = manager.table(&definition, "companies")?;

    let mut row = Record::new();
    row.insert("name".to_string(), json!("Acme"));

    let first = companies.insert(row.clone()).await;
    match first {
        Err(StoreError::Provisioning(ProvisioningError::TableRejected { message, .. })) => {
            assert_eq!(message, "quota exceeded");
        }
        other => return Err(anyhow::anyhow!("expected rejected create, got {other:?}")),
    }
    assert_eq!(plane.calls().ensure_table, 1);
    assert_eq!(plane.calls().query, 0);

    plane.clear_rejections().await;
    let created = companies.insert(row).await?;
    assert_eq!(created.get("name"), Some(&json!("Acme")));
    assert_eq!(plane.calls().check_table, 2);
    assert_eq!(plane.calls().ensure_table, 2);
    assert!(manager.is_provisioned("companies"));
    Ok(())
}

#[tokio::test]
async fn unreachable_existence_check_never_counts_as_existing() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    plane.seed_table("tenant_planner_acme", "companies").await;
    plane.fail_transport(Endpoint::CheckTable, 10).await;
    let manager = manager(&plane, quick_retry());
    let definition = definition()?;

    manager.table(&definition, "companies")?.count(None).await?;

    let calls = plane.calls();
    assert_eq!(calls.check_table, 3);
    assert_eq!(calls.ensure_schema, 1);
    assert_eq!(calls.ensure_table, 1);
    Ok(())
}

#[tokio::test]
async fn separate_managers_do_not_share_a_cache() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    let definition = definition()?;

    let first = manager(&plane, RetryPolicy::none());
    first.ensure_all(&definition).await?;
    let second = manager(&plane, RetryPolicy::none());
    assert!(!second.is_provisioned("companies"));
    second.ensure_all(&definition).await?;

    let calls = plane.calls();
    assert_eq!(calls.check_table, 4);
    assert_eq!(calls.ensure_table, 2);
    Ok(())
}

#[tokio::test]
async fn tenants_get_isolated_namespaces() -> anyhow::Result<()> {
    let plane = Arc::new(MemoryControlPlane::new());
    let definition = definition()?;
    let acme = manager(&plane, RetryPolicy::none());
    let globex = ProvisioningManager::new(
        Arc::clone(&plane) as Arc<dyn ControlPlane>,
        TenantId::new("planner", "globex"),
        RetryPolicy::none(),
    );

    let mut row = Record::new();
    row.insert("name".to_string(), json!("Acme"));
    acme.table(&definition, "companies")?.insert(row).await?;

    assert_eq!(globex.table(&definition, "companies")?.count(None).await?, 0);
    assert_eq!(plane.rows("tenant_planner_acme", "companies").await.len(), 1);
    assert!(plane.rows("tenant_planner_globex", "companies").await.is_empty());
    Ok(())
}
