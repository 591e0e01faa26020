//! Table schema to DDL compilation.
//!
//! Rendered DDL is idempotent at the statement level: re-issuing it against a
//! provisioned target is a no-op.

use crate::mapper::{
    CURRENT_TIMESTAMP_SQL, ColumnDefinition, ColumnType, RANDOM_UUID_SQL, map_field,
};
use crate::naming::{quote_identifier, relationship_target};
use crate::schema::{
    CREATED_AT_COLUMN, ID_COLUMN, STANDARD_COLUMNS, TableSchema, UPDATED_AT_COLUMN,
};

pub const UPDATED_AT_FUNCTION: &str = "set_updated_at";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintDefinition {
    ForeignKey {
        name: String,
        column: String,
        references_table: String,
        references_column: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    /// Containing schema; unqualified names when absent.
    pub namespace: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    pub constraints: Vec<ConstraintDefinition>,
    pub indexes: Vec<IndexDefinition>,
}

/// Compiles a table schema. Declared standard columns are not emitted twice.
#[must_use]
pub fn compile(table_name: &str, schema: &TableSchema) -> TableDefinition {
    let declared: Vec<_> = schema
        .fields()
        .iter()
        .filter(|field| !STANDARD_COLUMNS.contains(&field.name.as_str()))
        .collect();

    let mut columns = Vec::with_capacity(declared.len() + STANDARD_COLUMNS.len());
    columns.push(ColumnDefinition {
        name: ID_COLUMN.to_string(),
        column_type: ColumnType::Uuid,
        nullable: false,
        default: Some(RANDOM_UUID_SQL.to_string()),
        primary_key: true,
        indexed: false,
    });
    columns.extend(declared.iter().map(|field| map_field(field)));
    columns.push(timestamp_column(CREATED_AT_COLUMN));
    columns.push(timestamp_column(UPDATED_AT_COLUMN));

    let constraints = declared
        .iter()
        .filter_map(|field| {
            relationship_target(&field.name).map(|target| ConstraintDefinition::ForeignKey {
                name: format!("fk_{table_name}_{}", field.name),
                column: field.name.clone(),
                references_table: target,
                references_column: ID_COLUMN.to_string(),
            })
        })
        .collect();

    let indexes = columns
        .iter()
        .filter(|column| column.indexed)
        .map(|column| IndexDefinition {
            name: format!("idx_{table_name}_{}", column.name),
            column: column.name.clone(),
        })
        .collect();

    TableDefinition {
        name: table_name.to_string(),
        namespace: None,
        columns,
        constraints,
        indexes,
    }
}

fn timestamp_column(name: &str) -> ColumnDefinition {
    ColumnDefinition {
        name: name.to_string(),
        column_type: ColumnType::TimestampTz,
        nullable: false,
        default: Some(CURRENT_TIMESTAMP_SQL.to_string()),
        primary_key: false,
        indexed: false,
    }
}

impl TableDefinition {
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|column| column.name == name)
    }

    fn qualify(&self, name: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}.{}", quote_identifier(namespace), quote_identifier(name)),
            None => quote_identifier(name),
        }
    }

    /// Renders the full DDL script: schema, table, indexes, and the
    /// `updated_at` maintenance trigger.
    #[must_use]
    pub fn render(&self) -> String {
        let table = self.qualify(&self.name);
        let mut statements = Vec::new();

        if let Some(namespace) = &self.namespace {
            statements.push(format!(
                "CREATE SCHEMA IF NOT EXISTS {};",
                quote_identifier(namespace)
            ));
        }

        let mut body: Vec<String> = self.columns.iter().map(ColumnDefinition::render).collect();
        body.extend(self.constraints.iter().map(|constraint| match constraint {
            ConstraintDefinition::ForeignKey {
                name,
                column,
                references_table,
                references_column,
            } => format!(
                "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_identifier(name),
                quote_identifier(column),
                self.qualify(references_table),
                quote_identifier(references_column)
            ),
        }));
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n);",
            body.join(",\n    ")
        ));

        for index in &self.indexes {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} ({});",
                quote_identifier(&index.name),
                quote_identifier(&index.column)
            ));
        }

        let function = self.qualify(UPDATED_AT_FUNCTION);
        statements.push(format!(
            "CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $$\nBEGIN\n    NEW.{} = {CURRENT_TIMESTAMP_SQL};\n    RETURN NEW;\nEND;\n$$ LANGUAGE plpgsql;",
            quote_identifier(UPDATED_AT_COLUMN)
        ));
        let trigger = quote_identifier(&format!("trg_{}_{UPDATED_AT_COLUMN}", self.name));
        statements.push(format!("DROP TRIGGER IF EXISTS {trigger} ON {table};"));
        statements.push(format!(
            "CREATE TRIGGER {trigger} BEFORE UPDATE ON {table} FOR EACH ROW EXECUTE FUNCTION {function}();"
        ));

        statements.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldSchema;

    fn users() -> TableSchema {
        TableSchema::new()
            .field(FieldSchema::string("name").max_length(100))
            .field(FieldSchema::string("email"))
            .field(FieldSchema::enumeration("role", ["admin", "user"]))
            .field(FieldSchema::date("lastActive").optional())
    }

    #[test]
    fn standard_columns_wrap_declared_columns() {
        let table = compile("users", &users());
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "name",
                "email",
                "role",
                "lastActive",
                "created_at",
                "updated_at"
            ]
        );
        let id = table.column("id").expect("id column");
        assert!(id.primary_key);
        assert_eq!(id.column_type, ColumnType::Uuid);
        assert_eq!(id.default.as_deref(), Some("gen_random_uuid()"));
        for name in ["created_at", "updated_at"] {
            let column = table.column(name).expect("timestamp column");
            assert!(!column.nullable);
            assert_eq!(column.default.as_deref(), Some("NOW()"));
        }
    }

    #[test]
    fn declared_standard_columns_are_not_duplicated() {
        let schema = TableSchema::new()
            .field(FieldSchema::uuid("id"))
            .field(FieldSchema::string("title"))
            .field(FieldSchema::date("created_at"));
        let table = compile("posts", &schema);
        let ids = table.columns.iter().filter(|c| c.name == "id").count();
        let created = table.columns.iter().filter(|c| c.name == "created_at").count();
        assert_eq!(ids, 1);
        assert_eq!(created, 1);
        assert_eq!(table.columns.len(), 4);
    }

    #[test]
    fn relationship_fields_become_foreign_keys() {
        let schema = TableSchema::new()
            .field(FieldSchema::uuid("user_id"))
            .field(FieldSchema::uuid("company_id"))
            .field(FieldSchema::uuid("category_id").optional());
        let table = compile("posts", &schema);
        let targets: Vec<(&str, &str)> = table
            .constraints
            .iter()
            .map(|constraint| match constraint {
                ConstraintDefinition::ForeignKey {
                    column,
                    references_table,
                    ..
                } => (column.as_str(), references_table.as_str()),
            })
            .collect();
        assert_eq!(
            targets,
            vec![
                ("user_id", "users"),
                ("company_id", "companies"),
                ("category_id", "categories")
            ]
        );
        let index_names: Vec<&str> = table.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(
            index_names,
            vec![
                "idx_posts_user_id",
                "idx_posts_company_id",
                "idx_posts_category_id"
            ]
        );
    }

    #[test]
    fn rendered_ddl_follows_statement_order() {
        let ddl = compile(
            "users",
            &users().field(FieldSchema::uuid("company_id")),
        )
        .in_namespace("tenant_app_acme")
        .render();

        let positions: Vec<usize> = [
            "CREATE SCHEMA IF NOT EXISTS \"tenant_app_acme\";",
            "CREATE TABLE IF NOT EXISTS \"tenant_app_acme\".\"users\" (",
            "\"id\" UUID PRIMARY KEY DEFAULT gen_random_uuid()",
            "\"name\" VARCHAR(100) NOT NULL",
            "\"email\" TEXT NOT NULL",
            "\"role\" TEXT NOT NULL",
            "\"lastActive\" TIMESTAMP WITH TIME ZONE NULL",
            "\"created_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()",
            "\"updated_at\" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()",
            "CONSTRAINT \"fk_users_company_id\" FOREIGN KEY (\"company_id\") REFERENCES \"tenant_app_acme\".\"companies\" (\"id\")",
            "CREATE INDEX IF NOT EXISTS \"idx_users_name\" ON \"tenant_app_acme\".\"users\" (\"name\");",
            "CREATE INDEX IF NOT EXISTS \"idx_users_email\"",
            "CREATE OR REPLACE FUNCTION \"tenant_app_acme\".\"set_updated_at\"()",
            "DROP TRIGGER IF EXISTS \"trg_users_updated_at\"",
            "CREATE TRIGGER \"trg_users_updated_at\" BEFORE UPDATE ON \"tenant_app_acme\".\"users\"",
        ]
        .iter()
        .map(|marker| {
            ddl.find(marker)
                .unwrap_or_else(|| panic!("missing `{marker}` in:\n{ddl}"))
        })
        .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{ddl}");
    }

    #[test]
    fn unqualified_render_has_no_schema_statement() {
        let ddl = compile("notes", &TableSchema::new().field(FieldSchema::string("body"))).render();
        assert!(!ddl.contains("CREATE SCHEMA"));
        assert!(ddl.contains("CREATE TABLE IF NOT EXISTS \"notes\" ("));
        assert!(!ddl.contains("CREATE INDEX"));
    }
}
