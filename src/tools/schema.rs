//! Schema introspection tools.
//!
//! Read-only views over `information_schema` and `crdb_internal`: tables, columns,
//! constraints, indexes, range metadata, views and foreign keys. User-supplied names are
//! bound as parameters where the statement allows it and quoted where it does not.

use crate::context::AppContext;
use crate::error::DbResult;
use crate::models::{QueryParam, Row};
use crate::tools::sql_validator::{quote_ident, validate_identifier};
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const LIST_TABLES_SQL: &str = "SELECT t.table_name, t.table_type, t.table_schema, s.estimated_row_count \
     FROM information_schema.tables t \
     LEFT JOIN crdb_internal.table_row_statistics s ON t.table_name = s.table_name \
     WHERE t.table_schema = $1 \
     ORDER BY t.table_name";

const DESCRIBE_COLUMNS_SQL: &str = "SELECT column_name, data_type, is_nullable, column_default, \
     character_maximum_length, numeric_precision, numeric_scale, is_identity, \
     generation_expression, ordinal_position \
     FROM information_schema.columns \
     WHERE table_name = $1 AND table_schema = $2 \
     ORDER BY ordinal_position";

const DESCRIBE_CONSTRAINTS_SQL: &str = "SELECT tc.constraint_name, tc.constraint_type, kcu.column_name, \
     ccu.table_name AS foreign_table_name, ccu.column_name AS foreign_column_name, cc.check_clause \
     FROM information_schema.table_constraints tc \
     LEFT JOIN information_schema.key_column_usage kcu ON tc.constraint_name = kcu.constraint_name \
     LEFT JOIN information_schema.constraint_column_usage ccu ON ccu.constraint_name = tc.constraint_name \
     LEFT JOIN information_schema.check_constraints cc ON tc.constraint_name = cc.constraint_name \
     WHERE tc.table_name = $1 AND tc.table_schema = $2";

const LIST_VIEWS_SQL: &str = "SELECT table_name AS view_name, view_definition \
     FROM information_schema.views \
     WHERE table_schema = $1 \
     ORDER BY table_name";

const RELATIONSHIPS_SQL: &str = "SELECT tc.table_name, kcu.column_name, \
     ccu.table_name AS foreign_table_name, ccu.column_name AS foreign_column_name, \
     rc.constraint_name, rc.update_rule, rc.delete_rule \
     FROM information_schema.table_constraints AS tc \
     JOIN information_schema.key_column_usage AS kcu ON tc.constraint_name = kcu.constraint_name \
     JOIN information_schema.constraint_column_usage AS ccu ON ccu.constraint_name = tc.constraint_name \
     JOIN information_schema.referential_constraints AS rc ON tc.constraint_name = rc.constraint_name \
     WHERE tc.constraint_type = 'FOREIGN KEY'";

fn default_schema() -> String {
    "public".to_string()
}

/// Input for the list_tables, list_views and analyze_schema tools.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SchemaInput {
    /// Schema name (default: "public")
    #[serde(default = "default_schema")]
    pub db_schema: String,
}

impl Default for SchemaInput {
    fn default() -> Self {
        Self {
            db_schema: default_schema(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListTablesOutput {
    pub tables: Vec<Row>,
    pub schema: String,
    pub count: usize,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescribeTableInput {
    pub table_name: String,
    /// Schema name (default: "public")
    #[serde(default = "default_schema")]
    pub db_schema: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DescribeTableOutput {
    pub database: Option<String>,
    pub schema: String,
    pub table: String,
    pub columns: Vec<Row>,
    pub constraints: Vec<Row>,
    pub indexes: Vec<Row>,
    /// First range of the table (leaseholder, replicas, size), if any
    pub metadata: Option<Row>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListViewsOutput {
    pub views: Vec<Row>,
    pub schema: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct RelationshipsInput {
    /// Only relationships declared on this table (default: all tables)
    #[serde(default)]
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RelationshipsOutput {
    pub relationships: Vec<Row>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SchemaSummary {
    pub table_count: usize,
    pub view_count: usize,
    pub relationship_count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AnalyzeSchemaOutput {
    pub schema: String,
    pub summary: SchemaSummary,
    pub tables: Vec<Row>,
    pub views: Vec<Row>,
    pub relationships: Vec<Row>,
    /// RFC 3339 timestamp of the analysis
    pub generated_at: String,
}

/// `SHOW INDEXES` for one schema-qualified table; neither name can be a placeholder.
pub fn indexes_sql(schema: &str, table: &str) -> String {
    format!(
        "SELECT index_name, non_unique, column_name, direction, storing, implicit \
         FROM [SHOW INDEXES FROM {}.{}] ORDER BY index_name, seq_in_index",
        quote_ident(schema),
        quote_ident(table)
    )
}

/// Range metadata for the tables of `database`, filtered by `$1`.
pub fn range_metadata_sql(database: &str) -> String {
    format!(
        "SELECT range_id, schema_name, table_name, range_size_mb, lease_holder, \
         lease_holder_locality, replicas, replica_localities, range_size, span_stats \
         FROM [SHOW RANGES FROM DATABASE {} WITH TABLES, KEYS, DETAILS] \
         WHERE table_name = $1",
        quote_ident(database)
    )
}

/// Foreign-key query plus its parameters.
pub fn relationships_query(table_name: Option<&str>) -> (String, Vec<QueryParam>) {
    let mut sql = RELATIONSHIPS_SQL.to_string();
    let mut params = Vec::new();
    if let Some(table) = table_name.map(str::trim).filter(|t| !t.is_empty()) {
        sql.push_str(" AND tc.table_name = $1");
        params.push(QueryParam::String(table.to_string()));
    }
    sql.push_str(" ORDER BY tc.table_name, kcu.ordinal_position");
    (sql, params)
}

/// Handler for schema introspection tools.
#[derive(Debug, Clone)]
pub struct SchemaToolHandler {
    ctx: AppContext,
}

impl SchemaToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn list_tables(&self, input: SchemaInput) -> DbResult<ListTablesOutput> {
        let params = [QueryParam::String(input.db_schema.clone())];
        let result = self.ctx.fetch(LIST_TABLES_SQL, &params).await?;
        let count = result.row_count();
        info!(schema = %input.db_schema, count, "Listed tables");
        Ok(ListTablesOutput {
            tables: result.into_rows(),
            schema: input.db_schema,
            count,
        })
    }

    pub async fn describe_table(&self, input: DescribeTableInput) -> DbResult<DescribeTableOutput> {
        let table = validate_identifier("Table", &input.table_name)?.to_string();
        let schema = validate_identifier("Schema", &input.db_schema)?.to_string();
        let pool = self.ctx.pool().await?;
        let executor = &self.ctx.executor;
        let database = self.ctx.pools.current_database().await;

        let params = [
            QueryParam::String(table.clone()),
            QueryParam::String(input.db_schema.clone()),
        ];
        let columns = executor.fetch(&pool, DESCRIBE_COLUMNS_SQL, &params).await?;
        let constraints = executor
            .fetch(&pool, DESCRIBE_CONSTRAINTS_SQL, &params)
            .await?;
        let indexes = executor.fetch(&pool, &indexes_sql(&schema, &table), &[]).await?;

        let metadata = match &database {
            Some(db) => executor
                .fetch(
                    &pool,
                    &range_metadata_sql(db),
                    &[QueryParam::String(table.clone())],
                )
                .await?
                .rows
                .into_iter()
                .next(),
            None => None,
        };

        debug!(
            table = %table,
            columns = columns.row_count(),
            constraints = constraints.row_count(),
            indexes = indexes.row_count(),
            "Described table"
        );
        Ok(DescribeTableOutput {
            database,
            schema: input.db_schema,
            table,
            columns: columns.into_rows(),
            constraints: constraints.into_rows(),
            indexes: indexes.into_rows(),
            metadata,
        })
    }

    pub async fn list_views(&self, input: SchemaInput) -> DbResult<ListViewsOutput> {
        let params = [QueryParam::String(input.db_schema.clone())];
        let result = self.ctx.fetch(LIST_VIEWS_SQL, &params).await?;
        let count = result.row_count();
        Ok(ListViewsOutput {
            views: result.into_rows(),
            schema: input.db_schema,
            count,
        })
    }

    pub async fn table_relationships(&self, input: RelationshipsInput) -> DbResult<RelationshipsOutput> {
        let (sql, params) = relationships_query(input.table_name.as_deref());
        let result = self.ctx.fetch(&sql, &params).await?;
        let count = result.row_count();
        Ok(RelationshipsOutput {
            relationships: result.into_rows(),
            count,
        })
    }

    /// Tables, views and foreign keys of one schema in a single report.
    pub async fn analyze_schema(&self, input: SchemaInput) -> DbResult<AnalyzeSchemaOutput> {
        let tables = self.list_tables(input.clone()).await?;
        let views = self.list_views(input.clone()).await?;
        let relationships = self.table_relationships(RelationshipsInput::default()).await?;

        Ok(AnalyzeSchemaOutput {
            schema: input.db_schema,
            summary: SchemaSummary {
                table_count: tables.count,
                view_count: views.count,
                relationship_count: relationships.count,
            },
            tables: tables.tables,
            views: views.views,
            relationships: relationships.relationships,
            generated_at: Utc::now().to_rfc3339(),
        })
    }
}
