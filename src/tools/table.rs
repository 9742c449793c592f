//! Table management tools.
//!
//! DDL for tables, indexes and views plus `IMPORT INTO` bulk loads. Object names are
//! always quoted; column types and constraints are spliced in after a separator check.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::models::Row;
use crate::tools::MessageOutput;
use crate::tools::sql_validator::{
    ensure_single_select, quote_ident, quote_literal, strip_trailing_semicolons,
    validate_fragment, validate_identifier, validate_import_url,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

/// One column in a create_table request.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ColumnDefinition {
    #[serde(default)]
    pub name: String,
    /// SQL type, e.g. "SERIAL", "STRING", "DECIMAL(10,2)"
    #[serde(default)]
    pub datatype: String,
    /// Optional constraint clause, e.g. "PRIMARY KEY", "NOT NULL DEFAULT now()"
    #[serde(default)]
    pub constraint: Option<String>,
}

impl ColumnDefinition {
    fn to_sql(&self) -> DbResult<String> {
        let name = self.name.trim();
        let datatype = self.datatype.trim();
        if name.is_empty() || datatype.is_empty() {
            return Err(DbError::invalid_input(
                "Each column must have 'name' and 'datatype'",
            ));
        }
        validate_fragment("datatype", datatype)?;

        let mut def = format!("{} {}", quote_ident(name), datatype);
        if let Some(constraint) = self.constraint.as_deref().map(str::trim) {
            if !constraint.is_empty() {
                validate_fragment("constraint", constraint)?;
                def.push(' ');
                def.push_str(constraint);
            }
        }
        Ok(def)
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateTableInput {
    pub table_name: String,
    /// Column definitions, in table order
    pub columns: Vec<ColumnDefinition>,
}

/// Bulk import file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImportFormat {
    #[default]
    Csv,
    Avro,
}

impl std::str::FromStr for ImportFormat {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "avro" => Ok(Self::Avro),
            _ => Err(DbError::invalid_input("Unsupported format")),
        }
    }
}

fn default_format() -> String {
    "csv".to_string()
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_skip_header() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct BulkImportInput {
    pub table_name: String,
    /// Source file URL. Schemes: s3, azure-blob, azure, gs, http, https
    pub file_url: String,
    /// "csv" (default) or "avro"
    #[serde(default = "default_format")]
    pub format: String,
    /// CSV field delimiter (default ",")
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// Skip the first CSV line (default true)
    #[serde(default = "default_skip_header")]
    pub skip_header: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BulkImportOutput {
    pub message: String,
    /// Rows returned by the IMPORT job (job_id, status, rows, bytes, ...)
    pub result: Vec<Row>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TableNameInput {
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateIndexInput {
    pub table_name: String,
    pub index_name: String,
    /// Indexed columns, in key order
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IndexNameInput {
    pub index_name: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateViewInput {
    pub view_name: String,
    /// A single SELECT statement defining the view
    pub query: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ViewNameInput {
    pub view_name: String,
}

pub fn build_create_table(table_name: &str, columns: &[ColumnDefinition]) -> DbResult<String> {
    let table = validate_identifier("Table", table_name)?;
    if columns.is_empty() {
        return Err(DbError::invalid_input("At least one column is required"));
    }
    let defs = columns
        .iter()
        .map(ColumnDefinition::to_sql)
        .collect::<DbResult<Vec<_>>>()?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        defs.join(", ")
    ))
}

pub fn build_import(input: &BulkImportInput) -> DbResult<String> {
    let table = validate_identifier("Table", &input.table_name)?;
    validate_import_url(&input.file_url)?;
    let format: ImportFormat = input.format.parse()?;
    let source = quote_literal(input.file_url.trim());

    Ok(match format {
        ImportFormat::Csv => format!(
            "IMPORT INTO {} CSV DATA ({}) WITH delimiter = {}, skip = '{}'",
            quote_ident(table),
            source,
            quote_literal(&input.delimiter),
            if input.skip_header { 1 } else { 0 }
        ),
        ImportFormat::Avro => format!("IMPORT INTO {} AVRO DATA ({})", quote_ident(table), source),
    })
}

pub fn build_create_index(input: &CreateIndexInput) -> DbResult<String> {
    let table = validate_identifier("Table", &input.table_name)?;
    let index = validate_identifier("Index", &input.index_name)?;
    if input.columns.is_empty() {
        return Err(DbError::invalid_input("At least one index column is required"));
    }
    let columns = input
        .columns
        .iter()
        .map(|c| validate_identifier("Column", c).map(quote_ident))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(format!(
        "CREATE INDEX {} ON {} ({})",
        quote_ident(index),
        quote_ident(table),
        columns.join(", ")
    ))
}

pub fn build_create_view(input: &CreateViewInput) -> DbResult<String> {
    let view = validate_identifier("View", &input.view_name)?;
    ensure_single_select(&input.query)?;
    Ok(format!(
        "CREATE VIEW IF NOT EXISTS {} AS {}",
        quote_ident(view),
        strip_trailing_semicolons(&input.query)
    ))
}

/// Handler for table management tools.
#[derive(Debug, Clone)]
pub struct TableToolHandler {
    ctx: AppContext,
}

impl TableToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn create_table(&self, input: CreateTableInput) -> DbResult<MessageOutput> {
        let sql = build_create_table(&input.table_name, &input.columns)?;
        self.ctx.execute(&sql).await?;

        let defs = input
            .columns
            .iter()
            .map(ColumnDefinition::to_sql)
            .collect::<DbResult<Vec<_>>>()?;
        let table = input.table_name.trim();
        info!(table = %table, columns = defs.len(), "Table created");
        Ok(MessageOutput::new(format!(
            "Table '{}' created with columns: {}",
            table,
            defs.join(", ")
        )))
    }

    /// Validation (scheme, format) happens before any pool is used.
    pub async fn bulk_import(&self, input: BulkImportInput) -> DbResult<BulkImportOutput> {
        let sql = build_import(&input)?;
        info!(table = %input.table_name, format = %input.format, "Starting bulk import");
        let result = self.ctx.fetch(&sql, &[]).await?;
        Ok(BulkImportOutput {
            message: format!("Imported data into table '{}'.", input.table_name.trim()),
            result: result.into_rows(),
        })
    }

    pub async fn drop_table(&self, input: TableNameInput) -> DbResult<MessageOutput> {
        let table = validate_identifier("Table", &input.table_name)?;
        self.ctx
            .execute(&format!("DROP TABLE {} CASCADE", quote_ident(table)))
            .await?;
        info!(table = %table, "Table dropped");
        Ok(MessageOutput::new(format!("Table '{}' dropped.", table)))
    }

    pub async fn create_index(&self, input: CreateIndexInput) -> DbResult<MessageOutput> {
        let sql = build_create_index(&input)?;
        self.ctx.execute(&sql).await?;
        info!(index = %input.index_name, table = %input.table_name, "Index created");
        Ok(MessageOutput::new(format!(
            "Index '{}' created on table '{}'.",
            input.index_name.trim(),
            input.table_name.trim()
        )))
    }

    pub async fn drop_index(&self, input: IndexNameInput) -> DbResult<MessageOutput> {
        let index = validate_identifier("Index", &input.index_name)?;
        self.ctx
            .execute(&format!("DROP INDEX {}", quote_ident(index)))
            .await?;
        info!(index = %index, "Index dropped");
        Ok(MessageOutput::new(format!("Index '{}' dropped.", index)))
    }

    pub async fn create_view(&self, input: CreateViewInput) -> DbResult<MessageOutput> {
        let sql = build_create_view(&input)?;
        self.ctx.execute(&sql).await?;
        info!(view = %input.view_name, "View created");
        Ok(MessageOutput::new(format!(
            "View '{}' created.",
            input.view_name.trim()
        )))
    }

    pub async fn drop_view(&self, input: ViewNameInput) -> DbResult<MessageOutput> {
        let view = validate_identifier("View", &input.view_name)?;
        self.ctx
            .execute(&format!("DROP VIEW {} CASCADE", quote_ident(view)))
            .await?;
        info!(view = %view, "View dropped");
        Ok(MessageOutput::new(format!("View '{}' dropped.", view)))
    }
}
