//! MCP service implementation using rmcp.
//!
//! This module defines the CrdbService struct with every CockroachDB tool exposed via the
//! MCP protocol using the rmcp framework's macros. Each tool delegates to a handler in
//! [`crate::tools`] and wraps its result in a [`ToolResponse`] envelope.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::tools::cluster::{
    AnalyzePerformanceInput, AnalyzePerformanceOutput, ClusterStatusInput, ClusterStatusOutput,
    ReplicationStatusInput, ReplicationStatusOutput, RunningQueriesInput, RunningQueriesOutput,
};
use crate::tools::database::{
    ActiveConnectionsOutput, ConnectDatabaseInput, ConnectOutput, ConnectionStatusOutput,
    DatabaseNameInput, DatabaseSettingsOutput, ListDatabasesOutput,
    SwitchDatabaseInput, SwitchDatabaseOutput,
};
use crate::tools::explain::{ExplainInput, ExplainOutput};
use crate::tools::query::{
    ExecuteQueryInput, ExecuteQueryOutput, QueryHistoryInput, QueryHistoryOutput,
};
use crate::tools::schema::{
    AnalyzeSchemaOutput, DescribeTableInput, DescribeTableOutput, ListTablesOutput,
    ListViewsOutput, RelationshipsInput, RelationshipsOutput, SchemaInput,
};
use crate::tools::table::{
    BulkImportInput, BulkImportOutput, CreateIndexInput, CreateTableInput, CreateViewInput,
    IndexNameInput, TableNameInput, ViewNameInput,
};
use crate::tools::transaction::{ExecuteTransactionInput, ExecuteTransactionOutput};
use crate::tools::{
    ClusterToolHandler, DatabaseToolHandler, ExplainToolHandler, MessageOutput, QueryToolHandler,
    SchemaToolHandler, TableToolHandler, ToolResponse, TransactionToolHandler,
};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use tracing::warn;

type ToolResult<T> = Result<Json<ToolResponse<T>>, McpError>;

/// Map a handler result onto the wire envelope.
///
/// The not-connected guard becomes a protocol error; every other failure is reported as
/// `{success: false, error}`.
fn respond<T>(tool: &str, result: DbResult<T>) -> ToolResult<T> {
    respond_envelope(tool, result.map(ToolResponse::ok))
}

fn respond_envelope<T>(tool: &str, result: DbResult<ToolResponse<T>>) -> ToolResult<T> {
    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) if e.is_not_connected() => Err(McpError::from(e)),
        Err(e) => Ok(Json(failure(tool, e))),
    }
}

fn failure<T>(tool: &str, err: DbError) -> ToolResponse<T> {
    warn!(tool, error = %err, "Tool call failed");
    ToolResponse::failure(err.tool_message())
}

#[derive(Clone)]
pub struct CrdbService {
    /// Shared process context (pool manager, query history, executor)
    ctx: AppContext,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl CrdbService {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    fn database(&self) -> DatabaseToolHandler {
        DatabaseToolHandler::new(self.ctx.clone())
    }

    fn table(&self) -> TableToolHandler {
        TableToolHandler::new(self.ctx.clone())
    }

    fn schema(&self) -> SchemaToolHandler {
        SchemaToolHandler::new(self.ctx.clone())
    }

    fn cluster(&self) -> ClusterToolHandler {
        ClusterToolHandler::new(self.ctx.clone())
    }
}

#[tool_router]
impl CrdbService {
    // Database operations

    #[tool(
        description = "Connect to the configured CockroachDB cluster, creating the connection pool if needed.\nReturns the server version and current database."
    )]
    async fn connect(&self) -> ToolResult<ConnectOutput> {
        respond("connect", self.database().connect().await)
    }

    #[tool(
        description = "Connect to a specific CockroachDB host and database, replacing the current connection pool.\nMissing fields default to port 26257, database defaultdb, user root, sslmode disable."
    )]
    async fn connect_database(
        &self,
        Parameters(input): Parameters<ConnectDatabaseInput>,
    ) -> ToolResult<ConnectOutput> {
        respond("connect_database", self.database().connect_database(input).await)
    }

    #[tool(description = "List all databases in the cluster with owner, regions and survival goal.")]
    async fn list_databases(&self) -> ToolResult<ListDatabasesOutput> {
        respond("list_databases", self.database().list_databases().await)
    }

    #[tool(
        description = "Get the current connection status: session details and pool statistics.\nDoes not open a connection."
    )]
    async fn get_connection_status(&self) -> ToolResult<ConnectionStatusOutput> {
        respond(
            "get_connection_status",
            self.database().connection_status().await,
        )
    }

    #[tool(description = "Switch the connection pool to a different database on the same cluster.")]
    async fn switch_database(
        &self,
        Parameters(input): Parameters<SwitchDatabaseInput>,
    ) -> ToolResult<SwitchDatabaseOutput> {
        respond("switch_database", self.database().switch_database(input).await)
    }

    #[tool(description = "List active sessions on the cluster, most recent first.")]
    async fn get_active_connections(&self) -> ToolResult<ActiveConnectionsOutput> {
        respond(
            "get_active_connections",
            self.database().active_connections().await,
        )
    }

    #[tool(description = "Retrieve all cluster settings.")]
    async fn get_database_settings(&self) -> ToolResult<DatabaseSettingsOutput> {
        respond(
            "get_database_settings",
            self.database().database_settings().await,
        )
    }

    #[tool(description = "Create a database if it does not already exist.")]
    async fn create_database(
        &self,
        Parameters(input): Parameters<DatabaseNameInput>,
    ) -> ToolResult<MessageOutput> {
        respond("create_database", self.database().create_database(input).await)
    }

    #[tool(
        description = "Drop a database and everything in it (CASCADE).\nThe default database cannot be dropped. Dropping the current database switches to defaultdb first."
    )]
    async fn drop_database(
        &self,
        Parameters(input): Parameters<DatabaseNameInput>,
    ) -> ToolResult<MessageOutput> {
        respond("drop_database", self.database().drop_database(input).await)
    }

    // Table management

    #[tool(
        description = "Create a table if it does not exist.\nEach column needs a name and datatype, with an optional constraint (e.g. PRIMARY KEY, NOT NULL)."
    )]
    async fn create_table(
        &self,
        Parameters(input): Parameters<CreateTableInput>,
    ) -> ToolResult<MessageOutput> {
        respond("create_table", self.table().create_table(input).await)
    }

    #[tool(
        description = "Bulk load a CSV or AVRO file into an existing table with IMPORT INTO.\nSupported URL schemes: s3, azure-blob, azure, gs, http, https."
    )]
    async fn bulk_import(
        &self,
        Parameters(input): Parameters<BulkImportInput>,
    ) -> ToolResult<BulkImportOutput> {
        respond("bulk_import", self.table().bulk_import(input).await)
    }

    #[tool(description = "Drop a table and dependent objects (CASCADE).")]
    async fn drop_table(
        &self,
        Parameters(input): Parameters<TableNameInput>,
    ) -> ToolResult<MessageOutput> {
        respond("drop_table", self.table().drop_table(input).await)
    }

    #[tool(description = "Create an index on one or more columns of a table.")]
    async fn create_index(
        &self,
        Parameters(input): Parameters<CreateIndexInput>,
    ) -> ToolResult<MessageOutput> {
        respond("create_index", self.table().create_index(input).await)
    }

    #[tool(description = "Drop an index.")]
    async fn drop_index(
        &self,
        Parameters(input): Parameters<IndexNameInput>,
    ) -> ToolResult<MessageOutput> {
        respond("drop_index", self.table().drop_index(input).await)
    }

    #[tool(description = "Create a view from a single SELECT statement, if it does not exist.")]
    async fn create_view(
        &self,
        Parameters(input): Parameters<CreateViewInput>,
    ) -> ToolResult<MessageOutput> {
        respond("create_view", self.table().create_view(input).await)
    }

    #[tool(description = "Drop a view and dependent objects (CASCADE).")]
    async fn drop_view(
        &self,
        Parameters(input): Parameters<ViewNameInput>,
    ) -> ToolResult<MessageOutput> {
        respond("drop_view", self.table().drop_view(input).await)
    }

    // Schema introspection

    #[tool(
        description = "List tables in a schema (default: public) with their estimated row counts."
    )]
    async fn list_tables(
        &self,
        Parameters(input): Parameters<SchemaInput>,
    ) -> ToolResult<ListTablesOutput> {
        respond("list_tables", self.schema().list_tables(input).await)
    }

    #[tool(
        description = "Describe a table: columns, constraints, indexes and range metadata (leaseholder, replicas, size)."
    )]
    async fn describe_table(
        &self,
        Parameters(input): Parameters<DescribeTableInput>,
    ) -> ToolResult<DescribeTableOutput> {
        respond("describe_table", self.schema().describe_table(input).await)
    }

    #[tool(description = "List views in a schema (default: public) with their definitions.")]
    async fn list_views(
        &self,
        Parameters(input): Parameters<SchemaInput>,
    ) -> ToolResult<ListViewsOutput> {
        respond("list_views", self.schema().list_views(input).await)
    }

    #[tool(
        description = "List foreign key relationships, optionally only those declared on one table."
    )]
    async fn get_table_relationships(
        &self,
        Parameters(input): Parameters<RelationshipsInput>,
    ) -> ToolResult<RelationshipsOutput> {
        respond(
            "get_table_relationships",
            self.schema().table_relationships(input).await,
        )
    }

    #[tool(
        description = "Summarize a schema: tables, views and foreign key relationships in one report."
    )]
    async fn analyze_schema(
        &self,
        Parameters(input): Parameters<SchemaInput>,
    ) -> ToolResult<AnalyzeSchemaOutput> {
        respond("analyze_schema", self.schema().analyze_schema(input).await)
    }

    // Query engine

    #[tool(
        description = "Execute a SQL statement with optional $1, $2... parameters.\nOutput format: json (default), csv, table or markdown. `limit` appends LIMIT n.\nEvery call is recorded in the query history."
    )]
    async fn execute_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> ToolResult<ExecuteQueryOutput> {
        let handler = QueryToolHandler::new(self.ctx.clone());
        respond_envelope("execute_query", handler.execute_query(input).await)
    }

    #[tool(
        description = "Execute a list of SQL statements as one atomic transaction.\nThe first failure rolls back every statement and reports how many had completed.\nEach entry is one statement; BEGIN, COMMIT, ROLLBACK and SAVEPOINT are rejected."
    )]
    async fn execute_transaction(
        &self,
        Parameters(input): Parameters<ExecuteTransactionInput>,
    ) -> ToolResult<ExecuteTransactionOutput> {
        let handler = TransactionToolHandler::new(self.ctx.clone());
        respond_envelope(
            "execute_transaction",
            handler.execute_transaction(input).await,
        )
    }

    #[tool(
        description = "Show the execution plan for a statement.\nWith analyze=true the statement is executed (EXPLAIN ANALYZE) and runtime statistics are included."
    )]
    async fn explain_query(
        &self,
        Parameters(input): Parameters<ExplainInput>,
    ) -> ToolResult<ExplainOutput> {
        let handler = ExplainToolHandler::new(self.ctx.clone());
        respond("explain_query", handler.explain(input).await)
    }

    #[tool(description = "Get the most recent execute_query calls, newest first (default: 10).")]
    async fn get_query_history(
        &self,
        Parameters(input): Parameters<QueryHistoryInput>,
    ) -> ToolResult<QueryHistoryOutput> {
        let handler = QueryToolHandler::new(self.ctx.clone());
        respond("get_query_history", handler.query_history(input).await)
    }

    // Cluster monitoring

    #[tool(
        description = "Get cluster health: version, store capacity, and node liveness.\nWith detailed=true, per-node capacity and range counts are included."
    )]
    async fn get_cluster_status(
        &self,
        Parameters(input): Parameters<ClusterStatusInput>,
    ) -> ToolResult<ClusterStatusOutput> {
        respond("get_cluster_status", self.cluster().cluster_status(input).await)
    }

    #[tool(
        description = "Show queries running longer than min_duration (default 1:0) for a node (default 1) and user (default root)."
    )]
    async fn show_running_queries(
        &self,
        Parameters(input): Parameters<RunningQueriesInput>,
    ) -> ToolResult<RunningQueriesOutput> {
        respond(
            "show_running_queries",
            self.cluster().running_queries(input).await,
        )
    }

    #[tool(
        description = "Analyze statement latency statistics (max, min, p50, p90, p99) within a time range.\nOptionally filter by a case-insensitive substring of the statement text. Returns the 20 slowest."
    )]
    async fn analyze_performance(
        &self,
        Parameters(input): Parameters<AnalyzePerformanceInput>,
    ) -> ToolResult<AnalyzePerformanceOutput> {
        respond(
            "analyze_performance",
            self.cluster().analyze_performance(input).await,
        )
    }

    #[tool(
        description = "Get range replication and leaseholder status for a table, or for every range of the current database."
    )]
    async fn get_replication_status(
        &self,
        Parameters(input): Parameters<ReplicationStatusInput>,
    ) -> ToolResult<ReplicationStatusOutput> {
        respond(
            "get_replication_status",
            self.cluster().replication_status(input).await,
        )
    }
}

#[tool_handler]
impl ServerHandler for CrdbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "crdb-mcp-server".to_owned(),
                title: Some("CockroachDB MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Tools for administering and querying a CockroachDB cluster.\n\
                \n\
                ## Workflow\n\
                1. Call `connect` (configured target) or `connect_database` (explicit host)\n\
                2. Explore with `list_databases`, `list_tables`, `describe_table`, `analyze_schema`\n\
                3. Run statements with `execute_query` or `execute_transaction`\n\
                \n\
                ## Results\n\
                Every tool returns `success`. Failed statements return `success: false` and `error`.\n\
                A protocol error means no connection target is configured: call `connect_database`.\n\
                \n\
                ## Notes\n\
                - `switch_database` rebinds the pool; `drop_database` refuses `defaultdb`\n\
                - `explain_query` with `analyze: true` executes the statement\n\
                - `get_query_history` lists recent `execute_query` calls, newest first"
                    .to_string(),
            ),
        }
    }
}
