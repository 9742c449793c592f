//! Cluster monitoring tools.
//!
//! Node health, running queries, statement latency statistics and range replication,
//! read from `crdb_internal` and `SHOW` statements.

use crate::context::AppContext;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, Row};
use crate::tools::sql_validator::{quote_ident, validate_identifier};
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

const CAPACITY_SQL: &str = "SELECT sum(capacity) AS cluster_capacity, sum(available) AS available_capacity, \
     sum(used) AS used_capacity, sum(range_count) AS total_ranges \
     FROM crdb_internal.kv_store_status";

const NODES_SQL: &str = "SELECT node_id, address, is_live FROM crdb_internal.gossip_nodes";

const NODES_DETAILED_SQL: &str = "SELECT g.*, capacity, s.available, s.used, s.logical_bytes, s.range_count \
     FROM crdb_internal.gossip_nodes g \
     LEFT JOIN crdb_internal.kv_store_status s ON g.node_id = s.node_id";

const STATEMENT_STATS_SQL: &str = "SELECT aggregated_ts, query, full_scan, follower_read, execution_count, \
     max_latency, min_latency, p50_latency, p90_latency, p99_latency, avg_rows_read, avg_rows_written \
     FROM (SELECT aggregated_ts, \
         json_extract_path_text(metadata, 'query') AS query, \
         CAST(json_extract_path_text(metadata, 'fullScan') AS BOOL) AS full_scan, \
         CAST(json_extract_path_text(statistics, 'statistics', 'cnt') AS INT) AS execution_count, \
         CAST(json_extract_path_text(statistics, 'statistics', 'usedFollowerRead') AS BOOL) AS follower_read, \
         CAST(json_extract_path_text(statistics, 'statistics', 'latencyInfo', 'max') AS FLOAT) AS max_latency, \
         CAST(json_extract_path_text(statistics, 'statistics', 'latencyInfo', 'min') AS FLOAT) AS min_latency, \
         CAST(json_extract_path_text(statistics, 'statistics', 'latencyInfo', 'p50') AS FLOAT) AS p50_latency, \
         CAST(json_extract_path_text(statistics, 'statistics', 'latencyInfo', 'p90') AS FLOAT) AS p90_latency, \
         CAST(json_extract_path_text(statistics, 'statistics', 'latencyInfo', 'p99') AS FLOAT) AS p99_latency, \
         CAST(json_extract_path_text(statistics, 'statistics', 'rowsRead', 'mean') AS FLOAT) AS avg_rows_read, \
         CAST(json_extract_path_text(statistics, 'statistics', 'rowsWritten', 'mean') AS FLOAT) AS avg_rows_written \
       FROM crdb_internal.statement_statistics)";

fn default_node_id() -> i64 {
    1
}

fn default_user() -> String {
    "root".to_string()
}

fn default_duration() -> String {
    "1:0".to_string()
}

/// Format bytes with binary units, e.g. `1 MB` for 1048576.
pub fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::WINDOWS)
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ClusterStatusInput {
    /// Include per-node store capacity and range counts
    #[serde(default)]
    pub detailed: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub available_nodes: usize,
    pub node_addresses: Vec<String>,
    /// Human-readable store capacity totals
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<CapacitySummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CapacitySummary {
    pub total: String,
    pub available: String,
    pub used: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ClusterStatus {
    /// Version setting row followed by the store capacity aggregate row
    pub cluster_settings: Vec<Row>,
    pub nodes: Vec<Row>,
    pub node_count: usize,
    pub healthy_nodes: usize,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ClusterSummary>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ClusterStatusOutput {
    pub cluster_status: ClusterStatus,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RunningQueriesInput {
    /// Node to inspect (default: 1; 0 for all nodes)
    #[serde(default = "default_node_id")]
    pub node_id: i64,
    /// Only queries run by this user (default: "root"; empty for all users)
    #[serde(default = "default_user")]
    pub user: String,
    /// Minimum running time as an INTERVAL string (default: "1:0")
    #[serde(default = "default_duration")]
    pub min_duration: String,
}

impl Default for RunningQueriesInput {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            user: default_user(),
            min_duration: default_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RunningQueriesOutput {
    pub queries: Vec<Row>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnalyzePerformanceInput {
    /// Case-insensitive substring of the statement text (default: all statements)
    #[serde(default)]
    pub query: Option<String>,
    /// Look-back window as an INTERVAL string (default: "1:0")
    #[serde(default = "default_duration")]
    pub time_range: String,
}

impl Default for AnalyzePerformanceInput {
    fn default() -> Self {
        Self {
            query: None,
            time_range: default_duration(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AnalyzePerformanceOutput {
    pub performance_data: Vec<Row>,
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct ReplicationStatusInput {
    /// Table to inspect (default: every range of the current database)
    #[serde(default)]
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReplicationStatusOutput {
    pub replication_status: Vec<Row>,
}

/// `crdb_internal.cluster_queries` filtered by the non-empty inputs.
pub fn running_queries_query(input: &RunningQueriesInput) -> (String, Vec<QueryParam>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if input.node_id != 0 {
        params.push(QueryParam::Int(input.node_id));
        conditions.push(format!("node_id = ${}", params.len()));
    }
    let user = input.user.trim();
    if !user.is_empty() {
        params.push(QueryParam::String(user.to_string()));
        conditions.push(format!("user_name = ${}", params.len()));
    }
    let min_duration = input.min_duration.trim();
    if !min_duration.is_empty() {
        params.push(QueryParam::String(min_duration.to_string()));
        conditions.push(format!("(now() - start) > ${}::INTERVAL", params.len()));
    }

    let mut sql = "SELECT * FROM crdb_internal.cluster_queries".to_string();
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    (sql, params)
}

/// Statement statistics inside the look-back window, slowest first.
pub fn performance_query(input: &AnalyzePerformanceInput) -> (String, Vec<QueryParam>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(filter) = input.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        params.push(QueryParam::String(filter.to_string()));
        conditions.push(format!("LOWER(query) LIKE LOWER('%' || ${} || '%')", params.len()));
    }
    params.push(QueryParam::String(input.time_range.trim().to_string()));
    conditions.push(format!("aggregated_ts >= now() - ${}::INTERVAL", params.len()));

    let sql = format!(
        "{} WHERE {} ORDER BY max_latency DESC LIMIT 20",
        STATEMENT_STATS_SQL,
        conditions.join(" AND ")
    );
    (sql, params)
}

pub fn replication_sql(table: Option<&str>, database: &str) -> String {
    let source = match table {
        Some(t) => format!("[SHOW RANGES FROM TABLE {}]", quote_ident(t)),
        None => format!("[SHOW RANGES FROM DATABASE {}]", quote_ident(database)),
    };
    format!(
        "SELECT r.range_id, r.replicas, r.voting_replicas, r.replica_localities, r.lease_holder, r.range_size \
         FROM {} s LEFT JOIN crdb_internal.ranges r ON r.range_id = s.range_id",
        source
    )
}

fn is_live(node: &Row) -> bool {
    matches!(node.get("is_live"), Some(JsonValue::Bool(true)))
}

fn as_bytes(value: Option<&JsonValue>) -> Option<u64> {
    match value? {
        JsonValue::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        JsonValue::String(s) => s.parse::<f64>().ok().map(|f| f.max(0.0) as u64),
        _ => None,
    }
}

fn capacity_summary(aggregate: Option<&Row>) -> Option<CapacitySummary> {
    let row = aggregate?;
    Some(CapacitySummary {
        total: format_size(as_bytes(row.get("cluster_capacity"))?),
        available: format_size(as_bytes(row.get("available_capacity"))?),
        used: format_size(as_bytes(row.get("used_capacity"))?),
    })
}

/// Assemble the status report from the settings rows and the node list.
pub fn summarize_cluster(cluster_settings: Vec<Row>, nodes: Vec<Row>) -> ClusterStatus {
    let healthy_nodes = nodes.iter().filter(|n| is_live(n)).count();
    let summary = (!nodes.is_empty()).then(|| ClusterSummary {
        total_nodes: nodes.len(),
        available_nodes: healthy_nodes,
        node_addresses: nodes
            .iter()
            .map(|n| match n.get("address") {
                Some(JsonValue::String(s)) => s.clone(),
                _ => "unknown".to_string(),
            })
            .collect(),
        capacity: capacity_summary(
            cluster_settings
                .iter()
                .find(|r| r.contains_key("cluster_capacity")),
        ),
    });

    ClusterStatus {
        node_count: nodes.len(),
        healthy_nodes,
        cluster_settings,
        nodes,
        timestamp: Utc::now().to_rfc3339(),
        summary,
    }
}

/// Handler for cluster monitoring tools.
#[derive(Debug, Clone)]
pub struct ClusterToolHandler {
    ctx: AppContext,
}

impl ClusterToolHandler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub async fn cluster_status(&self, input: ClusterStatusInput) -> DbResult<ClusterStatusOutput> {
        let pool = self.ctx.pool().await?;
        let executor = &self.ctx.executor;

        let mut settings = executor
            .fetch(&pool, "SHOW CLUSTER SETTING version", &[])
            .await?
            .into_rows();
        settings.extend(executor.fetch(&pool, CAPACITY_SQL, &[]).await?.into_rows());

        let nodes_sql = if input.detailed { NODES_DETAILED_SQL } else { NODES_SQL };
        let nodes = executor.fetch(&pool, nodes_sql, &[]).await?.into_rows();
        debug!(nodes = nodes.len(), detailed = input.detailed, "Fetched cluster status");

        Ok(ClusterStatusOutput {
            cluster_status: summarize_cluster(settings, nodes),
        })
    }

    pub async fn running_queries(&self, input: RunningQueriesInput) -> DbResult<RunningQueriesOutput> {
        let (sql, params) = running_queries_query(&input);
        let result = self.ctx.fetch(&sql, &params).await?;
        Ok(RunningQueriesOutput {
            queries: result.into_rows(),
        })
    }

    pub async fn analyze_performance(
        &self,
        input: AnalyzePerformanceInput,
    ) -> DbResult<AnalyzePerformanceOutput> {
        let (sql, params) = performance_query(&input);
        let result = self.ctx.fetch(&sql, &params).await?;
        Ok(AnalyzePerformanceOutput {
            performance_data: result.into_rows(),
        })
    }

    pub async fn replication_status(
        &self,
        input: ReplicationStatusInput,
    ) -> DbResult<ReplicationStatusOutput> {
        let table = match input.table_name.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => Some(validate_identifier("Table", t)?),
            _ => None,
        };
        let pool = self.ctx.pool().await?;
        let database = self
            .ctx
            .pools
            .current_database()
            .await
            .ok_or_else(|| DbError::internal("no database is bound to the live pool"))?;

        let sql = replication_sql(table, &database);
        let result = self.ctx.executor.fetch(&pool, &sql, &[]).await?;
        Ok(ReplicationStatusOutput {
            replication_status: result.into_rows(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1 kB");
        assert_eq!(format_size(1048576), "1 MB");
    }

    #[test]
    fn test_running_queries_default_filters() {
        let (sql, params) = running_queries_query(&RunningQueriesInput::default());
        assert_eq!(
            sql,
            "SELECT * FROM crdb_internal.cluster_queries WHERE node_id = $1 AND user_name = $2 AND (now() - start) > $3::INTERVAL"
        );
        assert_eq!(
            params,
            vec![
                QueryParam::Int(1),
                QueryParam::String("root".to_string()),
                QueryParam::String("1:0".to_string()),
            ]
        );
    }

    #[test]
    fn test_running_queries_user_is_bound_not_spliced() {
        let input = RunningQueriesInput {
            node_id: 0,
            user: "x' OR '1'='1".to_string(),
            min_duration: String::new(),
        };
        let (sql, params) = running_queries_query(&input);
        assert_eq!(sql, "SELECT * FROM crdb_internal.cluster_queries WHERE user_name = $1");
        assert!(!sql.contains("OR"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_running_queries_no_filters() {
        let input = RunningQueriesInput {
            node_id: 0,
            user: String::new(),
            min_duration: " ".to_string(),
        };
        let (sql, params) = running_queries_query(&input);
        assert_eq!(sql, "SELECT * FROM crdb_internal.cluster_queries");
        assert!(params.is_empty());
    }

    #[test]
    fn test_performance_query_with_filter() {
        let input = AnalyzePerformanceInput {
            query: Some("users".to_string()),
            time_range: "1:0".to_string(),
        };
        let (sql, params) = performance_query(&input);
        assert!(sql.contains(
            "WHERE LOWER(query) LIKE LOWER('%' || $1 || '%') AND aggregated_ts >= now() - $2::INTERVAL"
        ));
        assert!(sql.ends_with("ORDER BY max_latency DESC LIMIT 20"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_performance_query_without_filter() {
        let (sql, params) = performance_query(&AnalyzePerformanceInput::default());
        assert!(sql.contains("WHERE aggregated_ts >= now() - $1::INTERVAL ORDER BY"));
        assert_eq!(params, vec![QueryParam::String("1:0".to_string())]);
    }

    #[test]
    fn test_replication_sql() {
        let sql = replication_sql(Some("orders"), "bank");
        assert!(sql.contains(r#"FROM [SHOW RANGES FROM TABLE "orders"] s"#));
        let sql = replication_sql(None, "bank");
        assert!(sql.contains(r#"FROM [SHOW RANGES FROM DATABASE "bank"] s"#));
        assert!(sql.ends_with("ON r.range_id = s.range_id"));
    }

    #[test]
    fn test_summarize_cluster() {
        let settings = vec![
            row(json!({"version": "24.1"})),
            row(json!({
                "cluster_capacity": "3221225472",
                "available_capacity": 2147483648u64,
                "used_capacity": "1073741824",
                "total_ranges": 64
            })),
        ];
        let nodes = vec![
            row(json!({"node_id": 1, "address": "n1:26257", "is_live": true})),
            row(json!({"node_id": 2, "address": "n2:26257", "is_live": false})),
            row(json!({"node_id": 3, "address": null, "is_live": true})),
        ];
        let status = summarize_cluster(settings, nodes);
        assert_eq!(status.node_count, 3);
        assert_eq!(status.healthy_nodes, 2);
        let summary = status.summary.unwrap();
        assert_eq!(summary.available_nodes, 2);
        assert_eq!(summary.node_addresses, vec!["n1:26257", "n2:26257", "unknown"]);
        assert_eq!(
            summary.capacity,
            Some(CapacitySummary {
                total: "3 GB".to_string(),
                available: "2 GB".to_string(),
                used: "1 GB".to_string(),
            })
        );
    }

    #[test]
    fn test_summarize_cluster_without_nodes() {
        let status = summarize_cluster(vec![], vec![]);
        assert_eq!(status.node_count, 0);
        assert!(status.summary.is_none());
        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("summary").is_none());
    }
}
