//! Node registry persistence

use std::collections::HashMap;

use rusqlite::Connection;

use crate::model::{GpuDescriptor, Node, NodeMetrics, NodeStatus, NumaNode};

use super::{StoreError, StoreResult};

pub struct NodeStore;

impl NodeStore {
    pub fn new() -> Self {
        Self
    }

    /// Insert a node, or overwrite it in place on re-registration.
    pub fn upsert(&self, conn: &Connection, node: &Node) -> StoreResult<()> {
        conn.execute(
            r#"
            INSERT OR REPLACE INTO nodes
                (hostname, url, total_cores, total_memory_bytes, numa, gpus,
                 status, last_heartbeat, cpu_used_percent, memory_used_bytes, metrics_reported_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            rusqlite::params![
                node.hostname,
                node.url,
                node.total_cores,
                node.total_memory_bytes as i64,
                serde_json::to_string(&node.numa)?,
                serde_json::to_string(&node.gpus)?,
                node.status.as_str(),
                node.last_heartbeat,
                node.metrics.cpu_used_percent,
                node.metrics.memory_used_bytes as i64,
                node.metrics.reported_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, hostname: &str) -> StoreResult<Option<Node>> {
        let mut stmt = conn.prepare(SELECT_NODE)?;
        let result = stmt.query_row([hostname], row_to_node);
        match result {
            Ok(node) => Ok(Some(node)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub fn all(&self, conn: &Connection) -> StoreResult<Vec<Node>> {
        let mut stmt = conn.prepare(&format!("{SELECT_NODE_BASE} ORDER BY hostname"))?;
        let nodes = stmt
            .query_map([], row_to_node)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    pub fn set_status(&self, conn: &Connection, hostname: &str, status: NodeStatus) -> StoreResult<()> {
        conn.execute(
            "UPDATE nodes SET status = ?2 WHERE hostname = ?1",
            rusqlite::params![hostname, status.as_str()],
        )?;
        Ok(())
    }

    pub fn record_heartbeat(
        &self,
        conn: &Connection,
        hostname: &str,
        metrics: &NodeMetrics,
        at: i64,
    ) -> StoreResult<()> {
        conn.execute(
            r#"
            UPDATE nodes
            SET status = 'online',
                last_heartbeat = ?2,
                cpu_used_percent = ?3,
                memory_used_bytes = ?4,
                metrics_reported_at = ?5
            WHERE hostname = ?1
            "#,
            rusqlite::params![
                hostname,
                at,
                metrics.cpu_used_percent,
                metrics.memory_used_bytes as i64,
                metrics.reported_at,
            ],
        )?;
        Ok(())
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStatus {
    fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

const SELECT_NODE_BASE: &str = r#"
    SELECT hostname, url, total_cores, total_memory_bytes, numa, gpus,
           status, last_heartbeat, cpu_used_percent, memory_used_bytes, metrics_reported_at
    FROM nodes
"#;

const SELECT_NODE: &str = r#"
    SELECT hostname, url, total_cores, total_memory_bytes, numa, gpus,
           status, last_heartbeat, cpu_used_percent, memory_used_bytes, metrics_reported_at
    FROM nodes
    WHERE hostname = ?1
"#;

fn json_column_error(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<Node> {
    let numa_json: String = row.get(4)?;
    let gpus_json: String = row.get(5)?;
    let status_str: String = row.get(6)?;

    let numa: HashMap<u32, NumaNode> =
        serde_json::from_str(&numa_json).map_err(json_column_error)?;
    let gpus: Vec<GpuDescriptor> = serde_json::from_str(&gpus_json).map_err(json_column_error)?;
    let status = match status_str.as_str() {
        "online" => NodeStatus::Online,
        _ => NodeStatus::Offline,
    };

    Ok(Node {
        hostname: row.get(0)?,
        url: row.get(1)?,
        total_cores: row.get(2)?,
        total_memory_bytes: row.get::<_, i64>(3)? as u64,
        numa,
        gpus,
        status,
        last_heartbeat: row.get(7)?,
        metrics: NodeMetrics {
            cpu_used_percent: row.get(8)?,
            memory_used_bytes: row.get::<_, i64>(9)? as u64,
            reported_at: row.get(10)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn sample_node(hostname: &str) -> Node {
        Node {
            hostname: hostname.to_string(),
            url: format!("http://{hostname}:9100"),
            total_cores: 8,
            total_memory_bytes: 16 * 1024 * 1024 * 1024,
            numa: HashMap::new(),
            gpus: Vec::new(),
            status: NodeStatus::Online,
            last_heartbeat: 100,
            metrics: NodeMetrics::default(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let node = sample_node("alpha");
        db.nodes().await.upsert(&node).unwrap();

        let loaded = db.nodes().await.get("alpha").unwrap().unwrap();
        assert_eq!(loaded.hostname, "alpha");
        assert_eq!(loaded.total_cores, 8);
        assert_eq!(loaded.status, NodeStatus::Online);
    }

    #[tokio::test]
    async fn re_registration_overwrites_in_place() {
        let db = Database::open_in_memory().unwrap();
        db.nodes().await.upsert(&sample_node("alpha")).unwrap();

        let mut updated = sample_node("alpha");
        updated.total_cores = 16;
        db.nodes().await.upsert(&updated).unwrap();

        let all = db.nodes().await.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].total_cores, 16);
    }

    #[tokio::test]
    async fn heartbeat_marks_online_and_updates_metrics() {
        let db = Database::open_in_memory().unwrap();
        let mut node = sample_node("alpha");
        node.status = NodeStatus::Offline;
        db.nodes().await.upsert(&node).unwrap();

        let metrics = NodeMetrics {
            cpu_used_percent: 42.5,
            memory_used_bytes: 1024,
            reported_at: 200,
        };
        db.nodes().await.record_heartbeat("alpha", &metrics, 200).unwrap();

        let loaded = db.nodes().await.get("alpha").unwrap().unwrap();
        assert_eq!(loaded.status, NodeStatus::Online);
        assert_eq!(loaded.metrics.cpu_used_percent, 42.5);
    }
}
