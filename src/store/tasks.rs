//! Task ledger persistence

use rusqlite::Connection;

use crate::model::{MountSpec, ResourceRequest, Task, TaskKind, TaskPayload, TaskStatus};

use super::{StoreError, StoreResult};

pub struct TaskStore;

impl TaskStore {
    pub fn new() -> Self {
        Self
    }

    pub fn insert(&self, conn: &Connection, task: &Task) -> StoreResult<()> {
        conn.execute(
            r#"
            INSERT INTO tasks
                (id, batch_id, kind, payload, cores, memory_bytes, gpu_ids, numa_id,
                 environment, privileged, mounts, assigned_node, unit_name,
                 stdout_path, stderr_path, exit_code, error_message, status,
                 submitted_at, started_at, completed_at, tunnel_port, assignment_suspicion)
            VALUES
                (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                 ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
            "#,
            rusqlite::params_from_iter(task_params(task)?),
        )?;
        Ok(())
    }

    /// Overwrite every column; the absorbing FSM is enforced by callers via
    /// `Task::try_transition` before this is ever invoked.
    pub fn update(&self, conn: &Connection, task: &Task) -> StoreResult<()> {
        conn.execute(
            r#"
            UPDATE tasks SET
                batch_id = ?2, kind = ?3, payload = ?4, cores = ?5, memory_bytes = ?6,
                gpu_ids = ?7, numa_id = ?8, environment = ?9, privileged = ?10, mounts = ?11,
                assigned_node = ?12, unit_name = ?13, stdout_path = ?14, stderr_path = ?15,
                exit_code = ?16, error_message = ?17, status = ?18, submitted_at = ?19,
                started_at = ?20, completed_at = ?21, tunnel_port = ?22, assignment_suspicion = ?23
            WHERE id = ?1
            "#,
            rusqlite::params_from_iter(task_params(task)?),
        )?;
        Ok(())
    }

    pub fn get(&self, conn: &Connection, id: u64) -> StoreResult<Option<Task>> {
        let mut stmt = conn.prepare(&format!("{SELECT_TASK_BASE} WHERE id = ?1"))?;
        let result = stmt.query_row([id as i64], row_to_task);
        match result {
            Ok(task) => Ok(Some(task?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::from(e)),
        }
    }

    pub fn list_by_status(&self, conn: &Connection, status: TaskStatus) -> StoreResult<Vec<Task>> {
        let mut stmt =
            conn.prepare(&format!("{SELECT_TASK_BASE} WHERE status = ?1 ORDER BY id"))?;
        collect_tasks(stmt.query_map([status.as_str()], row_to_task)?)
    }

    pub fn list_by_assigned_node(&self, conn: &Connection, hostname: &str) -> StoreResult<Vec<Task>> {
        let mut stmt =
            conn.prepare(&format!("{SELECT_TASK_BASE} WHERE assigned_node = ?1 ORDER BY id"))?;
        collect_tasks(stmt.query_map([hostname], row_to_task)?)
    }

    pub fn list_by_batch(&self, conn: &Connection, batch_id: u64) -> StoreResult<Vec<Task>> {
        let mut stmt =
            conn.prepare(&format!("{SELECT_TASK_BASE} WHERE batch_id = ?1 ORDER BY id"))?;
        collect_tasks(stmt.query_map([batch_id as i64], row_to_task)?)
    }

    pub fn list_all(&self, conn: &Connection) -> StoreResult<Vec<Task>> {
        let mut stmt = conn.prepare(&format!("{SELECT_TASK_BASE} ORDER BY id"))?;
        collect_tasks(stmt.query_map([], row_to_task)?)
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_tasks(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row) -> rusqlite::Result<rusqlite::Result<Task>>>,
) -> StoreResult<Vec<Task>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

fn json_column_error(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

fn task_params(task: &Task) -> StoreResult<Vec<Box<dyn rusqlite::ToSql>>> {
    let kind = match task.kind {
        TaskKind::Command => "command",
        TaskKind::Vps => "vps",
    };
    let payload = serde_json::to_string(&task.payload)?;
    let gpu_ids = serde_json::to_string(&task.resources.gpu_ids)?;
    let mounts = serde_json::to_string(&task.mounts)?;

    Ok(vec![
        Box::new(task.id as i64),
        Box::new(task.batch_id as i64),
        Box::new(kind.to_string()),
        Box::new(payload),
        Box::new(task.resources.cores),
        Box::new(task.resources.memory_bytes.map(|v| v as i64)),
        Box::new(gpu_ids),
        Box::new(task.resources.numa_id),
        Box::new(task.environment.clone()),
        Box::new(task.privileged as i32),
        Box::new(mounts),
        Box::new(task.assigned_node.clone()),
        Box::new(task.unit_name.clone()),
        Box::new(task.stdout_path.clone()),
        Box::new(task.stderr_path.clone()),
        Box::new(task.exit_code),
        Box::new(task.error_message.clone()),
        Box::new(task.status.as_str().to_string()),
        Box::new(task.submitted_at),
        Box::new(task.started_at),
        Box::new(task.completed_at),
        Box::new(task.tunnel_port),
        Box::new(task.assignment_suspicion),
    ])
}

const SELECT_TASK_BASE: &str = r#"
    SELECT id, batch_id, kind, payload, cores, memory_bytes, gpu_ids, numa_id,
           environment, privileged, mounts, assigned_node, unit_name,
           stdout_path, stderr_path, exit_code, error_message, status,
           submitted_at, started_at, completed_at, tunnel_port, assignment_suspicion
    FROM tasks
"#;

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<rusqlite::Result<Task>> {
    Ok((|| -> Result<Task, rusqlite::Error> {
        let kind_str: String = row.get(2)?;
        let kind = match kind_str.as_str() {
            "vps" => TaskKind::Vps,
            _ => TaskKind::Command,
        };
        let payload_json: String = row.get(3)?;
        let payload: TaskPayload =
            serde_json::from_str(&payload_json).map_err(json_column_error)?;
        let gpu_ids_json: String = row.get(6)?;
        let gpu_ids: Vec<String> =
            serde_json::from_str(&gpu_ids_json).map_err(json_column_error)?;
        let mounts_json: String = row.get(10)?;
        let mounts: Vec<MountSpec> =
            serde_json::from_str(&mounts_json).map_err(json_column_error)?;
        let status_str: String = row.get(17)?;
        let status = status_from_str(&status_str);

        Ok(Task {
            id: row.get::<_, i64>(0)? as u64,
            batch_id: row.get::<_, i64>(1)? as u64,
            kind,
            payload,
            resources: ResourceRequest {
                cores: row.get(4)?,
                memory_bytes: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                gpu_ids,
                numa_id: row.get(7)?,
            },
            environment: row.get(8)?,
            privileged: row.get::<_, i32>(9)? != 0,
            mounts,
            assigned_node: row.get(11)?,
            unit_name: row.get(12)?,
            stdout_path: row.get(13)?,
            stderr_path: row.get(14)?,
            exit_code: row.get(15)?,
            error_message: row.get(16)?,
            status,
            submitted_at: row.get(18)?,
            started_at: row.get(19)?,
            completed_at: row.get(20)?,
            tunnel_port: row.get::<_, Option<i64>>(21)?.map(|v| v as u16),
            assignment_suspicion: row.get(22)?,
        })
    })())
}

fn status_from_str(s: &str) -> TaskStatus {
    match s {
        "pending" => TaskStatus::Pending,
        "assigning" => TaskStatus::Assigning,
        "running" => TaskStatus::Running,
        "paused" => TaskStatus::Paused,
        "completed" => TaskStatus::Completed,
        "failed" => TaskStatus::Failed,
        "killed" => TaskStatus::Killed,
        "killed_oom" => TaskStatus::KilledOom,
        _ => TaskStatus::Lost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandPayload;
    use crate::store::Database;

    fn sample_task(id: u64) -> Task {
        Task {
            id,
            batch_id: 1,
            kind: TaskKind::Command,
            payload: TaskPayload::Command(CommandPayload {
                executable: "/bin/echo".to_string(),
                args: vec!["hi".to_string()],
                env: Default::default(),
            }),
            resources: ResourceRequest {
                cores: 2,
                memory_bytes: Some(1024),
                gpu_ids: vec!["0".to_string()],
                numa_id: Some(0),
            },
            environment: "default".to_string(),
            privileged: false,
            mounts: vec![MountSpec {
                host_path: "/data".to_string(),
                container_path: "/data".to_string(),
                read_only: true,
            }],
            assigned_node: Some("alpha".to_string()),
            unit_name: None,
            stdout_path: None,
            stderr_path: None,
            exit_code: None,
            error_message: None,
            status: TaskStatus::Pending,
            submitted_at: 10,
            started_at: None,
            completed_at: None,
            tunnel_port: None,
            assignment_suspicion: 0,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_nested_fields() {
        let db = Database::open_in_memory().unwrap();
        db.tasks().await.insert(&sample_task(1)).unwrap();

        let loaded = db.tasks().await.get(1).unwrap().unwrap();
        assert_eq!(loaded.resources.gpu_ids, vec!["0".to_string()]);
        assert_eq!(loaded.mounts.len(), 1);
        assert_eq!(loaded.mounts[0].host_path, "/data");
        match loaded.payload {
            TaskPayload::Command(cmd) => assert_eq!(cmd.executable, "/bin/echo"),
            _ => panic!("expected command payload"),
        }
    }

    #[tokio::test]
    async fn list_by_status_and_assigned_node() {
        let db = Database::open_in_memory().unwrap();
        db.tasks().await.insert(&sample_task(1)).unwrap();
        db.tasks().await.insert(&sample_task(2)).unwrap();

        let mut running = sample_task(3);
        running.status = TaskStatus::Running;
        db.tasks().await.insert(&running).unwrap();

        assert_eq!(db.tasks().await.list_by_status(TaskStatus::Pending).unwrap().len(), 2);
        assert_eq!(db.tasks().await.list_by_status(TaskStatus::Running).unwrap().len(), 1);
        assert_eq!(
            db.tasks().await.list_by_assigned_node("alpha").unwrap().len(),
            3
        );
    }

    #[tokio::test]
    async fn update_persists_status_transition() {
        let db = Database::open_in_memory().unwrap();
        let mut task = sample_task(1);
        db.tasks().await.insert(&task).unwrap();

        task.try_transition(TaskStatus::Running);
        db.tasks().await.update(&task).unwrap();

        let loaded = db.tasks().await.get(1).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Running);
    }
}
