//! libSQL backend — async `TaskStore` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::dispatch::task::{
    TaskDetails, TaskLogEntry, TaskPriority, TaskRecord, TaskStatus, TaskType,
};
use crate::error::StoreError;
use crate::pool::WorkerId;
use crate::store::migrations;
use crate::store::traits::{TaskStore, TransitionFields};

/// Columns read back for a task record, in fixed order.
const TASK_COLUMNS: &str = "task_id, task_type, priority, status, project_path, details, assigned_worker_id, completion_ms, created_at, updated_at";

/// libSQL task store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlTaskStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlTaskStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        info!(path = %path.display(), "Task database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests and development).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn load_logs(&self, task_id: Uuid) -> Result<Vec<TaskLogEntry>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT timestamp, message FROM task_logs WHERE task_id = ?1 ORDER BY id",
                params![task_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load_logs: {e}")))?;

        let mut logs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_logs: {e}")))?
        {
            let timestamp: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("load_logs row parse: {e}")))?;
            let message: String = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("load_logs row parse: {e}")))?;
            logs.push(TaskLogEntry {
                timestamp: parse_datetime(&timestamp),
                message,
            });
        }
        Ok(logs)
    }
}

#[async_trait]
impl TaskStore for LibSqlTaskStore {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let details = serde_json::to_string(&task.details)
            .map_err(|e| StoreError::Serialization(format!("insert_task details: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO tasks (task_id, task_type, priority, status, project_path, details, assigned_worker_id, completion_ms, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.task_id.to_string(),
                    task.task_type.to_string(),
                    task.priority.to_string(),
                    task.status.to_string(),
                    task.project_path.clone(),
                    details,
                    opt_text(task.assigned_worker_id.as_ref().map(|id| id.to_string())),
                    opt_int(task.completion_ms),
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_task: {e}")))?;

        debug!(task_id = %task.task_id, task_type = %task.task_type, "Task inserted into DB");
        Ok(())
    }

    async fn record_transition(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        fields: TransitionFields,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2, \
                 assigned_worker_id = COALESCE(?3, assigned_worker_id), \
                 completion_ms = COALESCE(?4, completion_ms) \
                 WHERE task_id = ?5",
                params![
                    status.to_string(),
                    now.to_rfc3339(),
                    opt_text(fields.assigned_worker_id.as_ref().map(|id| id.to_string())),
                    opt_int(fields.completion_ms),
                    task_id.to_string(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("record_transition: {e}")))?;

        if changed == 0 {
            return Err(StoreError::TaskNotFound { id: task_id });
        }

        if let Some(message) = fields.log {
            self.conn()
                .execute(
                    "INSERT INTO task_logs (task_id, timestamp, message) VALUES (?1, ?2, ?3)",
                    params![task_id.to_string(), now.to_rfc3339(), message],
                )
                .await
                .map_err(|e| StoreError::Query(format!("record_transition log: {e}")))?;
        }

        debug!(task_id = %task_id, status = %status, "Task transition recorded");
        Ok(())
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1"),
                params![task_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_task: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(StoreError::Query(format!("get_task: {e}"))),
        };

        let mut task = row_to_task(&row)
            .map_err(|e| StoreError::Query(format!("get_task row parse: {e}")))?;
        task.logs = self.load_logs(task_id).await?;
        Ok(Some(task))
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn opt_text(o: Option<String>) -> libsql::Value {
    match o {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_int(o: Option<u64>) -> libsql::Value {
    match o {
        Some(n) => libsql::Value::Integer(n as i64),
        None => libsql::Value::Null,
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn str_to_task_type(s: &str) -> TaskType {
    match s {
        "FEATURE_GENERATE" => TaskType::FeatureGenerate,
        "HEALTH_CHECK" => TaskType::HealthCheck,
        "SECURITY_SCAN" => TaskType::SecurityScan,
        "DEPENDENCY_RESOLVE" => TaskType::DependencyResolve,
        "SYSTEM_UPDATE" => TaskType::SystemUpdate,
        _ => TaskType::CodeFix,
    }
}

fn str_to_priority(s: &str) -> TaskPriority {
    match s {
        "CRITICAL" => TaskPriority::Critical,
        "HIGH" => TaskPriority::High,
        "LOW" => TaskPriority::Low,
        _ => TaskPriority::Medium,
    }
}

fn str_to_status(s: &str) -> TaskStatus {
    match s {
        "IN_PROGRESS" => TaskStatus::InProgress,
        "COMPLETED" => TaskStatus::Completed,
        "FAILED" => TaskStatus::Failed,
        _ => TaskStatus::Queued,
    }
}

/// Map a libsql Row to a TaskRecord (logs are loaded separately).
///
/// Column order matches TASK_COLUMNS:
/// 0:task_id, 1:task_type, 2:priority, 3:status, 4:project_path, 5:details,
/// 6:assigned_worker_id, 7:completion_ms, 8:created_at, 9:updated_at
fn row_to_task(row: &libsql::Row) -> Result<TaskRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let type_str: String = row.get(1)?;
    let priority_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let project_path: String = row.get(4)?;
    let details_str: String = row.get(5)?;
    let worker_str: Option<String> = row.get::<String>(6).ok();
    let completion_ms: Option<i64> = row.get::<i64>(7).ok();
    let created_str: String = row.get(8)?;
    let updated_str: String = row.get(9)?;

    let details: TaskDetails = serde_json::from_str(&details_str).unwrap_or_default();

    Ok(TaskRecord {
        task_id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        task_type: str_to_task_type(&type_str),
        priority: str_to_priority(&priority_str),
        status: str_to_status(&status_str),
        project_path,
        details,
        assigned_worker_id: worker_str.map(WorkerId::from),
        completion_ms: completion_ms.map(|n| n as u64),
        logs: Vec::new(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}
