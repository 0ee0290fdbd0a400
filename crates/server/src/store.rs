//! Task persistence over SQLite.
//!
//! rusqlite is synchronous, so every operation hops to `spawn_blocking` and
//! opens a short-lived connection with WAL + busy-timeout pragmas set. The
//! store is strongly consistent per task id; list queries just read whatever
//! is committed.
//!
//! Task history doubles as the audit log: the coordinator appends one row per
//! state transition and rows are never updated, only purged by the retention
//! sweep.

use std::path::PathBuf;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use tollgate_protocol::{Decision, HookEvent, Task, TaskFilter, TaskHistoryEntry, TaskStatus};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(Uuid),

    #[error("task {0} already exists")]
    Duplicate(Uuid),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored row is corrupt: {0}")]
    Corrupt(String),

    #[error("blocking task failed: {0}")]
    Runtime(String),
}

/// Handle to the tasks database. Cheap to clone the path; connections are
/// per-operation.
pub struct TaskStore {
    db_path: PathBuf,
}

impl TaskStore {
    pub fn open(db_path: impl Into<PathBuf>) -> TaskStore {
        TaskStore {
            db_path: db_path.into(),
        }
    }

    /// Insert a new task. Fails with [`StoreError::Duplicate`] if the id is
    /// already present.
    pub async fn create(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let event_payload = serde_json::to_string(&task.event)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let response_payload = encode_payload(task.response_payload.as_ref())?;

            let result = conn.execute(
                "INSERT INTO tasks (id, event_kind, event_payload, status, created_at, updated_at, action_taken, response_payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    task.id.to_string(),
                    task.event_kind.as_wire(),
                    event_payload,
                    task.status.as_str(),
                    to_sortable(task.created_at),
                    to_sortable(task.updated_at),
                    task.action_taken.map(|a| a.as_str()),
                    response_payload,
                ],
            );

            match result {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Duplicate(task.id))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Replace the mutable fields of an existing task.
    pub async fn update(&self, task: &Task) -> Result<(), StoreError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let response_payload = encode_payload(task.response_payload.as_ref())?;
            let changed = conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2, action_taken = ?3, response_payload = ?4
                 WHERE id = ?5",
                params![
                    task.status.as_str(),
                    to_sortable(task.updated_at),
                    task.action_taken.map(|a| a.as_str()),
                    response_payload,
                    task.id.to_string(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(task.id));
            }
            Ok(())
        })
        .await
    }

    /// Current snapshot of one task.
    pub async fn get(&self, id: Uuid) -> Result<Task, StoreError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, event_kind, event_payload, status, created_at, updated_at, action_taken, response_payload
                 FROM tasks WHERE id = ?1",
                params![id.to_string()],
                task_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound(id))?
        })
        .await
    }

    /// Tasks matching `filter`, newest first.
    pub async fn list(&self, filter: TaskFilter) -> Result<Vec<Task>, StoreError> {
        self.with_conn(move |conn| {
            let mut sql = String::from(
                "SELECT id, event_kind, event_payload, status, created_at, updated_at, action_taken, response_payload
                 FROM tasks",
            );

            let status = filter.status.map(|s| s.as_str());
            let kind = filter.event_kind.map(|k| k.as_wire());
            let limit = filter
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT) as i64;
            let offset = filter.offset.unwrap_or(0) as i64;

            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
            if let Some(ref status) = status {
                clauses.push("status = ?");
                args.push(status);
            }
            if let Some(ref kind) = kind {
                clauses.push("event_kind = ?");
                args.push(kind);
            }
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }

            sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
            args.push(&limit);
            args.push(&offset);

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(args), task_from_row)?;

            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row??);
            }
            Ok(tasks)
        })
        .await
    }

    /// Pending tasks, oldest first, so the operator sees the longest-waiting
    /// decision on top.
    pub async fn pending(&self) -> Result<Vec<Task>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, event_kind, event_payload, status, created_at, updated_at, action_taken, response_payload
                 FROM tasks WHERE status = 'pending' ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map([], task_from_row)?;
            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row??);
            }
            Ok(tasks)
        })
        .await
    }

    /// Append an audit entry for `task_id`.
    pub async fn append_history(
        &self,
        task_id: Uuid,
        action: &str,
        data: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let entry = TaskHistoryEntry::new(task_id, action, data);
        self.with_conn(move |conn| {
            let data_json = serde_json::to_string(&entry.data)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            conn.execute(
                "INSERT INTO task_history (id, task_id, action, data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    entry.id.to_string(),
                    entry.task_id.to_string(),
                    entry.action,
                    data_json,
                    to_sortable(entry.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// History for one task, in insertion order.
    pub async fn history_for(&self, task_id: Uuid) -> Result<Vec<TaskHistoryEntry>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, action, data, created_at
                 FROM task_history WHERE task_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = stmt.query_map(params![task_id.to_string()], history_from_row)?;
            let mut entries = Vec::new();
            for row in rows {
                entries.push(row??);
            }
            Ok(entries)
        })
        .await
    }

    /// Retention sweep: drop history rows older than `days`. Returns how
    /// many were removed.
    pub async fn purge_history_older_than(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = to_sortable(Utc::now() - Duration::days(days));
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM task_history WHERE created_at < ?1",
                params![cutoff],
            )?;
            Ok(removed)
        })
        .await
    }

    /// Retention sweep: drop terminal tasks (and their history) older than
    /// `days`. Pending rows are never swept — they are still visible work.
    pub async fn purge_tasks_older_than(&self, days: i64) -> Result<usize, StoreError> {
        let cutoff = to_sortable(Utc::now() - Duration::days(days));
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM task_history WHERE task_id IN
                   (SELECT id FROM tasks WHERE status != 'pending' AND created_at < ?1)",
                params![cutoff.clone()],
            )?;
            let removed = conn.execute(
                "DELETE FROM tasks WHERE status != 'pending' AND created_at < ?1",
                params![cutoff],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;",
            )?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Runtime(e.to_string()))?
    }
}

/// RFC-3339 with fixed-width microseconds, so string ordering in SQLite
/// matches time ordering.
fn to_sortable(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad {field} timestamp {raw:?}: {e}")))
}

fn encode_payload(payload: Option<&Map<String, Value>>) -> Result<Option<String>, StoreError> {
    payload
        .map(|m| serde_json::to_string(m).map_err(|e| StoreError::Corrupt(e.to_string())))
        .transpose()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Task, StoreError>> {
    let id: String = row.get(0)?;
    let event_payload: String = row.get(2)?;
    let status: String = row.get(3)?;
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    let action_taken: Option<String> = row.get(6)?;
    let response_payload: Option<String> = row.get(7)?;

    Ok(decode_task(
        id,
        event_payload,
        status,
        created_at,
        updated_at,
        action_taken,
        response_payload,
    ))
}

fn decode_task(
    id: String,
    event_payload: String,
    status: String,
    created_at: String,
    updated_at: String,
    action_taken: Option<String>,
    response_payload: Option<String>,
) -> Result<Task, StoreError> {
    let id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("bad task id: {e}")))?;
    let event: HookEvent = serde_json::from_str(&event_payload)
        .map_err(|e| StoreError::Corrupt(format!("bad event payload for {id}: {e}")))?;
    let status: TaskStatus = status
        .parse()
        .map_err(|e: String| StoreError::Corrupt(e))?;
    let action_taken = action_taken
        .map(|a| a.parse::<Decision>())
        .transpose()
        .map_err(StoreError::Corrupt)?;
    let response_payload = response_payload
        .map(|p| serde_json::from_str::<Map<String, Value>>(&p))
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("bad response payload for {id}: {e}")))?;

    Ok(Task {
        id,
        event_kind: event.kind(),
        event,
        status,
        created_at: parse_timestamp("created_at", &created_at)?,
        updated_at: parse_timestamp("updated_at", &updated_at)?,
        action_taken,
        response_payload,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<Result<TaskHistoryEntry, StoreError>> {
    let id: String = row.get(0)?;
    let task_id: String = row.get(1)?;
    let action: String = row.get(2)?;
    let data: String = row.get(3)?;
    let created_at: String = row.get(4)?;

    let decode = || -> Result<TaskHistoryEntry, StoreError> {
        Ok(TaskHistoryEntry {
            id: Uuid::parse_str(&id)
                .map_err(|e| StoreError::Corrupt(format!("bad history id: {e}")))?,
            task_id: Uuid::parse_str(&task_id)
                .map_err(|e| StoreError::Corrupt(format!("bad history task id: {e}")))?,
            action,
            data: serde_json::from_str(&data)
                .map_err(|e| StoreError::Corrupt(format!("bad history data: {e}")))?,
            created_at: parse_timestamp("created_at", &created_at)?,
        })
    };
    Ok(decode())
}
