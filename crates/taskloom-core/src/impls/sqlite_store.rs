//! SqliteTaskStore - 永続化された TaskStore（再起動後も残る）
//!
//! # 実装詳細
//! - rusqlite の同期 Connection を `std::sync::Mutex` で守り、
//!   各操作は `spawn_blocking` の中で実行する
//! - CAS は `UPDATE ... WHERE id = ? AND status = ?` 1 文。影響行数 0 なら
//!   現在の status を読み直して NotFound / Conflict を返す
//! - タイムスタンプは固定幅の RFC 3339（マイクロ秒, `Z`）で保存する。
//!   文字列比較がそのまま時刻順になる
//! - 同じファイルを開いた複数プロセスの間でも CAS が排他になる

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::domain::ids::{Id, IdMarker};
use crate::domain::{
    Category, CategoryId, ExecutionRecord, OutcomeKind, Result, SchedulerError, Task, TaskId,
    TaskStatus,
};
use crate::ports::TaskStore;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS categories (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        category_id TEXT,
        recurrence TEXT NOT NULL,            -- JSON: {\"kind\":\"INTERVAL\",\"every_secs\":60}
        due_at TEXT NOT NULL,
        status TEXT NOT NULL,
        prerequisites TEXT NOT NULL DEFAULT '[]',  -- JSON array of task ids
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_run_at TEXT,
        last_completed_at TEXT,
        payload TEXT NOT NULL DEFAULT 'null',
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_status_due ON tasks (status, due_at);

    -- append-only
    CREATE TABLE IF NOT EXISTS execution_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        task_id TEXT NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
        attempt INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT NOT NULL,
        outcome TEXT NOT NULL,
        detail TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_records_task ON execution_records (task_id, seq);
";

const TASK_COLUMNS: &str = "id, title, category_id, recurrence, due_at, status, prerequisites, \
     retry_count, last_run_at, last_completed_at, payload, created_at";

/// SqliteTaskStore は TaskStore の SQLite 実装
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(SqliteTaskStore::open("taskloom.db")?);
/// ```
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open or create the database file and migrate the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    /// Private in-memory database (gone when the store is dropped).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| SchedulerError::Other("sqlite connection mutex poisoned".into()))?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: Task) -> Result<TaskId> {
        self.with_conn(move |conn| {
            if task_exists(conn, task.id)? {
                return Err(SchedulerError::AlreadyExists(task.id.to_string()));
            }
            let row = TaskRow::from_task(&task)?;
            conn.execute(
                &format!(
                    "INSERT INTO tasks ({TASK_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    row.id,
                    row.title,
                    row.category,
                    row.recurrence,
                    row.due_at,
                    row.status,
                    row.prerequisites,
                    row.retry_count,
                    row.last_run_at,
                    row.last_completed_at,
                    row.payload,
                    row.created_at,
                ],
            )?;
            Ok(task.id)
        })
        .await
    }

    async fn get(&self, id: TaskId) -> Result<Task> {
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                [key(id)],
                TaskRow::read,
            )
            .optional()?
            .ok_or(SchedulerError::TaskNotFound(id))?
            .into_task()
        })
        .await
    }

    async fn update_status(&self, id: TaskId, new: TaskStatus, expected: TaskStatus) -> Result<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE tasks SET status = ?2 WHERE id = ?1 AND status = ?3",
                params![key(id), new.as_str(), expected.as_str()],
            )?;
            if changed == 0 {
                return Err(cas_miss(conn, id, expected));
            }
            Ok(())
        })
        .await
    }

    async fn replace(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let task = task.clone();
        self.with_conn(move |conn| {
            let row = TaskRow::from_task(&task)?;
            let changed = conn.execute(
                "UPDATE tasks SET title = ?2, category_id = ?3, recurrence = ?4, due_at = ?5, \
                 status = ?6, prerequisites = ?7, retry_count = ?8, last_run_at = ?9, \
                 last_completed_at = ?10, payload = ?11 \
                 WHERE id = ?1 AND status = ?12",
                params![
                    row.id,
                    row.title,
                    row.category,
                    row.recurrence,
                    row.due_at,
                    row.status,
                    row.prerequisites,
                    row.retry_count,
                    row.last_run_at,
                    row.last_completed_at,
                    row.payload,
                    expected.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(cas_miss(conn, task.id, expected));
            }
            Ok(())
        })
        .await
    }

    async fn list_due(&self, as_of: DateTime<Utc>) -> Result<Vec<Task>> {
        self.with_conn(move |conn| {
            query_tasks(
                conn,
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status = ?1 AND due_at <= ?2 ORDER BY due_at, id"
                ),
                params![TaskStatus::Pending.as_str(), ts(as_of)],
            )
        })
        .await
    }

    async fn list_non_terminal(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            query_tasks(
                conn,
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status IN (?1, ?2, ?3) ORDER BY created_at, id"
                ),
                params![
                    TaskStatus::Pending.as_str(),
                    TaskStatus::Ready.as_str(),
                    TaskStatus::Running.as_str(),
                ],
            )
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<Task>> {
        self.with_conn(|conn| {
            query_tasks(
                conn,
                &format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY created_at, id"),
                [],
            )
        })
        .await
    }

    async fn delete(&self, id: TaskId) -> Result<()> {
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM tasks WHERE id = ?1", [key(id)])?;
            if removed == 0 {
                return Err(SchedulerError::TaskNotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn append_execution_record(&self, record: ExecutionRecord) -> Result<()> {
        self.with_conn(move |conn| {
            if !task_exists(conn, record.task_id)? {
                return Err(SchedulerError::TaskNotFound(record.task_id));
            }
            conn.execute(
                "INSERT INTO execution_records \
                 (task_id, attempt, started_at, ended_at, outcome, detail) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key(record.task_id),
                    record.attempt,
                    ts(record.started_at),
                    ts(record.ended_at),
                    record.outcome.as_str(),
                    record.detail,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn history(&self, id: TaskId) -> Result<Vec<ExecutionRecord>> {
        self.with_conn(move |conn| {
            if !task_exists(conn, id)? {
                return Err(SchedulerError::TaskNotFound(id));
            }
            let mut stmt = conn.prepare(
                "SELECT attempt, started_at, ended_at, outcome, detail \
                 FROM execution_records WHERE task_id = ?1 ORDER BY seq",
            )?;
            let rows = stmt
                .query_map([key(id)], |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(attempt, started_at, ended_at, outcome, detail)| -> Result<ExecutionRecord> {
                    Ok(ExecutionRecord {
                        task_id: id,
                        attempt,
                        started_at: parse_ts(&started_at)?,
                        ended_at: parse_ts(&ended_at)?,
                        outcome: OutcomeKind::parse(&outcome).ok_or_else(|| {
                            SchedulerError::Other(format!("unknown outcome '{outcome}'"))
                        })?,
                        detail,
                    })
                })
                .collect()
        })
        .await
    }

    async fn create_category(&self, category: Category) -> Result<CategoryId> {
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO categories (id, name) VALUES (?1, ?2)",
                params![key(category.id), category.name],
            )?;
            if inserted == 0 {
                return Err(SchedulerError::AlreadyExists(category.id.to_string()));
            }
            Ok(category.id)
        })
        .await
    }

    async fn get_category(&self, id: CategoryId) -> Result<Category> {
        self.with_conn(move |conn| {
            let name = conn
                .query_row("SELECT name FROM categories WHERE id = ?1", [key(id)], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?
                .ok_or(SchedulerError::CategoryNotFound(id))?;
            Ok(Category { id, name })
        })
        .await
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM categories ORDER BY name, id")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|(id, name)| -> Result<Category> {
                    Ok(Category {
                        id: parse_id(&id)?,
                        name,
                    })
                })
                .collect()
        })
        .await
    }
}

/// One `tasks` row in its stored (text) form.
struct TaskRow {
    id: String,
    title: String,
    category: Option<String>,
    recurrence: String,
    due_at: String,
    status: String,
    prerequisites: String,
    retry_count: u32,
    last_run_at: Option<String>,
    last_completed_at: Option<String>,
    payload: String,
    created_at: String,
}

impl TaskRow {
    /// Columns in `TASK_COLUMNS` order.
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            category: row.get(2)?,
            recurrence: row.get(3)?,
            due_at: row.get(4)?,
            status: row.get(5)?,
            prerequisites: row.get(6)?,
            retry_count: row.get(7)?,
            last_run_at: row.get(8)?,
            last_completed_at: row.get(9)?,
            payload: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn from_task(task: &Task) -> Result<Self> {
        Ok(Self {
            id: key(task.id),
            title: task.title.clone(),
            category: task.category.map(key),
            recurrence: serde_json::to_string(&task.recurrence)?,
            due_at: ts(task.due_at),
            status: task.status.as_str().to_string(),
            prerequisites: serde_json::to_string(&task.prerequisites)?,
            retry_count: task.retry_count,
            last_run_at: task.last_run_at.map(ts),
            last_completed_at: task.last_completed_at.map(ts),
            payload: serde_json::to_string(&task.payload)?,
            created_at: ts(task.created_at),
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: parse_id(&self.id)?,
            title: self.title,
            category: self.category.as_deref().map(parse_id).transpose()?,
            recurrence: serde_json::from_str(&self.recurrence)?,
            due_at: parse_ts(&self.due_at)?,
            status: self.status.parse().map_err(SchedulerError::Other)?,
            prerequisites: serde_json::from_str(&self.prerequisites)?,
            retry_count: self.retry_count,
            last_run_at: self.last_run_at.as_deref().map(parse_ts).transpose()?,
            last_completed_at: self.last_completed_at.as_deref().map(parse_ts).transpose()?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn query_tasks<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, TaskRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(TaskRow::into_task).collect()
}

fn task_exists(conn: &Connection, id: TaskId) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM tasks WHERE id = ?1", [key(id)], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Explain why a conditional UPDATE touched no row.
fn cas_miss(conn: &Connection, id: TaskId, expected: TaskStatus) -> SchedulerError {
    let status = conn
        .query_row("SELECT status FROM tasks WHERE id = ?1", [key(id)], |row| {
            row.get::<_, String>(0)
        })
        .optional();
    match status {
        Ok(Some(raw)) => match raw.parse::<TaskStatus>() {
            Ok(actual) => SchedulerError::Conflict {
                task: id,
                expected,
                actual,
            },
            Err(e) => SchedulerError::Other(e),
        },
        Ok(None) => SchedulerError::TaskNotFound(id),
        Err(e) => e.into(),
    }
}

/// Ids are stored as the bare ULID.
fn key<T: IdMarker>(id: Id<T>) -> String {
    id.as_ulid().to_string()
}

fn parse_id<T: IdMarker>(raw: &str) -> Result<Id<T>> {
    Id::from_str(raw).map_err(|e| SchedulerError::Other(e.to_string()))
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Other(format!("invalid timestamp '{raw}': {e}")))
}
