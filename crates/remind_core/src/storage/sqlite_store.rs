//! SQLite persistence for users, tasks and the completion ledger.
//!
//! Timestamps are stored as unix seconds. Every operation that touches more
//! than one row runs inside a single transaction, so a crash leaves each row
//! either before or after the operation.

use crate::calendar::{Calendar, format_clock_time, parse_clock_time};
use crate::error::AppError;
use crate::model::{CompletionEvent, Frequency, NewTask, Task, User};
use crate::recurrence::{self, DueTask};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use time::{Date, Duration, OffsetDateTime};
use tracing::{debug, warn};

pub const SCHEMA_VERSION: u32 = 1;

const TASK_COLUMNS: &str = "t.id, t.user_id, t.title, t.frequency, t.weekdays, t.created_at, \
     t.completed, t.last_completed_at, t.reminder_time, t.points";

const USER_COLUMNS: &str = "id, external_id, points, last_notified";

pub struct Store {
    conn: Connection,
}

/// Column values exactly as stored; decoded separately so a malformed row
/// can be reported without failing the whole query.
struct TaskRow {
    id: i64,
    user_id: i64,
    title: String,
    frequency: String,
    weekdays: Option<String>,
    created_at: i64,
    completed: bool,
    last_completed_at: Option<i64>,
    reminder_time: Option<String>,
    points: i64,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            title: row.get(2)?,
            frequency: row.get(3)?,
            weekdays: row.get(4)?,
            created_at: row.get(5)?,
            completed: row.get(6)?,
            last_completed_at: row.get(7)?,
            reminder_time: row.get(8)?,
            points: row.get(9)?,
        })
    }

    fn decode(self) -> Result<Task, AppError> {
        let frequency = Frequency::from_stored(&self.frequency, self.weekdays.as_deref())
            .map_err(|err| AppError::invalid_data(format!("task {}: {}", self.id, err.message())))?;
        let reminder_time = self
            .reminder_time
            .as_deref()
            .map(parse_clock_time)
            .transpose()
            .map_err(|err| AppError::invalid_data(format!("task {}: {}", self.id, err.message())))?;

        Ok(Task {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            frequency,
            created_at: from_unix(self.created_at)?,
            completed: self.completed,
            last_completed_at: self.last_completed_at.map(from_unix).transpose()?,
            reminder_time,
            points: self.points,
        })
    }
}

fn from_unix(seconds: i64) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|_| AppError::invalid_data(format!("timestamp out of range: {seconds}")))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, i64, i64, Option<i64>)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_user((id, external_id, points, last_notified): (i64, i64, i64, Option<i64>)) -> Result<User, AppError> {
    Ok(User {
        id,
        external_id,
        points,
        last_notified: last_notified.map(from_unix).transpose()?,
    })
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|err| AppError::storage(format!("{}: {}", path.display(), err)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), AppError> {
        let version: u32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(AppError::invalid_data("schema_version mismatch"));
        }

        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id   INTEGER NOT NULL UNIQUE,
                points        INTEGER NOT NULL DEFAULT 0,
                last_notified INTEGER
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                title             TEXT NOT NULL,
                frequency         TEXT NOT NULL,
                weekdays          TEXT,
                created_at        INTEGER NOT NULL,
                completed         INTEGER NOT NULL DEFAULT 0,
                last_completed_at INTEGER,
                reminder_time     TEXT,
                points            INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS completions (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id      INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                completed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_completed ON tasks(completed);
            CREATE INDEX IF NOT EXISTS idx_completions_task_time ON completions(task_id, completed_at);
            CREATE INDEX IF NOT EXISTS idx_completions_time ON completions(completed_at);",
        )?;
        self.conn
            .pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    pub fn find_user(&self, external_id: i64) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1");
        self.conn
            .query_row(&sql, params![external_id], user_from_row)
            .optional()?
            .map(decode_user)
            .transpose()
    }

    /// Looks up a registered user; unregistered chats are `not_found`.
    pub fn require_user(&self, external_id: i64) -> Result<User, AppError> {
        self.find_user(external_id)?
            .ok_or_else(|| AppError::not_found(format!("chat {external_id} is not registered")))
    }

    /// Returns the user and whether it was created by this call.
    pub fn register_user(&self, external_id: i64) -> Result<(User, bool), AppError> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO users (external_id) VALUES (?1)",
            params![external_id],
        )?;
        let user = self.require_user(external_id)?;
        Ok((user, inserted > 0))
    }

    pub fn list_users(&self) -> Result<Vec<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], user_from_row)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(decode_user(row?)?);
        }
        Ok(users)
    }

    pub fn mark_notified(&self, user_id: i64, at: OffsetDateTime) -> Result<(), AppError> {
        self.conn.execute(
            "UPDATE users SET last_notified = ?1 WHERE id = ?2",
            params![at.unix_timestamp(), user_id],
        )?;
        Ok(())
    }

    pub fn insert_task(
        &self,
        user_id: i64,
        task: &NewTask,
        created_at: OffsetDateTime,
    ) -> Result<Task, AppError> {
        self.conn.execute(
            "INSERT INTO tasks (user_id, title, frequency, weekdays, created_at, reminder_time, points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                task.title,
                task.frequency.label(),
                task.frequency.weekdays().map(|days| days.to_string()),
                created_at.unix_timestamp(),
                task.reminder_time.map(format_clock_time),
                task.points,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.task_for_owner(user_id, id)
    }

    /// Fetches a task only if it belongs to `user_id`; anything else is
    /// reported as `not_found` so foreign ids are indistinguishable from
    /// missing ones.
    pub fn task_for_owner(&self, user_id: i64, task_id: i64) -> Result<Task, AppError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.id = ?1 AND t.user_id = ?2");
        self.conn
            .query_row(&sql, params![task_id, user_id], TaskRow::read)
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("task {task_id} not found")))?
            .decode()
    }

    pub fn tasks_for_user(&self, user_id: i64) -> Result<Vec<Task>, AppError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks t WHERE t.user_id = ?1 ORDER BY t.id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], TaskRow::read)?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row?.decode()?);
        }
        Ok(tasks)
    }

    /// Deletes the task and, through the foreign key, its ledger rows.
    pub fn delete_task(&self, user_id: i64, task_id: i64) -> Result<Task, AppError> {
        let task = self.task_for_owner(user_id, task_id)?;
        self.conn.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, user_id],
        )?;
        Ok(task)
    }

    /// The user's tasks whose rule selects `date`, each marked satisfied when
    /// its most recent ledger entry falls on that date.
    pub fn due_tasks_for(
        &self,
        user_id: i64,
        date: Date,
        calendar: &Calendar,
    ) -> Result<Vec<DueTask>, AppError> {
        let sql = format!(
            "SELECT {TASK_COLUMNS},
                    (SELECT MAX(c.completed_at) FROM completions c WHERE c.task_id = t.id)
             FROM tasks t WHERE t.user_id = ?1 ORDER BY t.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok((TaskRow::read(row)?, row.get::<_, Option<i64>>(10)?))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (raw, latest) = row?;
            candidates.push((raw.decode()?, latest.map(from_unix).transpose()?));
        }
        Ok(recurrence::select_due(candidates, date, calendar))
    }

    /// Appends a ledger entry and refreshes the task's cached completion
    /// state and the owner's points, all in one transaction.
    pub fn record_completion(
        &mut self,
        task: &Task,
        at: OffsetDateTime,
    ) -> Result<CompletionEvent, AppError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO completions (task_id, completed_at) VALUES (?1, ?2)",
            params![task.id, at.unix_timestamp()],
        )?;
        let id = tx.last_insert_rowid();
        let updated = tx.execute(
            "UPDATE tasks SET completed = 1, last_completed_at = ?1 WHERE id = ?2",
            params![at.unix_timestamp(), task.id],
        )?;
        if updated == 0 {
            return Err(AppError::not_found(format!("task {} not found", task.id)));
        }
        tx.execute(
            "UPDATE users SET points = points + ?1 WHERE id = ?2",
            params![task.points, task.user_id],
        )?;
        tx.commit()?;

        Ok(CompletionEvent {
            id,
            task_id: task.id,
            completed_at: from_unix(at.unix_timestamp())?,
        })
    }

    pub fn latest_completion(&self, task_id: i64) -> Result<Option<OffsetDateTime>, AppError> {
        let latest: Option<i64> = self
            .conn
            .query_row(
                "SELECT completed_at FROM completions WHERE task_id = ?1
                 ORDER BY completed_at DESC, id DESC LIMIT 1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        latest.map(from_unix).transpose()
    }

    pub fn is_satisfied_for_period(
        &self,
        task_id: i64,
        date: Date,
        calendar: &Calendar,
    ) -> Result<bool, AppError> {
        let latest = self.latest_completion(task_id)?;
        Ok(recurrence::is_satisfied_on(latest, date, calendar))
    }

    /// Ledger history for one task, newest first.
    pub fn task_completions(&self, task_id: i64) -> Result<Vec<CompletionEvent>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, task_id, completed_at FROM completions WHERE task_id = ?1
             ORDER BY completed_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![task_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, task_id, completed_at) = row?;
            events.push(CompletionEvent {
                id,
                task_id,
                completed_at: from_unix(completed_at)?,
            });
        }
        Ok(events)
    }

    /// Removes ledger rows older than `now - retention_days`. Task and user
    /// rows are left alone.
    pub fn prune_older_than(&self, retention_days: u32, now: OffsetDateTime) -> Result<usize, AppError> {
        let cutoff = now - Duration::days(i64::from(retention_days));
        let removed = self.conn.execute(
            "DELETE FROM completions WHERE completed_at < ?1",
            params![cutoff.unix_timestamp()],
        )?;
        Ok(removed)
    }

    /// Clears the cached flag on every recurring task whose period has
    /// elapsed by `date`. Malformed rows are logged and skipped.
    pub fn reset_due_tasks(&mut self, date: Date, calendar: &Calendar) -> Result<usize, AppError> {
        let tx = self.conn.transaction()?;
        let candidates = {
            let sql = format!(
                "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.completed = 1 AND t.frequency != ?1"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map(params![Frequency::Once.label()], TaskRow::read)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut reset = 0;
        for raw in candidates {
            let task = match raw.decode() {
                Ok(task) => task,
                Err(err) => {
                    warn!(error = %err, "skipping malformed task during reset");
                    continue;
                }
            };
            if recurrence::should_reset(&task, date, calendar) {
                tx.execute("UPDATE tasks SET completed = 0 WHERE id = ?1", params![task.id])?;
                debug!(task_id = task.id, frequency = task.frequency.label(), "reset task");
                reset += 1;
            }
        }
        tx.commit()?;

        Ok(reset)
    }

    /// Recomputes the cached `last_completed_at` and `completed` columns of
    /// every task from the ledger. A cached timestamp newer than the ledger
    /// (or one whose rows were pruned) is kept. Returns the number of rows
    /// that changed.
    pub fn rebuild_completion_cache(
        &mut self,
        date: Date,
        calendar: &Calendar,
    ) -> Result<usize, AppError> {
        let tx = self.conn.transaction()?;
        let rows = {
            let sql = format!(
                "SELECT {TASK_COLUMNS},
                        (SELECT MAX(c.completed_at) FROM completions c WHERE c.task_id = t.id)
                 FROM tasks t ORDER BY t.id"
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((TaskRow::read(row)?, row.get::<_, Option<i64>>(10)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut changed = 0;
        for (raw, latest) in rows {
            let mut task = match raw.decode() {
                Ok(task) => task,
                Err(err) => {
                    warn!(error = %err, "skipping malformed task during cache rebuild");
                    continue;
                }
            };
            let latest = match latest.map(from_unix).transpose() {
                Ok(latest) => latest,
                Err(err) => {
                    warn!(task_id = task.id, error = %err, "skipping task with bad ledger timestamp");
                    continue;
                }
            };

            let cached = (task.completed, task.last_completed_at);
            // pruning drops old ledger rows, so the cached timestamp may be the only record left
            let latest = latest.max(task.last_completed_at);
            task.last_completed_at = latest;
            task.completed = true;
            let completed = latest.is_some() && !recurrence::should_reset(&task, date, calendar);

            if cached != (completed, latest) {
                tx.execute(
                    "UPDATE tasks SET completed = ?1, last_completed_at = ?2 WHERE id = ?3",
                    params![completed, latest.map(|at| at.unix_timestamp()), task.id],
                )?;
                changed += 1;
            }
        }
        tx.commit()?;

        Ok(changed)
    }

    /// Overwrites cached completion columns directly. Only for simulating
    /// historical state in tests.
    #[cfg(test)]
    pub(crate) fn set_cached_completion(
        &self,
        task_id: i64,
        completed: bool,
        last_completed_at: Option<OffsetDateTime>,
    ) -> Result<(), AppError> {
        self.conn.execute(
            "UPDATE tasks SET completed = ?1, last_completed_at = ?2 WHERE id = ?3",
            params![completed, last_completed_at.map(|at| at.unix_timestamp()), task_id],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
