use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use crate::errors::{BoardError, FieldError};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O
/// never ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| BoardError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup, CLI commands
    /// and tests; never from a request handler.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|_| BoardError::LockPoisoned.into())
    }
}

pub struct BoardDb {
    conn: Connection,
}

/// Current time in the RFC 3339 form stored in every timestamp column.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

const TASK_SELECT: &str = "SELECT t.id, t.project_id, t.title, t.description, t.status, t.priority, t.sort_order,
        t.assignee_id, t.created_at, t.updated_at, u.name, u.email
     FROM tasks t LEFT JOIN users u ON u.id = t.assignee_id";

const PROJECT_SELECT: &str = "SELECT p.id, p.title, p.description, p.status, p.owner_id, p.created_at, p.updated_at,
        o.name, o.email
     FROM projects p JOIN users o ON o.id = p.owner_id";

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT NOT NULL UNIQUE,
                    token_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'ACTIVE',
                    owner_id TEXT NOT NULL REFERENCES users(id),
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS project_members (
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    role TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (project_id, user_id)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL DEFAULT 'TODO',
                    priority TEXT NOT NULL DEFAULT 'LOW',
                    sort_order INTEGER NOT NULL,
                    assignee_id TEXT REFERENCES users(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_members_user ON project_members(user_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_column_order
                    ON tasks(project_id, status, sort_order);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Users ─────────────────────────────────────────────────────────

    pub fn create_user(&self, name: &str, email: &str, token_hash: &str) -> Result<UserSummary> {
        if self.find_user_by_email(email)?.is_some() {
            return Err(BoardError::Conflict(format!(
                "A user with email {} already exists",
                email
            ))
            .into());
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO users (id, name, email, token_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, name, email, token_hash, now()],
            )
            .context("Failed to insert user")?;
        Ok(UserSummary {
            id,
            name: name.to_string(),
            email: email.to_string(),
        })
    }

    fn find_user(&self, clause: &str, value: &str) -> Result<Option<UserSummary>> {
        self.conn
            .query_row(
                &format!("SELECT id, name, email FROM users WHERE {} = ?1", clause),
                params![value],
                |row| {
                    Ok(UserSummary {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("Failed to query user")
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserSummary>> {
        self.find_user("id", id)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserSummary>> {
        self.find_user("email", email)
    }

    pub fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<UserSummary>> {
        self.find_user("token_hash", token_hash)
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    /// Insert a project and its owner membership in one transaction.
    pub fn create_project(
        &self,
        owner_id: &str,
        title: &str,
        description: Option<&str>,
    ) -> Result<Project> {
        let id = uuid::Uuid::new_v4().to_string();
        let ts = now();
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO projects (id, title, description, status, owner_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'ACTIVE', ?4, ?5, ?5)",
            params![id, title, description, owner_id, ts],
        )
        .context("Failed to insert project")?;
        tx.execute(
            "INSERT INTO project_members (project_id, user_id, role, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, owner_id, Role::Owner.as_str(), ts],
        )
        .context("Failed to insert owner membership")?;
        tx.commit().context("Failed to commit project creation")?;
        self.get_project(&id)?
            .context("Project not found after insert")
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE p.id = ?1", PROJECT_SELECT),
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to query project")?;
        row.map(|r| r.into_parts().map(|(p, _)| p)).transpose()
    }

    /// Project with owner and members; `with_tasks` adds tasks ordered by
    /// position.
    pub fn get_project_detail(&self, id: &str, with_tasks: bool) -> Result<Option<ProjectDetail>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE p.id = ?1", PROJECT_SELECT),
                params![id],
                ProjectRow::from_row,
            )
            .optional()
            .context("Failed to query project")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let (project, owner) = row.into_parts()?;
        let members = self.list_members(id)?;
        let tasks = if with_tasks {
            Some(self.list_tasks(id)?)
        } else {
            None
        };
        Ok(Some(ProjectDetail {
            project,
            owner,
            members,
            tasks,
        }))
    }

    /// Projects the user belongs to, most recently created first.
    pub fn list_projects_for_user(&self, user_id: &str) -> Result<Vec<ProjectSummary>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.id, p.title, p.description, p.status, p.owner_id, p.created_at, p.updated_at,
                        o.name, o.email, m.role,
                        (SELECT COUNT(*) FROM tasks t WHERE t.project_id = p.id)
                 FROM projects p
                 JOIN project_members m ON m.project_id = p.id AND m.user_id = ?1
                 JOIN users o ON o.id = p.owner_id
                 ORDER BY p.created_at DESC, p.rowid DESC",
            )
            .context("Failed to prepare list_projects_for_user")?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let project = ProjectRow::from_row(row)?;
                let role: String = row.get(9)?;
                let task_count: i64 = row.get(10)?;
                Ok((project, role, task_count))
            })
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let (project_row, role, task_count) = row.context("Failed to read project row")?;
            let (project, owner) = project_row.into_parts()?;
            let role = Role::from_str(&role).context("Failed to parse member role")?;
            projects.push(ProjectSummary {
                project,
                owner,
                role,
                task_count,
            });
        }
        Ok(projects)
    }

    /// Apply a validated patch. Returns `None` when the project is missing.
    pub fn update_project(&self, id: &str, patch: &ProjectPatch) -> Result<Option<Project>> {
        if self.get_project(id)?.is_none() {
            return Ok(None);
        }
        if patch.is_empty() {
            return self.get_project(id);
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let ts = now();
        if let Some(t) = &patch.title {
            tx.execute(
                "UPDATE projects SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![t, ts, id],
            )
            .context("Failed to update project title")?;
        }
        if let Some(d) = &patch.description {
            tx.execute(
                "UPDATE projects SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![d, ts, id],
            )
            .context("Failed to update project description")?;
        }
        if let Some(s) = &patch.status {
            tx.execute(
                "UPDATE projects SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![s.as_str(), ts, id],
            )
            .context("Failed to update project status")?;
        }
        tx.commit().context("Failed to commit project update")?;
        self.get_project(id)
    }

    /// Delete a project; members and tasks go with it via cascade.
    pub fn delete_project(&self, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1", params![id])
            .context("Failed to delete project")?;
        Ok(count > 0)
    }

    // ── Membership ────────────────────────────────────────────────────

    pub fn member_role(&self, project_id: &str, user_id: &str) -> Result<Option<Role>> {
        let role: Option<String> = self
            .conn
            .query_row(
                "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query membership")?;
        role.map(|r| Role::from_str(&r).context("Failed to parse member role"))
            .transpose()
    }

    pub fn list_members(&self, project_id: &str) -> Result<Vec<Member>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT m.role, u.id, u.name, u.email
                 FROM project_members m JOIN users u ON u.id = m.user_id
                 WHERE m.project_id = ?1
                 ORDER BY CASE m.role WHEN 'OWNER' THEN 0 ELSE 1 END, m.created_at, m.rowid",
            )
            .context("Failed to prepare list_members")?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    UserSummary {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        email: row.get(3)?,
                    },
                ))
            })
            .context("Failed to query members")?;
        let mut members = Vec::new();
        for row in rows {
            let (role, user) = row.context("Failed to read member row")?;
            let role = Role::from_str(&role).context("Failed to parse member role")?;
            members.push(Member { role, user });
        }
        Ok(members)
    }

    /// Add an existing user (looked up by email) to a project.
    pub fn add_member_by_email(&self, project_id: &str, email: &str, role: Role) -> Result<Member> {
        if role == Role::Owner {
            return Err(BoardError::BadRequest("A project has exactly one owner".into()).into());
        }
        let user = self
            .find_user_by_email(email)?
            .ok_or(BoardError::UserNotFound)?;
        if self.member_role(project_id, &user.id)?.is_some() {
            return Err(BoardError::Conflict("User is already a member".into()).into());
        }
        self.conn
            .execute(
                "INSERT INTO project_members (project_id, user_id, role, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![project_id, user.id, role.as_str(), now()],
            )
            .context("Failed to insert membership")?;
        Ok(Member { role, user })
    }

    /// Remove a non-owner member. Returns `false` if they were not a member.
    pub fn remove_member(&self, project_id: &str, user_id: &str) -> Result<bool> {
        match self.member_role(project_id, user_id)? {
            None => Ok(false),
            Some(Role::Owner) => {
                Err(BoardError::BadRequest("Cannot remove the project owner".into()).into())
            }
            Some(_) => {
                let count = self
                    .conn
                    .execute(
                        "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                        params![project_id, user_id],
                    )
                    .context("Failed to delete membership")?;
                Ok(count > 0)
            }
        }
    }

    fn ensure_assignable(&self, project_id: &str, assignee_id: Option<&str>) -> Result<()> {
        if let Some(user_id) = assignee_id
            && self.member_role(project_id, user_id)?.is_none()
        {
            return Err(BoardError::Validation(vec![FieldError::new(
                "assigneeId",
                "Assignee must be a project member",
            )])
            .into());
        }
        Ok(())
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    /// Append a task to the end of its column.
    pub fn create_task(&self, project_id: &str, new: &NewTask) -> Result<Task> {
        self.ensure_assignable(project_id, new.assignee_id.as_deref())?;
        let max_pos: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order), -1) FROM tasks WHERE project_id = ?1 AND status = ?2",
                params![project_id, new.status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to get max position")?;
        let ts = now();
        self.conn
            .execute(
                "INSERT INTO tasks (project_id, title, description, status, priority, sort_order, assignee_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    project_id,
                    new.title,
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    max_pos + 1,
                    new.assignee_id,
                    ts
                ],
            )
            .context("Failed to insert task")?;
        let id = self.conn.last_insert_rowid();
        self.get_task(id)?.context("Task not found after insert")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        Ok(self.get_task_with_assignee(id)?.map(|t| t.task))
    }

    pub fn get_task_with_assignee(&self, id: i64) -> Result<Option<TaskWithAssignee>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE t.id = ?1", TASK_SELECT),
                params![id],
                TaskRow::from_row,
            )
            .optional()
            .context("Failed to query task")?;
        row.map(TaskRow::into_task).transpose()
    }

    /// All tasks of a project ordered ascending by position.
    pub fn list_tasks(&self, project_id: &str) -> Result<Vec<TaskWithAssignee>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{} WHERE t.project_id = ?1 ORDER BY t.sort_order, t.id",
                TASK_SELECT
            ))
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![project_id], TaskRow::from_row)
            .context("Failed to query tasks")?;
        let mut tasks = Vec::new();
        for row in rows {
            let r = row.context("Failed to read task row")?;
            tasks.push(r.into_task()?);
        }
        Ok(tasks)
    }

    pub fn update_task(&self, id: i64, patch: &TaskPatch) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(Some(task));
        }
        if let Some(assignee) = &patch.assignee_id {
            self.ensure_assignable(&task.project_id, assignee.as_deref())?;
        }

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let ts = now();
        if let Some(t) = &patch.title {
            tx.execute(
                "UPDATE tasks SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![t, ts, id],
            )
            .context("Failed to update task title")?;
        }
        if let Some(d) = &patch.description {
            tx.execute(
                "UPDATE tasks SET description = ?1, updated_at = ?2 WHERE id = ?3",
                params![d, ts, id],
            )
            .context("Failed to update task description")?;
        }
        if let Some(p) = &patch.priority {
            tx.execute(
                "UPDATE tasks SET priority = ?1, updated_at = ?2 WHERE id = ?3",
                params![p.as_str(), ts, id],
            )
            .context("Failed to update task priority")?;
        }
        if let Some(a) = &patch.assignee_id {
            tx.execute(
                "UPDATE tasks SET assignee_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![a, ts, id],
            )
            .context("Failed to update task assignee")?;
        }
        tx.commit().context("Failed to commit task update")?;
        self.get_task(id)
    }

    /// Move a task to `order` within `status` (clamped to the column end),
    /// keeping positions in both columns dense and unique.
    pub fn move_task(&self, id: i64, status: TaskStatus, order: i32) -> Result<Option<Task>> {
        let Some(task) = self.get_task(id)? else {
            return Ok(None);
        };
        let project_id = task.project_id.as_str();

        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;

        let mut source = column_ids(&tx, project_id, task.status)?;
        source.retain(|&t| t != id);
        let mut target = if status == task.status {
            source.clone()
        } else {
            column_ids(&tx, project_id, status)?
        };
        let index = usize::try_from(order.max(0)).unwrap_or(0).min(target.len());
        target.insert(index, id);

        park_column(&tx, project_id, task.status)?;
        if status != task.status {
            park_column(&tx, project_id, status)?;
            write_column(&tx, task.status, &source)?;
        }
        write_column(&tx, status, &target)?;
        tx.execute(
            "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
            params![now(), id],
        )
        .context("Failed to touch moved task")?;
        tx.commit().context("Failed to commit task move")?;

        self.get_task(id)
    }

    /// Delete a task and close the gap it leaves in its column.
    pub fn delete_task(&self, id: i64) -> Result<bool> {
        let Some(task) = self.get_task(id)? else {
            return Ok(false);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        let remaining = column_ids(&tx, &task.project_id, task.status)?;
        park_column(&tx, &task.project_id, task.status)?;
        write_column(&tx, task.status, &remaining)?;
        tx.commit().context("Failed to commit task delete")?;
        Ok(true)
    }

    // ── Board view ────────────────────────────────────────────────────

    pub fn get_board(&self, project_id: &str) -> Result<Option<BoardView>> {
        let Some(project) = self.get_project(project_id)? else {
            return Ok(None);
        };
        let all_tasks = self.list_tasks(project_id)?;

        let columns = TaskStatus::ALL
            .iter()
            .map(|status| ColumnView {
                status: *status,
                tasks: all_tasks
                    .iter()
                    .filter(|t| t.task.status == *status)
                    .cloned()
                    .collect(),
            })
            .collect();

        Ok(Some(BoardView { project, columns }))
    }
}

// ── Column ordering helpers ───────────────────────────────────────────

/// Task ids of one column in position order.
fn column_ids(conn: &Connection, project_id: &str, status: TaskStatus) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM tasks WHERE project_id = ?1 AND status = ?2 ORDER BY sort_order, id",
        )
        .context("Failed to prepare column_ids")?;
    let rows = stmt
        .query_map(params![project_id, status.as_str()], |row| row.get(0))
        .context("Failed to query column")?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.context("Failed to read task id")?);
    }
    Ok(ids)
}

/// Move every position in a column to `-id` so rewriting 0..n cannot hit
/// the unique (project, status, position) index mid-update.
fn park_column(conn: &Connection, project_id: &str, status: TaskStatus) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET sort_order = -id WHERE project_id = ?1 AND status = ?2",
        params![project_id, status.as_str()],
    )
    .context("Failed to park column positions")?;
    Ok(())
}

fn write_column(conn: &Connection, status: TaskStatus, ids: &[i64]) -> Result<()> {
    for (position, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE tasks SET status = ?1, sort_order = ?2 WHERE id = ?3",
            params![status.as_str(), position as i64, id],
        )
        .context("Failed to write task position")?;
    }
    Ok(())
}

// ── Row types ─────────────────────────────────────────────────────────

/// Intermediate row struct for projects joined with their owner.
struct ProjectRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    owner_id: String,
    created_at: String,
    updated_at: String,
    owner_name: String,
    owner_email: String,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            owner_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            owner_name: row.get(7)?,
            owner_email: row.get(8)?,
        })
    }

    fn into_parts(self) -> Result<(Project, UserSummary)> {
        let status =
            ProjectStatus::from_str(&self.status).context("Failed to parse project status")?;
        let owner = UserSummary {
            id: self.owner_id.clone(),
            name: self.owner_name,
            email: self.owner_email,
        };
        Ok((
            Project {
                id: self.id,
                title: self.title,
                description: self.description,
                status,
                owner_id: self.owner_id,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            owner,
        ))
    }
}

/// Intermediate row struct for tasks joined with their assignee.
struct TaskRow {
    id: i64,
    project_id: String,
    title: String,
    description: Option<String>,
    status: String,
    priority: String,
    sort_order: i32,
    assignee_id: Option<String>,
    created_at: String,
    updated_at: String,
    assignee_name: Option<String>,
    assignee_email: Option<String>,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            status: row.get(4)?,
            priority: row.get(5)?,
            sort_order: row.get(6)?,
            assignee_id: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            assignee_name: row.get(10)?,
            assignee_email: row.get(11)?,
        })
    }

    fn into_task(self) -> Result<TaskWithAssignee> {
        let status = TaskStatus::from_str(&self.status).context("Failed to parse task status")?;
        let priority =
            Priority::from_str(&self.priority).context("Failed to parse task priority")?;
        let assignee = match (&self.assignee_id, self.assignee_name, self.assignee_email) {
            (Some(id), Some(name), Some(email)) => Some(UserSummary {
                id: id.clone(),
                name,
                email,
            }),
            _ => None,
        };
        Ok(TaskWithAssignee {
            task: Task {
                id: self.id,
                project_id: self.project_id,
                title: self.title,
                description: self.description,
                status,
                priority,
                order: self.sort_order,
                assignee_id: self.assignee_id,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            assignee,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(db: &BoardDb, name: &str) -> Result<UserSummary> {
        db.create_user(name, &format!("{}@example.com", name), &format!("hash-{}", name))
    }

    fn task(db: &BoardDb, project_id: &str, title: &str, status: TaskStatus) -> Result<Task> {
        db.create_task(
            project_id,
            &NewTask {
                title: title.to_string(),
                description: None,
                status,
                priority: Priority::Low,
                assignee_id: None,
            },
        )
    }

    fn orders(db: &BoardDb, project_id: &str, status: TaskStatus) -> Result<Vec<(String, i32)>> {
        Ok(db
            .list_tasks(project_id)?
            .into_iter()
            .filter(|t| t.task.status == status)
            .map(|t| (t.task.title, t.task.order))
            .collect())
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let table_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('users', 'projects', 'project_members', 'tasks')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 4, "Expected 4 tables to exist");

        let index_count: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name IN ('idx_members_user', 'idx_tasks_project', 'idx_tasks_column_order')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(index_count, 3, "Expected 3 indexes to exist");
        Ok(())
    }

    #[test]
    fn test_create_user_rejects_duplicate_email() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        user(&db, "ada")?;
        let err = db
            .create_user("Other Ada", "ada@example.com", "hash-2")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BoardError>(),
            Some(BoardError::Conflict(_))
        ));
        Ok(())
    }

    #[test]
    fn test_find_user_by_token_hash() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        assert_eq!(db.find_user_by_token_hash("hash-ada")?, Some(ada));
        assert_eq!(db.find_user_by_token_hash("nope")?, None);
        Ok(())
    }

    #[test]
    fn test_create_project_makes_creator_owner() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", Some("Q3 launch"))?;

        assert_eq!(project.title, "Launch");
        assert_eq!(project.description.as_deref(), Some("Q3 launch"));
        assert_eq!(project.status, ProjectStatus::Active);
        assert_eq!(project.owner_id, ada.id);
        assert_eq!(db.member_role(&project.id, &ada.id)?, Some(Role::Owner));
        Ok(())
    }

    #[test]
    fn test_project_detail_includes_owner_members_and_ordered_tasks() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let bob = user(&db, "bob")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        db.add_member_by_email(&project.id, &bob.email, Role::Viewer)?;
        task(&db, &project.id, "first", TaskStatus::Todo)?;
        task(&db, &project.id, "second", TaskStatus::Todo)?;
        task(&db, &project.id, "doing", TaskStatus::InProgress)?;

        let detail = db.get_project_detail(&project.id, true)?.expect("project exists");
        assert_eq!(detail.owner, ada);
        assert_eq!(detail.members.len(), 2);
        assert_eq!(detail.members[0].role, Role::Owner);
        assert_eq!(detail.members[1].user, bob);

        let tasks = detail.tasks.expect("tasks requested");
        let orders: Vec<i32> = tasks.iter().map(|t| t.task.order).collect();
        assert_eq!(orders, vec![0, 0, 1]);

        let without = db.get_project_detail(&project.id, false)?.expect("project exists");
        assert!(without.tasks.is_none());
        Ok(())
    }

    #[test]
    fn test_get_missing_project_is_none() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        assert!(db.get_project("missing")?.is_none());
        assert!(db.get_project_detail("missing", true)?.is_none());
        assert!(db.update_project("missing", &ProjectPatch::default())?.is_none());
        assert!(!db.delete_project("missing")?);
        Ok(())
    }

    #[test]
    fn test_update_project_applies_only_present_fields() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", Some("desc"))?;

        let updated = db
            .update_project(
                &project.id,
                &ProjectPatch {
                    status: Some(ProjectStatus::Archived),
                    ..Default::default()
                },
            )?
            .expect("project exists");
        assert_eq!(updated.title, "Launch");
        assert_eq!(updated.description.as_deref(), Some("desc"));
        assert_eq!(updated.status, ProjectStatus::Archived);
        assert!(updated.updated_at >= project.updated_at);
        Ok(())
    }

    #[test]
    fn test_delete_project_cascades() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let bob = user(&db, "bob")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        db.add_member_by_email(&project.id, &bob.email, Role::Editor)?;
        let t = task(&db, &project.id, "t", TaskStatus::Todo)?;

        assert!(db.delete_project(&project.id)?);
        assert!(db.get_project(&project.id)?.is_none());
        assert!(db.get_task(t.id)?.is_none());
        assert!(db.member_role(&project.id, &bob.id)?.is_none());
        let member_rows: i32 = db.conn.query_row(
            "SELECT COUNT(*) FROM project_members WHERE project_id = ?1",
            params![project.id],
            |row| row.get(0),
        )?;
        assert_eq!(member_rows, 0);
        Ok(())
    }

    #[test]
    fn test_list_projects_for_user_only_returns_memberships() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let bob = user(&db, "bob")?;
        let mine = db.create_project(&ada.id, "Mine", None)?;
        db.create_project(&bob.id, "Bob's", None)?;
        task(&db, &mine.id, "t", TaskStatus::Todo)?;

        let projects = db.list_projects_for_user(&ada.id)?;
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].project.title, "Mine");
        assert_eq!(projects[0].role, Role::Owner);
        assert_eq!(projects[0].task_count, 1);
        assert_eq!(projects[0].owner.id, ada.id);
        Ok(())
    }

    #[test]
    fn test_add_member_errors() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let bob = user(&db, "bob")?;
        let project = db.create_project(&ada.id, "Launch", None)?;

        let err = db
            .add_member_by_email(&project.id, "ghost@example.com", Role::Viewer)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::UserNotFound)));

        let err = db
            .add_member_by_email(&project.id, &bob.email, Role::Owner)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::BadRequest(_))));

        db.add_member_by_email(&project.id, &bob.email, Role::Viewer)?;
        let err = db
            .add_member_by_email(&project.id, &bob.email, Role::Editor)
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Conflict(_))));
        Ok(())
    }

    #[test]
    fn test_remove_member_protects_owner() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let bob = user(&db, "bob")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        db.add_member_by_email(&project.id, &bob.email, Role::Viewer)?;

        assert!(db.remove_member(&project.id, &ada.id).is_err());
        assert!(db.remove_member(&project.id, &bob.id)?);
        assert!(!db.remove_member(&project.id, &bob.id)?);
        Ok(())
    }

    #[test]
    fn test_create_task_appends_to_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", None)?;

        let a = task(&db, &project.id, "a", TaskStatus::Todo)?;
        let b = task(&db, &project.id, "b", TaskStatus::Todo)?;
        let c = task(&db, &project.id, "c", TaskStatus::Done)?;
        assert_eq!((a.order, b.order, c.order), (0, 1, 0));
        assert_eq!(a.priority, Priority::Low);
        assert_eq!(a.status, TaskStatus::Todo);
        Ok(())
    }

    #[test]
    fn test_create_task_rejects_non_member_assignee() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let outsider = user(&db, "eve")?;
        let project = db.create_project(&ada.id, "Launch", None)?;

        let err = db
            .create_task(
                &project.id,
                &NewTask {
                    title: "t".into(),
                    description: None,
                    status: TaskStatus::Todo,
                    priority: Priority::High,
                    assignee_id: Some(outsider.id.clone()),
                },
            )
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<BoardError>(), Some(BoardError::Validation(_))));

        let assigned = db.create_task(
            &project.id,
            &NewTask {
                title: "mine".into(),
                description: None,
                status: TaskStatus::Todo,
                priority: Priority::High,
                assignee_id: Some(ada.id.clone()),
            },
        )?;
        let with = db.get_task_with_assignee(assigned.id)?.expect("task exists");
        assert_eq!(with.assignee, Some(ada));
        Ok(())
    }

    #[test]
    fn test_update_task_clears_assignee() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        let t = task(&db, &project.id, "t", TaskStatus::Todo)?;

        let assigned = db
            .update_task(
                t.id,
                &TaskPatch {
                    title: Some("renamed".into()),
                    assignee_id: Some(Some(ada.id.clone())),
                    ..Default::default()
                },
            )?
            .expect("task exists");
        assert_eq!(assigned.title, "renamed");
        assert_eq!(assigned.assignee_id.as_deref(), Some(ada.id.as_str()));

        let cleared = db
            .update_task(
                t.id,
                &TaskPatch {
                    assignee_id: Some(None),
                    ..Default::default()
                },
            )?
            .expect("task exists");
        assert!(cleared.assignee_id.is_none());
        assert!(db.update_task(999, &TaskPatch::default())?.is_none());
        Ok(())
    }

    #[test]
    fn test_move_task_within_column() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        task(&db, &project.id, "a", TaskStatus::Todo)?;
        task(&db, &project.id, "b", TaskStatus::Todo)?;
        let c = task(&db, &project.id, "c", TaskStatus::Todo)?;

        let moved = db.move_task(c.id, TaskStatus::Todo, 0)?.expect("task exists");
        assert_eq!(moved.order, 0);
        assert_eq!(
            orders(&db, &project.id, TaskStatus::Todo)?,
            vec![("c".into(), 0), ("a".into(), 1), ("b".into(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_move_task_across_columns_keeps_both_dense() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        let a = task(&db, &project.id, "a", TaskStatus::Todo)?;
        task(&db, &project.id, "b", TaskStatus::Todo)?;
        task(&db, &project.id, "x", TaskStatus::Done)?;
        task(&db, &project.id, "y", TaskStatus::Done)?;

        let moved = db.move_task(a.id, TaskStatus::Done, 1)?.expect("task exists");
        assert_eq!(moved.status, TaskStatus::Done);
        assert_eq!(moved.order, 1);
        assert_eq!(orders(&db, &project.id, TaskStatus::Todo)?, vec![("b".into(), 0)]);
        assert_eq!(
            orders(&db, &project.id, TaskStatus::Done)?,
            vec![("x".into(), 0), ("a".into(), 1), ("y".into(), 2)]
        );
        Ok(())
    }

    #[test]
    fn test_move_task_clamps_order_to_column_end() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        let a = task(&db, &project.id, "a", TaskStatus::Todo)?;
        task(&db, &project.id, "x", TaskStatus::InProgress)?;

        let moved = db
            .move_task(a.id, TaskStatus::InProgress, 42)?
            .expect("task exists");
        assert_eq!(moved.order, 1);
        assert!(db.move_task(999, TaskStatus::Done, 0)?.is_none());
        Ok(())
    }

    #[test]
    fn test_delete_task_closes_gap() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Launch", None)?;
        task(&db, &project.id, "a", TaskStatus::Todo)?;
        let b = task(&db, &project.id, "b", TaskStatus::Todo)?;
        task(&db, &project.id, "c", TaskStatus::Todo)?;

        assert!(db.delete_task(b.id)?);
        assert!(!db.delete_task(b.id)?);
        assert_eq!(
            orders(&db, &project.id, TaskStatus::Todo)?,
            vec![("a".into(), 0), ("c".into(), 1)]
        );
        // Appending after a delete must not collide with the unique index.
        let d = task(&db, &project.id, "d", TaskStatus::Todo)?;
        assert_eq!(d.order, 2);
        Ok(())
    }

    #[test]
    fn test_get_board_view() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let ada = user(&db, "ada")?;
        let project = db.create_project(&ada.id, "Board", None)?;
        task(&db, &project.id, "todo", TaskStatus::Todo)?;
        task(&db, &project.id, "done", TaskStatus::Done)?;

        let board = db.get_board(&project.id)?.expect("project exists");
        assert_eq!(board.project.title, "Board");
        assert_eq!(board.columns.len(), 3);
        assert_eq!(board.columns[0].status, TaskStatus::Todo);
        assert_eq!(board.columns[0].tasks.len(), 1);
        assert!(board.columns[1].tasks.is_empty());
        assert_eq!(board.columns[2].tasks[0].task.title, "done");
        assert!(db.get_board("missing")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_db_handle_call_runs_closure() -> Result<()> {
        let handle = DbHandle::new(BoardDb::new_in_memory()?);
        let created = handle
            .call(|db| db.create_user("Ada", "ada@example.com", "h"))
            .await?;
        let found = handle
            .call(move |db| db.get_user(&created.id))
            .await?;
        assert_eq!(found.map(|u| u.name), Some("Ada".to_string()));
        Ok(())
    }
}
