use taskdeck_common::TaskStatus;

use crate::board::models::{BoardView, Task};

/// Client-side copy of a project's tasks as the user currently sees them.
///
/// Tasks are kept sorted by column, then position, then id, so a restored
/// task lands back where it was.
#[derive(Debug, Clone, Default)]
pub struct LocalBoard {
    tasks: Vec<Task>,
}

fn sort_key(task: &Task) -> (usize, i32, i64) {
    let column = TaskStatus::ALL
        .iter()
        .position(|s| *s == task.status)
        .unwrap_or(TaskStatus::ALL.len());
    (column, task.order, task.id)
}

impl LocalBoard {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut tasks: Vec<Task> = tasks.into_iter().collect();
        tasks.sort_by_key(sort_key);
        Self { tasks }
    }

    pub fn from_board(board: &BoardView) -> Self {
        Self::new(
            board
                .columns
                .iter()
                .flat_map(|c| c.tasks.iter().map(|t| t.task.clone())),
        )
    }

    /// Remove a task from view, handing back the snapshot.
    pub fn hide(&mut self, task_id: i64) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.id == task_id)?;
        Some(self.tasks.remove(idx))
    }

    /// Put a snapshot back. A task already visible under the same id is
    /// replaced rather than duplicated.
    pub fn restore(&mut self, task: Task) {
        self.tasks.retain(|t| t.id != task.id);
        let key = sort_key(&task);
        let idx = self.tasks.partition_point(|t| sort_key(t) < key);
        self.tasks.insert(idx, task);
    }

    pub fn visible(&self, task_id: i64) -> bool {
        self.tasks.iter().any(|t| t.id == task_id)
    }

    pub fn get(&self, task_id: i64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn column(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status == status).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn task(id: i64, status: TaskStatus, order: i32) -> Task {
    Task {
        id,
        project_id: "p1".into(),
        title: format!("task {}", id),
        description: None,
        status,
        priority: Default::default(),
        order,
        assignee_id: None,
        created_at: "2026-01-01T00:00:00.000Z".into(),
        updated_at: "2026-01-01T00:00:00.000Z".into(),
    }
}
