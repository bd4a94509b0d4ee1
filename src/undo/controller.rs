use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::notify::{Notification, NotificationAction, NotificationKind, Notifier};
use super::remote::TaskRemote;
use super::view::LocalBoard;
use crate::board::models::Task;
use crate::errors::UndoError;

pub const DEFAULT_UNDO_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Hidden locally; the remote delete fires when the window closes.
    Scheduled,
    /// A delete for this task is already counting down; nothing changed.
    AlreadyPending,
}

/// A hidden task waiting out its undo window.
struct PendingDelete {
    snapshot: Task,
    cancel: CancellationToken,
    generation: u64,
}

type PendingMap = Arc<tokio::sync::Mutex<HashMap<i64, PendingDelete>>>;

/// Optimistic task deletion with a grace period.
///
/// `request_delete` hides the task at once and arms a timer. If `undo` runs
/// before the timer fires, the task comes back and the server never hears
/// about it; otherwise the timer sends the delete. Both sides race to remove
/// the task's entry from the pending map, and only the winner acts, so each
/// delete ends in exactly one of restore or remote delete.
pub struct DeleteUndoController {
    board: Arc<Mutex<LocalBoard>>,
    remote: Arc<dyn TaskRemote>,
    notifier: Arc<dyn Notifier>,
    window: Duration,
    pending: PendingMap,
    next_generation: AtomicU64,
}

impl DeleteUndoController {
    pub fn new(
        board: LocalBoard,
        remote: Arc<dyn TaskRemote>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            board: Arc::new(Mutex::new(board)),
            remote,
            notifier,
            window: DEFAULT_UNDO_WINDOW,
            pending: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Shared handle to the view this controller edits.
    pub fn board(&self) -> Arc<Mutex<LocalBoard>> {
        Arc::clone(&self.board)
    }

    pub fn is_visible(&self, task_id: i64) -> bool {
        with_board(&self.board, |b| b.visible(task_id))
    }

    /// Task ids hidden and awaiting commit, ascending.
    pub async fn pending(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.pending.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn request_delete(&self, task_id: i64) -> Result<DeleteOutcome, UndoError> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&task_id) {
            tracing::debug!(task_id, "delete already pending");
            return Ok(DeleteOutcome::AlreadyPending);
        }

        let snapshot = with_board(&self.board, |b| b.hide(task_id))
            .ok_or(UndoError::TaskNotVisible { task_id })?;
        let title = snapshot.title.clone();
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        pending.insert(
            task_id,
            PendingDelete {
                snapshot,
                cancel: cancel.clone(),
                generation,
            },
        );
        drop(pending);

        tracing::info!(
            task_id,
            window_ms = self.window.as_millis() as u64,
            "task delete scheduled"
        );
        self.notifier.notify(
            Notification::new(NotificationKind::Info, "Task deleted")
                .with_description(format!("\"{}\" was deleted.", title))
                .with_action(NotificationAction::Undo { task_id }),
        );

        self.spawn_timer(task_id, generation, cancel);
        Ok(DeleteOutcome::Scheduled)
    }

    /// Restore a task whose delete is still pending. Returns `false` when
    /// there is nothing to undo, including after the delete was committed.
    pub async fn undo(&self, task_id: i64) -> bool {
        let Some(entry) = self.pending.lock().await.remove(&task_id) else {
            tracing::debug!(task_id, "nothing to undo");
            return false;
        };
        entry.cancel.cancel();
        with_board(&self.board, |b| b.restore(entry.snapshot));

        tracing::info!(task_id, "task delete undone");
        self.notifier.notify(
            Notification::new(NotificationKind::Success, "Task restored")
                .with_description("The task is back on the board."),
        );
        true
    }

    /// Cancel every pending delete and put the tasks back, without notifying.
    pub async fn shutdown(&self) {
        let drained: Vec<PendingDelete> = self
            .pending
            .lock()
            .await
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        if drained.is_empty() {
            return;
        }
        tracing::info!(count = drained.len(), "restoring pending deletes on shutdown");
        with_board(&self.board, |b| {
            for entry in drained {
                entry.cancel.cancel();
                b.restore(entry.snapshot);
            }
        });
    }

    fn spawn_timer(&self, task_id: i64, generation: u64, cancel: CancellationToken) {
        let pending = Arc::clone(&self.pending);
        let board = Arc::clone(&self.board);
        let remote = Arc::clone(&self.remote);
        let notifier = Arc::clone(&self.notifier);
        let deadline = tokio::time::Instant::now() + self.window;

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            let entry = {
                let mut map = pending.lock().await;
                match map.get(&task_id) {
                    Some(e) if e.generation == generation => map.remove(&task_id),
                    _ => None,
                }
            };
            // Undo got there first.
            let Some(entry) = entry else { return };

            commit(task_id, entry.snapshot, remote.as_ref(), notifier.as_ref(), &board).await;
        });
    }
}

async fn commit(
    task_id: i64,
    snapshot: Task,
    remote: &dyn TaskRemote,
    notifier: &dyn Notifier,
    board: &Mutex<LocalBoard>,
) {
    match remote.delete_task(task_id).await {
        Ok(()) => {
            tracing::info!(task_id, "task delete committed");
            notifier.notify(
                Notification::new(NotificationKind::Success, "Task deleted")
                    .with_description(format!("\"{}\" was permanently deleted.", snapshot.title)),
            );
        }
        Err(source) => {
            let err = UndoError::Remote { task_id, source };
            tracing::warn!(error = %err, "remote delete failed, restoring task");
            with_board(board, |b| b.restore(snapshot));
            notifier.notify(
                Notification::new(NotificationKind::Error, "Failed to delete task")
                    .with_description("The task has been restored."),
            );
        }
    }
}

fn with_board<R>(board: &Mutex<LocalBoard>, f: impl FnOnce(&mut LocalBoard) -> R) -> R {
    let mut guard = board.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}
