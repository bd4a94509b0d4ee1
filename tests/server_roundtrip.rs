//! End-to-end tests against a live server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use assert_cmd::cargo::cargo_bin_cmd;

use taskdeck::board::api::{AppState, SharedState};
use taskdeck::board::auth::hash_token;
use taskdeck::board::db::BoardDb;
use taskdeck::board::models::{BoardView, NewTask, Role};
use taskdeck::board::server;
use taskdeck::undo::{
    ChannelNotifier, DeleteOutcome, DeleteUndoController, HttpTaskRemote, LocalBoard,
    NotificationKind,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const OWNER: &str = "owner-token";
const EDITOR: &str = "editor-token";
const VIEWER: &str = "viewer-token";

struct TestServer {
    api: String,
    state: SharedState,
    project_id: String,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn spawn_server() -> TestServer {
    let db = BoardDb::new_in_memory().unwrap();
    let owner = db
        .create_user("Owner", "owner@example.com", &hash_token(OWNER))
        .unwrap();
    db.create_user("Editor", "editor@example.com", &hash_token(EDITOR))
        .unwrap();
    db.create_user("Viewer", "viewer@example.com", &hash_token(VIEWER))
        .unwrap();
    let project = db.create_project(&owner.id, "P1", None).unwrap();
    db.add_member_by_email(&project.id, "editor@example.com", Role::Editor)
        .unwrap();
    db.add_member_by_email(&project.id, "viewer@example.com", Role::Viewer)
        .unwrap();
    for title in ["alpha", "beta", "gamma"] {
        db.create_task(
            &project.id,
            &NewTask {
                title: title.to_string(),
                description: None,
                status: Default::default(),
                priority: Default::default(),
                assignee_id: None,
            },
        )
        .unwrap();
    }

    let state = Arc::new(AppState::new(db));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(server::serve(listener, state.clone(), false, async move {
        signal.cancelled().await
    }));

    TestServer {
        api: format!("http://{}/api", addr),
        state,
        project_id: project.id,
        shutdown,
    }
}

async fn fetch_board(server: &TestServer, token: &str) -> BoardView {
    reqwest::Client::new()
        .get(format!("{}/projects/{}/board", server.api, server.project_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn task_exists(server: &TestServer, id: i64) -> bool {
    let db = server.state.db.lock_sync().unwrap();
    db.get_task(id).unwrap().is_some()
}

async fn controller_for(
    server: &TestServer,
    token: &str,
    window: Duration,
) -> (
    DeleteUndoController,
    tokio::sync::mpsc::UnboundedReceiver<taskdeck::undo::Notification>,
    Vec<i64>,
) {
    let board = fetch_board(server, OWNER).await;
    let ids = board.columns[0].tasks.iter().map(|t| t.task.id).collect();
    let (notifier, rx) = ChannelNotifier::new();
    let controller = DeleteUndoController::new(
        LocalBoard::from_board(&board),
        Arc::new(HttpTaskRemote::new(server.api.clone(), token)),
        Arc::new(notifier),
    )
    .with_window(window);
    (controller, rx, ids)
}

#[tokio::test]
async fn test_project_permissions_over_http() {
    let server = spawn_server().await;
    let client = reqwest::Client::new();
    let url = format!("{}/projects/{}", server.api, server.project_id);

    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client.get(&url).bearer_auth(VIEWER).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let project: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(project["tasks"].as_array().unwrap().len(), 3);

    let resp = client
        .patch(&url)
        .bearer_auth(VIEWER)
        .json(&serde_json::json!({"title": "Hijacked"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .patch(&url)
        .bearer_auth(EDITOR)
        .json(&serde_json::json!({"title": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client.delete(&url).bearer_auth(OWNER).send().await.unwrap();
    assert_eq!(resp.status(), 204);

    let resp = client.get(&url).bearer_auth(OWNER).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_undo_keeps_task_on_server() {
    let server = spawn_server().await;
    let (controller, mut rx, ids) =
        controller_for(&server, EDITOR, Duration::from_millis(300)).await;
    let target = ids[1];

    assert_eq!(
        controller.request_delete(target).await.unwrap(),
        DeleteOutcome::Scheduled
    );
    assert!(!controller.is_visible(target));
    assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Info);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(controller.undo(target).await);
    assert!(controller.is_visible(target));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(task_exists(&server, target));
    assert_eq!(rx.recv().await.unwrap().title, "Task restored");
}

#[tokio::test]
async fn test_expired_window_deletes_on_server() {
    let server = spawn_server().await;
    let (controller, mut rx, ids) =
        controller_for(&server, EDITOR, Duration::from_millis(100)).await;
    let target = ids[0];

    controller.request_delete(target).await.unwrap();
    assert!(task_exists(&server, target));
    assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Info);

    let committed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(committed.kind, NotificationKind::Success);
    assert!(!task_exists(&server, target));
    assert!(!controller.undo(target).await);

    let board = fetch_board(&server, OWNER).await;
    let orders: Vec<i32> = board.columns[0].tasks.iter().map(|t| t.task.order).collect();
    assert_eq!(orders, vec![0, 1]);
}

#[tokio::test]
async fn test_rejected_delete_restores_task() {
    let server = spawn_server().await;
    let (controller, mut rx, ids) =
        controller_for(&server, VIEWER, Duration::from_millis(100)).await;
    let target = ids[2];

    controller.request_delete(target).await.unwrap();
    assert!(!controller.is_visible(target));
    rx.recv().await.unwrap();

    let failure = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.kind, NotificationKind::Error);
    assert_eq!(failure.title, "Failed to delete task");
    assert!(controller.is_visible(target));
    assert!(task_exists(&server, target));
}

/// Run `taskdeck task delete` against `server` with `stdin` as the user's
/// keyboard.
async fn run_task_delete(
    server: &TestServer,
    task_id: i64,
    window_ms: u64,
    stdin: &'static str,
) -> std::process::Output {
    let api = server.api.clone();
    tokio::task::spawn_blocking(move || {
        let dir = tempfile::TempDir::new().unwrap();
        cargo_bin_cmd!("taskdeck")
            .current_dir(dir.path())
            .env("TASKDECK_API_URL", api)
            .env("TASKDECK_UNDO_WINDOW_MS", window_ms.to_string())
            .env("TASKDECK_TOKEN", EDITOR)
            .env_remove("RUST_LOG")
            .args(["task", "delete", &task_id.to_string()])
            .write_stdin(stdin)
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_task_delete_commits_without_input() {
    let server = spawn_server().await;
    let board = fetch_board(&server, OWNER).await;
    let target = board.columns[0].tasks[0].task.id;

    let output = run_task_delete(&server, target, 100, "").await;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Press Enter"));
    assert!(stdout.contains("\"alpha\" was permanently deleted."));
    assert!(!task_exists(&server, target));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_task_delete_undone_by_enter() {
    let server = spawn_server().await;
    let board = fetch_board(&server, OWNER).await;
    let target = board.columns[0].tasks[1].task.id;

    let output = run_task_delete(&server, target, 3000, "\n").await;
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Task restored"));
    assert!(task_exists(&server, target));
}
