//! Task commands: `taskdeck task delete` with an undo prompt.

use anyhow::{Result, bail};
use std::sync::Arc;

use taskdeck::config::ClientSection;
use taskdeck::undo::{ChannelNotifier, LocalBoard, Notification, NotificationKind};

fn print_notice(n: &Notification) {
    match &n.description {
        Some(d) => println!("{}: {}", n.title, d),
        None => println!("{}", n.title),
    }
}

/// Delete a task through the undo controller. Enter within the window
/// undoes; end of input or silence lets the delete go through.
pub async fn cmd_task_delete(client: &ClientSection, task_id: i64, token: &str) -> Result<()> {
    let task = client.remote(token).fetch_task(task_id).await?;
    let (notifier, mut notices) = ChannelNotifier::new();
    let controller = client.controller(LocalBoard::new([task]), token, Arc::new(notifier));

    controller.request_delete(task_id).await?;
    if let Some(n) = notices.recv().await {
        print_notice(&n);
    }
    println!(
        "Press Enter within {:.1}s to undo.",
        controller.window().as_secs_f64()
    );

    // A detached thread, since a blocking stdin read cannot be cancelled.
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().read_line(&mut line)
            && n > 0
        {
            let _ = tx.send(());
        }
    });

    let pressed = tokio::select! {
        got = rx => got.is_ok(),
        _ = tokio::time::sleep(controller.window()) => false,
    };
    if pressed && !controller.undo(task_id).await {
        tracing::debug!(task_id, "undo came too late");
    }

    while let Some(n) = notices.recv().await {
        print_notice(&n);
        match n.kind {
            NotificationKind::Info => continue,
            NotificationKind::Success => return Ok(()),
            NotificationKind::Error => bail!("Task {} was not deleted", task_id),
        }
    }
    Ok(())
}
