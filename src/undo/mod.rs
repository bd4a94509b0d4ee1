//! Client-side optimistic delete with an undo window.
//!
//! A deleted task disappears from the [`LocalBoard`] immediately; the
//! server only learns about it once the window passes without an undo.

pub mod controller;
pub mod notify;
pub mod remote;
pub mod view;

pub use controller::{DEFAULT_UNDO_WINDOW, DeleteOutcome, DeleteUndoController};
pub use notify::{
    ChannelNotifier, Notification, NotificationAction, NotificationKind, Notifier,
};
pub use remote::{HttpTaskRemote, TaskRemote};
pub use view::LocalBoard;
