//! CLI command implementations.
//!
//! | Module   | Commands handled    |
//! |----------|---------------------|
//! | `serve`  | `Serve`, `InitDb`   |
//! | `user`   | `User`              |
//! | `task`   | `Task`              |
//! | `config` | `Config`            |

pub mod config;
pub mod serve;
pub mod task;
pub mod user;

pub use config::cmd_config;
pub use serve::{cmd_init_db, cmd_serve};
pub use task::cmd_task_delete;
pub use user::cmd_user;
