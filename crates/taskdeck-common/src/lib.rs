//! Domain vocabulary shared by the taskdeck server and its clients.
//!
//! Everything here is pure: enum spellings used on the wire and in the
//! database, and the role → capability policy. No I/O.

pub mod policy;
pub mod types;

pub use policy::Capability;
pub use types::{Priority, ProjectStatus, Role, TaskStatus, UnknownVariant};
