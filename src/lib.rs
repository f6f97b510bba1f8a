//! Control plane for ChangeSpec-driven development workflows.
//!
//! Project files on disk are the database: each holds a set of ChangeSpec
//! records in a human-editable text format, and every mutation is a
//! locked read-modify-write of one field block. The `ace-loop` binary
//! runs the continuous supervisor over those files — starting and
//! polling verification hooks, agent workflows, and review checks as
//! detached child processes. The TUI is a separate binary that reads the
//! same files through this library.

pub mod changespec;
pub mod comments;
pub mod config;
pub mod error;
pub mod hooks;
pub mod query;
pub mod saved_queries;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod timestamps;
pub mod vcs;
pub mod workspace;

pub use changespec::{ChangeSpec, CommentEntry, CommitEntry, HookEntry, HookStatusLine};
pub use config::Config;
pub use error::{AceError, Result};
pub use supervisor::Supervisor;
