//! Error types shared across the supervisor.
//!
//! Every failure the supervisor can survive maps onto one of these
//! categories; the loop consumes `Result` at each external boundary and
//! never unwinds across a cycle. User-visible failures are encoded as
//! suffixes on the affected record, not as supervisor-level errors.

use std::path::PathBuf;

#[derive(Debug)]
pub enum AceError {
    /// A field block could not be parsed; the record is dropped from the
    /// in-memory set but the file is never touched.
    Parse(String),
    /// I/O failure on a project file or output file. The operation aborts
    /// and the next cycle retries.
    Io { path: PathBuf, source: std::io::Error },
    /// An external subcommand was not found on PATH. The hook/workflow is
    /// treated as "not started this cycle".
    MissingCommand(String),
    /// An external subcommand ran but failed.
    CommandFailed { command: String, detail: String },
    /// A signal could not be delivered because the target pid is owned by
    /// another user. The process is assumed dead and state is cleaned.
    PermissionDenied(String),
    /// The record a write targeted no longer exists in the current file
    /// state; the specific update is dropped.
    ConcurrentModification { name: String },
    /// A claimed workspace number has no backing directory on disk.
    WorkspaceMissing { path: PathBuf },
    /// The advisory lock on a project file could not be acquired.
    Lock(String),
}

impl std::fmt::Display for AceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AceError::Parse(msg) => write!(f, "parse error: {msg}"),
            AceError::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
            AceError::MissingCommand(cmd) => write!(f, "command not found: {cmd}"),
            AceError::CommandFailed { command, detail } => {
                write!(f, "command `{command}` failed: {detail}")
            }
            AceError::PermissionDenied(what) => write!(f, "permission denied: {what}"),
            AceError::ConcurrentModification { name } => {
                write!(f, "record `{name}` no longer present in project file")
            }
            AceError::WorkspaceMissing { path } => {
                write!(f, "workspace directory missing: {}", path.display())
            }
            AceError::Lock(msg) => write!(f, "failed to lock project file: {msg}"),
        }
    }
}

impl std::error::Error for AceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AceError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl AceError {
    /// An [`AceError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AceError::Io { path: path.into(), source }
    }
}

pub type Result<T> = std::result::Result<T, AceError>;
