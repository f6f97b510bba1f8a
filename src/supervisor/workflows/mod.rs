//! Agent workflow supervision.
//!
//! Three workflow families drive long-running LLM agents against a
//! ChangeSpec: fix-hook (repairs a failed hook, produces a proposal),
//! summarize-hook (attaches a machine-readable failure summary), and crs
//! (code-review sync over critique comments). The supervisor spawns the
//! runner binaries detached, tracks them through running-agent suffixes,
//! and folds their sentinel outcome back into the record.

mod completer;
mod monitor;
mod starter;

pub use completer::check_and_complete_workflows;
pub use monitor::{
    check_workflow_completion, running_crs_workflows, running_fix_hook_workflows,
    running_summarize_hook_workflows, workflow_output_path, WORKFLOW_COMPLETE_MARKER,
};
pub use starter::start_stale_workflows;
