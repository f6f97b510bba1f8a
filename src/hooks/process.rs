//! Process-group liveness probes and termination.
//!
//! Children run in their own process groups, so liveness is a signal-0
//! probe and termination is a SIGTERM to the group. A permission error on
//! either means the pid is owned by someone else; the process is treated
//! as handled so stale state still gets cleaned.

use crate::changespec::{ChangeSpec, SuffixKind};
use crate::timestamps;

/// Whether a pid (or its process group) is still alive.
#[cfg(unix)]
pub fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        // EPERM: the process exists but belongs to another user.
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_running(_pid: u32) -> bool {
    false
}

/// SIGTERM a process group. Returns true when the group should be treated
/// as terminated — including the already-dead and permission-denied cases.
#[cfg(unix)]
pub fn terminate_process_group(pgid: u32) -> bool {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pgid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => true,
        Err(nix::errno::Errno::EPERM) => {
            log::warn!("cannot signal pgid {pgid} (owned elsewhere); treating as dead");
            true
        }
        Err(e) => {
            log::warn!("killpg({pgid}) failed: {e}");
            false
        }
    }
}

#[cfg(not(unix))]
pub fn terminate_process_group(_pgid: u32) -> bool {
    false
}

/// Pid encoded in an agent suffix of the form `<agent>-<pid>-<timestamp>`.
pub fn pid_from_agent_suffix(suffix_text: &str) -> Option<u32> {
    let mut parts = suffix_text.split('-');
    let _agent = parts.next()?;
    let pid = parts.next()?.parse().ok()?;
    let ts = parts.next()?;
    if timestamps::is_timestamp(ts) { Some(pid) } else { None }
}

/// A process reference found on a record, for kill sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningRef {
    /// Hook command or comment reviewer the reference hangs off.
    pub owner: String,
    pub entry_id: Option<String>,
    pub pgid: u32,
}

/// Every live process-group reference on a ChangeSpec: `$:` pids on hook
/// status lines plus `<agent>-<pid>-<ts>` agent suffixes on hooks and
/// comments.
pub fn collect_running_refs(changespec: &ChangeSpec) -> Vec<RunningRef> {
    let mut refs = Vec::new();

    for hook in &changespec.hooks {
        for sl in &hook.status_lines {
            let Some(suffix) = &sl.suffix else { continue };
            let pgid = match suffix.kind {
                SuffixKind::RunningProcess => suffix.text.parse().ok(),
                SuffixKind::RunningAgent => pid_from_agent_suffix(&suffix.text),
                _ => None,
            };
            if let Some(pgid) = pgid {
                refs.push(RunningRef {
                    owner: hook.command.clone(),
                    entry_id: Some(sl.entry_id.clone()),
                    pgid,
                });
            }
        }
    }

    for comment in &changespec.comments {
        let Some(suffix) = &comment.suffix else { continue };
        if suffix.kind == SuffixKind::RunningAgent {
            if let Some(pgid) = pid_from_agent_suffix(&suffix.text) {
                refs.push(RunningRef { owner: comment.reviewer.clone(), entry_id: None, pgid });
            }
        }
    }

    refs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changespec::parse_project_str;
    use std::path::Path;

    #[test]
    fn agent_suffix_pids() {
        assert_eq!(pid_from_agent_suffix("fix_hook-4242-251230_151429"), Some(4242));
        assert_eq!(pid_from_agent_suffix("fix_hook-251230_151429"), None);
        assert_eq!(pid_from_agent_suffix("4242"), None);
        assert_eq!(pid_from_agent_suffix("crs-99-251230151429"), Some(99));
    }

    #[test]
    fn collects_refs_from_hooks_and_comments() {
        let text = "\
NAME: alpha
STATUS: Drafted
HOOKS:
  bb_build
    (1) [251230_120000] RUNNING - ($: 4242)
    (2) [251230_130000] FAILED - (@: fix_hook-77-251230_151429)
COMMENTS:
  [critique] ~/.gai/comments/a.json - (@: crs-88-251230_151429)
";
        let specs = parse_project_str(text, Path::new("p.gp"));
        let refs = collect_running_refs(&specs[0]);
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].pgid, 4242);
        assert_eq!(refs[0].entry_id.as_deref(), Some("1"));
        assert_eq!(refs[1].pgid, 77);
        assert_eq!(refs[2].owner, "critique");
        assert_eq!(refs[2].pgid, 88);
    }

    #[cfg(unix)]
    #[test]
    fn own_process_is_running() {
        assert!(is_process_running(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn bogus_pid_is_not_running() {
        // Pid max on Linux defaults to ~4 million; this one cannot exist.
        assert!(!is_process_running(3_999_999));
    }
}
