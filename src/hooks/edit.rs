//! Rerun/delete support for the edit-hooks flow.
//!
//! Both operations first SIGTERM every process group referenced by the
//! affected hooks' running suffixes, then rewrite the HOOKS field: rerun
//! drops the status line for the last entry id so the hook becomes
//! eligible again; delete removes the HookEntry outright.

use std::path::Path;

use indexmap::IndexMap;

use crate::changespec::{parse_project_file, SuffixKind};
use crate::error::{AceError, Result};
use crate::store;

use super::process::{pid_from_agent_suffix, terminate_process_group};

fn kill_hook_processes(hook: &crate::changespec::HookEntry) {
    for sl in &hook.status_lines {
        let Some(suffix) = &sl.suffix else { continue };
        let pgid = match suffix.kind {
            SuffixKind::RunningProcess => suffix.text.parse().ok(),
            SuffixKind::RunningAgent => pid_from_agent_suffix(&suffix.text),
            _ => None,
        };
        if let Some(pgid) = pgid {
            terminate_process_group(pgid);
        }
    }
}

/// Drop the last entry's status line from the hooks at the given indices
/// so they run again, killing any live processes first.
pub fn rerun_hooks(path: &Path, name: &str, indices: &[usize]) -> Result<Vec<String>> {
    let specs = parse_project_file(path)?;
    let cs = specs
        .iter()
        .find(|cs| cs.name == name)
        .ok_or_else(|| AceError::ConcurrentModification { name: name.to_string() })?;

    let mut updates = IndexMap::new();
    let mut messages = Vec::new();

    for &idx in indices {
        let Some(hook) = cs.hooks.get(idx) else { continue };
        kill_hook_processes(hook);

        let Some(last_id) = hook.latest_status_line().map(|sl| sl.entry_id.clone()) else {
            continue;
        };
        let mut updated = hook.clone();
        updated.status_lines.retain(|sl| sl.entry_id != last_id);
        messages.push(format!("Hook '{}' rerun for entry {last_id}", hook.display_command()));
        updates.insert(updated.command.clone(), updated);
    }

    if !updates.is_empty() {
        store::merge_hook_updates(path, name, &updates)?;
    }
    Ok(messages)
}

/// Remove the hooks at the given indices entirely, killing any live
/// processes first.
pub fn delete_hooks(path: &Path, name: &str, indices: &[usize]) -> Result<Vec<String>> {
    let specs = parse_project_file(path)?;
    let cs = specs
        .iter()
        .find(|cs| cs.name == name)
        .ok_or_else(|| AceError::ConcurrentModification { name: name.to_string() })?;

    let mut messages = Vec::new();
    let mut kept = Vec::new();
    for (idx, hook) in cs.hooks.iter().enumerate() {
        if indices.contains(&idx) {
            kill_hook_processes(hook);
            messages.push(format!("Hook '{}' deleted", hook.display_command()));
        } else {
            kept.push(hook.clone());
        }
    }

    if !messages.is_empty() {
        store::update_hooks_field(path, name, &kept)?;
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("proj1.gp");
        std::fs::write(
            &path,
            "NAME: alpha\nSTATUS: Drafted\nHOOKS:\n  bb_build\n    (1) [251230_120000] PASSED (3s)\n    (2) [251230_130000] FAILED\n  bb_lint\n    (2) [251230_130500] PASSED (1s)\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn rerun_drops_only_last_entry_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());

        let messages = rerun_hooks(&path, "alpha", &[0]).unwrap();
        assert_eq!(messages.len(), 1);

        let specs = parse_project_file(&path).unwrap();
        let build = specs[0].hook_by_command("bb_build").unwrap();
        assert_eq!(build.status_lines.len(), 1);
        assert_eq!(build.status_lines[0].entry_id, "1");
        // The untouched hook keeps its line.
        assert_eq!(specs[0].hook_by_command("bb_lint").unwrap().status_lines.len(), 1);
    }

    #[test]
    fn delete_removes_hook_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());

        delete_hooks(&path, "alpha", &[1]).unwrap();
        let specs = parse_project_file(&path).unwrap();
        assert_eq!(specs[0].hooks.len(), 1);
        assert_eq!(specs[0].hooks[0].command, "bb_build");
    }

    #[test]
    fn out_of_range_indices_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());
        assert!(rerun_hooks(&path, "alpha", &[7]).unwrap().is_empty());
    }
}
