//! Hook eligibility and mutation queries.
//!
//! A hook runs exactly once per commit entry id. Proposals are gated on
//! their parent entry having PASSED the same hook, with one exception: a
//! proposal created by fix-hook to repair this very hook (detected by the
//! parent status line's suffix naming the proposal) may run immediately.

pub mod edit;
pub mod execution;
pub mod process;

use crate::changespec::{
    is_proposal_entry, parse_proposal_id, ChangeSpec, HookEntry, HookRunStatus, Suffix, SuffixKind,
};
use crate::error::Result;
use crate::store;
use indexmap::IndexMap;
use std::path::Path;

/// Test-target shorthand: a hook command of `//target` stands for the
/// test-runner invocation.
pub const TEST_TARGET_HOOK_PREFIX: &str = "bb_rabbit_test ";
const TEST_TARGET_SHORTHAND_PREFIX: &str = "//";

fn split_prefix(command: &str) -> (&str, &str) {
    let end = command.find(|c| c != '!' && c != '$').unwrap_or(command.len());
    command.split_at(end)
}

/// Expand `//target` to `bb_rabbit_test //target`, preserving `!`/`$`
/// prefixes.
pub fn expand_test_target_shorthand(command: &str) -> String {
    let (prefix, cmd) = split_prefix(command);
    if cmd.starts_with(TEST_TARGET_SHORTHAND_PREFIX) {
        format!("{prefix}{TEST_TARGET_HOOK_PREFIX}{cmd}")
    } else {
        command.to_string()
    }
}

/// Contract `bb_rabbit_test //target` back to `//target` for display.
pub fn contract_test_target_command(command: &str) -> String {
    let (prefix, cmd) = split_prefix(command);
    if let Some(target) = cmd.strip_prefix(TEST_TARGET_HOOK_PREFIX) {
        if target.starts_with(TEST_TARGET_SHORTHAND_PREFIX) {
            return format!("{prefix}{target}");
        }
    }
    command.to_string()
}

/// Seed hooks for TEST TARGETS entries that do not already have one.
pub fn add_test_target_hooks(path: &Path, name: &str, changespec: &ChangeSpec) -> Result<()> {
    if changespec.test_targets.is_empty() {
        return Ok(());
    }
    let mut hooks = changespec.hooks.clone();
    for target in &changespec.test_targets {
        let command = format!("{TEST_TARGET_HOOK_PREFIX}{target}");
        if hooks.iter().all(|hook| hook.command != command) {
            hooks.push(HookEntry::new(command));
        }
    }
    if hooks.len() == changespec.hooks.len() {
        return Ok(());
    }
    store::update_hooks_field(path, name, &hooks)
}

/// Whether a proposal may run this hook: parent PASSED, or the parent's
/// suffix names this proposal (the fix-hook exception).
fn parent_hook_passed_or_is_fix_proposal(hook: &HookEntry, entry_id: &str) -> bool {
    let Some((number, _letter)) = parse_proposal_id(entry_id) else {
        return true;
    };
    let parent_id = number.to_string();
    let Some(parent_line) = hook.status_line_for_entry(&parent_id) else {
        return false;
    };
    if parent_line.suffix.as_ref().is_some_and(|s| s.text == entry_id) {
        return true;
    }
    parent_line.status == HookRunStatus::Passed
}

/// Whether a hook needs a run for the given entry id.
pub fn hook_needs_run(hook: &HookEntry, entry_id: &str) -> bool {
    if hook.skip_proposal_runs() && is_proposal_entry(entry_id) {
        return false;
    }
    if hook.status_line_for_entry(entry_id).is_some() {
        return false;
    }
    if is_proposal_entry(entry_id) && !parent_hook_passed_or_is_fix_proposal(hook, entry_id) {
        return false;
    }
    true
}

/// Entry ids from `entry_ids` that this hook still needs to run for.
pub fn entries_needing_hook_run(hook: &HookEntry, entry_ids: &[String]) -> Vec<String> {
    entry_ids.iter().filter(|id| hook_needs_run(hook, id)).cloned().collect()
}

/// Whether any hook has a RUNNING line for the given entry id.
pub fn entry_has_running_hooks(hooks: &[HookEntry], entry_id: &str) -> bool {
    hooks.iter().any(|hook| {
        hook.status_lines
            .iter()
            .any(|sl| sl.entry_id == entry_id && sl.status == HookRunStatus::Running)
    })
}

/// Whether any hook has any RUNNING line at all.
pub fn has_running_hooks(hooks: &[HookEntry]) -> bool {
    hooks.iter().any(HookEntry::has_any_running_status)
}

/// `(hook command, entry id)` pairs eligible for the fix-hook workflow: a
/// FAILED line on a non-proposal entry whose summary is already attached.
pub fn failing_entries_for_fix(hooks: &[HookEntry], entry_ids: &[String]) -> Vec<(String, String)> {
    let mut result = Vec::new();
    for hook in hooks {
        for entry_id in entry_ids {
            if is_proposal_entry(entry_id) {
                continue;
            }
            let Some(sl) = hook.status_line_for_entry(entry_id) else {
                continue;
            };
            if sl.status != HookRunStatus::Failed {
                continue;
            }
            if sl.suffix.as_ref().map(|s| s.kind) != Some(SuffixKind::SummarizeComplete) {
                continue;
            }
            result.push((hook.command.clone(), entry_id.clone()));
        }
    }
    result
}

/// `(hook command, entry id)` pairs eligible for the summarize-hook
/// workflow: a FAILED line with no suffix yet.
pub fn failing_entries_for_summarize(
    hooks: &[HookEntry],
    entry_ids: &[String],
) -> Vec<(String, String)> {
    let mut result = Vec::new();
    for hook in hooks {
        for entry_id in entry_ids {
            let Some(sl) = hook.status_line_for_entry(entry_id) else {
                continue;
            };
            if sl.status == HookRunStatus::Failed && sl.suffix.is_none() {
                result.push((hook.command.clone(), entry_id.clone()));
            }
        }
    }
    result
}

/// Set a suffix on one hook's status line — the one for `entry_id`, or
/// the latest when no entry is named. A `summary` renders the compound
/// form `MSG | SUMMARY`.
pub fn set_hook_suffix(
    path: &Path,
    name: &str,
    hook_command: &str,
    suffix_text: &str,
    kind: Option<SuffixKind>,
    entry_id: Option<&str>,
    summary: Option<&str>,
) -> Result<()> {
    let specs = crate::changespec::parse_project_file(path)?;
    let Some(cs) = specs.iter().find(|cs| cs.name == name) else {
        return Err(crate::error::AceError::ConcurrentModification { name: name.to_string() });
    };
    let Some(hook) = cs.hook_by_command(hook_command) else {
        // The hook vanished under us; drop the update.
        return Ok(());
    };

    let text = match summary {
        Some(summary) => format!("{suffix_text} | {summary}"),
        None => suffix_text.to_string(),
    };
    let suffix = match kind {
        Some(kind) => Suffix::new(text, kind),
        None => Suffix::infer(text),
    };

    let target_id = match entry_id {
        Some(id) => Some(id.to_string()),
        None => hook.latest_status_line().map(|sl| sl.entry_id.clone()),
    };
    let Some(target_id) = target_id else {
        return Ok(());
    };

    let mut updated = hook.clone();
    let mut touched = false;
    for sl in &mut updated.status_lines {
        if sl.entry_id == target_id {
            sl.suffix = Some(suffix.clone());
            touched = true;
        }
    }
    if !touched {
        return Ok(());
    }

    let mut updates = IndexMap::new();
    updates.insert(updated.command.clone(), updated);
    store::merge_hook_updates(path, name, &updates)
}

/// Clear the suffix from a hook's latest status line.
pub fn clear_hook_suffix(path: &Path, name: &str, hook_command: &str) -> Result<()> {
    let specs = crate::changespec::parse_project_file(path)?;
    let Some(cs) = specs.iter().find(|cs| cs.name == name) else {
        return Err(crate::error::AceError::ConcurrentModification { name: name.to_string() });
    };
    let Some(hook) = cs.hook_by_command(hook_command) else {
        return Ok(());
    };
    let Some(latest_id) = hook.latest_status_line().map(|sl| sl.entry_id.clone()) else {
        return Ok(());
    };

    let mut updated = hook.clone();
    for sl in &mut updated.status_lines {
        if sl.entry_id == latest_id {
            sl.suffix = None;
        }
    }

    let mut updates = IndexMap::new();
    updates.insert(updated.command.clone(), updated);
    store::merge_hook_updates(path, name, &updates)
}

/// Rewrite an error suffix on a specific status line to acknowledged.
pub fn acknowledge_hook_suffix(
    path: &Path,
    name: &str,
    hook_command: &str,
    entry_id: &str,
) -> Result<bool> {
    let specs = crate::changespec::parse_project_file(path)?;
    let Some(cs) = specs.iter().find(|cs| cs.name == name) else {
        return Err(crate::error::AceError::ConcurrentModification { name: name.to_string() });
    };
    let Some(hook) = cs.hook_by_command(hook_command) else {
        return Ok(false);
    };

    let mut updated = hook.clone();
    let mut touched = false;
    for sl in &mut updated.status_lines {
        if sl.entry_id == entry_id {
            if let Some(suffix) = &sl.suffix {
                if suffix.is_error() {
                    sl.suffix = Some(suffix.acknowledge());
                    touched = true;
                }
            }
        }
    }
    if !touched {
        return Ok(false);
    }

    let mut updates = IndexMap::new();
    updates.insert(updated.command.clone(), updated);
    store::merge_hook_updates(path, name, &updates)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changespec::{parse_project_file, parse_project_str, HookStatusLine};
    use rstest::rstest;

    fn hook_with_lines(command: &str, lines: &[(&str, HookRunStatus, Option<Suffix>)]) -> HookEntry {
        let mut hook = HookEntry::new(command);
        for (entry_id, status, suffix) in lines {
            hook.status_lines.push(HookStatusLine {
                entry_id: entry_id.to_string(),
                timestamp: "251230_120000".to_string(),
                status: *status,
                duration: None,
                suffix: suffix.clone(),
            });
        }
        hook
    }

    #[rstest]
    #[case("//foo:bar", "bb_rabbit_test //foo:bar")]
    #[case("!//foo:bar", "!bb_rabbit_test //foo:bar")]
    #[case("!$//foo:bar", "!$bb_rabbit_test //foo:bar")]
    #[case("bb_build", "bb_build")]
    fn shorthand_expansion(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(expand_test_target_shorthand(input), expected);
        // Contracting an expanded command restores the shorthand.
        assert_eq!(contract_test_target_command(expected), input);
    }

    #[test]
    fn needs_run_basic() {
        let hook = hook_with_lines("bb_build", &[("1", HookRunStatus::Passed, None)]);
        assert!(!hook_needs_run(&hook, "1"));
        assert!(hook_needs_run(&hook, "2"));
    }

    #[test]
    fn dollar_hooks_skip_proposals() {
        let hook = hook_with_lines("$bb_presubmit", &[]);
        assert!(!hook_needs_run(&hook, "2a"));
        assert!(hook_needs_run(&hook, "2"));
    }

    #[test]
    fn proposal_waits_for_parent_pass() {
        let waiting = hook_with_lines("bb_build", &[("2", HookRunStatus::Failed, None)]);
        assert!(!hook_needs_run(&waiting, "2a"));

        let passed = hook_with_lines("bb_build", &[("2", HookRunStatus::Passed, None)]);
        assert!(hook_needs_run(&passed, "2a"));

        // No parent line at all: wait.
        let empty = hook_with_lines("bb_build", &[]);
        assert!(!hook_needs_run(&empty, "2a"));
    }

    #[test]
    fn fix_hook_exception_allows_run() {
        let hook = hook_with_lines(
            "bb_build",
            &[("2", HookRunStatus::Failed, Some(Suffix::plain("2a")))],
        );
        assert!(hook_needs_run(&hook, "2a"));
        // A different proposal does not benefit from the exception.
        assert!(!hook_needs_run(&hook, "2b"));
    }

    #[test]
    fn fix_and_summarize_eligibility() {
        let hooks = vec![
            hook_with_lines(
                "bb_build",
                &[("2", HookRunStatus::Failed, Some(Suffix::new("tests red", SuffixKind::SummarizeComplete)))],
            ),
            hook_with_lines("bb_lint", &[("2", HookRunStatus::Failed, None)]),
            hook_with_lines("bb_test", &[("2a", HookRunStatus::Failed, None)]),
        ];
        let ids = vec!["2".to_string(), "2a".to_string()];

        let fix = failing_entries_for_fix(&hooks, &ids);
        assert_eq!(fix, vec![("bb_build".to_string(), "2".to_string())]);

        let summarize = failing_entries_for_summarize(&hooks, &ids);
        assert_eq!(
            summarize,
            vec![("bb_lint".to_string(), "2".to_string()), ("bb_test".to_string(), "2a".to_string())]
        );
    }

    fn project(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("proj1.gp");
        std::fs::write(
            &path,
            "NAME: alpha\nSTATUS: Drafted\nHOOKS:\n  bb_build\n    (1) [251230_120000] FAILED\n    (2) [251230_130000] FAILED - (!: Hook Command Failed)\n",
        )
        .unwrap();
        path
    }

    #[test]
    fn set_hook_suffix_targets_named_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());

        set_hook_suffix(&path, "alpha", "bb_build", "ZOMBIE", Some(SuffixKind::Error), Some("1"), None)
            .unwrap();
        let specs = parse_project_file(&path).unwrap();
        let hook = specs[0].hook_by_command("bb_build").unwrap();
        assert_eq!(hook.status_line_for_entry("1").unwrap().suffix.as_ref().unwrap().text, "ZOMBIE");
        // The other line is untouched.
        assert_eq!(
            hook.status_line_for_entry("2").unwrap().suffix.as_ref().unwrap().text,
            "Hook Command Failed"
        );
    }

    #[test]
    fn set_hook_suffix_defaults_to_latest_and_infers_kind() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());

        set_hook_suffix(&path, "alpha", "bb_build", "fix_hook-251230_151429", None, None, None).unwrap();
        let specs = parse_project_file(&path).unwrap();
        let hook = specs[0].hook_by_command("bb_build").unwrap();
        let suffix = hook.status_line_for_entry("2").unwrap().suffix.as_ref().unwrap();
        assert_eq!(suffix.kind, SuffixKind::RunningAgent);
    }

    #[test]
    fn set_hook_suffix_with_summary_renders_compound() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());

        set_hook_suffix(&path, "alpha", "bb_build", "ZOMBIE", Some(SuffixKind::Error), Some("2"), Some("runner died"))
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("(!: ZOMBIE | runner died)"));
    }

    #[test]
    fn clear_and_acknowledge() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());

        assert!(acknowledge_hook_suffix(&path, "alpha", "bb_build", "2").unwrap());
        let specs = parse_project_file(&path).unwrap();
        let suffix = specs[0].hook_by_command("bb_build").unwrap().status_line_for_entry("2").unwrap().suffix.clone().unwrap();
        assert_eq!(suffix.kind, SuffixKind::Acknowledged);

        clear_hook_suffix(&path, "alpha", "bb_build").unwrap();
        let specs = parse_project_file(&path).unwrap();
        assert!(specs[0].hook_by_command("bb_build").unwrap().status_line_for_entry("2").unwrap().suffix.is_none());
    }

    #[test]
    fn vanished_hook_update_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = project(dir.path());
        // No error even though the hook does not exist.
        set_hook_suffix(&path, "alpha", "bb_gone", "ZOMBIE", None, None, None).unwrap();
    }

    #[test]
    fn test_target_hooks_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proj1.gp");
        std::fs::write(
            &path,
            "NAME: alpha\nSTATUS: Drafted\nTEST TARGETS:\n  //fetch:retry_test\nHOOKS:\n  bb_rabbit_test //fetch:retry_test\n  bb_build\n",
        )
        .unwrap();
        let specs = parse_project_file(&path).unwrap();
        add_test_target_hooks(&path, "alpha", &specs[0]).unwrap();
        // Already present: no duplicate added.
        let specs = parse_project_file(&path).unwrap();
        assert_eq!(specs[0].hooks.len(), 2);

        let text = "NAME: beta\nSTATUS: Drafted\nTEST TARGETS:\n  //fetch:retry_test\n";
        std::fs::write(&path, text).unwrap();
        let specs = parse_project_str(text, &path);
        add_test_target_hooks(&path, "beta", &specs[0]).unwrap();
        let specs = parse_project_file(&path).unwrap();
        assert_eq!(specs[0].hooks[0].command, "bb_rabbit_test //fetch:retry_test");
    }
}
