//! Cross-record checks used by the ready-to-mail derivation and the
//! query shorthands.

use super::{base_status, is_proposal_entry, ChangeSpec, READY_TO_MAIL_SUFFIX};

/// Whether any suffix at all decorates the record (status, commits, hooks,
/// comments). Backs the `!!!`-style query shorthands.
pub fn has_any_suffix(changespec: &ChangeSpec) -> bool {
    if changespec.status.contains(" - (!: ") {
        return true;
    }
    if changespec.commits.iter().any(|entry| entry.suffix.is_some()) {
        return true;
    }
    if changespec
        .hooks
        .iter()
        .any(|hook| hook.status_lines.iter().any(|sl| sl.suffix.is_some()))
    {
        return true;
    }
    changespec.comments.iter().any(|comment| comment.suffix.is_some())
}

/// Whether any error suffix decorates the record anywhere. An error
/// anywhere blocks the READY TO MAIL marker.
pub fn has_any_error_suffix(changespec: &ChangeSpec) -> bool {
    if changespec.status.contains(" - (!: ") && !changespec.status.contains(READY_TO_MAIL_SUFFIX) {
        return true;
    }
    if changespec
        .commits
        .iter()
        .any(|entry| entry.suffix.as_ref().is_some_and(|s| s.is_error()))
    {
        return true;
    }
    if changespec.hooks.iter().any(|hook| {
        hook.status_lines
            .iter()
            .any(|sl| sl.suffix.as_ref().is_some_and(|s| s.is_error()))
    }) {
        return true;
    }
    changespec
        .comments
        .iter()
        .any(|comment| comment.suffix.as_ref().is_some_and(|s| s.is_error()))
}

/// Whether the parent allows this record to be mailed: absent, Submitted,
/// or Mailed. A parent name that resolves to nothing is treated as ready
/// (it may have been deleted out from under us).
pub fn is_parent_ready_for_mail(changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    let Some(parent_name) = &changespec.parent else {
        return true;
    };
    match all.iter().find(|cs| &cs.name == parent_name) {
        Some(parent) => matches!(base_status(&parent.status).as_str(), "Submitted" | "Mailed"),
        None => true,
    }
}

/// The current (latest non-proposal) entry id plus every proposal sharing
/// its number. `[1, 2, 2a, 2b]` yields `["2", "2a", "2b"]`.
pub fn get_current_and_proposal_entry_ids(changespec: &ChangeSpec) -> Vec<String> {
    let Some(current) = changespec.commits.iter().rev().find(|entry| !entry.is_proposed()) else {
        return Vec::new();
    };

    let mut ids = vec![current.number.to_string()];
    for entry in &changespec.commits {
        if entry.is_proposed() && entry.number == current.number {
            ids.push(entry.display_number());
        }
    }
    ids
}

/// Whether every hook has a PASSED line for each of the given entry ids,
/// skipping proposal ids for `$`-prefixed hooks. Vacuously true with no
/// hooks or no entry ids.
pub fn all_hooks_passed_for_entries(changespec: &ChangeSpec, entry_ids: &[String]) -> bool {
    if changespec.hooks.is_empty() || entry_ids.is_empty() {
        return true;
    }

    for hook in &changespec.hooks {
        for entry_id in entry_ids {
            if hook.skip_proposal_runs() && is_proposal_entry(entry_id) {
                continue;
            }
            match hook.status_line_for_entry(entry_id) {
                Some(sl) if sl.status == super::HookRunStatus::Passed => {}
                _ => return false,
            }
        }
    }
    true
}
