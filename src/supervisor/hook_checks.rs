//! Fast-cycle hook supervision.
//!
//! For each hook: mark stale agent suffixes, fold in completed runs
//! (sentinel found), detect dead processes (pid gone, no sentinel),
//! demote long-running hooks to zombies, and finally start whatever runs
//! are still missing. Completion is checked before liveness so a child
//! that exited normally is never marked DEAD.

use indexmap::IndexMap;

use crate::changespec::{
    ChangeSpec, HookEntry, HookRunStatus, Suffix, SuffixKind,
    get_current_and_proposal_entry_ids,
};
use crate::hooks::{self, execution, process};
use crate::store;
use crate::timestamps::{self, generate_timestamp};

use super::{hooks_runner, Ctx};

/// Check and drive hooks for one ChangeSpec. Returns update messages.
pub fn check_hooks(ctx: &Ctx<'_>, changespec: &ChangeSpec) -> Vec<String> {
    let mut updates: Vec<String> = Vec::new();
    if changespec.hooks.is_empty() {
        return updates;
    }

    let is_terminal = changespec.is_terminal();
    let entry_ids = get_current_and_proposal_entry_ids(changespec);
    let zombie_timeout = ctx.config.zombie_timeout_seconds;

    let mut working_hooks: Vec<HookEntry> = Vec::new();
    let mut modified: IndexMap<String, HookEntry> = IndexMap::new();
    let mut entries_needing: Vec<String> = Vec::new();
    let mut completed_entry_ids: Vec<String> = Vec::new();

    for hook in &changespec.hooks {
        // A stale agent suffix (fix-hook that never reported back) is
        // demoted to an error ZOMBIE.
        if let Some(sl) = hook.latest_status_line() {
            if let Some(suffix) = &sl.suffix {
                if matches!(suffix.kind, SuffixKind::RunningAgent | SuffixKind::Plain)
                    && timestamps::is_suffix_stale(&suffix.text, zombie_timeout)
                {
                    if let Err(e) = hooks::set_hook_suffix(
                        &changespec.file_path,
                        &changespec.name,
                        &hook.command,
                        "ZOMBIE",
                        Some(SuffixKind::Error),
                        Some(&sl.entry_id),
                        None,
                    ) {
                        log::warn!("{}: {e}", changespec.name);
                    } else {
                        updates.push(format!(
                            "Hook '{}' stale fix-hook marked as ZOMBIE",
                            hook.display_command()
                        ));
                    }
                }
            }
        }

        // Completion first: an exited child is PASSED/FAILED, not DEAD.
        if hook.has_any_running_status() {
            if let Some((completed, message)) = complete_hook(ctx, changespec, hook) {
                for sl in &hook.status_lines {
                    if sl.status == HookRunStatus::Running {
                        completed_entry_ids.push(sl.entry_id.clone());
                    }
                }
                updates.push(message);
                modified.insert(completed.command.clone(), completed.clone());
                working_hooks.push(completed);
                continue;
            }
        }

        // Dead process: the recorded pgid vanished without a sentinel.
        if let Some((dead, message, entry_id)) = detect_dead_process(hook) {
            completed_entry_ids.push(entry_id);
            updates.push(message);
            modified.insert(dead.command.clone(), dead.clone());
            working_hooks.push(dead);
            continue;
        }

        // Zombie: RUNNING far beyond the timeout. Signal and mark DEAD.
        if let Some((dead, message, ids)) = detect_zombie(hook, zombie_timeout) {
            completed_entry_ids.extend(ids);
            updates.push(message);
            modified.insert(dead.command.clone(), dead.clone());
            working_hooks.push(dead);
            continue;
        }

        if !is_terminal && !hook.has_any_running_status() {
            for entry_id in hooks::entries_needing_hook_run(hook, &entry_ids) {
                if !entries_needing.contains(&entry_id) {
                    entries_needing.push(entry_id);
                }
            }
        }
        working_hooks.push(hook.clone());
    }

    // Persist completions/deaths through the merge writer so hooks added
    // by other processes survive.
    if !modified.is_empty() {
        if let Err(e) = store::merge_hook_updates(&changespec.file_path, &changespec.name, &modified)
        {
            log::warn!("{}: {e}", changespec.name);
        }
    }

    // Start missing runs, one workspace per entry id.
    if !is_terminal {
        for entry_id in &entries_needing {
            let Some(entry) = changespec.commit_entry_by_id(entry_id) else { continue };
            let (start_updates, started) =
                hooks_runner::start_stale_hooks(ctx, changespec, entry_id, entry);
            updates.extend(start_updates);
            for started_hook in started {
                if let Some(existing) =
                    working_hooks.iter_mut().find(|h| h.command == started_hook.command)
                {
                    *existing = started_hook;
                }
            }
        }
    }

    // Entry workspaces free up as soon as their last run terminates.
    completed_entry_ids.sort();
    completed_entry_ids.dedup();
    for entry_id in &completed_entry_ids {
        if !hooks::entry_has_running_hooks(&working_hooks, entry_id) {
            hooks_runner::release_entry_workspace(ctx, changespec, entry_id);
        }
    }
    if !hooks::has_running_hooks(&working_hooks) {
        hooks_runner::release_entry_workspaces(ctx, changespec);
    }

    updates
}

/// Fold a finished run into the hook: PASSED/FAILED from the sentinel,
/// with the `!`-prefix failure summary attached as an error suffix.
fn complete_hook(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    hook: &HookEntry,
) -> Option<(HookEntry, String)> {
    let running_idx = hook
        .status_lines
        .iter()
        .position(|sl| sl.status == HookRunStatus::Running)?;
    let running = &hook.status_lines[running_idx];

    let output_path = execution::hook_output_path(
        &ctx.config.hooks_dir(),
        &changespec.name,
        &running.timestamp,
    );
    let completion = execution::check_hook_completion(&output_path, &running.timestamp)?;

    let suffix = if completion.status == HookRunStatus::Failed && hook.skip_fix_hook() {
        Some(execution::failed_hook_suffix(ctx.summarizer, &output_path))
    } else {
        None
    };

    let mut updated = hook.clone();
    {
        let line = &mut updated.status_lines[running_idx];
        line.status = completion.status;
        line.duration = Some(completion.duration.clone());
        line.suffix = suffix;
    }

    let message = format!("Hook '{}' -> {} ({})", hook.command, completion.status, completion.duration);
    Some((updated, message))
}

/// A RUNNING line whose recorded pgid no longer exists becomes DEAD with
/// a killed-process suffix describing when it was noticed.
fn detect_dead_process(hook: &HookEntry) -> Option<(HookEntry, String, String)> {
    let idx = hook.status_lines.iter().position(|sl| {
        sl.status == HookRunStatus::Running
            && sl
                .suffix
                .as_ref()
                .is_some_and(|s| s.kind == SuffixKind::RunningProcess)
    })?;

    let pid: u32 = hook.status_lines[idx].suffix.as_ref()?.text.parse().ok()?;
    if process::is_process_running(pid) {
        return None;
    }

    let timestamp = generate_timestamp();
    let description = format!("[{timestamp}] Process is no longer running. Marked as dead.");
    let new_suffix = format!("{pid} | {description}");

    let mut updated = hook.clone();
    let entry_id = updated.status_lines[idx].entry_id.clone();
    {
        let line = &mut updated.status_lines[idx];
        line.status = HookRunStatus::Dead;
        line.suffix = Some(Suffix::new(new_suffix.clone(), SuffixKind::KilledProcess));
    }

    let message = format!("Hook '{}' -> DEAD - (~$: {new_suffix})", hook.command);
    Some((updated, message, entry_id))
}

/// RUNNING lines older than the timeout: SIGTERM the group and mark DEAD.
fn detect_zombie(hook: &HookEntry, zombie_timeout: u64) -> Option<(HookEntry, String, Vec<String>)> {
    let stale = hook.status_lines.iter().any(|sl| {
        sl.status == HookRunStatus::Running
            && timestamps::age_seconds(&sl.timestamp).is_some_and(|age| age > zombie_timeout as i64)
    });
    if !stale {
        return None;
    }

    let mut updated = hook.clone();
    let mut entry_ids = Vec::new();
    let mut runtime = String::from("unknown");

    for sl in &mut updated.status_lines {
        if sl.status != HookRunStatus::Running {
            continue;
        }
        entry_ids.push(sl.entry_id.clone());
        if let Some(age) = timestamps::age_seconds(&sl.timestamp) {
            runtime = timestamps::format_duration(age);
        }

        if let Some(suffix) = &sl.suffix {
            if suffix.kind == SuffixKind::RunningProcess {
                if let Ok(pgid) = suffix.text.parse::<u32>() {
                    process::terminate_process_group(pgid);
                }
            }
        }

        let timestamp = generate_timestamp();
        let description =
            format!("[{timestamp}] Killed zombie hook that has been running for {runtime}.");
        let new_text = match &sl.suffix {
            Some(suffix) if !suffix.text.is_empty() => format!("{} | {description}", suffix.text),
            _ => description,
        };
        sl.status = HookRunStatus::Dead;
        sl.suffix = Some(Suffix::new(new_text, SuffixKind::KilledProcess));
    }

    let message = format!("Hook '{}' -> DEAD - (~$: {runtime} zombie)", hook.command);
    Some((updated, message, entry_ids))
}
