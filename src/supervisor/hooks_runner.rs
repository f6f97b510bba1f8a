//! Hook starting and per-entry workspace management.
//!
//! Every commit entry that needs hooks gets its own `loop(hooks)-<id>`
//! workspace claim. Regular entries check out the ChangeSpec's head;
//! proposal entries additionally import their diff uncommitted, and the
//! workspace is cleaned again before release. A previously claimed
//! workspace is reused only for the same entry id, so two hooks against
//! the same commit share one checkout.

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::changespec::{ChangeSpec, CommitEntry, HookEntry, Suffix};
use crate::error::AceError;
use crate::hooks::{self, execution};
use crate::timestamps::generate_timestamp;
use crate::workspace;

use super::Ctx;

/// Workflow name for an entry-scoped hook workspace.
pub fn entry_workflow_name(entry_id: &str) -> String {
    format!("loop(hooks)-{entry_id}")
}

fn claimed_workspace_for(changespec: &ChangeSpec, workflow: &str) -> Option<u32> {
    workspace::get_claimed_workspaces(&changespec.file_path)
        .ok()?
        .into_iter()
        .find(|claim| claim.cl_name == changespec.name && claim.workflow == workflow)
        .map(|claim| claim.workspace_num)
}

/// Release the workspace claimed for one entry id, cleaning proposal
/// workspaces first (they carry an uncommitted imported diff).
pub fn release_entry_workspace(ctx: &Ctx<'_>, changespec: &ChangeSpec, entry_id: &str) {
    let workflow = entry_workflow_name(entry_id);
    let Some(num) = claimed_workspace_for(changespec, &workflow) else {
        return;
    };

    if crate::changespec::is_proposal_entry(entry_id) {
        if let Ok(dir) =
            workspace::workspace_directory(&ctx.config.workspace_root, &changespec.project_name(), num)
        {
            if let Err(e) = ctx.vcs.clean(&dir) {
                log::warn!("cleaning proposal workspace {num}: {e}");
            }
        }
    }

    if let Err(e) =
        workspace::release_workspace(&changespec.file_path, num, &workflow, &changespec.name)
    {
        log::warn!("releasing workspace {num}: {e}");
    } else {
        log::debug!("Released workspace #{num} for entry {entry_id}");
    }
}

/// Release every `loop(hooks)-*` workspace this ChangeSpec still holds.
pub fn release_entry_workspaces(ctx: &Ctx<'_>, changespec: &ChangeSpec) {
    let Ok(claims) = workspace::get_claimed_workspaces(&changespec.file_path) else {
        return;
    };
    for claim in claims {
        if claim.cl_name == changespec.name {
            if let Some(entry_id) = claim.workflow.strip_prefix("loop(hooks)-") {
                release_entry_workspace(ctx, changespec, &entry_id.to_string());
            }
        }
    }
}

/// Start every stale hook for one commit entry.
///
/// Returns update messages plus the started hooks (with their RUNNING
/// status lines) for the caller's bookkeeping.
pub fn start_stale_hooks(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    entry_id: &str,
    entry: &CommitEntry,
) -> (Vec<String>, Vec<HookEntry>) {
    let mut updates = Vec::new();
    let started: Vec<HookEntry>;

    if changespec.hooks.is_empty() || changespec.is_terminal() {
        return (updates, Vec::new());
    }

    let is_proposal = entry.is_proposed();
    if is_proposal && entry.diff.is_none() {
        log::warn!(
            "Proposal ({entry_id}) has no DIFF path, cannot run hooks for {}",
            changespec.name
        );
        return (updates, Vec::new());
    }

    let workflow = entry_workflow_name(entry_id);
    let (workspace_num, newly_claimed) = match claimed_workspace_for(changespec, &workflow) {
        Some(num) => (num, false),
        None => {
            let num = match workspace::get_first_available_loop_workspace(&changespec.file_path) {
                Ok(num) => num,
                Err(e) => {
                    log::warn!("{}: {e}", changespec.name);
                    return (updates, Vec::new());
                }
            };
            match workspace::claim_workspace(&changespec.file_path, num, &workflow, &changespec.name)
            {
                Ok(true) => (num, true),
                Ok(false) => {
                    log::warn!(
                        "Failed to claim workspace for entry {entry_id} on {}",
                        changespec.name
                    );
                    return (updates, Vec::new());
                }
                Err(e) => {
                    log::warn!("{}: {e}", changespec.name);
                    return (updates, Vec::new());
                }
            }
        }
    };

    let release = |num: u32| {
        let _ = workspace::release_workspace(&changespec.file_path, num, &workflow, &changespec.name);
    };

    let workspace_dir = match workspace::workspace_directory(
        &ctx.config.workspace_root,
        &changespec.project_name(),
        workspace_num,
    ) {
        Ok(dir) => dir,
        Err(e) => {
            log::warn!("{}: {e}", changespec.name);
            release(workspace_num);
            return (updates, Vec::new());
        }
    };

    // Fresh claims get a clean checkout; proposals also import their diff.
    if newly_claimed {
        if let Err(e) = ctx.vcs.clean(&workspace_dir) {
            log::warn!("clean failed for {}: {e}", changespec.name);
        }
        if let Err(e) = ctx.vcs.checkout(&workspace_dir, &changespec.name) {
            log::warn!("checkout failed for {}: {e}", changespec.name);
            release(workspace_num);
            return (updates, Vec::new());
        }
        if is_proposal {
            let diff = entry.diff.as_deref().unwrap_or_default();
            if let Err(e) = ctx.vcs.apply_patch(&workspace_dir, diff) {
                log::warn!("applying proposal diff for {}: {e}", changespec.name);
                let _ = ctx.vcs.clean(&workspace_dir);
                release(workspace_num);
                return (updates, Vec::new());
            }
        }
    }

    started = start_eligible_hooks(ctx, changespec, entry_id, &workspace_dir, &mut updates);

    // Nothing started (someone else got there first, or all runs exist):
    // hand the workspace back.
    if started.is_empty() {
        if is_proposal {
            let _ = ctx.vcs.clean(&workspace_dir);
        }
        release(workspace_num);
    }
    // When hooks did start, the claim is held until check_hooks sees
    // every run for this entry terminate.

    (updates, started)
}

fn start_eligible_hooks(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    entry_id: &str,
    workspace_dir: &PathBuf,
    updates: &mut Vec<String>,
) -> Vec<HookEntry> {
    let mut started = Vec::new();

    for hook in &changespec.hooks {
        if !hooks::hook_needs_run(hook, entry_id) {
            continue;
        }
        // Single-flight: one live run per hook.
        if hook.has_any_running_status() {
            continue;
        }

        // Timestamps key output files; a 1s gap guarantees uniqueness.
        if !started.is_empty() {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }

        let timestamp = generate_timestamp();

        // Persist the RUNNING line before spawning so the record never
        // claims less than the truth.
        let mut running = hook.clone();
        running
            .status_lines
            .push(execution::running_status_line(entry_id, &timestamp));
        let mut updates_map = IndexMap::new();
        updates_map.insert(running.command.clone(), running.clone());
        if let Err(e) =
            crate::store::merge_hook_updates(&changespec.file_path, &changespec.name, &updates_map)
        {
            log::warn!("persisting RUNNING line for '{}': {e}", hook.display_command());
            continue;
        }

        match execution::start_hook_background(
            &ctx.config.hooks_dir(),
            &changespec.name,
            hook,
            workspace_dir,
            &timestamp,
        ) {
            Ok(spawned) => {
                // Swap the placeholder marker for the live pgid.
                for sl in &mut running.status_lines {
                    if sl.entry_id == entry_id && sl.timestamp == timestamp {
                        sl.suffix = Some(Suffix::running_process(spawned.pgid));
                    }
                }
                let mut updates_map = IndexMap::new();
                updates_map.insert(running.command.clone(), running.clone());
                if let Err(e) = crate::store::merge_hook_updates(
                    &changespec.file_path,
                    &changespec.name,
                    &updates_map,
                ) {
                    log::warn!("persisting pgid for '{}': {e}", hook.display_command());
                }
                updates.push(format!(
                    "Hook '{}' -> RUNNING (started for entry {entry_id})",
                    hook.command
                ));
                started.push(running);
            }
            Err(e @ AceError::MissingCommand(_)) => {
                // Not started this cycle; roll the RUNNING line back.
                log::warn!("starting hook '{}': {e}", hook.display_command());
                let mut rollback = IndexMap::new();
                rollback.insert(hook.command.clone(), hook.clone());
                let _ = crate::store::merge_hook_updates(
                    &changespec.file_path,
                    &changespec.name,
                    &rollback,
                );
            }
            Err(e) => {
                log::warn!("starting hook '{}': {e}", hook.display_command());
                let mut rollback = IndexMap::new();
                rollback.insert(hook.command.clone(), hook.clone());
                let _ = crate::store::merge_hook_updates(
                    &changespec.file_path,
                    &changespec.name,
                    &rollback,
                );
            }
        }
    }

    started
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changespec::parse_project_file;
    use crate::config::Config;
    use crate::vcs::testing::{FixedSummarizer, StubReviewTool, RecordingVcs};
    use crate::vcs::{ReviewTool, Summarizer, Vcs};

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        vcs: RecordingVcs,
        review: StubReviewTool,
        summarizer: FixedSummarizer,
        project: PathBuf,
    }

    impl Fixture {
        fn ctx(&self) -> Ctx<'_> {
            Ctx {
                config: &self.config,
                vcs: &self.vcs as &dyn Vcs,
                review: &self.review as &dyn ReviewTool,
                summarizer: &self.summarizer as &dyn Summarizer,
            }
        }

        fn specs(&self) -> Vec<ChangeSpec> {
            parse_project_file(&self.project).unwrap()
        }
    }

    fn fixture(project_text: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_test(dir.path());
        let project_dir = config.projects_dir().join("proj1");
        std::fs::create_dir_all(&project_dir).unwrap();
        let project = project_dir.join("proj1.gp");
        std::fs::write(&project, project_text).unwrap();
        // Loop-pool workspaces 100 and 101 exist on disk.
        for num in [1, 100, 101] {
            std::fs::create_dir_all(config.workspace_root.join(format!("proj1_{num}"))).unwrap();
        }
        Fixture {
            _dir: dir,
            config,
            vcs: RecordingVcs::default(),
            review: StubReviewTool,
            summarizer: FixedSummarizer("s".to_string()),
            project,
        }
    }

    #[test]
    fn starts_hook_and_claims_workspace() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (1) first\nHOOKS:\n  true\n",
        );
        let specs = f.specs();
        let entry = specs[0].commit_entry_by_id("1").unwrap().clone();

        let (updates, started) = start_stale_hooks(&f.ctx(), &specs[0], "1", &entry);
        assert_eq!(started.len(), 1);
        assert_eq!(updates.len(), 1);

        // The RUNNING line carries a pgid suffix.
        let specs = f.specs();
        let sl = specs[0].hooks[0].status_line_for_entry("1").unwrap();
        assert_eq!(sl.status, crate::changespec::HookRunStatus::Running);
        assert_eq!(
            sl.suffix.as_ref().unwrap().kind,
            crate::changespec::SuffixKind::RunningProcess
        );

        // The workspace claim names the entry.
        let claims = workspace::get_claimed_workspaces(&f.project).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].workflow, "loop(hooks)-1");
        assert_eq!(claims[0].workspace_num, 100);

        // The checkout happened in the claimed workspace.
        let calls = f.vcs.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["clean".to_string(), "checkout alpha".to_string()]);
    }

    #[test]
    fn proposal_without_diff_is_skipped() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (1) first\n  (1a) proposal\nHOOKS:\n  true\n    (1) [251230_120000] PASSED (1s)\n",
        );
        let specs = f.specs();
        let entry = specs[0].commit_entry_by_id("1a").unwrap().clone();

        let (_, started) = start_stale_hooks(&f.ctx(), &specs[0], "1a", &entry);
        assert!(started.is_empty());
        assert!(workspace::get_claimed_workspaces(&f.project).unwrap().is_empty());
    }

    #[test]
    fn proposal_imports_diff_before_hooks() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (1) first\n  (1a) proposal\n      | DIFF: ~/.gai/diffs/alpha-1a.diff\nHOOKS:\n  true\n    (1) [251230_120000] PASSED (1s)\n",
        );
        let specs = f.specs();
        let entry = specs[0].commit_entry_by_id("1a").unwrap().clone();

        let (_, started) = start_stale_hooks(&f.ctx(), &specs[0], "1a", &entry);
        assert_eq!(started.len(), 1);
        let calls = f.vcs.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "clean".to_string(),
                "checkout alpha".to_string(),
                "apply ~/.gai/diffs/alpha-1a.diff".to_string(),
            ]
        );
    }

    #[test]
    fn terminal_status_starts_nothing() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Reverted\nCOMMITS:\n  (1) first\nHOOKS:\n  true\n",
        );
        let specs = f.specs();
        let entry = specs[0].commit_entry_by_id("1").unwrap().clone();
        let (_, started) = start_stale_hooks(&f.ctx(), &specs[0], "1", &entry);
        assert!(started.is_empty());
    }

    #[test]
    fn release_cleans_proposal_workspace() {
        let f = fixture("NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (1) first\n");
        workspace::claim_workspace(&f.project, 100, "loop(hooks)-1a", "alpha").unwrap();
        let specs = f.specs();

        release_entry_workspace(&f.ctx(), &specs[0], "1a");
        assert!(workspace::get_claimed_workspaces(&f.project).unwrap().is_empty());
        let calls = f.vcs.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["clean".to_string()]);
    }

    #[test]
    fn release_all_only_touches_own_claims() {
        let f = fixture("NAME: alpha\nSTATUS: Drafted\n");
        workspace::claim_workspace(&f.project, 100, "loop(hooks)-1", "alpha").unwrap();
        workspace::claim_workspace(&f.project, 101, "loop(hooks)-1", "beta").unwrap();
        workspace::claim_workspace(&f.project, 5, "qa", "alpha").unwrap();
        let specs = f.specs();

        release_entry_workspaces(&f.ctx(), &specs[0]);
        let claims = workspace::get_claimed_workspaces(&f.project).unwrap();
        let nums: Vec<u32> = claims.iter().map(|c| c.workspace_num).collect();
        // Beta's hook claim and alpha's interactive claim survive.
        assert_eq!(nums, vec![5, 101]);
    }
}
