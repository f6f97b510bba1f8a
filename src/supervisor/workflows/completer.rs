//! Workflow completion handling and proposal auto-accept.

use std::path::Path;

use crate::changespec::{parse_project_file, parse_proposal_id, ChangeSpec, Suffix, SuffixKind};
use crate::comments;
use crate::hooks;
use crate::store;
use crate::workspace;

use super::super::Ctx;
use super::monitor::{
    check_workflow_completion, running_crs_workflows, running_fix_hook_workflows,
    running_summarize_hook_workflows, workflow_output_path,
};

/// Accept a proposal without user interaction: apply its diff to the
/// live workspace, amend with its note, and renumber the COMMITS field.
/// Failures leave the proposal (and its error suffix) intact.
fn auto_accept_proposal(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    proposal_id: &str,
    workspace_dir: &Path,
) -> bool {
    let Some((number, letter)) = parse_proposal_id(proposal_id) else {
        log::warn!("Invalid proposal ID: {proposal_id}");
        return false;
    };

    let Some(entry) = changespec.commit_entry_by_id(proposal_id) else {
        log::warn!("Proposal ({proposal_id}) not found on {}", changespec.name);
        return false;
    };
    let Some(diff) = &entry.diff else {
        log::warn!("Proposal ({proposal_id}) has no diff on {}", changespec.name);
        return false;
    };

    if let Err(e) = ctx.vcs.apply_patch(workspace_dir, diff) {
        log::warn!("Failed to apply proposal diff: {e}");
        return false;
    }
    if let Err(e) = ctx.vcs.amend(workspace_dir, &entry.note) {
        log::warn!("amend failed: {e}");
        return false;
    }

    if let Err(e) =
        store::renumber_commit_entries(&changespec.file_path, &changespec.name, number, letter)
    {
        // The amend already landed; the record catches up next cycle.
        log::warn!("Failed to renumber COMMITS entries: {e}");
    }

    true
}

fn find_claim(changespec: &ChangeSpec, workflow_name: &str) -> Option<u32> {
    workspace::get_claimed_workspaces(&changespec.file_path)
        .ok()?
        .into_iter()
        .find(|claim| claim.cl_name == changespec.name && claim.workflow == workflow_name)
        .map(|claim| claim.workspace_num)
}

fn release_claim(changespec: &ChangeSpec, workflow_name: &str, num: u32) {
    let _ = workspace::release_workspace(
        &changespec.file_path,
        num,
        workflow_name,
        &changespec.name,
    );
}

/// Re-read the ChangeSpec; completion handling must not act on the state
/// the cycle started with.
fn reread(changespec: &ChangeSpec) -> Option<ChangeSpec> {
    parse_project_file(&changespec.file_path)
        .ok()?
        .into_iter()
        .find(|cs| cs.name == changespec.name)
}

/// Poll every running workflow on this ChangeSpec and fold in terminal
/// outcomes: auto-accept on success, error suffix on failure, workspace
/// released either way.
pub fn check_and_complete_workflows(ctx: &Ctx<'_>, changespec: &ChangeSpec) -> Vec<String> {
    let mut updates = Vec::new();
    let workflows_dir = ctx.config.workflows_dir();

    // CRS workflows.
    for (reviewer, suffix) in running_crs_workflows(changespec) {
        let Some(output_path) =
            workflow_output_path(&workflows_dir, &changespec.name, "crs", &suffix)
        else {
            continue;
        };
        let Some((proposal_id, exit_code)) = check_workflow_completion(&output_path) else {
            continue;
        };
        let workflow_name = format!("loop(crs)-{reviewer}");

        if exit_code == 0 {
            let accepted = match (&proposal_id, find_claim(changespec, &workflow_name)) {
                (Some(proposal_id), Some(num)) => {
                    let accepted = workspace::workspace_directory(
                        &ctx.config.workspace_root,
                        &changespec.project_name(),
                        num,
                    )
                    .ok()
                    .and_then(|dir| {
                        reread(changespec).map(|cs| auto_accept_proposal(ctx, &cs, proposal_id, &dir))
                    })
                    .unwrap_or(false);
                    if accepted {
                        updates.push(format!(
                            "CRS workflow [{reviewer}] -> COMPLETED, auto-accepted ({proposal_id})"
                        ));
                    } else {
                        updates.push(format!("CRS workflow [{reviewer}] -> FAILED to auto-accept"));
                    }
                    accepted
                }
                _ => {
                    updates.push(format!("CRS workflow [{reviewer}] -> COMPLETED"));
                    true
                }
            };
            if accepted {
                if let Err(e) =
                    comments::clear_comment_suffix(&changespec.file_path, &changespec.name, &reviewer)
                {
                    log::warn!("{}: {e}", changespec.name);
                }
            }
        } else {
            if let Err(e) = comments::set_comment_suffix(
                &changespec.file_path,
                &changespec.name,
                &reviewer,
                Suffix::error("Unresolved Critique Comments"),
            ) {
                log::warn!("{}: {e}", changespec.name);
            }
            updates.push(format!("CRS workflow [{reviewer}] -> FAILED (exit {exit_code})"));
        }

        if let Some(num) = find_claim(changespec, &workflow_name) {
            release_claim(changespec, &workflow_name, num);
        }
    }

    // fix-hook workflows.
    for (hook_command, suffix) in running_fix_hook_workflows(changespec) {
        let Some(output_path) =
            workflow_output_path(&workflows_dir, &changespec.name, "fix-hook", &suffix)
        else {
            continue;
        };
        let Some((proposal_id, exit_code)) = check_workflow_completion(&output_path) else {
            continue;
        };
        // The claim was taken under the bare start timestamp.
        let Some(timestamp) = crate::timestamps::suffix_timestamp(&suffix) else {
            continue;
        };
        let workflow_name = format!("loop(fix-hook)-{timestamp}");
        let claim = find_claim(changespec, &workflow_name);

        if let (Some(proposal_id), 0) = (&proposal_id, exit_code) {
            if let Some(num) = claim {
                let accepted = workspace::workspace_directory(
                    &ctx.config.workspace_root,
                    &changespec.project_name(),
                    num,
                )
                .ok()
                .and_then(|dir| {
                    reread(changespec).map(|cs| auto_accept_proposal(ctx, &cs, proposal_id, &dir))
                })
                .unwrap_or(false);

                if accepted {
                    updates.push(format!(
                        "fix-hook workflow '{hook_command}' -> COMPLETED, auto-accepted ({proposal_id})"
                    ));
                    if let Err(e) = hooks::clear_hook_suffix(
                        &changespec.file_path,
                        &changespec.name,
                        &hook_command,
                    ) {
                        log::warn!("{}: {e}", changespec.name);
                    }
                } else {
                    updates.push(format!("fix-hook workflow '{hook_command}' -> FAILED to auto-accept"));
                }
            }
        } else {
            if let Err(e) = hooks::set_hook_suffix(
                &changespec.file_path,
                &changespec.name,
                &hook_command,
                "Hook Command Failed",
                Some(SuffixKind::Error),
                None,
                None,
            ) {
                log::warn!("{}: {e}", changespec.name);
            }
            updates.push(format!("fix-hook workflow '{hook_command}' -> FAILED (exit {exit_code})"));
        }

        if let Some(num) = claim {
            release_claim(changespec, &workflow_name, num);
        }
    }

    // summarize-hook workflows (no workspace to release).
    for (hook_command, suffix, entry_id) in running_summarize_hook_workflows(changespec) {
        let Some(output_path) =
            workflow_output_path(&workflows_dir, &changespec.name, "summarize-hook", &suffix)
        else {
            continue;
        };
        let Some((_, exit_code)) = check_workflow_completion(&output_path) else {
            continue;
        };

        if exit_code == 0 {
            // The runner attached the summary suffix itself.
            updates.push(format!("summarize-hook workflow '{hook_command}' -> COMPLETED"));
        } else {
            if let Err(e) = hooks::set_hook_suffix(
                &changespec.file_path,
                &changespec.name,
                &hook_command,
                "Hook Command Failed",
                Some(SuffixKind::Error),
                Some(&entry_id),
                None,
            ) {
                log::warn!("{}: {e}", changespec.name);
            }
            updates.push(format!(
                "summarize-hook workflow '{hook_command}' -> FAILED (exit {exit_code})"
            ));
        }
    }

    updates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::vcs::testing::{FixedSummarizer, StubReviewTool, RecordingVcs};
    use crate::vcs::{ReviewTool, Summarizer, Vcs};
    use std::path::PathBuf;

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
        std::fs::create_dir_all(config.workflows_dir()).unwrap();
        std::fs::create_dir_all(config.workspace_root.join("proj1_100")).unwrap();
        let project = project_dir.join("proj1.gp");
        std::fs::write(&project, project_text).unwrap();
        Fixture {
            _dir: dir,
            config,
            vcs: RecordingVcs::default(),
            review: StubReviewTool,
            summarizer: FixedSummarizer("s".to_string()),
            project,
        }
    }

    const FIX_HOOK_PROJECT: &str = "\
NAME: alpha
STATUS: Drafted
COMMITS:
  (2) work
      | DIFF: ~/.gai/diffs/alpha-2.diff
  (2a) [fix-hook (2) bb_build] repair
      | DIFF: ~/.gai/diffs/alpha-2a.diff
HOOKS:
  bb_build
    (2) [251230_130000] FAILED - (@: fix_hook-251230_151429)
";

    #[test]
    fn fix_hook_success_auto_accepts_and_clears_suffix() {
        let f = fixture(FIX_HOOK_PROJECT);
        workspace::claim_workspace(&f.project, 100, "loop(fix-hook)-251230_151429", "alpha")
            .unwrap();
        std::fs::write(
            f.config.workflows_dir().join("alpha-fix-hook-251230_151429.txt"),
            "===WORKFLOW_COMPLETE=== PROPOSAL_ID: 2a EXIT_CODE: 0\n",
        )
        .unwrap();

        let updates = check_and_complete_workflows(&f.ctx(), &f.specs()[0]);
        assert!(
            updates.iter().any(|u| u.contains("auto-accepted (2a)")),
            "{updates:?}"
        );

        let specs = f.specs();
        let cs = &specs[0];
        // The proposal was promoted in place.
        let ids: Vec<_> = cs.commits.iter().map(|e| e.display_number()).collect();
        assert_eq!(ids, vec!["2"]);
        assert_eq!(cs.commits[0].note, "[fix-hook (2) bb_build] repair");
        // The hook suffix is cleared and the workspace released.
        assert!(cs.hooks[0].status_line_for_entry("2").unwrap().suffix.is_none());
        assert!(workspace::get_claimed_workspaces(&f.project).unwrap().is_empty());
        // The diff was applied and the commit amended.
        let calls = f.vcs.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "apply ~/.gai/diffs/alpha-2a.diff".to_string(),
                "amend [fix-hook (2) bb_build] repair".to_string(),
            ]
        );
    }

    #[test]
    fn fix_hook_failure_sets_error_suffix_and_releases() {
        let f = fixture(FIX_HOOK_PROJECT);
        workspace::claim_workspace(&f.project, 100, "loop(fix-hook)-251230_151429", "alpha")
            .unwrap();
        std::fs::write(
            f.config.workflows_dir().join("alpha-fix-hook-251230_151429.txt"),
            "===WORKFLOW_COMPLETE=== PROPOSAL_ID: None EXIT_CODE: 1\n",
        )
        .unwrap();

        let updates = check_and_complete_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.iter().any(|u| u.contains("FAILED (exit 1)")), "{updates:?}");

        let specs = f.specs();
        let suffix = specs[0].hooks[0].status_line_for_entry("2").unwrap().suffix.clone().unwrap();
        assert_eq!(suffix.kind, SuffixKind::Error);
        assert_eq!(suffix.text, "Hook Command Failed");
        assert!(workspace::get_claimed_workspaces(&f.project).unwrap().is_empty());
    }

    #[test]
    fn crs_failure_marks_unresolved_comments() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Mailed\nCOMMENTS:\n  [critique] ~/.gai/comments/a.json - (@: crs-251230_150000)\n",
        );
        workspace::claim_workspace(&f.project, 100, "loop(crs)-critique", "alpha").unwrap();
        std::fs::write(
            f.config.workflows_dir().join("alpha-crs-251230_150000.txt"),
            "===WORKFLOW_COMPLETE=== PROPOSAL_ID: None EXIT_CODE: 2\n",
        )
        .unwrap();

        let updates = check_and_complete_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.iter().any(|u| u.contains("FAILED (exit 2)")), "{updates:?}");

        let specs = f.specs();
        let suffix = specs[0].comments[0].suffix.clone().unwrap();
        assert_eq!(suffix.kind, SuffixKind::Error);
        assert_eq!(suffix.text, "Unresolved Critique Comments");
        assert!(workspace::get_claimed_workspaces(&f.project).unwrap().is_empty());
    }

    #[test]
    fn crs_success_without_proposal_clears_suffix() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Mailed\nCOMMENTS:\n  [critique] ~/.gai/comments/a.json - (@: crs-251230_150000)\n",
        );
        std::fs::write(
            f.config.workflows_dir().join("alpha-crs-251230_150000.txt"),
            "===WORKFLOW_COMPLETE=== PROPOSAL_ID: None EXIT_CODE: 0\n",
        )
        .unwrap();

        let updates = check_and_complete_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.iter().any(|u| u.contains("COMPLETED")), "{updates:?}");
        let specs = f.specs();
        assert!(specs[0].comments[0].suffix.is_none());
    }

    #[test]
    fn summarize_failure_sets_fallback_suffix() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (2) work\n  (2a) proposal\nHOOKS:\n  bb_build\n    (2a) [251230_140000] FAILED - (@: summarize_hook-251230_151500)\n",
        );
        std::fs::write(
            f.config.workflows_dir().join("alpha-summarize-hook-251230_151500.txt"),
            "===WORKFLOW_COMPLETE=== PROPOSAL_ID: None EXIT_CODE: 1\n",
        )
        .unwrap();

        let updates = check_and_complete_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.iter().any(|u| u.contains("FAILED (exit 1)")), "{updates:?}");
        let specs = f.specs();
        let suffix = specs[0].hooks[0].status_line_for_entry("2a").unwrap().suffix.clone().unwrap();
        assert_eq!(suffix.kind, SuffixKind::Error);
        assert_eq!(suffix.text, "Hook Command Failed");
    }

    #[test]
    fn in_flight_workflows_are_left_alone() {
        let f = fixture(FIX_HOOK_PROJECT);
        // No output file at all.
        let updates = check_and_complete_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.is_empty());
        let specs = f.specs();
        let suffix = specs[0].hooks[0].status_line_for_entry("2").unwrap().suffix.clone().unwrap();
        assert_eq!(suffix.kind, SuffixKind::RunningAgent);
    }
}
