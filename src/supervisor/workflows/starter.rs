//! Workflow starting.
//!
//! The supervisor only spawns and polls; the agents themselves are
//! external runner binaries that inherit the same record-file contract
//! and end their output with the workflow sentinel. Each start marks the
//! owning record with a `<agent>-<timestamp>` running-agent suffix
//! before the child is launched.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::changespec::{ChangeSpec, SuffixKind};
use crate::comments;
use crate::error::{AceError, Result};
use crate::hooks::{self, execution};
use crate::timestamps::generate_timestamp;
use crate::workspace;

use super::super::Ctx;

/// Runner binaries for the three workflow families.
const FIX_HOOK_RUNNER: &str = "ace-fix-hook-runner";
const SUMMARIZE_HOOK_RUNNER: &str = "ace-summarize-hook-runner";
const CRS_RUNNER: &str = "ace-crs-runner";

/// Start every workflow this ChangeSpec is due for. Returns update
/// messages.
pub fn start_stale_workflows(ctx: &Ctx<'_>, changespec: &ChangeSpec) -> Vec<String> {
    let mut updates = Vec::new();
    if changespec.is_terminal() {
        return updates;
    }

    let entry_ids = crate::changespec::get_current_and_proposal_entry_ids(changespec);

    // summarize-hook: FAILED with no suffix, any entry kind.
    for (command, entry_id) in hooks::failing_entries_for_summarize(&changespec.hooks, &entry_ids) {
        match start_summarize_hook(ctx, changespec, &command, &entry_id) {
            Ok(()) => updates.push(format!("summarize-hook workflow '{command}' -> RUNNING")),
            Err(e) => log::warn!("{}: {e}", changespec.name),
        }
    }

    // fix-hook: FAILED on a regular entry with the summary already
    // attached.
    for (command, entry_id) in hooks::failing_entries_for_fix(&changespec.hooks, &entry_ids) {
        match start_fix_hook(ctx, changespec, &command, &entry_id) {
            Ok(()) => updates.push(format!("fix-hook workflow '{command}' -> RUNNING")),
            Err(e) => log::warn!("{}: {e}", changespec.name),
        }
    }

    // crs: a fresh comment artefact with no workflow state yet.
    if matches!(changespec.base_status().as_str(), "Mailed" | "Drafted") {
        for comment in &changespec.comments {
            if !matches!(comment.reviewer.as_str(), "critique" | "critique:me") {
                continue;
            }
            if comment.suffix.is_some() {
                continue;
            }
            match start_crs(ctx, changespec, &comment.reviewer, &comment.file_path) {
                Ok(()) => {
                    updates.push(format!("CRS workflow [{}] -> RUNNING", comment.reviewer))
                }
                Err(e) => log::warn!("{}: {e}", changespec.name),
            }
        }
    }

    updates
}

fn workflow_output_file(ctx: &Ctx<'_>, name: &str, kind: &str, timestamp: &str) -> Result<PathBuf> {
    let dir = ctx.config.workflows_dir();
    fs::create_dir_all(&dir).map_err(|e| AceError::io(&dir, e))?;
    let safe_name = sanitize_filename::sanitize(name);
    Ok(dir.join(format!("{safe_name}-{kind}-{timestamp}.txt")))
}

/// Spawn a runner binary detached with output redirected. A missing
/// binary surfaces as `MissingCommand` so the caller can leave state
/// untouched.
fn spawn_runner(program: &str, args: &[&str], output_path: &Path) -> Result<()> {
    let output_file = fs::File::create(output_path).map_err(|e| AceError::io(output_path, e))?;
    let stderr_file = output_file.try_clone().map_err(|e| AceError::io(output_path, e))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output_file))
        .stderr(Stdio::from(stderr_file));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AceError::MissingCommand(program.to_string())
        } else {
            AceError::CommandFailed { command: program.to_string(), detail: e.to_string() }
        }
    })?;
    Ok(())
}

fn start_summarize_hook(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    hook_command: &str,
    entry_id: &str,
) -> Result<()> {
    let hook = changespec
        .hook_by_command(hook_command)
        .ok_or_else(|| AceError::ConcurrentModification { name: changespec.name.to_string() })?;
    let failed_line = hook
        .status_line_for_entry(entry_id)
        .ok_or_else(|| AceError::ConcurrentModification { name: changespec.name.to_string() })?;

    let timestamp = generate_timestamp();
    let output_path = workflow_output_file(ctx, &changespec.name, "summarize-hook", &timestamp)?;
    let hook_output =
        execution::hook_output_path(&ctx.config.hooks_dir(), &changespec.name, &failed_line.timestamp);

    let project_file = changespec.file_path.to_string_lossy().into_owned();
    let hook_output = hook_output.to_string_lossy().into_owned();
    spawn_runner(
        SUMMARIZE_HOOK_RUNNER,
        &[&changespec.name, &project_file, hook_command, &hook_output, entry_id],
        &output_path,
    )?;

    hooks::set_hook_suffix(
        &changespec.file_path,
        &changespec.name,
        hook_command,
        &format!("summarize_hook-{timestamp}"),
        Some(SuffixKind::RunningAgent),
        Some(entry_id),
        None,
    )
}

fn start_fix_hook(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    hook_command: &str,
    entry_id: &str,
) -> Result<()> {
    let hook = changespec
        .hook_by_command(hook_command)
        .ok_or_else(|| AceError::ConcurrentModification { name: changespec.name.to_string() })?;
    let failed_line = hook
        .status_line_for_entry(entry_id)
        .ok_or_else(|| AceError::ConcurrentModification { name: changespec.name.to_string() })?;

    let timestamp = generate_timestamp();
    let workflow_name = format!("loop(fix-hook)-{timestamp}");

    let workspace_num = workspace::get_first_available_loop_workspace(&changespec.file_path)?;
    if !workspace::claim_workspace(
        &changespec.file_path,
        workspace_num,
        &workflow_name,
        &changespec.name,
    )? {
        return Err(AceError::CommandFailed {
            command: FIX_HOOK_RUNNER.to_string(),
            detail: format!("workspace {workspace_num} already claimed"),
        });
    }
    let release = || {
        let _ = workspace::release_workspace(
            &changespec.file_path,
            workspace_num,
            &workflow_name,
            &changespec.name,
        );
    };

    let workspace_dir = match workspace::workspace_directory(
        &ctx.config.workspace_root,
        &changespec.project_name(),
        workspace_num,
    ) {
        Ok(dir) => dir,
        Err(e) => {
            release();
            return Err(e);
        }
    };

    if let Err(e) = ctx.vcs.clean(&workspace_dir).and_then(|()| ctx.vcs.checkout(&workspace_dir, &changespec.name))
    {
        release();
        return Err(e);
    }

    let output_path = workflow_output_file(ctx, &changespec.name, "fix-hook", &timestamp)?;
    let hook_output =
        execution::hook_output_path(&ctx.config.hooks_dir(), &changespec.name, &failed_line.timestamp);

    let project_file = changespec.file_path.to_string_lossy().into_owned();
    let hook_output = hook_output.to_string_lossy().into_owned();
    let workspace_str = workspace_dir.to_string_lossy().into_owned();
    let num_str = workspace_num.to_string();
    if let Err(e) = spawn_runner(
        FIX_HOOK_RUNNER,
        &[
            &changespec.name,
            &project_file,
            hook_command,
            &hook_output,
            &workspace_str,
            &num_str,
            &workflow_name,
            entry_id,
        ],
        &output_path,
    ) {
        release();
        return Err(e);
    }

    hooks::set_hook_suffix(
        &changespec.file_path,
        &changespec.name,
        hook_command,
        &format!("fix_hook-{timestamp}"),
        Some(SuffixKind::RunningAgent),
        Some(entry_id),
        None,
    )
}

fn start_crs(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    reviewer: &str,
    comments_path: &str,
) -> Result<()> {
    let timestamp = generate_timestamp();
    let workflow_name = format!("loop(crs)-{reviewer}");

    let workspace_num = workspace::get_first_available_loop_workspace(&changespec.file_path)?;
    if !workspace::claim_workspace(
        &changespec.file_path,
        workspace_num,
        &workflow_name,
        &changespec.name,
    )? {
        return Err(AceError::CommandFailed {
            command: CRS_RUNNER.to_string(),
            detail: format!("workspace {workspace_num} already claimed"),
        });
    }
    let release = || {
        let _ = workspace::release_workspace(
            &changespec.file_path,
            workspace_num,
            &workflow_name,
            &changespec.name,
        );
    };

    let workspace_dir = match workspace::workspace_directory(
        &ctx.config.workspace_root,
        &changespec.project_name(),
        workspace_num,
    ) {
        Ok(dir) => dir,
        Err(e) => {
            release();
            return Err(e);
        }
    };

    if let Err(e) = ctx.vcs.clean(&workspace_dir).and_then(|()| ctx.vcs.checkout(&workspace_dir, &changespec.name))
    {
        release();
        return Err(e);
    }

    let output_path = workflow_output_file(ctx, &changespec.name, "crs", &timestamp)?;
    let project_file = changespec.file_path.to_string_lossy().into_owned();
    let workspace_str = workspace_dir.to_string_lossy().into_owned();
    let num_str = workspace_num.to_string();
    if let Err(e) = spawn_runner(
        CRS_RUNNER,
        &[
            &changespec.name,
            &project_file,
            reviewer,
            comments_path,
            &workspace_str,
            &num_str,
            &workflow_name,
        ],
        &output_path,
    ) {
        release();
        return Err(e);
    }

    comments::set_comment_suffix(
        &changespec.file_path,
        &changespec.name,
        reviewer,
        crate::changespec::Suffix::running_agent(format!("crs-{timestamp}")),
    )?;
    Ok(())
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

    #[test]
    fn missing_runner_binary_leaves_state_untouched() {
        // The runner binaries do not exist in the test environment, so a
        // start attempt must leave no suffix and no claim behind.
        let f = fixture(
            "NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (2) work\nHOOKS:\n  bb_build\n    (2) [251230_130000] FAILED - (%: tests red)\n",
        );
        let updates = start_stale_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.is_empty(), "{updates:?}");

        let specs = f.specs();
        let suffix = specs[0].hooks[0].status_line_for_entry("2").unwrap().suffix.clone().unwrap();
        // Still the summarize-complete marker, not a running agent.
        assert_eq!(suffix.kind, SuffixKind::SummarizeComplete);
        assert!(workspace::get_claimed_workspaces(&f.project).unwrap().is_empty());
    }

    #[test]
    fn summarize_eligibility_does_not_fire_for_suffixed_lines() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Drafted\nCOMMITS:\n  (2) work\nHOOKS:\n  bb_build\n    (2) [251230_130000] FAILED - (!: Hook Command Failed)\n",
        );
        let updates = start_stale_workflows(&f.ctx(), &f.specs()[0]);
        assert!(updates.is_empty());
    }

    #[test]
    fn terminal_records_start_nothing() {
        let f = fixture(
            "NAME: alpha\nSTATUS: Submitted\nCOMMITS:\n  (2) work\nHOOKS:\n  bb_build\n    (2) [251230_130000] FAILED\n",
        );
        assert!(start_stale_workflows(&f.ctx(), &f.specs()[0]).is_empty());
    }
}
