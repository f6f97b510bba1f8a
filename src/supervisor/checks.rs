//! Background check poller.
//!
//! Slow external probes (submission status, critique comments) never run
//! inline: the full cycle spawns them as detached children writing to
//! per-check output files, and the fast cycle polls those files for the
//! completion sentinel. Each check is started at most once per
//! ChangeSpec at a time and honours a per-name debounce.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::changespec::{ChangeSpec, CommentEntry};
use crate::comments;
use crate::error::{AceError, Result};
use crate::status::{transition_changespec_status, Status};
use crate::timestamps::{self, generate_timestamp};
use crate::workspace;

use super::Ctx;

/// Final line written by a check's wrapper.
pub const CHECK_COMPLETE_MARKER: &str = "===CHECK_COMPLETE=== EXIT_CODE: ";

/// Statuses whose submission state is worth probing.
const SYNCABLE_STATUSES: [&str; 1] = ["Mailed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CheckKind {
    ClSubmitted,
    ReviewerComments,
    AuthorComments,
}

#[derive(Debug, Clone)]
struct PendingCheck {
    output_path: PathBuf,
}

/// In-memory state of the poller: the pending set plus the last-checked
/// debounce cache. Single-threaded; no locking.
pub struct CheckTracker {
    pending: HashMap<(String, CheckKind), PendingCheck>,
    last_checked: HashMap<String, Instant>,
    debounce: Duration,
}

impl CheckTracker {
    pub fn new(debounce: Duration) -> Self {
        CheckTracker { pending: HashMap::new(), last_checked: HashMap::new(), debounce }
    }

    fn should_check(&self, name: &str) -> bool {
        match self.last_checked.get(name) {
            Some(at) => at.elapsed() >= self.debounce,
            None => true,
        }
    }

    fn has_pending(&self, name: &str, kind: CheckKind) -> bool {
        self.pending.contains_key(&(name.to_string(), kind))
    }

    /// Drop cache entries for names no longer present anywhere.
    pub fn prune(&mut self, all: &[ChangeSpec]) {
        let names: HashSet<&str> = all.iter().map(|cs| cs.name.as_str()).collect();
        self.pending.retain(|(name, _), _| names.contains(name.as_str()));
        self.last_checked.retain(|name, _| names.contains(name.as_str()));
    }

    /// Start whichever checks are due for this ChangeSpec.
    pub fn start_pending_checks(
        &mut self,
        ctx: &Ctx<'_>,
        changespec: &ChangeSpec,
        all: &[ChangeSpec],
        bypass_cache: bool,
    ) -> Vec<String> {
        let mut updates = Vec::new();
        let workspace_dir = primary_workspace(ctx, changespec);
        let parent_submitted = is_parent_submitted(changespec, all);
        let base_status = changespec.base_status();

        let syncable = SYNCABLE_STATUSES.contains(&base_status.as_str())
            && (bypass_cache || self.should_check(&changespec.name));

        if syncable {
            if parent_submitted
                && changespec.cl.is_some()
                && !self.has_pending(&changespec.name, CheckKind::ClSubmitted)
            {
                self.last_checked.insert(changespec.name.clone(), Instant::now());
                match self.start_check(ctx, changespec, CheckKind::ClSubmitted, workspace_dir.as_deref())
                {
                    Ok(()) => updates.push("Started CL submission check".to_string()),
                    Err(e) => log::warn!("{}: {e}", changespec.name),
                }
            }

            if parent_submitted
                && base_status == "Mailed"
                && !self.has_pending(&changespec.name, CheckKind::ReviewerComments)
                && comment_check_wanted(changespec, "critique")
            {
                match self.start_check(
                    ctx,
                    changespec,
                    CheckKind::ReviewerComments,
                    workspace_dir.as_deref(),
                ) {
                    Ok(()) => updates.push("Started reviewer comments check".to_string()),
                    Err(e) => log::warn!("{}: {e}", changespec.name),
                }
            }
        }

        if matches!(base_status.as_str(), "Drafted" | "Mailed")
            && !self.has_pending(&changespec.name, CheckKind::AuthorComments)
            && changespec.comment_by_reviewer("critique").is_none()
            && comment_check_wanted(changespec, "critique:me")
        {
            match self.start_check(ctx, changespec, CheckKind::AuthorComments, workspace_dir.as_deref())
            {
                Ok(()) => updates.push("Started author comments check".to_string()),
                Err(e) => log::warn!("{}: {e}", changespec.name),
            }
        }

        updates
    }

    fn start_check(
        &mut self,
        ctx: &Ctx<'_>,
        changespec: &ChangeSpec,
        kind: CheckKind,
        workspace_dir: Option<&Path>,
    ) -> Result<()> {
        let checks_dir = ctx.config.checks_dir();
        fs::create_dir_all(&checks_dir).map_err(|e| AceError::io(&checks_dir, e))?;

        let timestamp = generate_timestamp();
        let safe_name = sanitize_filename::sanitize(&changespec.name);
        let output_path = checks_dir.join(format!("{safe_name}-{kind}-{timestamp}.txt"));

        let probe = match kind {
            CheckKind::ClSubmitted => {
                let cl_number = changespec
                    .cl
                    .as_deref()
                    .and_then(crate::vcs::extract_cl_number)
                    .unwrap_or_default();
                ctx.review.submission_probe(cl_number)
            }
            CheckKind::ReviewerComments => ctx.review.comments_probe(&changespec.name, "critique"),
            CheckKind::AuthorComments => {
                ctx.review.comments_probe(&changespec.name, "critique:me")
            }
        };
        let script = format!("{probe}\necho \"{CHECK_COMPLETE_MARKER}$?\"");

        let output_file =
            fs::File::create(&output_path).map_err(|e| AceError::io(&output_path, e))?;
        let stderr_file = output_file.try_clone().map_err(|e| AceError::io(&output_path, e))?;

        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::from(stderr_file));
        if let Some(dir) = workspace_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AceError::MissingCommand("bash".to_string())
            } else {
                AceError::CommandFailed { command: probe.clone(), detail: e.to_string() }
            }
        })?;

        self.pending
            .insert((changespec.name.clone(), kind), PendingCheck { output_path });
        Ok(())
    }

    /// Poll pending checks for this ChangeSpec; handle any that finished.
    pub fn poll_pending_checks(
        &mut self,
        ctx: &Ctx<'_>,
        changespec: &ChangeSpec,
        all: &[ChangeSpec],
    ) -> Vec<String> {
        let mut updates = Vec::new();
        let kinds =
            [CheckKind::ClSubmitted, CheckKind::ReviewerComments, CheckKind::AuthorComments];

        for kind in kinds {
            let key = (changespec.name.clone(), kind);
            let Some(pending) = self.pending.get(&key) else { continue };
            let Some((exit_code, payload)) = read_check_result(&pending.output_path) else {
                continue;
            };
            self.pending.remove(&key);

            let result = match kind {
                CheckKind::ClSubmitted => {
                    handle_cl_submitted(changespec, all, exit_code, &mut self.last_checked)
                }
                CheckKind::ReviewerComments => {
                    handle_comments_result(ctx, changespec, "critique", exit_code, &payload)
                }
                CheckKind::AuthorComments => {
                    handle_comments_result(ctx, changespec, "critique:me", exit_code, &payload)
                }
            };
            match result {
                Ok(Some(update)) => updates.push(update),
                Ok(None) => {}
                Err(e) => log::warn!("{} {kind} check: {e}", changespec.name),
            }
        }

        updates
    }
}

/// Parse a check output file: exit code from the sentinel plus the
/// payload that precedes it. `None` while still running.
fn read_check_result(output_path: &Path) -> Option<(i32, String)> {
    let content = fs::read_to_string(output_path).ok()?;
    let marker_pos = content.rfind(CHECK_COMPLETE_MARKER)?;
    let exit_code = content[marker_pos + CHECK_COMPLETE_MARKER.len()..]
        .trim()
        .parse()
        .unwrap_or(1);
    Some((exit_code, content[..marker_pos].trim().to_string()))
}

fn handle_cl_submitted(
    changespec: &ChangeSpec,
    all: &[ChangeSpec],
    exit_code: i32,
    last_checked: &mut HashMap<String, Instant>,
) -> Result<Option<String>> {
    if exit_code != 0 || !is_parent_submitted(changespec, all) {
        return Ok(None);
    }
    let old = transition_changespec_status(
        &changespec.file_path,
        &changespec.name,
        Status::Submitted,
        false,
    )?;
    last_checked.remove(&changespec.name);
    Ok(old.map(|old| format!("Status changed {old} -> Submitted")))
}

fn handle_comments_result(
    ctx: &Ctx<'_>,
    changespec: &ChangeSpec,
    reviewer: &str,
    exit_code: i32,
    payload: &str,
) -> Result<Option<String>> {
    if exit_code != 0 || payload.is_empty() {
        return Ok(None);
    }

    let comments_dir = ctx.config.comments_dir();
    fs::create_dir_all(&comments_dir).map_err(|e| AceError::io(&comments_dir, e))?;
    let timestamp = generate_timestamp();
    let artefact =
        comments::comments_file_path(&comments_dir, &changespec.name, reviewer, &timestamp);
    fs::write(&artefact, payload).map_err(|e| AceError::io(&artefact, e))?;

    comments::add_comment_entry(
        &changespec.file_path,
        &changespec.name,
        CommentEntry {
            reviewer: reviewer.to_string(),
            file_path: comments::tilde_path(&artefact),
            suffix: None,
        },
    )?;
    Ok(Some(format!("Saved [{reviewer}] comments")))
}

/// Whether a new comments check should start for this reviewer: no entry
/// yet, or an entry whose suffix is terminal (not a running-workflow
/// timestamp).
fn comment_check_wanted(changespec: &ChangeSpec, reviewer: &str) -> bool {
    match changespec.comment_by_reviewer(reviewer) {
        None => true,
        Some(entry) => match &entry.suffix {
            Some(suffix) => timestamps::suffix_timestamp(&suffix.text).is_none(),
            None => false,
        },
    }
}

/// Whether the parent is Submitted (or absent / vanished).
pub fn is_parent_submitted(changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    let Some(parent_name) = &changespec.parent else {
        return true;
    };
    match all.iter().find(|cs| &cs.name == parent_name) {
        Some(parent) => parent.base_status() == "Submitted",
        None => true,
    }
}

/// The project's primary workspace (`<root>/<project>_1`), used as the
/// working directory for external probes when it exists.
fn primary_workspace(ctx: &Ctx<'_>, changespec: &ChangeSpec) -> Option<PathBuf> {
    workspace::workspace_directory(&ctx.config.workspace_root, &changespec.project_name(), 1).ok()
}
