//! Seams to the external version-control, review, and summariser tools.
//!
//! The supervisor only ever shells out: checkout/clean/apply/amend go
//! through the `bb_hg_*` family, review probes through `is_cl_submitted`
//! and `critique_comments`, and failure summaries through the summariser
//! binary. Traits keep the loop testable without any of those installed.

use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::{AceError, Result};

/// Timeout for synchronous VCS commands (checkout can pull).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Version-control operations performed inside a workspace directory.
pub trait Vcs {
    /// Check out the named change's head in the workspace.
    fn checkout(&self, workspace: &Path, name: &str) -> Result<()>;
    /// Discard uncommitted changes in the workspace.
    fn clean(&self, workspace: &Path) -> Result<()>;
    /// Import a diff without committing it.
    fn apply_patch(&self, workspace: &Path, diff_path: &str) -> Result<()>;
    /// Amend the checked-out commit with a new note.
    fn amend(&self, workspace: &Path, note: &str) -> Result<()>;
}

/// Review-platform probes.
///
/// Probes run as detached background children (the loop never blocks on
/// them), so this seam hands out the command lines rather than running
/// anything itself.
pub trait ReviewTool {
    /// Shell command that exits 0 iff the CL is submitted.
    fn submission_probe(&self, cl_number: &str) -> String;
    /// Shell command that prints the reviewer's comment payload (empty
    /// output means no comments).
    fn comments_probe(&self, name: &str, reviewer: &str) -> String;
}

/// Summariser for hook output files.
pub trait Summarizer {
    /// A short description of the file's contents; `fallback` on any
    /// failure.
    fn summarize(&self, file: &Path, usage: &str, fallback: &str) -> String;
}

/// Run a command to completion with the shared timeout, capturing output.
fn run_with_timeout(mut command: Command, label: &str) -> Result<(i32, String)> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AceError::MissingCommand(label.to_string())
        } else {
            AceError::CommandFailed { command: label.to_string(), detail: e.to_string() }
        }
    })?;

    let status = child
        .wait_timeout(COMMAND_TIMEOUT)
        .map_err(|e| AceError::CommandFailed { command: label.to_string(), detail: e.to_string() })?;

    let status = match status {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(AceError::CommandFailed {
                command: label.to_string(),
                detail: "timed out".to_string(),
            });
        }
    };

    let mut output = String::new();
    if let Some(mut stdout) = child.stdout.take() {
        use std::io::Read;
        let _ = stdout.read_to_string(&mut output);
    }
    if let Some(mut stderr) = child.stderr.take() {
        use std::io::Read;
        let mut err_text = String::new();
        let _ = stderr.read_to_string(&mut err_text);
        if output.trim().is_empty() {
            output = err_text;
        }
    }

    Ok((status.code().unwrap_or(1), output))
}

fn expect_success(command: Command, label: &str) -> Result<()> {
    let (code, output) = run_with_timeout(command, label)?;
    if code != 0 {
        let detail = output.trim();
        return Err(AceError::CommandFailed {
            command: label.to_string(),
            detail: if detail.is_empty() { "no error output".to_string() } else { detail.to_string() },
        });
    }
    Ok(())
}

/// Shelling implementation of [`Vcs`] over the `bb_hg_*` commands.
#[derive(Debug, Clone, Default)]
pub struct ShellVcs;

impl Vcs for ShellVcs {
    fn checkout(&self, workspace: &Path, name: &str) -> Result<()> {
        let mut cmd = Command::new("bb_hg_update");
        cmd.arg(name).current_dir(workspace);
        expect_success(cmd, "bb_hg_update")
    }

    fn clean(&self, workspace: &Path) -> Result<()> {
        let mut cmd = Command::new("bb_hg_clean");
        cmd.current_dir(workspace);
        expect_success(cmd, "bb_hg_clean")
    }

    fn apply_patch(&self, workspace: &Path, diff_path: &str) -> Result<()> {
        let expanded = shellexpand::tilde(diff_path).into_owned();
        let mut cmd = Command::new("bb_hg_import");
        cmd.arg("--no-commit").arg(&expanded).current_dir(workspace);
        expect_success(cmd, "bb_hg_import")
    }

    fn amend(&self, workspace: &Path, note: &str) -> Result<()> {
        let mut cmd = Command::new("bb_hg_amend");
        cmd.arg(note).current_dir(workspace);
        expect_success(cmd, "bb_hg_amend")
    }
}

/// Shelling implementation of [`ReviewTool`] over `is_cl_submitted` and
/// `critique_comments`.
#[derive(Debug, Clone, Default)]
pub struct ShellReviewTool;

impl ReviewTool for ShellReviewTool {
    fn submission_probe(&self, cl_number: &str) -> String {
        format!("is_cl_submitted {cl_number}")
    }

    fn comments_probe(&self, name: &str, reviewer: &str) -> String {
        if reviewer == "critique:me" {
            format!("critique_comments --self {name}")
        } else {
            format!("critique_comments {name}")
        }
    }
}

/// Shelling implementation of [`Summarizer`].
#[derive(Debug, Clone, Default)]
pub struct ShellSummarizer;

impl Summarizer for ShellSummarizer {
    fn summarize(&self, file: &Path, usage: &str, fallback: &str) -> String {
        let mut cmd = Command::new("gai_summarize");
        cmd.arg("--usage").arg(usage).arg(file);
        match run_with_timeout(cmd, "gai_summarize") {
            Ok((0, output)) => {
                let summary = output.trim();
                if summary.is_empty() { fallback.to_string() } else { summary.to_string() }
            }
            _ => fallback.to_string(),
        }
    }
}

/// Extract the integer id from a CL URL like `http://cl/123456789`.
pub fn extract_cl_number(cl_url: &str) -> Option<&str> {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE
        .get_or_init(|| regex::Regex::new(r"^https?://cl/(\d+)").expect("static regex"));
    re.captures(cl_url).and_then(|caps| caps.get(1)).map(|m| m.as_str())
}
