//! Background hook execution.
//!
//! Each run is wrapped in a small shell script that banners the command,
//! runs it with stderr folded into stdout, and appends the completion
//! sentinel. The child is fully detached (new process group, output
//! redirected to a per-run file) so it survives supervisor restarts; the
//! supervisor reconstructs liveness from the record and the output file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::changespec::{HookEntry, HookRunStatus, HookStatusLine, Suffix};
use crate::error::{AceError, Result};
use crate::timestamps::{age_seconds, duration_between, format_duration};
use crate::vcs::Summarizer;

/// Final line written by the wrapper script.
pub const HOOK_COMPLETE_MARKER: &str = "===HOOK_COMPLETE=== END_TIMESTAMP: ";

/// Output file for one hook run: `<hooks_dir>/<safe-name>-<timestamp>.txt`.
pub fn hook_output_path(hooks_dir: &Path, name: &str, timestamp: &str) -> PathBuf {
    let safe_name = sanitize_filename::sanitize(name);
    hooks_dir.join(format!("{safe_name}-{timestamp}.txt"))
}

fn wrapper_script(command: &str) -> String {
    format!(
        r#"#!/bin/bash
echo "=== HOOK COMMAND ==="
echo "{command}"
echo "===================="
echo ""
{command} 2>&1
exit_code=$?
echo ""
end_timestamp=$(date +"%y%m%d_%H%M%S")
echo "{HOOK_COMPLETE_MARKER}$end_timestamp EXIT_CODE: $exit_code"
exit $exit_code
"#
    )
}

/// A freshly spawned hook run.
pub struct StartedHook {
    /// Process group id of the detached child.
    pub pgid: u32,
    pub output_path: PathBuf,
}

/// Spawn a hook command detached in the workspace.
///
/// The caller generates `timestamp` and persists the RUNNING status line
/// before spawning, so a line is never observed RUNNING without having
/// been written first. The wrapper script is kept on disk for the child's
/// lifetime; output goes to the per-run file. The child starts its own
/// session/process group so the whole pipeline can be signalled at once.
pub fn start_hook_background(
    hooks_dir: &Path,
    name: &str,
    hook: &HookEntry,
    workspace_dir: &Path,
    timestamp: &str,
) -> Result<StartedHook> {
    fs::create_dir_all(hooks_dir).map_err(|e| AceError::io(hooks_dir, e))?;
    let output_path = hook_output_path(hooks_dir, name, timestamp);

    let script = wrapper_script(hook.run_command());
    let wrapper_path = hooks_dir.join(format!(
        ".wrapper-{}-{timestamp}.sh",
        sanitize_filename::sanitize(name)
    ));
    let mut wrapper = fs::File::create(&wrapper_path).map_err(|e| AceError::io(&wrapper_path, e))?;
    wrapper
        .write_all(script.as_bytes())
        .map_err(|e| AceError::io(&wrapper_path, e))?;
    drop(wrapper);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&wrapper_path, fs::Permissions::from_mode(0o755))
            .map_err(|e| AceError::io(&wrapper_path, e))?;
    }

    let output_file = fs::File::create(&output_path).map_err(|e| AceError::io(&output_path, e))?;
    let stderr_file = output_file
        .try_clone()
        .map_err(|e| AceError::io(&output_path, e))?;

    let mut command = Command::new("bash");
    command
        .arg(&wrapper_path)
        .current_dir(workspace_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output_file))
        .stderr(Stdio::from(stderr_file));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AceError::MissingCommand("bash".to_string())
        } else {
            AceError::CommandFailed { command: hook.command.clone(), detail: e.to_string() }
        }
    })?;

    // The child leads its own group, so its pid doubles as the pgid.
    Ok(StartedHook { pgid: child.id(), output_path })
}

/// Build the RUNNING status line persisted before the child is considered
/// alive for liveness probing.
pub fn running_status_line(entry_id: &str, timestamp: &str) -> HookStatusLine {
    HookStatusLine {
        entry_id: entry_id.to_string(),
        timestamp: timestamp.to_string(),
        status: HookRunStatus::Running,
        duration: None,
        // Empty running-agent marker renders as "(@)"; the pgid suffix
        // replaces it once the spawn returns.
        suffix: Some(Suffix::running_agent("")),
    }
}

/// Outcome parsed from a completed run's output file.
#[derive(Debug, Clone, PartialEq)]
pub struct HookCompletion {
    pub status: HookRunStatus,
    pub duration: String,
    pub exit_code: i32,
}

/// Check the output file of a RUNNING status line for the completion
/// sentinel. `None` while the run is still in flight (or the file is
/// missing/unreadable).
pub fn check_hook_completion(
    output_path: &Path,
    start_timestamp: &str,
) -> Option<HookCompletion> {
    let content = fs::read_to_string(output_path).ok()?;
    let marker_pos = content.rfind(HOOK_COMPLETE_MARKER)?;

    let after = content[marker_pos + HOOK_COMPLETE_MARKER.len()..].trim();
    let mut parts = after.split_whitespace();
    let end_timestamp = parts.next();
    let exit_code = match (parts.next(), parts.next()) {
        (Some("EXIT_CODE:"), Some(code)) => code.parse().unwrap_or(1),
        _ => 1,
    };

    let duration_seconds = end_timestamp
        .and_then(|end| duration_between(start_timestamp, end))
        .or_else(|| age_seconds(start_timestamp));
    let duration = format_duration(duration_seconds.unwrap_or(0));

    let status = if exit_code == 0 { HookRunStatus::Passed } else { HookRunStatus::Failed };
    Some(HookCompletion { status, duration, exit_code })
}

/// Terminal suffix for a FAILED `!`-prefixed hook: the summariser's one-
/// line description of the output file, falling back to the canonical
/// failure message.
pub fn failed_hook_suffix(summarizer: &dyn Summarizer, output_path: &Path) -> Suffix {
    Suffix::error(summarizer.summarize(
        output_path,
        "a hook failure suffix in a COMMITS entry",
        "Hook Command Failed",
    ))
}
