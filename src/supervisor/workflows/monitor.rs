//! Workflow completion detection.
//!
//! Agent workflows announce themselves through suffixes on the records
//! they work for: `fix_hook-<ts>` on a hook status line, `crs-<ts>` on a
//! comment entry. Legacy bare-timestamp suffixes from older runs are
//! still recognised. Terminal outcome is read from the output file's
//! sentinel line.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::changespec::{is_proposal_entry, ChangeSpec};
use crate::timestamps;

/// Sentinel line written by every workflow runner.
pub const WORKFLOW_COMPLETE_MARKER: &str = "===WORKFLOW_COMPLETE=== PROPOSAL_ID: ";

fn fix_hook_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^fix_hook-\d{6}_\d{6}$").expect("static regex"))
}

fn summarize_hook_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^summarize_hook-\d{6}_\d{6}$").expect("static regex"))
}

fn crs_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^crs-\d{6}_\d{6}$").expect("static regex"))
}

fn legacy_ts_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{6}_\d{6}$").expect("static regex"))
}

/// Output file for a workflow run, keyed by the bare timestamp inside
/// the suffix: `<workflows_dir>/<safe-name>-<kind>-<timestamp>.txt`.
pub fn workflow_output_path(
    workflows_dir: &Path,
    name: &str,
    kind: &str,
    suffix: &str,
) -> Option<PathBuf> {
    let timestamp = timestamps::suffix_timestamp(suffix)?;
    let safe_name = sanitize_filename::sanitize(name);
    Some(workflows_dir.join(format!("{safe_name}-{kind}-{timestamp}.txt")))
}

/// Terminal outcome of a workflow: `(proposal_id, exit_code)`. `None`
/// while the sentinel has not appeared.
pub fn check_workflow_completion(output_path: &Path) -> Option<(Option<String>, i32)> {
    let content = std::fs::read_to_string(output_path).ok()?;
    let marker_pos = content.rfind(WORKFLOW_COMPLETE_MARKER)?;

    let after = content[marker_pos + WORKFLOW_COMPLETE_MARKER.len()..].trim();
    let mut parts = after.split_whitespace();
    let proposal_id = match parts.next() {
        Some("None") | None => None,
        Some(id) => Some(id.to_string()),
    };
    let exit_code = match (parts.next(), parts.next()) {
        (Some("EXIT_CODE:"), Some(code)) => code.parse().unwrap_or(1),
        _ => 1,
    };
    Some((proposal_id, exit_code))
}

/// Running CRS workflows: `(reviewer, suffix)` pairs.
pub fn running_crs_workflows(changespec: &ChangeSpec) -> Vec<(String, String)> {
    let mut running = Vec::new();
    for entry in &changespec.comments {
        if !matches!(entry.reviewer.as_str(), "critique" | "critique:me") {
            continue;
        }
        let Some(suffix) = &entry.suffix else { continue };
        if crs_re().is_match(&suffix.text) || legacy_ts_re().is_match(&suffix.text) {
            running.push((entry.reviewer.clone(), suffix.text.clone()));
        }
    }
    running
}

/// Running fix-hook workflows: `(hook command, suffix)` pairs; only
/// non-proposal entries host fix-hook.
pub fn running_fix_hook_workflows(changespec: &ChangeSpec) -> Vec<(String, String)> {
    let mut running = Vec::new();
    for hook in &changespec.hooks {
        let Some(sl) = hook.latest_status_line() else { continue };
        let Some(suffix) = &sl.suffix else { continue };
        let matches =
            fix_hook_re().is_match(&suffix.text) || legacy_ts_re().is_match(&suffix.text);
        if matches && !is_proposal_entry(&sl.entry_id) {
            running.push((hook.command.clone(), suffix.text.clone()));
        }
    }
    running
}

/// Running summarize-hook workflows: `(hook command, suffix, entry_id)`.
pub fn running_summarize_hook_workflows(changespec: &ChangeSpec) -> Vec<(String, String, String)> {
    let mut running = Vec::new();
    for hook in &changespec.hooks {
        for sl in &hook.status_lines {
            let Some(suffix) = &sl.suffix else { continue };
            if summarize_hook_re().is_match(&suffix.text) {
                running.push((hook.command.clone(), suffix.text.clone(), sl.entry_id.clone()));
            }
        }
    }
    running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changespec::parse_project_str;

    #[test]
    fn sentinel_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        std::fs::write(&path, "log lines\n===WORKFLOW_COMPLETE=== PROPOSAL_ID: 2a EXIT_CODE: 0\n")
            .unwrap();
        assert_eq!(check_workflow_completion(&path), Some((Some("2a".to_string()), 0)));

        std::fs::write(&path, "===WORKFLOW_COMPLETE=== PROPOSAL_ID: None EXIT_CODE: 1\n").unwrap();
        assert_eq!(check_workflow_completion(&path), Some((None, 1)));

        std::fs::write(&path, "still working\n").unwrap();
        assert_eq!(check_workflow_completion(&path), None);
    }

    #[test]
    fn output_path_uses_bare_timestamp() {
        let path = workflow_output_path(
            Path::new("/tmp/workflows"),
            "alpha",
            "fix-hook",
            "fix_hook-251230_151429",
        )
        .unwrap();
        assert_eq!(path, Path::new("/tmp/workflows/alpha-fix-hook-251230_151429.txt"));
        // Legacy bare timestamp suffix works too.
        assert!(workflow_output_path(Path::new("/w"), "a", "crs", "251230_151429").is_some());
        assert!(workflow_output_path(Path::new("/w"), "a", "crs", "not a suffix").is_none());
    }

    #[test]
    fn detects_running_workflows() {
        let text = "\
NAME: alpha
STATUS: Mailed
HOOKS:
  bb_build
    (2) [251230_130000] FAILED - (@: fix_hook-251230_151429)
  bb_lint
    (2a) [251230_140000] FAILED - (@: summarize_hook-251230_151500)
  bb_test
    (2) [251230_140500] FAILED - (!: Hook Command Failed)
COMMENTS:
  [critique] ~/.gai/comments/a.json - (@: crs-251230_150000)
  [critique:me] ~/.gai/comments/b.json - (@: 251230_150100)
";
        let specs = parse_project_str(text, Path::new("p.gp"));
        let cs = &specs[0];

        assert_eq!(
            running_fix_hook_workflows(cs),
            vec![("bb_build".to_string(), "fix_hook-251230_151429".to_string())]
        );
        assert_eq!(
            running_summarize_hook_workflows(cs),
            vec![(
                "bb_lint".to_string(),
                "summarize_hook-251230_151500".to_string(),
                "2a".to_string()
            )]
        );
        // Both the modern and legacy comment suffix forms count.
        assert_eq!(
            running_crs_workflows(cs),
            vec![
                ("critique".to_string(), "crs-251230_150000".to_string()),
                ("critique:me".to_string(), "251230_150100".to_string()),
            ]
        );
    }
}
