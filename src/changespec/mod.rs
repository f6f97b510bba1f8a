//! ChangeSpec data model.
//!
//! A project file holds zero or more ChangeSpec records in a line-oriented
//! text format; this module owns the in-memory shape of those records plus
//! the small helpers (entry ids, base status) the rest of the crate leans
//! on. Parsing and formatting live in the sibling modules.

use std::path::{Path, PathBuf};

mod format;
mod parser;
pub mod suffix;
mod validation;

pub use format::{
    format_comments_field, format_commit_entry_line, format_commits_field, format_hooks_field,
};
pub use parser::{parse_project_file, parse_project_str};
pub use suffix::{Suffix, SuffixKind, ERROR_SUFFIX_MESSAGES};
pub use validation::{
    all_hooks_passed_for_entries, get_current_and_proposal_entry_ids, has_any_error_suffix,
    has_any_suffix, is_parent_ready_for_mail,
};

/// Rendered READY TO MAIL decoration on a STATUS line.
pub const READY_TO_MAIL_SUFFIX: &str = " - (!: READY TO MAIL)";

/// Terminal status of a single hook run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HookRunStatus {
    Running,
    Passed,
    Failed,
    Dead,
    Zombie,
    Killed,
}

/// One entry in the COMMITS field: an accepted revision `(N)` or a
/// tentative proposal `(Na)`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitEntry {
    pub number: u32,
    /// `Some('a')` for proposal entries; proposals are alternatives to the
    /// accepted entry with the same number.
    pub proposal_letter: Option<char>,
    pub note: String,
    pub chat: Option<String>,
    pub diff: Option<String>,
    pub suffix: Option<Suffix>,
}

impl CommitEntry {
    pub fn is_proposed(&self) -> bool {
        self.proposal_letter.is_some()
    }

    /// Display id, e.g. `"2"` or `"2a"`.
    pub fn display_number(&self) -> String {
        match self.proposal_letter {
            Some(letter) => format!("{}{}", self.number, letter),
            None => self.number.to_string(),
        }
    }
}

/// One status line under a hook command, tied to a specific commit entry.
#[derive(Debug, Clone, PartialEq)]
pub struct HookStatusLine {
    /// Commit entry id this run verified (e.g. `"1"`, `"1a"`).
    pub entry_id: String,
    /// Start timestamp in `YYmmdd_HHMMSS` form.
    pub timestamp: String,
    pub status: HookRunStatus,
    /// Formatted duration (e.g. `"1m23s"`), present once terminal.
    pub duration: Option<String>,
    pub suffix: Option<Suffix>,
}

/// One hook command with its per-entry status lines.
///
/// Up to two leading prefix characters decorate the command: `!` disables
/// fix-hook on failure, `$` skips the hook on proposal entries.
#[derive(Debug, Clone, PartialEq)]
pub struct HookEntry {
    pub command: String,
    pub status_lines: Vec<HookStatusLine>,
}

impl HookEntry {
    pub fn new(command: impl Into<String>) -> Self {
        HookEntry { command: command.into(), status_lines: Vec::new() }
    }

    fn prefix(&self) -> &str {
        let end = self.command.find(|c| c != '!' && c != '$').unwrap_or(self.command.len());
        &self.command[..end]
    }

    /// `!` prefix: a FAILED run gets a summarised error suffix instead of
    /// triggering the fix-hook workflow.
    pub fn skip_fix_hook(&self) -> bool {
        self.prefix().contains('!')
    }

    /// `$` prefix: the hook never runs against proposal entries.
    pub fn skip_proposal_runs(&self) -> bool {
        self.prefix().contains('$')
    }

    /// Command with prefixes stripped, as shown to users.
    pub fn display_command(&self) -> &str {
        &self.command[self.prefix().len()..]
    }

    /// Command with prefixes stripped, as actually executed.
    pub fn run_command(&self) -> &str {
        self.display_command()
    }

    /// Most recent status line, ordered by parsed entry id.
    pub fn latest_status_line(&self) -> Option<&HookStatusLine> {
        self.status_lines.iter().max_by_key(|sl| parse_entry_id(&sl.entry_id))
    }

    pub fn status_line_for_entry(&self, entry_id: &str) -> Option<&HookStatusLine> {
        self.status_lines.iter().find(|sl| sl.entry_id == entry_id)
    }

    pub fn has_any_running_status(&self) -> bool {
        self.status_lines.iter().any(|sl| sl.status == HookRunStatus::Running)
    }

    /// Status of the latest line (convenience accessor).
    pub fn status(&self) -> Option<HookRunStatus> {
        self.latest_status_line().map(|sl| sl.status)
    }
}

/// One entry in the COMMENTS field.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentEntry {
    /// Reviewer tag, e.g. `critique` or `critique:me`.
    pub reviewer: String,
    /// Path to the JSON artefact, stored with `~` for home.
    pub file_path: String,
    pub suffix: Option<Suffix>,
}

/// One pending code change and all its derived state.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSpec {
    pub name: String,
    pub description: String,
    /// Name of another ChangeSpec in the same project set, if any.
    pub parent: Option<String>,
    /// URL of the external review artefact.
    pub cl: Option<String>,
    /// Raw STATUS value, possibly decorated with a suffix.
    pub status: String,
    pub test_targets: Vec<String>,
    pub kickstart: Option<String>,
    pub commits: Vec<CommitEntry>,
    pub hooks: Vec<HookEntry>,
    pub comments: Vec<CommentEntry>,
    /// Provenance; not persisted.
    pub file_path: PathBuf,
    /// 1-based line of the starting `NAME:`; not persisted.
    pub line_number: usize,
}

impl ChangeSpec {
    /// Base status with the READY TO MAIL marker and any trailing
    /// workspace annotation `" (<project>_<N>)"` stripped.
    pub fn base_status(&self) -> String {
        base_status(&self.status)
    }

    pub fn has_ready_to_mail_suffix(&self) -> bool {
        has_ready_to_mail_suffix(&self.status)
    }

    /// Whether the base status is terminal (Reverted or Submitted).
    pub fn is_terminal(&self) -> bool {
        matches!(self.base_status().as_str(), "Reverted" | "Submitted")
    }

    /// Project basename derived from the file path
    /// (`.../projects/<project>/<project>.gp`).
    pub fn project_name(&self) -> String {
        project_name_of(&self.file_path)
    }

    /// Display id of the last commit entry, if any.
    pub fn last_commit_entry_id(&self) -> Option<String> {
        self.commits.last().map(|entry| entry.display_number())
    }

    pub fn commit_entry_by_id(&self, entry_id: &str) -> Option<&CommitEntry> {
        self.commits.iter().find(|entry| entry.display_number() == entry_id)
    }

    pub fn hook_by_command(&self, command: &str) -> Option<&HookEntry> {
        self.hooks.iter().find(|hook| hook.command == command)
    }

    pub fn comment_by_reviewer(&self, reviewer: &str) -> Option<&CommentEntry> {
        self.comments.iter().find(|comment| comment.reviewer == reviewer)
    }
}

/// Project basename for a project file path.
pub fn project_name_of(file_path: &Path) -> String {
    file_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn has_ready_to_mail_suffix(status: &str) -> bool {
    status.contains("(!: READY TO MAIL)")
}

/// Strip the READY TO MAIL marker and workspace annotation from a raw
/// STATUS value.
pub fn base_status(status: &str) -> String {
    let stripped = status.replace(READY_TO_MAIL_SUFFIX, "");
    let stripped = stripped.trim();
    // Workspace annotation: " (<project>_<N>)" appended by interactive tasks.
    static WORKSPACE_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = WORKSPACE_RE
        .get_or_init(|| regex::Regex::new(r" \([A-Za-z0-9_-]+_\d+\)$").expect("static regex"));
    re.replace(stripped, "").trim().to_string()
}

/// Sort key for a commit entry id: `"1"` -> (1, ""), `"1a"` -> (1, "a").
pub fn parse_entry_id(entry_id: &str) -> (u32, String) {
    static ENTRY_RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = ENTRY_RE.get_or_init(|| regex::Regex::new(r"^(\d+)([a-z]?)$").expect("static regex"));
    match re.captures(entry_id) {
        Some(caps) => {
            let number = caps[1].parse().unwrap_or(0);
            (number, caps[2].to_string())
        }
        None => (0, entry_id.to_string()),
    }
}

/// Whether an entry id names a proposal (trailing lowercase letter).
pub fn is_proposal_entry(entry_id: &str) -> bool {
    entry_id.chars().last().is_some_and(|c| c.is_ascii_lowercase())
}

/// Split a proposal id like `"2a"` into its number and letter.
pub fn parse_proposal_id(entry_id: &str) -> Option<(u32, char)> {
    let letter = entry_id.chars().last().filter(|c| c.is_ascii_lowercase())?;
    let number = entry_id[..entry_id.len() - 1].parse().ok()?;
    Some((number, letter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", (1, ""))]
    #[case("1a", (1, "a"))]
    #[case("12b", (12, "b"))]
    #[case("junk!", (0, "junk!"))]
    fn entry_id_keys(#[case] id: &str, #[case] expected: (u32, &str)) {
        let (num, letter) = parse_entry_id(id);
        assert_eq!((num, letter.as_str()), expected);
    }

    #[test]
    fn proposal_ids() {
        assert!(is_proposal_entry("2a"));
        assert!(!is_proposal_entry("2"));
        assert_eq!(parse_proposal_id("2a"), Some((2, 'a')));
        assert_eq!(parse_proposal_id("2"), None);
    }

    #[test]
    fn hook_prefixes() {
        let hook = HookEntry::new("!$bb_presubmit check");
        assert!(hook.skip_fix_hook());
        assert!(hook.skip_proposal_runs());
        assert_eq!(hook.display_command(), "bb_presubmit check");

        let plain = HookEntry::new("bb_build");
        assert!(!plain.skip_fix_hook());
        assert!(!plain.skip_proposal_runs());
        assert_eq!(plain.run_command(), "bb_build");
    }

    #[test]
    fn latest_status_line_orders_by_entry_id() {
        let mut hook = HookEntry::new("bb_build");
        for id in ["1", "2a", "2"] {
            hook.status_lines.push(HookStatusLine {
                entry_id: id.to_string(),
                timestamp: "251231_140000".to_string(),
                status: HookRunStatus::Passed,
                duration: None,
                suffix: None,
            });
        }
        assert_eq!(hook.latest_status_line().unwrap().entry_id, "2a");
    }

    #[rstest]
    #[case("Drafted", "Drafted")]
    #[case("Drafted - (!: READY TO MAIL)", "Drafted")]
    #[case("Drafted (fig_1)", "Drafted")]
    #[case("Mailed (my-proj_12)", "Mailed")]
    #[case("Pre-Mailed", "Pre-Mailed")]
    fn base_status_strips_decorations(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(base_status(raw), expected);
    }

    #[test]
    fn hook_run_status_strings() {
        assert_eq!(HookRunStatus::Running.to_string(), "RUNNING");
        assert_eq!("PASSED".parse::<HookRunStatus>().unwrap(), HookRunStatus::Passed);
        assert!("passed".parse::<HookRunStatus>().is_err());
    }
}
