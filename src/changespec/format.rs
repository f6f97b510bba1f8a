//! Field-block formatting.
//!
//! The writer side of the round trip: every form the parser accepts is
//! re-emitted in canonical shape (modern timestamps, sorted status lines,
//! suffix prefixes per kind).

use super::{parse_entry_id, CommentEntry, CommitEntry, HookEntry};

/// Format the HOOKS field, header line included.
///
/// Status lines are emitted sorted by commit entry id so a hook's runs
/// read in order regardless of when they were appended.
pub fn format_hooks_field(hooks: &[HookEntry]) -> Vec<String> {
    if hooks.is_empty() {
        return Vec::new();
    }

    let mut lines = vec!["HOOKS:".to_string()];
    for hook in hooks {
        lines.push(format!("  {}", hook.command));
        let mut status_lines: Vec<_> = hook.status_lines.iter().collect();
        status_lines.sort_by_key(|sl| parse_entry_id(&sl.entry_id));
        for sl in status_lines {
            let mut line = format!("    ({}) [{}] {}", sl.entry_id, sl.timestamp, sl.status);
            if let Some(duration) = &sl.duration {
                line.push_str(&format!(" ({duration})"));
            }
            if let Some(suffix) = &sl.suffix {
                line.push_str(&suffix.render());
            }
            lines.push(line);
        }
    }
    lines
}

/// Format the COMMENTS field, header line included.
pub fn format_comments_field(comments: &[CommentEntry]) -> Vec<String> {
    if comments.is_empty() {
        return Vec::new();
    }

    let mut lines = vec!["COMMENTS:".to_string()];
    for comment in comments {
        let mut line = format!("  [{}] {}", comment.reviewer, comment.file_path);
        if let Some(suffix) = &comment.suffix {
            line.push_str(&suffix.render());
        }
        lines.push(line);
    }
    lines
}

/// Format a single commit entry line (without its CHAT/DIFF continuations).
pub fn format_commit_entry_line(entry: &CommitEntry) -> String {
    let mut line = format!("  ({}) {}", entry.display_number(), entry.note);
    if let Some(suffix) = &entry.suffix {
        line.push_str(&suffix.render());
    }
    line
}

/// Format the COMMITS field, header line and CHAT/DIFF continuations
/// included.
pub fn format_commits_field(entries: &[CommitEntry]) -> Vec<String> {
    if entries.is_empty() {
        return Vec::new();
    }

    let mut lines = vec!["COMMITS:".to_string()];
    for entry in entries {
        lines.push(format_commit_entry_line(entry));
        if let Some(chat) = &entry.chat {
            lines.push(format!("      | CHAT: {chat}"));
        }
        if let Some(diff) = &entry.diff {
            lines.push(format!("      | DIFF: {diff}"));
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changespec::{parse_project_str, HookRunStatus, HookStatusLine, Suffix, SuffixKind};
    use std::path::Path;

    fn status_line(entry_id: &str, status: HookRunStatus, suffix: Option<Suffix>) -> HookStatusLine {
        HookStatusLine {
            entry_id: entry_id.to_string(),
            timestamp: "251230_120000".to_string(),
            status,
            duration: None,
            suffix,
        }
    }

    #[test]
    fn hooks_field_shape() {
        let mut hook = HookEntry::new("!bb_build");
        hook.status_lines.push(status_line("2a", HookRunStatus::Running, Some(Suffix::running_process(42))));
        hook.status_lines.push(status_line("1", HookRunStatus::Passed, None));
        let lines = format_hooks_field(&[hook]);
        assert_eq!(lines[0], "HOOKS:");
        assert_eq!(lines[1], "  !bb_build");
        // Sorted by entry id, not insertion order.
        assert_eq!(lines[2], "    (1) [251230_120000] PASSED");
        assert_eq!(lines[3], "    (2a) [251230_120000] RUNNING - ($: 42)");
    }

    #[test]
    fn empty_running_agent_renders_bare_marker() {
        let mut hook = HookEntry::new("bb_build");
        hook.status_lines.push(status_line(
            "1",
            HookRunStatus::Running,
            Some(Suffix::new("", SuffixKind::RunningAgent)),
        ));
        let lines = format_hooks_field(&[hook]);
        assert_eq!(lines[2], "    (1) [251230_120000] RUNNING - (@)");
    }

    #[test]
    fn comments_field_shape() {
        let comments = vec![
            CommentEntry {
                reviewer: "critique".to_string(),
                file_path: "~/.gai/comments/x-critique-251230_110000.json".to_string(),
                suffix: Some(Suffix::error("Unresolved Critique Comments")),
            },
            CommentEntry {
                reviewer: "critique:me".to_string(),
                file_path: "~/.gai/comments/x-critique_me-251230_110500.json".to_string(),
                suffix: None,
            },
        ];
        let lines = format_comments_field(&comments);
        assert_eq!(
            lines[1],
            "  [critique] ~/.gai/comments/x-critique-251230_110000.json - (!: Unresolved Critique Comments)"
        );
        assert_eq!(lines[2], "  [critique:me] ~/.gai/comments/x-critique_me-251230_110500.json");
    }

    #[test]
    fn format_parse_round_trip() {
        let mut hook = HookEntry::new("$bb_presubmit");
        hook.status_lines.push(status_line(
            "3",
            HookRunStatus::Failed,
            Some(Suffix::new("tests red", SuffixKind::SummarizeComplete)),
        ));
        let mut text = String::from("NAME: rt\nSTATUS: Drafted\n");
        for line in format_hooks_field(std::slice::from_ref(&hook)) {
            text.push_str(&line);
            text.push('\n');
        }
        let specs = parse_project_str(&text, Path::new("p.gp"));
        assert_eq!(specs[0].hooks, vec![hook]);
    }
}
