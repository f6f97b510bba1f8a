//! Project-file parsing.
//!
//! The parser is tolerant: lines outside recognised field blocks are
//! skipped, and a record missing its NAME or STATUS is dropped without
//! touching the file. Field-introducer detection is line-prefix based;
//! multi-line fields continue on 2-space-indented lines; two consecutive
//! blank lines (or the next `NAME:`) terminate a record.

use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use super::{
    ChangeSpec, CommentEntry, CommitEntry, HookEntry, HookRunStatus, HookStatusLine, Suffix,
};
use crate::error::{AceError, Result};

fn hook_status_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // (N[a]) [YYmmdd_HHMMSS] STATUS (duration) - (suffix)
        // The bracket accepts both the 13-char underscored and the legacy
        // 12-digit timestamp forms.
        Regex::new(
            r"^\((\d+[a-z]?)\)\s+\[(\d{6}_?\d{6})\]\s*([A-Z]+)(?:\s+\(([^)]+)\))?(?:\s+-\s+\((.+)\))?$",
        )
        .expect("static regex")
    })
}

fn commit_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\((\d+)([a-z])?\)\s+(.+)$").expect("static regex"))
}

fn commit_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+-\s+\(([^)]+)\)$").expect("static regex"))
}

fn comment_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\[([^\]]+)\]\s+(\S+)(?:\s+-\s+\(([^)]+)\))?$").expect("static regex")
    })
}

/// Parse all ChangeSpecs out of a project file on disk.
pub fn parse_project_file(path: &Path) -> Result<Vec<ChangeSpec>> {
    let text = std::fs::read_to_string(path).map_err(|e| AceError::io(path, e))?;
    Ok(parse_project_str(&text, path))
}

/// Parse all ChangeSpecs from project-file text.
///
/// Records start at a `NAME:` line or an optional `## ChangeSpec` header.
pub fn parse_project_str(text: &str, path: &Path) -> Vec<ChangeSpec> {
    let lines: Vec<&str> = text.lines().collect();
    let mut changespecs = Vec::new();
    let mut idx = 0;

    while idx < lines.len() {
        let line = lines[idx];
        if line.trim_start().starts_with("## ChangeSpec") {
            let (parsed, next) = parse_record(&lines, idx + 1, path);
            if let Some(cs) = parsed {
                changespecs.push(cs);
            }
            idx = next.max(idx + 1);
        } else if line.starts_with("NAME: ") {
            let (parsed, next) = parse_record(&lines, idx, path);
            if let Some(cs) = parsed {
                changespecs.push(cs);
            }
            idx = next.max(idx + 1);
        } else {
            idx += 1;
        }
    }

    changespecs
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Description,
    Kickstart,
    TestTargets,
    Commits,
    Hooks,
    Comments,
}

/// Parse one record starting at `start`. Returns the record (if valid) and
/// the index to continue from: one past the record, or the index of the
/// `NAME:` line that started the next record.
fn parse_record<'a>(
    lines: &[&'a str],
    start: usize,
    path: &Path,
) -> (Option<ChangeSpec>, usize) {
    let mut name: Option<String> = None;
    let mut description_lines: Vec<&str> = Vec::new();
    let mut kickstart_lines: Vec<&str> = Vec::new();
    let mut parent = None;
    let mut cl = None;
    let mut status: Option<String> = None;
    let mut test_targets: Vec<String> = Vec::new();
    let mut commits: Vec<CommitEntry> = Vec::new();
    let mut hooks: Vec<HookEntry> = Vec::new();
    let mut comments: Vec<CommentEntry> = Vec::new();

    let mut section = Section::None;
    let mut consecutive_blank = 0;
    let mut idx = start;
    let line_number = start + 1;

    while idx < lines.len() {
        let line = lines[idx];
        let stripped = line.trim();

        if stripped.starts_with("##") && idx > start {
            break;
        }
        if stripped.is_empty() {
            consecutive_blank += 1;
            if consecutive_blank >= 2 {
                break;
            }
        } else {
            consecutive_blank = 0;
        }

        if let Some(value) = line.strip_prefix("NAME: ") {
            if name.is_some() {
                // Next record begins here; let the caller re-process it.
                return (finish(name, description_lines, kickstart_lines, parent, cl, status,
                                test_targets, commits, hooks, comments, path, line_number), idx);
            }
            name = Some(value.trim().to_string());
            section = Section::None;
        } else if let Some(value) = line.strip_prefix("DESCRIPTION:") {
            section = Section::Description;
            let inline = value.trim();
            if !inline.is_empty() {
                description_lines.push(inline);
            }
        } else if let Some(value) = line.strip_prefix("KICKSTART:") {
            section = Section::Kickstart;
            let inline = value.trim();
            if !inline.is_empty() {
                kickstart_lines.push(inline);
            }
        } else if let Some(value) = line.strip_prefix("PARENT: ") {
            parent = Some(value.trim().to_string());
            section = Section::None;
        } else if let Some(value) = line.strip_prefix("CL: ") {
            cl = Some(value.trim().to_string());
            section = Section::None;
        } else if let Some(value) = line.strip_prefix("STATUS: ") {
            status = Some(value.trim().to_string());
            section = Section::None;
        } else if let Some(value) = line.strip_prefix("TEST TARGETS:") {
            section = Section::TestTargets;
            let inline = value.trim();
            if !inline.is_empty() {
                // A single target; may contain spaces.
                test_targets.push(inline.to_string());
            }
        } else if line.starts_with("COMMITS:") {
            section = Section::Commits;
        } else if line.starts_with("HOOKS:") {
            section = Section::Hooks;
        } else if line.starts_with("COMMENTS:") {
            section = Section::Comments;
        } else {
            match section {
                Section::Hooks => parse_hook_line(line, stripped, &mut hooks),
                Section::Comments => parse_comment_line(line, stripped, &mut comments),
                Section::Commits => parse_commit_line(stripped, &mut commits),
                Section::Description if line.starts_with("  ") => {
                    description_lines.push(&line[2..]);
                }
                Section::Kickstart if line.starts_with("  ") => {
                    kickstart_lines.push(&line[2..]);
                }
                Section::TestTargets if line.starts_with("  ") => {
                    if !stripped.is_empty() {
                        test_targets.push(stripped.to_string());
                    }
                }
                _ if stripped.is_empty() => {
                    // Blank lines are preserved inside multi-line text fields.
                    match section {
                        Section::Description => description_lines.push(""),
                        Section::Kickstart => kickstart_lines.push(""),
                        _ => {}
                    }
                }
                _ => {
                    // Unrecognised content ends any special parsing mode,
                    // except comment lines which are simply skipped.
                    if !stripped.starts_with('#') {
                        section = Section::None;
                    }
                }
            }
        }

        idx += 1;
    }

    (
        finish(name, description_lines, kickstart_lines, parent, cl, status, test_targets,
               commits, hooks, comments, path, line_number),
        idx,
    )
}

fn parse_hook_line(line: &str, stripped: &str, hooks: &mut Vec<HookEntry>) {
    if line.starts_with("  ") && !line.starts_with("    ") {
        // Command line, as long as it is not a stray status-line marker.
        if !stripped.starts_with('[') && !stripped.starts_with('(') && !stripped.is_empty() {
            hooks.push(HookEntry::new(stripped));
        }
    } else if line.starts_with("    ") {
        let Some(caps) = hook_status_re().captures(stripped) else {
            return;
        };
        let Some(hook) = hooks.last_mut() else {
            return;
        };
        let Ok(status) = HookRunStatus::from_str(&caps[3]) else {
            return;
        };
        let timestamp = caps[2].to_string();
        hook.status_lines.push(HookStatusLine {
            entry_id: caps[1].to_string(),
            timestamp,
            status,
            duration: caps.get(4).map(|m| m.as_str().to_string()),
            suffix: caps.get(5).map(|m| Suffix::parse(m.as_str())),
        });
    }
}

fn parse_comment_line(line: &str, stripped: &str, comments: &mut Vec<CommentEntry>) {
    if !line.starts_with("  ") || line.starts_with("    ") {
        return;
    }
    let Some(caps) = comment_entry_re().captures(stripped) else {
        return;
    };
    comments.push(CommentEntry {
        reviewer: caps[1].to_string(),
        file_path: caps[2].to_string(),
        suffix: caps.get(3).map(|m| Suffix::parse(m.as_str())),
    });
}

fn parse_commit_line(stripped: &str, commits: &mut Vec<CommitEntry>) {
    if let Some(caps) = commit_entry_re().captures(stripped) {
        let raw_note = caps[3].to_string();
        let (note, suffix) = match commit_suffix_re().find(&raw_note) {
            Some(m) => {
                let inner = commit_suffix_re()
                    .captures(&raw_note)
                    .map(|c| c[1].to_string())
                    .unwrap_or_default();
                (raw_note[..m.start()].to_string(), Some(Suffix::parse(&inner)))
            }
            None => (raw_note, None),
        };
        commits.push(CommitEntry {
            number: caps[1].parse().unwrap_or(0),
            proposal_letter: caps.get(2).and_then(|m| m.as_str().chars().next()),
            note,
            chat: None,
            diff: None,
            suffix,
        });
    } else if let Some(value) = stripped.strip_prefix("| CHAT:") {
        if let Some(entry) = commits.last_mut() {
            entry.chat = Some(value.trim().to_string());
        }
    } else if let Some(value) = stripped.strip_prefix("| DIFF:") {
        if let Some(entry) = commits.last_mut() {
            entry.diff = Some(value.trim().to_string());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    name: Option<String>,
    description_lines: Vec<&str>,
    kickstart_lines: Vec<&str>,
    parent: Option<String>,
    cl: Option<String>,
    status: Option<String>,
    test_targets: Vec<String>,
    commits: Vec<CommitEntry>,
    hooks: Vec<HookEntry>,
    comments: Vec<CommentEntry>,
    path: &Path,
    line_number: usize,
) -> Option<ChangeSpec> {
    let name = name?;
    let status = status?;
    Some(ChangeSpec {
        name,
        description: description_lines.join("\n").trim().to_string(),
        parent,
        cl,
        status,
        test_targets,
        kickstart: {
            let text = kickstart_lines.join("\n").trim().to_string();
            if text.is_empty() { None } else { Some(text) }
        },
        commits,
        hooks,
        comments,
        file_path: path.to_path_buf(),
        line_number,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changespec::SuffixKind;

    const SAMPLE: &str = "\
BUG: http://b/12345
RUNNING:
  (101) loop(hooks)-2 add-retry-logic

NAME: add-retry-logic
DESCRIPTION: Add retry logic to the fetcher.
  Second line of the description.
PARENT: base-refactor
CL: http://cl/123456789
STATUS: Drafted
TEST TARGETS:
  //fetch:retry_test
COMMITS:
  (1) Initial implementation
      | CHAT: ~/.gai/chats/add-retry-logic-1.md
      | DIFF: ~/.gai/diffs/add-retry-logic-1.diff
  (2) Address first review round - (NEW PROPOSAL)
  (2a) [fix-hook (2) bb_build] repair includes - (!: ZOMBIE)
      | DIFF: ~/.gai/diffs/add-retry-logic-2a.diff
HOOKS:
  bb_build
    (1) [251230_120000] PASSED (1m23s)
    (2) [251230_130000] FAILED - (%: tests X, Y red)
    (2a) [251230_140000] RUNNING - ($: 424242)
  !$bb_presubmit
    (2) [251230_130500] PASSED (45s)
COMMENTS:
  [critique] ~/.gai/comments/add-retry-logic-critique-251230_110000.json - (@: crs-251230_150000)
  [critique:me] ~/.gai/comments/add-retry-logic-critique_me-251230_110500.json


NAME: base-refactor
STATUS: Submitted
";

    fn parse_sample() -> Vec<ChangeSpec> {
        parse_project_str(SAMPLE, Path::new("/home/u/.gai/projects/proj1/proj1.gp"))
    }

    #[test]
    fn parses_all_records() {
        let specs = parse_sample();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "add-retry-logic");
        assert_eq!(specs[1].name, "base-refactor");
        assert_eq!(specs[1].status, "Submitted");
    }

    #[test]
    fn record_fields() {
        let specs = parse_sample();
        let cs = &specs[0];
        assert_eq!(cs.description, "Add retry logic to the fetcher.\nSecond line of the description.");
        assert_eq!(cs.parent.as_deref(), Some("base-refactor"));
        assert_eq!(cs.cl.as_deref(), Some("http://cl/123456789"));
        assert_eq!(cs.test_targets, vec!["//fetch:retry_test"]);
        assert_eq!(cs.line_number, 5);
        assert_eq!(cs.project_name(), "proj1");
    }

    #[test]
    fn commit_entries() {
        let specs = parse_sample();
        let commits = &specs[0].commits;
        assert_eq!(commits.len(), 3);
        assert_eq!(commits[0].display_number(), "1");
        assert_eq!(commits[0].chat.as_deref(), Some("~/.gai/chats/add-retry-logic-1.md"));
        assert_eq!(commits[1].suffix.as_ref().unwrap().kind, SuffixKind::Plain);
        assert_eq!(commits[1].suffix.as_ref().unwrap().text, "NEW PROPOSAL");
        let proposal = &commits[2];
        assert_eq!(proposal.display_number(), "2a");
        assert!(proposal.is_proposed());
        assert_eq!(proposal.suffix.as_ref().unwrap().kind, SuffixKind::Error);
        assert_eq!(proposal.diff.as_deref(), Some("~/.gai/diffs/add-retry-logic-2a.diff"));
    }

    #[test]
    fn hook_entries() {
        let specs = parse_sample();
        let hooks = &specs[0].hooks;
        assert_eq!(hooks.len(), 2);
        let build = &hooks[0];
        assert_eq!(build.command, "bb_build");
        assert_eq!(build.status_lines.len(), 3);
        assert_eq!(build.status_lines[0].status, HookRunStatus::Passed);
        assert_eq!(build.status_lines[0].duration.as_deref(), Some("1m23s"));
        assert_eq!(
            build.status_lines[1].suffix.as_ref().unwrap().kind,
            SuffixKind::SummarizeComplete
        );
        let running = &build.status_lines[2];
        assert_eq!(running.status, HookRunStatus::Running);
        assert_eq!(running.suffix.as_ref().unwrap().kind, SuffixKind::RunningProcess);
        assert_eq!(running.suffix.as_ref().unwrap().text, "424242");

        let presubmit = &hooks[1];
        assert!(presubmit.skip_fix_hook());
        assert!(presubmit.skip_proposal_runs());
        assert_eq!(presubmit.display_command(), "bb_presubmit");
    }

    #[test]
    fn comment_entries() {
        let specs = parse_sample();
        let comments = &specs[0].comments;
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].reviewer, "critique");
        assert_eq!(comments[0].suffix.as_ref().unwrap().kind, SuffixKind::RunningAgent);
        assert_eq!(comments[0].suffix.as_ref().unwrap().text, "crs-251230_150000");
        assert_eq!(comments[1].reviewer, "critique:me");
        assert!(comments[1].suffix.is_none());
    }

    #[test]
    fn legacy_timestamp_accepted() {
        let text = "NAME: x\nSTATUS: Drafted\nHOOKS:\n  bb_build\n    (1) [251230120000] PASSED (2s)\n";
        let specs = parse_project_str(text, Path::new("p.gp"));
        assert_eq!(specs[0].hooks[0].status_lines[0].timestamp, "251230120000");
    }

    #[test]
    fn record_missing_status_is_dropped() {
        let text = "NAME: incomplete\nDESCRIPTION: no status here\n\n\nNAME: ok\nSTATUS: Drafted\n";
        let specs = parse_project_str(text, Path::new("p.gp"));
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "ok");
    }

    #[test]
    fn changespec_header_form() {
        let text = "## ChangeSpec\nNAME: via-header\nSTATUS: Mailed\n";
        let specs = parse_project_str(text, Path::new("p.gp"));
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "via-header");
    }

    #[test]
    fn adjacent_records_without_blank_separator() {
        let text = "NAME: first\nSTATUS: Drafted\nNAME: second\nSTATUS: Mailed\n";
        let specs = parse_project_str(text, Path::new("p.gp"));
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].name, "second");
    }

    #[test]
    fn dead_and_killed_statuses_round_trip_in() {
        let text = "NAME: x\nSTATUS: Drafted\nHOOKS:\n  bb_build\n    (1) [251230_120000] DEAD - (~$: 42 | [251230_140000] Process is no longer running. Marked as dead.)\n    (2) [251230_150000] KILLED - (~$: 43)\n";
        let specs = parse_project_str(text, Path::new("p.gp"));
        let lines = &specs[0].hooks[0].status_lines;
        assert_eq!(lines[0].status, HookRunStatus::Dead);
        assert_eq!(lines[0].suffix.as_ref().unwrap().kind, SuffixKind::KilledProcess);
        assert_eq!(lines[1].status, HookRunStatus::Killed);
    }
}
