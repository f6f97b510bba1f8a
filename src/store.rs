//! Serialised read-modify-write access to project files.
//!
//! Project files are mutated by the supervisor, the TUI, and workflow
//! children at any moment. Every write here follows the same discipline:
//! take the advisory lock, re-read the file inside it, splice exactly one
//! field block, write a sibling temp file, and atomically rename it over
//! the target. The lock file is a `.lock` sibling of the project file so
//! readers never contend.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use fs2::FileExt;
use indexmap::IndexMap;

use crate::changespec::{
    self, format_comments_field, format_commit_entry_line, format_commits_field,
    format_hooks_field, parse_project_str, CommentEntry, CommitEntry, HookEntry, Suffix,
};
use crate::error::{AceError, Result};

/// Exclusive advisory lock on a project file; released on drop.
pub struct ProjectLock {
    _file: File,
}

/// Acquire the lock for a project file's read-modify-write window.
pub fn lock_project(path: &Path) -> Result<ProjectLock> {
    let lock_path = path.with_extension("gp.lock");
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| AceError::Lock(format!("{}: {e}", lock_path.display())))?;
    file.lock_exclusive()
        .map_err(|e| AceError::Lock(format!("{}: {e}", lock_path.display())))?;
    Ok(ProjectLock { _file: file })
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| AceError::io(path, e))?;
    Ok(text.lines().map(str::to_string).collect())
}

/// Write the full contents via a sibling temp file and atomic rename.
/// The temp file is removed on any error path.
pub fn write_atomic(path: &Path, lines: &[String]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| AceError::io(path, e))?;
    for line in lines {
        writeln!(temp, "{line}").map_err(|e| AceError::io(path, e))?;
    }
    temp.flush().map_err(|e| AceError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| AceError::io(path, e.error))?;
    Ok(())
}

/// Which lines an existing field block owns, for skipping on replace.
type BlockMember = fn(&str) -> bool;

fn hooks_block_member(line: &str) -> bool {
    let stripped = line.trim_start();
    if stripped.is_empty() {
        return false;
    }
    if line.starts_with("    ") {
        return stripped.starts_with('(') || stripped.starts_with('[');
    }
    line.starts_with("  ") && !stripped.starts_with('(') && !stripped.starts_with('[')
}

fn comments_block_member(line: &str) -> bool {
    line.starts_with("  ") && !line.starts_with("    ") && line.trim_start().starts_with('[')
}

fn commits_block_member(line: &str) -> bool {
    let stripped = line.trim_start();
    (line.starts_with("  ") && stripped.starts_with('(')) || stripped.starts_with('|')
}

/// Replace (or insert) one field block inside the named record.
///
/// The block is inserted before the next `NAME:` line, before the blank
/// pair ending the record, or at end-of-file — whichever comes first when
/// the header is missing.
fn splice_field_block(
    lines: &[String],
    name: &str,
    header: &str,
    new_block: &[String],
    member: BlockMember,
) -> Result<Vec<String>> {
    let mut updated: Vec<String> = Vec::with_capacity(lines.len() + new_block.len());
    let mut in_target = false;
    let mut saw_target = false;
    let mut found = false;
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];

        if let Some(value) = line.strip_prefix("NAME:") {
            let was_in_target = in_target;
            in_target = value.trim() == name;
            saw_target |= in_target;
            if was_in_target && !found && !new_block.is_empty() {
                updated.extend(new_block.iter().cloned());
                found = true;
            }
            updated.push(line.clone());
            i += 1;
            continue;
        }

        if in_target {
            if line.starts_with(header) {
                found = true;
                updated.extend(new_block.iter().cloned());
                i += 1;
                while i < lines.len() && member(&lines[i]) {
                    i += 1;
                }
                continue;
            }

            if line.trim().is_empty()
                && lines.get(i + 1).is_some_and(|next| next.trim().is_empty())
                && !found
                && !new_block.is_empty()
            {
                updated.extend(new_block.iter().cloned());
                found = true;
            }
        }

        updated.push(line.clone());
        i += 1;
    }

    if !saw_target {
        return Err(AceError::ConcurrentModification { name: name.to_string() });
    }
    if in_target && !found && !new_block.is_empty() {
        updated.extend(new_block.iter().cloned());
    }

    Ok(updated)
}

/// Rewrite the HOOKS field of the named record.
pub fn update_hooks_field(path: &Path, name: &str, hooks: &[HookEntry]) -> Result<()> {
    let _lock = lock_project(path)?;
    let lines = read_lines(path)?;
    let block = format_hooks_field(hooks);
    let updated = splice_field_block(&lines, name, "HOOKS:", &block, hooks_block_member)?;
    write_atomic(path, &updated)
}

/// Merge hook updates into the current file state.
///
/// Hooks on disk that the map does not mention survive unchanged, so a
/// concurrent writer appending a hook between our read and this write is
/// never clobbered. Mapped hooks whose command has vanished from disk are
/// dropped.
pub fn merge_hook_updates(
    path: &Path,
    name: &str,
    updates: &IndexMap<String, HookEntry>,
) -> Result<()> {
    let _lock = lock_project(path)?;
    let lines = read_lines(path)?;
    let text = lines.join("\n");
    let current = parse_project_str(&text, path);
    let current_hooks = current
        .iter()
        .find(|cs| cs.name == name)
        .map(|cs| cs.hooks.clone())
        .ok_or_else(|| AceError::ConcurrentModification { name: name.to_string() })?;

    let merged: Vec<HookEntry> = current_hooks
        .into_iter()
        .map(|hook| updates.get(&hook.command).cloned().unwrap_or(hook))
        .collect();

    let block = format_hooks_field(&merged);
    let updated = splice_field_block(&lines, name, "HOOKS:", &block, hooks_block_member)?;
    write_atomic(path, &updated)
}

/// Rewrite the COMMENTS field; `None` removes the field entirely.
pub fn update_comments_field(
    path: &Path,
    name: &str,
    comments: Option<&[CommentEntry]>,
) -> Result<()> {
    let _lock = lock_project(path)?;
    let lines = read_lines(path)?;
    let block = match comments {
        Some(entries) => format_comments_field(entries),
        None => Vec::new(),
    };
    let updated = splice_field_block(&lines, name, "COMMENTS:", &block, comments_block_member)?;
    write_atomic(path, &updated)
}

/// Rewrite the COMMITS field.
pub fn update_commits_field(path: &Path, name: &str, entries: &[CommitEntry]) -> Result<()> {
    let _lock = lock_project(path)?;
    let lines = read_lines(path)?;
    let block = format_commits_field(entries);
    let updated = splice_field_block(&lines, name, "COMMITS:", &block, commits_block_member)?;
    write_atomic(path, &updated)
}

/// Suffix mutation applied to a single commit entry line.
#[derive(Debug, Clone)]
pub enum CommitSuffixOp {
    Set(Suffix),
    Remove,
    /// Rewrite an error suffix to acknowledged, preserving the message.
    Acknowledge,
}

/// Apply a suffix mutation to the `(entry_id)` line of the named record.
///
/// Returns false when the entry line was not found or the operation was a
/// no-op (e.g. acknowledging an entry with no error suffix).
pub fn update_commit_entry_suffix(
    path: &Path,
    name: &str,
    entry_id: &str,
    op: CommitSuffixOp,
) -> Result<bool> {
    let _lock = lock_project(path)?;
    let mut lines = read_lines(path)?;
    let (start, end) = match record_bounds(&lines, name) {
        Some(bounds) => bounds,
        None => return Err(AceError::ConcurrentModification { name: name.to_string() }),
    };

    let prefix = format!("  ({entry_id}) ");
    let Some(idx) = (start..end).find(|&i| lines[i].starts_with(&prefix)) else {
        return Ok(false);
    };

    let mut entries = Vec::new();
    reparse_commit_line(lines[idx].trim(), &mut entries);
    let Some(mut entry) = entries.pop() else {
        return Ok(false);
    };
    match op {
        CommitSuffixOp::Set(suffix) => entry.suffix = Some(suffix),
        CommitSuffixOp::Remove => entry.suffix = None,
        CommitSuffixOp::Acknowledge => match &entry.suffix {
            Some(suffix) if suffix.is_error() => entry.suffix = Some(suffix.acknowledge()),
            _ => return Ok(false),
        },
    }
    lines[idx] = format_commit_entry_line(&entry);
    write_atomic(path, &lines)?;
    Ok(true)
}

// The commit-line grammar lives in the parser; reuse it through a tiny
// shim so the store never re-derives the syntax.
fn reparse_commit_line(stripped: &str, out: &mut Vec<CommitEntry>) {
    let text = format!("NAME: __probe__\nSTATUS: Drafted\nCOMMITS:\n  {stripped}\n");
    let specs = parse_project_str(&text, Path::new("__probe__"));
    if let Some(cs) = specs.into_iter().next() {
        out.extend(cs.commits);
    }
}

/// Apply a rewrite to the raw STATUS value of the named record.
///
/// The closure receives the current value and returns the replacement, or
/// `None` to leave the file untouched. Returns whether a write happened.
pub fn update_status_value(
    path: &Path,
    name: &str,
    rewrite: impl FnOnce(&str) -> Option<String>,
) -> Result<bool> {
    let _lock = lock_project(path)?;
    let mut lines = read_lines(path)?;
    let (start, end) = match record_bounds(&lines, name) {
        Some(bounds) => bounds,
        None => return Err(AceError::ConcurrentModification { name: name.to_string() }),
    };

    let Some(idx) = (start..end).find(|&i| lines[i].starts_with("STATUS: ")) else {
        return Ok(false);
    };
    let value = lines[idx]["STATUS: ".len()..].trim().to_string();
    match rewrite(&value) {
        Some(new_value) => {
            lines[idx] = format!("STATUS: {new_value}");
            write_atomic(path, &lines)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Promote an accepted proposal in the COMMITS field.
///
/// The proposal `(<number><letter>)` replaces the accepted entry
/// `(<number>)` in place (the external amend rewrote that commit), its
/// sibling proposals are deleted, and its suffix is cleared.
pub fn renumber_commit_entries(path: &Path, name: &str, number: u32, letter: char) -> Result<()> {
    let _lock = lock_project(path)?;
    let lines = read_lines(path)?;
    let text = lines.join("\n");
    let current = parse_project_str(&text, path);
    let record = current
        .iter()
        .find(|cs| cs.name == name)
        .ok_or_else(|| AceError::ConcurrentModification { name: name.to_string() })?;

    let mut entries: Vec<CommitEntry> = Vec::with_capacity(record.commits.len());
    for entry in &record.commits {
        if entry.number == number {
            if entry.proposal_letter == Some(letter) {
                let mut promoted = entry.clone();
                promoted.proposal_letter = None;
                promoted.suffix = None;
                entries.push(promoted);
            }
            // The old accepted entry and sibling proposals are dropped.
            continue;
        }
        entries.push(entry.clone());
    }

    let block = format_commits_field(&entries);
    let updated = splice_field_block(&lines, name, "COMMITS:", &block, commits_block_member)?;
    write_atomic(path, &updated)
}

/// Byte span (as line indices) of the named record: from its `NAME:` line
/// to the next `NAME:` or the blank pair ending it.
fn record_bounds(lines: &[String], name: &str) -> Option<(usize, usize)> {
    let start = lines
        .iter()
        .position(|line| line.strip_prefix("NAME:").is_some_and(|v| v.trim() == name))?;
    let mut end = lines.len();
    let mut blanks = 0;
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.starts_with("NAME:") {
            end = start + 1 + offset;
            break;
        }
        if line.trim().is_empty() {
            blanks += 1;
            if blanks >= 2 {
                end = start + 1 + offset;
                break;
            }
        } else {
            blanks = 0;
        }
    }
    Some((start, end))
}

/// Append a new commit entry (used by tests and the accept path).
pub fn append_commit_entry(path: &Path, name: &str, entry: &CommitEntry) -> Result<()> {
    let _lock = lock_project(path)?;
    let lines = read_lines(path)?;
    let text = lines.join("\n");
    let current = parse_project_str(&text, path);
    let record = current
        .iter()
        .find(|cs| cs.name == name)
        .ok_or_else(|| AceError::ConcurrentModification { name: name.to_string() })?;

    let mut entries = record.commits.clone();
    entries.push(entry.clone());
    entries.sort_by_key(|e| changespec::parse_entry_id(&e.display_number()));

    let block = format_commits_field(&entries);
    let updated = splice_field_block(&lines, name, "COMMITS:", &block, commits_block_member)?;
    write_atomic(path, &updated)
}
