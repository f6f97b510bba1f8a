//! COMMENTS field operations.
//!
//! Comment entries point at JSON artefacts written by the critique
//! probes; their suffixes track the CRS workflow the same way hook status
//! lines track hook subprocesses.

use std::path::{Path, PathBuf};

use crate::changespec::{parse_project_file, CommentEntry, Suffix, SuffixKind};
use crate::error::{AceError, Result};
use crate::store;
use crate::timestamps;

/// Path for a comment artefact: `<dir>/<name>-<reviewer>-<ts>.json`.
/// Colons in reviewer tags are flattened for the filename.
pub fn comments_file_path(comments_dir: &Path, name: &str, reviewer: &str, timestamp: &str) -> PathBuf {
    let safe_reviewer = reviewer.replace(':', "_");
    let filename = sanitize_filename::sanitize(format!("{name}-{safe_reviewer}-{timestamp}.json"));
    comments_dir.join(filename)
}

/// Store a path with `~` substituted for the home directory, matching how
/// entries are written by every other tool.
pub fn tilde_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    match dirs::home_dir() {
        Some(home) => {
            let home_text = home.to_string_lossy();
            match text.strip_prefix(home_text.as_ref()) {
                Some(rest) => format!("~{rest}"),
                None => text.into_owned(),
            }
        }
        None => text.into_owned(),
    }
}

fn current_comments(path: &Path, name: &str) -> Result<Vec<CommentEntry>> {
    let specs = parse_project_file(path)?;
    specs
        .into_iter()
        .find(|cs| cs.name == name)
        .map(|cs| cs.comments)
        .ok_or_else(|| AceError::ConcurrentModification { name: name.to_string() })
}

/// Add a comment entry, replacing any existing entry for the same
/// reviewer.
pub fn add_comment_entry(path: &Path, name: &str, entry: CommentEntry) -> Result<()> {
    let mut comments = current_comments(path, name)?;
    match comments.iter_mut().find(|c| c.reviewer == entry.reviewer) {
        Some(existing) => *existing = entry,
        None => comments.push(entry),
    }
    store::update_comments_field(path, name, Some(&comments))
}

/// Remove the entry for a reviewer; removing the last entry drops the
/// whole COMMENTS field.
pub fn remove_comment_entry(path: &Path, name: &str, reviewer: &str) -> Result<()> {
    let mut comments = current_comments(path, name)?;
    comments.retain(|c| c.reviewer != reviewer);
    let block = if comments.is_empty() { None } else { Some(comments.as_slice()) };
    store::update_comments_field(path, name, block)
}

/// Set the suffix on a reviewer's entry, inferring the kind from the
/// message when none is given.
pub fn set_comment_suffix(
    path: &Path,
    name: &str,
    reviewer: &str,
    suffix: Suffix,
) -> Result<bool> {
    let mut comments = current_comments(path, name)?;
    let mut found = false;
    for comment in &mut comments {
        if comment.reviewer == reviewer {
            comment.suffix = Some(suffix.clone());
            found = true;
        }
    }
    if !found {
        return Ok(false);
    }
    store::update_comments_field(path, name, Some(&comments))?;
    Ok(true)
}

/// Clear the suffix on a reviewer's entry.
pub fn clear_comment_suffix(path: &Path, name: &str, reviewer: &str) -> Result<bool> {
    let mut comments = current_comments(path, name)?;
    let mut found = false;
    for comment in &mut comments {
        if comment.reviewer == reviewer && comment.suffix.is_some() {
            comment.suffix = None;
            found = true;
        }
    }
    if !found {
        return Ok(false);
    }
    store::update_comments_field(path, name, Some(&comments))?;
    Ok(true)
}

/// Rewrite a reviewer's error suffix to acknowledged, preserving the
/// message. Returns false when the entry has no error suffix.
pub fn acknowledge_comment_suffix(path: &Path, name: &str, reviewer: &str) -> Result<bool> {
    let mut comments = current_comments(path, name)?;
    let mut found = false;
    for comment in &mut comments {
        if comment.reviewer == reviewer {
            if let Some(suffix) = &comment.suffix {
                if suffix.is_error() {
                    comment.suffix = Some(suffix.acknowledge());
                    found = true;
                }
            }
        }
    }
    if !found {
        return Ok(false);
    }
    store::update_comments_field(path, name, Some(&comments))?;
    Ok(true)
}

/// Whether a comment suffix is a running-workflow timestamp older than
/// the zombie timeout.
pub fn is_comment_suffix_stale(suffix: &Suffix, zombie_timeout_seconds: u64) -> bool {
    matches!(suffix.kind, SuffixKind::RunningAgent | SuffixKind::Plain)
        && timestamps::is_suffix_stale(&suffix.text, zombie_timeout_seconds)
}
