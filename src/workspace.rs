//! Workspace allocation via the project-file RUNNING field.
//!
//! Each project file's header carries a `RUNNING:` block listing active
//! claims, one per line: `  (N) <workflow> <cl_name>`. Numbers 1–99 are
//! the interactive pool; numbers ≥100 belong to the supervisor loop and
//! use entry-scoped workflow names (`loop(hooks)-<entry_id>`,
//! `loop(crs)-<reviewer>`, `loop(fix-hook)-<timestamp>`). Claims are
//! edited under the project lock with the same atomic-rename discipline
//! as every other field.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AceError, Result};
use crate::store::{lock_project, write_atomic};

/// First workspace number in the supervisor's pool.
pub const LOOP_POOL_START: u32 = 100;

/// One active workspace claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub workspace_num: u32,
    pub workflow: String,
    pub cl_name: String,
}

fn claim_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\((\d+)\)\s+(\S+)\s+(.+)$").expect("static regex"))
}

fn parse_claim(line: &str) -> Option<Claim> {
    let caps = claim_re().captures(line.trim())?;
    Some(Claim {
        workspace_num: caps[1].parse().ok()?,
        workflow: caps[2].to_string(),
        cl_name: caps[3].trim().to_string(),
    })
}

fn format_claim(claim: &Claim) -> String {
    format!("  ({}) {} {}", claim.workspace_num, claim.workflow, claim.cl_name)
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| AceError::io(path, e))?;
    Ok(text.lines().map(str::to_string).collect())
}

/// The RUNNING block's line span in the file header: (header index, end of
/// claim lines). The header region ends at the first `NAME:` line.
fn running_block(lines: &[String]) -> Option<(usize, usize)> {
    let header_end = lines
        .iter()
        .position(|line| line.starts_with("NAME:"))
        .unwrap_or(lines.len());
    let start = lines[..header_end].iter().position(|line| line.starts_with("RUNNING:"))?;
    let mut end = start + 1;
    while end < header_end && lines[end].starts_with("  ") && parse_claim(&lines[end]).is_some() {
        end += 1;
    }
    Some((start, end))
}

/// All active claims recorded in the project file.
pub fn get_claimed_workspaces(path: &Path) -> Result<Vec<Claim>> {
    let lines = read_lines(path)?;
    Ok(match running_block(&lines) {
        Some((start, end)) => lines[start + 1..end].iter().filter_map(|l| parse_claim(l)).collect(),
        None => Vec::new(),
    })
}

/// Atomically record a claim on a workspace number.
///
/// Returns false when the number is already held by a different
/// (workflow, cl_name) pair. Re-claiming an identical claim succeeds.
pub fn claim_workspace(path: &Path, num: u32, workflow: &str, cl_name: &str) -> Result<bool> {
    let _lock = lock_project(path)?;
    let mut lines = read_lines(path)?;

    let claim = Claim {
        workspace_num: num,
        workflow: workflow.to_string(),
        cl_name: cl_name.to_string(),
    };

    match running_block(&lines) {
        Some((start, end)) => {
            let existing: Vec<Claim> =
                lines[start + 1..end].iter().filter_map(|l| parse_claim(l)).collect();
            if let Some(held) = existing.iter().find(|c| c.workspace_num == num) {
                return Ok(held == &claim);
            }
            let mut claims = existing;
            claims.push(claim);
            claims.sort_by_key(|c| c.workspace_num);
            let block: Vec<String> = claims.iter().map(format_claim).collect();
            lines.splice(start + 1..end, block);
        }
        None => {
            // No RUNNING block yet; create one at the top of the header.
            let insert_at = lines
                .iter()
                .position(|line| line.starts_with("NAME:") || line.trim().is_empty())
                .unwrap_or(lines.len());
            lines.insert(insert_at, "RUNNING:".to_string());
            lines.insert(insert_at + 1, format_claim(&claim));
        }
    }

    write_atomic(path, &lines)?;
    Ok(true)
}

/// Remove a matching claim. Idempotent: a missing claim is not an error.
pub fn release_workspace(path: &Path, num: u32, workflow: &str, cl_name: &str) -> Result<()> {
    let _lock = lock_project(path)?;
    let mut lines = read_lines(path)?;

    let Some((start, end)) = running_block(&lines) else {
        return Ok(());
    };

    let claims: Vec<Claim> = lines[start + 1..end]
        .iter()
        .filter_map(|l| parse_claim(l))
        .filter(|c| {
            !(c.workspace_num == num && c.workflow == workflow && c.cl_name == cl_name)
        })
        .collect();

    if claims.is_empty() {
        // Drop the whole block rather than leaving an empty header.
        lines.drain(start..end);
    } else {
        let block: Vec<String> = claims.iter().map(format_claim).collect();
        lines.splice(start + 1..end, block);
    }

    write_atomic(path, &lines)
}

/// First unclaimed workspace number in the loop pool (≥100).
pub fn get_first_available_loop_workspace(path: &Path) -> Result<u32> {
    let claimed: Vec<u32> =
        get_claimed_workspaces(path)?.iter().map(|c| c.workspace_num).collect();
    let mut num = LOOP_POOL_START;
    while claimed.contains(&num) {
        num += 1;
    }
    Ok(num)
}

/// Directory backing a numbered workspace: `<root>/<project>_<num>`.
///
/// Errors with `WorkspaceMissing` when the directory does not exist on
/// disk; callers release the claim and abort the start.
pub fn workspace_directory(root: &Path, project: &str, num: u32) -> Result<PathBuf> {
    let dir = root.join(format!("{project}_{num}"));
    if !dir.is_dir() {
        return Err(AceError::WorkspaceMissing { path: dir });
    }
    Ok(dir)
}
