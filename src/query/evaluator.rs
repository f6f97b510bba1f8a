//! Query evaluation against ChangeSpecs.
//!
//! String atoms substring-match a concatenated searchable text built from
//! the record's fields; property filters consult specific fields, and
//! `ancestor:` walks the parent chain with cycle detection.

use std::collections::{HashMap, HashSet};

use crate::changespec::{base_status, has_any_error_suffix, ChangeSpec, SuffixKind};

use super::types::{PropertyKey, PropertyMatch, QueryExpr, StringMatch};

/// Marker a running-agent suffix leaves in the searchable text.
const RUNNING_AGENT_MARKER: &str = "- (@";

/// Marker a running-process suffix leaves in the searchable text.
const RUNNING_PROCESS_MARKER: &str = "- ($: ";

/// Concatenated text the string atoms match against: name, description,
/// status, project, parent, cl, kickstart, commit notes and suffixes,
/// hook commands and status-line suffixes, comment entries and suffixes.
fn searchable_text(changespec: &ChangeSpec) -> String {
    let mut parts: Vec<String> = vec![
        changespec.name.clone(),
        changespec.description.clone(),
        changespec.status.clone(),
        changespec.project_name(),
    ];

    if let Some(parent) = &changespec.parent {
        parts.push(parent.clone());
    }
    if let Some(cl) = &changespec.cl {
        parts.push(cl.clone());
    }
    if let Some(kickstart) = &changespec.kickstart {
        parts.push(kickstart.clone());
    }

    for entry in &changespec.commits {
        parts.push(entry.note.clone());
        if let Some(suffix) = &entry.suffix {
            parts.push(format!("({})", suffix.render_inner()));
        }
    }

    for hook in &changespec.hooks {
        parts.push(hook.display_command().to_string());
        for sl in &hook.status_lines {
            if let Some(suffix) = &sl.suffix {
                match suffix.kind {
                    SuffixKind::RunningAgent
                    | SuffixKind::RunningProcess
                    | SuffixKind::KilledProcess => parts.push(suffix.render().trim().to_string()),
                    _ => parts.push(format!("({})", suffix.render_inner())),
                }
            }
        }
    }

    for comment in &changespec.comments {
        parts.push(comment.reviewer.clone());
        parts.push(comment.file_path.clone());
        if let Some(suffix) = &comment.suffix {
            match suffix.kind {
                SuffixKind::RunningAgent
                | SuffixKind::RunningProcess
                | SuffixKind::KilledProcess => parts.push(suffix.render().trim().to_string()),
                _ => parts.push(format!("({})", suffix.render_inner())),
            }
        }
    }

    parts.join("\n")
}

fn match_string(text: &str, m: &StringMatch) -> bool {
    if m.case_sensitive {
        text.contains(&m.value)
    } else {
        text.to_lowercase().contains(&m.value.to_lowercase())
    }
}

fn match_property(prop: &PropertyMatch, changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    match prop.key {
        PropertyKey::Status => {
            base_status(&changespec.status).eq_ignore_ascii_case(&prop.value)
        }
        PropertyKey::Project => changespec.project_name().eq_ignore_ascii_case(&prop.value),
        PropertyKey::Ancestor => match_ancestor(&prop.value, changespec, all),
    }
}

/// True when the record's own name or any name on its parent chain equals
/// the ancestor value. Cycles in the parent graph terminate the walk.
fn match_ancestor(ancestor: &str, changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    let ancestor = ancestor.to_lowercase();
    let by_name: HashMap<String, &ChangeSpec> =
        all.iter().map(|cs| (cs.name.to_lowercase(), cs)).collect();

    let mut visited: HashSet<String> = HashSet::new();
    let mut current = changespec;
    loop {
        let name = current.name.to_lowercase();
        if !visited.insert(name.clone()) {
            return false;
        }
        if name == ancestor {
            return true;
        }
        let Some(parent) = &current.parent else {
            return false;
        };
        let parent = parent.to_lowercase();
        if parent == ancestor {
            return true;
        }
        match by_name.get(&parent) {
            Some(next) => current = next,
            None => return false,
        }
    }
}

fn evaluate(expr: &QueryExpr, text: &str, changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    match expr {
        QueryExpr::Str(m) => match_string(text, m),
        QueryExpr::Property(p) => match_property(p, changespec, all),
        QueryExpr::AnyErrorSuffix => has_any_error_suffix(changespec),
        QueryExpr::AnyRunningAgent => text.contains(RUNNING_AGENT_MARKER),
        QueryExpr::AnyRunningProcess => text.contains(RUNNING_PROCESS_MARKER),
        QueryExpr::Not(inner) => !evaluate(inner, text, changespec, all),
        QueryExpr::And(operands) => operands.iter().all(|op| evaluate(op, text, changespec, all)),
        QueryExpr::Or(operands) => operands.iter().any(|op| evaluate(op, text, changespec, all)),
    }
}

/// Evaluate a parsed query against one record. `all` is consulted by the
/// `ancestor:` filter.
pub fn evaluate_query(expr: &QueryExpr, changespec: &ChangeSpec, all: &[ChangeSpec]) -> bool {
    let text = searchable_text(changespec);
    evaluate(expr, &text, changespec, all)
}
