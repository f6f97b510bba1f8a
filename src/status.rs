//! ChangeSpec status state machine.
//!
//! Transitions move a record through Drafted → Mailed → Submitted, with
//! Reverted reachable from anywhere. The READY TO MAIL marker is a status
//! decoration owned by the supervisor; any transition strips it first.

use std::path::Path;

use crate::changespec::{base_status, READY_TO_MAIL_SUFFIX};
use crate::error::Result;
use crate::store;

/// Closed set of base statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Status {
    Drafted,
    #[strum(serialize = "Pre-Mailed")]
    PreMailed,
    Mailed,
    Submitted,
    Reverted,
}

/// Whether a validated transition from `from` to `to` is permitted.
///
/// The table: Drafted ↔ Mailed, Drafted → Pre-Mailed, Pre-Mailed → Mailed,
/// Mailed → Submitted, and anything → Reverted. Identity transitions are
/// allowed (they re-canonicalise the status line).
pub fn is_valid_transition(from: Status, to: Status) -> bool {
    use Status::*;
    if from == to || to == Reverted {
        return true;
    }
    matches!(
        (from, to),
        (Drafted, Mailed) | (Drafted, PreMailed) | (PreMailed, Mailed) | (Mailed, Drafted)
            | (Mailed, Submitted)
    )
}

/// Change the base status of the named record.
///
/// Strips any READY TO MAIL marker before writing. With `validate` set,
/// transitions outside the permitted table are rejected (no write, returns
/// `Ok(None)`); otherwise the new status is forced. Returns the old base
/// status on success.
pub fn transition_changespec_status(
    path: &Path,
    name: &str,
    new_status: Status,
    validate: bool,
) -> Result<Option<String>> {
    let mut old_status = None;
    store::update_status_value(path, name, |current| {
        let base = base_status(current);
        if validate {
            match base.parse::<Status>() {
                Ok(from) if is_valid_transition(from, new_status) => {}
                _ => return None,
            }
        }
        old_status = Some(base);
        Some(new_status.to_string())
    })?;
    Ok(old_status)
}

/// Add the READY TO MAIL marker to the STATUS line. Idempotent.
pub fn add_ready_to_mail_suffix(path: &Path, name: &str) -> Result<bool> {
    store::update_status_value(path, name, |current| {
        if current.contains("(!: READY TO MAIL)") {
            return None;
        }
        Some(format!("{current}{READY_TO_MAIL_SUFFIX}"))
    })
}

/// Remove the READY TO MAIL marker from the STATUS line. Idempotent.
pub fn remove_ready_to_mail_suffix(path: &Path, name: &str) -> Result<bool> {
    store::update_status_value(path, name, |current| {
        if !current.contains("(!: READY TO MAIL)") {
            return None;
        }
        Some(current.replace(READY_TO_MAIL_SUFFIX, "").trim().to_string())
    })
}
