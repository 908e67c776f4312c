//! Status condition helpers
//!
//! Every topology resource carries a single `Ready` condition. Rebuilding it
//! keeps the previous `lastTransitionTime` whenever the status value did not
//! flip, so repeated reconciliation with the same outcome leaves the
//! timestamp untouched.

use crate::crd::Condition;
use chrono::{SecondsFormat, Utc};

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// Condition types
pub const CONDITION_READY: &str = "Ready";

// Condition reasons
pub const REASON_SUCCESS: &str = "SuccessfulCreateOrUpdate";
pub const REASON_FAILURE: &str = "FailedCreateOrUpdate";

/// Build a condition stamped with the current time.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: Option<&str>,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        reason: Some(reason.to_string()),
        message: message.map(str::to_string),
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<Condition>, new: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

/// The condition list for a successful create-or-update.
pub fn ready(previous: &[Condition]) -> Vec<Condition> {
    replace_ready(previous, CONDITION_TRUE, REASON_SUCCESS, None)
}

/// The condition list for a failed create-or-update.
pub fn not_ready(message: &str, previous: &[Condition]) -> Vec<Condition> {
    replace_ready(previous, CONDITION_FALSE, REASON_FAILURE, Some(message))
}

/// Replace the whole list with one `Ready` condition carrying over the
/// transition time of a previous `Ready` with the same status.
pub fn replace_ready(
    previous: &[Condition],
    status: &str,
    reason: &str,
    message: Option<&str>,
) -> Vec<Condition> {
    let mut conditions: Vec<Condition> = previous
        .iter()
        .filter(|c| c.r#type == CONDITION_READY)
        .take(1)
        .cloned()
        .collect();
    set_condition(
        &mut conditions,
        build_condition(CONDITION_READY, status, reason, message),
    );
    conditions
}

/// Whether the list holds a `Ready=True` condition.
pub fn is_ready(conditions: &[Condition]) -> bool {
    conditions
        .iter()
        .any(|c| c.r#type == CONDITION_READY && c.status == CONDITION_TRUE)
}
