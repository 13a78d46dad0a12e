//! Authoritative cross-session check against persisted schedules.
//!
//! Read failures fail open, but as a distinct `Unknown` outcome so callers
//! can tell "checked and clear" from "could not check".

use crate::store::ScheduleStore;
use crate::timetable::SlotKey;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub routine_id: String,
    pub routine_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Clear,
    Conflict(ConflictReport),
    Unknown { reason: String },
}

impl ProbeOutcome {
    /// Whether a write may go ahead. `strict` turns `Unknown` into a refusal.
    pub fn permits_write(&self, strict: bool) -> bool {
        match self {
            ProbeOutcome::Clear => true,
            ProbeOutcome::Conflict(_) => false,
            ProbeOutcome::Unknown { .. } => !strict,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ProbeOutcome::Clear => serde_json::json!({ "status": "clear" }),
            ProbeOutcome::Conflict(c) => serde_json::json!({
                "status": "conflict",
                "routineId": c.routine_id,
                "routineName": c.routine_name,
            }),
            ProbeOutcome::Unknown { reason } => serde_json::json!({
                "status": "unknown",
                "reason": reason,
            }),
        }
    }
}

/// Looks for `teacher_id` at `slot` in every routine except `exclude_routine_id`.
/// One day-collection read per other routine; first match wins.
pub fn find_conflict(
    store: &dyn ScheduleStore,
    teacher_id: &str,
    slot: SlotKey,
    exclude_routine_id: &str,
) -> ProbeOutcome {
    match scan(store, teacher_id, slot, exclude_routine_id) {
        Ok(Some(report)) => {
            debug!(
                teacher = teacher_id,
                %slot,
                routine = %report.routine_id,
                "teacher already booked"
            );
            ProbeOutcome::Conflict(report)
        }
        Ok(None) => ProbeOutcome::Clear,
        Err(e) => {
            warn!(teacher = teacher_id, %slot, error = %e, "conflict probe failed; assuming clear");
            ProbeOutcome::Unknown {
                reason: e.to_string(),
            }
        }
    }
}

fn scan(
    store: &dyn ScheduleStore,
    teacher_id: &str,
    slot: SlotKey,
    exclude_routine_id: &str,
) -> anyhow::Result<Option<ConflictReport>> {
    if teacher_id.is_empty() {
        return Ok(None);
    }
    for routine_id in store.routine_ids()? {
        if routine_id == exclude_routine_id {
            continue;
        }
        let docs = store.day_periods(&routine_id, slot.day())?;
        let booked = docs
            .iter()
            .find(|d| d.period == slot.period())
            .is_some_and(|d| d.assignment.teacher() == Some(teacher_id));
        if booked {
            let routine_name = store
                .routine_name(&routine_id)?
                .unwrap_or_else(|| routine_id.clone());
            return Ok(Some(ConflictReport {
                routine_id,
                routine_name,
            }));
        }
    }
    Ok(None)
}
