//! Per-routine cell editor: Idle -> Editing -> Validating -> Committed | back to Editing.
//!
//! Drafts never touch storage until commit. Every operation carries the
//! token handed out by `open`; a token that no longer names the active edit
//! is refused so late results never land on a different cell.

use crate::assignment_index::AssignmentIndex;
use crate::prober::{find_conflict, ConflictReport, ProbeOutcome};
use crate::store::ScheduleStore;
use crate::timetable::{Assignment, SlotKey};
use serde::Serialize;
use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditError {
    #[error("no cell is being edited")]
    NoActiveEdit,
    #[error("edit {token} is no longer active")]
    Stale { token: u64 },
    #[error("failed to save: {0}")]
    Write(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellEdit {
    pub token: u64,
    #[serde(skip)]
    pub slot: SlotKey,
    pub draft: Assignment,
    #[serde(skip)]
    persisted_teacher: Option<String>,
    pub notice: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditState {
    Idle,
    Editing(CellEdit),
    Validating { token: u64, slot: SlotKey },
    Committed { slot: SlotKey, at: Instant },
}

/// Where a rejection was detected: this session's index or persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    /// The probe could not read storage and the editor is not strict.
    Unverified(String),
    Conflict(ConflictReport, ConflictSource),
    /// The probe could not read storage and the editor is strict.
    Refused(String),
}

impl Verdict {
    pub fn permits(&self) -> bool {
        matches!(self, Verdict::Clear | Verdict::Unverified(_))
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Verdict::Clear => json!({ "status": "clear" }),
            Verdict::Unverified(reason) => json!({ "status": "unverified", "reason": reason }),
            Verdict::Conflict(c, source) => json!({
                "status": "conflict",
                "source": source,
                "routineId": c.routine_id,
                "routineName": c.routine_name,
            }),
            Verdict::Refused(reason) => json!({ "status": "refused", "reason": reason }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Saved { updated_at: String, verdict: Verdict },
    Cleared { removed: bool },
    Rejected(Verdict),
}

/// What the editor borrows from the board for one operation.
pub struct EditContext<'a> {
    pub store: &'a dyn ScheduleStore,
    pub index: &'a mut AssignmentIndex,
    pub routine_name: &'a dyn Fn(&str) -> String,
    pub strict: bool,
    pub now: Instant,
}

#[derive(Debug)]
pub struct GridEditor {
    routine_id: String,
    state: EditState,
    next_token: u64,
    settle: Duration,
}

impl GridEditor {
    pub fn new(routine_id: &str, settle: Duration) -> Self {
        Self {
            routine_id: routine_id.to_string(),
            state: EditState::Idle,
            next_token: 1,
            settle,
        }
    }

    pub fn routine_id(&self) -> &str {
        &self.routine_id
    }

    /// Starts editing `slot` from its persisted content, replacing any open edit.
    pub fn open(&mut self, slot: SlotKey, persisted: Option<Assignment>) -> CellEdit {
        let token = self.next_token;
        self.next_token += 1;
        let persisted = persisted.filter(|a| !a.is_empty());
        let persisted_teacher = persisted
            .as_ref()
            .and_then(|a| a.teacher())
            .map(str::to_string);
        let draft = persisted
            .map(|a| Assignment {
                updated_at: None,
                ..a
            })
            .unwrap_or_default();
        let edit = CellEdit {
            token,
            slot,
            draft,
            persisted_teacher,
            notice: None,
        };
        self.state = EditState::Editing(edit.clone());
        edit
    }

    pub fn cancel(&mut self) {
        self.state = EditState::Idle;
    }

    /// The active edit, if `token` still names it.
    pub fn edit(&self, token: u64) -> Result<&CellEdit, EditError> {
        match &self.state {
            EditState::Editing(edit) if edit.token == token => Ok(edit),
            EditState::Editing(_) | EditState::Validating { .. } => Err(EditError::Stale { token }),
            _ if token < self.next_token => Err(EditError::Stale { token }),
            _ => Err(EditError::NoActiveEdit),
        }
    }

    fn edit_mut(&mut self, token: u64) -> Result<&mut CellEdit, EditError> {
        self.edit(token)?;
        match &mut self.state {
            EditState::Editing(edit) => Ok(edit),
            _ => Err(EditError::NoActiveEdit),
        }
    }

    /// Changing the subject invalidates the teacher choice.
    pub fn set_subject(
        &mut self,
        token: u64,
        subject_code: &str,
        subject_name: &str,
    ) -> Result<&CellEdit, EditError> {
        let edit = self.edit_mut(token)?;
        edit.draft.subject_code = subject_code.to_string();
        edit.draft.subject_name = subject_name.to_string();
        edit.draft.teacher_id = None;
        edit.draft.teacher_name.clear();
        edit.notice = None;
        Ok(edit)
    }

    pub fn set_room(&mut self, token: u64, room: &str) -> Result<&CellEdit, EditError> {
        let edit = self.edit_mut(token)?;
        edit.draft.room = room.trim().to_string();
        Ok(edit)
    }

    /// Checks the teacher locally then against storage; only a clear (or
    /// tolerated unverified) result lands in the draft. A conflict clears
    /// the draft's teacher.
    pub fn select_teacher(
        &mut self,
        token: u64,
        ctx: &mut EditContext<'_>,
        teacher_id: &str,
        teacher_name: &str,
    ) -> Result<Verdict, EditError> {
        let routine_id = self.routine_id.clone();
        let edit = self.edit_mut(token)?;

        if teacher_id.is_empty() {
            edit.draft.teacher_id = None;
            edit.draft.teacher_name.clear();
            edit.notice = None;
            return Ok(Verdict::Clear);
        }

        let verdict = check_teacher(ctx, &routine_id, edit.slot, teacher_id);
        match &verdict {
            Verdict::Conflict(c, _) => {
                edit.draft.teacher_id = None;
                edit.draft.teacher_name.clear();
                edit.notice = Some(format!(
                    "Cannot assign {}. Already scheduled in {}.",
                    display_or(teacher_name, teacher_id),
                    c.routine_name
                ));
            }
            Verdict::Refused(reason) => {
                edit.draft.teacher_id = None;
                edit.draft.teacher_name.clear();
                edit.notice = Some(format!("Could not verify availability: {reason}"));
            }
            Verdict::Clear | Verdict::Unverified(_) => {
                edit.draft.teacher_id = Some(teacher_id.to_string());
                edit.draft.teacher_name = teacher_name.to_string();
                edit.notice = None;
            }
        }
        Ok(verdict)
    }

    /// Re-validates and persists the draft. An empty subject deletes the cell.
    /// On a rejection or a failed write the draft stays open for another try.
    pub fn commit(
        &mut self,
        token: u64,
        ctx: &mut EditContext<'_>,
    ) -> Result<CommitOutcome, EditError> {
        let mut edit = self.begin_validation(token)?;

        if edit.draft.is_empty() {
            return self.finish_delete(edit, ctx);
        }

        let verdict = match edit.draft.teacher() {
            Some(teacher) => check_teacher(ctx, &self.routine_id, edit.slot, teacher),
            None => Verdict::Clear,
        };
        if !verdict.permits() {
            match &verdict {
                Verdict::Conflict(c, _) => {
                    edit.notice = Some(format!(
                        "Cannot save. {} is already scheduled in {}.",
                        display_or(&edit.draft.teacher_name, edit.draft.teacher().unwrap_or("")),
                        c.routine_name
                    ));
                }
                Verdict::Refused(reason) => {
                    edit.notice = Some(format!("Could not verify availability: {reason}"));
                }
                Verdict::Clear | Verdict::Unverified(_) => {}
            }
            self.state = EditState::Editing(edit);
            return Ok(CommitOutcome::Rejected(verdict));
        }

        let previous = self.previous_teacher(ctx.store, &edit);
        match ctx.store.upsert_period(&self.routine_id, edit.slot, &edit.draft) {
            Ok(updated_at) => {
                self.settle_claim(ctx.index, &edit, edit.draft.teacher(), previous.as_deref());
                info!(routine = %self.routine_id, slot = %edit.slot, "cell saved");
                self.state = EditState::Committed {
                    slot: edit.slot,
                    at: ctx.now,
                };
                Ok(CommitOutcome::Saved {
                    updated_at,
                    verdict,
                })
            }
            Err(e) => {
                warn!(routine = %self.routine_id, slot = %edit.slot, error = %e, "cell save failed");
                edit.notice = Some(format!("Failed to save: {e}"));
                self.state = EditState::Editing(edit);
                Err(EditError::Write(e.to_string()))
            }
        }
    }

    /// Removes the cell's document regardless of the draft.
    pub fn clear(
        &mut self,
        token: u64,
        ctx: &mut EditContext<'_>,
    ) -> Result<CommitOutcome, EditError> {
        let edit = self.begin_validation(token)?;
        self.finish_delete(edit, ctx)
    }

    /// Phase name for display; a commit reads as `idle` once the settle delay passes.
    pub fn phase(&mut self, now: Instant) -> &EditState {
        if let EditState::Committed { at, .. } = self.state {
            if now.duration_since(at) >= self.settle {
                self.state = EditState::Idle;
            }
        }
        &self.state
    }

    pub fn state_json(&mut self, now: Instant) -> serde_json::Value {
        match self.phase(now) {
            EditState::Idle => json!({ "phase": "idle" }),
            EditState::Editing(edit) => json!({
                "phase": "editing",
                "day": edit.slot.day().key(),
                "period": edit.slot.period(),
                "token": edit.token,
                "draft": edit.draft,
                "notice": edit.notice,
            }),
            EditState::Validating { token, slot } => json!({
                "phase": "validating",
                "day": slot.day().key(),
                "period": slot.period(),
                "token": token,
            }),
            EditState::Committed { slot, .. } => json!({
                "phase": "committed",
                "day": slot.day().key(),
                "period": slot.period(),
            }),
        }
    }

    fn begin_validation(&mut self, token: u64) -> Result<CellEdit, EditError> {
        self.edit(token)?;
        let EditState::Editing(edit) = std::mem::replace(&mut self.state, EditState::Idle) else {
            return Err(EditError::NoActiveEdit);
        };
        self.state = EditState::Validating {
            token,
            slot: edit.slot,
        };
        Ok(edit)
    }

    fn finish_delete(
        &mut self,
        mut edit: CellEdit,
        ctx: &mut EditContext<'_>,
    ) -> Result<CommitOutcome, EditError> {
        let previous = self.previous_teacher(ctx.store, &edit);
        match ctx.store.delete_period(&self.routine_id, edit.slot) {
            Ok(removed) => {
                self.settle_claim(ctx.index, &edit, None, previous.as_deref());
                info!(routine = %self.routine_id, slot = %edit.slot, removed, "cell cleared");
                self.state = EditState::Committed {
                    slot: edit.slot,
                    at: ctx.now,
                };
                Ok(CommitOutcome::Cleared { removed })
            }
            Err(e) => {
                warn!(routine = %self.routine_id, slot = %edit.slot, error = %e, "cell clear failed");
                edit.notice = Some(format!("Failed to clear: {e}"));
                self.state = EditState::Editing(edit);
                Err(EditError::Write(e.to_string()))
            }
        }
    }

    /// Points the index at what the cell now holds. Both the teacher stored
    /// before the write and the one this board saw when the edit opened are
    /// released; they differ when another session wrote the cell in between.
    fn settle_claim(
        &self,
        index: &mut AssignmentIndex,
        edit: &CellEdit,
        teacher: Option<&str>,
        stored: Option<&str>,
    ) {
        index.record_assignment(&self.routine_id, edit.slot, teacher, stored);
        if let Some(opened) = edit.persisted_teacher.as_deref() {
            if Some(opened) != teacher && Some(opened) != stored {
                index.record_assignment(&self.routine_id, edit.slot, None, Some(opened));
            }
        }
    }

    /// The teacher stored at the cell right before a write. Falls back to
    /// what was there when the edit opened if storage cannot be read.
    fn previous_teacher(&self, store: &dyn ScheduleStore, edit: &CellEdit) -> Option<String> {
        match store.period(&self.routine_id, edit.slot) {
            Ok(current) => current.and_then(|a| a.teacher().map(str::to_string)),
            Err(e) => {
                warn!(routine = %self.routine_id, slot = %edit.slot, error = %e, "could not read cell before write");
                edit.persisted_teacher.clone()
            }
        }
    }
}

fn check_teacher(
    ctx: &mut EditContext<'_>,
    routine_id: &str,
    slot: SlotKey,
    teacher_id: &str,
) -> Verdict {
    if let Some(other) = ctx.index.conflicting_routine(routine_id, slot, teacher_id) {
        let report = ConflictReport {
            routine_id: other.to_string(),
            routine_name: (ctx.routine_name)(other),
        };
        return Verdict::Conflict(report, ConflictSource::Local);
    }
    let outcome = find_conflict(ctx.store, teacher_id, slot, routine_id);
    let permitted = outcome.permits_write(ctx.strict);
    match outcome {
        ProbeOutcome::Clear => Verdict::Clear,
        ProbeOutcome::Conflict(report) => Verdict::Conflict(report, ConflictSource::Remote),
        ProbeOutcome::Unknown { reason } if permitted => Verdict::Unverified(reason),
        ProbeOutcome::Unknown { reason } => Verdict::Refused(reason),
    }
}

fn display_or<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    if name.trim().is_empty() {
        fallback
    } else {
        name
    }
}
