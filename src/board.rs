//! The coordinator for every routine opened in one session. It alone owns
//! the assignment index; editors and grids reach it only through here.

use crate::assignment_index::AssignmentIndex;
use crate::commit::{CellEdit, CommitOutcome, EditContext, EditError, GridEditor, Verdict};
use crate::store::{PeriodDoc, ScheduleStore};
use crate::timetable::{Day, SlotKey};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct OpenRoutine {
    pub name: Option<String>,
    pub days: BTreeMap<Day, Vec<PeriodDoc>>,
}

impl OpenRoutine {
    fn load(store: &dyn ScheduleStore, routine_id: &str) -> anyhow::Result<OpenRoutine> {
        let mut days = BTreeMap::new();
        for day in Day::ALL {
            days.insert(day, store.day_periods(routine_id, day)?);
        }
        Ok(OpenRoutine {
            name: store.routine_name(routine_id)?,
            days,
        })
    }

    /// Teaching-slot claims held by this routine's cached cells.
    fn claims(&self) -> impl Iterator<Item = (SlotKey, &str)> + '_ {
        self.days.iter().flat_map(|(day, docs)| {
            docs.iter().filter_map(move |d| {
                let slot = SlotKey::new(*day, i64::from(d.period)).ok()?;
                Some((slot, d.assignment.teacher()?))
            })
        })
    }

    fn cell(&self, slot: SlotKey) -> Option<&PeriodDoc> {
        self.days
            .get(&slot.day())?
            .iter()
            .find(|d| d.period == slot.period())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCheck {
    pub available: bool,
    pub conflicting_routine_id: Option<String>,
    pub conflicting_routine_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub cursor: i64,
    pub changed_routines: Vec<String>,
}

pub struct RoutineBoard {
    index: AssignmentIndex,
    open: BTreeMap<String, OpenRoutine>,
    editors: BTreeMap<String, GridEditor>,
    cursor: Option<i64>,
    settle: Duration,
    strict: bool,
}

impl RoutineBoard {
    pub fn new(settle: Duration, strict: bool) -> Self {
        Self {
            index: AssignmentIndex::new(),
            open: BTreeMap::new(),
            editors: BTreeMap::new(),
            cursor: None,
            settle,
            strict,
        }
    }

    /// Forget everything; used when the workspace changes.
    pub fn reset(&mut self) {
        self.index.clear();
        self.open.clear();
        self.editors.clear();
        self.cursor = None;
    }

    pub fn index(&self) -> &AssignmentIndex {
        &self.index
    }

    pub fn is_open(&self, routine_id: &str) -> bool {
        self.open.contains_key(routine_id)
    }

    pub fn open_routines(&self) -> impl Iterator<Item = (&str, &OpenRoutine)> {
        self.open.iter().map(|(id, r)| (id.as_str(), r))
    }

    pub fn display_name(&self, routine_id: &str) -> String {
        display_name(&self.open, routine_id)
    }

    /// Loads (or reloads) a routine and records its claims.
    pub fn open_routine(
        &mut self,
        store: &dyn ScheduleStore,
        routine_id: &str,
    ) -> anyhow::Result<&OpenRoutine> {
        if self.cursor.is_none() {
            self.cursor = Some(store.latest_change_seq()?);
        }
        let loaded = OpenRoutine::load(store, routine_id)?;
        self.index.remove_routine(routine_id);
        for (slot, teacher) in loaded.claims() {
            self.index.record_assignment(routine_id, slot, Some(teacher), None);
        }
        self.editors
            .entry(routine_id.to_string())
            .or_insert_with(|| GridEditor::new(routine_id, self.settle));
        info!(routine = routine_id, claims = self.index.claim_count(), "routine opened");
        self.open.insert(routine_id.to_string(), loaded);
        Ok(&self.open[routine_id])
    }

    pub fn rename_routine(&mut self, routine_id: &str, name: &str) {
        if let Some(routine) = self.open.get_mut(routine_id) {
            routine.name = Some(name.to_string()).filter(|n| !n.trim().is_empty());
        }
    }

    pub fn close_routine(&mut self, routine_id: &str) -> bool {
        self.index.remove_routine(routine_id);
        self.editors.remove(routine_id);
        let was_open = self.open.remove(routine_id).is_some();
        if was_open {
            info!(routine = routine_id, "routine closed");
        }
        was_open
    }

    pub fn check(&self, routine_id: &str, slot: SlotKey, teacher_id: &str) -> LocalCheck {
        let conflicting = self
            .index
            .conflicting_routine(routine_id, slot, teacher_id)
            .map(str::to_string);
        LocalCheck {
            available: self.index.is_available(routine_id, slot, teacher_id),
            conflicting_routine_name: conflicting.as_deref().map(|id| self.display_name(id)),
            conflicting_routine_id: conflicting,
        }
    }

    /// Pulls persisted changes since the last sync, reloads every open routine
    /// they touch, then rebuilds the index from the cached schedules. Cells
    /// already committed are not re-checked.
    pub fn sync(&mut self, store: &dyn ScheduleStore) -> anyhow::Result<SyncReport> {
        let since = match self.cursor {
            Some(c) => c,
            None => store.latest_change_seq()?,
        };
        let changes = store.changes_since(since)?;
        let cursor = changes.last().map(|c| c.seq).unwrap_or(since);
        let touched: BTreeSet<String> = changes
            .into_iter()
            .map(|c| c.routine_id)
            .filter(|id| self.open.contains_key(id))
            .collect();

        for routine_id in &touched {
            let loaded = OpenRoutine::load(store, routine_id)?;
            self.open.insert(routine_id.clone(), loaded);
        }
        if !touched.is_empty() {
            self.rebuild_index();
        }
        self.cursor = Some(cursor);
        debug!(cursor, changed = touched.len(), "board synced");
        Ok(SyncReport {
            cursor,
            changed_routines: touched.into_iter().collect(),
        })
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (routine_id, routine) in &self.open {
            for (slot, teacher) in routine.claims() {
                self.index.record_assignment(routine_id, slot, Some(teacher), None);
            }
        }
    }

    pub fn editor_mut(&mut self, routine_id: &str) -> Option<&mut GridEditor> {
        self.editors.get_mut(routine_id)
    }

    /// Opens the routine if needed, then starts editing `slot` from its stored content.
    pub fn edit_open(
        &mut self,
        store: &dyn ScheduleStore,
        routine_id: &str,
        slot: SlotKey,
    ) -> anyhow::Result<CellEdit> {
        if !self.is_open(routine_id) {
            self.open_routine(store, routine_id)?;
        }
        let persisted = self.open[routine_id]
            .cell(slot)
            .map(|d| d.assignment.clone());
        let editor = self
            .editors
            .entry(routine_id.to_string())
            .or_insert_with(|| GridEditor::new(routine_id, self.settle));
        Ok(editor.open(slot, persisted))
    }

    pub fn edit_select_teacher(
        &mut self,
        store: &dyn ScheduleStore,
        routine_id: &str,
        token: u64,
        teacher_id: &str,
        teacher_name: &str,
        now: Instant,
    ) -> Result<Verdict, EditError> {
        let Self {
            index,
            open,
            editors,
            strict,
            ..
        } = self;
        let editor = editors.get_mut(routine_id).ok_or(EditError::NoActiveEdit)?;
        let names = |id: &str| display_name(open, id);
        let mut ctx = EditContext {
            store,
            index,
            routine_name: &names,
            strict: *strict,
            now,
        };
        editor.select_teacher(token, &mut ctx, teacher_id, teacher_name)
    }

    pub fn edit_commit(
        &mut self,
        store: &dyn ScheduleStore,
        routine_id: &str,
        token: u64,
        clear: bool,
        now: Instant,
    ) -> Result<CommitOutcome, EditError> {
        let slot = {
            let editor = self.editors.get(routine_id).ok_or(EditError::NoActiveEdit)?;
            editor.edit(token)?.slot
        };
        let outcome = {
            let Self {
                index,
                open,
                editors,
                strict,
                ..
            } = &mut *self;
            let editor = editors.get_mut(routine_id).ok_or(EditError::NoActiveEdit)?;
            let names = |id: &str| display_name(open, id);
            let mut ctx = EditContext {
                store,
                index,
                routine_name: &names,
                strict: *strict,
                now,
            };
            if clear {
                editor.clear(token, &mut ctx)?
            } else {
                editor.commit(token, &mut ctx)?
            }
        };
        if !matches!(outcome, CommitOutcome::Rejected(_)) {
            self.refresh_cell(store, routine_id, slot);
        }
        Ok(outcome)
    }

    /// Keeps the cached grid in step with a write this board just made.
    fn refresh_cell(&mut self, store: &dyn ScheduleStore, routine_id: &str, slot: SlotKey) {
        let Some(routine) = self.open.get_mut(routine_id) else {
            return;
        };
        let current = match store.period(routine_id, slot) {
            Ok(current) => current,
            Err(e) => {
                warn!(routine = %routine_id, slot = %slot, error = %e, "could not refresh cached cell");
                return;
            }
        };
        let docs = routine.days.entry(slot.day()).or_default();
        docs.retain(|d| d.period != slot.period());
        if let Some(assignment) = current {
            docs.push(PeriodDoc {
                period: slot.period(),
                assignment,
            });
            docs.sort_by_key(|d| d.period);
        }
    }
}

fn display_name(open: &BTreeMap<String, OpenRoutine>, routine_id: &str) -> String {
    open.get(routine_id)
        .and_then(|r| r.name.clone())
        .unwrap_or_else(|| routine_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{assign, workspace};
    use std::time::Duration;

    fn board() -> RoutineBoard {
        RoutineBoard::new(Duration::from_millis(1000), false)
    }

    fn slot(day: Day, period: i64) -> SlotKey {
        SlotKey::new(day, period).expect("slot")
    }

    #[test]
    fn opening_routines_records_their_claims() {
        let conn = workspace(&[("IT1", Some("IT Year 1")), ("IT2", None)]);
        assign(&conn, "IT1", slot(Day::Mon, 2), "CS1", "T7");
        assign(&conn, "IT2", slot(Day::Tue, 3), "CS2", "T8");
        let mut b = board();
        b.open_routine(&conn, "IT1").expect("open");
        b.open_routine(&conn, "IT2").expect("open");

        let check = b.check("IT2", slot(Day::Mon, 2), "T7");
        assert!(!check.available);
        assert_eq!(check.conflicting_routine_id.as_deref(), Some("IT1"));
        assert_eq!(check.conflicting_routine_name.as_deref(), Some("IT Year 1"));
        assert!(b.check("IT1", slot(Day::Mon, 2), "T7").available);

        assert!(b.close_routine("IT1"));
        assert!(b.check("IT2", slot(Day::Mon, 2), "T7").available);
        assert!(!b.close_routine("IT1"));
    }

    #[test]
    fn reopening_does_not_duplicate_or_leak_claims() {
        let conn = workspace(&[("A", None)]);
        assign(&conn, "A", slot(Day::Fri, 1), "CS1", "T1");
        let mut b = board();
        b.open_routine(&conn, "A").expect("open");
        conn.delete_period("A", slot(Day::Fri, 1)).expect("delete");
        b.open_routine(&conn, "A").expect("reopen");
        assert!(b.index().is_empty());
    }

    #[test]
    fn sync_picks_up_writes_from_other_sessions() {
        let conn = workspace(&[("A", None), ("B", None), ("C", None)]);
        let mut b = board();
        b.open_routine(&conn, "A").expect("open");
        b.open_routine(&conn, "B").expect("open");

        // Another session writes to A and to C, which this board never opened.
        assign(&conn, "A", slot(Day::Wed, 5), "CS1", "T1");
        assign(&conn, "C", slot(Day::Wed, 5), "CS1", "T2");

        assert!(b.check("B", slot(Day::Wed, 5), "T1").available);
        let report = b.sync(&conn).expect("sync");
        assert_eq!(report.changed_routines, vec!["A".to_string()]);
        assert!(!b.check("B", slot(Day::Wed, 5), "T1").available);
        assert!(b.check("B", slot(Day::Wed, 5), "T2").available);

        let again = b.sync(&conn).expect("sync");
        assert!(again.changed_routines.is_empty());
        assert_eq!(again.cursor, report.cursor);
    }

    #[test]
    fn commits_update_index_and_cached_grid() {
        let conn = workspace(&[("IT1", None), ("IT2", None)]);
        let mut b = board();
        let now = Instant::now();
        let s = slot(Day::Mon, 2);

        let edit = b.edit_open(&conn, "IT1", s).expect("edit");
        b.editor_mut("IT1")
            .expect("editor")
            .set_subject(edit.token, "CS1", "Programming")
            .expect("subject");
        let v = b
            .edit_select_teacher(&conn, "IT1", edit.token, "T7", "Seven", now)
            .expect("select");
        assert_eq!(v, Verdict::Clear);
        let out = b.edit_commit(&conn, "IT1", edit.token, false, now).expect("commit");
        assert!(matches!(out, CommitOutcome::Saved { .. }));

        assert!(b.open_routines().any(|(id, r)| id == "IT1" && r.cell(s).is_some()));

        let other = b.edit_open(&conn, "IT2", s).expect("edit");
        let v = b
            .edit_select_teacher(&conn, "IT2", other.token, "T7", "Seven", now)
            .expect("select");
        assert!(matches!(
            v,
            Verdict::Conflict(_, crate::commit::ConflictSource::Local)
        ));

        let token = b.edit_open(&conn, "IT1", s).expect("edit").token;
        let out = b.edit_commit(&conn, "IT1", token, true, now).expect("clear");
        assert_eq!(out, CommitOutcome::Cleared { removed: true });
        assert!(b.index().is_empty());
        assert!(b.open_routines().all(|(_, r)| r.cell(s).is_none()));
    }

    #[test]
    fn writing_over_a_cell_changed_elsewhere_drops_the_claim_this_board_held() {
        let conn = workspace(&[("A", None), ("B", None)]);
        let now = Instant::now();
        let s = slot(Day::Mon, 1);
        assign(&conn, "A", s, "CS1", "T1");
        let mut b = board();
        b.open_routine(&conn, "A").expect("open");
        b.open_routine(&conn, "B").expect("open");

        // Another session swaps the teacher before this board syncs.
        assign(&conn, "A", s, "CS1", "T2");

        let token = b.edit_open(&conn, "A", s).expect("edit").token;
        let out = b.edit_commit(&conn, "A", token, true, now).expect("clear");
        assert_eq!(out, CommitOutcome::Cleared { removed: true });
        assert!(b.index().teacher_slots("T1").is_empty());
        assert!(b.index().is_empty());
        assert!(b.check("B", s, "T1").available);

        assign(&conn, "A", s, "CS1", "T2");
        b.sync(&conn).expect("sync");
        assign(&conn, "A", s, "CS1", "T3");
        let token = b.edit_open(&conn, "A", s).expect("edit").token;
        b.editor_mut("A")
            .expect("editor")
            .set_subject(token, "CS2", "Networks")
            .expect("subject");
        b.edit_select_teacher(&conn, "A", token, "T4", "Four", now)
            .expect("select");
        let out = b.edit_commit(&conn, "A", token, false, now).expect("commit");
        assert!(matches!(out, CommitOutcome::Saved { .. }));
        assert!(b.check("B", s, "T2").available);
        assert!(b.check("B", s, "T3").available);
        assert!(!b.check("B", s, "T4").available);
        assert_eq!(b.index().claim_count(), 1);
    }

    #[test]
    fn unreadable_cell_leaves_cached_grid_alone() {
        let conn = workspace(&[("A", None)]);
        let s = slot(Day::Tue, 2);
        assign(&conn, "A", s, "CS1", "T1");
        let mut b = board();
        b.open_routine(&conn, "A").expect("open");

        b.refresh_cell(&crate::store::testing::BrokenStore, "A", s);
        let cached = b
            .open_routines()
            .find(|(id, _)| *id == "A")
            .and_then(|(_, r)| r.cell(s))
            .map(|d| d.assignment.teacher().map(str::to_string));
        assert_eq!(cached, Some(Some("T1".to_string())));
    }
}
