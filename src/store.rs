use crate::db::now_rfc3339;
use crate::timetable::{Assignment, Day, SlotKey};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

/// A stored period document together with its (string-keyed) period number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodDoc {
    pub period: u8,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub seq: i64,
    pub routine_id: String,
    pub day: String,
    pub period: String,
}

/// Everything the conflict core needs from persisted schedule state.
pub trait ScheduleStore {
    fn routine_ids(&self) -> anyhow::Result<Vec<String>>;
    fn routine_name(&self, routine_id: &str) -> anyhow::Result<Option<String>>;
    /// Period documents of one routine/day, ordered by period number.
    fn day_periods(&self, routine_id: &str, day: Day) -> anyhow::Result<Vec<PeriodDoc>>;
    fn period(&self, routine_id: &str, slot: SlotKey) -> anyhow::Result<Option<Assignment>>;
    /// Create-or-merge; returns the timestamp written.
    fn upsert_period(
        &self,
        routine_id: &str,
        slot: SlotKey,
        assignment: &Assignment,
    ) -> anyhow::Result<String>;
    /// Returns whether a document was removed.
    fn delete_period(&self, routine_id: &str, slot: SlotKey) -> anyhow::Result<bool>;
    fn latest_change_seq(&self) -> anyhow::Result<i64>;
    fn changes_since(&self, seq: i64) -> anyhow::Result<Vec<ChangeEvent>>;
}

impl ScheduleStore for Connection {
    fn routine_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut stmt = self.prepare("SELECT id FROM routines ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn routine_name(&self, routine_id: &str) -> anyhow::Result<Option<String>> {
        let name: Option<Option<String>> = self
            .query_row("SELECT name FROM routines WHERE id = ?", [routine_id], |r| {
                r.get(0)
            })
            .optional()?;
        Ok(name.flatten().filter(|n| !n.trim().is_empty()))
    }

    fn day_periods(&self, routine_id: &str, day: Day) -> anyhow::Result<Vec<PeriodDoc>> {
        let mut stmt = self.prepare(
            "SELECT period, subject_code, subject_name, teacher_id, teacher_name, room, updated_at
             FROM periods
             WHERE routine_id = ? AND day = ?",
        )?;
        let mut docs = Vec::new();
        let mut rows = stmt.query((routine_id, day.key()))?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            // Keys that are not period numbers are not schedule cells.
            let Ok(period) = key.parse::<u8>() else {
                continue;
            };
            docs.push(PeriodDoc {
                period,
                assignment: assignment_from_row(row, 1)?,
            });
        }
        docs.sort_by_key(|d| d.period);
        Ok(docs)
    }

    fn period(&self, routine_id: &str, slot: SlotKey) -> anyhow::Result<Option<Assignment>> {
        Ok(self
            .query_row(
                "SELECT subject_code, subject_name, teacher_id, teacher_name, room, updated_at
                 FROM periods
                 WHERE routine_id = ? AND day = ? AND period = ?",
                (routine_id, slot.day().key(), slot.period_key()),
                |row| assignment_from_row(row, 0),
            )
            .optional()?)
    }

    fn upsert_period(
        &self,
        routine_id: &str,
        slot: SlotKey,
        assignment: &Assignment,
    ) -> anyhow::Result<String> {
        let updated_at = now_rfc3339();
        let tx = self.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO periods(
               routine_id, day, period, subject_code, subject_name,
               teacher_id, teacher_name, room, updated_at
             )
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(routine_id, day, period) DO UPDATE SET
               subject_code = excluded.subject_code,
               subject_name = excluded.subject_name,
               teacher_id = excluded.teacher_id,
               teacher_name = excluded.teacher_name,
               room = excluded.room,
               updated_at = excluded.updated_at",
            (
                routine_id,
                slot.day().key(),
                slot.period_key(),
                &assignment.subject_code,
                &assignment.subject_name,
                assignment.teacher(),
                &assignment.teacher_name,
                &assignment.room,
                &updated_at,
            ),
        )?;
        log_change(&tx, routine_id, slot, &updated_at)?;
        tx.commit()?;
        Ok(updated_at)
    }

    fn delete_period(&self, routine_id: &str, slot: SlotKey) -> anyhow::Result<bool> {
        let tx = self.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM periods WHERE routine_id = ? AND day = ? AND period = ?",
            (routine_id, slot.day().key(), slot.period_key()),
        )?;
        if removed > 0 {
            log_change(&tx, routine_id, slot, &now_rfc3339())?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    fn latest_change_seq(&self) -> anyhow::Result<i64> {
        Ok(self.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM schedule_changes",
            [],
            |r| r.get(0),
        )?)
    }

    fn changes_since(&self, seq: i64) -> anyhow::Result<Vec<ChangeEvent>> {
        let mut stmt = self.prepare(
            "SELECT seq, routine_id, day, period FROM schedule_changes WHERE seq > ? ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([seq], |row| {
                Ok(ChangeEvent {
                    seq: row.get(0)?,
                    routine_id: row.get(1)?,
                    day: row.get(2)?,
                    period: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn assignment_from_row(row: &rusqlite::Row<'_>, first: usize) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        subject_code: row.get(first)?,
        subject_name: row.get(first + 1)?,
        teacher_id: row
            .get::<_, Option<String>>(first + 2)?
            .filter(|t| !t.is_empty()),
        teacher_name: row.get(first + 3)?,
        room: row.get(first + 4)?,
        updated_at: row.get(first + 5)?,
    })
}

fn log_change(
    conn: &Connection,
    routine_id: &str,
    slot: SlotKey,
    changed_at: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schedule_changes(routine_id, day, period, changed_at) VALUES(?, ?, ?, ?)",
        (routine_id, slot.day().key(), slot.period_key(), changed_at),
    )?;
    Ok(())
}
