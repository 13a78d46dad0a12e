//! Same-session view of which teachers are claimed at which slots, across
//! every routine the board currently has open.
//!
//! Shape: teacher id -> slot -> routine ids holding that teacher there.
//! Empty slot sets and empty teacher entries are never kept.

use crate::timetable::SlotKey;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssignmentIndex {
    claims: BTreeMap<String, BTreeMap<SlotKey, BTreeSet<String>>>,
}

impl AssignmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `previous_teacher`'s claim on `slot` for `routine_id` (if any),
    /// then claims `slot` for `teacher` (if any).
    pub fn record_assignment(
        &mut self,
        routine_id: &str,
        slot: SlotKey,
        teacher: Option<&str>,
        previous_teacher: Option<&str>,
    ) {
        if let Some(prev) = previous_teacher.filter(|t| !t.is_empty()) {
            self.release(prev, slot, routine_id);
        }
        if let Some(t) = teacher.filter(|t| !t.is_empty()) {
            self.claims
                .entry(t.to_string())
                .or_default()
                .entry(slot)
                .or_default()
                .insert(routine_id.to_string());
        }
    }

    pub fn is_available(&self, routine_id: &str, slot: SlotKey, teacher: &str) -> bool {
        match self.holders(teacher, slot) {
            None => true,
            Some(set) => set.iter().all(|r| r == routine_id),
        }
    }

    /// First other routine (in id order) holding `teacher` at `slot`.
    pub fn conflicting_routine(
        &self,
        routine_id: &str,
        slot: SlotKey,
        teacher: &str,
    ) -> Option<&str> {
        self.holders(teacher, slot)?
            .iter()
            .find(|r| r.as_str() != routine_id)
            .map(String::as_str)
    }

    pub fn remove_routine(&mut self, routine_id: &str) {
        self.claims.retain(|_, slots| {
            slots.retain(|_, routines| {
                routines.remove(routine_id);
                !routines.is_empty()
            });
            !slots.is_empty()
        });
    }

    pub fn clear(&mut self) {
        self.claims.clear();
    }

    /// Slots claimed by `teacher`, each with the routines holding it.
    pub fn teacher_slots(&self, teacher: &str) -> Vec<(SlotKey, Vec<&str>)> {
        self.claims
            .get(teacher)
            .map(|slots| {
                slots
                    .iter()
                    .map(|(slot, routines)| (*slot, routines.iter().map(String::as_str).collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn teacher_count(&self) -> usize {
        self.claims.len()
    }

    pub fn claim_count(&self) -> usize {
        self.claims
            .values()
            .flat_map(|slots| slots.values())
            .map(BTreeSet::len)
            .sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    fn holders(&self, teacher: &str, slot: SlotKey) -> Option<&BTreeSet<String>> {
        self.claims.get(teacher)?.get(&slot)
    }

    fn release(&mut self, teacher: &str, slot: SlotKey, routine_id: &str) {
        let Some(slots) = self.claims.get_mut(teacher) else {
            return;
        };
        if let Some(routines) = slots.get_mut(&slot) {
            routines.remove(routine_id);
            if routines.is_empty() {
                slots.remove(&slot);
            }
        }
        if slots.is_empty() {
            self.claims.remove(teacher);
        }
    }

    #[cfg(test)]
    fn has_no_empty_containers(&self) -> bool {
        self.claims
            .values()
            .all(|slots| !slots.is_empty() && slots.values().all(|r| !r.is_empty()))
    }
}
