use crate::domain::model::{CourseId, MeetingInterval, StudentId};
use crate::domain::ports::ScheduleIndex;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};

type StudentSchedule = BTreeMap<CourseId, BTreeSet<MeetingInterval>>;

/// In-memory schedule index, one entry per student.
///
/// Rebuilt from the enrollment store on startup; never persisted on its own.
#[derive(Debug, Default)]
pub struct InMemoryScheduleIndex {
    students: DashMap<StudentId, StudentSchedule>,
}

impl InMemoryScheduleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn student_count(&self) -> usize {
        self.students.len()
    }
}

impl ScheduleIndex for InMemoryScheduleIndex {
    fn has_conflict(&self, student: &StudentId, candidates: &[MeetingInterval]) -> Option<CourseId> {
        let schedule = self.students.get(student)?;
        let clash = schedule.iter().find_map(|(course, indexed)| {
            indexed
                .iter()
                .any(|existing| candidates.iter().any(|c| existing.overlaps(c)))
                .then_some(*course)
        });
        clash
    }

    fn add(&self, student: &StudentId, course: CourseId, intervals: &[MeetingInterval]) {
        let mut schedule = self.students.entry(student.clone()).or_default();
        schedule
            .entry(course)
            .or_default()
            .extend(intervals.iter().copied());
    }

    fn remove(&self, student: &StudentId, course: CourseId, intervals: &[MeetingInterval]) {
        let Some(mut schedule) = self.students.get_mut(student) else {
            return;
        };
        if let Some(indexed) = schedule.get_mut(&course) {
            for interval in intervals {
                indexed.remove(interval);
            }
            if indexed.is_empty() {
                schedule.remove(&course);
            }
        }
        let now_empty = schedule.is_empty();
        drop(schedule);
        if now_empty {
            self.students.remove_if(student, |_, s| s.is_empty());
        }
    }

    fn remove_course(&self, student: &StudentId, course: CourseId) -> Vec<MeetingInterval> {
        let Some(mut schedule) = self.students.get_mut(student) else {
            return Vec::new();
        };
        let removed = schedule.remove(&course).unwrap_or_default();
        let now_empty = schedule.is_empty();
        drop(schedule);
        if now_empty {
            self.students.remove_if(student, |_, s| s.is_empty());
        }
        removed.into_iter().collect()
    }

    fn intervals_for(&self, student: &StudentId) -> Vec<(CourseId, Vec<MeetingInterval>)> {
        self.students
            .get(student)
            .map(|schedule| {
                schedule
                    .iter()
                    .map(|(course, set)| (*course, set.iter().copied().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn slot(start_hour: u32, start_min: u32, end_hour: u32, end_min: u32) -> MeetingInterval {
        MeetingInterval::new(
            Utc.with_ymd_and_hms(2024, 9, 2, start_hour, start_min, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 9, 2, end_hour, end_min, 0).unwrap(),
        )
    }

    #[test]
    fn test_conflict_reports_clashing_course() {
        let index = InMemoryScheduleIndex::new();
        let alice = StudentId::from("alice");
        index.add(&alice, CourseId(1), &[slot(10, 0, 11, 0)]);

        assert_eq!(index.has_conflict(&alice, &[slot(10, 30, 11, 30)]), Some(CourseId(1)));
        assert_eq!(index.has_conflict(&alice, &[slot(11, 0, 12, 0)]), None);
    }

    #[test]
    fn test_students_are_independent() {
        let index = InMemoryScheduleIndex::new();
        index.add(&StudentId::from("alice"), CourseId(1), &[slot(10, 0, 11, 0)]);

        assert_eq!(
            index.has_conflict(&StudentId::from("bob"), &[slot(10, 0, 11, 0)]),
            None
        );
    }

    #[test]
    fn test_add_and_remove_are_idempotent() {
        let index = InMemoryScheduleIndex::new();
        let alice = StudentId::from("alice");
        let meetings = [slot(8, 0, 9, 0), slot(13, 0, 14, 0)];

        index.add(&alice, CourseId(3), &meetings);
        index.add(&alice, CourseId(3), &meetings);
        assert_eq!(index.intervals_for(&alice), vec![(CourseId(3), meetings.to_vec())]);

        index.remove(&alice, CourseId(3), &meetings);
        index.remove(&alice, CourseId(3), &meetings);
        assert!(index.intervals_for(&alice).is_empty());
        assert_eq!(index.student_count(), 0);
    }

    #[test]
    fn test_remove_course_uses_stored_values() {
        let index = InMemoryScheduleIndex::new();
        let alice = StudentId::from("alice");
        index.add(&alice, CourseId(5), &[slot(15, 0, 16, 0)]);
        index.add(&alice, CourseId(6), &[slot(16, 0, 17, 0)]);

        let removed = index.remove_course(&alice, CourseId(5));

        assert_eq!(removed, vec![slot(15, 0, 16, 0)]);
        assert_eq!(index.intervals_for(&alice).len(), 1);
        assert!(index.remove_course(&alice, CourseId(5)).is_empty());
    }

    #[test]
    fn test_course_without_meetings_never_conflicts() {
        let index = InMemoryScheduleIndex::new();
        let alice = StudentId::from("alice");
        index.add(&alice, CourseId(9), &[]);
        assert_eq!(index.has_conflict(&alice, &[slot(0, 0, 23, 59)]), None);
    }
}
