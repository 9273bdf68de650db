use crate::domain::model::{CourseId, ReconciliationTask, StudentId};
use chrono::Utc;
use parking_lot::Mutex;

/// Anomalies that need out-of-band correction, e.g. a seat still held after
/// its enrollment write failed and the compensating release failed too.
#[derive(Debug, Default)]
pub struct ReconciliationLog {
    tasks: Mutex<Vec<ReconciliationTask>>,
}

impl ReconciliationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, course: CourseId, student: Option<&StudentId>, reason: impl Into<String>) {
        let task = ReconciliationTask {
            course,
            student: student.cloned(),
            reason: reason.into(),
            recorded_at: Utc::now(),
        };
        tracing::error!(
            course = %task.course,
            student = ?task.student,
            "Reconciliation required: {}",
            task.reason
        );
        self.tasks.lock().push(task);
    }

    /// Like [`record`](Self::record), but skips a task already open for the
    /// same course, student and reason. Returns whether a task was added.
    pub fn record_once(
        &self,
        course: CourseId,
        student: Option<&StudentId>,
        reason: impl Into<String>,
    ) -> bool {
        let reason = reason.into();
        let open = self.tasks.lock().iter().any(|t| {
            t.course == course && t.student.as_ref() == student && t.reason == reason
        });
        if open {
            tracing::debug!(course = %course, "Reconciliation task already open: {}", reason);
            return false;
        }
        self.record(course, student, reason);
        true
    }

    pub fn tasks(&self) -> Vec<ReconciliationTask> {
        self.tasks.lock().clone()
    }

    /// Removes and returns the tasks for `course`, once it has been reconciled.
    pub fn resolve(&self, course: CourseId) -> Vec<ReconciliationTask> {
        let mut tasks = self.tasks.lock();
        let (resolved, open): (Vec<_>, Vec<_>) = tasks.drain(..).partition(|t| t.course == course);
        *tasks = open;
        resolved
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
