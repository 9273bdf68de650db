use crate::core::locks::{KeyedGuard, KeyedLocks};
use crate::core::reconciliation::ReconciliationLog;
use crate::core::schedule_index::InMemoryScheduleIndex;
use crate::core::seat_ledger::InMemorySeatLedger;
use crate::domain::model::{
    AdmissionState, Course, CourseId, Enrollment, ReconciliationTask, ScheduledCourse, SeatCount,
    StudentId,
};
use crate::domain::ports::{CourseCatalog, EnrollmentStore, ScheduleIndex, SeatLedger};
use crate::utils::error::{EnrollError, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Recorded for enrollments whose course has left the catalog.
const MISSING_COURSE: &str = "enrollments reference a course missing from the catalog";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub enrollments: usize,
    pub courses: usize,
    /// Enrollments whose course is no longer in the catalog.
    pub orphaned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub course: CourseId,
    pub occupied_before: Option<u32>,
    pub enrolled: u32,
    pub corrected: bool,
}

fn transition(student: &StudentId, course: CourseId, state: AdmissionState) {
    tracing::debug!(student = %student, course = %course, state = %state, "admission");
}

fn reject(student: &StudentId, course: CourseId, err: EnrollError) -> EnrollError {
    tracing::info!(student = %student, course = %course, state = %AdmissionState::Rejected, "{}", err);
    err
}

/// A reserved seat not yet backed by an enrollment record.
///
/// Dropping an armed hold (admission task torn down mid-flight) releases the
/// seat, so a reservation is never leaked by a bare drop.
struct SeatHold<L: SeatLedger> {
    ledger: Arc<L>,
    log: Arc<ReconciliationLog>,
    student: StudentId,
    course: CourseId,
    armed: bool,
}

impl<L: SeatLedger> SeatHold<L> {
    fn new(ledger: Arc<L>, log: Arc<ReconciliationLog>, student: StudentId, course: CourseId) -> Self {
        Self {
            ledger,
            log,
            student,
            course,
            armed: true,
        }
    }

    fn commit(mut self) {
        self.armed = false;
    }

    /// Compensating release. A failed release leaves an orphaned seat for
    /// reconciliation.
    fn rollback(mut self, cause: &str) {
        self.armed = false;
        if let Err(e) = self.ledger.release(self.course) {
            self.log.record(
                self.course,
                Some(&self.student),
                format!("orphaned seat: {} and release failed ({})", cause, e),
            );
        }
    }
}

impl<L: SeatLedger> Drop for SeatHold<L> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(
            student = %self.student,
            course = %self.course,
            "Enrollment abandoned after seat reservation, releasing seat"
        );
        if let Err(e) = self.ledger.release(self.course) {
            self.log.record(
                self.course,
                Some(&self.student),
                format!("seat held by an abandoned request could not be released: {}", e),
            );
        }
    }
}

/// Tells the admission task that nobody is waiting for its result anymore.
struct CallerWatch(Arc<AtomicBool>);

impl Drop for CallerWatch {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn join_failed(err: tokio::task::JoinError) -> EnrollError {
    EnrollError::StoreUnavailable {
        message: format!("admission task failed: {}", err),
    }
}

/// The part of an admission after the seat is reserved.
///
/// Runs on its own task holding both scope locks, so it always ends in a
/// commit or a full compensation even when the caller stops waiting.
struct PendingAdmission<S, L: SeatLedger, I> {
    store: Arc<S>,
    index: Arc<I>,
    hold: SeatHold<L>,
    student: StudentId,
    course: Course,
    _scopes: (KeyedGuard<CourseId>, KeyedGuard<StudentId>),
}

impl<S, L, I> PendingAdmission<S, L, I>
where
    S: EnrollmentStore,
    L: SeatLedger,
    I: ScheduleIndex,
{
    async fn complete(self, abandoned: Arc<AtomicBool>) -> Result<Enrollment> {
        let student = &self.student;
        let course_id = self.course.id;

        let enrollment = match self.store.create(student, course_id).await {
            Ok(enrollment) => enrollment,
            Err(err) => {
                tracing::warn!(
                    student = %student,
                    course = %course_id,
                    state = %AdmissionState::RolledBack,
                    "Enrollment write failed: {}",
                    err
                );
                self.hold
                    .rollback(&format!("enrollment write failed ({})", err));
                return Err(match err {
                    EnrollError::DuplicateEnrollment { student, course } => {
                        EnrollError::AlreadyEnrolled { student, course }
                    }
                    other => other,
                });
            }
        };

        if abandoned.load(Ordering::SeqCst) {
            return self.compensate(enrollment).await;
        }

        self.index.add(student, course_id, &self.course.meetings);
        self.hold.commit();
        transition(student, course_id, AdmissionState::Committed);
        tracing::info!("Student {} enrolled in course {}", student, course_id);
        Ok(enrollment)
    }

    /// Undoes a recorded enrollment whose caller went away.
    async fn compensate(self, enrollment: Enrollment) -> Result<Enrollment> {
        let student = &self.student;
        let course_id = self.course.id;
        tracing::warn!(
            student = %student,
            course = %course_id,
            "Enrollment abandoned by its caller, undoing it"
        );

        match self.store.delete(student, course_id).await {
            Ok(()) => {
                self.hold.rollback("abandoned enrollment was undone");
                transition(student, course_id, AdmissionState::RolledBack);
            }
            Err(e) => {
                // The record stays, so the seat and the schedule stay with it.
                tracing::warn!(
                    "Could not undo abandoned enrollment of {} in course {}, keeping it: {}",
                    student,
                    course_id,
                    e
                );
                self.index.add(student, course_id, &self.course.meetings);
                self.hold.commit();
                transition(student, course_id, AdmissionState::Committed);
            }
        }
        Ok(enrollment)
    }
}

/// Decides enrollment and withdrawal requests.
///
/// Lock order is always course scope, then student scope. Catalog lookups
/// happen before either lock is taken.
pub struct AdmissionCoordinator<C, S, L = InMemorySeatLedger, I = InMemoryScheduleIndex> {
    catalog: Arc<C>,
    store: Arc<S>,
    ledger: Arc<L>,
    index: Arc<I>,
    course_locks: KeyedLocks<CourseId>,
    student_locks: KeyedLocks<StudentId>,
    reconciliation: Arc<ReconciliationLog>,
}

impl<C, S> AdmissionCoordinator<C, S>
where
    C: CourseCatalog,
    S: EnrollmentStore,
{
    /// Coordinator with a fresh in-memory ledger and schedule index.
    /// Call [`recover`](Self::recover) before serving requests over a non-empty store.
    pub fn with_store(catalog: Arc<C>, store: Arc<S>) -> Self {
        Self::new(
            catalog,
            store,
            Arc::new(InMemorySeatLedger::new()),
            Arc::new(InMemoryScheduleIndex::new()),
        )
    }
}

impl<C, S, L, I> AdmissionCoordinator<C, S, L, I>
where
    C: CourseCatalog,
    S: EnrollmentStore,
    L: SeatLedger,
    I: ScheduleIndex,
{
    pub fn new(catalog: Arc<C>, store: Arc<S>, ledger: Arc<L>, index: Arc<I>) -> Self {
        Self {
            catalog,
            store,
            ledger,
            index,
            course_locks: KeyedLocks::new(),
            student_locks: KeyedLocks::new(),
            reconciliation: Arc::new(ReconciliationLog::new()),
        }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Admits `student` to `course_id` or says why not.
    ///
    /// Dropping the returned future before the seat is reserved has no
    /// effect. After that point the admission finishes on its own task, and an
    /// enrollment recorded for a caller that went away is undone again.
    pub async fn enroll(&self, student: &StudentId, course_id: CourseId) -> Result<Enrollment>
    where
        S: 'static,
        L: 'static,
        I: 'static,
    {
        transition(student, course_id, AdmissionState::Received);

        let course = match self.catalog.get_course(course_id).await? {
            Some(course) => course,
            None => return Err(reject(student, course_id, EnrollError::CourseNotFound(course_id))),
        };

        let course_guard = self.course_locks.lock(&course_id).await;
        let student_guard = self.student_locks.lock(student).await;

        if self.store.exists(student, course_id).await? {
            return Err(reject(
                student,
                course_id,
                EnrollError::AlreadyEnrolled {
                    student: student.clone(),
                    course: course_id,
                },
            ));
        }
        if let Some(conflicting) = self.index.has_conflict(student, &course.meetings) {
            return Err(reject(
                student,
                course_id,
                EnrollError::ScheduleConflict {
                    student: student.clone(),
                    course: course_id,
                    conflicting,
                },
            ));
        }
        transition(student, course_id, AdmissionState::Validated);

        self.ledger.open(course_id, course.capacity)?;
        if !self.ledger.try_reserve(course_id)? {
            return Err(reject(student, course_id, EnrollError::CourseFull(course_id)));
        }
        let hold = SeatHold::new(
            Arc::clone(&self.ledger),
            Arc::clone(&self.reconciliation),
            student.clone(),
            course_id,
        );
        transition(student, course_id, AdmissionState::SeatReserved);

        let admission = PendingAdmission {
            store: Arc::clone(&self.store),
            index: Arc::clone(&self.index),
            hold,
            student: student.clone(),
            course,
            _scopes: (course_guard, student_guard),
        };
        let abandoned = Arc::new(AtomicBool::new(false));
        let _watch = CallerWatch(Arc::clone(&abandoned));

        match tokio::spawn(admission.complete(abandoned)).await {
            Ok(result) => result,
            Err(e) => Err(join_failed(e)),
        }
    }

    /// Withdraws `student` from `course_id`. Once the scope locks are taken
    /// the withdrawal runs to completion even if the caller stops waiting.
    pub async fn withdraw(&self, student: &StudentId, course_id: CourseId) -> Result<()>
    where
        S: 'static,
        L: 'static,
        I: 'static,
    {
        // 課程可能已被刪除，退選仍要成功
        let course = self.catalog.get_course(course_id).await?;

        let course_guard = self.course_locks.lock(&course_id).await;
        let student_guard = self.student_locks.lock(student).await;

        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        let index = Arc::clone(&self.index);
        let log = Arc::clone(&self.reconciliation);
        let student = student.clone();

        let task = tokio::spawn(async move {
            let _scopes = (course_guard, student_guard);
            store.delete(&student, course_id).await?;

            if let Err(e) = ledger.release(course_id) {
                log.record(
                    course_id,
                    Some(&student),
                    format!("seat not released after withdrawal: {}", e),
                );
            }

            match course {
                Some(course) => {
                    index.remove(&student, course_id, &course.meetings);
                    let stale = index.remove_course(&student, course_id);
                    if !stale.is_empty() {
                        tracing::warn!(
                            "Course {} meetings changed since student {} enrolled, dropped {} stale intervals",
                            course_id,
                            student,
                            stale.len()
                        );
                    }
                }
                None => {
                    let removed = index.remove_course(&student, course_id);
                    tracing::debug!(
                        "Course {} no longer in catalog, cleared {} stored intervals for {}",
                        course_id,
                        removed.len(),
                        student
                    );
                }
            }

            tracing::info!("Student {} withdrew from course {}", student, course_id);
            Ok::<(), EnrollError>(())
        });

        match task.await {
            Ok(result) => result,
            Err(e) => Err(join_failed(e)),
        }
    }

    /// Rebuilds the seat ledger and schedule index from the enrollment store.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let all = self.store.list_all().await?;
        let mut by_course: BTreeMap<CourseId, Vec<Enrollment>> = BTreeMap::new();
        for enrollment in &all {
            by_course
                .entry(enrollment.course)
                .or_default()
                .push(enrollment.clone());
        }

        let mut orphaned = 0;
        for (course_id, enrollments) in &by_course {
            let Some(course) = self.catalog.get_course(*course_id).await? else {
                orphaned += enrollments.len();
                tracing::warn!(
                    "{} enrollments reference course {}, which is missing from the catalog",
                    enrollments.len(),
                    course_id
                );
                self.reconciliation.record_once(*course_id, None, MISSING_COURSE);
                continue;
            };

            let _guard = self.course_locks.lock(course_id).await;
            let occupied = enrollments.len() as u32;
            if occupied > course.capacity {
                self.reconciliation.record_once(
                    *course_id,
                    None,
                    format!(
                        "{} enrollments exceed capacity {}",
                        occupied, course.capacity
                    ),
                );
            }
            self.ledger.restore(*course_id, course.capacity, occupied)?;
            for enrollment in enrollments {
                self.index.add(&enrollment.student, *course_id, &course.meetings);
            }
        }

        let report = RecoveryReport {
            enrollments: all.len(),
            courses: by_course.len(),
            orphaned,
        };
        tracing::info!(
            "Recovered {} enrollments across {} courses ({} orphaned)",
            report.enrollments,
            report.courses,
            report.orphaned
        );
        Ok(report)
    }

    /// Administrative capacity change, exclusive with admissions on the course.
    pub async fn update_capacity(&self, course_id: CourseId, capacity: u32) -> Result<SeatCount> {
        let course = self
            .catalog
            .get_course(course_id)
            .await?
            .ok_or(EnrollError::CourseNotFound(course_id))?;

        let _guard = self.course_locks.lock(&course_id).await;
        self.ledger.open(course_id, course.capacity)?;
        let seats = self.ledger.set_capacity(course_id, capacity)?;
        tracing::info!(
            "Course {} capacity set to {} ({} occupied)",
            course_id,
            seats.capacity,
            seats.occupied
        );
        Ok(seats)
    }

    /// Compares the seat count with the live enrollments and corrects drift.
    ///
    /// Open tasks for the course are resolved once the ledger matches the
    /// store within capacity.
    pub async fn reconcile(&self, course_id: CourseId) -> Result<ReconcileOutcome> {
        let catalog_capacity = self
            .catalog
            .get_course(course_id)
            .await?
            .map(|course| course.capacity);

        let _guard = self.course_locks.lock(&course_id).await;
        let enrolled = self.store.list_by_course(course_id).await?.len() as u32;
        let before = self.ledger.seat_count(course_id)?;

        let capacity = before.map(|s| s.capacity).or(catalog_capacity);
        let corrected = match (before, capacity) {
            (Some(seats), _) if seats.occupied == enrolled => false,
            (None, _) if enrolled == 0 => false,
            (_, Some(capacity)) => {
                tracing::warn!(
                    "Seat count drift on course {}: ledger {:?}, store {}",
                    course_id,
                    before.map(|s| s.occupied),
                    enrolled
                );
                self.ledger.restore(course_id, capacity, enrolled)?;
                true
            }
            (_, None) => {
                tracing::warn!(
                    "{} enrollments on course {} without a known capacity",
                    enrolled,
                    course_id
                );
                self.reconciliation.record_once(course_id, None, MISSING_COURSE);
                false
            }
        };

        let settled = match capacity {
            Some(capacity) => enrolled <= capacity,
            None => enrolled == 0,
        };
        if settled {
            let resolved = self.reconciliation.resolve(course_id);
            if !resolved.is_empty() {
                tracing::info!(
                    "Resolved {} reconciliation tasks on course {}",
                    resolved.len(),
                    course_id
                );
            }
        }

        Ok(ReconcileOutcome {
            course: course_id,
            occupied_before: before.map(|s| s.occupied),
            enrolled,
            corrected,
        })
    }

    /// Reconciles every course known to the ledger or the store.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileOutcome>> {
        let mut courses = self.ledger.courses()?;
        courses.extend(self.store.list_all().await?.into_iter().map(|e| e.course));
        courses.sort();
        courses.dedup();

        let mut outcomes = Vec::with_capacity(courses.len());
        for course in courses {
            outcomes.push(self.reconcile(course).await?);
        }
        let pruned = self.course_locks.prune() + self.student_locks.prune();
        tracing::debug!("Pruned {} idle locks", pruned);
        Ok(outcomes)
    }

    pub fn seat_count(&self, course_id: CourseId) -> Result<Option<SeatCount>> {
        self.ledger.seat_count(course_id)
    }

    pub async fn roster(&self, course_id: CourseId) -> Result<Vec<Enrollment>> {
        self.store.list_by_course(course_id).await
    }

    /// The student's enrolled courses with their meeting times.
    pub async fn schedule(&self, student: &StudentId) -> Result<Vec<ScheduledCourse>> {
        let enrollments = self.store.list_by_student(student).await?;
        let indexed: BTreeMap<_, _> = self.index.intervals_for(student).into_iter().collect();

        let mut schedule = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            let name = self
                .catalog
                .get_course(enrollment.course)
                .await?
                .map(|course| course.name);
            schedule.push(ScheduledCourse {
                course: enrollment.course,
                name,
                meetings: indexed.get(&enrollment.course).cloned().unwrap_or_default(),
            });
        }
        Ok(schedule)
    }

    pub fn reconciliation_tasks(&self) -> Vec<ReconciliationTask> {
        self.reconciliation.tasks()
    }

    /// Number of course and student scope locks currently tracked.
    pub fn active_locks(&self) -> usize {
        self.course_locks.len() + self.student_locks.len()
    }
}
