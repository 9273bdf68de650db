use crate::domain::model::{Course, CourseId, Enrollment, MeetingInterval, SeatCount, StudentId};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Read side of the course catalog, owned outside the engine.
#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn get_course(&self, course: CourseId) -> Result<Option<Course>>;
}

/// Durable (student, course) facts. Linearizable per key.
#[async_trait]
pub trait EnrollmentStore: Send + Sync {
    async fn exists(&self, student: &StudentId, course: CourseId) -> Result<bool>;

    /// Fails with `DuplicateEnrollment` when a live record for the pair exists.
    async fn create(&self, student: &StudentId, course: CourseId) -> Result<Enrollment>;

    /// Fails with `NotEnrolled` when no live record exists.
    async fn delete(&self, student: &StudentId, course: CourseId) -> Result<()>;

    async fn list_by_student(&self, student: &StudentId) -> Result<Vec<Enrollment>>;
    async fn list_by_course(&self, course: CourseId) -> Result<Vec<Enrollment>>;
    async fn list_all(&self) -> Result<Vec<Enrollment>>;
}

/// Per-course seat counters. Every method is a single atomic step per course.
pub trait SeatLedger: Send + Sync {
    /// Registers `course` with `capacity` unless it is already known.
    fn open(&self, course: CourseId, capacity: u32) -> Result<()>;
    fn try_reserve(&self, course: CourseId) -> Result<bool>;
    fn release(&self, course: CourseId) -> Result<()>;
    fn seat_count(&self, course: CourseId) -> Result<Option<SeatCount>>;
    fn set_capacity(&self, course: CourseId, capacity: u32) -> Result<SeatCount>;
    /// Overwrites the entry, used by recovery and reconciliation.
    fn restore(&self, course: CourseId, capacity: u32, occupied: u32) -> Result<()>;
    fn courses(&self) -> Result<Vec<CourseId>>;
}

/// Per-student meeting times, grouped by course.
pub trait ScheduleIndex: Send + Sync {
    /// Returns the first indexed course whose meetings overlap `candidates`.
    fn has_conflict(&self, student: &StudentId, candidates: &[MeetingInterval]) -> Option<CourseId>;
    fn add(&self, student: &StudentId, course: CourseId, intervals: &[MeetingInterval]);
    fn remove(&self, student: &StudentId, course: CourseId, intervals: &[MeetingInterval]);
    /// Drops whatever is stored under `course`, returning it.
    fn remove_course(&self, student: &StudentId, course: CourseId) -> Vec<MeetingInterval>;
    fn intervals_for(&self, student: &StudentId) -> Vec<(CourseId, Vec<MeetingInterval>)>;
}
