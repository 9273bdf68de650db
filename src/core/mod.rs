pub mod admission;
pub mod locks;
pub mod reconciliation;
pub mod schedule_index;
pub mod seat_ledger;

pub use crate::domain::model::{Course, CourseId, Enrollment, MeetingInterval, SeatCount, StudentId};
pub use crate::domain::ports::{CourseCatalog, EnrollmentStore, ScheduleIndex, SeatLedger};
pub use crate::utils::error::Result;
pub use admission::{AdmissionCoordinator, ReconcileOutcome, RecoveryReport};
