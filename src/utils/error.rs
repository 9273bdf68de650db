use crate::domain::model::{CourseId, StudentId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("Course {0} not found")]
    CourseNotFound(CourseId),

    #[error("Student {student} is already enrolled in course {course}")]
    AlreadyEnrolled { student: StudentId, course: CourseId },

    #[error("Student {student} is not enrolled in course {course}")]
    NotEnrolled { student: StudentId, course: CourseId },

    #[error("Course {course} clashes with course {conflicting} in the schedule of student {student}")]
    ScheduleConflict {
        student: StudentId,
        course: CourseId,
        conflicting: CourseId,
    },

    #[error("Course {0} is full")]
    CourseFull(CourseId),

    #[error("Enrollment of student {student} in course {course} already recorded")]
    DuplicateEnrollment { student: StudentId, course: CourseId },

    #[error("Enrollment store unavailable: {message}")]
    StoreUnavailable { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration '{field}'")]
    MissingConfigError { field: String },

    #[error("Cannot set capacity of course {course} to {requested}: {occupied} seats are occupied")]
    CapacityBelowOccupancy {
        course: CourseId,
        requested: u32,
        occupied: u32,
    },
}

/// 錯誤分類，決定呼叫端能否重試
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Request is wrong relative to current state.
    Validation,
    /// Request is valid but lost to current demand or constraints.
    Contention,
    /// The system is unavailable; only this class is worth retrying.
    Infrastructure,
    Configuration,
}

impl EnrollError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EnrollError::CourseNotFound(_)
            | EnrollError::AlreadyEnrolled { .. }
            | EnrollError::NotEnrolled { .. }
            | EnrollError::DuplicateEnrollment { .. } => ErrorCategory::Validation,
            EnrollError::ScheduleConflict { .. } | EnrollError::CourseFull(_) => {
                ErrorCategory::Contention
            }
            EnrollError::StoreUnavailable { .. }
            | EnrollError::IoError(_)
            | EnrollError::SerializationError(_)
            | EnrollError::CsvError(_) => ErrorCategory::Infrastructure,
            EnrollError::ConfigValidationError { .. }
            | EnrollError::InvalidConfigValueError { .. }
            | EnrollError::MissingConfigError { .. }
            | EnrollError::CapacityBelowOccupancy { .. } => ErrorCategory::Configuration,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Infrastructure
    }

    /// CLI 結束碼
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Validation => 1,
            ErrorCategory::Contention => 2,
            ErrorCategory::Infrastructure => 3,
            ErrorCategory::Configuration => 4,
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Validation => format!("Request rejected: {}", self),
            ErrorCategory::Contention => format!("Enrollment not possible: {}", self),
            ErrorCategory::Infrastructure => format!("System unavailable: {}", self),
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            EnrollError::CourseNotFound(_) => "Check the course id against the catalog",
            EnrollError::AlreadyEnrolled { .. } | EnrollError::DuplicateEnrollment { .. } => {
                "Nothing to do, the enrollment already exists"
            }
            EnrollError::NotEnrolled { .. } => "Check the student's schedule before withdrawing",
            EnrollError::ScheduleConflict { .. } => {
                "Withdraw from the conflicting course or pick another one"
            }
            EnrollError::CourseFull(_) => "Try again later as a new request or pick another course",
            EnrollError::CapacityBelowOccupancy { .. } => {
                "Withdraw students first or choose a larger capacity"
            }
            _ if self.is_retryable() => "Retry the request with backoff",
            _ => "Fix the configuration file and restart",
        }
    }
}

pub type Result<T> = std::result::Result<T, EnrollError>;
