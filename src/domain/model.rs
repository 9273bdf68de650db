use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CourseId(pub u64);

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CourseId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(CourseId)
    }
}

/// 學號
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

impl StudentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(value: &str) -> Self {
        StudentId(value.to_string())
    }
}

impl From<String> for StudentId {
    fn from(value: String) -> Self {
        StudentId(value)
    }
}

impl FromStr for StudentId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StudentId(s.to_string()))
    }
}

/// One meeting of a course, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeetingInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MeetingInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Half-open overlap: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &MeetingInterval) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for MeetingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%H:%M")
        )
    }
}

/// Catalog snapshot of a course, read once per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub capacity: u32,
    #[serde(default)]
    pub meetings: Vec<MeetingInterval>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub student: StudentId,
    pub course: CourseId,
    pub created_at: DateTime<Utc>,
}

impl Enrollment {
    pub fn new(student: StudentId, course: CourseId) -> Self {
        Self {
            student,
            course,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatCount {
    pub occupied: u32,
    pub capacity: u32,
}

impl SeatCount {
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied)
    }
}

/// Admission request lifecycle, traced per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionState {
    Received,
    Validated,
    SeatReserved,
    Committed,
    Rejected,
    RolledBack,
}

impl AdmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdmissionState::Committed | AdmissionState::Rejected | AdmissionState::RolledBack
        )
    }
}

impl fmt::Display for AdmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdmissionState::Received => "received",
            AdmissionState::Validated => "validated",
            AdmissionState::SeatReserved => "seat_reserved",
            AdmissionState::Committed => "committed",
            AdmissionState::Rejected => "rejected",
            AdmissionState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// An anomaly recorded for out-of-band correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationTask {
    pub course: CourseId,
    pub student: Option<StudentId>,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

/// A student's enrolled course together with its meeting times.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledCourse {
    pub course: CourseId,
    pub name: Option<String>,
    pub meetings: Vec<MeetingInterval>,
}
