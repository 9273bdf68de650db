use crate::domain::model::{CourseId, StudentId};
use crate::utils::error::Result;
use crate::utils::validation::{self, Validate};
use clap::{Parser, Subcommand};

#[derive(Debug, Clone, Parser)]
#[command(name = "course-enroll")]
#[command(about = "Seat admission engine for time-scheduled courses")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "engine.toml")]
    pub config: String,

    /// Override the enrollment store file from config
    #[arg(long)]
    pub store: Option<String>,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Enroll a student in a course
    Enroll {
        #[arg(long)]
        student: StudentId,
        #[arg(long)]
        course: CourseId,
    },
    /// Withdraw a student from a course
    Withdraw {
        #[arg(long)]
        student: StudentId,
        #[arg(long)]
        course: CourseId,
    },
    /// Show a student's enrolled courses and meeting times
    Schedule {
        #[arg(long)]
        student: StudentId,
    },
    /// List the students enrolled in a course
    Roster {
        #[arg(long)]
        course: CourseId,
        /// Write the roster as CSV to stdout
        #[arg(long)]
        csv: bool,
    },
    /// Show seat counts, for one course or all
    Seats {
        #[arg(long)]
        course: Option<CourseId>,
    },
    /// Fire concurrent enrollments at one course
    Rush {
        #[arg(long)]
        course: CourseId,
        #[arg(long, default_value = "10")]
        students: usize,
        #[arg(long, default_value = "rush-")]
        prefix: String,
    },
    /// Correct seat counts that drifted from the enrollment store
    Reconcile {
        #[arg(long)]
        course: Option<CourseId>,
    },
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validation::validate_path("config", &self.config)?;
        if let Some(store) = &self.store {
            validation::validate_path("store", store)?;
        }
        match &self.command {
            Command::Enroll { student, .. }
            | Command::Withdraw { student, .. }
            | Command::Schedule { student } => {
                validation::validate_non_empty_string("student", student.as_str())
            }
            Command::Rush { students, prefix, .. } => {
                validation::validate_positive_number("students", *students, 1)?;
                validation::validate_non_empty_string("prefix", prefix)
            }
            Command::Roster { .. } | Command::Seats { .. } | Command::Reconcile { .. } => Ok(()),
        }
    }
}
