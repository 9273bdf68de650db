use crate::domain::model::{Course, CourseId, MeetingInterval};
use crate::utils::error::{EnrollError, Result};
use crate::utils::validation::{self, Validate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub store: Option<StoreConfig>,
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub courses: Vec<CourseConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file of the enrollment store; in-memory when absent.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    /// `compact` (default) or `json`.
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseConfig {
    pub id: u64,
    pub name: String,
    pub location: Option<String>,
    pub capacity: u32,
    #[serde(default)]
    pub meetings: Vec<MeetingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingConfig {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EngineConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| EnrollError::ConfigValidationError {
            field: "config_file".to_string(),
            message: format!("cannot read {}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EnrollError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${STORE_PATH})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| EnrollError::ConfigValidationError {
            field: "environment".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("engine.name", &self.engine.name)?;

        if let Some(path) = self.store_path() {
            validation::validate_path("store.path", path)?;
        }

        if let Some(format) = self.logging.as_ref().and_then(|l| l.format.as_deref()) {
            let valid_formats = ["compact", "json"];
            if !valid_formats.contains(&format) {
                return Err(EnrollError::InvalidConfigValueError {
                    field: "logging.format".to_string(),
                    value: format.to_string(),
                    reason: format!(
                        "Unsupported format. Valid formats: {}",
                        valid_formats.join(", ")
                    ),
                });
            }
        }

        let mut seen = HashSet::new();
        for (i, course) in self.courses.iter().enumerate() {
            if !seen.insert(course.id) {
                return Err(EnrollError::InvalidConfigValueError {
                    field: format!("courses[{}].id", i),
                    value: course.id.to_string(),
                    reason: "Duplicate course id".to_string(),
                });
            }
            validation::validate_non_empty_string(&format!("courses[{}].name", i), &course.name)?;
            validation::validate_positive_number(
                &format!("courses[{}].capacity", i),
                course.capacity as usize,
                1,
            )?;
            for (j, meeting) in course.meetings.iter().enumerate() {
                validation::validate_interval(
                    &format!("courses[{}].meetings[{}]", i, j),
                    meeting.start,
                    meeting.end,
                )?;
            }
        }

        Ok(())
    }

    pub fn store_path(&self) -> Option<&str> {
        self.store.as_ref().and_then(|s| s.path.as_deref())
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().and_then(|l| l.level.as_deref())
    }

    pub fn json_logging(&self) -> bool {
        self.logging
            .as_ref()
            .and_then(|l| l.format.as_deref())
            .map(|f| f == "json")
            .unwrap_or(false)
    }

    /// Catalog snapshot of the configured courses.
    pub fn courses(&self) -> Vec<Course> {
        self.courses
            .iter()
            .map(|c| Course {
                id: CourseId(c.id),
                name: c.name.clone(),
                location: c.location.clone().unwrap_or_default(),
                capacity: c.capacity,
                meetings: c
                    .meetings
                    .iter()
                    .map(|m| MeetingInterval::new(m.start, m.end))
                    .collect(),
            })
            .collect()
    }
}

impl Validate for EngineConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
