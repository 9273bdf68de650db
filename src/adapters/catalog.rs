use crate::domain::model::{Course, CourseId};
use crate::domain::ports::CourseCatalog;
use crate::utils::error::{EnrollError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Course catalog kept in memory, loaded from the engine config.
///
/// Stands in for the administrative side of the system. The engine only
/// reads it; `upsert`, `set_capacity` and `remove` are the admin's calls.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    courses: RwLock<BTreeMap<CourseId, Course>>,
}

impl InMemoryCatalog {
    pub fn new(courses: impl IntoIterator<Item = Course>) -> Self {
        Self {
            courses: RwLock::new(courses.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub fn upsert(&self, course: Course) {
        self.courses.write().insert(course.id, course);
    }

    pub fn set_capacity(&self, course: CourseId, capacity: u32) -> Result<()> {
        let mut courses = self.courses.write();
        let entry = courses
            .get_mut(&course)
            .ok_or(EnrollError::CourseNotFound(course))?;
        entry.capacity = capacity;
        Ok(())
    }

    pub fn remove(&self, course: CourseId) -> Option<Course> {
        self.courses.write().remove(&course)
    }

    pub fn courses(&self) -> Vec<Course> {
        self.courses.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.courses.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.courses.read().is_empty()
    }
}

#[async_trait]
impl CourseCatalog for InMemoryCatalog {
    async fn get_course(&self, course: CourseId) -> Result<Option<Course>> {
        Ok(self.courses.read().get(&course).cloned())
    }
}
