use crate::domain::model::{CourseId, Enrollment, StudentId};
use crate::domain::ports::EnrollmentStore;
use crate::utils::error::{EnrollError, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

type EnrollmentKey = (StudentId, CourseId);

fn sorted(mut enrollments: Vec<Enrollment>) -> Vec<Enrollment> {
    enrollments.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.student.cmp(&b.student))
            .then_with(|| a.course.cmp(&b.course))
    });
    enrollments
}

/// Enrollment records in a sharded map keyed by (student, course).
#[derive(Debug, Default)]
pub struct InMemoryEnrollmentStore {
    records: DashMap<EnrollmentKey, Enrollment>,
}

impl InMemoryEnrollmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = Enrollment>) -> Self {
        let store = Self::new();
        for record in records {
            store
                .records
                .insert((record.student.clone(), record.course), record);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert_new(&self, student: &StudentId, course: CourseId) -> Result<Enrollment> {
        match self.records.entry((student.clone(), course)) {
            Entry::Occupied(_) => Err(EnrollError::DuplicateEnrollment {
                student: student.clone(),
                course,
            }),
            Entry::Vacant(slot) => {
                let enrollment = Enrollment::new(student.clone(), course);
                slot.insert(enrollment.clone());
                Ok(enrollment)
            }
        }
    }

    fn take(&self, student: &StudentId, course: CourseId) -> Result<Enrollment> {
        self.records
            .remove(&(student.clone(), course))
            .map(|(_, enrollment)| enrollment)
            .ok_or_else(|| EnrollError::NotEnrolled {
                student: student.clone(),
                course,
            })
    }

    fn collect<F>(&self, keep: F) -> Vec<Enrollment>
    where
        F: Fn(&Enrollment) -> bool,
    {
        sorted(
            self.records
                .iter()
                .filter(|entry| keep(entry.value()))
                .map(|entry| entry.value().clone())
                .collect(),
        )
    }
}

#[async_trait]
impl EnrollmentStore for InMemoryEnrollmentStore {
    async fn exists(&self, student: &StudentId, course: CourseId) -> Result<bool> {
        Ok(self.records.contains_key(&(student.clone(), course)))
    }

    async fn create(&self, student: &StudentId, course: CourseId) -> Result<Enrollment> {
        self.insert_new(student, course)
    }

    async fn delete(&self, student: &StudentId, course: CourseId) -> Result<()> {
        self.take(student, course).map(|_| ())
    }

    async fn list_by_student(&self, student: &StudentId) -> Result<Vec<Enrollment>> {
        Ok(self.collect(|e| &e.student == student))
    }

    async fn list_by_course(&self, course: CourseId) -> Result<Vec<Enrollment>> {
        Ok(self.collect(|e| e.course == course))
    }

    async fn list_all(&self) -> Result<Vec<Enrollment>> {
        Ok(self.collect(|_| true))
    }
}

/// Enrollment store persisted as a JSON snapshot.
///
/// Every mutation writes the next snapshot through a temp file and a rename
/// before it touches the in-memory records, so readers only ever see durable
/// state. Mutations are serialized and run on their own task: a caller that
/// stops waiting cannot leave the file and the records disagreeing.
#[derive(Debug, Clone)]
pub struct FileEnrollmentStore {
    inner: Arc<SnapshotFile>,
}

#[derive(Debug)]
struct SnapshotFile {
    path: PathBuf,
    records: InMemoryEnrollmentStore,
    write_lock: Mutex<()>,
}

impl FileEnrollmentStore {
    /// 開啟（或建立）快照檔
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<Vec<Enrollment>>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(EnrollError::IoError(e)),
        };
        tracing::info!(
            "Opened enrollment store at {} with {} records",
            path.display(),
            records.len()
        );

        Ok(Self::from_parts(path, InMemoryEnrollmentStore::from_records(records)))
    }

    fn from_parts(path: PathBuf, records: InMemoryEnrollmentStore) -> Self {
        Self {
            inner: Arc::new(SnapshotFile {
                path,
                records,
                write_lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }
}

impl SnapshotFile {
    async fn persist(&self, snapshot: &[Enrollment]) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    fn unavailable(&self, err: EnrollError) -> EnrollError {
        EnrollError::StoreUnavailable {
            message: format!("failed to write {}: {}", self.path.display(), err),
        }
    }

    async fn create(&self, student: StudentId, course: CourseId) -> Result<Enrollment> {
        let _guard = self.write_lock.lock().await;
        let key = (student, course);
        if self.records.records.contains_key(&key) {
            return Err(EnrollError::DuplicateEnrollment {
                student: key.0,
                course,
            });
        }

        let enrollment = Enrollment::new(key.0.clone(), course);
        let mut snapshot = self.records.collect(|_| true);
        snapshot.push(enrollment.clone());
        self.persist(&sorted(snapshot))
            .await
            .map_err(|e| self.unavailable(e))?;

        self.records.records.insert(key, enrollment.clone());
        Ok(enrollment)
    }

    async fn delete(&self, student: StudentId, course: CourseId) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if !self.records.records.contains_key(&(student.clone(), course)) {
            return Err(EnrollError::NotEnrolled { student, course });
        }

        let snapshot = self
            .records
            .collect(|e| !(e.student == student && e.course == course));
        self.persist(&snapshot)
            .await
            .map_err(|e| self.unavailable(e))?;

        self.records.records.remove(&(student, course));
        Ok(())
    }
}

fn write_task_failed(err: tokio::task::JoinError) -> EnrollError {
    EnrollError::StoreUnavailable {
        message: format!("snapshot write task failed: {}", err),
    }
}

#[async_trait]
impl EnrollmentStore for FileEnrollmentStore {
    async fn exists(&self, student: &StudentId, course: CourseId) -> Result<bool> {
        self.inner.records.exists(student, course).await
    }

    async fn create(&self, student: &StudentId, course: CourseId) -> Result<Enrollment> {
        let file = Arc::clone(&self.inner);
        let student = student.clone();
        tokio::spawn(async move { file.create(student, course).await })
            .await
            .map_err(write_task_failed)?
    }

    async fn delete(&self, student: &StudentId, course: CourseId) -> Result<()> {
        let file = Arc::clone(&self.inner);
        let student = student.clone();
        tokio::spawn(async move { file.delete(student, course).await })
            .await
            .map_err(write_task_failed)?
    }

    async fn list_by_student(&self, student: &StudentId) -> Result<Vec<Enrollment>> {
        self.inner.records.list_by_student(student).await
    }

    async fn list_by_course(&self, course: CourseId) -> Result<Vec<Enrollment>> {
        self.inner.records.list_by_course(course).await
    }

    async fn list_all(&self) -> Result<Vec<Enrollment>> {
        self.inner.records.list_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    /// Turns `path` into a fifo, so a snapshot write to it stalls until read.
    #[cfg(unix)]
    fn make_fifo(path: &Path) {
        let status = std::process::Command::new("mkfifo")
            .arg(path)
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = InMemoryEnrollmentStore::new();
        let alice = StudentId::from("alice");

        assert_ok!(store.create(&alice, CourseId(1)).await);
        let err = store.create(&alice, CourseId(1)).await.unwrap_err();

        assert!(matches!(err, EnrollError::DuplicateEnrollment { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_enrolled() {
        let store = InMemoryEnrollmentStore::new();
        let err = store
            .delete(&StudentId::from("bob"), CourseId(3))
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::NotEnrolled { .. }));
    }

    #[tokio::test]
    async fn test_listing_by_student_and_course() {
        let store = InMemoryEnrollmentStore::new();
        let alice = StudentId::from("alice");
        let bob = StudentId::from("bob");
        store.create(&alice, CourseId(1)).await.unwrap();
        store.create(&alice, CourseId(2)).await.unwrap();
        store.create(&bob, CourseId(1)).await.unwrap();

        let alice_courses: Vec<_> = store
            .list_by_student(&alice)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.course)
            .collect();
        assert_eq!(alice_courses.len(), 2);
        assert!(alice_courses.contains(&CourseId(1)));
        assert!(alice_courses.contains(&CourseId(2)));
        assert_eq!(store.list_by_course(CourseId(1)).await.unwrap().len(), 2);
        assert_eq!(store.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("enrollments.json");
        let alice = StudentId::from("alice");

        {
            let store = FileEnrollmentStore::open(&path).await.unwrap();
            store.create(&alice, CourseId(1)).await.unwrap();
            store.create(&alice, CourseId(2)).await.unwrap();
            store.delete(&alice, CourseId(1)).await.unwrap();
        }

        let reopened = FileEnrollmentStore::open(&path).await.unwrap();
        let records = reopened.list_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].course, CourseId(2));
        assert_err!(reopened.create(&alice, CourseId(2)).await);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_record() {
        let dir = TempDir::new().unwrap();
        // A directory where the snapshot file should be makes the rename fail.
        let path = dir.path().join("blocked");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let store = FileEnrollmentStore::open(&path).await;
        // Reading a directory fails on open as well; build the store by hand.
        assert!(store.is_err());
        let store = FileEnrollmentStore::from_parts(path.clone(), InMemoryEnrollmentStore::new());

        let err = store
            .create(&StudentId::from("alice"), CourseId(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!store
            .exists(&StudentId::from("alice"), CourseId(1))
            .await
            .unwrap());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_records_are_visible_only_once_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enrollments.json");
        let store = FileEnrollmentStore::open(&path).await.unwrap();
        let tmp_path = path.with_extension("tmp");
        make_fifo(&tmp_path);
        let alice = StudentId::from("alice");

        let pending = {
            let store = store.clone();
            let alice = alice.clone();
            tokio::spawn(async move { store.create(&alice, CourseId(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!pending.is_finished());
        assert!(store.list_by_course(CourseId(1)).await.unwrap().is_empty());
        assert!(!store.exists(&alice, CourseId(1)).await.unwrap());

        let written = tokio::task::spawn_blocking(move || std::fs::read(tmp_path))
            .await
            .unwrap()
            .unwrap();
        let snapshot: Vec<Enrollment> = serde_json::from_slice(&written).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].student, alice);

        assert_ok!(pending.await.unwrap());
        assert!(store.exists(&alice, CourseId(1)).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_create_still_lands_in_file_and_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enrollments.json");
        let store = FileEnrollmentStore::open(&path).await.unwrap();
        let tmp_path = path.with_extension("tmp");
        make_fifo(&tmp_path);
        let alice = StudentId::from("alice");

        let attempt =
            tokio::time::timeout(Duration::from_millis(100), store.create(&alice, CourseId(1))).await;
        assert!(attempt.is_err());

        tokio::task::spawn_blocking(move || std::fs::read(tmp_path))
            .await
            .unwrap()
            .unwrap();

        // The write finished on its own task; a following write queues behind it
        // and the snapshot on disk matches memory.
        store.create(&alice, CourseId(2)).await.unwrap();
        let reopened = FileEnrollmentStore::open(&path).await.unwrap();
        assert_eq!(reopened.list_all().await.unwrap(), store.list_all().await.unwrap());
        assert_eq!(reopened.list_all().await.unwrap().len(), 2);
    }
}
