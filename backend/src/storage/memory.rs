use async_trait::async_trait;
use chrono::Utc;
use shared::{ProgressReport, Student};
use std::collections::HashMap;
use std::sync::Mutex;

use super::{
    NewStudent, ProgressUpsert, StoreError, StudentFilter, StudentPatch, StudentRecord,
    StudentStore,
};

/// In-memory backend: a process-local map of student records.
///
/// Nothing is persisted across restarts, ids are assigned sequentially
/// ("1", "2", ...), and non-id lookups are linear scans. Intended for
/// demos and as the fallback when no real store is reachable.
pub struct MemoryStudentStore {
    inner: Mutex<Inner>,
}

struct Inner {
    next_id: u64,
    records: HashMap<String, StudentRecord>,
}

impl MemoryStudentStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                records: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("student map lock poisoned")
    }
}

impl Default for MemoryStudentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StudentStore for MemoryStudentStore {
    async fn insert(&self, new: &NewStudent) -> Result<Student, StoreError> {
        let mut inner = self.lock();

        if let Some(email) = &new.email {
            if inner
                .records
                .values()
                .any(|record| record.email.as_deref() == Some(email.as_str()))
            {
                return Err(StoreError::Constraint(format!(
                    "email already registered: {email}"
                )));
            }
        }

        let id = inner.next_id.to_string();
        inner.next_id += 1;

        let record = StudentRecord::new(id.clone(), new, Utc::now());
        let student = record.to_student();
        inner.records.insert(id, record);

        Ok(student)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self.lock().records.get(id).map(StudentRecord::to_student))
    }

    async fn find(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError> {
        let inner = self.lock();

        let mut records: Vec<&StudentRecord> = inner
            .records
            .values()
            .filter(|record| record.matches(filter))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(records.into_iter().map(StudentRecord::to_student).collect())
    }

    async fn update_fields(&self, id: &str, patch: &StudentPatch) -> Result<u64, StoreError> {
        if patch.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();

        if !inner.records.contains_key(id) {
            return Ok(0);
        }
        if let Some(email) = &patch.email {
            if inner
                .records
                .values()
                .any(|record| record.id != id && record.email.as_deref() == Some(email.as_str()))
            {
                return Err(StoreError::Constraint(format!(
                    "email already registered: {email}"
                )));
            }
        }

        if let Some(record) = inner.records.get_mut(id) {
            record.apply_patch(patch);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn delete(&self, id: &str) -> Result<u64, StoreError> {
        Ok(self.lock().records.remove(id).map(|_| 1).unwrap_or(0))
    }

    async fn count(&self, filter: &StudentFilter) -> Result<u64, StoreError> {
        let inner = self.lock();
        Ok(inner
            .records
            .values()
            .filter(|record| record.matches(filter))
            .count() as u64)
    }

    async fn upsert_progress(&self, id: &str, entry: &ProgressUpsert) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.records.get_mut(id) {
            Some(record) => {
                record.upsert_progress(entry, Utc::now());
                Ok(())
            }
            None => Err(StoreError::Backend(anyhow::anyhow!(
                "student not found: {id}"
            ))),
        }
    }

    async fn progress_report(&self, id: &str) -> Result<Option<ProgressReport>, StoreError> {
        Ok(self.lock().records.get(id).map(StudentRecord::to_report))
    }
}
