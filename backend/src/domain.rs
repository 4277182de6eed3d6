use shared::{ProgressReport, Student};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::storage::{
    NewStudent, ProgressUpsert, StoreError, StudentFilter, StudentPatch, StudentStore,
};

/// Errors surfaced by the CRUD service.
///
/// Storage errors pass through unmodified; the service adds only the
/// validation variant for requests rejected before reaching storage.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing required field: {0}")]
    Validation(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Service for managing students and their weekly progress.
///
/// Holds the storage handle chosen at startup; every operation is a thin
/// orchestration of one or two store calls.
#[derive(Clone)]
pub struct StudentService {
    store: Arc<dyn StudentStore>,
}

impl StudentService {
    pub fn new(store: Arc<dyn StudentStore>) -> Self {
        Self { store }
    }

    /// Register a new student. The name is required and trimmed; a blank
    /// email is treated as absent.
    pub async fn create_student(
        &self,
        name: &str,
        email: Option<&str>,
    ) -> Result<Student, ServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::Validation("name"));
        }
        let email = email
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let student = self
            .store
            .insert(&NewStudent {
                name: name.to_string(),
                email,
            })
            .await?;

        info!("registered student {} ({})", student.name, student.id);
        Ok(student)
    }

    /// Fetch one student by id, progress aggregated in.
    pub async fn get_student(&self, id: &str) -> Result<Option<Student>, ServiceError> {
        Ok(self.store.find_by_id(id).await?)
    }

    /// Fetch one student by exact name. With duplicate names the newest
    /// registration wins, matching the list ordering.
    pub async fn get_student_by_name(&self, name: &str) -> Result<Option<Student>, ServiceError> {
        let matches = self.store.find(&StudentFilter::by_name(name)).await?;
        Ok(matches.into_iter().next())
    }

    /// List every student, newest first.
    pub async fn list_students(&self) -> Result<Vec<Student>, ServiceError> {
        Ok(self.store.find(&StudentFilter::default()).await?)
    }

    /// Apply a partial field update and return the refreshed record, or
    /// `None` when the id is unknown.
    pub async fn update_student(
        &self,
        id: &str,
        patch: &StudentPatch,
    ) -> Result<Option<Student>, ServiceError> {
        self.store.update_fields(id, patch).await?;
        Ok(self.store.find_by_id(id).await?)
    }

    /// Upsert one week's progress for a student and return the refreshed
    /// record, or `None` when the student does not exist.
    pub async fn update_progress(
        &self,
        id: &str,
        week: &str,
        completed: bool,
        notes: Option<&str>,
    ) -> Result<Option<Student>, ServiceError> {
        let week = week.trim();
        if week.is_empty() {
            return Err(ServiceError::Validation("week"));
        }

        if self.store.find_by_id(id).await?.is_none() {
            warn!("progress update for unknown student {id}");
            return Ok(None);
        }

        self.store
            .upsert_progress(
                id,
                &ProgressUpsert {
                    week: week.to_string(),
                    status: completed,
                    notes: notes.map(str::to_string),
                },
            )
            .await?;

        info!("updated progress for student {id}, week {week}");
        Ok(self.store.find_by_id(id).await?)
    }

    /// Delete a student. `Ok(true)` iff exactly one record was removed;
    /// deleting an unknown id is `Ok(false)`, not an error.
    pub async fn delete_student(&self, id: &str) -> Result<bool, ServiceError> {
        let deleted = self.store.delete(id).await?;
        if deleted == 1 {
            info!("deleted student {id}");
        }
        Ok(deleted == 1)
    }

    /// Total number of registered students.
    pub async fn count_students(&self) -> Result<u64, ServiceError> {
        Ok(self.store.count(&StudentFilter::default()).await?)
    }

    /// Detailed per-week progress for one student, or `None` when absent.
    pub async fn get_student_progress(
        &self,
        id: &str,
    ) -> Result<Option<ProgressReport>, ServiceError> {
        Ok(self.store.progress_report(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStudentStore;

    fn setup_service() -> StudentService {
        StudentService::new(Arc::new(MemoryStudentStore::new()))
    }

    #[tokio::test]
    async fn test_create_then_get_matches() {
        let service = setup_service();

        let created = service
            .create_student("Ada", Some("ada@example.com"))
            .await
            .expect("create failed");

        let fetched = service
            .get_student(&created.id)
            .await
            .expect("get failed")
            .expect("student should exist");

        assert_eq!(fetched.name, "Ada");
        assert_eq!(fetched.email.as_deref(), Some("ada@example.com"));
        assert!(fetched.progress.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_blank_name() {
        let service = setup_service();

        let err = service
            .create_student("   ", None)
            .await
            .expect_err("blank name should be rejected");
        assert!(matches!(err, ServiceError::Validation("name")));

        // Nothing reached storage
        assert_eq!(service.count_students().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_trims_name_and_drops_blank_email() {
        let service = setup_service();

        let student = service
            .create_student("  Ada  ", Some("   "))
            .await
            .unwrap();

        assert_eq!(student.name, "Ada");
        assert!(student.email.is_none());
    }

    #[tokio::test]
    async fn test_get_student_by_name() {
        let service = setup_service();
        service.create_student("Ada", None).await.unwrap();

        let found = service.get_student_by_name("Ada").await.unwrap();
        assert!(found.is_some());

        let missing = service.get_student_by_name("Grace").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_count_equals_list_length() {
        let service = setup_service();

        for i in 0..3 {
            service
                .create_student(&format!("Student {i}"), None)
                .await
                .unwrap();
        }

        let listed = service.list_students().await.unwrap();
        let counted = service.count_students().await.unwrap();
        assert_eq!(counted as usize, listed.len());
    }

    #[tokio::test]
    async fn test_update_progress_round_trip() {
        let service = setup_service();
        let student = service.create_student("Ada", None).await.unwrap();

        // The empty report first
        let report = service
            .get_student_progress(&student.id)
            .await
            .unwrap()
            .expect("report should exist");
        assert_eq!(report.student_name, "Ada");
        assert!(report.progress.is_empty());

        let refreshed = service
            .update_progress(&student.id, "w1", true, Some("on track"))
            .await
            .unwrap()
            .expect("student should exist");
        assert_eq!(refreshed.progress.get("w1"), Some(&true));

        let report = service
            .get_student_progress(&student.id)
            .await
            .unwrap()
            .unwrap();
        let entry = report.progress.get("w1").unwrap();
        assert!(entry.status);
        assert_eq!(entry.notes.as_deref(), Some("on track"));
    }

    #[tokio::test]
    async fn test_update_progress_is_idempotent_on_week() {
        let service = setup_service();
        let student = service.create_student("Ada", None).await.unwrap();

        service
            .update_progress(&student.id, "week1", true, None)
            .await
            .unwrap();
        let refreshed = service
            .update_progress(&student.id, "week1", false, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(refreshed.progress.len(), 1);
        assert_eq!(refreshed.progress.get("week1"), Some(&false));
    }

    #[tokio::test]
    async fn test_update_progress_for_unknown_student_is_none() {
        let service = setup_service();

        let result = service
            .update_progress("no-such-id", "w1", true, None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_progress_rejects_blank_week() {
        let service = setup_service();
        let student = service.create_student("Ada", None).await.unwrap();

        let err = service
            .update_progress(&student.id, "  ", true, None)
            .await
            .expect_err("blank week should be rejected");
        assert!(matches!(err, ServiceError::Validation("week")));
    }

    #[tokio::test]
    async fn test_delete_student_semantics() {
        let service = setup_service();
        let student = service.create_student("Ada", None).await.unwrap();

        assert!(service.delete_student(&student.id).await.unwrap());
        assert!(!service.delete_student(&student.id).await.unwrap());
        assert!(!service.delete_student("no-such-id").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_email_bubbles_as_store_error() {
        let service = setup_service();

        service
            .create_student("Ada", Some("shared@example.com"))
            .await
            .unwrap();
        let err = service
            .create_student("Grace", Some("shared@example.com"))
            .await
            .expect_err("duplicate email should be rejected");

        assert!(matches!(
            err,
            ServiceError::Store(StoreError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn test_update_student_fields() {
        let service = setup_service();
        let student = service.create_student("Ada", None).await.unwrap();

        let updated = service
            .update_student(
                &student.id,
                &StudentPatch {
                    name: Some("Ada Lovelace".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap()
            .expect("student should exist");
        assert_eq!(updated.name, "Ada Lovelace");

        let missing = service
            .update_student(
                "no-such-id",
                &StudentPatch {
                    name: Some("Nobody".to_string()),
                    email: None,
                },
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_progress_for_unknown_student_is_none() {
        let service = setup_service();
        let report = service.get_student_progress("no-such-id").await.unwrap();
        assert!(report.is_none());
    }
}
