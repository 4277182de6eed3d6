use async_trait::async_trait;
use chrono::Utc;
use shared::{ProgressReport, Student};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    NewStudent, ProgressUpsert, StoreError, StudentFilter, StudentPatch, StudentRecord,
    StudentStore,
};

/// Document backend: one JSON file per student under a base directory,
/// progress embedded as a sub-map inside the document.
///
/// Updates load the document, set the targeted field, and write the whole
/// document back atomically (temp file + rename). Non-id lookups scan the
/// directory; at this application's scale that is the intended trade-off.
#[derive(Clone)]
pub struct DocumentStudentStore {
    base_dir: PathBuf,
}

impl DocumentStudentStore {
    /// Open a document store rooted at `base_dir`, creating the directory
    /// if needed. Failure to create it is a connection failure, since the
    /// store is unusable without its directory.
    pub fn new(base_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(base_dir)
            .map_err(|e| StoreError::Connection(format!("{}: {e}", base_dir.display())))?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
        })
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    async fn load(&self, id: &str) -> Result<Option<StudentRecord>, StoreError> {
        match tokio::fs::read(self.document_path(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Scan the directory for student documents. Files that fail to parse
    /// are skipped with a warning rather than failing the whole read.
    async fn load_all(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let mut records = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<StudentRecord>(&bytes) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("skipping unreadable student document {:?}: {e}", path),
                },
                Err(e) => warn!("skipping unreadable student document {:?}: {e}", path),
            }
        }

        debug!("loaded {} student documents", records.len());
        Ok(records)
    }

    /// Write a document atomically: serialize to a temp file alongside the
    /// target, then rename over it.
    async fn save(&self, record: &StudentRecord) -> Result<(), StoreError> {
        let path = self.document_path(&record.id);
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    /// Enforce the unique-email invariant by scanning existing documents.
    async fn check_email_unique(
        &self,
        email: &str,
        exclude_id: Option<&str>,
    ) -> Result<(), StoreError> {
        for record in self.load_all().await? {
            if Some(record.id.as_str()) == exclude_id {
                continue;
            }
            if record.email.as_deref() == Some(email) {
                return Err(StoreError::Constraint(format!(
                    "email already registered: {email}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StudentStore for DocumentStudentStore {
    async fn insert(&self, new: &NewStudent) -> Result<Student, StoreError> {
        if let Some(email) = &new.email {
            self.check_email_unique(email, None).await?;
        }

        let record = StudentRecord::new(Uuid::new_v4().to_string(), new, Utc::now());
        self.save(&record).await?;

        Ok(record.to_student())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self.load(id).await?.map(|record| record.to_student()))
    }

    async fn find(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError> {
        let mut records: Vec<StudentRecord> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|record| record.matches(filter))
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));

        Ok(records.iter().map(StudentRecord::to_student).collect())
    }

    async fn update_fields(&self, id: &str, patch: &StudentPatch) -> Result<u64, StoreError> {
        if patch.is_empty() {
            return Ok(0);
        }
        let Some(mut record) = self.load(id).await? else {
            return Ok(0);
        };

        if let Some(email) = &patch.email {
            self.check_email_unique(email, Some(id)).await?;
        }

        record.apply_patch(patch);
        self.save(&record).await?;

        Ok(1)
    }

    async fn delete(&self, id: &str) -> Result<u64, StoreError> {
        match tokio::fs::remove_file(self.document_path(id)).await {
            Ok(()) => Ok(1),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self, filter: &StudentFilter) -> Result<u64, StoreError> {
        let records = self.load_all().await?;
        Ok(records.iter().filter(|r| r.matches(filter)).count() as u64)
    }

    async fn upsert_progress(&self, id: &str, entry: &ProgressUpsert) -> Result<(), StoreError> {
        let Some(mut record) = self.load(id).await? else {
            return Err(StoreError::Backend(anyhow::anyhow!(
                "student not found: {id}"
            )));
        };

        record.upsert_progress(entry, Utc::now());
        self.save(&record).await
    }

    async fn progress_report(&self, id: &str) -> Result<Option<ProgressReport>, StoreError> {
        Ok(self.load(id).await?.map(|record| record.to_report()))
    }
}
