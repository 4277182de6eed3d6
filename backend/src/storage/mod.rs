//! Storage layer: one CRUD contract, three interchangeable backends.
//!
//! The domain layer talks to `StudentStore` only. The backend behind it is
//! chosen at startup from the configured DATABASE_URL:
//!
//! - `sqlite:` - relational store, two tables joined into the progress
//!   map shape on read ([`sql::SqlStudentStore`])
//! - `file://` - one JSON document per student with embedded progress
//!   ([`document::DocumentStudentStore`])
//! - `memory://` - process-local map, not persisted
//!   ([`memory::MemoryStudentStore`])
//!
//! Read misses are `Ok(None)` / empty collections, never errors. Write
//! paths surface backend errors to the caller uninterpreted, except that
//! all three backends report a duplicate email as
//! [`StoreError::Constraint`].

pub mod document;
pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{ProgressEntry, ProgressReport, Student};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::{BackendKind, Config};

/// Errors surfaced by the storage layer.
///
/// NotFound is deliberately absent: read misses come back as `None` or an
/// empty collection, and deleting a missing record reports a count of 0.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness rule was violated (duplicate email, duplicate
    /// (student, week) pair outside the upsert path).
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// The backend could not be reached.
    #[error("storage backend unavailable: {0}")]
    Connection(String),

    /// Any other backend-native failure, passed through unmodified.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Constraint(db.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                StoreError::Connection(err.to_string())
            }
            _ => StoreError::Backend(err.into()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

/// Input for [`StudentStore::insert`]. The backend assigns the id and
/// creation timestamp.
#[derive(Debug, Clone)]
pub struct NewStudent {
    pub name: String,
    pub email: Option<String>,
}

/// Partial update for [`StudentStore::update_fields`]. `None` leaves the
/// field untouched.
#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl StudentPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

/// Equality predicate fields for [`StudentStore::find`] and
/// [`StudentStore::count`]. An empty filter matches every record.
#[derive(Debug, Clone, Default)]
pub struct StudentFilter {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl StudentFilter {
    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn by_email(email: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            ..Self::default()
        }
    }
}

/// Input for [`StudentStore::upsert_progress`]: one (week, status) pair
/// with optional notes.
#[derive(Debug, Clone)]
pub struct ProgressUpsert {
    pub week: String,
    pub status: bool,
    pub notes: Option<String>,
}

/// The uniform CRUD contract every backend satisfies.
#[async_trait]
pub trait StudentStore: Send + Sync {
    /// Store a new student, assigning its id and creation timestamp.
    /// Fails with [`StoreError::Constraint`] on a duplicate email.
    async fn insert(&self, new: &NewStudent) -> Result<Student, StoreError>;

    /// Fetch one student with progress aggregated in; `None` on a miss.
    async fn find_by_id(&self, id: &str) -> Result<Option<Student>, StoreError>;

    /// List students matching the filter, newest first.
    async fn find(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError>;

    /// Apply a partial update; returns the number of records modified
    /// (0 when the id is unknown or the patch is empty).
    async fn update_fields(&self, id: &str, patch: &StudentPatch) -> Result<u64, StoreError>;

    /// Delete a student; returns the number of records removed. Progress
    /// entries go with the record (cascade on the relational backend,
    /// embedded elsewhere).
    async fn delete(&self, id: &str) -> Result<u64, StoreError>;

    /// Count students matching the filter.
    async fn count(&self, filter: &StudentFilter) -> Result<u64, StoreError>;

    /// Insert or update the progress entry for one (student, week) pair.
    /// Last write wins on status and notes.
    async fn upsert_progress(&self, id: &str, entry: &ProgressUpsert) -> Result<(), StoreError>;

    /// Detailed per-week progress for one student; `None` on a miss.
    async fn progress_report(&self, id: &str) -> Result<Option<ProgressReport>, StoreError>;
}

/// Canonical embedded-document shape shared by the document and in-memory
/// backends: the full student with its detailed progress map inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: BTreeMap<String, ProgressEntry>,
}

impl StudentRecord {
    pub fn new(id: String, new: &NewStudent, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: new.name.clone(),
            email: new.email.clone(),
            created_at,
            progress: BTreeMap::new(),
        }
    }

    /// Collapse the detailed progress map into the status-only view.
    pub fn to_student(&self) -> Student {
        Student {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            created_at: Some(self.created_at),
            progress: self
                .progress
                .iter()
                .map(|(week, entry)| (week.clone(), entry.status))
                .collect(),
        }
    }

    pub fn to_report(&self) -> ProgressReport {
        ProgressReport {
            student_name: self.name.clone(),
            progress: self.progress.clone(),
        }
    }

    pub fn matches(&self, filter: &StudentFilter) -> bool {
        if let Some(name) = &filter.name {
            if &self.name != name {
                return false;
            }
        }
        if let Some(email) = &filter.email {
            if self.email.as_deref() != Some(email.as_str()) {
                return false;
            }
        }
        true
    }

    /// Apply a field patch in place; `None` fields are left untouched.
    pub fn apply_patch(&mut self, patch: &StudentPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(email) = &patch.email {
            self.email = Some(email.clone());
        }
    }

    /// Upsert one week's entry, keyed on the week label.
    pub fn upsert_progress(&mut self, entry: &ProgressUpsert, now: DateTime<Utc>) {
        self.progress.insert(
            entry.week.clone(),
            ProgressEntry {
                status: entry.status,
                notes: entry.notes.clone(),
                updated_at: now,
            },
        );
    }
}

/// Build the backend selected by the configuration and hand it back as a
/// shared trait object.
///
/// With `FALLBACK_TO_MEMORY=true`, a connection failure is logged and the
/// in-memory store is returned instead, matching the serverless deployment
/// variant where no database may be attached.
pub async fn connect(config: &Config) -> Result<Arc<dyn StudentStore>, StoreError> {
    match open_backend(config).await {
        Ok(store) => Ok(store),
        Err(StoreError::Connection(detail)) if config.fallback_to_memory => {
            warn!(
                "storage backend unreachable ({detail}); falling back to in-memory store"
            );
            Ok(Arc::new(memory::MemoryStudentStore::new()))
        }
        Err(err) => Err(err),
    }
}

async fn open_backend(config: &Config) -> Result<Arc<dyn StudentStore>, StoreError> {
    let kind = config.backend().map_err(StoreError::Backend)?;
    match kind {
        BackendKind::Relational => {
            let store = sql::SqlStudentStore::connect(config).await?;
            Ok(Arc::new(store))
        }
        BackendKind::Document(dir) => {
            let store = document::DocumentStudentStore::new(&dir)?;
            Ok(Arc::new(store))
        }
        BackendKind::Memory => Ok(Arc::new(memory::MemoryStudentStore::new())),
    }
}
