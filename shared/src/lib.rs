use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A student record with its aggregated weekly progress.
///
/// The `id` is an opaque string assigned by the storage backend. Its shape
/// differs between backends (UUID on the relational and document stores,
/// a sequential counter on the in-memory store) and callers must not
/// depend on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    /// Optional contact email, unique across the store when present
    pub email: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    /// Week label -> completion flag
    #[serde(default)]
    pub progress: BTreeMap<String, bool>,
}

impl Student {
    /// True once every recorded week is marked complete (and at least one
    /// week has been recorded).
    pub fn all_weeks_complete(&self) -> bool {
        !self.progress.is_empty() && self.progress.values().all(|done| *done)
    }
}

/// A single per-week progress record for a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub status: bool,
    pub notes: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Detailed progress view for one student: name plus the full per-week map.
///
/// `progress` is empty for a student with no recorded weeks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub student_name: String,
    #[serde(default)]
    pub progress: BTreeMap<String, ProgressEntry>,
}

/// Request body for POST /api/register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: Option<String>,
}

/// Response body for POST /api/register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    pub student: Student,
}

/// Response body for GET /api/students
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentListResponse {
    pub students: Vec<Student>,
    pub count: usize,
}

/// Response body for GET /health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Response body for API error paths
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
