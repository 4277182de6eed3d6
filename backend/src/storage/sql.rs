use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{ProgressEntry, ProgressReport, Student};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{NewStudent, ProgressUpsert, StoreError, StudentFilter, StudentPatch, StudentStore};
use crate::config::Config;

/// Relational backend over SQLite via sqlx.
///
/// Students and progress live in two tables; reads join them and fold the
/// rows back into the progress-map shape. Progress writes upsert on the
/// `(student_id, week)` uniqueness pair, and deleting a student cascades
/// to its progress rows.
#[derive(Clone)]
pub struct SqlStudentStore {
    pool: SqlitePool,
}

impl SqlStudentStore {
    /// Connect using the configured URL and pool bounds, creating the
    /// database file and schema if they do not exist yet.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .acquire_timeout(config.command_timeout)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Self::setup_schema(&pool).await?;

        Ok(Self { pool })
    }

    /// Connect to a uniquely named shared-cache in-memory database, so
    /// every test gets its own isolated store.
    #[cfg(test)]
    pub async fn connect_test() -> Result<Self, StoreError> {
        let url = format!(
            "sqlite:file:memdb_{}?mode=memory&cache=shared",
            Uuid::new_v4()
        );
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .foreign_keys(true);
        // Hold one connection open for the lifetime of the pool so the
        // shared in-memory database survives between queries.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::setup_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn setup_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS students (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT UNIQUE,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS student_progress (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
                week TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (student_id, week)
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Fold joined student/progress rows into students. Rows must arrive
    /// grouped by student id (guaranteed by the ORDER BY in the queries
    /// below).
    fn fold_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Student>, StoreError> {
        let mut students: Vec<Student> = Vec::new();

        for row in rows {
            let id: String = row.try_get("id").map_err(StoreError::from)?;
            if students.last().map(|s| s.id.as_str()) != Some(id.as_str()) {
                let created_at: DateTime<Utc> =
                    row.try_get("created_at").map_err(StoreError::from)?;
                students.push(Student {
                    id,
                    name: row.try_get("name").map_err(StoreError::from)?,
                    email: row.try_get("email").map_err(StoreError::from)?,
                    created_at: Some(created_at),
                    progress: BTreeMap::new(),
                });
            }
            let week: Option<String> = row.try_get("week").map_err(StoreError::from)?;
            if let Some(week) = week {
                let status: bool = row.try_get("status").map_err(StoreError::from)?;
                if let Some(student) = students.last_mut() {
                    student.progress.insert(week, status);
                }
            }
        }

        Ok(students)
    }

    fn filter_clause(filter: &StudentFilter) -> String {
        let mut conditions = Vec::new();
        if filter.name.is_some() {
            conditions.push("s.name = ?");
        }
        if filter.email.is_some() {
            conditions.push("s.email = ?");
        }
        if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        }
    }
}

#[async_trait]
impl StudentStore for SqlStudentStore {
    async fn insert(&self, new: &NewStudent) -> Result<Student, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        sqlx::query("INSERT INTO students (id, name, email, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(&new.name)
            .bind(&new.email)
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(Student {
            id,
            name: new.name.clone(),
            email: new.email.clone(),
            created_at: Some(created_at),
            progress: BTreeMap::new(),
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Student>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.name, s.email, s.created_at, p.week, p.status
            FROM students s
            LEFT JOIN student_progress p ON p.student_id = s.id
            WHERE s.id = ?
            ORDER BY p.week
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Self::fold_rows(rows)?.into_iter().next())
    }

    async fn find(&self, filter: &StudentFilter) -> Result<Vec<Student>, StoreError> {
        let sql = format!(
            "SELECT s.id, s.name, s.email, s.created_at, p.week, p.status \
             FROM students s \
             LEFT JOIN student_progress p ON p.student_id = s.id\
             {} ORDER BY s.created_at DESC, s.id, p.week",
            Self::filter_clause(filter)
        );

        let mut query = sqlx::query(&sql);
        if let Some(name) = &filter.name {
            query = query.bind(name);
        }
        if let Some(email) = &filter.email {
            query = query.bind(email);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Self::fold_rows(rows)
    }

    async fn update_fields(&self, id: &str, patch: &StudentPatch) -> Result<u64, StoreError> {
        if patch.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE students SET name = COALESCE(?, name), email = COALESCE(?, email) WHERE id = ?",
        )
        .bind(&patch.name)
        .bind(&patch.email)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM students WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, filter: &StudentFilter) -> Result<u64, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM students s{}",
            Self::filter_clause(filter)
        );

        let mut query = sqlx::query(&sql);
        if let Some(name) = &filter.name {
            query = query.bind(name);
        }
        if let Some(email) = &filter.email {
            query = query.bind(email);
        }

        let row = query.fetch_one(&self.pool).await?;
        let total: i64 = row.try_get("total").map_err(StoreError::from)?;
        Ok(total as u64)
    }

    async fn upsert_progress(&self, id: &str, entry: &ProgressUpsert) -> Result<(), StoreError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO student_progress (id, student_id, week, status, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (student_id, week)
            DO UPDATE SET status = excluded.status,
                          notes = excluded.notes,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(id)
        .bind(&entry.week)
        .bind(entry.status)
        .bind(&entry.notes)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn progress_report(&self, id: &str) -> Result<Option<ProgressReport>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.name, p.week, p.status, p.notes, p.updated_at
            FROM students s
            LEFT JOIN student_progress p ON p.student_id = s.id
            WHERE s.id = ?
            ORDER BY p.week
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let mut report = ProgressReport {
            student_name: first.try_get("name").map_err(StoreError::from)?,
            progress: BTreeMap::new(),
        };

        for row in &rows {
            let week: Option<String> = row.try_get("week").map_err(StoreError::from)?;
            if let Some(week) = week {
                report.progress.insert(
                    week,
                    ProgressEntry {
                        status: row.try_get("status").map_err(StoreError::from)?,
                        notes: row.try_get("notes").map_err(StoreError::from)?,
                        updated_at: row.try_get("updated_at").map_err(StoreError::from)?,
                    },
                );
            }
        }

        Ok(Some(report))
    }
}
