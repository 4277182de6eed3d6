//! Server-rendered form pages.
//!
//! These are deliberately small inline-HTML pages: registration, progress
//! lookup, progress update, and an admin listing. They drive the same
//! service as the JSON API and translate errors at this boundary only.

use axum::{
    extract::{Form, State},
    response::{Html, IntoResponse},
};
use serde::Deserialize;
use tracing::info;

use crate::domain::ServiceError;
use crate::rest::{status_for, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressQueryForm {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    pub name: String,
    pub week: String,
    pub status: String,
    pub notes: Option<String>,
}

/// Wrap a page body in the shared chrome.
fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>{title} - Student Tracker</title>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <style>
    body {{ font-family: sans-serif; margin: 0; padding: 20px; background: #f4f6f8; }}
    .container {{ max-width: 720px; margin: 40px auto; background: white; border-radius: 8px; padding: 32px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); }}
    nav a {{ margin-right: 12px; }}
    table {{ border-collapse: collapse; width: 100%; }}
    th, td {{ border: 1px solid #ddd; padding: 8px; text-align: left; }}
    .message {{ color: #2e7d32; }}
    .error {{ color: #c62828; }}
    label {{ display: block; margin-top: 12px; }}
  </style>
</head>
<body>
  <div class="container">
    <nav>
      <a href="/">Home</a>
      <a href="/register">Register</a>
      <a href="/progress">Progress</a>
      <a href="/update">Update</a>
      <a href="/admin">Admin</a>
    </nav>
    <h1>{title}</h1>
    {body}
  </div>
</body>
</html>"#
    ))
}

/// Minimal HTML escaping for user-supplied text interpolated into pages.
fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn error_page(title: &str, err: &ServiceError) -> axum::response::Response {
    let body = format!(r#"<p class="error">{}</p>"#, escape(&err.to_string()));
    (status_for(err), page(title, &body)).into_response()
}

/// Accepted truthy spellings for the update form's status field.
fn parse_status(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "on" | "1" | "yes" | "completed" | "done"
    )
}

/// GET /
pub async fn home(State(state): State<AppState>) -> impl IntoResponse {
    // A failing count degrades to zero rather than breaking the home page
    let total = state.service.count_students().await.unwrap_or_else(|e| {
        tracing::error!("error counting students for home page: {e:?}");
        0
    });

    let body = format!(
        r#"<p>Student Tracking &amp; Management System</p>
<p>Currently tracking <strong>{total}</strong> student(s).</p>"#
    );
    page("Student Tracker", &body)
}

/// GET /register
pub async fn register_form() -> impl IntoResponse {
    page(
        "Register",
        r#"<form method="post" action="/register">
  <label>Name <input type="text" name="name" required></label>
  <label>Email (optional) <input type="email" name="email"></label>
  <button type="submit">Register</button>
</form>"#,
    )
}

/// POST /register
pub async fn register_submit(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> impl IntoResponse {
    info!("POST /register - name: {}", form.name);

    match state
        .service
        .create_student(&form.name, form.email.as_deref())
        .await
    {
        Ok(student) => {
            let body = format!(
                r#"<p class="message">Welcome, {}! Your student id is <code>{}</code>.</p>"#,
                escape(&student.name),
                escape(&student.id)
            );
            page("Register", &body).into_response()
        }
        Err(e) => error_page("Register", &e),
    }
}

/// GET /progress
pub async fn progress_form() -> impl IntoResponse {
    page(
        "Progress",
        r#"<form method="post" action="/progress">
  <label>Student name <input type="text" name="name" required></label>
  <button type="submit">Show progress</button>
</form>"#,
    )
}

/// POST /progress
pub async fn progress_submit(
    State(state): State<AppState>,
    Form(form): Form<ProgressQueryForm>,
) -> impl IntoResponse {
    info!("POST /progress - name: {}", form.name);

    let student = match state.service.get_student_by_name(&form.name).await {
        Ok(Some(student)) => student,
        Ok(None) => {
            let body = format!(
                r#"<p class="error">No student named {} is registered.</p>"#,
                escape(&form.name)
            );
            return page("Progress", &body).into_response();
        }
        Err(e) => return error_page("Progress", &e),
    };

    let report = match state.service.get_student_progress(&student.id).await {
        Ok(Some(report)) => report,
        Ok(None) => {
            // The student vanished between the two reads; treat as a miss
            let body = format!(
                r#"<p class="error">No student named {} is registered.</p>"#,
                escape(&form.name)
            );
            return page("Progress", &body).into_response();
        }
        Err(e) => return error_page("Progress", &e),
    };

    let mut rows = String::new();
    for (week, entry) in &report.progress {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(week),
            if entry.status { "completed" } else { "pending" },
            escape(entry.notes.as_deref().unwrap_or("")),
        ));
    }

    let body = if rows.is_empty() {
        format!(
            "<p>No progress recorded yet for {}.</p>",
            escape(&report.student_name)
        )
    } else {
        format!(
            r#"<p>Progress for {}:</p>
<table>
  <tr><th>Week</th><th>Status</th><th>Notes</th></tr>
  {rows}
</table>"#,
            escape(&report.student_name)
        )
    };
    page("Progress", &body).into_response()
}

/// GET /update
pub async fn update_form() -> impl IntoResponse {
    page(
        "Update",
        r#"<form method="post" action="/update">
  <label>Student name <input type="text" name="name" required></label>
  <label>Week <input type="text" name="week" required></label>
  <label>Status
    <select name="status">
      <option value="true">completed</option>
      <option value="false">pending</option>
    </select>
  </label>
  <label>Notes (optional) <input type="text" name="notes"></label>
  <button type="submit">Update</button>
</form>"#,
    )
}

/// POST /update
pub async fn update_submit(
    State(state): State<AppState>,
    Form(form): Form<UpdateForm>,
) -> impl IntoResponse {
    info!(
        "POST /update - name: {}, week: {}, status: {}",
        form.name, form.week, form.status
    );

    let student = match state.service.get_student_by_name(&form.name).await {
        Ok(Some(student)) => student,
        Ok(None) => {
            let body = format!(
                r#"<p class="error">No student named {} is registered.</p>"#,
                escape(&form.name)
            );
            return page("Update", &body).into_response();
        }
        Err(e) => return error_page("Update", &e),
    };

    let completed = parse_status(&form.status);
    let notes = form.notes.as_deref().map(str::trim).filter(|n| !n.is_empty());

    match state
        .service
        .update_progress(&student.id, &form.week, completed, notes)
        .await
    {
        Ok(Some(_)) => {
            let body = r#"<p class="message">Progress updated successfully!</p>"#;
            page("Update", body).into_response()
        }
        Ok(None) => {
            let body = format!(
                r#"<p class="error">No student named {} is registered.</p>"#,
                escape(&form.name)
            );
            page("Update", &body).into_response()
        }
        Err(e) => error_page("Update", &e),
    }
}

/// GET /admin
pub async fn admin(State(state): State<AppState>) -> impl IntoResponse {
    let students = match state.service.list_students().await {
        Ok(students) => students,
        Err(e) => return error_page("Admin", &e),
    };

    let mut rows = String::new();
    for student in &students {
        let completed = student.progress.values().filter(|done| **done).count();
        rows.push_str(&format!(
            "<tr><td><code>{}</code></td><td>{}</td><td>{}</td><td>{}/{}</td></tr>",
            escape(&student.id),
            escape(&student.name),
            escape(student.email.as_deref().unwrap_or("-")),
            completed,
            student.progress.len(),
        ));
    }

    let body = if rows.is_empty() {
        "<p>No students registered yet.</p>".to_string()
    } else {
        format!(
            r#"<table>
  <tr><th>Id</th><th>Name</th><th>Email</th><th>Weeks completed</th></tr>
  {rows}
</table>"#
        )
    };
    page("Admin", &body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StudentService;
    use crate::storage::memory::MemoryStudentStore;
    use axum::http::StatusCode;
    use std::sync::Arc;

    fn setup_state() -> AppState {
        let store = Arc::new(MemoryStudentStore::new());
        AppState::new(StudentService::new(store))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        String::from_utf8(bytes.to_vec()).expect("body should be utf-8")
    }

    #[test]
    fn test_parse_status() {
        for truthy in ["true", "on", "1", "yes", "Completed", "DONE"] {
            assert!(parse_status(truthy), "{truthy} should parse as completed");
        }
        for falsy in ["false", "off", "0", "no", "pending", ""] {
            assert!(!parse_status(falsy), "{falsy} should parse as pending");
        }
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<b>"Ada" & 'Grace'</b>"#),
            "&lt;b&gt;&quot;Ada&quot; &amp; &#39;Grace&#39;&lt;/b&gt;"
        );
    }

    #[tokio::test]
    async fn test_register_submit_creates_student() {
        let state = setup_state();

        let form = RegisterForm {
            name: "Ada".to_string(),
            email: None,
        };
        let response = register_submit(State(state.clone()), Form(form))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Welcome, Ada!"));

        assert_eq!(state.service.count_students().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_progress_submit_for_unknown_student() {
        let state = setup_state();

        let form = ProgressQueryForm {
            name: "Nobody".to_string(),
        };
        let response = progress_submit(State(state), Form(form))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("No student named Nobody"));
    }

    #[tokio::test]
    async fn test_update_then_progress_round_trip() {
        let state = setup_state();
        state.service.create_student("Ada", None).await.unwrap();

        let update = UpdateForm {
            name: "Ada".to_string(),
            week: "w1".to_string(),
            status: "true".to_string(),
            notes: Some("on track".to_string()),
        };
        let response = update_submit(State(state.clone()), Form(update))
            .await
            .into_response();
        assert!(body_text(response).await.contains("updated successfully"));

        let form = ProgressQueryForm {
            name: "Ada".to_string(),
        };
        let response = progress_submit(State(state), Form(form))
            .await
            .into_response();
        let body = body_text(response).await;
        assert!(body.contains("w1"));
        assert!(body.contains("completed"));
        assert!(body.contains("on track"));
    }

    #[tokio::test]
    async fn test_home_shows_count() {
        let state = setup_state();
        state.service.create_student("Ada", None).await.unwrap();

        let response = home(State(state)).await.into_response();
        let body = body_text(response).await;
        assert!(body.contains("<strong>1</strong>"));
    }
}
