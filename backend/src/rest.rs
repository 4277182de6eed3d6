use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use shared::{ErrorResponse, HealthResponse, RegisterRequest, RegisterResponse, StudentListResponse};
use tracing::info;

use crate::domain::{ServiceError, StudentService};
use crate::storage::StoreError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: StudentService,
}

impl AppState {
    pub fn new(service: StudentService) -> Self {
        Self { service }
    }
}

/// The single place errors become status codes. Everything below the HTTP
/// layer returns the typed union; nothing is caught-and-stringified on the
/// way up.
pub fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ServiceError::Store(StoreError::Constraint(_)) => StatusCode::CONFLICT,
        ServiceError::Store(StoreError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
        ServiceError::Store(StoreError::Backend(_)) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: &ServiceError) -> (StatusCode, Json<ErrorResponse>) {
    (
        status_for(err),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "student-tracker".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /api/students
pub async fn list_students(State(state): State<AppState>) -> impl IntoResponse {
    info!("GET /api/students");

    match state.service.list_students().await {
        Ok(students) => {
            let count = students.len();
            (StatusCode::OK, Json(StudentListResponse { students, count })).into_response()
        }
        Err(e) => {
            tracing::error!("error listing students: {e:?}");
            error_response(&e).into_response()
        }
    }
}

/// POST /api/register
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> impl IntoResponse {
    info!("POST /api/register - name: {}", request.name);

    match state
        .service
        .create_student(&request.name, request.email.as_deref())
        .await
    {
        Ok(student) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                message: format!("Student {} registered successfully", student.name),
                student,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("error registering student: {e:?}");
            error_response(&e).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StudentService;
    use crate::storage::memory::MemoryStudentStore;
    use axum::response::Response;
    use std::sync::Arc;

    fn setup_state() -> AppState {
        let store = Arc::new(MemoryStudentStore::new());
        AppState::new(StudentService::new(store))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read body");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "student-tracker");
    }

    #[tokio::test]
    async fn test_register_handler_creates_student() {
        let state = setup_state();

        let request = RegisterRequest {
            name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
        };
        let response = register(State(state.clone()), Json(request))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        assert_eq!(body["student"]["name"], "Ada");

        let listed = state.service.list_students().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_register_handler_rejects_blank_name() {
        let state = setup_state();

        let request = RegisterRequest {
            name: "  ".to_string(),
            email: None,
        };
        let response = register(State(state), Json(request)).await.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_register_handler_conflict_on_duplicate_email() {
        let state = setup_state();

        let first = RegisterRequest {
            name: "Ada".to_string(),
            email: Some("shared@example.com".to_string()),
        };
        let second = RegisterRequest {
            name: "Grace".to_string(),
            email: Some("shared@example.com".to_string()),
        };

        let response = register(State(state.clone()), Json(first))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = register(State(state), Json(second)).await.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_list_students_handler() {
        let state = setup_state();

        state.service.create_student("Ada", None).await.unwrap();
        state.service.create_student("Grace", None).await.unwrap();

        let response = list_students(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["students"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ServiceError::Validation("name")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ServiceError::Store(StoreError::Constraint(
                "duplicate".to_string()
            ))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ServiceError::Store(StoreError::Connection(
                "unreachable".to_string()
            ))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ServiceError::Store(StoreError::Backend(
                anyhow::anyhow!("boom")
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
