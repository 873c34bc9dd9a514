//! Student roster API endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;

use super::{created, success, ApiResult};
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    normalize_phone, validate_attributes, CreateStudentRequest, Student, StudentAttributes,
    StudentQuery, UpdateStudentRequest,
};
use crate::AppState;

fn phone_or_error(raw: &str) -> Result<String, AppError> {
    normalize_phone(raw)
        .ok_or_else(|| AppError::Validation(format!("Invalid phone number '{}'", raw)))
}

/// Validate an attribute bag against the active field configurations.
async fn check_attributes(repo: &Repository, attributes: &StudentAttributes) -> Result<(), AppError> {
    let fields = repo.list_fields(true).await?;
    let errors = validate_attributes(&fields, attributes);
    if !errors.is_empty() {
        return Err(AppError::InvalidAttributes(errors));
    }
    Ok(())
}

/// GET /api/students - List or search students.
pub async fn list_students(
    State(state): State<AppState>,
    Query(query): Query<StudentQuery>,
) -> ApiResult<Vec<Student>> {
    success(state.repo.list_students(&query).await?)
}

/// GET /api/students/{id} - Get a student.
pub async fn get_student(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Student> {
    match state.repo.get_student(id).await? {
        Some(student) => success(student),
        None => Err(AppError::NotFound(format!("Student {} not found", id))),
    }
}

/// POST /api/students - Create a student.
pub async fn create_student(
    State(state): State<AppState>,
    Json(request): Json<CreateStudentRequest>,
) -> ApiResult<Student> {
    let phone = phone_or_error(&request.phone_number)?;
    check_attributes(&state.repo, &request.attributes).await?;

    let student = state.repo.create_student(&phone, &request).await?;
    tracing::info!(student_id = student.id, "Student created");
    created(student)
}

/// PUT /api/students/{id} - Update a student; attributes are merged, then re-validated.
pub async fn update_student(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut request): Json<UpdateStudentRequest>,
) -> ApiResult<Student> {
    let existing = state
        .repo
        .get_student(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Student {} not found", id)))?;

    if let Some(raw) = request.phone_number.take() {
        request.phone_number = Some(phone_or_error(&raw)?);
    }

    let merged = Repository::merge_student(&existing, &request);
    check_attributes(&state.repo, &merged.attributes).await?;

    success(state.repo.save_student(&merged).await?)
}

/// DELETE /api/students/{id} - Delete a student.
///
/// Campaigns that still list the student skip it from then on.
pub async fn delete_student(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.repo.delete_student(id).await?;
    success(())
}
