//! Field configuration API endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use super::{created, require, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    is_valid_field_name, CreateFieldRequest, DynamicFormSchema, FieldConfiguration, FieldOrder,
    FieldQuery, FieldType, ReorderResult, UpdateFieldRequest, FORM_SCHEMA_VERSION,
};
use crate::AppState;

/// One entry of the field type catalogue.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTypeInfo {
    pub value: &'static str,
    pub label: &'static str,
}

fn type_label(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "Text",
        FieldType::Number => "Number",
        FieldType::Currency => "Currency",
        FieldType::Date => "Date",
        FieldType::Boolean => "Yes/No",
        FieldType::Select => "Dropdown",
        FieldType::Email => "Email",
        FieldType::Phone => "Phone Number",
    }
}

fn check_options(field_type: FieldType, options: &[String]) -> Result<(), AppError> {
    if field_type == FieldType::Select && options.iter().all(|o| o.trim().is_empty()) {
        return Err(AppError::Validation(
            "Select fields need at least one option".to_string(),
        ));
    }
    Ok(())
}

/// GET /api/fields - List field configurations.
pub async fn list_fields(
    State(state): State<AppState>,
    Query(query): Query<FieldQuery>,
) -> ApiResult<Vec<FieldConfiguration>> {
    success(
        state
            .repo
            .list_fields(query.active_only.unwrap_or(false))
            .await?,
    )
}

/// GET /api/fields/types - Supported field types.
pub async fn list_field_types() -> ApiResult<Vec<FieldTypeInfo>> {
    success(
        FieldType::ALL
            .into_iter()
            .map(|t| FieldTypeInfo {
                value: t.as_str(),
                label: type_label(t),
            })
            .collect(),
    )
}

/// GET /api/fields/{id} - Get a field configuration.
pub async fn get_field(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<FieldConfiguration> {
    match state.repo.get_field(id).await? {
        Some(field) => success(field),
        None => Err(AppError::NotFound(format!("Field {} not found", id))),
    }
}

/// POST /api/fields - Create a field configuration.
pub async fn create_field(
    State(state): State<AppState>,
    Json(request): Json<CreateFieldRequest>,
) -> ApiResult<FieldConfiguration> {
    if !is_valid_field_name(&request.field_name) {
        return Err(AppError::Validation(format!(
            "Invalid field name '{}': use lowercase letters, digits and underscores",
            request.field_name
        )));
    }
    require(&request.field_label, "Field label")?;
    check_options(request.field_type, &request.field_options)?;

    let field = state.repo.create_field(&request).await?;
    tracing::info!(field = %field.field_name, "Field configuration created");
    created(field)
}

/// PUT /api/fields/{id} - Update a field configuration.
pub async fn update_field(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateFieldRequest>,
) -> ApiResult<FieldConfiguration> {
    let existing = state
        .repo
        .get_field(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Field {} not found", id)))?;

    if let Some(label) = &request.field_label {
        require(label, "Field label")?;
    }
    check_options(
        request.field_type.unwrap_or(existing.field_type),
        request
            .field_options
            .as_deref()
            .unwrap_or(&existing.field_options),
    )?;

    success(state.repo.update_field(id, &request).await?)
}

/// DELETE /api/fields/{id} - Deactivate a field configuration.
///
/// Student data stored under the field is kept.
pub async fn delete_field(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.repo.deactivate_field(id).await?;
    success(())
}

/// GET /api/fields/schema/dynamic-form - Active fields in display order.
pub async fn dynamic_form_schema(State(state): State<AppState>) -> ApiResult<DynamicFormSchema> {
    let fields = state.repo.list_fields(true).await?;
    let last_updated = fields
        .iter()
        .map(|f| f.created_at.clone())
        .max()
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    success(DynamicFormSchema {
        fields,
        schema_version: FORM_SCHEMA_VERSION,
        last_updated,
    })
}

/// POST /api/fields/reorder - Set display orders in one batch.
pub async fn reorder_fields(
    State(state): State<AppState>,
    Json(orders): Json<Vec<FieldOrder>>,
) -> ApiResult<ReorderResult> {
    let updated_count = state.repo.reorder_fields(&orders).await?;
    tracing::info!(updated_count, "Field display order updated");
    success(ReorderResult { updated_count })
}
