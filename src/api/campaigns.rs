//! Campaign API endpoints, including calling-brief generation and activation.

use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::Json;

use super::{created, success, ApiResult};
use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    validate_call_window, Campaign, CampaignContextsView, CampaignQuery, CampaignResponse,
    CampaignStatus, ContextNote, ContextPreview, CreateCampaignRequest, PreviewContextRequest,
    Student, StudentContextView, UpdateCampaignRequest, UpdateStudentContextRequest,
};
use crate::AppState;

const MAX_NAME_LEN: usize = 255;

fn check_name(name: &str) -> Result<(), AppError> {
    let len = name.trim().chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Campaign name must be 1-{} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// IDs from `wanted` that are not in `found`, in request order.
fn missing_ids(wanted: &[i64], found: impl Iterator<Item = i64>) -> Vec<String> {
    let found: HashSet<i64> = found.collect();
    let mut seen = HashSet::new();
    wanted
        .iter()
        .filter(|id| !found.contains(id) && seen.insert(**id))
        .map(|id| id.to_string())
        .collect()
}

/// Resolve note IDs, rejecting an empty list or unknown IDs.
async fn resolve_notes(repo: &Repository, ids: &[i64]) -> Result<Vec<ContextNote>, AppError> {
    if ids.is_empty() {
        return Err(AppError::Validation(
            "At least one context note is required".to_string(),
        ));
    }
    let notes = repo.get_context_notes_by_ids(ids).await?;
    let missing = missing_ids(ids, notes.iter().map(|n| n.id));
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Unknown context note ids: {}",
            missing.join(", ")
        )));
    }
    Ok(notes)
}

/// Resolve student IDs, rejecting an empty list or unknown IDs.
async fn resolve_students(repo: &Repository, ids: &[i64]) -> Result<Vec<Student>, AppError> {
    if ids.is_empty() {
        return Err(AppError::Validation(
            "At least one student is required".to_string(),
        ));
    }
    let students = repo.get_students_by_ids(ids).await?;
    let missing = missing_ids(ids, students.iter().map(|s| s.id));
    if !missing.is_empty() {
        return Err(AppError::Validation(format!(
            "Unknown student ids: {}",
            missing.join(", ")
        )));
    }
    Ok(students)
}

async fn load_campaign(repo: &Repository, id: i64) -> Result<Campaign, AppError> {
    repo.get_campaign(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Campaign {} not found", id)))
}

/// GET /api/campaigns - List campaigns.
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<CampaignQuery>,
) -> ApiResult<Vec<CampaignResponse>> {
    let campaigns = state.repo.list_campaigns(query.status).await?;
    success(campaigns.into_iter().map(CampaignResponse::from).collect())
}

/// GET /api/campaigns/{id} - Get a campaign.
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignResponse> {
    success(load_campaign(&state.repo, id).await?.into())
}

/// POST /api/campaigns - Create a campaign and generate its calling briefs.
///
/// A generation failure is logged and the campaign is returned without briefs.
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> ApiResult<CampaignResponse> {
    check_name(&request.name)?;
    validate_call_window(&request.call_from_time, &request.call_to_time)
        .map_err(AppError::Validation)?;
    let notes = resolve_notes(&state.repo, &request.context_note_ids).await?;
    let students = resolve_students(&state.repo, &request.student_ids).await?;

    let campaign = state.repo.create_campaign(&request).await?;
    tracing::info!(campaign_id = campaign.id, name = %campaign.name, "Campaign created");

    let generated = match state
        .generator
        .generate_campaign_contexts(campaign.id, &notes, &students)
        .await
    {
        Ok(contexts) => state
            .repo
            .set_personalized_contexts(campaign.id, &contexts)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match generated {
        Ok(campaign) => created(campaign.into()),
        Err(e) => {
            tracing::error!(
                campaign_id = campaign.id,
                "Context generation failed, campaign saved without briefs: {}",
                e
            );
            created(campaign.into())
        }
    }
}

/// PUT /api/campaigns/{id} - Partially update a campaign.
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateCampaignRequest>,
) -> ApiResult<CampaignResponse> {
    let existing = load_campaign(&state.repo, id).await?;

    if let Some(name) = &request.name {
        check_name(name)?;
    }
    if request.status == Some(CampaignStatus::Active) {
        return Err(AppError::Validation(
            "Use the activate endpoint to start a campaign".to_string(),
        ));
    }
    if request.call_from_time.is_some() || request.call_to_time.is_some() {
        validate_call_window(
            request
                .call_from_time
                .as_deref()
                .unwrap_or(&existing.call_from_time),
            request
                .call_to_time
                .as_deref()
                .unwrap_or(&existing.call_to_time),
        )
        .map_err(AppError::Validation)?;
    }
    if let Some(ids) = &request.context_note_ids {
        resolve_notes(&state.repo, ids).await?;
    }
    if let Some(ids) = &request.student_ids {
        resolve_students(&state.repo, ids).await?;
    }

    let campaign = state.repo.update_campaign(id, &request).await?;
    success(campaign.into())
}

/// DELETE /api/campaigns/{id} - Delete a draft campaign.
pub async fn delete_campaign(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<()> {
    state.repo.delete_campaign(id).await?;
    success(())
}

/// GET /api/campaigns/{id}/contexts - Briefs in campaign student order.
pub async fn get_campaign_contexts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignContextsView> {
    let campaign = load_campaign(&state.repo, id).await?;
    let students = state.repo.get_students_by_ids(&campaign.student_ids).await?;

    let views = students
        .iter()
        .map(|student| {
            let entry = campaign.context_for(student.id);
            StudentContextView {
                student_id: student.id,
                student_name: entry
                    .map(|e| e.student_name.clone())
                    .unwrap_or_else(|| student.display_name()),
                phone_number: student.phone_number.clone(),
                context: entry.map(|e| e.context.clone()),
                source: entry.map(|e| e.source),
            }
        })
        .collect();

    success(CampaignContextsView {
        campaign_id: campaign.id,
        campaign_name: campaign.name,
        students: views,
    })
}

/// POST /api/campaigns/{id}/regenerate - Rebuild every brief from current notes and students.
pub async fn regenerate_contexts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignResponse> {
    let campaign = load_campaign(&state.repo, id).await?;
    let campaign = state.generator.regenerate(&state.repo, &campaign).await?;
    tracing::info!(campaign_id = id, "Campaign contexts regenerated");
    success(campaign.into())
}

/// PUT /api/campaigns/{id}/contexts/{student_id} - Overwrite one student's brief as given.
pub async fn update_student_context(
    State(state): State<AppState>,
    Path((id, student_id)): Path<(i64, i64)>,
    Json(request): Json<UpdateStudentContextRequest>,
) -> ApiResult<StudentContextView> {
    let campaign = state
        .repo
        .update_student_context(id, student_id, &request.context)
        .await?;
    let entry = campaign.context_for(student_id).ok_or_else(|| {
        AppError::NotFound(format!(
            "No context for student {} in campaign {}",
            student_id, id
        ))
    })?;

    success(StudentContextView {
        student_id,
        student_name: entry.student_name.clone(),
        phone_number: entry.phone_number.clone(),
        context: Some(entry.context.clone()),
        source: Some(entry.source),
    })
}

/// POST /api/campaigns/preview-context - Generate one brief without saving it.
pub async fn preview_context(
    State(state): State<AppState>,
    Json(request): Json<PreviewContextRequest>,
) -> ApiResult<ContextPreview> {
    let entry = state
        .generator
        .preview(&state.repo, request.student_id, &request.context_note_ids)
        .await?;
    success(ContextPreview {
        student_id: request.student_id,
        entry,
    })
}

/// POST /api/campaigns/{id}/activate - Start calling (draft -> active).
pub async fn activate_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignResponse> {
    let existing = load_campaign(&state.repo, id).await?;
    if existing
        .personalized_contexts
        .as_ref()
        .map_or(true, |c| c.is_empty())
    {
        return Err(AppError::Validation(format!(
            "Campaign {} has no calling briefs; regenerate them before activating",
            id
        )));
    }

    let campaign = state
        .repo
        .transition_campaign(id, CampaignStatus::Draft, CampaignStatus::Active)
        .await?;
    tracing::info!(campaign_id = id, "Campaign activated, dispatching calls");
    state.dispatcher.spawn_campaign(id);

    success(campaign.into())
}

/// POST /api/campaigns/{id}/pause - Stop placing new calls (active -> paused).
pub async fn pause_campaign(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<CampaignResponse> {
    let campaign = state
        .repo
        .transition_campaign(id, CampaignStatus::Active, CampaignStatus::Paused)
        .await?;
    tracing::info!(campaign_id = id, "Campaign paused");
    success(campaign.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_ids_keeps_request_order_without_repeats() {
        let missing = missing_ids(&[4, 1, 9, 4, 7], [1, 7].into_iter());
        assert_eq!(missing, vec!["4", "9"]);
    }

    #[test]
    fn test_name_length_bounds() {
        assert!(check_name("June results").is_ok());
        assert!(check_name("   ").is_err());
        assert!(check_name(&"x".repeat(256)).is_err());
        assert!(check_name(&"x".repeat(255)).is_ok());
    }
}
