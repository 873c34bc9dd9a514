//! Context note (knowledge store) API endpoints.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{created, require, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    CategoryCount, ContextNote, ContextNoteQuery, CreateContextNoteRequest,
    UpdateContextNoteRequest,
};
use crate::AppState;

/// Maximum number of search results allowed.
const MAX_SEARCH_LIMIT: usize = 100;

/// Search query parameters.
#[derive(Debug, Deserialize)]
pub struct NoteSearchQuery {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    20
}

/// Delete query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct DeleteNoteQuery {
    /// Remove the row instead of deactivating it
    #[serde(default)]
    pub hard: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSearchResponse {
    pub results: Vec<NoteSearchHit>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSearchHit {
    pub note: ContextNote,
    pub score: f32,
}

/// GET /api/context-notes - List notes.
pub async fn list_context_notes(
    State(state): State<AppState>,
    Query(query): Query<ContextNoteQuery>,
) -> ApiResult<Vec<ContextNote>> {
    success(state.repo.list_context_notes(&query).await?)
}

/// GET /api/context-notes/categories - Active notes per category.
pub async fn list_note_categories(State(state): State<AppState>) -> ApiResult<Vec<CategoryCount>> {
    success(state.repo.context_note_categories().await?)
}

/// GET /api/context-notes/{id} - Get a single note.
pub async fn get_context_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<ContextNote> {
    match state.repo.get_context_note(id).await? {
        Some(note) => success(note),
        None => Err(AppError::NotFound(format!("Context note {} not found", id))),
    }
}

/// POST /api/context-notes - Create a note.
pub async fn create_context_note(
    State(state): State<AppState>,
    Json(request): Json<CreateContextNoteRequest>,
) -> ApiResult<ContextNote> {
    require(&request.topic, "Topic")?;
    require(&request.information, "Information")?;

    let note = state.repo.create_context_note(&request).await?;
    if let Err(e) = state.search.index_note(&note).await {
        tracing::warn!("Failed to index context note: {}", e);
    }
    created(note)
}

/// PUT /api/context-notes/{id} - Partially update a note.
pub async fn update_context_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateContextNoteRequest>,
) -> ApiResult<ContextNote> {
    if let Some(topic) = &request.topic {
        require(topic, "Topic")?;
    }
    if let Some(information) = &request.information {
        require(information, "Information")?;
    }

    let note = state.repo.update_context_note(id, &request).await?;
    if let Err(e) = state.search.index_note(&note).await {
        tracing::warn!("Failed to re-index context note: {}", e);
    }
    success(note)
}

/// DELETE /api/context-notes/{id} - Deactivate a note, or remove it with `?hard=true`.
pub async fn delete_context_note(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DeleteNoteQuery>,
) -> ApiResult<()> {
    if query.hard {
        state.repo.delete_context_note(id).await?;
        if let Err(e) = state.search.remove_note(id).await {
            tracing::warn!("Failed to remove context note from index: {}", e);
        }
    } else {
        let note = state.repo.deactivate_context_note(id).await?;
        if let Err(e) = state.search.index_note(&note).await {
            tracing::warn!("Failed to re-index context note: {}", e);
        }
    }
    success(())
}

/// GET /api/context-notes/search - Full-text search over notes.
pub async fn search_context_notes(
    State(state): State<AppState>,
    Query(params): Query<NoteSearchQuery>,
) -> ApiResult<NoteSearchResponse> {
    let limit = params.limit.min(MAX_SEARCH_LIMIT);
    let hits = state.search.search(&params.q, limit, params.offset)?;

    let ids: Vec<i64> = hits.iter().map(|h| h.note_id).collect();
    let notes = state.repo.get_context_notes_by_ids(&ids).await?;

    // Keep the index's ranking; drop hits whose row no longer exists
    let results: Vec<NoteSearchHit> = hits
        .into_iter()
        .filter_map(|hit| {
            notes
                .iter()
                .find(|n| n.id == hit.note_id)
                .map(|note| NoteSearchHit {
                    note: note.clone(),
                    score: hit.score,
                })
        })
        .collect();

    success(NoteSearchResponse {
        total: results.len(),
        results,
        limit,
        offset: params.offset,
    })
}
