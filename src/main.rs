//! Institute Outreach Backend
//!
//! REST backend for scholarship outreach campaigns: student rosters, context
//! notes, AI-written calling briefs and voice call dispatch, with SQLite
//! persistence and Tantivy full-text search.

mod api;
mod auth;
mod config;
mod db;
mod dispatch;
mod errors;
mod generation;
mod llm;
mod models;
mod search;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use dispatch::{CallDispatcher, HttpVoiceGateway};
use generation::ContextGenerator;
use llm::OpenAiClient;
use models::ContextNoteQuery;
use search::SearchIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub search: Arc<SearchIndex>,
    pub config: Arc<Config>,
    pub generator: Arc<ContextGenerator>,
    pub dispatcher: Arc<CallDispatcher>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Outreach Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (OUTREACH_API_PSK). Authentication is disabled!");
    }
    if config.llm.api_key.is_none() {
        tracing::warn!("No OPENAI_API_KEY configured. Calling briefs will use the fallback template");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Initialize search index
    let search = Arc::new(SearchIndex::open(&config.index_path)?);

    tracing::info!("Building search index...");
    let notes = repo.list_context_notes(&ContextNoteQuery::default()).await?;
    search.rebuild(&notes).await?;
    tracing::info!("Search index built with {} context notes", notes.len());

    // Outbound clients
    let generator = Arc::new(ContextGenerator::new(Arc::new(OpenAiClient::new(
        &config.llm,
    )?)));
    let dispatcher = Arc::new(CallDispatcher::new(
        Arc::new(HttpVoiceGateway::new(&config.voice)?),
        repo.clone(),
        config.voice.max_concurrent_calls,
    ));

    let state = AppState {
        repo,
        search,
        config: Arc::new(config.clone()),
        generator,
        dispatcher,
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Context notes
        .route(
            "/context-notes",
            get(api::list_context_notes).post(api::create_context_note),
        )
        .route("/context-notes/search", get(api::search_context_notes))
        .route("/context-notes/categories", get(api::list_note_categories))
        .route(
            "/context-notes/{id}",
            get(api::get_context_note)
                .put(api::update_context_note)
                .delete(api::delete_context_note),
        )
        // Field configurations
        .route("/fields", get(api::list_fields).post(api::create_field))
        .route("/fields/types", get(api::list_field_types))
        .route("/fields/reorder", post(api::reorder_fields))
        .route("/fields/schema/dynamic-form", get(api::dynamic_form_schema))
        .route(
            "/fields/{id}",
            get(api::get_field)
                .put(api::update_field)
                .delete(api::delete_field),
        )
        // Students
        .route("/students", get(api::list_students).post(api::create_student))
        .route(
            "/students/{id}",
            get(api::get_student)
                .put(api::update_student)
                .delete(api::delete_student),
        )
        // Campaigns
        .route(
            "/campaigns",
            get(api::list_campaigns).post(api::create_campaign),
        )
        .route("/campaigns/preview-context", post(api::preview_context))
        .route(
            "/campaigns/{id}",
            get(api::get_campaign)
                .put(api::update_campaign)
                .delete(api::delete_campaign),
        )
        .route("/campaigns/{id}/contexts", get(api::get_campaign_contexts))
        .route(
            "/campaigns/{id}/contexts/{student_id}",
            put(api::update_student_context),
        )
        .route("/campaigns/{id}/regenerate", post(api::regenerate_contexts))
        .route("/campaigns/{id}/activate", post(api::activate_campaign))
        .route("/campaigns/{id}/pause", post(api::pause_campaign))
        // Calls
        .route("/calls", get(api::list_call_logs))
        .route("/calls/trigger", post(api::trigger_call))
        .route("/calls/{id}", get(api::get_call_log))
        // Analytics
        .route("/analytics/summary", get(api::analytics_summary))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // The voice gateway cannot send our API key
    let webhook_routes =
        Router::new().route("/webhooks/call-events", post(api::handle_call_event));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes.merge(webhook_routes))
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
