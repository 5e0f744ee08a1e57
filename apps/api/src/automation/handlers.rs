use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::automation::models::{ArtifactRef, AttemptResult};
use crate::automation::negotiation::{MergeReport, SuppliedAnswer};
use crate::automation::records::{
    create_application, get_application, record_failure, record_outcome,
};
use crate::automation::session::{AttemptContext, AutomationError};
use crate::errors::AppError;
use crate::models::application::JobApplicationRow;
use crate::models::profile::Profile;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StartApplicationRequest {
    pub user_id: Uuid,
    pub job_url: String,
    #[serde(default)]
    pub resume_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ContinueApplicationRequest {
    pub user_id: Uuid,
    pub answers: BTreeMap<String, SuppliedAnswer>,
}

#[derive(Debug, Serialize)]
pub struct AttemptResponse {
    pub application_code: String,
    #[serde(flatten)]
    pub result: AttemptResult,
    pub checkpoint_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<MergeReport>,
}

#[derive(Debug, Serialize)]
pub struct ApplicationDetailResponse {
    pub application: JobApplicationRow,
    pub checkpoint_urls: Vec<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/applications
///
/// Creates the application record and runs the first attempt synchronously.
pub async fn handle_start_application(
    State(state): State<AppState>,
    Json(req): Json<StartApplicationRequest>,
) -> Result<Json<AttemptResponse>, AppError> {
    validate_job_url(&req.job_url)?;
    let resume_ref = req
        .resume_ref
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let row = create_application(&state.db, req.user_id, req.job_url.trim(), resume_ref).await?;
    let ctx = AttemptContext {
        user_id: row.user_id,
        job_url: row.job_url.clone(),
        resume_ref: row.resume_ref.clone(),
        application_code: row.application_code.clone(),
    };

    let result = match state.automation.start_attempt(&ctx).await {
        Ok(result) => result,
        Err(e) => {
            let recorded = record_failure(&state.db, &ctx.application_code, &e.to_string()).await;
            return Err(attempt_failure(&ctx.application_code, e, recorded));
        }
    };
    record_outcome(&state.db, &ctx.application_code, &result).await?;

    let checkpoint_urls = presign(&state, &result.checkpoint_artifacts).await?;
    Ok(Json(AttemptResponse {
        application_code: ctx.application_code,
        result,
        checkpoint_urls,
        merged: None,
    }))
}

/// POST /api/v1/applications/:code/continue
///
/// Merges the supplied answers into the caller's profile and re-runs the
/// attempt in a fresh session.
pub async fn handle_continue_application(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(req): Json<ContinueApplicationRequest>,
) -> Result<Json<AttemptResponse>, AppError> {
    let code = code.to_uppercase();
    if req.answers.is_empty() {
        return Err(AppError::Validation("answers cannot be empty".to_string()));
    }

    let row = owned_application(&state, &code, req.user_id).await?;
    if row.status == "submitted" {
        return Err(AppError::UnprocessableEntity(format!(
            "Application {code} has already been submitted"
        )));
    }

    let ctx = AttemptContext {
        user_id: row.user_id,
        job_url: row.job_url,
        resume_ref: row.resume_ref,
        application_code: row.application_code,
    };
    info!(
        "[{}] continuing application (attempt {})",
        ctx.application_code,
        row.attempt_count + 1
    );

    let (result, report) = match state.automation.resume_attempt(&ctx, &req.answers).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let recorded = record_failure(&state.db, &ctx.application_code, &e.to_string()).await;
            return Err(attempt_failure(&ctx.application_code, e, recorded));
        }
    };
    record_outcome(&state.db, &ctx.application_code, &result).await?;

    let checkpoint_urls = presign(&state, &result.checkpoint_artifacts).await?;
    Ok(Json(AttemptResponse {
        application_code: ctx.application_code,
        result,
        checkpoint_urls,
        merged: Some(report),
    }))
}

/// GET /api/v1/applications/:code
pub async fn handle_get_application(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<ApplicationDetailResponse>, AppError> {
    let application = owned_application(&state, &code.to_uppercase(), params.user_id).await?;
    let artifacts: Vec<ArtifactRef> = application
        .checkpoint_keys
        .iter()
        .cloned()
        .map(ArtifactRef)
        .collect();
    let checkpoint_urls = presign(&state, &artifacts).await?;
    Ok(Json(ApplicationDetailResponse {
        application,
        checkpoint_urls,
    }))
}

/// GET /api/v1/profile
pub async fn handle_get_profile(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<Profile>, AppError> {
    let profile = state.automation.profiles().get(params.user_id).await?;
    Ok(Json(profile))
}

/// PUT /api/v1/profile
///
/// Replaces the stored profile wholesale, `extra_qa` included.
pub async fn handle_put_profile(
    State(state): State<AppState>,
    Json(profile): Json<Profile>,
) -> Result<Json<Profile>, AppError> {
    let profiles = state.automation.profiles();
    profiles.save(&profile).await?;
    Ok(Json(profiles.get(profile.user_id).await?))
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

async fn owned_application(
    state: &AppState,
    code: &str,
    user_id: Uuid,
) -> Result<JobApplicationRow, AppError> {
    let row = get_application(&state.db, code)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Application {code} not found")))?;
    if row.user_id != user_id {
        return Err(AppError::Forbidden);
    }
    Ok(row)
}

async fn presign(state: &AppState, artifacts: &[ArtifactRef]) -> Result<Vec<String>, AppError> {
    let storage = state.automation.artifacts();
    let mut urls = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        urls.push(storage.url_for(artifact).await?);
    }
    Ok(urls)
}

/// The attempt's own error is what the caller sees; failing to record it is
/// only logged.
fn attempt_failure(code: &str, e: AutomationError, recorded: anyhow::Result<()>) -> AppError {
    if let Err(db_err) = recorded {
        error!("[{}] could not record failure: {}", code, db_err);
    }
    e.into()
}

fn validate_job_url(job_url: &str) -> Result<(), AppError> {
    let url = job_url.trim();
    if url.is_empty() {
        return Err(AppError::Validation("job_url cannot be empty".to_string()));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(AppError::Validation(
            "job_url must be an http(s) URL".to_string(),
        ));
    }
    Ok(())
}
