//! `job_applications` persistence: one row per application, addressed by its
//! short application code and updated after every attempt.

use anyhow::{bail, Result};
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::automation::models::{AttemptResult, AttemptStatus};
use crate::models::application::JobApplicationRow;

const CODE_ATTEMPTS: usize = 5;

/// 8 uppercase hex characters, e.g. `3FA85F64`.
pub fn generate_application_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

/// Inserts a pending application row, drawing a fresh code on collision.
pub async fn create_application(
    pool: &PgPool,
    user_id: Uuid,
    job_url: &str,
    resume_ref: Option<&str>,
) -> Result<JobApplicationRow> {
    for _ in 0..CODE_ATTEMPTS {
        let code = generate_application_code();
        let row = sqlx::query_as::<_, JobApplicationRow>(
            r#"
            INSERT INTO job_applications (id, application_code, user_id, job_url, resume_ref, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            ON CONFLICT (application_code) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&code)
        .bind(user_id)
        .bind(job_url)
        .bind(resume_ref)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => {
                info!("[{}] created application for user {}", code, user_id);
                return Ok(row);
            }
            None => warn!("Application code {} already taken, drawing another", code),
        }
    }
    bail!("could not allocate a unique application code after {CODE_ATTEMPTS} tries")
}

pub async fn get_application(pool: &PgPool, code: &str) -> Result<Option<JobApplicationRow>> {
    Ok(sqlx::query_as::<_, JobApplicationRow>(
        "SELECT * FROM job_applications WHERE application_code = $1",
    )
    .bind(code)
    .fetch_optional(pool)
    .await?)
}

/// Stores the outcome of one attempt. Checkpoint keys accumulate across
/// attempts; missing fields and validation messages reflect the latest one.
pub async fn record_outcome(pool: &PgPool, code: &str, result: &AttemptResult) -> Result<JobApplicationRow> {
    let missing_fields = match &result.status {
        AttemptStatus::MissingFields(descriptors) => Some(Json(descriptors)),
        _ => None,
    };
    let validation_messages: &[String] = match &result.status {
        AttemptStatus::ValidationFailed(messages) => messages,
        _ => &[],
    };
    let checkpoint_keys: Vec<&str> = result
        .checkpoint_artifacts
        .iter()
        .map(|a| a.0.as_str())
        .collect();

    let row = sqlx::query_as::<_, JobApplicationRow>(
        r#"
        UPDATE job_applications SET
            status = $2,
            filled_field_count = $3,
            missing_fields = $4,
            validation_messages = $5,
            checkpoint_keys = checkpoint_keys || $6,
            error_message = NULL,
            attempt_count = attempt_count + 1,
            updated_at = NOW()
        WHERE application_code = $1
        RETURNING *
        "#,
    )
    .bind(code)
    .bind(result.status.label())
    .bind(result.filled_field_count as i32)
    .bind(missing_fields)
    .bind(validation_messages)
    .bind(&checkpoint_keys)
    .fetch_one(pool)
    .await?;

    info!("[{}] recorded status {}", code, row.status);
    Ok(row)
}

/// Marks an attempt that ended in a fatal automation error.
pub async fn record_failure(pool: &PgPool, code: &str, message: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE job_applications SET
            status = 'failed',
            error_message = $2,
            attempt_count = attempt_count + 1,
            updated_at = NOW()
        WHERE application_code = $1
        "#,
    )
    .bind(code)
    .bind(message)
    .execute(pool)
    .await?;

    warn!("[{}] recorded failure: {}", code, message);
    Ok(())
}
