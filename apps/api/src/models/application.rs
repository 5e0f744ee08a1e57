use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// One row per job application, updated after every attempt on it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobApplicationRow {
    pub id: Uuid,
    pub application_code: String,
    pub user_id: Uuid,
    pub job_url: String,
    pub resume_ref: Option<String>,
    /// "pending" | "submitted" | "missing_fields" | "validation_failed" |
    /// "submit_control_not_found" | "incomplete_form" | "failed"
    pub status: String,
    pub filled_field_count: i32,
    /// Serialized `Vec<MissingFieldDescriptor>` while the attempt is halted.
    pub missing_fields: Option<Value>,
    pub validation_messages: Vec<String>,
    pub checkpoint_keys: Vec<String>,
    pub error_message: Option<String>,
    pub attempt_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
