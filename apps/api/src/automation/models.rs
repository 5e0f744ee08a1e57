use serde::{Deserialize, Serialize};

use crate::driver::{ContainerPath, ElementHandle};
use crate::models::profile::AnswerType;

// ────────────────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    Text,
    NativeSelect,
    CustomSelect,
    Combobox,
    CheckboxGroup,
    /// Same-name radios asking one question; exactly one member gets clicked.
    RadioGroup,
    FileUpload,
}

/// A discovered form control plus its inferred question.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateField {
    /// `"{container}:{handle}"`, stable within one scan.
    pub id: String,
    pub inferred_question: String,
    pub widget_kind: WidgetKind,
    pub required: bool,
    pub current_value: String,
    pub container_path: ContainerPath,
    pub handle: ElementHandle,
    /// Visible choices, placeholders excluded. Empty for free-text controls.
    pub options: Vec<String>,
    /// Checkbox and radio groups keep one handle per member, aligned with `options`.
    pub members: Vec<ElementHandle>,
}

// ────────────────────────────────────────────────────────────────────────────
// Resolution
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    ProfileField,
    ExtraQa,
    Default,
    /// Control already carries a real value; left alone.
    Existing,
    /// Résumé upload from the fetched artifact.
    Attachment,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionOutcome {
    pub field: CandidateField,
    pub value: Option<String>,
    pub source: ResolutionSource,
}

impl ResolutionOutcome {
    pub fn unresolved(field: CandidateField) -> Self {
        Self {
            field,
            value: None,
            source: ResolutionSource::Unresolved,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.source == ResolutionSource::Unresolved
    }

    /// Outcomes the Filling state has to apply to the page.
    pub fn needs_fill(&self) -> bool {
        self.value.is_some()
            && !matches!(
                self.source,
                ResolutionSource::Existing | ResolutionSource::Unresolved
            )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Negotiation / results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingFieldDescriptor {
    pub question: String,
    pub answer_type: AnswerType,
    pub options: Vec<String>,
    pub required: bool,
}

/// Storage key of a checkpoint screenshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(pub String);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "details", rename_all = "snake_case")]
pub enum AttemptStatus {
    Submitted,
    MissingFields(Vec<MissingFieldDescriptor>),
    ValidationFailed(Vec<String>),
    SubmitControlNotFound,
    IncompleteForm,
}

impl AttemptStatus {
    /// Value stored in `job_applications.status`.
    pub fn label(&self) -> &'static str {
        match self {
            AttemptStatus::Submitted => "submitted",
            AttemptStatus::MissingFields(_) => "missing_fields",
            AttemptStatus::ValidationFailed(_) => "validation_failed",
            AttemptStatus::SubmitControlNotFound => "submit_control_not_found",
            AttemptStatus::IncompleteForm => "incomplete_form",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    #[serde(flatten)]
    pub status: AttemptStatus,
    pub filled_field_count: u32,
    pub checkpoint_artifacts: Vec<ArtifactRef>,
}

/// States of one pass through the Submission State Machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Filling,
    AwaitingMissingFields,
    Submitting,
    Verifying,
    Submitted,
    ValidationFailed,
    SubmitControlNotFound,
}

impl SubmissionState {
    /// States that capture a checkpoint on entry.
    pub fn captures_checkpoint(self) -> bool {
        matches!(
            self,
            SubmissionState::AwaitingMissingFields
                | SubmissionState::Submitted
                | SubmissionState::ValidationFailed
                | SubmissionState::SubmitControlNotFound
        )
    }
}

impl std::fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SubmissionState::Filling => "filling",
            SubmissionState::AwaitingMissingFields => "awaiting_missing_fields",
            SubmissionState::Submitting => "submitting",
            SubmissionState::Verifying => "verifying",
            SubmissionState::Submitted => "submitted",
            SubmissionState::ValidationFailed => "validation_failed",
            SubmissionState::SubmitControlNotFound => "submit_control_not_found",
        };
        f.write_str(name)
    }
}
