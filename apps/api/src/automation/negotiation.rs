//! Negotiation Controller — decides whether an attempt may proceed, and
//! merges caller-supplied answers back into the profile on resumption.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::automation::classifier::{classify, normalize_question, Classification};
use crate::automation::heuristics::HeuristicTables;
use crate::automation::models::{MissingFieldDescriptor, ResolutionOutcome, WidgetKind};
use crate::automation::profile_fields::fill_category;
use crate::models::profile::{AnswerType, ExtraQaEntry, Profile};

#[derive(Debug, Clone, PartialEq)]
pub enum Negotiation {
    Proceed,
    Halt(Vec<MissingFieldDescriptor>),
}

/// Collects every required, unresolved field of the whole pass.
///
/// Unlabelled fields and file uploads can't be answered in text and are
/// never turned into descriptors.
pub fn negotiate(outcomes: &[ResolutionOutcome]) -> Negotiation {
    let mut seen = HashSet::new();
    let mut descriptors = Vec::new();

    for outcome in outcomes.iter().filter(|o| o.is_unresolved() && o.field.required) {
        let field = &outcome.field;
        if !field.current_value.is_empty() {
            continue;
        }
        if field.widget_kind == WidgetKind::FileUpload {
            warn!("Required upload '{}' cannot be negotiated", field.inferred_question);
            continue;
        }
        let key = normalize_question(&field.inferred_question);
        if key.is_empty() {
            warn!("Required field {} has no question; skipped", field.id);
            continue;
        }
        if !seen.insert(key) {
            continue;
        }
        descriptors.push(MissingFieldDescriptor {
            question: field.inferred_question.clone(),
            answer_type: if field.options.is_empty() {
                AnswerType::Text
            } else {
                AnswerType::SingleChoice
            },
            options: field.options.clone(),
            required: true,
        });
    }

    if descriptors.is_empty() {
        Negotiation::Proceed
    } else {
        Negotiation::Halt(descriptors)
    }
}

/// An answer as supplied on resumption: bare text, or echoed back with the
/// descriptor's type information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SuppliedAnswer {
    Plain(String),
    Typed {
        answer: String,
        #[serde(default)]
        answer_type: AnswerType,
        #[serde(default)]
        options: Vec<String>,
    },
}

impl SuppliedAnswer {
    pub fn answer(&self) -> &str {
        match self {
            SuppliedAnswer::Plain(answer) => answer,
            SuppliedAnswer::Typed { answer, .. } => answer,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub structured: Vec<String>,
    pub extra_qa: Vec<String>,
    pub skipped: Vec<String>,
}

/// Merges answers into the profile.
///
/// A question that classifies to a category whose structured field is still
/// empty fills that field (with the canonical value where the vocabulary
/// knows one). Everything else, including declined answers, goes to ExtraQA
/// under the normalized question. Populated structured fields are never
/// overwritten.
pub fn merge_answers(
    profile: &mut Profile,
    answers: &BTreeMap<String, SuppliedAnswer>,
    tables: &HeuristicTables,
) -> MergeReport {
    let mut report = MergeReport::default();

    for (question, supplied) in answers {
        let key = normalize_question(question);
        let answer = supplied.answer().trim();
        if key.is_empty() || answer.is_empty() {
            report.skipped.push(question.clone());
            continue;
        }

        if let Classification::Matched { category, .. } = classify(question, tables) {
            if !tables.is_sentinel(answer) {
                let canonical = tables
                    .to_canonical(category, answer)
                    .unwrap_or_else(|| answer.to_string());
                if fill_category(profile, category, &canonical) {
                    debug!("'{}' stored as {:?}", question, category);
                    report.structured.push(question.clone());
                    continue;
                }
            }
        }

        let (field_type, options) = match supplied {
            SuppliedAnswer::Plain(_) => (AnswerType::Text, None),
            SuppliedAnswer::Typed {
                answer_type,
                options,
                ..
            } => (*answer_type, (!options.is_empty()).then(|| options.clone())),
        };
        profile.extra_qa.insert(
            key,
            ExtraQaEntry {
                answer: answer.to_string(),
                field_type,
                options,
            },
        );
        report.extra_qa.push(question.clone());
    }

    info!(
        "Merged answers for user {}: {} structured, {} extra, {} skipped",
        profile.user_id,
        report.structured.len(),
        report.extra_qa.len(),
        report.skipped.len()
    );
    report
}
