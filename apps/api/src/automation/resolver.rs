//! Field Resolver — answers a `CandidateField` from the profile.
//!
//! Lookup order, first hit wins:
//!   1. ExtraQA, by exact normalized question
//!   2. category classification → structured profile field (vocabulary-mapped)
//!   3. explicit default, non-demographic categories only
//!   4. unresolved
//!
//! Resolution is a pure function of (field, profile, tables).

use std::path::Path;

use tracing::debug;

use crate::automation::classifier::{classify, normalize_question, Classification};
use crate::automation::heuristics::{Category, DefaultAnswer, HeuristicTables};
use crate::automation::models::{CandidateField, ResolutionOutcome, ResolutionSource, WidgetKind};
use crate::automation::profile_fields::category_value;
use crate::models::profile::Profile;

pub struct FieldResolver<'a> {
    tables: &'a HeuristicTables,
    default_country: &'a str,
    resume_path: Option<&'a Path>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(
        tables: &'a HeuristicTables,
        default_country: &'a str,
        resume_path: Option<&'a Path>,
    ) -> Self {
        Self {
            tables,
            default_country,
            resume_path,
        }
    }

    pub fn resolve_all(&self, fields: &[CandidateField], profile: &Profile) -> Vec<ResolutionOutcome> {
        fields.iter().map(|f| self.resolve(f, profile)).collect()
    }

    pub fn resolve(&self, field: &CandidateField, profile: &Profile) -> ResolutionOutcome {
        if !field.current_value.is_empty() {
            return ResolutionOutcome {
                field: field.clone(),
                value: Some(field.current_value.clone()),
                source: ResolutionSource::Existing,
            };
        }

        if field.widget_kind == WidgetKind::FileUpload {
            return match self.resume_path {
                Some(path) if self.tables.is_resume_question(&field.inferred_question) => {
                    ResolutionOutcome {
                        field: field.clone(),
                        value: Some(path.to_string_lossy().to_string()),
                        source: ResolutionSource::Attachment,
                    }
                }
                _ => ResolutionOutcome::unresolved(field.clone()),
            };
        }

        let normalized = normalize_question(&field.inferred_question);
        if normalized.is_empty() {
            return ResolutionOutcome::unresolved(field.clone());
        }

        let Some((answer, source)) = self.lookup(&normalized, field, profile) else {
            return ResolutionOutcome::unresolved(field.clone());
        };

        match self.fit_to_field(&answer, field) {
            Some(value) => ResolutionOutcome {
                field: field.clone(),
                value: Some(value),
                source,
            },
            None => {
                debug!(
                    "Answer '{}' matches no option of '{}'",
                    answer, field.inferred_question
                );
                ResolutionOutcome::unresolved(field.clone())
            }
        }
    }

    fn lookup(
        &self,
        normalized: &str,
        field: &CandidateField,
        profile: &Profile,
    ) -> Option<(String, ResolutionSource)> {
        if let Some(entry) = profile.extra_qa.get(normalized) {
            if !entry.answer.trim().is_empty() {
                return Some((entry.answer.trim().to_string(), ResolutionSource::ExtraQa));
            }
        }

        let category = match classify(normalized, self.tables) {
            Classification::Matched { category, .. } => category,
            Classification::Unclassified => return None,
        };

        if let Some(value) = category_value(profile, category) {
            if self.tables.is_sentinel(&value) {
                // Declined in the profile: only the form's own decline wording will do.
                return self
                    .decline_option(&value, &field.options)
                    .map(|option| (option, ResolutionSource::ProfileField));
            }
            return Some((
                self.tables.to_form_answer(category, &value),
                ResolutionSource::ProfileField,
            ));
        }

        self.default_for(category)
            .map(|answer| (answer, ResolutionSource::Default))
    }

    fn decline_option(&self, value: &str, options: &[String]) -> Option<String> {
        if options.is_empty() {
            return None;
        }
        std::iter::once(value)
            .chain(self.tables.sentinels.iter().map(String::as_str))
            .find_map(|wording| match_option(wording, options, self.tables))
    }

    fn default_for(&self, category: Category) -> Option<String> {
        if category.is_demographic() {
            return None;
        }
        match self.tables.defaults.get(&category)? {
            DefaultAnswer::Literal(answer) => Some(answer.clone()),
            DefaultAnswer::ConfiguredCountry => Some(self.default_country.to_string()),
        }
    }

    /// Maps an answer onto the field's options; free-text fields take it as is.
    fn fit_to_field(&self, answer: &str, field: &CandidateField) -> Option<String> {
        if field.options.is_empty() {
            return Some(answer.to_string());
        }
        // Radio groups fall through: one option, like a select.
        if field.widget_kind == WidgetKind::CheckboxGroup {
            let mut chosen = Vec::new();
            for part in answer.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                chosen.push(match_option(part, &field.options, self.tables)?);
            }
            return (!chosen.is_empty()).then(|| chosen.join("; "));
        }
        match_option(answer, &field.options, self.tables)
    }
}

/// Picks the option an answer refers to: exact (case-insensitive) →
/// spelling variation → option starting with the answer → option containing
/// the answer. All comparisons are on normalized text.
pub fn match_option(answer: &str, options: &[String], tables: &HeuristicTables) -> Option<String> {
    let wanted = normalize_question(answer);
    if wanted.is_empty() {
        return None;
    }
    let candidates: Vec<(&String, String)> = options
        .iter()
        .filter(|o| !tables.is_placeholder(o))
        .map(|o| (o, normalize_question(o)))
        .collect();

    if let Some((o, _)) = candidates.iter().find(|(_, n)| *n == wanted) {
        return Some((*o).clone());
    }

    let spellings: Vec<String> = tables
        .spellings_of(answer)
        .iter()
        .map(|s| normalize_question(s))
        .collect();
    if let Some((o, _)) = candidates.iter().find(|(_, n)| spellings.contains(n)) {
        return Some((*o).clone());
    }

    let prefix = format!("{wanted} ");
    if let Some((o, _)) = candidates.iter().find(|(_, n)| n.starts_with(&prefix)) {
        return Some((*o).clone());
    }

    // Short answers like "no" would hit too many unrelated options.
    if wanted.len() >= 3 {
        let needle = format!(" {wanted} ");
        if let Some((o, _)) = candidates
            .iter()
            .find(|(_, n)| format!(" {n} ").contains(&needle))
        {
            return Some((*o).clone());
        }
    }
    None
}
