use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How an answer stored in `ExtraQA` was asked for on the form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    #[default]
    Text,
    SingleChoice,
}

/// A single remembered answer to a free-form application question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraQaEntry {
    pub answer: String,
    #[serde(default)]
    pub field_type: AnswerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// Question → answer store keyed by normalized question text.
pub type ExtraQa = BTreeMap<String, ExtraQaEntry>;

/// The applicant profile used as the source of truth for form filling.
///
/// Structured fields are preferred over `extra_qa`; every structured field is
/// optional and `None` means "never answered". Demographic fields may hold a
/// sentinel such as `prefer_not_to_say`, which is distinct from `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: Uuid,

    // Identity / contact
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub linkedin_url: Option<String>,
    pub portfolio_url: Option<String>,

    // Work eligibility / preferences
    /// "yes" | "no"
    pub work_authorization: Option<String>,
    pub requires_sponsorship: Option<bool>,
    /// "yes" | "no" | "hybrid"
    pub remote_preference: Option<String>,
    pub willing_to_relocate: Option<bool>,
    pub available_start_date: Option<String>,
    pub salary_expectation: Option<String>,
    pub years_of_experience: Option<i32>,

    // Education
    pub highest_degree: Option<String>,
    pub institution: Option<String>,
    pub field_of_study: Option<String>,
    pub graduation_year: Option<i32>,

    // Demographics
    pub gender: Option<String>,
    pub ethnicity: Option<String>,
    pub veteran_status: Option<String>,
    pub disability_status: Option<String>,
    pub sexual_orientation: Option<String>,
    pub transgender_status: Option<String>,

    #[serde(default)]
    pub extra_qa: ExtraQa,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    /// Fields and `extra_qa` entries that differ from `before`, everything
    /// else left unset. Cleared fields are not carried.
    pub fn changes_since(&self, before: &Profile) -> Profile {
        let mut delta = Profile::new(self.user_id);
        macro_rules! changed {
            ($($field:ident),+ $(,)?) => {$(
                if self.$field != before.$field {
                    delta.$field = self.$field.clone();
                }
            )+};
        }
        changed!(
            full_name, email, phone, address, city, state, postal_code, country,
            linkedin_url, portfolio_url, work_authorization, requires_sponsorship,
            remote_preference, willing_to_relocate, available_start_date, salary_expectation,
            years_of_experience, highest_degree, institution, field_of_study, graduation_year,
            gender, ethnicity, veteran_status, disability_status, sexual_orientation,
            transgender_status,
        );
        delta.extra_qa = self
            .extra_qa
            .iter()
            .filter(|(question, entry)| before.extra_qa.get(*question) != Some(*entry))
            .map(|(question, entry)| (question.clone(), entry.clone()))
            .collect();
        delta
    }

    /// Folds a delta in without overwriting answered fields; `extra_qa`
    /// entries from the delta win per question.
    pub fn absorb(&mut self, delta: &Profile) {
        macro_rules! fill_text {
            ($($field:ident),+ $(,)?) => {$(
                if self.$field.as_deref().map_or(true, str::is_empty) {
                    self.$field = delta.$field.clone();
                }
            )+};
        }
        macro_rules! fill {
            ($($field:ident),+ $(,)?) => {$(
                if self.$field.is_none() {
                    self.$field = delta.$field;
                }
            )+};
        }
        fill_text!(
            full_name, email, phone, address, city, state, postal_code, country,
            linkedin_url, portfolio_url, work_authorization, remote_preference,
            available_start_date, salary_expectation, highest_degree, institution,
            field_of_study, gender, ethnicity, veteran_status, disability_status,
            sexual_orientation, transgender_status,
        );
        fill!(requires_sponsorship, willing_to_relocate, years_of_experience, graduation_year);
        self.extra_qa
            .extend(delta.extra_qa.iter().map(|(q, e)| (q.clone(), e.clone())));
    }
}
