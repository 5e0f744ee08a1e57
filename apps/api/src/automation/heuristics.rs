//! Heuristic tables — every keyword list, answer vocabulary and default the
//! form pipeline relies on, kept as plain data.
//!
//! `HeuristicTables::default()` carries the built-in tables. A JSON file with
//! the same shape can replace them at startup (`HEURISTICS_PATH`), so new
//! wording seen in the wild is a data change, not a code change.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::automation::classifier::normalize_question;

/// Semantic category a form question can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    FullName,
    FirstName,
    LastName,
    Email,
    Phone,
    Location,
    Country,
    City,
    State,
    PostalCode,
    Address,
    LinkedIn,
    Portfolio,
    WorkAuthorization,
    Sponsorship,
    RemotePreference,
    Relocation,
    PriorEmployment,
    StartDate,
    SalaryExpectation,
    YearsOfExperience,
    EducationDegree,
    EducationInstitution,
    EducationField,
    GraduationYear,
    Gender,
    Ethnicity,
    Veteran,
    Disability,
    SexualOrientation,
    Transgender,
}

impl Category {
    /// Identity / demographic categories are never answered by default.
    pub fn is_demographic(self) -> bool {
        matches!(
            self,
            Category::Gender
                | Category::Ethnicity
                | Category::Veteran
                | Category::Disability
                | Category::SexualOrientation
                | Category::Transgender
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub phrase: String,
    /// Only matches when the whole normalized question equals the phrase.
    #[serde(default)]
    pub whole_question: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: Category,
    pub keywords: Vec<KeywordRule>,
}

/// Canonical profile value → the wording forms usually offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub canonical: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DefaultAnswer {
    Literal(String),
    /// The deployment's configured country (`DEFAULT_COUNTRY`).
    ConfiguredCountry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicTables {
    pub categories: Vec<CategoryRule>,
    pub vocabulary: HashMap<Category, Vec<VocabularyEntry>>,
    pub defaults: HashMap<Category, DefaultAnswer>,
    /// Values meaning "explicitly declined to answer".
    pub sentinels: Vec<String>,
    /// Texts a control shows while nothing is chosen.
    pub placeholders: Vec<String>,
    /// Groups of interchangeable option spellings.
    pub synonyms: Vec<Vec<String>>,
    pub apply_labels: Vec<String>,
    pub submit_labels: Vec<String>,
    pub success_indicators: Vec<String>,
    pub success_url_keywords: Vec<String>,
    pub resume_keywords: Vec<String>,
    /// Clickable placeholders taller than this are wrappers, not widgets.
    pub container_threshold_px: f64,
}

impl HeuristicTables {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read heuristics file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid heuristics file {}", path.display()))
    }

    pub fn is_placeholder(&self, text: &str) -> bool {
        let n = normalize_question(text);
        n.is_empty() || self.placeholders.iter().any(|p| normalize_question(p) == n)
    }

    pub fn is_sentinel(&self, value: &str) -> bool {
        let n = normalize_question(value);
        self.sentinels.iter().any(|s| normalize_question(s) == n)
    }

    /// Maps a canonical profile value to form wording; unknown values pass through.
    pub fn to_form_answer(&self, category: Category, canonical: &str) -> String {
        let n = normalize_question(canonical);
        self.vocabulary
            .get(&category)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|e| normalize_question(&e.canonical) == n)
            })
            .map(|e| e.answer.clone())
            .unwrap_or_else(|| canonical.trim().to_string())
    }

    /// Reverse of `to_form_answer`: form wording back to the canonical value.
    pub fn to_canonical(&self, category: Category, answer: &str) -> Option<String> {
        let n = normalize_question(answer);
        self.vocabulary.get(&category).and_then(|entries| {
            entries
                .iter()
                .find(|e| normalize_question(&e.answer) == n || normalize_question(&e.canonical) == n)
                .map(|e| e.canonical.clone())
        })
    }

    /// All spellings interchangeable with `answer`, including itself.
    pub fn spellings_of(&self, answer: &str) -> Vec<String> {
        let n = normalize_question(answer);
        let mut out = vec![answer.to_string()];
        for group in &self.synonyms {
            if group.iter().any(|s| normalize_question(s) == n) {
                out.extend(group.iter().cloned());
            }
        }
        out
    }

    pub fn is_resume_question(&self, question: &str) -> bool {
        let padded = format!(" {} ", normalize_question(question));
        self.resume_keywords
            .iter()
            .any(|k| padded.contains(&format!(" {} ", normalize_question(k))))
    }
}

impl Default for HeuristicTables {
    fn default() -> Self {
        Self {
            categories: standard_categories(),
            vocabulary: standard_vocabulary(),
            defaults: HashMap::from([
                (Category::Country, DefaultAnswer::ConfiguredCountry),
                (Category::WorkAuthorization, DefaultAnswer::Literal("Yes".into())),
                (Category::Sponsorship, DefaultAnswer::Literal("No".into())),
                (Category::RemotePreference, DefaultAnswer::Literal("Yes".into())),
                (Category::StartDate, DefaultAnswer::Literal("Immediately".into())),
            ]),
            sentinels: strings(&[
                "prefer_not_to_say",
                "prefer not to answer",
                "prefer not to disclose",
                "i prefer not to say",
                "decline",
                "decline to answer",
                "decline to self identify",
                "i don't wish to answer",
            ]),
            placeholders: strings(&[
                "Select...",
                "Select one",
                "Please select",
                "Choose...",
                "Choose one",
                "Select an option",
                "--",
            ]),
            synonyms: vec![
                strings(&["United States", "United States of America", "US", "USA", "U.S."]),
                strings(&["United Kingdom", "UK", "Great Britain"]),
                strings(&["Man", "Male"]),
                strings(&["Woman", "Female"]),
                strings(&["Heterosexual or straight", "Straight", "Heterosexual", "Heterosexual/Straight"]),
                strings(&["No", "No, I am not", "I am not a protected veteran"]),
                strings(&[
                    "Prefer not to answer",
                    "Prefer not to say",
                    "Prefer not to disclose",
                    "I prefer not to answer",
                    "I don't wish to answer",
                    "Decline to self-identify",
                    "Decline to answer",
                ]),
            ],
            apply_labels: strings(&["Apply for this job", "Apply Now", "Apply now", "Apply"]),
            submit_labels: strings(&[
                "Submit Application",
                "Submit application",
                "Send Application",
                "Submit",
                "Apply",
            ]),
            success_indicators: strings(&[
                "Thank you for applying",
                "Thank you for your application",
                "Thanks for applying",
                "Application submitted",
                "application has been submitted",
                "Application received",
                "We have received your application",
                "Your application is now complete",
                "Successfully submitted",
                "You're all set",
            ]),
            success_url_keywords: strings(&["thank", "confirmation", "success", "submitted"]),
            resume_keywords: strings(&["resume", "résumé", "cv", "curriculum vitae"]),
            container_threshold_px: 100.0,
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn rule(category: Category, phrases: &[&str]) -> CategoryRule {
    CategoryRule {
        category,
        keywords: phrases
            .iter()
            .map(|p| match p.strip_prefix('=') {
                Some(whole) => KeywordRule {
                    phrase: whole.to_string(),
                    whole_question: true,
                },
                None => KeywordRule {
                    phrase: p.to_string(),
                    whole_question: false,
                },
            })
            .collect(),
    }
}

/// Keyword phrases per category. A leading `=` marks a whole-question match.
fn standard_categories() -> Vec<CategoryRule> {
    use Category::*;
    vec![
        rule(Transgender, &["transgender"]),
        rule(SexualOrientation, &["sexual orientation", "lgbtq"]),
        rule(Gender, &["gender", "gender identity", "=sex"]),
        rule(Ethnicity, &["race", "racial", "ethnicity", "ethnic", "hispanic or latino"]),
        rule(Veteran, &["veteran", "protected veteran", "military service"]),
        rule(Disability, &["disability", "disabled", "chronic condition"]),
        rule(
            WorkAuthorization,
            &[
                "authorized to work",
                "authorised to work",
                "work authorization",
                "legally authorized",
                "eligible to work",
                "right to work",
            ],
        ),
        rule(Sponsorship, &["sponsor", "sponsorship", "visa sponsorship", "require sponsorship"]),
        rule(RemotePreference, &["remote", "remotely", "work remotely", "hybrid"]),
        rule(Relocation, &["relocate", "relocation"]),
        rule(
            PriorEmployment,
            &[
                "previously employed",
                "ever been employed",
                "previously worked",
                "worked at",
                "worked for",
                "former employee",
            ],
        ),
        rule(
            EducationDegree,
            &["degree", "level of education", "education level", "highest level of education"],
        ),
        rule(EducationInstitution, &["school", "university", "college", "institution"]),
        rule(EducationField, &["major", "discipline", "field of study", "area of study"]),
        rule(
            GraduationYear,
            &["graduated", "graduation year", "graduation date", "year of graduation"],
        ),
        rule(FirstName, &["first name", "given name", "preferred first name"]),
        rule(LastName, &["last name", "family name", "surname"]),
        rule(FullName, &["=name", "full name", "legal name", "your name"]),
        rule(Email, &["email", "e mail", "email address"]),
        rule(Phone, &["phone", "mobile", "telephone", "phone number"]),
        rule(
            Location,
            &["location", "current location", "where are you based", "where are you located"],
        ),
        rule(Country, &["country", "country of residence"]),
        rule(City, &["city", "town"]),
        rule(State, &["=state", "province", "state province", "state or province"]),
        rule(PostalCode, &["zip", "zip code", "postal code", "postcode"]),
        rule(Address, &["address", "street address", "mailing address"]),
        rule(LinkedIn, &["linkedin", "linkedin profile", "linkedin url"]),
        rule(Portfolio, &["portfolio", "website", "github", "personal website"]),
        rule(
            StartDate,
            &["start date", "available to start", "earliest start", "when can you start"],
        ),
        rule(SalaryExpectation, &["salary", "compensation", "desired salary", "pay expectations"]),
        rule(YearsOfExperience, &["years of experience", "how many years"]),
    ]
}

fn vocab(pairs: &[(&str, &str)]) -> Vec<VocabularyEntry> {
    pairs
        .iter()
        .map(|(canonical, answer)| VocabularyEntry {
            canonical: canonical.to_string(),
            answer: answer.to_string(),
        })
        .collect()
}

fn standard_vocabulary() -> HashMap<Category, Vec<VocabularyEntry>> {
    let yes_no = vocab(&[("yes", "Yes"), ("no", "No"), ("true", "Yes"), ("false", "No")]);
    HashMap::from([
        (
            Category::Gender,
            vocab(&[
                ("male", "Man"),
                ("man", "Man"),
                ("female", "Woman"),
                ("woman", "Woman"),
                ("non_binary", "Non-binary"),
                ("nonbinary", "Non-binary"),
            ]),
        ),
        (
            Category::Ethnicity,
            vocab(&[
                ("hispanic", "Hispanic or Latino"),
                ("white", "White"),
                ("black", "Black or African American"),
                ("asian", "Asian"),
                ("native_american", "American Indian or Alaska Native"),
                ("pacific_islander", "Native Hawaiian or Other Pacific Islander"),
                ("two_or_more", "Two or More Races"),
            ]),
        ),
        (
            Category::SexualOrientation,
            vocab(&[
                ("heterosexual", "Heterosexual or straight"),
                ("straight", "Heterosexual or straight"),
                ("gay", "Gay or lesbian"),
                ("lesbian", "Gay or lesbian"),
                ("bisexual", "Bisexual"),
                ("queer", "Queer"),
                ("asexual", "Asexual"),
            ]),
        ),
        (Category::Veteran, yes_no.clone()),
        (Category::Disability, yes_no.clone()),
        (Category::Transgender, yes_no.clone()),
        (Category::WorkAuthorization, yes_no.clone()),
        (Category::Sponsorship, yes_no.clone()),
        (Category::Relocation, yes_no.clone()),
        (
            Category::RemotePreference,
            vocab(&[
                ("yes", "Yes"),
                ("remote", "Yes"),
                ("no", "No"),
                ("office", "No"),
                ("hybrid", "Hybrid"),
            ]),
        ),
        (
            Category::EducationDegree,
            vocab(&[
                ("high_school", "High School"),
                ("associate", "Associate's Degree"),
                ("bachelors", "Bachelor's Degree"),
                ("bachelor", "Bachelor's Degree"),
                ("masters", "Master's Degree"),
                ("master", "Master's Degree"),
                ("phd", "Doctorate"),
                ("doctorate", "Doctorate"),
            ]),
        ),
        (
            Category::StartDate,
            vocab(&[
                ("immediately", "Immediately"),
                ("2_weeks", "2 weeks"),
                ("1_month", "1 month"),
            ]),
        ),
    ])
}
