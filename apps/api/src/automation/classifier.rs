//! Question → category classification.
//!
//! Pure functions over `HeuristicTables`; no driver access.

use crate::automation::heuristics::{Category, HeuristicTables};

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Matched {
        category: Category,
        confidence: f32,
        keyword: String,
    },
    Unclassified,
}

impl Classification {
    pub fn category(&self) -> Option<Category> {
        match self {
            Classification::Matched { category, .. } => Some(*category),
            Classification::Unclassified => None,
        }
    }
}

/// Lowercases, turns punctuation into spaces and collapses whitespace.
///
/// `"Are you authorized to work in the U.S.? *"` becomes
/// `"are you authorized to work in the u s"`.
pub fn normalize_question(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Classifies a question by its longest matching keyword phrase.
///
/// Phrases match on word boundaries, so "city" never matches "ethnicity" and
/// "transgender" outranks "gender". Ties keep table order.
pub fn classify(question: &str, tables: &HeuristicTables) -> Classification {
    let normalized = normalize_question(question);
    if normalized.is_empty() {
        return Classification::Unclassified;
    }
    let padded = format!(" {normalized} ");

    let mut best: Option<(Category, String, bool)> = None;
    for rule in &tables.categories {
        for keyword in &rule.keywords {
            let phrase = normalize_question(&keyword.phrase);
            if phrase.is_empty() {
                continue;
            }
            let hit = if keyword.whole_question {
                normalized == phrase
            } else {
                padded.contains(&format!(" {phrase} "))
            };
            if !hit {
                continue;
            }
            let longer = best
                .as_ref()
                .map(|(_, current, _)| phrase.len() > current.len())
                .unwrap_or(true);
            if longer {
                best = Some((rule.category, phrase, keyword.whole_question));
            }
        }
    }

    match best {
        Some((category, keyword, whole)) => {
            let confidence = if whole {
                1.0
            } else {
                0.5 + 0.5 * (keyword.len() as f32 / normalized.len() as f32)
            };
            Classification::Matched {
                category,
                confidence: confidence.min(1.0),
                keyword,
            }
        }
        None => Classification::Unclassified,
    }
}
