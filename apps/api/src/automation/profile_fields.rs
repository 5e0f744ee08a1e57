//! Category ↔ structured profile field mapping, used both when reading
//! answers (resolver) and when merging new ones back (negotiation).

use crate::automation::heuristics::Category;
use crate::models::profile::Profile;

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn yes_no(flag: Option<bool>) -> Option<String> {
    flag.map(|f| if f { "yes" } else { "no" }.to_string())
}

/// Canonical profile value for a category, if the profile has one.
///
/// First/last name and location are derived from other fields; prior
/// employment has no structured home at all.
pub fn category_value(profile: &Profile, category: Category) -> Option<String> {
    match category {
        Category::FullName => non_empty(&profile.full_name),
        Category::FirstName => non_empty(&profile.full_name)
            .and_then(|n| n.split_whitespace().next().map(String::from)),
        Category::LastName => non_empty(&profile.full_name).and_then(|n| {
            let mut parts = n.split_whitespace();
            parts.next();
            let rest = parts.collect::<Vec<_>>().join(" ");
            (!rest.is_empty()).then_some(rest)
        }),
        Category::Email => non_empty(&profile.email),
        Category::Phone => non_empty(&profile.phone),
        Category::Address => non_empty(&profile.address),
        Category::City => non_empty(&profile.city),
        Category::State => non_empty(&profile.state),
        Category::PostalCode => non_empty(&profile.postal_code),
        Category::Country => non_empty(&profile.country),
        Category::Location => {
            let parts: Vec<String> = [&profile.city, &profile.state, &profile.country]
                .into_iter()
                .filter_map(non_empty)
                .collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Category::LinkedIn => non_empty(&profile.linkedin_url),
        Category::Portfolio => non_empty(&profile.portfolio_url),
        Category::WorkAuthorization => non_empty(&profile.work_authorization),
        Category::Sponsorship => yes_no(profile.requires_sponsorship),
        Category::RemotePreference => non_empty(&profile.remote_preference),
        Category::Relocation => yes_no(profile.willing_to_relocate),
        Category::PriorEmployment => None,
        Category::StartDate => non_empty(&profile.available_start_date),
        Category::SalaryExpectation => non_empty(&profile.salary_expectation),
        Category::YearsOfExperience => profile.years_of_experience.map(|y| y.to_string()),
        Category::EducationDegree => non_empty(&profile.highest_degree),
        Category::EducationInstitution => non_empty(&profile.institution),
        Category::EducationField => non_empty(&profile.field_of_study),
        Category::GraduationYear => profile.graduation_year.map(|y| y.to_string()),
        Category::Gender => non_empty(&profile.gender),
        Category::Ethnicity => non_empty(&profile.ethnicity),
        Category::Veteran => non_empty(&profile.veteran_status),
        Category::Disability => non_empty(&profile.disability_status),
        Category::SexualOrientation => non_empty(&profile.sexual_orientation),
        Category::Transgender => non_empty(&profile.transgender_status),
    }
}

fn fill_text(slot: &mut Option<String>, value: &str) -> bool {
    if non_empty(slot).is_some() {
        return false;
    }
    *slot = Some(value.trim().to_string());
    true
}

fn fill_flag(slot: &mut Option<bool>, value: &str) -> bool {
    if slot.is_some() {
        return false;
    }
    let parsed = match value.trim().to_lowercase().as_str() {
        "yes" | "true" | "y" => true,
        "no" | "false" | "n" => false,
        _ => return false,
    };
    *slot = Some(parsed);
    true
}

fn fill_number(slot: &mut Option<i32>, value: &str) -> bool {
    if slot.is_some() {
        return false;
    }
    match value.trim().parse::<i32>() {
        Ok(n) => {
            *slot = Some(n);
            true
        }
        Err(_) => false,
    }
}

/// Writes `value` into the category's structured field if that field is
/// still empty. Returns whether anything was written; populated fields are
/// never overwritten.
pub fn fill_category(profile: &mut Profile, category: Category, value: &str) -> bool {
    if value.trim().is_empty() {
        return false;
    }
    match category {
        Category::FullName => fill_text(&mut profile.full_name, value),
        Category::Email => fill_text(&mut profile.email, value),
        Category::Phone => fill_text(&mut profile.phone, value),
        Category::Address => fill_text(&mut profile.address, value),
        Category::City => fill_text(&mut profile.city, value),
        Category::State => fill_text(&mut profile.state, value),
        Category::PostalCode => fill_text(&mut profile.postal_code, value),
        Category::Country => fill_text(&mut profile.country, value),
        Category::LinkedIn => fill_text(&mut profile.linkedin_url, value),
        Category::Portfolio => fill_text(&mut profile.portfolio_url, value),
        Category::WorkAuthorization => fill_text(&mut profile.work_authorization, value),
        Category::Sponsorship => fill_flag(&mut profile.requires_sponsorship, value),
        Category::RemotePreference => fill_text(&mut profile.remote_preference, value),
        Category::Relocation => fill_flag(&mut profile.willing_to_relocate, value),
        Category::StartDate => fill_text(&mut profile.available_start_date, value),
        Category::SalaryExpectation => fill_text(&mut profile.salary_expectation, value),
        Category::YearsOfExperience => fill_number(&mut profile.years_of_experience, value),
        Category::EducationDegree => fill_text(&mut profile.highest_degree, value),
        Category::EducationInstitution => fill_text(&mut profile.institution, value),
        Category::EducationField => fill_text(&mut profile.field_of_study, value),
        Category::GraduationYear => fill_number(&mut profile.graduation_year, value),
        Category::Gender => fill_text(&mut profile.gender, value),
        Category::Ethnicity => fill_text(&mut profile.ethnicity, value),
        Category::Veteran => fill_text(&mut profile.veteran_status, value),
        Category::Disability => fill_text(&mut profile.disability_status, value),
        Category::SexualOrientation => fill_text(&mut profile.sexual_orientation, value),
        Category::Transgender => fill_text(&mut profile.transgender_status, value),
        // Derived or unstored; these answers live in ExtraQA.
        Category::FirstName | Category::LastName | Category::Location | Category::PriorEmployment => {
            false
        }
    }
}
