//! Profile Store — one applicant profile per user, read before every attempt
//! and written back after a negotiation round.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::models::profile::{ExtraQa, Profile};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Returns the stored profile, or an empty one if the user has none yet.
    async fn get(&self, user_id: Uuid) -> Result<Profile>;

    /// Replaces the stored profile wholesale.
    async fn save(&self, profile: &Profile) -> Result<()>;

    /// Folds `delta` into the stored profile in one atomic step: answered
    /// fields stay, blank ones take the delta's value, and `extra_qa` entries
    /// are added per question. Returns the merged profile.
    async fn merge(&self, delta: &Profile) -> Result<Profile>;
}

#[derive(Debug, FromRow)]
struct ProfileRow {
    user_id: Uuid,
    full_name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
    linkedin_url: Option<String>,
    portfolio_url: Option<String>,
    work_authorization: Option<String>,
    requires_sponsorship: Option<bool>,
    remote_preference: Option<String>,
    willing_to_relocate: Option<bool>,
    available_start_date: Option<String>,
    salary_expectation: Option<String>,
    years_of_experience: Option<i32>,
    highest_degree: Option<String>,
    institution: Option<String>,
    field_of_study: Option<String>,
    graduation_year: Option<i32>,
    gender: Option<String>,
    ethnicity: Option<String>,
    veteran_status: Option<String>,
    disability_status: Option<String>,
    sexual_orientation: Option<String>,
    transgender_status: Option<String>,
    extra_qa: Json<ExtraQa>,
    updated_at: DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            user_id: row.user_id,
            full_name: row.full_name,
            email: row.email,
            phone: row.phone,
            address: row.address,
            city: row.city,
            state: row.state,
            postal_code: row.postal_code,
            country: row.country,
            linkedin_url: row.linkedin_url,
            portfolio_url: row.portfolio_url,
            work_authorization: row.work_authorization,
            requires_sponsorship: row.requires_sponsorship,
            remote_preference: row.remote_preference,
            willing_to_relocate: row.willing_to_relocate,
            available_start_date: row.available_start_date,
            salary_expectation: row.salary_expectation,
            years_of_experience: row.years_of_experience,
            highest_degree: row.highest_degree,
            institution: row.institution,
            field_of_study: row.field_of_study,
            graduation_year: row.graduation_year,
            gender: row.gender,
            ethnicity: row.ethnicity,
            veteran_status: row.veteran_status,
            disability_status: row.disability_status,
            sexual_orientation: row.sexual_orientation,
            transgender_status: row.transgender_status,
            extra_qa: row.extra_qa.0,
            updated_at: Some(row.updated_at),
        }
    }
}

const INSERT_PROFILE: &str = r#"
    INSERT INTO user_job_profiles
        (user_id, full_name, email, phone, address, city, state, postal_code, country,
         linkedin_url, portfolio_url, work_authorization, requires_sponsorship,
         remote_preference, willing_to_relocate, available_start_date, salary_expectation,
         years_of_experience, highest_degree, institution, field_of_study, graduation_year,
         gender, ethnicity, veteran_status, disability_status, sexual_orientation,
         transgender_status, extra_qa, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
            $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, NOW())
"#;

/// Binds `$1..$29` of `INSERT_PROFILE`.
macro_rules! bind_profile {
    ($query:expr, $profile:expr) => {{
        let profile: &Profile = $profile;
        $query
            .bind(profile.user_id)
            .bind(&profile.full_name)
            .bind(&profile.email)
            .bind(&profile.phone)
            .bind(&profile.address)
            .bind(&profile.city)
            .bind(&profile.state)
            .bind(&profile.postal_code)
            .bind(&profile.country)
            .bind(&profile.linkedin_url)
            .bind(&profile.portfolio_url)
            .bind(&profile.work_authorization)
            .bind(profile.requires_sponsorship)
            .bind(&profile.remote_preference)
            .bind(profile.willing_to_relocate)
            .bind(&profile.available_start_date)
            .bind(&profile.salary_expectation)
            .bind(profile.years_of_experience)
            .bind(&profile.highest_degree)
            .bind(&profile.institution)
            .bind(&profile.field_of_study)
            .bind(profile.graduation_year)
            .bind(&profile.gender)
            .bind(&profile.ethnicity)
            .bind(&profile.veteran_status)
            .bind(&profile.disability_status)
            .bind(&profile.sexual_orientation)
            .bind(&profile.transgender_status)
            .bind(Json(&profile.extra_qa))
    }};
}

#[derive(Clone)]
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn get(&self, user_id: Uuid) -> Result<Profile> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM user_job_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Profile::from).unwrap_or_else(|| Profile::new(user_id)))
    }

    /// Upserts the whole profile. Concurrent saves for one user are
    /// last-write-wins, so only the profile endpoint uses this.
    async fn save(&self, profile: &Profile) -> Result<()> {
        let sql = format!(
            r#"
            {INSERT_PROFILE}
            ON CONFLICT (user_id) DO UPDATE SET
                full_name = EXCLUDED.full_name,
                email = EXCLUDED.email,
                phone = EXCLUDED.phone,
                address = EXCLUDED.address,
                city = EXCLUDED.city,
                state = EXCLUDED.state,
                postal_code = EXCLUDED.postal_code,
                country = EXCLUDED.country,
                linkedin_url = EXCLUDED.linkedin_url,
                portfolio_url = EXCLUDED.portfolio_url,
                work_authorization = EXCLUDED.work_authorization,
                requires_sponsorship = EXCLUDED.requires_sponsorship,
                remote_preference = EXCLUDED.remote_preference,
                willing_to_relocate = EXCLUDED.willing_to_relocate,
                available_start_date = EXCLUDED.available_start_date,
                salary_expectation = EXCLUDED.salary_expectation,
                years_of_experience = EXCLUDED.years_of_experience,
                highest_degree = EXCLUDED.highest_degree,
                institution = EXCLUDED.institution,
                field_of_study = EXCLUDED.field_of_study,
                graduation_year = EXCLUDED.graduation_year,
                gender = EXCLUDED.gender,
                ethnicity = EXCLUDED.ethnicity,
                veteran_status = EXCLUDED.veteran_status,
                disability_status = EXCLUDED.disability_status,
                sexual_orientation = EXCLUDED.sexual_orientation,
                transgender_status = EXCLUDED.transgender_status,
                extra_qa = EXCLUDED.extra_qa,
                updated_at = NOW()
            "#
        );
        bind_profile!(sqlx::query(&sql), profile)
            .execute(&self.pool)
            .await?;

        info!("Saved profile for user {}", profile.user_id);
        Ok(())
    }

    async fn merge(&self, delta: &Profile) -> Result<Profile> {
        let sql = format!(
            r#"
            {INSERT_PROFILE}
            ON CONFLICT (user_id) DO UPDATE SET
                full_name = COALESCE(NULLIF(user_job_profiles.full_name, ''), EXCLUDED.full_name),
                email = COALESCE(NULLIF(user_job_profiles.email, ''), EXCLUDED.email),
                phone = COALESCE(NULLIF(user_job_profiles.phone, ''), EXCLUDED.phone),
                address = COALESCE(NULLIF(user_job_profiles.address, ''), EXCLUDED.address),
                city = COALESCE(NULLIF(user_job_profiles.city, ''), EXCLUDED.city),
                state = COALESCE(NULLIF(user_job_profiles.state, ''), EXCLUDED.state),
                postal_code = COALESCE(NULLIF(user_job_profiles.postal_code, ''), EXCLUDED.postal_code),
                country = COALESCE(NULLIF(user_job_profiles.country, ''), EXCLUDED.country),
                linkedin_url = COALESCE(NULLIF(user_job_profiles.linkedin_url, ''), EXCLUDED.linkedin_url),
                portfolio_url = COALESCE(NULLIF(user_job_profiles.portfolio_url, ''), EXCLUDED.portfolio_url),
                work_authorization = COALESCE(NULLIF(user_job_profiles.work_authorization, ''), EXCLUDED.work_authorization),
                requires_sponsorship = COALESCE(user_job_profiles.requires_sponsorship, EXCLUDED.requires_sponsorship),
                remote_preference = COALESCE(NULLIF(user_job_profiles.remote_preference, ''), EXCLUDED.remote_preference),
                willing_to_relocate = COALESCE(user_job_profiles.willing_to_relocate, EXCLUDED.willing_to_relocate),
                available_start_date = COALESCE(NULLIF(user_job_profiles.available_start_date, ''), EXCLUDED.available_start_date),
                salary_expectation = COALESCE(NULLIF(user_job_profiles.salary_expectation, ''), EXCLUDED.salary_expectation),
                years_of_experience = COALESCE(user_job_profiles.years_of_experience, EXCLUDED.years_of_experience),
                highest_degree = COALESCE(NULLIF(user_job_profiles.highest_degree, ''), EXCLUDED.highest_degree),
                institution = COALESCE(NULLIF(user_job_profiles.institution, ''), EXCLUDED.institution),
                field_of_study = COALESCE(NULLIF(user_job_profiles.field_of_study, ''), EXCLUDED.field_of_study),
                graduation_year = COALESCE(user_job_profiles.graduation_year, EXCLUDED.graduation_year),
                gender = COALESCE(NULLIF(user_job_profiles.gender, ''), EXCLUDED.gender),
                ethnicity = COALESCE(NULLIF(user_job_profiles.ethnicity, ''), EXCLUDED.ethnicity),
                veteran_status = COALESCE(NULLIF(user_job_profiles.veteran_status, ''), EXCLUDED.veteran_status),
                disability_status = COALESCE(NULLIF(user_job_profiles.disability_status, ''), EXCLUDED.disability_status),
                sexual_orientation = COALESCE(NULLIF(user_job_profiles.sexual_orientation, ''), EXCLUDED.sexual_orientation),
                transgender_status = COALESCE(NULLIF(user_job_profiles.transgender_status, ''), EXCLUDED.transgender_status),
                extra_qa = user_job_profiles.extra_qa || EXCLUDED.extra_qa,
                updated_at = NOW()
            RETURNING *
            "#
        );
        let row = bind_profile!(sqlx::query_as::<_, ProfileRow>(&sql), delta)
            .fetch_one(&self.pool)
            .await?;

        info!(
            "Merged {} answers into profile for user {}",
            delta.extra_qa.len(),
            delta.user_id
        );
        Ok(row.into())
    }
}
