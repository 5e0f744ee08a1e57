//! Automation Session Manager — owns one attempt end to end: driver session,
//! temporary résumé file, listing-page hop, and the pipeline
//! Discovery → Resolver → Negotiation → Submission.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::automation::discovery::{count_form_controls, FieldDiscovery};
use crate::automation::heuristics::HeuristicTables;
use crate::automation::models::{AttemptResult, AttemptStatus, ResolutionSource};
use crate::automation::negotiation::{merge_answers, MergeReport, SuppliedAnswer};
use crate::automation::resolver::FieldResolver;
use crate::automation::retry::RetryPolicy;
use crate::automation::submission::{capture_checkpoint, SubmissionMachine, SubmissionSettings};
use crate::driver::{Criteria, DocumentDriver, DriverError, DriverFactory};
use crate::models::profile::Profile;
use crate::profile::ProfileStore;
use crate::storage::{ArtifactStorage, ResumeFetcher, StorageError};

/// Failures that end an attempt without an `AttemptResult`.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Driver failure: {0}")]
    Driver(#[from] DriverError),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Profile store failure: {0}")]
    Profile(anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct AutomationSettings {
    pub default_country: String,
    pub option_retry: RetryPolicy,
    pub settle: Duration,
}

/// Everything needed to (re)run an attempt. Resumption rebuilds it from the
/// stored application record.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub user_id: Uuid,
    pub job_url: String,
    pub resume_ref: Option<String>,
    pub application_code: String,
}

#[derive(Clone)]
pub struct AutomationService {
    drivers: Arc<dyn DriverFactory>,
    profiles: Arc<dyn ProfileStore>,
    artifacts: Arc<dyn ArtifactStorage>,
    resumes: Arc<dyn ResumeFetcher>,
    tables: Arc<HeuristicTables>,
    settings: AutomationSettings,
}

impl AutomationService {
    pub fn new(
        drivers: Arc<dyn DriverFactory>,
        profiles: Arc<dyn ProfileStore>,
        artifacts: Arc<dyn ArtifactStorage>,
        resumes: Arc<dyn ResumeFetcher>,
        tables: Arc<HeuristicTables>,
        settings: AutomationSettings,
    ) -> Self {
        Self {
            drivers,
            profiles,
            artifacts,
            resumes,
            tables,
            settings,
        }
    }

    pub fn profiles(&self) -> &dyn ProfileStore {
        self.profiles.as_ref()
    }

    pub fn artifacts(&self) -> &dyn ArtifactStorage {
        self.artifacts.as_ref()
    }

    pub async fn start_attempt(&self, ctx: &AttemptContext) -> Result<AttemptResult, AutomationError> {
        info!(
            "[{}] starting attempt for user {} at {}",
            ctx.application_code, ctx.user_id, ctx.job_url
        );
        let profile = self
            .profiles
            .get(ctx.user_id)
            .await
            .map_err(AutomationError::Profile)?;
        self.run(ctx, &profile).await
    }

    /// Merges the answers into the stored profile and re-runs the whole
    /// pipeline in a fresh session. Only the answered delta is written, so
    /// concurrent resumptions for one user do not drop each other's answers.
    pub async fn resume_attempt(
        &self,
        ctx: &AttemptContext,
        answers: &BTreeMap<String, SuppliedAnswer>,
    ) -> Result<(AttemptResult, MergeReport), AutomationError> {
        let before = self
            .profiles
            .get(ctx.user_id)
            .await
            .map_err(AutomationError::Profile)?;
        let mut answered = before.clone();
        let report = merge_answers(&mut answered, answers, &self.tables);
        let profile = self
            .profiles
            .merge(&answered.changes_since(&before))
            .await
            .map_err(AutomationError::Profile)?;

        info!(
            "[{}] resuming with {} answers",
            ctx.application_code,
            answers.len()
        );
        let result = self.run(ctx, &profile).await?;
        Ok((result, report))
    }

    /// The driver session is closed and the résumé temp file removed on
    /// every exit path, including the future being dropped mid-attempt.
    async fn run(&self, ctx: &AttemptContext, profile: &Profile) -> Result<AttemptResult, AutomationError> {
        let resume = match &ctx.resume_ref {
            Some(resume_ref) => Some(self.resumes.fetch(resume_ref).await?),
            None => None,
        };

        let session = SessionGuard::new(self.drivers.open().await?, &ctx.application_code);
        let result = self
            .drive(session.driver(), ctx, profile, resume.as_deref())
            .await;

        session.close().await;
        drop(resume);

        match &result {
            Ok(outcome) => info!(
                "[{}] attempt finished: {} ({} fields filled)",
                ctx.application_code,
                outcome.status.label(),
                outcome.filled_field_count
            ),
            Err(e) => warn!("[{}] attempt failed: {}", ctx.application_code, e),
        }
        result
    }

    async fn drive(
        &self,
        driver: &dyn DocumentDriver,
        ctx: &AttemptContext,
        profile: &Profile,
        resume: Option<&Path>,
    ) -> Result<AttemptResult, AutomationError> {
        driver.navigate(&ctx.job_url).await?;

        if count_form_controls(driver).await? == 0 {
            self.follow_apply(driver, &ctx.application_code).await?;
        }

        let form = FieldDiscovery::new(driver, &self.tables, self.settings.option_retry)
            .discover()
            .await?;
        if form.fields.is_empty() {
            warn!("[{}] no form fields found", ctx.application_code);
            let checkpoint =
                capture_checkpoint(driver, self.artifacts.as_ref(), &ctx.application_code).await;
            return Ok(AttemptResult {
                status: AttemptStatus::IncompleteForm,
                filled_field_count: 0,
                checkpoint_artifacts: checkpoint.into_iter().collect(),
            });
        }

        let outcomes = FieldResolver::new(&self.tables, &self.settings.default_country, resume)
            .resolve_all(&form.fields, profile);
        let unresolved = outcomes.iter().filter(|o| o.is_unresolved()).count();
        let defaulted = outcomes
            .iter()
            .filter(|o| o.source == ResolutionSource::Default)
            .count();
        info!(
            "[{}] {} fields: {} unresolved, {} defaulted",
            ctx.application_code,
            outcomes.len(),
            unresolved,
            defaulted
        );

        let settings = SubmissionSettings {
            option_retry: self.settings.option_retry,
            settle: self.settings.settle,
        };
        let mut machine = SubmissionMachine::new(
            driver,
            &self.tables,
            self.artifacts.as_ref(),
            settings,
            &ctx.application_code,
        );
        Ok(machine.run(&form, &outcomes).await?)
    }

    /// Listing pages show an apply button but no form; click through once.
    /// Expects the driver to be on the top-level document.
    async fn follow_apply(&self, driver: &dyn DocumentDriver, code: &str) -> Result<(), DriverError> {
        for label in &self.tables.apply_labels {
            let found = driver
                .find_all(None, &Criteria::ButtonsWithText(label.clone()))
                .await?;
            if let Some(button) = found.first() {
                info!("[{}] listing page detected, clicking '{}'", code, label);
                driver.click(button).await?;
                tokio::time::sleep(self.settings.settle).await;
                return Ok(());
            }
        }
        debug!("[{}] no form controls and no apply button", code);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session guard
// ────────────────────────────────────────────────────────────────────────────

/// Owns an open driver session. If dropped before `close` (attempt timed out,
/// client went away) the close is spawned onto the runtime instead.
struct SessionGuard {
    driver: Arc<dyn DocumentDriver>,
    code: String,
    closed: bool,
}

impl SessionGuard {
    fn new(driver: Box<dyn DocumentDriver>, code: &str) -> Self {
        Self {
            driver: Arc::from(driver),
            code: code.to_string(),
            closed: false,
        }
    }

    fn driver(&self) -> &dyn DocumentDriver {
        self.driver.as_ref()
    }

    async fn close(mut self) {
        if let Err(e) = self.driver.close().await {
            warn!("[{}] closing driver session failed: {}", self.code, e);
        }
        self.closed = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("[{}] no runtime left to close abandoned driver session", self.code);
            return;
        };
        warn!("[{}] attempt abandoned, closing driver session", self.code);
        let driver = Arc::clone(&self.driver);
        let code = std::mem::take(&mut self.code);
        runtime.spawn(async move {
            if let Err(e) = driver.close().await {
                warn!("[{}] closing abandoned driver session failed: {}", code, e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{self, FakeDocument, FakeDriverFactory, SubmitBehavior};
    use crate::profile::memory::MemoryProfileStore;
    use crate::storage::memory::MemoryStorage;

    struct Harness {
        service: AutomationService,
        doc: FakeDocument,
        profiles: Arc<MemoryProfileStore>,
        storage: Arc<MemoryStorage>,
        user_id: Uuid,
    }

    fn harness(doc: FakeDocument, profile: Profile) -> Harness {
        harness_with(FakeDriverFactory::new(doc.clone()), doc, profile)
    }

    fn harness_with(factory: FakeDriverFactory, doc: FakeDocument, profile: Profile) -> Harness {
        let user_id = profile.user_id;
        let profiles = Arc::new(MemoryProfileStore::with(profile));
        let storage = Arc::new(MemoryStorage::with_resume("resumes/ada.pdf", b"%PDF-1.7"));
        let service = AutomationService::new(
            Arc::new(factory),
            profiles.clone(),
            storage.clone(),
            storage.clone(),
            Arc::new(HeuristicTables::default()),
            AutomationSettings {
                default_country: "United States".to_string(),
                option_retry: RetryPolicy::new(3, Duration::from_millis(10)),
                settle: Duration::from_millis(100),
            },
        );
        Harness {
            service,
            doc,
            profiles,
            storage,
            user_id,
        }
    }

    fn ctx(h: &Harness, resume_ref: Option<&str>) -> AttemptContext {
        AttemptContext {
            user_id: h.user_id,
            job_url: "https://jobs.example.com/acme/123".to_string(),
            resume_ref: resume_ref.map(String::from),
            application_code: "AB12CD34".to_string(),
        }
    }

    fn profile() -> Profile {
        let mut p = Profile::new(Uuid::new_v4());
        p.full_name = Some("Ada Lovelace".to_string());
        p.email = Some("ada@example.com".to_string());
        p.work_authorization = Some("yes".to_string());
        p
    }

    fn gender_form() -> Vec<fake::FakeElement> {
        vec![
            fake::label(Some("name"), "Full Name *"),
            fake::input("name", "text"),
            fake::label(None, "What is your gender identity? *"),
            fake::custom("gender", &["Man", "Woman", "Non-binary", "Prefer not to answer"]),
            fake::submit_button("submit", "Submit Application"),
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn test_authorized_select_submits_and_closes_session() {
        let doc = FakeDocument::new(
            "about:blank",
            vec![
                fake::label(Some("auth"), "Are you authorized to work in this location?"),
                fake::select("auth", &["Yes", "No"]),
                fake::submit_button("submit", "Submit"),
            ],
        );
        let h = harness(doc, profile());

        let result = h.service.start_attempt(&ctx(&h, None)).await.unwrap();

        assert_eq!(result.status, AttemptStatus::Submitted);
        assert_eq!(result.filled_field_count, 1);
        assert!(h.doc.closed());
        assert_eq!(h.doc.submits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_gender_then_declined_answer_submits() {
        let doc = FakeDocument::new("about:blank", gender_form());
        let h = harness(doc, profile());
        let context = ctx(&h, None);

        let first = h.service.start_attempt(&context).await.unwrap();
        let AttemptStatus::MissingFields(descriptors) = &first.status else {
            panic!("expected missing fields, got {:?}", first.status);
        };
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].question, "What is your gender identity?");
        assert_eq!(
            descriptors[0].options,
            vec!["Man", "Woman", "Non-binary", "Prefer not to answer"]
        );
        assert_eq!(h.doc.submits(), 0);
        assert!(h.doc.closed());

        let mut answers = BTreeMap::new();
        answers.insert(
            "What is your gender identity?".to_string(),
            SuppliedAnswer::Plain("Prefer not to answer".to_string()),
        );
        let (second, report) = h.service.resume_attempt(&context, &answers).await.unwrap();

        assert_eq!(report.extra_qa.len(), 1);
        assert_eq!(second.status, AttemptStatus::Submitted);
        assert_eq!(h.doc.submits(), 1);
        let stored = h.profiles.snapshot(h.user_id).unwrap();
        assert!(stored.gender.is_none());
        assert_eq!(
            stored.extra_qa["what is your gender identity"].answer,
            "Prefer not to answer"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_keeps_populated_fields() {
        let doc = FakeDocument::new("about:blank", gender_form());
        let h = harness(doc, profile());
        let before = h.profiles.snapshot(h.user_id).unwrap();

        let mut answers = BTreeMap::new();
        answers.insert(
            "Full Name".to_string(),
            SuppliedAnswer::Plain("Someone Else".to_string()),
        );
        answers.insert(
            "What is your gender identity?".to_string(),
            SuppliedAnswer::Plain("Woman".to_string()),
        );
        h.service.resume_attempt(&ctx(&h, None), &answers).await.unwrap();

        let after = h.profiles.snapshot(h.user_id).unwrap();
        assert_eq!(after.full_name, before.full_name);
        assert_eq!(after.email, before.email);
        assert_eq!(after.gender.as_deref(), Some("female"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_profile_answer_picks_decline_option() {
        let doc = FakeDocument::new("about:blank", gender_form());
        let mut p = profile();
        p.gender = Some("prefer_not_to_say".to_string());
        let h = harness(doc, p);

        let result = h.service.start_attempt(&ctx(&h, None)).await.unwrap();

        assert_eq!(result.status, AttemptStatus::Submitted);
        assert_eq!(result.filled_field_count, 2);
        assert_eq!(h.doc.submits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_merges_only_the_answered_delta() {
        let doc = FakeDocument::new("about:blank", gender_form());
        let h = harness(doc, profile());
        let context = ctx(&h, None);

        // Written by another request; the resumption must not clobber it.
        let mut concurrent = Profile::new(h.user_id);
        concurrent.extra_qa.insert(
            "desired salary".to_string(),
            crate::models::profile::ExtraQaEntry {
                answer: "100000".to_string(),
                field_type: Default::default(),
                options: None,
            },
        );
        concurrent.phone = Some("+1 555 0100".to_string());
        h.profiles.merge(&concurrent).await.unwrap();

        let mut answers = BTreeMap::new();
        answers.insert(
            "What is your gender identity?".to_string(),
            SuppliedAnswer::Plain("Woman".to_string()),
        );
        h.service.resume_attempt(&context, &answers).await.unwrap();

        let stored = h.profiles.snapshot(h.user_id).unwrap();
        assert_eq!(stored.gender.as_deref(), Some("female"));
        assert_eq!(stored.phone.as_deref(), Some("+1 555 0100"));
        assert_eq!(stored.extra_qa["desired salary"].answer, "100000");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_attempt_still_closes_session() {
        let doc = FakeDocument::new(
            "about:blank",
            vec![
                fake::label(Some("name"), "Full Name *"),
                fake::input("name", "text"),
                fake::submit_button("submit", "Submit"),
            ],
        );
        let h = harness(doc, profile());
        let context = ctx(&h, None);

        // Settle after submit is 100ms; give up halfway through it.
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), h.service.start_attempt(&context)).await;
        assert!(outcome.is_err());
        assert_eq!(h.doc.submits(), 1);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(h.doc.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_page_is_followed_once() {
        let doc = FakeDocument::new(
            "about:blank",
            vec![
                fake::text("title", "Senior Engineer"),
                fake::link("apply", "Apply for this job"),
            ],
        )
        .on_apply(vec![
            fake::label(Some("email"), "Email *"),
            fake::input("email", "email"),
            fake::submit_button("submit", "Submit Application"),
        ]);
        let h = harness(doc, profile());

        let result = h.service.start_attempt(&ctx(&h, None)).await.unwrap();
        assert_eq!(result.status, AttemptStatus::Submitted);
        assert_eq!(h.doc.value_of("email"), None); // replaced by confirmation
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_without_form_is_incomplete() {
        let doc = FakeDocument::new("about:blank", vec![fake::text("p", "Position closed")]);
        let h = harness(doc, profile());

        let result = h.service.start_attempt(&ctx(&h, None)).await.unwrap();
        assert_eq!(result.status, AttemptStatus::IncompleteForm);
        assert_eq!(result.checkpoint_artifacts.len(), 1);
        assert!(h.doc.closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_is_uploaded_from_temp_file() {
        let doc = FakeDocument::new(
            "about:blank",
            vec![
                fake::label(Some("resume"), "Resume/CV *"),
                fake::input("resume", "file"),
                fake::label(Some("cover"), "Cover Letter"),
                fake::input("cover", "file"),
                fake::submit_button("submit", "Submit"),
            ],
        )
        .on_submit(SubmitBehavior::Ignore);
        let h = harness(doc, profile());

        h.service
            .start_attempt(&ctx(&h, Some("resumes/ada.pdf")))
            .await
            .unwrap();

        let uploaded = h.doc.value_of("resume").unwrap();
        assert!(uploaded.ends_with(".pdf"));
        // Temp file is gone once the attempt is over.
        assert!(!std::path::Path::new(&uploaded).exists());
        assert_eq!(h.doc.value_of("cover").as_deref(), Some(""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_is_an_error_and_still_closes() {
        let doc = FakeDocument::new("about:blank", vec![]).failing_navigation();
        let h = harness(doc, profile());

        let err = h.service.start_attempt(&ctx(&h, None)).await.unwrap_err();
        assert!(matches!(err, AutomationError::Driver(DriverError::Navigation { .. })));
        assert!(h.doc.closed());
        assert_eq!(h.storage.checkpoint_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_session_is_an_error() {
        let doc = FakeDocument::new("about:blank", vec![]);
        let mut factory = FakeDriverFactory::new(doc.clone());
        factory.unavailable = true;
        let h = harness_with(factory, doc, profile());

        let err = h.service.start_attempt(&ctx(&h, None)).await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::Driver(DriverError::SessionUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_resume_fails_before_opening_a_session() {
        let doc = FakeDocument::new("about:blank", gender_form());
        let h = harness(doc, profile());

        let err = h
            .service
            .start_attempt(&ctx(&h, Some("resumes/missing.pdf")))
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Storage(StorageError::NotFound(_))));
        assert!(!h.doc.closed());
    }
}
