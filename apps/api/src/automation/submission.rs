//! Submission State Machine.
//!
//! Filling → { AwaitingMissingFields | Submitting → Verifying →
//! { Submitted | ValidationFailed } | SubmitControlNotFound }
//!
//! Every entry into a terminal state (or AwaitingMissingFields) captures one
//! checkpoint screenshot.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::automation::classifier::normalize_question;
use crate::automation::discovery::DiscoveredForm;
use crate::automation::heuristics::HeuristicTables;
use crate::automation::models::{
    ArtifactRef, AttemptResult, AttemptStatus, CandidateField, ResolutionOutcome,
    SubmissionState, WidgetKind,
};
use crate::automation::negotiation::{negotiate, Negotiation};
use crate::automation::resolver::match_option;
use crate::automation::retry::{poll, retry, RetryPolicy};
use crate::driver::{ContainerPath, Criteria, DocumentDriver, DriverError, ElementHandle};
use crate::storage::ArtifactStorage;

const MAX_MESSAGE_LEN: usize = 200;
const NO_CONFIRMATION: &str = "form still present after submit with no confirmation";

#[derive(Debug, Clone, Copy)]
pub struct SubmissionSettings {
    pub option_retry: RetryPolicy,
    /// Wait between clicking submit and inspecting the page.
    pub settle: Duration,
}

/// Failures the attempt can't recover from; everything else is logged and
/// the field is skipped.
fn is_fatal(e: &DriverError) -> bool {
    matches!(
        e,
        DriverError::Transport(_) | DriverError::SessionUnavailable(_) | DriverError::Navigation { .. }
    )
}

/// Screenshots the page and stores it. Checkpoint failures never change the
/// outcome of an attempt, so they are only logged.
pub async fn capture_checkpoint(
    driver: &dyn DocumentDriver,
    artifacts: &dyn ArtifactStorage,
    prefix: &str,
) -> Option<ArtifactRef> {
    let bytes = match driver.screenshot().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("[{}] screenshot failed: {}", prefix, e);
            return None;
        }
    };
    match artifacts.put(prefix, bytes).await {
        Ok(artifact) => Some(artifact),
        Err(e) => {
            warn!("[{}] checkpoint upload failed: {}", prefix, e);
            None
        }
    }
}

pub struct SubmissionMachine<'a> {
    driver: &'a dyn DocumentDriver,
    tables: &'a HeuristicTables,
    artifacts: &'a dyn ArtifactStorage,
    settings: SubmissionSettings,
    checkpoint_prefix: String,
    state: SubmissionState,
    container: Option<ContainerPath>,
    filled: u32,
    checkpoints: Vec<ArtifactRef>,
}

impl<'a> SubmissionMachine<'a> {
    pub fn new(
        driver: &'a dyn DocumentDriver,
        tables: &'a HeuristicTables,
        artifacts: &'a dyn ArtifactStorage,
        settings: SubmissionSettings,
        checkpoint_prefix: &str,
    ) -> Self {
        Self {
            driver,
            tables,
            artifacts,
            settings,
            checkpoint_prefix: checkpoint_prefix.to_string(),
            state: SubmissionState::Filling,
            container: None,
            filled: 0,
            checkpoints: Vec::new(),
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub async fn run(
        &mut self,
        form: &DiscoveredForm,
        outcomes: &[ResolutionOutcome],
    ) -> Result<AttemptResult, DriverError> {
        info!("[{}] state -> {}", self.checkpoint_prefix, self.state);

        for outcome in outcomes.iter().filter(|o| o.needs_fill()) {
            match self.fill(outcome).await {
                Ok(()) => {
                    self.filled += 1;
                    debug!("Filled '{}' ({:?})", outcome.field.inferred_question, outcome.source);
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => warn!("Could not fill '{}': {}", outcome.field.inferred_question, e),
            }
        }

        if let Negotiation::Halt(descriptors) = negotiate(outcomes) {
            info!(
                "[{}] halting for {} missing fields",
                self.checkpoint_prefix,
                descriptors.len()
            );
            self.transition(SubmissionState::AwaitingMissingFields).await;
            return Ok(self.finish(AttemptStatus::MissingFields(descriptors)));
        }

        let Some(control) = self.locate_submit(&form.form_container).await? else {
            self.transition(SubmissionState::SubmitControlNotFound).await;
            return Ok(self.finish(AttemptStatus::SubmitControlNotFound));
        };

        let url_before = self.driver.current_url().await?;
        self.transition(SubmissionState::Submitting).await;
        self.driver.click(&control).await?;

        self.transition(SubmissionState::Verifying).await;
        tokio::time::sleep(self.settings.settle).await;
        let status = self.verify(form, outcomes, &url_before).await?;

        let next = match status {
            AttemptStatus::Submitted => SubmissionState::Submitted,
            _ => SubmissionState::ValidationFailed,
        };
        self.transition(next).await;
        Ok(self.finish(status))
    }

    fn finish(&mut self, status: AttemptStatus) -> AttemptResult {
        AttemptResult {
            status,
            filled_field_count: self.filled,
            checkpoint_artifacts: std::mem::take(&mut self.checkpoints),
        }
    }

    async fn transition(&mut self, next: SubmissionState) {
        info!("[{}] state {} -> {}", self.checkpoint_prefix, self.state, next);
        self.state = next;
        if next.captures_checkpoint() {
            self.checkpoint().await;
        }
    }

    async fn checkpoint(&mut self) {
        if let Some(artifact) =
            capture_checkpoint(self.driver, self.artifacts, &self.checkpoint_prefix).await
        {
            self.checkpoints.push(artifact);
        }
    }

    async fn enter(&mut self, container: &ContainerPath) -> Result<(), DriverError> {
        if self.container.as_ref() != Some(container) {
            self.driver.enter_frame(container.frame.as_ref()).await?;
            self.container = Some(container.clone());
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Filling
    // ────────────────────────────────────────────────────────────────────────

    async fn fill(&mut self, outcome: &ResolutionOutcome) -> Result<(), DriverError> {
        let field = &outcome.field;
        let value = outcome.value.as_deref().unwrap_or_default();
        self.enter(&field.container_path).await?;

        match field.widget_kind {
            WidgetKind::Text => self.driver.fill(&field.handle, value).await,
            WidgetKind::NativeSelect => self.driver.select_option(&field.handle, value).await,
            WidgetKind::CustomSelect => self.choose_custom(&field.handle, value).await,
            WidgetKind::Combobox => self.choose_combobox(&field.handle, value).await,
            WidgetKind::CheckboxGroup => self.tick_checkboxes(field, value).await,
            WidgetKind::RadioGroup => self.pick_radio(field, value).await,
            WidgetKind::FileUpload => self.driver.upload(&field.handle, Path::new(value)).await,
        }
    }

    /// Open → pick → verify, retried as a unit.
    async fn choose_custom(&self, handle: &ElementHandle, value: &str) -> Result<(), DriverError> {
        let driver = self.driver;
        let wanted = normalize_question(value);
        let wanted = wanted.as_str();

        retry(self.settings.option_retry, "choose option", |_| async move {
            let mut options = driver.find_all(None, &Criteria::Options).await?;
            if options.is_empty() {
                driver.click(handle).await?;
                options = driver.find_all(None, &Criteria::Options).await?;
            }

            let mut target = None;
            for option in options {
                if normalize_question(&driver.text(&option).await?) == wanted {
                    target = Some(option);
                    break;
                }
            }
            let option = target.ok_or_else(|| DriverError::OptionNotFound(value.to_string()))?;
            driver.click(&option).await?;

            let shown = driver.text(handle).await?;
            if normalize_question(&shown) == wanted {
                Ok(())
            } else {
                Err(DriverError::OptionNotFound(format!("{value} (shows '{shown}')")))
            }
        })
        .await
    }

    /// Types the answer, then picks the suggestion it matches if any appear.
    async fn choose_combobox(&self, handle: &ElementHandle, value: &str) -> Result<(), DriverError> {
        let driver = self.driver;
        driver.fill(handle, value).await?;

        let suggestions = poll(self.settings.option_retry, || async move {
            let found = driver.find_all(None, &Criteria::Options).await.ok()?;
            (!found.is_empty()).then_some(found)
        })
        .await;
        let Some(suggestions) = suggestions else {
            return Ok(());
        };

        let mut labels = Vec::with_capacity(suggestions.len());
        for option in &suggestions {
            labels.push(driver.text(option).await?.trim().to_string());
        }
        let chosen = match_option(value, &labels, self.tables)
            .ok_or_else(|| DriverError::OptionNotFound(value.to_string()))?;
        match labels.iter().position(|l| *l == chosen) {
            Some(idx) => driver.click(&suggestions[idx]).await,
            None => Err(DriverError::OptionNotFound(chosen)),
        }
    }

    async fn tick_checkboxes(&self, field: &CandidateField, value: &str) -> Result<(), DriverError> {
        for choice in value.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            self.check_member(field, choice).await?;
        }
        Ok(())
    }

    async fn pick_radio(&self, field: &CandidateField, value: &str) -> Result<(), DriverError> {
        self.check_member(field, value.trim()).await
    }

    /// Clicks the group member labelled `choice` unless it is already checked.
    async fn check_member(&self, field: &CandidateField, choice: &str) -> Result<(), DriverError> {
        let wanted = normalize_question(choice);
        let member = field
            .options
            .iter()
            .position(|o| normalize_question(o) == wanted)
            .and_then(|idx| field.members.get(idx))
            .ok_or_else(|| DriverError::OptionNotFound(choice.to_string()))?;
        if self.driver.value(member).await? != "true" {
            self.driver.click(member).await?;
        }
        Ok(())
    }

    // ────────────────────────────────────────────────────────────────────────
    // Submitting
    // ────────────────────────────────────────────────────────────────────────

    /// Typed submit controls first, then buttons by label; the form's own
    /// frame before the top document.
    async fn locate_submit(&mut self, form_container: &ContainerPath) -> Result<Option<ElementHandle>, DriverError> {
        let mut containers = vec![form_container.clone()];
        if form_container.frame.is_some() {
            containers.push(ContainerPath::top());
        }

        for container in &containers {
            self.enter(container).await?;
            if let Some(control) = self.driver.find_all(None, &Criteria::SubmitControls).await?.into_iter().next() {
                debug!("Submit control found in {}", container);
                return Ok(Some(control));
            }
            for label in &self.tables.submit_labels {
                let found = self
                    .driver
                    .find_all(None, &Criteria::ButtonsWithText(label.clone()))
                    .await?;
                if let Some(control) = found.into_iter().next() {
                    debug!("Submit button '{}' found in {}", label, container);
                    return Ok(Some(control));
                }
            }
        }
        warn!("[{}] no submit control found", self.checkpoint_prefix);
        Ok(None)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Verifying
    // ────────────────────────────────────────────────────────────────────────

    async fn verify(
        &mut self,
        form: &DiscoveredForm,
        outcomes: &[ResolutionOutcome],
        url_before: &str,
    ) -> Result<AttemptStatus, DriverError> {
        // Frames may have been replaced by the submission.
        self.container = None;

        if self.success_visible(&form.form_container, url_before).await? {
            return Ok(AttemptStatus::Submitted);
        }

        self.enter(&form.form_container).await?;
        let messages = self.validation_messages().await?;
        if !messages.is_empty() {
            return Ok(AttemptStatus::ValidationFailed(messages));
        }

        let mut still_empty = Vec::new();
        for outcome in outcomes.iter().filter(|o| o.field.required) {
            if let Some(answer) = self.current_answer(&outcome.field).await? {
                if answer.is_empty() && !outcome.field.inferred_question.is_empty() {
                    still_empty.push(format!("{} is required", outcome.field.inferred_question));
                }
            }
        }
        if !still_empty.is_empty() {
            return Ok(AttemptStatus::ValidationFailed(still_empty));
        }

        self.enter(&form.form_container).await?;
        let remaining = self.driver.find_all(None, &Criteria::FormControls).await?;
        if remaining.is_empty() {
            info!("[{}] form surface gone after submit", self.checkpoint_prefix);
            return Ok(AttemptStatus::Submitted);
        }

        Ok(AttemptStatus::ValidationFailed(vec![NO_CONFIRMATION.to_string()]))
    }

    async fn success_visible(&mut self, form_container: &ContainerPath, url_before: &str) -> Result<bool, DriverError> {
        let url = self.driver.current_url().await?;
        if url != url_before {
            let lower = url.to_lowercase();
            if self.tables.success_url_keywords.iter().any(|k| lower.contains(k.as_str())) {
                info!("[{}] success URL: {}", self.checkpoint_prefix, url);
                return Ok(true);
            }
        }

        let mut containers = vec![form_container.clone()];
        if form_container.frame.is_some() {
            containers.push(ContainerPath::top());
        }
        for container in &containers {
            if let Err(e) = self.enter(container).await {
                // The form frame itself may be gone after a redirect.
                debug!("Cannot enter {}: {}", container, e);
                self.container = None;
                continue;
            }
            for indicator in &self.tables.success_indicators {
                let hits = self
                    .driver
                    .find_all(None, &Criteria::TextContaining(indicator.clone()))
                    .await?;
                if !hits.is_empty() {
                    info!("[{}] success indicator: '{}'", self.checkpoint_prefix, indicator);
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn validation_messages(&self) -> Result<Vec<String>, DriverError> {
        let mut messages: Vec<String> = Vec::new();
        for el in self.driver.find_all(None, &Criteria::ValidationMessages).await? {
            let text = match self.driver.text(&el).await {
                Ok(text) => text.trim().to_string(),
                Err(e) if is_fatal(&e) => return Err(e),
                Err(_) => continue,
            };
            if !text.is_empty() && text.chars().count() < MAX_MESSAGE_LEN && !messages.contains(&text) {
                messages.push(text);
            }
        }
        Ok(messages)
    }

    /// `None` when the control is gone; `Some("")` when present but empty.
    async fn current_answer(&mut self, field: &CandidateField) -> Result<Option<String>, DriverError> {
        self.enter(&field.container_path).await?;
        let read = match field.widget_kind {
            WidgetKind::CustomSelect => self.driver.text(&field.handle).await,
            WidgetKind::CheckboxGroup | WidgetKind::RadioGroup => {
                let mut any_checked = Ok(String::new());
                for member in &field.members {
                    match self.driver.value(member).await {
                        Ok(v) if v == "true" => {
                            any_checked = Ok(v);
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            any_checked = Err(e);
                            break;
                        }
                    }
                }
                any_checked
            }
            _ => self.driver.value(&field.handle).await,
        };
        match read {
            Ok(v) if self.tables.is_placeholder(&v) => Ok(Some(String::new())),
            Ok(v) => Ok(Some(v)),
            Err(e) if is_fatal(&e) => Err(e),
            Err(_) => Ok(None),
        }
    }
}
