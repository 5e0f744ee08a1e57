//! Field Discovery — walks the page (top level plus the first nested frame
//! that carries form controls) and produces a deduplicated, ordered list of
//! `CandidateField`s with inferred questions.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::automation::classifier::normalize_question;
use crate::automation::heuristics::HeuristicTables;
use crate::automation::models::{CandidateField, WidgetKind};
use crate::automation::retry::{retry, RetryPolicy};
use crate::driver::{ContainerPath, Criteria, DocumentDriver, DriverError, ElementHandle};

/// Result of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredForm {
    /// Container the form lives in: the first frame with controls, else top.
    pub form_container: ContainerPath,
    pub fields: Vec<CandidateField>,
}

/// Raw question text plus whether it carried a required marker.
struct InferredQuestion {
    text: String,
    starred: bool,
}

impl InferredQuestion {
    fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        Self {
            starred: trimmed.contains('*'),
            text: trimmed.trim_end_matches(['*', ' ', '\u{a0}']).trim().to_string(),
        }
    }

    fn empty() -> Self {
        Self {
            text: String::new(),
            starred: false,
        }
    }
}

/// Element-level failures skip the element; anything else aborts the pass.
fn is_element_level(e: &DriverError) -> bool {
    matches!(
        e,
        DriverError::StaleElement(_) | DriverError::NotInteractable(_) | DriverError::OptionNotFound(_)
    )
}

/// Counts interactive controls in the top document and every nested frame.
pub async fn count_form_controls(driver: &dyn DocumentDriver) -> Result<usize, DriverError> {
    driver.enter_frame(None).await?;
    let mut total = driver.find_all(None, &Criteria::FormControls).await?.len();
    for frame in driver.frames().await? {
        driver.enter_frame(Some(&frame)).await?;
        total += driver.find_all(None, &Criteria::FormControls).await?.len();
    }
    driver.enter_frame(None).await?;
    Ok(total)
}

pub struct FieldDiscovery<'a> {
    driver: &'a dyn DocumentDriver,
    tables: &'a HeuristicTables,
    option_retry: RetryPolicy,
}

impl<'a> FieldDiscovery<'a> {
    pub fn new(
        driver: &'a dyn DocumentDriver,
        tables: &'a HeuristicTables,
        option_retry: RetryPolicy,
    ) -> Self {
        Self {
            driver,
            tables,
            option_retry,
        }
    }

    pub async fn discover(&self) -> Result<DiscoveredForm, DriverError> {
        let mut containers = vec![ContainerPath::top()];
        let mut form_container = ContainerPath::top();

        for frame in self.driver.frames().await? {
            self.driver.enter_frame(Some(&frame)).await?;
            let controls = self.driver.find_all(None, &Criteria::FormControls).await?.len();
            if controls > 0 {
                debug!("Form frame found: index {} ({} controls)", frame.index, controls);
                form_container = ContainerPath::frame(frame);
                containers.push(form_container.clone());
                break;
            }
        }

        let mut fields = Vec::new();
        let mut seen = HashSet::new();
        for container in &containers {
            self.driver.enter_frame(container.frame.as_ref()).await?;
            for field in self.scan_container(container).await? {
                let key = dedup_key(&field);
                if seen.insert(key) {
                    fields.push(field);
                } else {
                    debug!("Duplicate field skipped: '{}'", field.inferred_question);
                }
            }
        }
        self.driver.enter_frame(form_container.frame.as_ref()).await?;

        debug!("Discovered {} candidate fields", fields.len());
        Ok(DiscoveredForm {
            form_container,
            fields,
        })
    }

    async fn scan_container(&self, container: &ContainerPath) -> Result<Vec<CandidateField>, DriverError> {
        let mut out = Vec::new();

        let simple = [
            (Criteria::NativeSelects, WidgetKind::NativeSelect),
            (Criteria::Clickables, WidgetKind::CustomSelect),
            (Criteria::Comboboxes, WidgetKind::Combobox),
            (Criteria::TextEntries, WidgetKind::Text),
            (Criteria::FileInputs, WidgetKind::FileUpload),
        ];
        for (criteria, kind) in simple {
            for handle in self.driver.find_all(None, &criteria).await? {
                match self.describe(container, handle, kind).await {
                    Ok(Some(field)) => out.push(field),
                    Ok(None) => {}
                    Err(e) if is_element_level(&e) => debug!("Skipping element: {e}"),
                    Err(e) => return Err(e),
                }
            }
        }

        out.extend(
            self.scan_choice_groups(container, Criteria::Checkboxes, WidgetKind::CheckboxGroup)
                .await?,
        );
        out.extend(
            self.scan_choice_groups(container, Criteria::Radios, WidgetKind::RadioGroup)
                .await?,
        );
        Ok(out)
    }

    async fn describe(
        &self,
        container: &ContainerPath,
        handle: ElementHandle,
        kind: WidgetKind,
    ) -> Result<Option<CandidateField>, DriverError> {
        let mut options = Vec::new();
        let current_value = match kind {
            WidgetKind::CustomSelect => {
                let shown = self.driver.text(&handle).await?;
                if shown.trim().is_empty() || !self.tables.is_placeholder(&shown) {
                    return Ok(None);
                }
                let size = self.driver.size(&handle).await?;
                if size.height >= self.tables.container_threshold_px {
                    debug!("Ignoring wrapper {} ({}px tall)", handle, size.height);
                    return Ok(None);
                }
                options = self.open_custom_options(&handle).await;
                String::new()
            }
            WidgetKind::NativeSelect => {
                for option in self.driver.find_all(Some(&handle), &Criteria::Options).await? {
                    let label = self.driver.text(&option).await?;
                    if !self.tables.is_placeholder(&label) {
                        options.push(label.trim().to_string());
                    }
                }
                self.driver.value(&handle).await?
            }
            _ => self.driver.value(&handle).await?,
        };

        let question = self.infer_question(&handle).await?;
        let required = self.is_required(&handle).await? || question.starred;
        let current_value = if self.tables.is_placeholder(&current_value) {
            String::new()
        } else {
            current_value.trim().to_string()
        };

        Ok(Some(CandidateField {
            id: format!("{container}:{handle}"),
            inferred_question: question.text,
            widget_kind: kind,
            required,
            current_value,
            container_path: container.clone(),
            handle,
            options,
            members: Vec::new(),
        }))
    }

    /// Opens a custom dropdown, reads its options and closes it again.
    async fn open_custom_options(&self, handle: &ElementHandle) -> Vec<String> {
        let driver = self.driver;
        let opened = retry(self.option_retry, "open dropdown", |_| async move {
            driver.click(handle).await?;
            let options = driver.find_all(None, &Criteria::Options).await?;
            if options.is_empty() {
                return Err(DriverError::OptionNotFound(format!("no options under {handle}")));
            }
            Ok(options)
        })
        .await;

        let option_handles = match opened {
            Ok(options) => options,
            Err(e) => {
                warn!("Could not open dropdown {}: {}", handle, e);
                return Vec::new();
            }
        };

        let mut labels = Vec::new();
        for option in &option_handles {
            match driver.text(option).await {
                Ok(label) if !self.tables.is_placeholder(&label) => labels.push(label.trim().to_string()),
                Ok(_) => {}
                Err(e) => debug!("Unreadable option {}: {}", option, e),
            }
        }
        if let Err(e) = driver.click(handle).await {
            debug!("Closing dropdown {} failed: {}", handle, e);
        }
        labels
    }

    /// Groups checkboxes (multi-choice) or radios (single choice) sharing a
    /// question into one field. Radios with the same `name` always share a group.
    async fn scan_choice_groups(
        &self,
        container: &ContainerPath,
        criteria: Criteria,
        kind: WidgetKind,
    ) -> Result<Vec<CandidateField>, DriverError> {
        let mut groups: Vec<(String, CandidateField)> = Vec::new();

        for handle in self.driver.find_all(None, &criteria).await? {
            let option = match self.checkbox_label(&handle).await {
                Ok(label) => label,
                Err(e) if is_element_level(&e) => continue,
                Err(e) => return Err(e),
            };
            let mut question = self.infer_group_question(&handle).await?;
            if question.text.is_empty() && kind == WidgetKind::CheckboxGroup {
                question = InferredQuestion::from_raw(&option);
            }
            let checked = self.driver.value(&handle).await? == "true";
            let required = self.is_required(&handle).await? || question.starred;

            let key = match kind {
                WidgetKind::RadioGroup => self
                    .driver
                    .attr(&handle, "name")
                    .await?
                    .filter(|n| !n.is_empty())
                    .map(|n| format!("name:{n}"))
                    .unwrap_or_else(|| question.text.clone()),
                _ => question.text.clone(),
            };

            match groups.iter_mut().find(|(k, _)| *k == key && !key.is_empty()) {
                Some((_, group)) => {
                    group.required |= required;
                    if group.inferred_question.is_empty() {
                        group.inferred_question = question.text;
                    }
                    if checked {
                        match kind {
                            WidgetKind::RadioGroup => group.current_value = option.clone(),
                            _ => append_choice(&mut group.current_value, &option),
                        }
                    }
                    group.options.push(option);
                    group.members.push(handle);
                }
                None => {
                    let field = CandidateField {
                        id: format!("{container}:{handle}"),
                        inferred_question: question.text,
                        widget_kind: kind,
                        required,
                        current_value: if checked { option.clone() } else { String::new() },
                        container_path: container.clone(),
                        handle: handle.clone(),
                        options: vec![option],
                        members: vec![handle],
                    };
                    groups.push((key, field));
                }
            }
        }
        Ok(groups.into_iter().map(|(_, field)| field).collect())
    }

    async fn checkbox_label(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        let own = self.driver.text(handle).await?;
        if !own.trim().is_empty() {
            return Ok(own.trim().to_string());
        }
        if let Some(id) = self.driver.attr(handle, "id").await?.filter(|id| !id.is_empty()) {
            if let Some(label) = self.driver.find_all(None, &Criteria::LabelFor(id)).await?.first() {
                return Ok(self.driver.text(label).await?.trim().to_string());
            }
        }
        Ok(self
            .driver
            .attr(handle, "value")
            .await?
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// A checkbox's own `<label for>` names the option, not the question, so
    /// bound labels are skipped here.
    async fn infer_group_question(&self, handle: &ElementHandle) -> Result<InferredQuestion, DriverError> {
        if let Some(label) = self.driver.find_all(Some(handle), &Criteria::PrecedingLabel).await?.first() {
            if self.driver.attr(label, "for").await?.is_none() {
                let text = self.driver.text(label).await?;
                if !text.trim().is_empty() {
                    return Ok(InferredQuestion::from_raw(&text));
                }
            }
        }
        self.trailing_question(handle).await
    }

    /// Label-for → preceding label → aria → nearest text ending in `?`/`*`.
    async fn infer_question(&self, handle: &ElementHandle) -> Result<InferredQuestion, DriverError> {
        let id = self.driver.attr(handle, "id").await?.filter(|id| !id.is_empty());

        if let Some(id) = &id {
            for label in self.driver.find_all(None, &Criteria::LabelFor(id.clone())).await? {
                let text = self.driver.text(&label).await?;
                if !text.trim().is_empty() {
                    return Ok(InferredQuestion::from_raw(&text));
                }
            }
        }

        if let Some(label) = self.driver.find_all(Some(handle), &Criteria::PrecedingLabel).await?.first() {
            let bound_elsewhere = match (self.driver.attr(label, "for").await?, &id) {
                (Some(target), Some(id)) => &target != id,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !bound_elsewhere {
                let text = self.driver.text(label).await?;
                if !text.trim().is_empty() {
                    return Ok(InferredQuestion::from_raw(&text));
                }
            }
        }

        if let Some(aria) = self.driver.attr(handle, "aria-label").await? {
            if !aria.trim().is_empty() {
                return Ok(InferredQuestion::from_raw(&aria));
            }
        }
        if let Some(ids) = self.driver.attr(handle, "aria-labelledby").await? {
            let mut parts = Vec::new();
            for id in ids.split_whitespace() {
                for el in self.driver.find_all(None, &Criteria::ById(id.to_string())).await? {
                    parts.push(self.driver.text(&el).await?.trim().to_string());
                }
            }
            let joined = parts.join(" ");
            if !joined.trim().is_empty() {
                return Ok(InferredQuestion::from_raw(&joined));
            }
        }

        self.trailing_question(handle).await
    }

    async fn trailing_question(&self, handle: &ElementHandle) -> Result<InferredQuestion, DriverError> {
        for el in self.driver.find_all(Some(handle), &Criteria::PrecedingText).await? {
            let text = self.driver.text(&el).await?;
            let trimmed = text.trim();
            if trimmed.ends_with('?') || trimmed.ends_with('*') {
                return Ok(InferredQuestion::from_raw(trimmed));
            }
        }
        Ok(InferredQuestion::empty())
    }

    async fn is_required(&self, handle: &ElementHandle) -> Result<bool, DriverError> {
        if self.driver.attr(handle, "required").await?.is_some() {
            return Ok(true);
        }
        Ok(self
            .driver
            .attr(handle, "aria-required")
            .await?
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false))
    }
}

fn append_choice(current: &mut String, choice: &str) {
    if !current.is_empty() {
        current.push_str("; ");
    }
    current.push_str(choice);
}

fn dedup_key(field: &CandidateField) -> (String, WidgetKind) {
    let question = normalize_question(&field.inferred_question);
    if question.is_empty() {
        (field.id.clone(), field.widget_kind)
    } else {
        (question, field.widget_kind)
    }
}
