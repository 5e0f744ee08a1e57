//! In-memory `DocumentDriver` used by the pipeline tests.
//!
//! A document is a flat, ordered list of elements per frame (index 0 is the
//! top-level document). Element ids double as handles; option handles are
//! `"{owner}#opt{n}"`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::driver::{
    Criteria, DocumentDriver, DriverError, DriverFactory, ElementHandle, ElementSize, FrameRef,
};

#[derive(Debug, Clone)]
pub enum FakeKind {
    Label { for_id: Option<String> },
    Text,
    Input { input_type: String, value: String },
    Checkbox { checked: bool },
    /// Grouped with other radios sharing its `name` attribute.
    Radio { checked: bool },
    Select { options: Vec<String>, selected: Option<usize> },
    Custom {
        placeholder: String,
        options: Vec<String>,
        selected: Option<String>,
        open: bool,
        ignore_clicks: u32,
    },
    Combobox { options: Vec<String>, value: String, open: bool },
    Wrapper,
    Button { submit: bool },
    Link,
    Error,
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub id: String,
    pub kind: FakeKind,
    pub text: String,
    pub attrs: HashMap<String, String>,
    pub height: f64,
}

impl FakeElement {
    fn new(id: &str, kind: FakeKind, text: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            text: text.to_string(),
            attrs: HashMap::new(),
            height: 38.0,
        }
    }

    pub fn required(mut self) -> Self {
        self.attrs.insert("required".to_string(), "true".to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    pub fn with_value(mut self, v: &str) -> Self {
        match &mut self.kind {
            FakeKind::Input { value, .. } | FakeKind::Combobox { value, .. } => {
                *value = v.to_string()
            }
            FakeKind::Select { options, selected } => {
                *selected = options.iter().position(|o| o == v)
            }
            FakeKind::Custom { selected, .. } => *selected = Some(v.to_string()),
            FakeKind::Checkbox { checked } | FakeKind::Radio { checked } => {
                *checked = !v.is_empty()
            }
            _ => {}
        }
        self
    }

    /// Custom dropdown that ignores its first `n` clicks before opening.
    pub fn sluggish(mut self, n: u32) -> Self {
        if let FakeKind::Custom { ignore_clicks, .. } = &mut self.kind {
            *ignore_clicks = n;
        }
        self
    }
}

static NEXT_LABEL: AtomicUsize = AtomicUsize::new(0);

enum ClickEffect {
    None,
    Submit,
    Apply,
}

pub fn label(for_id: Option<&str>, text: &str) -> FakeElement {
    let id = format!("label-{}", NEXT_LABEL.fetch_add(1, Ordering::Relaxed));
    FakeElement::new(
        &id,
        FakeKind::Label {
            for_id: for_id.map(String::from),
        },
        text,
    )
}

pub fn text(id: &str, text: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Text, text)
}

pub fn input(id: &str, input_type: &str) -> FakeElement {
    FakeElement::new(
        id,
        FakeKind::Input {
            input_type: input_type.to_string(),
            value: String::new(),
        },
        "",
    )
}

pub fn checkbox(id: &str, label: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Checkbox { checked: false }, label)
}

pub fn radio(id: &str, name: &str, label: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Radio { checked: false }, label).attr("name", name)
}

pub fn select(id: &str, options: &[&str]) -> FakeElement {
    FakeElement::new(
        id,
        FakeKind::Select {
            options: options.iter().map(|s| s.to_string()).collect(),
            selected: None,
        },
        "",
    )
}

pub fn custom(id: &str, options: &[&str]) -> FakeElement {
    FakeElement::new(
        id,
        FakeKind::Custom {
            placeholder: "Select...".to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
            selected: None,
            open: false,
            ignore_clicks: 0,
        },
        "",
    )
}

pub fn combobox(id: &str, options: &[&str]) -> FakeElement {
    FakeElement::new(
        id,
        FakeKind::Combobox {
            options: options.iter().map(|s| s.to_string()).collect(),
            value: String::new(),
            open: false,
        },
        "",
    )
}

pub fn wrapper(id: &str, text: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Wrapper, text).height(400.0)
}

pub fn submit_button(id: &str, text: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Button { submit: true }, text)
}

pub fn button(id: &str, text: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Button { submit: false }, text)
}

pub fn link(id: &str, text: &str) -> FakeElement {
    FakeElement::new(id, FakeKind::Link, text)
}

/// What happens to the document when a submit control is clicked.
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    /// Form is replaced by a confirmation message.
    Confirm(String),
    /// Form stays, every value is cleared, and the messages are shown.
    RejectAndReset(Vec<String>),
    /// Nothing visible happens.
    Ignore,
}

#[derive(Debug)]
struct FakeFrame {
    name: Option<String>,
    elements: Vec<FakeElement>,
}

#[derive(Debug)]
struct FakeState {
    url: String,
    frames: Vec<FakeFrame>,
    current: usize,
    on_submit: SubmitBehavior,
    on_apply: Option<Vec<FakeElement>>,
    fail_navigation: bool,
    submits: u32,
    screenshots: u32,
    closed: bool,
}

/// Shared fake document. Clones observe the same state, so a test can keep one
/// handle for assertions while the pipeline owns another.
#[derive(Debug, Clone)]
pub struct FakeDocument {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDocument {
    pub fn new(url: &str, top: Vec<FakeElement>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                url: url.to_string(),
                frames: vec![FakeFrame {
                    name: None,
                    elements: top,
                }],
                current: 0,
                on_submit: SubmitBehavior::Confirm("Thank you for applying!".to_string()),
                on_apply: None,
                fail_navigation: false,
                submits: 0,
                screenshots: 0,
                closed: false,
            })),
        }
    }

    pub fn with_frame(self, name: &str, elements: Vec<FakeElement>) -> Self {
        self.lock().frames.push(FakeFrame {
            name: Some(name.to_string()),
            elements,
        });
        self
    }

    pub fn on_submit(self, behavior: SubmitBehavior) -> Self {
        self.lock().on_submit = behavior;
        self
    }

    /// Clicking an "Apply" button/link replaces the top document with `elements`.
    pub fn on_apply(self, elements: Vec<FakeElement>) -> Self {
        self.lock().on_apply = Some(elements);
        self
    }

    pub fn failing_navigation(self) -> Self {
        self.lock().fail_navigation = true;
        self
    }

    pub fn value_of(&self, id: &str) -> Option<String> {
        let state = self.lock();
        state
            .frames
            .iter()
            .flat_map(|f| f.elements.iter())
            .find(|e| e.id == id)
            .map(current_value)
    }

    pub fn submits(&self) -> u32 {
        self.lock().submits
    }

    pub fn screenshots(&self) -> u32 {
        self.lock().screenshots
    }

    pub fn closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn current_value(el: &FakeElement) -> String {
    match &el.kind {
        FakeKind::Input { value, .. } | FakeKind::Combobox { value, .. } => value.clone(),
        FakeKind::Select { options, selected } => selected
            .and_then(|i| options.get(i).cloned())
            .unwrap_or_default(),
        FakeKind::Custom { selected, .. } => selected.clone().unwrap_or_default(),
        FakeKind::Checkbox { checked } | FakeKind::Radio { checked } => {
            if *checked {
                "true".to_string()
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}

fn split_option_handle(handle: &ElementHandle) -> Option<(&str, usize)> {
    let (owner, idx) = handle.0.split_once("#opt")?;
    Some((owner, idx.parse().ok()?))
}

fn clear_values(elements: &mut [FakeElement]) {
    for el in elements {
        match &mut el.kind {
            FakeKind::Input { value, .. } | FakeKind::Combobox { value, .. } => value.clear(),
            FakeKind::Select { selected, .. } => *selected = None,
            FakeKind::Custom { selected, .. } => *selected = None,
            FakeKind::Checkbox { checked } | FakeKind::Radio { checked } => *checked = false,
            _ => {}
        }
    }
}

fn option_handles(el: &FakeElement) -> Vec<ElementHandle> {
    let count = match &el.kind {
        FakeKind::Select { options, .. } => options.len(),
        FakeKind::Custom { options, open, .. } if *open => options.len(),
        FakeKind::Combobox { options, open, .. } if *open => options.len(),
        _ => 0,
    };
    (0..count)
        .map(|i| ElementHandle(format!("{}#opt{}", el.id, i)))
        .collect()
}

impl FakeState {
    fn frame(&self) -> &FakeFrame {
        &self.frames[self.current]
    }

    fn position(&self, handle: &ElementHandle) -> Result<usize, DriverError> {
        self.frame()
            .elements
            .iter()
            .position(|e| e.id == handle.0)
            .ok_or_else(|| DriverError::StaleElement(handle.0.clone()))
    }

    fn element(&self, handle: &ElementHandle) -> Result<&FakeElement, DriverError> {
        let idx = self.position(handle)?;
        Ok(&self.frame().elements[idx])
    }

    fn element_mut(&mut self, handle: &ElementHandle) -> Result<&mut FakeElement, DriverError> {
        let idx = self.position(handle)?;
        let current = self.current;
        Ok(&mut self.frames[current].elements[idx])
    }

    fn option_text(&self, handle: &ElementHandle) -> Result<String, DriverError> {
        let (owner, idx) =
            split_option_handle(handle).ok_or_else(|| DriverError::StaleElement(handle.0.clone()))?;
        let el = self.element(&ElementHandle(owner.to_string()))?;
        let options = match &el.kind {
            FakeKind::Select { options, .. } => options,
            FakeKind::Custom { options, .. } => options,
            FakeKind::Combobox { options, .. } => options,
            _ => return Err(DriverError::StaleElement(handle.0.clone())),
        };
        options
            .get(idx)
            .cloned()
            .ok_or_else(|| DriverError::StaleElement(handle.0.clone()))
    }

    fn submit(&mut self) {
        self.submits += 1;
        let current = self.current;
        match self.on_submit.clone() {
            SubmitBehavior::Confirm(message) => {
                self.frames[current].elements = vec![text("confirmation", &message)];
            }
            SubmitBehavior::RejectAndReset(messages) => {
                let elements = &mut self.frames[current].elements;
                clear_values(elements);
                for (i, msg) in messages.iter().enumerate() {
                    elements.push(FakeElement::new(&format!("error-{i}"), FakeKind::Error, msg));
                }
            }
            SubmitBehavior::Ignore => {}
        }
    }
}

#[async_trait]
impl DocumentDriver for FakeDocument {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        if state.fail_navigation {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                message: "net::ERR_NAME_NOT_RESOLVED".to_string(),
            });
        }
        state.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.lock().url.clone())
    }

    async fn frames(&self) -> Result<Vec<FrameRef>, DriverError> {
        let state = self.lock();
        Ok(state
            .frames
            .iter()
            .skip(1)
            .enumerate()
            .map(|(index, f)| FrameRef {
                index,
                name: f.name.clone(),
            })
            .collect())
    }

    async fn enter_frame(&self, frame: Option<&FrameRef>) -> Result<(), DriverError> {
        let mut state = self.lock();
        let target = frame.map(|f| f.index + 1).unwrap_or(0);
        if target >= state.frames.len() {
            return Err(DriverError::Protocol(format!("no such frame {target}")));
        }
        state.current = target;
        Ok(())
    }

    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        criteria: &Criteria,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let state = self.lock();
        let elements = &state.frame().elements;
        let handle = |e: &FakeElement| ElementHandle(e.id.clone());
        let filter = |pred: &dyn Fn(&FakeElement) -> bool| -> Vec<ElementHandle> {
            elements.iter().filter(|e| pred(e)).map(handle).collect()
        };

        let found = match criteria {
            Criteria::NativeSelects => filter(&|e| matches!(e.kind, FakeKind::Select { .. })),
            Criteria::TextEntries => filter(&|e| {
                matches!(&e.kind, FakeKind::Input { input_type, .. }
                    if matches!(input_type.as_str(), "text" | "email" | "tel" | "url" | "number" | "textarea"))
            }),
            Criteria::Comboboxes => filter(&|e| matches!(e.kind, FakeKind::Combobox { .. })),
            Criteria::Checkboxes => filter(&|e| matches!(e.kind, FakeKind::Checkbox { .. })),
            Criteria::Radios => filter(&|e| matches!(e.kind, FakeKind::Radio { .. })),
            Criteria::FileInputs => filter(
                &|e| matches!(&e.kind, FakeKind::Input { input_type, .. } if input_type == "file"),
            ),
            Criteria::Clickables => {
                filter(&|e| matches!(e.kind, FakeKind::Custom { .. } | FakeKind::Wrapper))
            }
            Criteria::FormControls => filter(&|e| {
                matches!(
                    e.kind,
                    FakeKind::Input { .. }
                        | FakeKind::Select { .. }
                        | FakeKind::Checkbox { .. }
                        | FakeKind::Radio { .. }
                        | FakeKind::Combobox { .. }
                        | FakeKind::Custom { .. }
                )
            }),
            Criteria::LabelFor(id) => filter(
                &|e| matches!(&e.kind, FakeKind::Label { for_id: Some(f) } if f == id),
            ),
            Criteria::PrecedingLabel | Criteria::PrecedingText => {
                let Some(scope) = scope else {
                    return Ok(vec![]);
                };
                let idx = state.position(scope)?;
                let labels_only = matches!(criteria, Criteria::PrecedingLabel);
                let limit = if labels_only { 1 } else { 5 };
                elements[..idx]
                    .iter()
                    .rev()
                    .filter(|e| match e.kind {
                        FakeKind::Label { .. } => true,
                        FakeKind::Text => !labels_only && !e.text.trim().is_empty(),
                        _ => false,
                    })
                    .take(limit)
                    .map(handle)
                    .collect()
            }
            Criteria::ById(id) => filter(&|e| &e.id == id),
            Criteria::Options => match scope {
                Some(scope) => option_handles(state.element(scope)?),
                None => elements.iter().flat_map(option_handles).collect(),
            },
            Criteria::SubmitControls => {
                filter(&|e| matches!(e.kind, FakeKind::Button { submit: true }))
            }
            Criteria::ButtonsWithText(t) => filter(&|e| {
                matches!(e.kind, FakeKind::Button { .. } | FakeKind::Link) && e.text.contains(t.as_str())
            }),
            Criteria::TextContaining(t) => filter(&|e| e.text.contains(t.as_str())),
            Criteria::ValidationMessages => filter(&|e| matches!(e.kind, FakeKind::Error)),
        };
        Ok(found)
    }

    async fn text(&self, element: &ElementHandle) -> Result<String, DriverError> {
        let state = self.lock();
        if split_option_handle(element).is_some() {
            return state.option_text(element);
        }
        let el = state.element(element)?;
        Ok(match &el.kind {
            FakeKind::Custom {
                placeholder,
                selected,
                ..
            } => selected.clone().unwrap_or_else(|| placeholder.clone()),
            FakeKind::Select { options, .. } => options.join("\n"),
            _ => el.text.clone(),
        })
    }

    async fn attr(&self, element: &ElementHandle, name: &str) -> Result<Option<String>, DriverError> {
        let state = self.lock();
        let el = state.element(element)?;
        if name == "id" {
            return Ok(Some(el.id.clone()));
        }
        if name == "for" {
            if let FakeKind::Label { for_id } = &el.kind {
                return Ok(for_id.clone());
            }
        }
        Ok(el.attrs.get(name).cloned())
    }

    async fn value(&self, element: &ElementHandle) -> Result<String, DriverError> {
        let state = self.lock();
        Ok(current_value(state.element(element)?))
    }

    async fn size(&self, element: &ElementHandle) -> Result<ElementSize, DriverError> {
        let state = self.lock();
        let el = state.element(element)?;
        Ok(ElementSize {
            width: 320.0,
            height: el.height,
        })
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        let mut state = self.lock();

        if let Some((owner, idx)) = split_option_handle(element) {
            let chosen = state.option_text(element)?;
            let owner = ElementHandle(owner.to_string());
            let el = state.element_mut(&owner)?;
            match &mut el.kind {
                FakeKind::Custom { selected, open, .. } => {
                    *selected = Some(chosen);
                    *open = false;
                }
                FakeKind::Combobox { value, open, .. } => {
                    *value = chosen;
                    *open = false;
                }
                FakeKind::Select { selected, .. } => *selected = Some(idx),
                _ => return Err(DriverError::NotInteractable(element.0.clone())),
            }
            return Ok(());
        }

        let radio_group = match &state.element(element)?.kind {
            FakeKind::Radio { .. } => state.element(element)?.attrs.get("name").cloned(),
            _ => None,
        };
        if let Some(name) = radio_group {
            let current = state.current;
            for el in state.frames[current].elements.iter_mut() {
                if let FakeKind::Radio { checked } = &mut el.kind {
                    if el.attrs.get("name") == Some(&name) {
                        *checked = el.id == element.0;
                    }
                }
            }
            return Ok(());
        }

        let effect = {
            let el = state.element_mut(element)?;
            match &mut el.kind {
                FakeKind::Custom {
                    open, ignore_clicks, ..
                } => {
                    if *ignore_clicks > 0 {
                        *ignore_clicks -= 1;
                    } else {
                        *open = !*open;
                    }
                    ClickEffect::None
                }
                FakeKind::Checkbox { checked } => {
                    *checked = !*checked;
                    ClickEffect::None
                }
                FakeKind::Button { submit: true } => ClickEffect::Submit,
                FakeKind::Button { submit: false } | FakeKind::Link
                    if el.text.contains("Apply") =>
                {
                    ClickEffect::Apply
                }
                _ => ClickEffect::None,
            }
        };

        match effect {
            ClickEffect::Submit => state.submit(),
            ClickEffect::Apply => {
                if let Some(form) = state.on_apply.take() {
                    state.frames[0].elements = form;
                    state.url = format!("{}/apply", state.url);
                }
            }
            ClickEffect::None => {}
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, v: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        let el = state.element_mut(element)?;
        match &mut el.kind {
            FakeKind::Input { value, .. } => *value = v.to_string(),
            FakeKind::Combobox { value, open, .. } => {
                *value = v.to_string();
                *open = true;
            }
            _ => return Err(DriverError::NotInteractable(element.0.clone())),
        }
        Ok(())
    }

    async fn select_option(&self, element: &ElementHandle, label: &str) -> Result<(), DriverError> {
        let mut state = self.lock();
        let el = state.element_mut(element)?;
        match &mut el.kind {
            FakeKind::Select { options, selected } => {
                let idx = options
                    .iter()
                    .position(|o| o.trim() == label.trim())
                    .ok_or_else(|| DriverError::OptionNotFound(label.to_string()))?;
                *selected = Some(idx);
                Ok(())
            }
            _ => Err(DriverError::NotInteractable(element.0.clone())),
        }
    }

    async fn upload(&self, element: &ElementHandle, path: &Path) -> Result<(), DriverError> {
        let mut state = self.lock();
        let el = state.element_mut(element)?;
        match &mut el.kind {
            FakeKind::Input { input_type, value } if input_type == "file" => {
                *value = path.to_string_lossy().to_string();
                Ok(())
            }
            _ => Err(DriverError::NotInteractable(element.0.clone())),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let mut state = self.lock();
        state.screenshots += 1;
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.lock().closed = true;
        Ok(())
    }
}

/// Factory that always hands out the same fake document.
pub struct FakeDriverFactory {
    pub document: FakeDocument,
    pub unavailable: bool,
}

impl FakeDriverFactory {
    pub fn new(document: FakeDocument) -> Self {
        Self {
            document,
            unavailable: false,
        }
    }
}

#[async_trait]
impl DriverFactory for FakeDriverFactory {
    async fn open(&self) -> Result<Box<dyn DocumentDriver>, DriverError> {
        if self.unavailable {
            return Err(DriverError::SessionUnavailable("no browsers free".to_string()));
        }
        Ok(Box::new(self.document.clone()))
    }
}
