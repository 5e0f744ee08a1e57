//! W3C WebDriver implementation of `DocumentDriver`.
//!
//! Talks plain HTTP/JSON to a chromedriver / geckodriver / Selenium endpoint.
//! Each `WebDriverSession` owns exactly one remote session, deleted on `close`.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::driver::{
    Criteria, DocumentDriver, DriverError, DriverFactory, ElementHandle, ElementSize, FrameRef,
};

/// W3C web element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Deserialize)]
struct WireResponse {
    value: Value,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireRect {
    width: f64,
    height: f64,
}

enum Locator {
    Css(String),
    XPath(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Factory
// ────────────────────────────────────────────────────────────────────────────

/// Opens a fresh remote browser session per attempt.
#[derive(Clone)]
pub struct WebDriverFactory {
    client: Client,
    base_url: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(base_url: String, headless: bool) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            headless,
        }
    }

    fn capabilities(&self) -> Value {
        let mut args = vec!["--window-size=1366,2000", "--disable-gpu"];
        if self.headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    async fn open(&self) -> Result<Box<dyn DocumentDriver>, DriverError> {
        let url = format!("{}/session", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&self.capabilities())
            .send()
            .await
            .map_err(|e| DriverError::SessionUnavailable(e.to_string()))?;

        let value = decode(response).await.map_err(|e| match e {
            DriverError::Protocol(msg) => DriverError::SessionUnavailable(msg),
            other => other,
        })?;

        let session_id = value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DriverError::SessionUnavailable("response carried no sessionId".to_string())
            })?
            .to_string();

        info!("WebDriver session {session_id} opened");

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            session_id,
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session
// ────────────────────────────────────────────────────────────────────────────

pub struct WebDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverSession {
    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, DriverError> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        debug!("WebDriver {method} {path}");

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        decode(request.send().await?).await
    }

    async fn get(&self, path: &str) -> Result<Value, DriverError> {
        self.command(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, DriverError> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn locate(
        &self,
        scope: Option<&ElementHandle>,
        locator: Locator,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let (using, value) = match locator {
            Locator::Css(s) => ("css selector", s),
            Locator::XPath(s) => ("xpath", s),
        };
        let path = match scope {
            Some(el) => format!("/element/{}/elements", el.0),
            None => "/elements".to_string(),
        };
        let found = self
            .post(&path, json!({ "using": using, "value": value }))
            .await?;

        Ok(found
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.get(ELEMENT_KEY).and_then(|id| id.as_str()))
                    .map(|id| ElementHandle(id.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl DocumentDriver for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.post("/url", json!({ "url": url }))
            .await
            .map(|_| ())
            .map_err(|e| DriverError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.get("/url").await?.as_str().unwrap_or_default().to_string())
    }

    async fn frames(&self) -> Result<Vec<FrameRef>, DriverError> {
        self.post("/frame", json!({ "id": null })).await?;
        let handles = self
            .locate(None, Locator::Css("iframe, frame".to_string()))
            .await?;

        let mut frames = Vec::with_capacity(handles.len());
        for (index, handle) in handles.iter().enumerate() {
            let name = match self.attr(handle, "id").await? {
                Some(id) if !id.is_empty() => Some(id),
                _ => self.attr(handle, "name").await?,
            };
            frames.push(FrameRef { index, name });
        }
        Ok(frames)
    }

    async fn enter_frame(&self, frame: Option<&FrameRef>) -> Result<(), DriverError> {
        self.post("/frame", json!({ "id": null })).await?;
        if let Some(frame) = frame {
            self.post("/frame", json!({ "id": frame.index })).await?;
        }
        Ok(())
    }

    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        criteria: &Criteria,
    ) -> Result<Vec<ElementHandle>, DriverError> {
        let mut found = self.locate(scope, locator_for(scope.is_some(), criteria)).await?;
        if matches!(criteria, Criteria::PrecedingText) {
            // XPath returns document order; callers want nearest first.
            found.reverse();
        }
        Ok(found)
    }

    async fn text(&self, element: &ElementHandle) -> Result<String, DriverError> {
        let value = self.get(&format!("/element/{}/text", element.0)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attr(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        let value = self
            .get(&format!("/element/{}/attribute/{}", element.0, name))
            .await?;
        Ok(value.as_str().map(String::from))
    }

    async fn value(&self, element: &ElementHandle) -> Result<String, DriverError> {
        let tag = self.get(&format!("/element/{}/name", element.0)).await?;
        if tag.as_str().is_some_and(|t| t.eq_ignore_ascii_case("select")) {
            let checked = self
                .locate(Some(element), Locator::Css("option:checked".to_string()))
                .await?;
            return match checked.first() {
                Some(option) => self.text(option).await,
                None => Ok(String::new()),
            };
        }
        let input_type = self.attr(element, "type").await?.unwrap_or_default();
        if input_type.eq_ignore_ascii_case("checkbox") || input_type.eq_ignore_ascii_case("radio") {
            let selected = self.get(&format!("/element/{}/selected", element.0)).await?;
            return Ok(if selected.as_bool().unwrap_or(false) {
                "true".to_string()
            } else {
                String::new()
            });
        }
        let value = self
            .get(&format!("/element/{}/property/value", element.0))
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn size(&self, element: &ElementHandle) -> Result<ElementSize, DriverError> {
        let value = self.get(&format!("/element/{}/rect", element.0)).await?;
        let rect: WireRect = serde_json::from_value(value)
            .map_err(|e| DriverError::Protocol(format!("bad rect payload: {e}")))?;
        Ok(ElementSize {
            width: rect.width,
            height: rect.height,
        })
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .await
            .map(|_| ())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))
            .await?;
        self.post(
            &format!("/element/{}/value", element.0),
            json!({ "text": value }),
        )
        .await
        .map(|_| ())
    }

    async fn select_option(&self, element: &ElementHandle, label: &str) -> Result<(), DriverError> {
        let xpath = format!(".//option[normalize-space(.)={}]", xpath_literal(label));
        let options = self.locate(Some(element), Locator::XPath(xpath)).await?;
        let option = options
            .first()
            .ok_or_else(|| DriverError::OptionNotFound(label.to_string()))?;
        self.click(option).await
    }

    async fn upload(&self, element: &ElementHandle, path: &std::path::Path) -> Result<(), DriverError> {
        self.post(
            &format!("/element/{}/value", element.0),
            json!({ "text": path.to_string_lossy() }),
        )
        .await
        .map(|_| ())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let encoded = self.get("/screenshot").await?;
        let encoded = encoded
            .as_str()
            .ok_or_else(|| DriverError::Protocol("screenshot payload was not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| DriverError::Protocol(format!("screenshot was not base64: {e}")))
    }

    async fn close(&self) -> Result<(), DriverError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        match decode(self.client.delete(&url).send().await?).await {
            Ok(_) => {
                info!("WebDriver session {} closed", self.session_id);
                Ok(())
            }
            Err(e) => {
                warn!("WebDriver session {} close failed: {e}", self.session_id);
                Err(e)
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ────────────────────────────────────────────────────────────────────────────

async fn decode(response: reqwest::Response) -> Result<Value, DriverError> {
    let status = response.status();
    let body: WireResponse = response.json().await?;

    if status.is_success() {
        return Ok(body.value);
    }

    let err: WireError = serde_json::from_value(body.value).unwrap_or(WireError {
        error: "unknown error".to_string(),
        message: format!("HTTP {status}"),
    });
    Err(map_wire_error(&err.error, err.message))
}

fn map_wire_error(code: &str, message: String) -> DriverError {
    match code {
        "stale element reference" | "no such element" => DriverError::StaleElement(message),
        "element not interactable" | "element click intercepted" => {
            DriverError::NotInteractable(message)
        }
        "session not created" | "invalid session id" => DriverError::SessionUnavailable(message),
        other => DriverError::Protocol(format!("{other}: {message}")),
    }
}

fn locator_for(scoped: bool, criteria: &Criteria) -> Locator {
    match criteria {
        Criteria::NativeSelects => Locator::Css("select".into()),
        Criteria::TextEntries => Locator::Css(
            "input[type='text']:not([role='combobox']), input[type='email'], input[type='tel'], \
             input[type='url'], input[type='number'], input:not([type]):not([role='combobox']), textarea"
                .into(),
        ),
        Criteria::Comboboxes => Locator::Css("input[role='combobox']".into()),
        Criteria::Checkboxes => Locator::Css("input[type='checkbox']".into()),
        Criteria::Radios => Locator::Css("input[type='radio']".into()),
        Criteria::FileInputs => Locator::Css("input[type='file']".into()),
        Criteria::Clickables => Locator::Css(
            "div[class*='select'], div[class*='control'], [role='button'], [role='listbox'], \
             [aria-haspopup='listbox']"
                .into(),
        ),
        Criteria::FormControls => {
            Locator::Css("input:not([type='hidden']), select, textarea".into())
        }
        Criteria::LabelFor(id) => Locator::XPath(format!("//label[@for={}]", xpath_literal(id))),
        Criteria::PrecedingLabel => Locator::XPath("preceding::label[1]".into()),
        Criteria::PrecedingText => Locator::XPath(
            "preceding::*[self::label or self::legend or self::p or self::span or self::div \
             or self::h3 or self::h4][normalize-space(text())!=''][position()<=5]"
                .into(),
        ),
        Criteria::ById(id) => Locator::XPath(format!("//*[@id={}]", xpath_literal(id))),
        Criteria::Options if scoped => Locator::XPath(".//option".into()),
        Criteria::Options => Locator::Css("[role='option']".into()),
        Criteria::SubmitControls => {
            Locator::Css("button[type='submit'], input[type='submit']".into())
        }
        Criteria::ButtonsWithText(text) => {
            let lit = xpath_literal(text);
            Locator::XPath(format!(
                "//button[contains(normalize-space(.), {lit})] | //a[contains(normalize-space(.), {lit})] \
                 | //input[@type='submit' and contains(@value, {lit})]"
            ))
        }
        Criteria::TextContaining(text) => Locator::XPath(format!(
            "//body//*[not(self::script) and not(self::style)][contains(normalize-space(text()), {})]",
            xpath_literal(text)
        )),
        Criteria::ValidationMessages => Locator::Css(
            ".field-error-msg, .error-message, .error, [class*='error']:not(.field), [role='alert']"
                .into(),
        ),
    }
}

/// Quotes a string as an XPath 1.0 literal, splitting on quotes when needed.
fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{s}'")
    } else if !s.contains('"') {
        format!("\"{s}\"")
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{p}'")).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}
