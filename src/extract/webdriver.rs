use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace};
use reqwest::blocking::Client;
use serde_json::{json, Value};

use super::rendered::{BrowserSession, ElementId, RenderError, Renderer};
use crate::config::{FetchConfig, RenderConfig};
use crate::error::FundPulseError;

/// W3C web element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Slack on top of the page-load timeout for the HTTP round trip to the driver
const CLIENT_SLACK: Duration = Duration::from_secs(30);

/// [`Renderer`] speaking the W3C WebDriver protocol to chromedriver,
/// geckodriver or a Selenium endpoint
pub struct WebDriverRenderer {
    client: Client,
    endpoint: String,
    user_agent: String,
}

impl WebDriverRenderer {
    pub fn new(render: &RenderConfig, fetch: &FetchConfig) -> Result<Self, FundPulseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(render.navigation_timeout_secs) + CLIENT_SLACK)
            .connect_timeout(Duration::from_secs(fetch.connect_timeout_secs))
            .build()?;

        Ok(WebDriverRenderer {
            client,
            endpoint: render.webdriver_url.trim_end_matches('/').to_string(),
            user_agent: fetch.user_agent.clone(),
        })
    }
}

fn capabilities(user_agent: &str) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "pageLoadStrategy": "normal"
            },
            "firstMatch": [
                {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--disable-gpu",
                            "--no-sandbox",
                            format!("--user-agent={}", user_agent)
                        ]
                    }
                },
                {
                    "browserName": "firefox",
                    "moz:firefoxOptions": {
                        "args": ["-headless"],
                        "prefs": { "general.useragent.override": user_agent }
                    }
                }
            ]
        }
    })
}

impl Renderer for WebDriverRenderer {
    fn open_session(&self) -> Result<Box<dyn BrowserSession>, RenderError> {
        let reply = send(
            self.client
                .post(format!("{}/session", self.endpoint))
                .json(&capabilities(&self.user_agent)),
        )?;

        let session_id = match reply {
            Reply::Value(value) => value
                .get("sessionId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| RenderError::Protocol("New session reply has no sessionId".to_string()))?,
            Reply::NoSuchElement => {
                return Err(RenderError::Protocol("Unexpected reply to new session".to_string()))
            }
        };

        debug!("Opened WebDriver session {}", session_id);

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }
}

struct WebDriverSession {
    client: Client,
    base: String,
}

impl WebDriverSession {
    fn post(&self, path: &str, body: Value) -> Result<Reply, RenderError> {
        trace!("WebDriver POST {}{}", self.base, path);
        send(self.client.post(format!("{}{}", self.base, path)).json(&body))
    }

    fn get(&self, path: &str) -> Result<Reply, RenderError> {
        trace!("WebDriver GET {}{}", self.base, path);
        send(self.client.get(format!("{}{}", self.base, path)))
    }

    fn find(&self, path: &str, css: &str) -> Result<Option<ElementId>, RenderError> {
        match self.post(path, locator(css))? {
            Reply::Value(value) => element_id(&value).map(Some),
            Reply::NoSuchElement => Ok(None),
        }
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.post("/timeouts", json!({ "pageLoad": millis }))?;
        self.post("/url", json!({ "url": url }))?;
        Ok(())
    }

    fn wait_for_selector(&self, css: &str, timeout: Duration) -> Result<ElementId, RenderError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.query_selector(css)? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(RenderError::Timeout(format!(
                    "waiting for selector '{}' exceeded {}ms",
                    css,
                    timeout.as_millis()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn query_selector(&self, css: &str) -> Result<Option<ElementId>, RenderError> {
        self.find("/element", css)
    }

    fn query_selector_all(&self, css: &str) -> Result<Vec<ElementId>, RenderError> {
        match self.post("/elements", locator(css))? {
            Reply::Value(Value::Array(items)) => items.iter().map(element_id).collect(),
            Reply::Value(other) => Err(RenderError::Protocol(format!(
                "Expected element list, got {}",
                other
            ))),
            Reply::NoSuchElement => Ok(Vec::new()),
        }
    }

    fn query_child(&self, parent: &ElementId, css: &str) -> Result<Option<ElementId>, RenderError> {
        self.find(&format!("/element/{}/element", parent.0), css)
    }

    fn inner_text(&self, element: &ElementId) -> Result<String, RenderError> {
        match self.get(&format!("/element/{}/text", element.0))? {
            Reply::Value(Value::String(text)) => Ok(text),
            Reply::Value(Value::Null) | Reply::NoSuchElement => Ok(String::new()),
            Reply::Value(other) => Ok(other.to_string()),
        }
    }

    fn close(&self) -> Result<(), RenderError> {
        trace!("WebDriver DELETE {}", self.base);
        send(self.client.delete(&self.base))?;
        Ok(())
    }
}

enum Reply {
    Value(Value),
    NoSuchElement,
}

fn locator(css: &str) -> Value {
    json!({ "using": "css selector", "value": css })
}

fn send(request: reqwest::blocking::RequestBuilder) -> Result<Reply, RenderError> {
    let response = request.send().map_err(transport_error)?;
    let body: Value = response.json().map_err(transport_error)?;
    parse_reply(body)
}

fn transport_error(err: reqwest::Error) -> RenderError {
    if err.is_timeout() {
        RenderError::Timeout(err.to_string())
    } else {
        RenderError::Protocol(err.to_string())
    }
}

/// Unwrap a WebDriver `{"value": ...}` envelope, mapping protocol errors
fn parse_reply(mut body: Value) -> Result<Reply, RenderError> {
    let value = body
        .get_mut("value")
        .map(Value::take)
        .ok_or_else(|| RenderError::Protocol(format!("Malformed WebDriver reply: {}", body)))?;

    let error = value.get("error").and_then(Value::as_str);
    match error {
        None => Ok(Reply::Value(value)),
        Some("no such element") => Ok(Reply::NoSuchElement),
        Some(code) => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let text = format!("{}: {}", code, message);
            match code {
                "timeout" | "script timeout" => Err(RenderError::Timeout(text)),
                _ => Err(RenderError::Protocol(text)),
            }
        }
    }
}

fn element_id(value: &Value) -> Result<ElementId, RenderError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementId(id.to_string()))
        .ok_or_else(|| RenderError::Protocol(format!("Not a web element: {}", value)))
}
