//! Automation driver boundary
//!
//! The engine consumes browser automation through the small [`Session`]
//! trait: navigate, find, read text, click, send keys, screenshot, window
//! rect, delete session. The default implementation speaks the WebDriver
//! session protocol to a driver process spawned per context.

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use doccheck_common::model::{BrowserConfig, BrowserName};
use doccheck_common::{Error, Result};

/// W3C WebDriver element identifier key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// One live automation session bound to a context.
#[async_trait]
pub trait Session: Send {
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Locate an element by CSS selector, returning an opaque element id.
    async fn find_element(&mut self, selector: &str) -> Result<String>;

    async fn element_text(&mut self, element: &str) -> Result<String>;

    async fn click(&mut self, element: &str) -> Result<()>;

    /// Send keys to an element, or to the active element when none given.
    async fn send_keys(&mut self, element: Option<&str>, keys: &[String]) -> Result<()>;

    async fn move_to(&mut self, element: &str) -> Result<()>;

    /// Capture the viewport as PNG bytes.
    async fn screenshot(&mut self) -> Result<Vec<u8>>;

    async fn set_window_rect(&mut self, width: u32, height: u32) -> Result<()>;

    async fn start_recording(&mut self, _path: &Path) -> Result<()> {
        Err(Error::Session("recording is not supported by this driver".to_string()))
    }

    async fn stop_recording(&mut self) -> Result<()> {
        Err(Error::Session("recording is not supported by this driver".to_string()))
    }

    /// Delete the session. Must be idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// The WebDriver binary serving a browser, if one is known.
pub fn driver_binary(browser: BrowserName) -> &'static str {
    match browser {
        BrowserName::Firefox => "geckodriver",
        BrowserName::Chrome => "chromedriver",
        BrowserName::Edge => "msedgedriver",
        BrowserName::Safari => "safaridriver",
    }
}

/// Whether the driver binary for a browser responds on this machine.
pub fn driver_available(browser: BrowserName) -> bool {
    Command::new(driver_binary(browser))
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Handle to a spawned WebDriver process.
pub struct DriverProcess {
    child: Child,
    pub base_url: String,
    pub port: u16,
    stopped: bool,
}

impl DriverProcess {
    /// Spawn the driver for a browser on a free port and wait for its
    /// status endpoint to become ready.
    pub async fn spawn(browser: BrowserName, debug_output: bool) -> Result<Self> {
        if !driver_available(browser) {
            return Err(Error::DriverNotFound(driver_binary(browser).to_string()));
        }

        let port = find_free_port()?;
        let base_url = format!("http://127.0.0.1:{port}");
        let binary = driver_binary(browser);

        info!("spawning {binary} on port {port}");
        let mut cmd = Command::new(binary);
        match browser {
            BrowserName::Firefox => {
                cmd.arg("--port").arg(port.to_string());
            }
            BrowserName::Chrome | BrowserName::Edge => {
                cmd.arg(format!("--port={port}"));
            }
            BrowserName::Safari => {
                cmd.arg("-p").arg(port.to_string());
            }
        }
        if !debug_output {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::Session(format!("failed to spawn {binary}: {e}")))?;

        let handle = DriverProcess { child, base_url, port, stopped: false };
        handle.wait_for_ready(Duration::from_secs(15)).await?;
        Ok(handle)
    }

    /// Poll the driver's status endpoint until it responds.
    async fn wait_for_ready(&self, timeout: Duration) -> Result<()> {
        let status_url = format!("{}/status", self.base_url);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            match client.get(&status_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => debug!("driver status returned {}", resp.status()),
                Err(e) => {
                    // Connection refused is expected while the driver starts
                    if !e.is_connect() {
                        warn!("driver status error: {e}");
                    }
                }
            }
            sleep(Duration::from_millis(100)).await;
        }

        Err(Error::Session(format!(
            "driver on port {} did not become ready within {:?}",
            self.port, timeout
        )))
    }

    /// Stop the driver process. Idempotent; repeated calls do nothing.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("stopping driver (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(200));
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

fn find_free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// WebDriver protocol session over HTTP.
pub struct WebDriverSession {
    http: reqwest::Client,
    base: String,
    session_id: String,
    closed: bool,
}

impl WebDriverSession {
    /// Create a new session against a running driver.
    pub async fn create(driver: &DriverProcess, browser: &BrowserConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;

        let capabilities = Self::capabilities(browser);
        let response: Value = http
            .post(format!("{}/session", driver.base_url))
            .json(&json!({ "capabilities": { "alwaysMatch": capabilities } }))
            .send()
            .await?
            .json()
            .await?;

        let session_id = response
            .pointer("/value/sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Session(format!("driver refused session: {response}"))
            })?
            .to_string();

        let mut session = WebDriverSession {
            http,
            base: format!("{}/session/{}", driver.base_url, session_id),
            session_id,
            closed: false,
        };

        let window = browser.window;
        session.set_window_rect(window.width, window.height).await?;
        Ok(session)
    }

    fn capabilities(browser: &BrowserConfig) -> Value {
        match browser.name {
            BrowserName::Firefox => {
                let mut args = Vec::new();
                if browser.headless {
                    args.push("-headless");
                }
                json!({
                    "browserName": "firefox",
                    "moz:firefoxOptions": { "args": args }
                })
            }
            BrowserName::Chrome => {
                let mut args = vec!["--no-sandbox", "--disable-gpu"];
                if browser.headless {
                    args.push("--headless=new");
                }
                json!({
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                })
            }
            BrowserName::Edge => {
                let mut args = Vec::new();
                if browser.headless {
                    args.push("--headless=new");
                }
                json!({
                    "browserName": "MicrosoftEdge",
                    "ms:edgeOptions": { "args": args }
                })
            }
            BrowserName::Safari => json!({ "browserName": "safari" }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response: Value = self
            .http
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_value(response)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response: Value = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await?
            .json()
            .await?;
        Self::unwrap_value(response)
    }

    /// WebDriver responses wrap payloads in `value`; protocol errors carry
    /// an `error` field there.
    fn unwrap_value(response: Value) -> Result<Value> {
        let value = response.get("value").cloned().unwrap_or(Value::Null);
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or(error);
            return Err(Error::Session(format!("{error}: {message}")));
        }
        Ok(value)
    }

    fn element_id(value: &Value) -> Result<String> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Session(format!("no element reference in response: {value}")))
    }
}

#[async_trait]
impl Session for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn find_element(&mut self, selector: &str) -> Result<String> {
        let value = self
            .post("/element", json!({ "using": "css selector", "value": selector }))
            .await?;
        Self::element_id(&value)
    }

    async fn element_text(&mut self, element: &str) -> Result<String> {
        let value = self.get(&format!("/element/{element}/text")).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn click(&mut self, element: &str) -> Result<()> {
        self.post(&format!("/element/{element}/click"), json!({})).await?;
        Ok(())
    }

    async fn send_keys(&mut self, element: Option<&str>, keys: &[String]) -> Result<()> {
        let text = keys.join("");
        let target = match element {
            Some(el) => el.to_string(),
            None => {
                let value = self.get("/element/active").await?;
                Self::element_id(&value)?
            }
        };
        self.post(&format!("/element/{target}/value"), json!({ "text": text })).await?;
        Ok(())
    }

    async fn move_to(&mut self, element: &str) -> Result<()> {
        self.post(
            "/actions",
            json!({
                "actions": [{
                    "type": "pointer",
                    "id": "mouse",
                    "actions": [{
                        "type": "pointerMove",
                        "origin": { ELEMENT_KEY: element },
                        "x": 0,
                        "y": 0
                    }]
                }]
            }),
        )
        .await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>> {
        let value = self.get("/screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| Error::Session("screenshot response was not a string".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| Error::Session(format!("screenshot decode failed: {e}")))
    }

    async fn set_window_rect(&mut self, width: u32, height: u32) -> Result<()> {
        self.post("/window/rect", json!({ "width": width, "height": height })).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let response = self.http.delete(self.base.clone()).send().await;
        if let Err(e) = response {
            debug!("session delete failed (already gone?): {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_binaries_are_mapped() {
        assert_eq!(driver_binary(BrowserName::Firefox), "geckodriver");
        assert_eq!(driver_binary(BrowserName::Chrome), "chromedriver");
    }

    #[test]
    fn free_port_is_usable() {
        let port = find_free_port().unwrap();
        assert!(port > 1024);
    }

    #[test]
    fn webdriver_error_payload_becomes_session_error() {
        let response = json!({
            "value": { "error": "no such element", "message": "missing .button" }
        });
        let err = WebDriverSession::unwrap_value(response).unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert!(err.to_string().contains("no such element"));
    }

    #[test]
    fn element_reference_is_extracted() {
        let value = json!({ ELEMENT_KEY: "abc-123" });
        assert_eq!(WebDriverSession::element_id(&value).unwrap(), "abc-123");
    }
}
