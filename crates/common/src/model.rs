//! Core data model: specs, tests, steps, and execution contexts
//!
//! Documents are validated as JSON against the schema registry before being
//! parsed into these types, so serde failures here indicate a schema gap,
//! not a user input problem.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::generate_id;

fn generate_spec_id() -> String {
    generate_id("spec")
}

fn generate_test_id() -> String {
    generate_id("test")
}

fn generate_step_id() -> String {
    generate_id("step")
}

fn default_true() -> bool {
    true
}

/// One or many values, accepted interchangeably in declared documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    /// Flatten into a list.
    pub fn to_vec(&self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v.clone()],
            OneOrMany::Many(vs) => vs.clone(),
        }
    }
}

/// A named collection of tests sharing a source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// Unique id for this spec
    #[serde(default = "generate_spec_id")]
    pub spec_id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Source file this spec was loaded or detected from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    /// Contexts to run on, overriding config-level contexts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_on: Vec<ContextSpec>,

    /// Tests owned by this spec
    #[serde(default)]
    pub tests: Vec<Test>,
}

/// An ordered sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    /// Unique id for this test
    #[serde(default = "generate_test_id")]
    pub test_id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether markup-based step detection applies to this test
    #[serde(default = "default_true")]
    pub detect_steps: bool,

    /// Contexts to run on, overriding spec- and config-level contexts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_on: Vec<ContextSpec>,

    /// Path to a spec executed before this test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<PathBuf>,

    /// Path to a spec executed after this test
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<PathBuf>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One executable action plus optional post-execution variable captures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique id for this step
    #[serde(default = "generate_step_id")]
    pub step_id: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Per-step timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Steps marked unsafe are skipped unless the config allows them
    #[serde(rename = "unsafe", default)]
    pub unsafe_: bool,

    /// Number of re-executions before the step is scored
    #[serde(default)]
    pub retries: u32,

    /// Variables captured after the action completes (name -> expression)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,

    /// The action to perform
    #[serde(flatten)]
    pub action: Action,
}

/// The closed set of step actions.
///
/// Adding an action means adding a variant here, a handler in the execution
/// engine, and a property in the step schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    GoTo(GoTo),
    Find(Find),
    HttpRequest(HttpRequest),
    RunShell(RunShell),
    RunCode(RunCode),
    TypeKeys(TypeKeys),
    Screenshot(Screenshot),
    Record(Record),
    StopRecord(StopRecord),
    Wait(Wait),
    CheckLink(CheckLink),
    LoadVariables(LoadVariables),
}

impl Action {
    /// Canonical action name as it appears in documents.
    pub fn name(&self) -> &'static str {
        match self {
            Action::GoTo(_) => "goTo",
            Action::Find(_) => "find",
            Action::HttpRequest(_) => "httpRequest",
            Action::RunShell(_) => "runShell",
            Action::RunCode(_) => "runCode",
            Action::TypeKeys(_) => "typeKeys",
            Action::Screenshot(_) => "screenshot",
            Action::Record(_) => "record",
            Action::StopRecord(_) => "stopRecord",
            Action::Wait(_) => "wait",
            Action::CheckLink(_) => "checkLink",
            Action::LoadVariables(_) => "loadVariables",
        }
    }

    /// Whether this action requires a browser session.
    pub fn needs_browser(&self) -> bool {
        matches!(
            self,
            Action::GoTo(_)
                | Action::Find(_)
                | Action::TypeKeys(_)
                | Action::Screenshot(_)
                | Action::Record(_)
                | Action::StopRecord(_)
        )
    }
}

/// Navigate the browser to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GoTo {
    Url(String),
    Detailed {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },
}

impl GoTo {
    pub fn url(&self) -> &str {
        match self {
            GoTo::Url(u) => u,
            GoTo::Detailed { url, .. } => url,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            GoTo::Url(_) => None,
            GoTo::Detailed { origin, .. } => origin.as_deref(),
        }
    }
}

/// Locate an element, optionally asserting its text and interacting with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Find {
    Selector(String),
    Detailed(FindDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindDetail {
    pub selector: String,

    /// Milliseconds to wait for the element to appear
    #[serde(default = "default_find_timeout")]
    pub timeout: u64,

    /// Expected element text (exact match)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,

    /// Move the pointer to the element after finding it
    #[serde(default)]
    pub move_to: bool,

    /// Click the element after finding it
    #[serde(default)]
    pub click: bool,

    /// Keys to send to the element after finding it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_keys: Option<OneOrMany<String>>,
}

fn default_find_timeout() -> u64 {
    5000
}

impl Find {
    pub fn detail(&self) -> FindDetail {
        match self {
            Find::Selector(s) => FindDetail {
                selector: s.clone(),
                timeout: default_find_timeout(),
                element_text: None,
                move_to: false,
                click: false,
                type_keys: None,
            },
            Find::Detailed(d) => d.clone(),
        }
    }
}

/// Perform an HTTP request and score the response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HttpRequest {
    Url(String),
    Detailed(HttpRequestDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestDetail {
    pub request: RequestSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    pub url: String,

    #[serde(default = "default_method")]
    pub method: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "get".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSpec {
    /// Accepted response status codes
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,

    /// Headers the response must include
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// JSON value the response body must contain (subset match)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

fn default_status_codes() -> Vec<u16> {
    vec![200]
}

impl Default for ResponseSpec {
    fn default() -> Self {
        ResponseSpec {
            status_codes: default_status_codes(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

impl HttpRequest {
    pub fn detail(&self) -> HttpRequestDetail {
        match self {
            HttpRequest::Url(u) => HttpRequestDetail {
                request: RequestSpec {
                    url: u.clone(),
                    method: default_method(),
                    headers: BTreeMap::new(),
                    body: None,
                },
                response: None,
            },
            HttpRequest::Detailed(d) => d.clone(),
        }
    }
}

/// Run a shell command, optionally comparing its output to a baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunShell {
    Command(String),
    Detailed(RunShellDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunShellDetail {
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    /// Accepted exit codes
    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i32>,

    /// Substring the combined output must contain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Baseline file for regression comparison of the output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Allowed output variation as a fraction (0.0 - 1.0)
    #[serde(default = "default_max_variation")]
    pub max_variation: f64,

    /// When to replace the stored baseline
    #[serde(default)]
    pub overwrite: OverwriteMode,
}

fn default_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_max_variation() -> f64 {
    0.05
}

impl RunShell {
    pub fn detail(&self) -> RunShellDetail {
        match self {
            RunShell::Command(c) => RunShellDetail {
                command: c.clone(),
                working_directory: None,
                exit_codes: default_exit_codes(),
                output: None,
                path: None,
                max_variation: default_max_variation(),
                overwrite: OverwriteMode::default(),
            },
            RunShell::Detailed(d) => d.clone(),
        }
    }
}

/// Run a snippet of code through a language interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCode {
    pub language: CodeLanguage,
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,

    #[serde(default = "default_exit_codes")]
    pub exit_codes: Vec<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_variation")]
    pub max_variation: f64,

    #[serde(default)]
    pub overwrite: OverwriteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Bash,
    Python,
    Javascript,
}

impl CodeLanguage {
    /// Interpreter binary for this language.
    pub fn interpreter(self) -> &'static str {
        match self {
            CodeLanguage::Bash => "bash",
            CodeLanguage::Python => "python3",
            CodeLanguage::Javascript => "node",
        }
    }
}

/// Send keystrokes to the active element.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeKeys {
    Keys(OneOrMany<String>),
    Detailed { keys: OneOrMany<String> },
}

impl TypeKeys {
    pub fn keys(&self) -> Vec<String> {
        match self {
            TypeKeys::Keys(k) => k.to_vec(),
            TypeKeys::Detailed { keys } => keys.to_vec(),
        }
    }
}

/// Capture a screenshot and compare it to a stored baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Screenshot {
    Path(String),
    Detailed(ScreenshotDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotDetail {
    /// Baseline path; generated from the step id when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Allowed pixel variation as a fraction (0.0 - 1.0)
    #[serde(default = "default_max_variation")]
    pub max_variation: f64,

    /// When to replace the stored baseline
    #[serde(default)]
    pub overwrite: OverwriteMode,

    /// Integration descriptor offered to the upload boundary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_integration: Option<String>,
}

impl Screenshot {
    pub fn detail(&self) -> ScreenshotDetail {
        match self {
            Screenshot::Path(p) => ScreenshotDetail {
                path: Some(PathBuf::from(p)),
                max_variation: default_max_variation(),
                overwrite: OverwriteMode::default(),
                source_integration: None,
            },
            Screenshot::Detailed(d) => d.clone(),
        }
    }
}

/// Start recording the browser session to a video file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Record {
    Path(String),
    Detailed { path: PathBuf },
}

impl Record {
    pub fn path(&self) -> PathBuf {
        match self {
            Record::Path(p) => PathBuf::from(p),
            Record::Detailed { path } => path.clone(),
        }
    }
}

/// Stop an in-progress recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopRecord {
    Flag(bool),
    Detailed {},
}

/// Pause for a fixed duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Wait {
    Millis(u64),
    Detailed {
        #[serde(default = "default_wait_duration")]
        duration: u64,
    },
}

fn default_wait_duration() -> u64 {
    500
}

impl Wait {
    pub fn duration(&self) -> u64 {
        match self {
            Wait::Millis(ms) => *ms,
            Wait::Detailed { duration } => *duration,
        }
    }
}

/// Check that a link resolves to an accepted status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckLink {
    Url(String),
    Detailed(CheckLinkDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckLinkDetail {
    pub url: String,

    #[serde(default = "default_link_status_codes")]
    pub status_codes: Vec<u16>,

    /// Origin prepended to relative URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

fn default_link_status_codes() -> Vec<u16> {
    vec![200, 301, 302]
}

impl CheckLink {
    pub fn detail(&self) -> CheckLinkDetail {
        match self {
            CheckLink::Url(u) => CheckLinkDetail {
                url: u.clone(),
                status_codes: default_link_status_codes(),
                origin: None,
            },
            CheckLink::Detailed(d) => d.clone(),
        }
    }
}

/// Load variables from a KEY=VALUE file into the runtime context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoadVariables {
    Path(String),
    Detailed { path: PathBuf },
}

impl LoadVariables {
    pub fn path(&self) -> PathBuf {
        match self {
            LoadVariables::Path(p) => PathBuf::from(p),
            LoadVariables::Detailed { path } => path.clone(),
        }
    }
}

/// When to replace a stored regression baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverwriteMode {
    #[serde(rename = "false")]
    #[default]
    Never,
    #[serde(rename = "true")]
    Always,
    #[serde(rename = "aboveVariation")]
    AboveVariation,
}

/// Execution platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Mac,
    Windows,
}

impl Platform {
    /// The platform this process is running on.
    pub fn current() -> Platform {
        if cfg!(target_os = "macos") {
            Platform::Mac
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
        }
    }
}

/// Supported browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserName {
    Firefox,
    Chrome,
    Safari,
    Edge,
}

impl BrowserName {
    pub fn as_str(self) -> &'static str {
        match self {
            BrowserName::Firefox => "firefox",
            BrowserName::Chrome => "chrome",
            BrowserName::Safari => "safari",
            BrowserName::Edge => "edge",
        }
    }

    /// All browsers the resolver may probe for.
    pub fn all() -> [BrowserName; 4] {
        [BrowserName::Firefox, BrowserName::Chrome, BrowserName::Safari, BrowserName::Edge]
    }
}

/// A declared, possibly abstract execution context.
///
/// Either field may be omitted or carry multiple values; resolution expands
/// the declaration into concrete contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<OneOrMany<Platform>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserSpec>,
}

/// Browser declaration within a context: a bare name or a detailed object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BrowserSpec {
    Name(BrowserName),
    Detailed(BrowserSpecDetail),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSpecDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<OneOrMany<BrowserName>>,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

/// Outer browser window size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub width: u32,
    pub height: u32,
}

impl Default for Window {
    fn default() -> Self {
        Window { width: 1200, height: 800 }
    }
}

/// Inner page viewport size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// A concrete execution target: resolved platform plus, for browser-based
/// tests, a resolved browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub platform: Platform,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    pub name: BrowserName,

    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub window: Window,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

impl Context {
    /// Short human-readable label, e.g. `linux/firefox` or `linux`.
    pub fn label(&self) -> String {
        match &self.browser {
            Some(b) => format!("{}/{}", self.platform.as_str(), b.name.as_str()),
            None => self.platform.as_str().to_string(),
        }
    }
}

/// The fully expanded artifact handed to the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTests {
    pub config: crate::config::Config,
    pub specs: Vec<ResolvedSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSpec {
    pub spec_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    pub tests: Vec<ResolvedTest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTest {
    pub test_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Concrete contexts this test executes in
    pub contexts: Vec<Context>,

    pub steps: Vec<Step>,
}
