//! Run configuration and layered loading
//!
//! A config is built by merging defaults <- config file <- `DOCCHECK_CONFIG`
//! environment fragment <- CLI overrides, in increasing precedence, and is
//! immutable once execution starts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::model::ContextSpec;

/// Environment variable carrying a JSON config fragment.
pub const CONFIG_ENV_VAR: &str = "DOCCHECK_CONFIG";

/// Environment variable carrying a complete ResolvedTests document.
pub const RESOLVED_TESTS_ENV_VAR: &str = "DOCCHECK_RESOLVED_TESTS";

/// Config file names probed in the working directory.
pub const CONFIG_FILE_NAMES: &[&str] = &[".doccheck.json", ".doccheck.yaml", ".doccheck.yml"];

/// Run-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Files or directories to scan for tests
    #[serde(default = "default_input")]
    pub input: Vec<PathBuf>,

    /// Directory or file for the result document
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Recurse into directories when scanning input
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Base for resolving relative paths inside documents
    #[serde(default)]
    pub relative_path_base: PathBase,

    /// Default contexts for tests that declare none
    #[serde(default)]
    pub run_on: Vec<ContextSpec>,

    /// Detect steps from markup in addition to inline statements
    #[serde(default = "default_true")]
    pub detect_steps: bool,

    /// Execute steps marked unsafe
    #[serde(default)]
    pub allow_unsafe_steps: bool,

    /// Bounded concurrency for context executions
    #[serde(default)]
    pub concurrent_runners: Concurrency,

    /// Log level for the run
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Keep intermediate artifacts and verbose driver output
    #[serde(default)]
    pub debug: bool,

    /// Per-file-type statement and markup rules
    #[serde(default = "default_file_types")]
    pub file_types: Vec<FileTypeConfig>,

    /// External integration credentials
    #[serde(default)]
    pub integrations: Integrations,

    /// Path the config file was loaded from, if any
    #[serde(skip)]
    pub origin: Option<PathBuf>,
}

fn default_input() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_output() -> PathBuf {
    PathBuf::from(".")
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: default_input(),
            output: default_output(),
            recursive: true,
            relative_path_base: PathBase::default(),
            run_on: Vec::new(),
            detect_steps: true,
            allow_unsafe_steps: false,
            concurrent_runners: Concurrency::default(),
            log_level: default_log_level(),
            debug: false,
            file_types: default_file_types(),
            integrations: Integrations::default(),
            origin: None,
        }
    }
}

/// Base directory for resolving relative paths found in documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathBase {
    /// Relative to the process working directory
    #[default]
    Cwd,
    /// Relative to the file the path appeared in
    File,
}

/// Bounded concurrency: `true` resolves to `min(available CPUs, 4)`, an
/// integer is used as-is, omission implies serial execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Concurrency {
    Auto(bool),
    Fixed(usize),
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Fixed(1)
    }
}

impl Concurrency {
    /// Number of parallel context executions to allow.
    pub fn resolve(self) -> usize {
        match self {
            Concurrency::Auto(true) => {
                let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
                cpus.min(4)
            }
            Concurrency::Auto(false) => 1,
            Concurrency::Fixed(n) => n.max(1),
        }
    }
}

/// External integration credentials and endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrations {
    /// Reporting endpoint the result document is POSTed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporting: Option<ReportingConfig>,

    /// Orchestration API supplying a ResolvedTests document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationConfig>,

    /// CMS upload sink for output artifacts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms: Option<CmsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationConfig {
    pub url: String,
    pub account_id: String,
    pub token: String,

    /// Context id filter passed to the API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CmsConfig {
    pub base_url: String,
    pub api_key: String,
}

/// Statement and markup rules for one documentation file type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTypeConfig {
    pub name: String,

    /// Extensions matched against input files, without the leading dot
    pub extensions: Vec<String>,

    /// Inline statement patterns; each carries one capture group for its payload
    #[serde(default)]
    pub inline_statements: InlineStatements,

    /// Markup rules that turn document formatting into steps
    #[serde(default)]
    pub markup: Vec<MarkupRule>,
}

/// Patterns for the five inline statement kinds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineStatements {
    #[serde(default)]
    pub test_start: Vec<String>,
    #[serde(default)]
    pub test_end: Vec<String>,
    #[serde(default)]
    pub ignore_start: Vec<String>,
    #[serde(default)]
    pub ignore_end: Vec<String>,
    #[serde(default)]
    pub step: Vec<String>,
}

/// One markup-to-step rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupRule {
    pub name: String,

    /// Patterns; the first capture group is the content handed to actions
    pub regex: Vec<String>,

    /// Actions materialized for each match
    pub actions: Vec<MarkupAction>,

    /// Combine all matches of this rule in a file into one action invocation
    #[serde(default)]
    pub batch_matches: bool,
}

/// Either a literal action name (content becomes the action's simple-string
/// form) or a template object whose `$N` placeholders are substituted with
/// captured groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkupAction {
    Name(String),
    Template(Value),
}

impl Config {
    /// Load a config with full precedence:
    /// defaults <- file (explicit or discovered) <- env fragment <- overrides.
    pub fn load(explicit: Option<&Path>, overrides: Value) -> Result<Config> {
        let mut merged = serde_json::to_value(Config::default())?;

        let mut origin = None;
        if let Some((value, path)) = Self::read_config_file(explicit)? {
            tracing::debug!(config = %path.display(), "loaded config file");
            merge_values(&mut merged, value);
            origin = Some(path);
        }

        if let Ok(fragment) = std::env::var(CONFIG_ENV_VAR) {
            let value: Value = serde_json::from_str(&fragment).map_err(|e| {
                Error::InvalidConfig(format!("{CONFIG_ENV_VAR} is not valid JSON: {e}"))
            })?;
            if !value.is_object() {
                return Err(Error::InvalidConfig(format!(
                    "{CONFIG_ENV_VAR} must be a JSON object"
                )));
            }
            merge_values(&mut merged, value);
        }

        if overrides.is_object() {
            merge_values(&mut merged, overrides);
        }

        let mut config: Config = serde_json::from_value(merged)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.origin = origin;
        Ok(config)
    }

    /// Read the explicit config file, or discover one in the working directory.
    fn read_config_file(explicit: Option<&Path>) -> Result<Option<(Value, PathBuf)>> {
        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::InvalidConfig(format!(
                        "config file not found: {}",
                        p.display()
                    )));
                }
                Some(p.to_path_buf())
            }
            None => CONFIG_FILE_NAMES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists()),
        };

        match path {
            Some(path) => {
                let value = parse_document(&path)?;
                Ok(Some((value, path)))
            }
            None => Ok(None),
        }
    }

    /// The file type matching an input file's extension, if any.
    pub fn file_type_for(&self, path: &Path) -> Option<&FileTypeConfig> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.file_types
            .iter()
            .find(|ft| ft.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)))
    }
}

/// Parse a JSON or YAML document into a JSON value.
pub fn parse_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext.eq_ignore_ascii_case("json") {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Deep-merge `overlay` into `base`: objects merge key-wise, everything else
/// replaces.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay) => *base_slot = overlay,
    }
}

/// Built-in statement and markup rules for the supported documentation formats.
pub fn default_file_types() -> Vec<FileTypeConfig> {
    let comment_statements = InlineStatements {
        test_start: vec![
            r"(?s)<!--\s*test\s+start\s*(.*?)\s*-->".to_string(),
            r"\[comment\]:\s*#\s*\(test start\s*(.*?)\)".to_string(),
        ],
        test_end: vec![r"<!--\s*test\s+end\s*-->".to_string()],
        ignore_start: vec![r"<!--\s*test\s+ignore\s+start\s*-->".to_string()],
        ignore_end: vec![r"<!--\s*test\s+ignore\s+end\s*-->".to_string()],
        step: vec![r"(?s)<!--\s*step\s+(.*?)\s*-->".to_string()],
    };

    vec![
        FileTypeConfig {
            name: "markdown".to_string(),
            extensions: vec!["md".to_string(), "markdown".to_string(), "mdx".to_string()],
            inline_statements: comment_statements.clone(),
            markup: vec![
                MarkupRule {
                    name: "hyperlink".to_string(),
                    regex: vec![r"(?:^|[^!])\[[^\]]*\]\((https?://[^)\s]+)\)".to_string()],
                    actions: vec![MarkupAction::Name("checkLink".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "onscreenText".to_string(),
                    regex: vec![r"\*\*([^*\n]+)\*\*".to_string()],
                    actions: vec![MarkupAction::Name("find".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "shellCodeblock".to_string(),
                    regex: vec![r"(?s)```(?:bash|sh|shell)\r?\n(.*?)```".to_string()],
                    actions: vec![MarkupAction::Template(serde_json::json!({
                        "runShell": { "command": "$1" }
                    }))],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "keyboardInteractions".to_string(),
                    regex: vec![r"(?m)^\s*[-*]\s*press\s+([A-Za-z0-9+]+)\s*$".to_string()],
                    actions: vec![MarkupAction::Template(serde_json::json!({
                        "typeKeys": { "keys": ["$1"] }
                    }))],
                    batch_matches: true,
                },
            ],
        },
        FileTypeConfig {
            name: "asciidoc".to_string(),
            extensions: vec!["adoc".to_string(), "asciidoc".to_string()],
            inline_statements: InlineStatements {
                test_start: vec![r"(?m)^//\s*test\s+start\s*(.*)$".to_string()],
                test_end: vec![r"(?m)^//\s*test\s+end\s*$".to_string()],
                ignore_start: vec![r"(?m)^//\s*test\s+ignore\s+start\s*$".to_string()],
                ignore_end: vec![r"(?m)^//\s*test\s+ignore\s+end\s*$".to_string()],
                step: vec![r"(?m)^//\s*step\s+(.*)$".to_string()],
            },
            markup: vec![
                MarkupRule {
                    name: "hyperlink".to_string(),
                    regex: vec![r"link:(https?://[^\[\s]+)\[".to_string()],
                    actions: vec![MarkupAction::Name("checkLink".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "onscreenText".to_string(),
                    regex: vec![r"\*([^*\n]+)\*".to_string()],
                    actions: vec![MarkupAction::Name("find".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "shellCodeblock".to_string(),
                    regex: vec![
                        r"(?s)\[source,(?:bash|sh|shell)\]\s*\n----\r?\n(.*?)\n----".to_string(),
                    ],
                    actions: vec![MarkupAction::Template(serde_json::json!({
                        "runShell": { "command": "$1" }
                    }))],
                    batch_matches: false,
                },
            ],
        },
        FileTypeConfig {
            name: "html".to_string(),
            extensions: vec!["html".to_string(), "htm".to_string()],
            inline_statements: comment_statements,
            markup: vec![
                MarkupRule {
                    name: "hyperlink".to_string(),
                    regex: vec![r#"<a[^>]+href="(https?://[^"]+)""#.to_string()],
                    actions: vec![MarkupAction::Name("checkLink".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "onscreenText".to_string(),
                    regex: vec![r"(?s)<(?:b|strong)>(.*?)</(?:b|strong)>".to_string()],
                    actions: vec![MarkupAction::Name("find".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "shellCodeblock".to_string(),
                    regex: vec![r"(?s)<pre><code[^>]*>(.*?)</code></pre>".to_string()],
                    actions: vec![MarkupAction::Template(serde_json::json!({
                        "runShell": { "command": "$1" }
                    }))],
                    batch_matches: false,
                },
            ],
        },
        FileTypeConfig {
            name: "dita".to_string(),
            extensions: vec!["dita".to_string(), "ditamap".to_string(), "xml".to_string()],
            inline_statements: InlineStatements {
                test_start: vec![r"(?s)<!--\s*test\s+start\s*(.*?)\s*-->".to_string()],
                test_end: vec![r"<!--\s*test\s+end\s*-->".to_string()],
                ignore_start: vec![r"<!--\s*test\s+ignore\s+start\s*-->".to_string()],
                ignore_end: vec![r"<!--\s*test\s+ignore\s+end\s*-->".to_string()],
                step: vec![r"(?s)<!--\s*step\s+(.*?)\s*-->".to_string()],
            },
            markup: vec![
                MarkupRule {
                    name: "hyperlink".to_string(),
                    regex: vec![r#"<xref[^>]+href="(https?://[^"]+)""#.to_string()],
                    actions: vec![MarkupAction::Name("checkLink".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "onscreenText".to_string(),
                    regex: vec![r"(?s)<uicontrol>(.*?)</uicontrol>".to_string()],
                    actions: vec![MarkupAction::Name("find".to_string())],
                    batch_matches: false,
                },
                MarkupRule {
                    name: "shellCodeblock".to_string(),
                    regex: vec![r"(?s)<codeblock[^>]*>(.*?)</codeblock>".to_string()],
                    actions: vec![MarkupAction::Template(serde_json::json!({
                        "runShell": { "command": "$1" }
                    }))],
                    batch_matches: false,
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_serial_concurrency() {
        let config = Config::default();
        assert_eq!(config.concurrent_runners.resolve(), 1);
    }

    #[test]
    fn concurrency_auto_is_bounded() {
        let auto = Concurrency::Auto(true).resolve();
        assert!(auto >= 1 && auto <= 4);
        assert_eq!(Concurrency::Auto(false).resolve(), 1);
        assert_eq!(Concurrency::Fixed(7).resolve(), 7);
        assert_eq!(Concurrency::Fixed(0).resolve(), 1);
    }

    #[test]
    fn concurrency_parses_bool_and_int() {
        let auto: Concurrency = serde_json::from_str("true").unwrap();
        assert_eq!(auto, Concurrency::Auto(true));
        let fixed: Concurrency = serde_json::from_str("3").unwrap();
        assert_eq!(fixed, Concurrency::Fixed(3));
    }

    #[test]
    fn merge_values_deep_merges_objects() {
        let mut base = serde_json::json!({
            "output": ".",
            "integrations": { "reporting": { "url": "a", "apiKey": "k" } }
        });
        merge_values(
            &mut base,
            serde_json::json!({
                "output": "results",
                "integrations": { "orchestration": { "url": "b", "accountId": "x", "token": "t" } }
            }),
        );
        assert_eq!(base["output"], "results");
        assert_eq!(base["integrations"]["reporting"]["url"], "a");
        assert_eq!(base["integrations"]["orchestration"]["url"], "b");
    }

    #[test]
    fn file_type_lookup_is_case_insensitive() {
        let config = Config::default();
        assert_eq!(config.file_type_for(Path::new("guide.MD")).unwrap().name, "markdown");
        assert_eq!(config.file_type_for(Path::new("topic.dita")).unwrap().name, "dita");
        assert!(config.file_type_for(Path::new("notes.txt")).is_none());
    }

    #[test]
    fn load_applies_override_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "recursive": false, "logLevel": "debug" }"#).unwrap();

        let config =
            Config::load(Some(&path), serde_json::json!({ "logLevel": "warn" })).unwrap();
        assert!(!config.recursive);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.origin.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let err = Config::load(Some(Path::new("/nonexistent/config.json")), Value::Null)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
