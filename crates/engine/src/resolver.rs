//! Test resolution: config + detected tests -> concrete execution matrix
//!
//! Context precedence is test `runOn`, then spec, then config, then
//! environment auto-detection. Abstract contexts expand into one concrete
//! context per platform x browser combination; path-bearing fields resolve
//! to absolute paths; every unit is validated before inclusion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use doccheck_common::config::{parse_document, Config, PathBase};
use doccheck_common::model::{
    Action, BrowserConfig, BrowserName, BrowserSpec, Context, ContextSpec, LoadVariables,
    Platform, Record, ResolvedSpec, ResolvedTest, ResolvedTests, Screenshot, Spec, Step, Test,
    Window,
};
use doccheck_common::{Error, Result};
use doccheck_schema::validate;

/// What this machine can execute.
#[derive(Debug, Clone)]
pub struct Environment {
    pub platform: Platform,
    pub browsers: Vec<BrowserName>,
}

/// Probe the current platform and the browsers installed on it.
pub fn detect_environment() -> Environment {
    let platform = Platform::current();
    let browsers: Vec<BrowserName> = BrowserName::all()
        .into_iter()
        .filter(|name| browser_available(*name, platform))
        .collect();
    debug!(platform = platform.as_str(), ?browsers, "detected environment");
    Environment { platform, browsers }
}

/// Whether a concrete context can run in this environment.
pub fn environment_supports(env: &Environment, context: &Context) -> bool {
    if context.platform != env.platform {
        return false;
    }
    match &context.browser {
        Some(browser) => env.browsers.contains(&browser.name),
        None => true,
    }
}

fn browser_available(name: BrowserName, platform: Platform) -> bool {
    let candidates: &[&str] = match name {
        BrowserName::Firefox => &["firefox"],
        BrowserName::Chrome => &["google-chrome", "chromium", "chromium-browser", "chrome"],
        BrowserName::Edge => &["microsoft-edge", "msedge"],
        BrowserName::Safari => {
            return platform == Platform::Mac && Path::new("/Applications/Safari.app").exists();
        }
    };
    candidates.iter().any(|binary| which(binary).is_some())
}

/// Locate a binary on PATH.
pub(crate) fn which(binary: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Expand configuration and detected specs into the execution matrix.
///
/// Returns `Ok(None)` with a warning when detection produced no tests at
/// all; errors once detection succeeded but nothing resolves.
pub fn resolve_tests(config: &Config, specs: Vec<Spec>) -> Result<Option<ResolvedTests>> {
    let detected: usize = specs.iter().map(|s| s.tests.len()).sum();
    if detected == 0 {
        warn!("no tests detected in any input");
        return Ok(None);
    }

    let env = detect_environment();
    let cwd = std::env::current_dir()?;

    let mut resolved_specs = Vec::new();
    for spec in specs {
        let spec_value = serde_json::to_value(&spec)?;
        let outcome = validate("spec_v3", &spec_value, true)?;
        if !outcome.valid {
            warn!(
                spec = %spec.spec_id,
                errors = outcome.errors.as_deref().unwrap_or(""),
                "dropping spec that fails validation"
            );
            continue;
        }

        let base_dir = match config.relative_path_base {
            PathBase::Cwd => cwd.clone(),
            PathBase::File => spec
                .file
                .as_deref()
                .and_then(Path::parent)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone()),
        };

        let mut tests = Vec::new();
        for test in &spec.tests {
            match resolve_test(test, &spec, config, &env, &base_dir)? {
                Some(resolved) => tests.push(resolved),
                None => continue,
            }
        }

        if tests.is_empty() {
            warn!(spec = %spec.spec_id, "dropping spec with no resolvable tests");
            continue;
        }
        resolved_specs.push(ResolvedSpec {
            spec_id: spec.spec_id.clone(),
            description: spec.description.clone(),
            file: spec.file.clone(),
            tests,
        });
    }

    if resolved_specs.is_empty() {
        return Err(Error::NothingToRun);
    }
    Ok(Some(ResolvedTests { config: config.clone(), specs: resolved_specs }))
}

fn resolve_test(
    test: &Test,
    spec: &Spec,
    config: &Config,
    env: &Environment,
    base_dir: &Path,
) -> Result<Option<ResolvedTest>> {
    let test_value = serde_json::to_value(test)?;
    let outcome = validate("test_v3", &test_value, true)?;
    if !outcome.valid {
        warn!(
            test = %test.test_id,
            errors = outcome.errors.as_deref().unwrap_or(""),
            "dropping test that fails validation"
        );
        return Ok(None);
    }

    let needs_browser = test.steps.iter().any(|s| s.action.needs_browser());

    // Precedence: test runOn -> spec runOn -> config runOn -> environment.
    let declared: Vec<ContextSpec> = if !test.run_on.is_empty() {
        test.run_on.clone()
    } else if !spec.run_on.is_empty() {
        spec.run_on.clone()
    } else if !config.run_on.is_empty() {
        config.run_on.clone()
    } else {
        vec![ContextSpec::default()]
    };

    let mut contexts: Vec<Context> = Vec::new();
    let mut seen = HashSet::new();
    for context_spec in &declared {
        for context in expand_context(context_spec, needs_browser, env) {
            let key = serde_json::to_string(&context)?;
            if seen.insert(key) {
                contexts.push(context);
            }
        }
    }

    contexts.retain(|context| match serde_json::to_value(context) {
        Ok(value) => match validate("context_v3", &value, true) {
            Ok(outcome) if outcome.valid => true,
            Ok(outcome) => {
                warn!(
                    errors = outcome.errors.as_deref().unwrap_or(""),
                    "dropping context that fails validation"
                );
                false
            }
            Err(e) => {
                warn!("context validation errored: {e}");
                false
            }
        },
        Err(_) => false,
    });

    if contexts.is_empty() {
        warn!(test = %test.test_id, "dropping test with no resolvable context");
        return Ok(None);
    }

    // Inline before/after sub-specs, then resolve paths.
    let mut steps: Vec<Step> = Vec::new();
    if let Some(before) = &test.before {
        match load_sub_steps(&absolutize(before.clone(), base_dir)) {
            Ok(mut before_steps) => steps.append(&mut before_steps),
            Err(e) => {
                warn!(test = %test.test_id, "dropping test: before spec failed to load: {e}");
                return Ok(None);
            }
        }
    }
    steps.extend(test.steps.iter().cloned());
    if let Some(after) = &test.after {
        match load_sub_steps(&absolutize(after.clone(), base_dir)) {
            Ok(mut after_steps) => steps.append(&mut after_steps),
            Err(e) => {
                warn!(test = %test.test_id, "dropping test: after spec failed to load: {e}");
                return Ok(None);
            }
        }
    }
    for step in &mut steps {
        resolve_step_paths(step, base_dir);
    }

    Ok(Some(ResolvedTest {
        test_id: test.test_id.clone(),
        description: test.description.clone(),
        contexts,
        steps,
    }))
}

/// Expand one declared, possibly abstract context into concrete contexts.
fn expand_context(spec: &ContextSpec, needs_browser: bool, env: &Environment) -> Vec<Context> {
    let platforms: Vec<Platform> = spec
        .platform
        .as_ref()
        .map(|p| p.to_vec())
        .unwrap_or_else(|| vec![env.platform]);

    let default_browser = |name: BrowserName| BrowserConfig {
        name,
        headless: true,
        window: Window::default(),
        viewport: None,
    };

    let mut browsers: Vec<Option<BrowserConfig>> = match &spec.browser {
        Some(BrowserSpec::Name(name)) => vec![Some(default_browser(*name))],
        Some(BrowserSpec::Detailed(detail)) => {
            let names: Vec<BrowserName> = match &detail.name {
                Some(names) => names.to_vec(),
                // A browser block naming no browser expands to every
                // supported browser available in the environment.
                None if needs_browser => env.browsers.clone(),
                None => Vec::new(),
            };
            names
                .into_iter()
                .map(|name| {
                    Some(BrowserConfig {
                        name,
                        headless: detail.headless,
                        window: detail.window.unwrap_or_default(),
                        viewport: detail.viewport,
                    })
                })
                .collect()
        }
        None if needs_browser => env.browsers.iter().map(|n| Some(default_browser(*n))).collect(),
        None => vec![None],
    };

    if browsers.is_empty() {
        browsers = vec![None];
    }
    if needs_browser && browsers.iter().all(Option::is_none) {
        // Browser-requiring test with nothing to run it in.
        return Vec::new();
    }

    let mut contexts = Vec::new();
    for platform in &platforms {
        for browser in &browsers {
            contexts.push(Context { platform: *platform, browser: browser.clone() });
        }
    }
    contexts
}

/// Load the steps of a before/after sub-spec document.
fn load_sub_steps(path: &Path) -> Result<Vec<Step>> {
    let value = parse_document(path)?;

    let spec_outcome = validate("spec_v3", &value, true)?;
    if spec_outcome.valid {
        let spec: Spec = serde_json::from_value(spec_outcome.object)?;
        return Ok(spec.tests.into_iter().flat_map(|t| t.steps).collect());
    }

    let test_outcome = validate("test_v3", &value, true)?;
    if test_outcome.valid {
        let test: Test = serde_json::from_value(test_outcome.object)?;
        return Ok(test.steps);
    }

    Err(Error::Detection(format!(
        "{} is neither a valid spec nor a valid test document",
        path.display()
    )))
}

/// Resolve a path-bearing field against the base directory, leaving URLs
/// and integration-scheme URIs untouched.
fn absolutize(path: PathBuf, base: &Path) -> PathBuf {
    if path.is_absolute() || path.to_string_lossy().contains("://") {
        return path;
    }
    base.join(path)
}

fn resolve_step_paths(step: &mut Step, base: &Path) {
    match &mut step.action {
        Action::RunShell(shell) => {
            if let doccheck_common::model::RunShell::Detailed(detail) = shell {
                if let Some(path) = detail.path.take() {
                    detail.path = Some(absolutize(path, base));
                }
                if let Some(dir) = detail.working_directory.take() {
                    detail.working_directory = Some(absolutize(dir, base));
                }
            }
        }
        Action::RunCode(code) => {
            if let Some(path) = code.path.take() {
                code.path = Some(absolutize(path, base));
            }
            if let Some(dir) = code.working_directory.take() {
                code.working_directory = Some(absolutize(dir, base));
            }
        }
        Action::Screenshot(screenshot) => {
            let mut detail = screenshot.detail();
            if let Some(path) = detail.path.take() {
                detail.path = Some(absolutize(path, base));
                *screenshot = Screenshot::Detailed(detail);
            }
        }
        Action::Record(record) => {
            let path = absolutize(record.path(), base);
            *record = Record::Detailed { path };
        }
        Action::LoadVariables(load) => {
            let path = absolutize(load.path(), base);
            *load = LoadVariables::Detailed { path };
        }
        _ => {}
    }
}
