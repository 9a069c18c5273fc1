//! Externally supplied ResolvedTests documents
//!
//! A complete ResolvedTests document can arrive from the orchestration API
//! or from the environment, bypassing local detection and resolution.

use tracing::info;

use doccheck_common::config::{OrchestrationConfig, RESOLVED_TESTS_ENV_VAR};
use doccheck_common::model::ResolvedTests;
use doccheck_common::{Error, Result};

/// Fetch a ResolvedTests document from the orchestration API. Any non-2xx
/// response fails the run fast.
pub async fn fetch_resolved_tests(config: &OrchestrationConfig) -> Result<ResolvedTests> {
    let url = format!("{}/resolved-tests", config.url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    let mut request = client
        .get(&url)
        .bearer_auth(&config.token)
        .header("x-account-id", &config.account_id);
    if let Some(context_id) = &config.context_id {
        request = request.query(&[("context", context_id)]);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Api { status: status.as_u16(), message });
    }

    let resolved: ResolvedTests = response.json().await?;
    info!(url, "fetched resolved tests from orchestration API");
    Ok(resolved)
}

/// A ResolvedTests document supplied through the environment, if any.
pub fn resolved_tests_from_env() -> Result<Option<ResolvedTests>> {
    match std::env::var(RESOLVED_TESTS_ENV_VAR) {
        Ok(document) => {
            let resolved: ResolvedTests = serde_json::from_str(&document).map_err(|e| {
                Error::InvalidConfig(format!(
                    "{RESOLVED_TESTS_ENV_VAR} is not a valid ResolvedTests document: {e}"
                ))
            })?;
            info!("using resolved tests supplied by {RESOLVED_TESTS_ENV_VAR}");
            Ok(Some(resolved))
        }
        Err(_) => Ok(None),
    }
}
