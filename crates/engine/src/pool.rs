//! Bounded worker pool over context executions
//!
//! Up to `concurrentRunners` context executions run in parallel; each
//! worker owns its runner and writes only its own result subtree. Steps
//! within a test stay strictly sequential.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use doccheck_common::config::Config;
use doccheck_common::model::{Context, ResolvedTest, ResolvedTests};
use doccheck_common::{Outcome, Result};

use crate::report::{
    aggregate, ContextResult, RunResult, SpecResult, StepResult, Summary, TestResult,
};
use crate::resolver::{detect_environment, environment_supports, Environment};
use crate::runner::Runner;

/// Execute the resolved matrix and return the aggregated result tree.
pub async fn execute(resolved: &ResolvedTests) -> Result<RunResult> {
    let started = Utc::now();
    let config = Arc::new(resolved.config.clone());
    let env = detect_environment();
    let limit = config.concurrent_runners.resolve();
    info!(limit, "executing with bounded concurrency");

    // Skeleton tree; workers fill in their own context slots.
    let mut specs: Vec<SpecResult> = resolved
        .specs
        .iter()
        .map(|spec| SpecResult {
            spec_id: spec.spec_id.clone(),
            description: spec.description.clone(),
            file: spec.file.clone(),
            outcome: Outcome::Skipped,
            tests: spec
                .tests
                .iter()
                .map(|test| TestResult {
                    test_id: test.test_id.clone(),
                    description: test.description.clone(),
                    outcome: Outcome::Skipped,
                    contexts: test
                        .contexts
                        .iter()
                        .map(|context| ContextResult {
                            context: context.clone(),
                            outcome: Outcome::Skipped,
                            steps: Vec::new(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut join_set = JoinSet::new();

    for (spec_index, spec) in resolved.specs.iter().enumerate() {
        for (test_index, test) in spec.tests.iter().enumerate() {
            for (context_index, context) in test.contexts.iter().enumerate() {
                let semaphore = semaphore.clone();
                let config = config.clone();
                let env = env.clone();
                let test = test.clone();
                let context = context.clone();

                join_set.spawn(async move {
                    let _permit =
                        semaphore.acquire_owned().await.expect("semaphore never closes");
                    let steps = run_context(&test, context.clone(), config, &env).await;
                    (
                        spec_index,
                        test_index,
                        context_index,
                        ContextResult { context, outcome: Outcome::Skipped, steps },
                    )
                });
            }
        }
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((spec_index, test_index, context_index, result)) => {
                specs[spec_index].tests[test_index].contexts[context_index] = result;
            }
            Err(e) => error!("context execution task failed: {e}"),
        }
    }

    let mut run = RunResult {
        started,
        completed: Utc::now(),
        outcome: Outcome::Skipped,
        specs,
        summary: Summary::default(),
    };
    aggregate(&mut run);
    Ok(run)
}

/// Run one test in one context, with runner teardown guaranteed.
async fn run_context(
    test: &ResolvedTest,
    context: Context,
    config: Arc<Config>,
    env: &Environment,
) -> Vec<StepResult> {
    if !environment_supports(env, &context) {
        debug!(context = %context.label(), "context not available in this environment, skipping");
        let reason = format!("context {} not available in this environment", context.label());
        return test
            .steps
            .iter()
            .map(|step| StepResult::skipped(&step.step_id, &reason))
            .collect();
    }

    let mut runner = Runner::new(context, config);
    let steps = runner.run_test(test).await;
    runner.teardown().await;
    steps
}
