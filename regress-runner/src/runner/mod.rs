mod executor;

pub use executor::FixtureExecutor;

use crate::backends::EngineBackend;
use crate::comparison::ErrorMatchPolicy;
use crate::error::HarnessError;
use crate::fixture::{Fixture, FixtureName};
use crate::registry::FixtureRegistry;
use crate::report::ExecutionReport;
use crate::resolver::resolve_all;
use crate::session::Session;
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Harness configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum concurrent sessions for [`Harness::run_many`]
    pub max_jobs: usize,
    /// How exact error expectations are matched
    pub error_match: ErrorMatchPolicy,
    /// Variables bound in every new session
    pub variables: IndexMap<String, String>,
    /// Fixture name filter (glob pattern) applied when no names are requested
    pub filter: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_jobs: 1,
            error_match: ErrorMatchPolicy::default(),
            variables: IndexMap::new(),
            filter: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_max_jobs(mut self, jobs: usize) -> Self {
        self.max_jobs = jobs.max(1);
        self
    }

    /// One job per CPU
    pub fn with_parallelism(self) -> Self {
        self.with_max_jobs(num_cpus::get())
    }

    pub fn with_error_match(mut self, policy: ErrorMatchPolicy) -> Self {
        self.error_match = policy;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Entry point: resolves requested fixtures and runs them against sessions
/// obtained from the backend
pub struct Harness {
    registry: Arc<FixtureRegistry>,
    backend: Arc<dyn EngineBackend>,
    config: RunnerConfig,
    semaphore: Arc<Semaphore>,
}

impl Harness {
    pub fn new(registry: Arc<FixtureRegistry>, backend: Arc<dyn EngineBackend>) -> Self {
        let config = RunnerConfig::default();
        let semaphore = Arc::new(Semaphore::new(config.max_jobs));
        Self {
            registry,
            backend,
            config,
            semaphore,
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.semaphore = Arc::new(Semaphore::new(config.max_jobs));
        self.config = config;
        self
    }

    pub fn registry(&self) -> &FixtureRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Execution order for the requested fixtures, without running anything
    pub fn plan(&self, names: &[FixtureName]) -> Result<Vec<Arc<Fixture>>, HarnessError> {
        resolve_all(&self.registry, names)
    }

    /// Requested names, or every registered fixture passing the filter
    pub fn select(&self, names: &[String]) -> Vec<FixtureName> {
        if !names.is_empty() {
            return names.iter().map(FixtureName::new).collect();
        }
        self.registry
            .names()
            .filter(|name| {
                self.config
                    .filter
                    .as_deref()
                    .map_or(true, |filter| matches_filter(name.as_str(), filter))
            })
            .cloned()
            .collect()
    }

    /// Run one fixture and its dependencies over a fresh session
    pub async fn run(&self, name: &str) -> Result<ExecutionReport, HarnessError> {
        self.run_together(&[FixtureName::new(name)]).await
    }

    /// Run several fixtures over one shared session, dependencies merged
    pub async fn run_together(&self, names: &[FixtureName]) -> Result<ExecutionReport, HarnessError> {
        run_in_session(
            Arc::clone(&self.registry),
            Arc::clone(&self.backend),
            self.config.clone(),
            names.to_vec(),
        )
        .await
    }

    /// Run each fixture over its own session, up to `max_jobs` at a time.
    /// Results come back in request order.
    pub async fn run_many(
        &self,
        names: &[FixtureName],
    ) -> Vec<(FixtureName, Result<ExecutionReport, HarnessError>)> {
        let mut futures = FuturesUnordered::new();
        for (position, name) in names.iter().enumerate() {
            let registry = Arc::clone(&self.registry);
            let backend = Arc::clone(&self.backend);
            let config = self.config.clone();
            let semaphore = Arc::clone(&self.semaphore);
            let name = name.clone();
            let task = tokio::spawn({
                let name = name.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await;
                    run_in_session(registry, backend, config, vec![name]).await
                }
            });
            futures.push(async move { (position, name, task.await) });
        }

        let mut results = Vec::with_capacity(names.len());
        while let Some((position, name, joined)) = futures.next().await {
            let result = joined.unwrap_or_else(|e| {
                tracing::warn!(fixture = %name, error = %e, "fixture task panicked");
                Err(HarnessError::Aborted {
                    name: name.clone(),
                    reason: e.to_string(),
                })
            });
            results.push((position, name, result));
        }
        results.sort_by_key(|(position, _, _)| *position);
        results
            .into_iter()
            .map(|(_, name, result)| (name, result))
            .collect()
    }
}

async fn run_in_session(
    registry: Arc<FixtureRegistry>,
    backend: Arc<dyn EngineBackend>,
    config: RunnerConfig,
    requested: Vec<FixtureName>,
) -> Result<ExecutionReport, HarnessError> {
    let order = resolve_all(&registry, &requested)?;
    tracing::debug!(
        order = ?order.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
        "resolved fixtures"
    );

    let mut session = Session::open(backend.as_ref(), config.variables.clone()).await?;
    let executor = FixtureExecutor::new(config.error_match);
    let mut report = executor.run(&mut session, &requested, &order).await;

    if let Err(fault) = session.teardown().await {
        tracing::warn!(error = %fault, "session teardown failed");
        report.fault.get_or_insert(fault);
    }

    let summary = report.summary();
    tracing::info!(
        requested = requested.len(),
        statements = summary.total,
        mismatched = summary.mismatched,
        skipped = summary.skipped,
        "run finished"
    );
    Ok(report)
}

/// Check if a fixture name matches a filter pattern (`*` matches anything)
fn matches_filter(name: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return name == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = parts.split_first().map_or(("", &[][..]), |(f, r)| (*f, r));
    let Some(mut remaining) = name.strip_prefix(first) else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return true;
    };
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
