use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::aggregate::{AggregateReport, PerQueryScoreEntry, StrategyOutcome, aggregate};
use super::error::EvalError;
use super::strategy::Strategy;
use crate::backend::{BackendError, Hit, RetrievalBackend};
use crate::config::EvalConfig;
use crate::model::TestCase;

/// Per-query outcomes in fixture order plus one report per strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub entries: Vec<PerQueryScoreEntry>,
    pub reports: BTreeMap<Strategy, AggregateReport>,
}

/// Runs every test case through both strategies against one backend.
///
/// Cases are evaluated `concurrency` at a time and collected in input order.
/// Backend calls across all cases share a gate of `max_in_flight_queries`
/// permits. A failed or timed-out call becomes a `NotFound` outcome carrying
/// the reason; only an unreachable backend or an empty test set aborts the run.
pub struct EvaluationDriver {
    backend: Arc<dyn RetrievalBackend>,
    config: EvalConfig,
    gate: Arc<Semaphore>,
}

impl EvaluationDriver {
    pub fn new(backend: Arc<dyn RetrievalBackend>, config: EvalConfig) -> Self {
        let permits = config.max_in_flight_queries.max(1);
        Self {
            backend,
            config,
            gate: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub async fn run(&self, cases: &[TestCase]) -> Result<EvaluationOutcome, EvalError> {
        if cases.is_empty() {
            return Err(EvalError::EmptyTestSet);
        }

        self.backend
            .check_available()
            .await
            .map_err(|error| EvalError::BackendUnavailable {
                backend: self.backend.name().to_string(),
                reason: error.to_string(),
            })?;

        if let Some(deepest) = self.config.unreachable_ranked_boundary() {
            warn!(
                page_size = self.config.page_size,
                deepest_boundary = deepest,
                "page size cuts off the deepest ranked bucket; deeper matches score as catch-all"
            );
        }

        info!(
            backend = %self.backend.name(),
            cases = cases.len(),
            concurrency = self.config.concurrency,
            max_in_flight_queries = self.config.max_in_flight_queries,
            "evaluating test cases"
        );

        let entries = stream::iter(cases)
            .map(|case| self.evaluate_case(case))
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<PerQueryScoreEntry>>()
            .await;

        let mut reports = BTreeMap::<Strategy, AggregateReport>::new();
        for strategy in Strategy::ALL {
            let report = aggregate(&entries, strategy, &self.config.scoring)?;
            info!(
                strategy = %strategy,
                overall_score = report.overall_score,
                failed_queries = report.failed_queries,
                formula = %report.formula,
                "strategy aggregated"
            );
            reports.insert(strategy, report);
        }

        Ok(EvaluationOutcome { entries, reports })
    }

    async fn evaluate_case(&self, case: &TestCase) -> PerQueryScoreEntry {
        let (vector, keyword) = tokio::join!(
            self.outcome(Strategy::Vector, case),
            self.outcome(Strategy::Keyword, case),
        );

        PerQueryScoreEntry {
            query: case.query.clone(),
            expected_label: case.expected_label.clone(),
            by_strategy: BTreeMap::from([(Strategy::Vector, vector), (Strategy::Keyword, keyword)]),
        }
    }

    async fn outcome(&self, strategy: Strategy, case: &TestCase) -> StrategyOutcome {
        let scheme = &self.config.scoring;
        match self.query(strategy, case).await {
            Ok(hits) => {
                let outcome = StrategyOutcome::resolve(&hits, &case.expected_label, scheme);
                debug!(
                    strategy = %strategy,
                    query = %case.query,
                    rank = %outcome.rank,
                    bucket_score = outcome.bucket_score,
                    "query resolved"
                );
                outcome
            }
            Err(error) => {
                warn!(query = %case.query, error = %error, "query recorded as not found");
                StrategyOutcome::failed(error.to_string(), scheme)
            }
        }
    }

    async fn query(&self, strategy: Strategy, case: &TestCase) -> Result<Vec<Hit>, EvalError> {
        let request = strategy.build_request(case, &self.config);
        let into_error = |source: BackendError| EvalError::BackendQueryFailed { strategy, source };

        let _permit = self.gate.acquire().await.map_err(|_| {
            into_error(BackendError::Unavailable("query gate closed".to_string()))
        })?;

        let timeout_ms = self.config.query_timeout_ms;
        let result = if timeout_ms == 0 {
            self.backend.search(&request).await
        } else {
            let budget = Duration::from_millis(timeout_ms);
            tokio::time::timeout(budget, self.backend.search(&request))
                .await
                .unwrap_or(Err(BackendError::Timeout { timeout_ms }))
        };

        let mut hits = result.map_err(into_error)?;

        hits.truncate(request.size);
        Ok(hits)
    }
}
