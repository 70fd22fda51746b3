//! Screening run: batching, retries, bounded concurrency, checkpoints

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use procurement_types::ScreeningStatus;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, warn};

use super::checkpoint::Checkpoint;
use super::client::{BatchMatches, ScreeningClient};
use super::{ScopeMatch, ScreeningConfig, ScreeningQuery, ScreeningResult};
use crate::error::ScreeningError;
use crate::graph::OwnershipGraph;

/// Results of a screening run in graph node order
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScreeningOutcome {
    pub results: Vec<ScreeningResult>,
    /// Entities screened in this run
    pub screened: usize,
    /// Entities taken from the checkpoint
    pub resumed: usize,
    /// Entity nodes without a usable query
    pub skipped: usize,
    pub matched: usize,
    pub no_match: usize,
    pub unknown: usize,
}

pub struct Screener<C> {
    client: C,
    config: ScreeningConfig,
}

impl<C: ScreeningClient> Screener<C> {
    pub fn new(client: C, config: ScreeningConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// One scope request with exponential backoff on transient failures
    async fn call_with_retry(
        &self,
        scope: &str,
        batch: &[ScreeningQuery],
    ) -> Result<BatchMatches, ScreeningError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut delay = self.config.backoff_ms;
        let mut attempt = 1;
        loop {
            match self.client.match_batch(scope, batch).await {
                Ok(matches) => return Ok(matches),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!(
                        scope,
                        attempt,
                        max_attempts,
                        delay_ms = delay,
                        error = %e,
                        "Screening request failed, retrying"
                    );
                    sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2).min(self.config.max_backoff_ms);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Screen one batch across every scope
    async fn screen_batch(&self, batch: Vec<ScreeningQuery>) -> Vec<ScreeningResult> {
        let mut best: HashMap<String, Option<ScopeMatch>> =
            batch.iter().map(|q| (q.node_id.clone(), None)).collect();
        let mut failed_scopes = Vec::new();
        let mut last_error = None;

        for scope in &self.config.scopes {
            match self.call_with_retry(scope, &batch).await {
                Ok(hits) => {
                    for (id, hit) in hits {
                        let (Some(slot), Some(hit)) = (best.get_mut(&id), hit) else {
                            continue;
                        };
                        if slot.as_ref().map_or(true, |current| hit.score > current.score) {
                            *slot = Some(hit);
                        }
                    }
                }
                Err(e) => {
                    warn!(scope = %scope, entities = batch.len(), error = %e, "Screening scope failed");
                    failed_scopes.push(scope.clone());
                    last_error = Some(e.to_string());
                }
            }
        }

        batch
            .into_iter()
            .map(|query| {
                let hit = best.remove(&query.node_id).flatten();
                let status = match (&hit, failed_scopes.is_empty()) {
                    (Some(_), _) => ScreeningStatus::Matched,
                    (None, true) => ScreeningStatus::NoMatch,
                    (None, false) => ScreeningStatus::Unknown,
                };
                let score = match status {
                    ScreeningStatus::Unknown => None,
                    _ => Some(hit.as_ref().map_or(0.0, |h| h.score)),
                };
                ScreeningResult {
                    node_id: query.node_id,
                    status,
                    score,
                    best: hit,
                    failed_scopes: failed_scopes.clone(),
                    error: last_error.clone(),
                }
            })
            .collect()
    }

    /// Screen every entity node of a graph, resuming from `checkpoint`
    pub async fn screen(
        &self,
        graph: &OwnershipGraph,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<ScreeningOutcome, ScreeningError> {
        let mut outcome = ScreeningOutcome::default();
        let queries: Vec<ScreeningQuery> = graph
            .nodes()
            .iter()
            .filter(|n| n.kind.is_entity())
            .filter_map(|n| {
                let query = ScreeningQuery::from_node(n);
                if query.is_none() {
                    outcome.skipped += 1;
                }
                query
            })
            .collect();

        let mut done = match checkpoint {
            Some(cp) => cp.load()?,
            None => HashMap::new(),
        };
        // Unknown results are retried on every run
        done.retain(|_, result| !result.is_unknown());
        let pending: Vec<ScreeningQuery> = queries
            .iter()
            .filter(|q| !done.contains_key(&q.node_id))
            .cloned()
            .collect();
        outcome.resumed = queries.len() - pending.len();

        info!(
            jurisdiction = graph.jurisdiction(),
            entities = queries.len(),
            pending = pending.len(),
            resumed = outcome.resumed,
            skipped = outcome.skipped,
            scopes = self.config.scopes.len(),
            "Starting screening"
        );

        let batches: Vec<Vec<ScreeningQuery>> = pending
            .chunks(self.config.batch_size.max(1))
            .map(<[ScreeningQuery]>::to_vec)
            .collect();
        let total_batches = batches.len();
        let flush_every = self.config.checkpoint_every.max(1);

        let mut results = stream::iter(batches)
            .map(|batch| self.screen_batch(batch))
            .buffered(self.config.concurrency.max(1));

        let mut buffer: Vec<ScreeningResult> = Vec::new();
        let mut completed = 0;
        while let Some(batch_results) = results.next().await {
            completed += 1;
            outcome.screened += batch_results.len();
            for result in batch_results {
                if checkpoint.is_some() {
                    buffer.push(result.clone());
                }
                done.insert(result.node_id.clone(), result);
            }
            if let Some(cp) = checkpoint {
                if buffer.len() >= flush_every {
                    cp.append(&buffer)?;
                    buffer.clear();
                }
            }
            if completed % 100 == 0 || completed == total_batches {
                info!(completed, total = total_batches, "Screening progress");
            }
        }
        if let Some(cp) = checkpoint {
            cp.append(&buffer)?;
        }

        for query in &queries {
            let Some(result) = done.remove(&query.node_id) else {
                continue;
            };
            match result.status {
                ScreeningStatus::Matched => outcome.matched += 1,
                ScreeningStatus::NoMatch => outcome.no_match += 1,
                ScreeningStatus::Unknown => outcome.unknown += 1,
            }
            outcome.results.push(result);
        }

        info!(
            jurisdiction = graph.jurisdiction(),
            screened = outcome.screened,
            matched = outcome.matched,
            unknown = outcome.unknown,
            "Screening finished"
        );
        Ok(outcome)
    }
}
