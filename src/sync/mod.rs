//! # Sync Engine
//!
//! Taxonomy mirror, stage mapping, lead/contact/task reconciliation and webhook
//! routing. Sweeps share one accounting contract: item failures are counted, never
//! propagated.

pub mod mapping;
pub mod reconciler;
pub mod taxonomy;
pub mod webhook;

pub use mapping::{AutoMappingOutcome, MappingSuggestion, StageMapper};
pub use reconciler::Reconciler;
pub use taxonomy::TaxonomySync;
pub use webhook::{WebhookEvent, WebhookOutcome, WebhookRouter};

use metrics::counter;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use utoipa::ToSchema;

use crate::error::CrmError;

/// Result of a batch sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SyncOutcome {
    pub synced: u32,
    pub errors: u32,
}

impl SyncOutcome {
    pub fn merge(&mut self, other: SyncOutcome) {
        self.synced += other.synced;
        self.errors += other.errors;
    }
}

/// Runs `work` for every item with at most `concurrency` in flight and tallies the
/// results. A failed or panicked item counts as one error; the batch always runs
/// to completion.
pub async fn fan_out<T, F, Fut>(
    sweep: &'static str,
    items: Vec<T>,
    concurrency: usize,
    work: F,
) -> SyncOutcome
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CrmError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let work = Arc::new(work);
    let mut tasks = JoinSet::new();

    for item in items {
        let semaphore = semaphore.clone();
        let work = work.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| CrmError::Validation("sweep semaphore closed".to_string()))?;
            work(item).await
        });
    }

    let mut outcome = SyncOutcome::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {
                outcome.synced += 1;
                counter!("crm_sweep_items_total", "sweep" => sweep, "outcome" => "success")
                    .increment(1);
            }
            Ok(Err(err)) => {
                outcome.errors += 1;
                counter!("crm_sweep_items_total", "sweep" => sweep, "outcome" => "error")
                    .increment(1);
                tracing::warn!(sweep, error = %err, "sweep item failed");
            }
            Err(join_err) => {
                outcome.errors += 1;
                counter!("crm_sweep_items_total", "sweep" => sweep, "outcome" => "panic")
                    .increment(1);
                tracing::error!(sweep, error = %join_err, "sweep item task aborted");
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn fan_out_counts_failures_and_panics() {
        let outcome = fan_out("test", vec![1, 2, 3, 4], 2, |n: i32| async move {
            match n {
                2 => Err(CrmError::Validation("bad".to_string())),
                3 => panic!("boom"),
                _ => Ok(()),
            }
        })
        .await;

        assert_eq!(outcome, SyncOutcome { synced: 2, errors: 2 });
    }

    #[tokio::test]
    async fn fan_out_respects_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (in_flight_c, peak_c) = (in_flight.clone(), peak.clone());
        let outcome = fan_out("test", (0..10).collect(), 3, move |_: i32| {
            let in_flight = in_flight_c.clone();
            let peak = peak_c.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

        assert_eq!(outcome.synced, 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
