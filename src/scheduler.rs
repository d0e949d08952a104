//! # Sweep Scheduler
//!
//! [`SweepRunner`] executes taxonomy and lead sweeps for every trigger source and
//! records each run in `crm_sync_runs`. Each sweep kind has one run guard: manual
//! triggers queue behind a running sweep, scheduled ticks skip it.
//!
//! [`CrmScheduler`] drives two independent jittered loops, one for the taxonomy
//! (pipelines, roles, users) and one for the lead pull. A failed run is logged and
//! the loop carries on.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::SchedulerConfig;
use crate::error::CrmError;
use crate::repositories::{NewSyncRun, SyncRunRepository};
use crate::sync::{Reconciler, SyncOutcome, TaxonomySync};

/// Kinds of sweep that can be triggered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    Pipelines,
    Roles,
    Users,
    Leads,
}

impl Sweep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sweep::Pipelines => "pipelines",
            Sweep::Roles => "roles",
            Sweep::Users => "users",
            Sweep::Leads => "leads",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduler,
    Manual,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduler => "scheduler",
            Trigger::Manual => "manual",
        }
    }
}

#[derive(Default)]
struct RunGuards {
    pipelines: Mutex<()>,
    roles: Mutex<()>,
    users: Mutex<()>,
    leads: Mutex<()>,
}

impl RunGuards {
    fn for_sweep(&self, sweep: Sweep) -> &Mutex<()> {
        match sweep {
            Sweep::Pipelines => &self.pipelines,
            Sweep::Roles => &self.roles,
            Sweep::Users => &self.users,
            Sweep::Leads => &self.leads,
        }
    }
}

#[derive(Clone)]
pub struct SweepRunner {
    taxonomy: TaxonomySync,
    reconciler: Reconciler,
    runs: SyncRunRepository,
    default_lead_limit: u32,
    guards: Arc<RunGuards>,
}

impl SweepRunner {
    pub fn new(
        taxonomy: TaxonomySync,
        reconciler: Reconciler,
        runs: SyncRunRepository,
        default_lead_limit: u32,
    ) -> Self {
        Self {
            taxonomy,
            reconciler,
            runs,
            default_lead_limit,
            guards: Arc::new(RunGuards::default()),
        }
    }

    /// Runs `sweep`, waiting for an in-flight run of the same kind to finish first.
    pub async fn run(
        &self,
        sweep: Sweep,
        trigger: Trigger,
        lead_limit: Option<u32>,
    ) -> Result<SyncOutcome, CrmError> {
        let guard = self.guards.for_sweep(sweep).lock().await;
        self.run_guarded(guard, sweep, trigger, lead_limit).await
    }

    /// Runs `sweep` unless one of the same kind is already in flight.
    pub async fn run_if_idle(
        &self,
        sweep: Sweep,
        trigger: Trigger,
    ) -> Option<Result<SyncOutcome, CrmError>> {
        let guard = self.guards.for_sweep(sweep).try_lock().ok()?;
        Some(self.run_guarded(guard, sweep, trigger, None).await)
    }

    #[instrument(skip(self, _guard), fields(sweep = sweep.as_str(), trigger = trigger.as_str()))]
    async fn run_guarded(
        &self,
        _guard: MutexGuard<'_, ()>,
        sweep: Sweep,
        trigger: Trigger,
        lead_limit: Option<u32>,
    ) -> Result<SyncOutcome, CrmError> {
        let started = Instant::now();
        let result = match sweep {
            Sweep::Pipelines => self.taxonomy.sync_pipelines().await,
            Sweep::Roles => self.taxonomy.sync_roles().await,
            Sweep::Users => self.taxonomy.sync_users().await,
            Sweep::Leads => {
                self.reconciler
                    .pull_leads(lead_limit.unwrap_or(self.default_lead_limit))
                    .await
            }
        };
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let (outcome, error_message) = match &result {
            Ok(outcome) => (*outcome, None),
            Err(err) => (SyncOutcome::default(), Some(err.to_string())),
        };
        let record = NewSyncRun {
            kind: sweep.as_str(),
            triggered_by: trigger.as_str(),
            synced: outcome.synced,
            errors: outcome.errors,
            duration_ms,
            error_message,
        };
        if let Err(err) = self.runs.record(record).await {
            warn!(error = %err, "failed to record sync run");
        }

        result
    }
}

/// Periodic trigger for taxonomy refresh and lead pull.
pub struct CrmScheduler {
    runner: SweepRunner,
    config: SchedulerConfig,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Taxonomy,
    LeadPull,
}

impl Job {
    fn as_str(&self) -> &'static str {
        match self {
            Job::Taxonomy => "taxonomy",
            Job::LeadPull => "lead_pull",
        }
    }

    fn sweeps(&self) -> &'static [Sweep] {
        match self {
            Job::Taxonomy => &[Sweep::Pipelines, Sweep::Roles, Sweep::Users],
            Job::LeadPull => &[Sweep::Leads],
        }
    }
}

impl CrmScheduler {
    pub fn new(runner: SweepRunner, config: SchedulerConfig) -> Self {
        Self { runner, config }
    }

    /// Runs both loops until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            taxonomy_interval_seconds = self.config.taxonomy_interval_seconds,
            lead_pull_interval_seconds = self.config.lead_pull_interval_seconds,
            "starting CRM scheduler"
        );

        tokio::join!(
            self.job_loop(
                Job::Taxonomy,
                self.config.taxonomy_interval_seconds,
                shutdown.clone()
            ),
            self.job_loop(
                Job::LeadPull,
                self.config.lead_pull_interval_seconds,
                shutdown.clone()
            ),
        );

        info!("CRM scheduler stopped");
    }

    async fn job_loop(&self, job: Job, interval_seconds: u64, shutdown: CancellationToken) {
        loop {
            let jitter = compute_jitter_seconds(
                &self.config,
                interval_seconds,
                &mut rand::thread_rng(),
            );
            let delay = Duration::from_secs(interval_seconds + jitter);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {
                    let started = Instant::now();
                    self.run_job(job).await;
                    histogram!("crm_scheduler_run_duration_ms", "job" => job.as_str())
                        .record(started.elapsed().as_secs_f64() * 1_000.0);
                }
            }
        }
    }

    async fn run_job(&self, job: Job) {
        for sweep in job.sweeps() {
            match self.runner.run_if_idle(*sweep, Trigger::Scheduler).await {
                None => info!(sweep = sweep.as_str(), "sweep already running; skipping tick"),
                Some(Ok(outcome)) => info!(
                    sweep = sweep.as_str(),
                    synced = outcome.synced,
                    errors = outcome.errors,
                    "scheduled sweep finished"
                ),
                Some(Err(err)) => error!(sweep = sweep.as_str(), error = %err, "scheduled sweep failed"),
            }
        }
    }
}

/// Extra delay added to a base interval, drawn from `[0, jitter_pct_max]` of it.
fn compute_jitter_seconds<R: Rng + ?Sized>(
    config: &SchedulerConfig,
    base_interval_seconds: u64,
    rng: &mut R,
) -> u64 {
    let max = config.jitter_pct_max.clamp(0.0, 1.0);
    if max == 0.0 {
        return 0;
    }
    let jitter_pct = rng.gen_range(0.0..=max);
    (base_interval_seconds as f64 * jitter_pct).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn scheduler_config(jitter_pct_max: f64) -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            taxonomy_interval_seconds: 21_600,
            lead_pull_interval_seconds: 1_800,
            jitter_pct_max,
        }
    }

    #[test]
    fn jitter_respects_bounds() {
        let config = scheduler_config(0.2);
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let jitter = compute_jitter_seconds(&config, 1_800, &mut rng);
            assert!(jitter <= 360);
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let config = scheduler_config(0.0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        assert_eq!(compute_jitter_seconds(&config, 1_800, &mut rng), 0);
    }

    #[test]
    fn taxonomy_job_covers_all_taxonomy_sweeps() {
        assert_eq!(
            Job::Taxonomy.sweeps(),
            &[Sweep::Pipelines, Sweep::Roles, Sweep::Users]
        );
        assert_eq!(Job::LeadPull.sweeps(), &[Sweep::Leads]);
    }
}
