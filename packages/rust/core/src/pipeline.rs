//! Per-task scrape pipeline: country → (extract → enrich → persist) per category.
//!
//! Progress is written to the [`TaskRegistry`] after every sub-step. A failing
//! category is recorded in the task's results and the run moves on; only setup
//! errors and unexpected failures end the whole task as `Failed`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use armory_shared::{
    ArmoryError, Category, CategoryOutcome, MilitaryUnit, NOT_FOUND, OutcomeStatus,
    PipelineConfig, Progress, Result, TaskId, TaskStatus,
};

use crate::ports::{Enricher, Extractor, Store};
use crate::registry::TaskRegistry;

/// Percent reached once the country is resolved.
const SETUP_PERCENT: usize = 15;

/// Percent spread across all categories.
const CATEGORY_SPAN: usize = 80;

/// One accepted submission, as handed to the runner.
#[derive(Debug, Clone)]
pub struct Job {
    pub task_id: TaskId,
    pub country: String,
    pub categories: Vec<Category>,
    pub cancel: CancellationToken,
}

/// Sub-step of a category run, used for progress offsets.
#[derive(Debug, Clone, Copy)]
enum Step {
    Extracting,
    Enriching,
    Saving,
}

impl Step {
    fn label(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Enriching => "enriching",
            Self::Saving => "saving",
        }
    }

    fn offset(self) -> usize {
        match self {
            Self::Extracting => 10,
            Self::Enriching => 40,
            Self::Saving => 70,
        }
    }
}

/// Percent at the start of `step` for the category at `index`.
fn step_percent(index: usize, total: usize, step: Step) -> u8 {
    let total = total.max(1);
    let base = SETUP_PERCENT + index * CATEGORY_SPAN / total;
    (base + step.offset() / total).min(99) as u8
}

/// Percent after `completed` categories have finished.
fn settled_percent(completed: usize, total: usize) -> u8 {
    let total = total.max(1);
    (SETUP_PERCENT + completed.min(total) * CATEGORY_SPAN / total).min(99) as u8
}

/// Run `fut` under `limit`, giving up early if `cancel` fires.
async fn guarded<T>(
    cancel: &CancellationToken,
    operation: &'static str,
    limit: Duration,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ArmoryError::Cancelled),
        result = tokio::time::timeout(limit, fut) => result.map_err(|_| ArmoryError::Timeout {
            operation,
            after: limit,
        }),
    }
}

/// Drives one task at a time through its categories.
pub struct PipelineRunner {
    registry: Arc<TaskRegistry>,
    extractor: Arc<dyn Extractor>,
    enricher: Arc<dyn Enricher>,
    store: Arc<dyn Store>,
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(
        registry: Arc<TaskRegistry>,
        extractor: Arc<dyn Extractor>,
        enricher: Arc<dyn Enricher>,
        store: Arc<dyn Store>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            extractor,
            enricher,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Run `job` to a terminal state.
    ///
    /// Never returns an error: every outcome is written to the registry.
    #[instrument(skip_all, fields(task_id = %job.task_id, country = %job.country))]
    pub async fn run(&self, job: &Job) {
        let start = Instant::now();
        match self.execute(job).await {
            Ok(()) => {
                info!(elapsed_ms = start.elapsed().as_millis(), "pipeline completed");
            }
            Err(ArmoryError::Cancelled) => {
                info!("pipeline cancelled");
                let message = format!("pipeline cancelled for {}", job.country);
                self.finish(job.task_id, |p| p.cancel(message)).await;
            }
            Err(ArmoryError::Conflict(reason)) => {
                // The entry was finished elsewhere (cancelled while queued).
                debug!(%reason, "task already finished, stopping");
            }
            Err(e) => {
                error!(error = %e, "pipeline failed");
                let message = e.to_string();
                self.finish(job.task_id, |p| p.fail(message)).await;
            }
        }
    }

    /// Mark a task as failed after its run aborted without reporting.
    pub async fn fail_unexpectedly(&self, task_id: TaskId, reason: &str) {
        error!(%task_id, reason, "pipeline aborted");
        let message = format!("unexpected failure: {reason}");
        self.finish(task_id, |p| p.fail(message)).await;
    }

    async fn finish<F>(&self, task_id: TaskId, mutate: F)
    where
        F: FnOnce(&mut Progress),
    {
        if let Err(e) = self.registry.update(task_id, mutate).await {
            debug!(%task_id, error = %e, "could not record final state");
        }
    }

    async fn execute(&self, job: &Job) -> Result<()> {
        let task_id = job.task_id;
        let total = job.categories.len();

        // --- Setup: resolve the country ---
        self.registry
            .update(task_id, |p| {
                p.status = TaskStatus::Running;
                p.message = format!("resolving country {}", job.country);
                p.advance_to(10);
            })
            .await?;

        let country_id = match guarded(
            &job.cancel,
            "resolve country",
            self.config.persist_timeout,
            self.store.resolve_or_create_country(&job.country),
        )
        .await
        .and_then(|r| r)
        {
            Ok(id) => id,
            Err(ArmoryError::Cancelled) => return Err(ArmoryError::Cancelled),
            Err(e) => return Err(ArmoryError::Setup(e.to_string())),
        };
        self.registry
            .update(task_id, |p| p.advance_to(SETUP_PERCENT as u8))
            .await?;

        // --- Categories, strictly in order ---
        for (index, &category) in job.categories.iter().enumerate() {
            if job.cancel.is_cancelled() {
                return Err(ArmoryError::Cancelled);
            }

            let outcome = self
                .run_category(job, &country_id, index, category)
                .await?;

            match &outcome.status {
                OutcomeStatus::Success => {
                    info!(%category, records = outcome.record_count, "category saved");
                }
                OutcomeStatus::Failed => {
                    warn!(%category, reason = %outcome.message, "category failed");
                }
            }

            self.registry
                .update(task_id, |p| {
                    p.record_outcome(category, outcome);
                    p.advance_to(settled_percent(p.completed_categories, total));
                })
                .await?;
        }

        let message = format!("pipeline completed for {}", job.country);
        self.registry.update(task_id, |p| p.complete(message)).await
    }

    /// Process one category. Failures below the category boundary become a
    /// `Failed` outcome; only cancellation and registry errors propagate.
    #[instrument(skip_all, fields(category = %category))]
    async fn run_category(
        &self,
        job: &Job,
        country_id: &str,
        index: usize,
        category: Category,
    ) -> Result<CategoryOutcome> {
        let total = job.categories.len();

        // --- Extract ---
        self.enter_step(job, index, category, Step::Extracting).await?;
        let units = match guarded(
            &job.cancel,
            "extract",
            self.config.extract_timeout,
            self.extractor.extract(category, &job.country),
        )
        .await
        .and_then(|r| r)
        {
            Ok(units) if units.is_empty() => {
                return Ok(CategoryOutcome::failed("No data found"));
            }
            Ok(units) => units,
            Err(ArmoryError::Cancelled) => return Err(ArmoryError::Cancelled),
            Err(e) => return Ok(CategoryOutcome::failed(e.to_string())),
        };
        debug!(records = units.len(), total, "extracted");

        // --- Enrich ---
        self.enter_step(job, index, category, Step::Enriching).await?;
        let units = self.enrich_all(job, units).await?;

        // --- Persist ---
        self.enter_step(job, index, category, Step::Saving).await?;
        match guarded(
            &job.cancel,
            "persist",
            self.config.persist_timeout,
            self.store.replace(country_id, category, &units),
        )
        .await
        .and_then(|r| r)
        {
            Ok(saved) => Ok(CategoryOutcome::success(saved)),
            Err(ArmoryError::Cancelled) => Err(ArmoryError::Cancelled),
            Err(e) => Ok(CategoryOutcome::failed(e.to_string())),
        }
    }

    async fn enter_step(
        &self,
        job: &Job,
        index: usize,
        category: Category,
        step: Step,
    ) -> Result<()> {
        let total = job.categories.len();
        self.registry
            .update(job.task_id, |p| {
                p.current_category = Some(category);
                p.message = format!("{} {category}", step.label());
                p.advance_to(step_percent(index, total, step));
            })
            .await
    }

    /// Enrich records one by one. A lookup that times out keeps the record
    /// with the sentinel value.
    async fn enrich_all(&self, job: &Job, units: Vec<MilitaryUnit>) -> Result<Vec<MilitaryUnit>> {
        let mut enriched = Vec::with_capacity(units.len());
        for unit in units {
            if job.cancel.is_cancelled() {
                return Err(ArmoryError::Cancelled);
            }
            let mut fallback = unit.clone();
            match guarded(
                &job.cancel,
                "enrich",
                self.config.enrich_timeout,
                self.enricher.enrich(unit),
            )
            .await
            {
                Ok(unit) => enriched.push(unit),
                Err(ArmoryError::Cancelled) => return Err(ArmoryError::Cancelled),
                Err(e) => {
                    warn!(model = %fallback.model, error = %e, "enrichment dropped");
                    fallback.sketchfab_embed_url = Some(NOT_FOUND.into());
                    enriched.push(fallback);
                }
            }
        }
        Ok(enriched)
    }
}
