//! Submission front door for scrape tasks.
//!
//! Validates requests, registers the task, and hands it to a bounded queue.
//! A scheduler loop drains the queue under a semaphore so at most
//! `max_concurrent` pipelines run at once, and a sweeper evicts finished
//! tasks once they outlive the retention window.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use armory_crawler::WarpowerExtractor;
use armory_shared::{AppConfig, ArmoryError, Category, PipelineConfig, Progress, Result, TaskId};
use armory_storage::Storage;

use crate::enrichment::SketchfabEnricher;
use crate::pipeline::{Job, PipelineRunner};
use crate::rate_limit::RateLimiter;
use crate::registry::TaskRegistry;

/// Keyword accepted in place of an explicit category list.
const ALL_KEYWORD: &str = "all";

/// An accepted submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub task_id: TaskId,
    pub country: String,
    pub categories: Vec<Category>,
}

/// Normalize a country name: trimmed, lowercased, non-empty.
pub fn normalize_country(raw: &str) -> Result<String> {
    let country = raw.trim().to_lowercase();
    if country.is_empty() {
        return Err(ArmoryError::validation("country is required"));
    }
    Ok(country)
}

/// Requested categories, as submitted.
///
/// Only the bare string form may carry the `"all"` keyword. Inside a list
/// every entry must name a category.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CategoryRequest {
    One(String),
    Many(Vec<String>),
}

impl CategoryRequest {
    /// Resolve to categories in request order. Duplicates are kept.
    pub fn resolve(&self) -> Result<Vec<Category>> {
        let categories = match self {
            Self::One(one) if one.trim().eq_ignore_ascii_case(ALL_KEYWORD) => Category::ALL.to_vec(),
            Self::One(one) => vec![one.parse::<Category>()?],
            Self::Many(many) => many
                .iter()
                .map(|item| item.parse::<Category>())
                .collect::<Result<Vec<_>>>()?,
        };
        if categories.is_empty() {
            return Err(ArmoryError::validation(format!(
                "at least one category is required. Available categories: {}",
                Category::available()
            )));
        }
        Ok(categories)
    }
}

impl<S: AsRef<str>, const N: usize> From<&[S; N]> for CategoryRequest {
    fn from(many: &[S; N]) -> Self {
        Self::from(&many[..])
    }
}

impl From<&str> for CategoryRequest {
    fn from(one: &str) -> Self {
        Self::One(one.to_string())
    }
}

impl<S: AsRef<str>> From<&[S]> for CategoryRequest {
    fn from(many: &[S]) -> Self {
        Self::Many(many.iter().map(|s| s.as_ref().to_string()).collect())
    }
}

/// Accepts scrape submissions and runs them in the background.
pub struct Dispatcher {
    registry: Arc<TaskRegistry>,
    queue: mpsc::Sender<Job>,
    capacity: usize,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Wire the production collaborators from config and start.
    pub fn from_config(config: &AppConfig, storage: Arc<Storage>) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.sketchfab.min_interval_ms,
        )));
        let extractor = WarpowerExtractor::new(&config.scrape)?;
        let enricher = SketchfabEnricher::new(&config.sketchfab, limiter)?;
        let pipeline = PipelineConfig::from(config);

        let runner = PipelineRunner::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(extractor),
            Arc::new(enricher),
            storage,
            pipeline.clone(),
        );
        Ok(Self::start(Arc::new(runner), &pipeline))
    }

    /// Spawn the scheduler and sweeper. Must be called inside a tokio runtime.
    pub fn start(runner: Arc<PipelineRunner>, config: &PipelineConfig) -> Self {
        let registry = Arc::clone(runner.registry());
        let capacity = config.queue_capacity.max(1);
        let (queue, jobs) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();

        tokio::spawn(schedule(
            runner,
            jobs,
            Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            shutdown.clone(),
        ));
        tokio::spawn(sweep(
            Arc::clone(&registry),
            config.task_ttl,
            config.sweep_interval,
            shutdown.clone(),
        ));

        info!(
            max_concurrent = config.max_concurrent,
            queue_capacity = capacity,
            "dispatcher started"
        );
        Self {
            registry,
            queue,
            capacity,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Validate and enqueue a scrape. Returns as soon as the task is queued.
    #[instrument(skip_all, fields(country = %country))]
    pub async fn submit(
        &self,
        country: &str,
        categories: impl Into<CategoryRequest>,
    ) -> Result<Submission> {
        let country = normalize_country(country)?;
        let categories = categories.into().resolve()?;

        let slot = self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => ArmoryError::Busy {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(()) => {
                ArmoryError::Conflict("dispatcher is shutting down".into())
            }
        })?;

        let task_id = TaskId::new();
        let cancel = self.shutdown.child_token();
        self.registry
            .create(Progress::queued(task_id, &country, &categories), cancel.clone())
            .await?;

        slot.send(Job {
            task_id,
            country: country.clone(),
            categories: categories.clone(),
            cancel,
        });
        info!(%task_id, categories = categories.len(), "task queued");

        Ok(Submission {
            task_id,
            country,
            categories,
        })
    }

    pub async fn status(&self, task_id: TaskId) -> Result<Progress> {
        self.registry.get(task_id).await
    }

    pub async fn tasks(&self) -> Vec<Progress> {
        self.registry.list().await
    }

    /// Request cancellation. No-op for finished tasks.
    pub async fn cancel(&self, task_id: TaskId) -> Result<Progress> {
        let snapshot = self.registry.cancel(task_id).await?;
        info!(%task_id, status = ?snapshot.status, "cancellation requested");
        Ok(snapshot)
    }

    /// Stop accepting work, signal every in-flight task, and cancel queued ones.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Drain the queue, holding a slot before taking each job.
async fn schedule(
    runner: Arc<PipelineRunner>,
    mut jobs: mpsc::Receiver<Job>,
    slots: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = Arc::clone(&slots).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            let _permit = permit;
            let task_id = job.task_id;
            let inner = {
                let runner = Arc::clone(&runner);
                tokio::spawn(async move { runner.run(&job).await })
            };
            if let Err(e) = inner.await {
                let reason = if e.is_panic() {
                    panic_message(e.into_panic())
                } else {
                    "pipeline task aborted".to_string()
                };
                runner.fail_unexpectedly(task_id, &reason).await;
            }
        });
    }

    // Jobs still queued at shutdown never run.
    jobs.close();
    let registry = runner.registry();
    while let Some(job) = jobs.recv().await {
        if let Err(e) = registry.cancel(job.task_id).await {
            debug!(task_id = %job.task_id, error = %e, "queued task already gone");
        }
    }
    debug!("scheduler stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Periodically evict finished tasks older than `ttl`.
async fn sweep(
    registry: Arc<TaskRegistry>,
    ttl: Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    let Ok(ttl) = TimeDelta::from_std(ttl) else {
        warn!(?ttl, "task ttl out of range, retention sweeper disabled");
        return;
    };
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(cutoff) = Utc::now().checked_sub_signed(ttl) {
                    registry.evict_finished_before(cutoff).await;
                }
            }
        }
    }
    debug!("sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Store;
    use crate::testing::{FakeEnricher, FakeExtractor, FakeStore};
    use armory_shared::{OutcomeStatus, TaskStatus};

    fn config(max_concurrent: usize, queue_capacity: usize) -> PipelineConfig {
        PipelineConfig {
            max_concurrent,
            queue_capacity,
            extract_timeout: Duration::from_secs(5),
            enrich_timeout: Duration::from_secs(1),
            persist_timeout: Duration::from_secs(5),
            task_ttl: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(60),
        }
    }

    fn dispatcher(extractor: FakeExtractor, config: &PipelineConfig) -> Dispatcher {
        let runner = PipelineRunner::new(
            Arc::new(TaskRegistry::new()),
            Arc::new(extractor),
            Arc::new(FakeEnricher::ok()),
            Arc::new(FakeStore::default()) as Arc<dyn Store>,
            config.clone(),
        );
        Dispatcher::start(Arc::new(runner), config)
    }

    async fn wait_for(d: &Dispatcher, id: TaskId, done: impl Fn(&Progress) -> bool) -> Progress {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let p = d.status(id).await.unwrap();
                if done(&p) {
                    return p;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach the expected state")
    }

    fn resolve(request: impl Into<CategoryRequest>) -> Result<Vec<Category>> {
        request.into().resolve()
    }

    #[test]
    fn categories_are_parsed_case_insensitively() {
        let parsed = resolve(&[" AirPower ", "landpower"]).unwrap();
        assert_eq!(parsed, [Category::Airpower, Category::Landpower]);
        assert_eq!(resolve(" NavalPower ").unwrap(), [Category::Navalpower]);
    }

    #[test]
    fn bare_all_expands_and_duplicates_are_kept() {
        assert_eq!(resolve("ALL").unwrap(), Category::ALL);
        assert_eq!(
            resolve(&["airpower", "navalpower", "airpower"]).unwrap(),
            [Category::Airpower, Category::Navalpower, Category::Airpower]
        );
    }

    #[test]
    fn all_inside_a_list_is_unknown() {
        let err = resolve(&["landpower", "all"]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("'all'"));
    }

    #[test]
    fn untagged_request_keeps_the_string_form_distinct() {
        let one: CategoryRequest = serde_json::from_str(r#""all""#).unwrap();
        assert_eq!(one, CategoryRequest::One("all".into()));
        let many: CategoryRequest = serde_json::from_str(r#"["all"]"#).unwrap();
        assert!(many.resolve().is_err());
    }

    #[test]
    fn invalid_input_is_a_validation_error() {
        let empty: [&str; 0] = [];
        assert_eq!(resolve(&empty).unwrap_err().code(), "VALIDATION_ERROR");
        let err = resolve(&["airpower", "spacepower"]).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("spacepower"));
        assert_eq!(resolve("").unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(normalize_country("   ").unwrap_err().code(), "VALIDATION_ERROR");
        assert_eq!(normalize_country(" India ").unwrap(), "india");
    }

    #[tokio::test]
    async fn submission_runs_to_completion() {
        let d = dispatcher(FakeExtractor::with_units(2), &config(2, 4));
        let sub = d.submit(" India ", &["airpower", "navalpower"]).await.unwrap();
        assert_eq!(sub.country, "india");
        assert_eq!(sub.categories, [Category::Airpower, Category::Navalpower]);

        let p = wait_for(&d, sub.task_id, Progress::is_terminal).await;
        assert_eq!(p.status, TaskStatus::Completed);
        assert_eq!(p.progress_percent, 100);
        assert!(p
            .results
            .iter()
            .all(|(_, o)| o.status == OutcomeStatus::Success));
        assert_eq!(d.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn fresh_submission_is_in_flight() {
        let gate = Arc::new(Semaphore::new(0));
        let d = dispatcher(
            FakeExtractor::with_units(1).gated(Arc::clone(&gate)),
            &config(1, 2),
        );
        let sub = d.submit("india", &["airpower", "airpower"]).await.unwrap();

        let p = d.status(sub.task_id).await.unwrap();
        assert!(matches!(p.status, TaskStatus::Pending | TaskStatus::Running));
        assert!(p.progress_percent < 100);
        assert_eq!(p.total_categories, 2);
        assert_eq!(p.completed_categories, 0);

        gate.add_permits(2);
        let p = wait_for(&d, sub.task_id, Progress::is_terminal).await;
        assert_eq!(p.status, TaskStatus::Completed);
        assert_eq!(p.completed_categories, 2);
        assert_eq!(p.results.len(), 2);
    }

    #[tokio::test]
    async fn rejected_submission_creates_no_task() {
        let d = dispatcher(FakeExtractor::with_units(1), &config(1, 1));
        let err = d.submit("india", &["bogus"]).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        let err = d.submit("", &["airpower"]).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(d.registry().is_empty().await);
    }

    #[tokio::test]
    async fn full_queue_is_busy() {
        let gate = Arc::new(Semaphore::new(0));
        let d = dispatcher(
            FakeExtractor::with_units(1).gated(Arc::clone(&gate)),
            &config(1, 1),
        );

        let first = d.submit("india", &["airpower"]).await.unwrap();
        wait_for(&d, first.task_id, |p| p.status == TaskStatus::Running).await;
        let second = d.submit("france", &["airpower"]).await.unwrap();

        let err = d.submit("japan", &["airpower"]).await.unwrap_err();
        assert!(matches!(err, ArmoryError::Busy { capacity: 1 }));
        assert_eq!(d.registry().len().await, 2);

        gate.add_permits(2);
        for id in [first.task_id, second.task_id] {
            let p = wait_for(&d, id, Progress::is_terminal).await;
            assert_eq!(p.status, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn cancel_running_and_queued_tasks() {
        let gate = Arc::new(Semaphore::new(0));
        let d = dispatcher(
            FakeExtractor::with_units(1).gated(Arc::clone(&gate)),
            &config(1, 2),
        );

        let running = d.submit("india", &["airpower"]).await.unwrap();
        wait_for(&d, running.task_id, |p| p.status == TaskStatus::Running).await;
        let queued = d.submit("france", &["airpower"]).await.unwrap();

        let snapshot = d.cancel(queued.task_id).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Cancelled);

        d.cancel(running.task_id).await.unwrap();
        let p = wait_for(&d, running.task_id, Progress::is_terminal).await;
        assert_eq!(p.status, TaskStatus::Cancelled);
        assert_eq!(p.message, "pipeline cancelled for india");

        // The queued task is drained without running.
        let p = d.status(queued.task_id).await.unwrap();
        assert_eq!(p.status, TaskStatus::Cancelled);
        assert!(p.results.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_task_is_not_found() {
        let d = dispatcher(FakeExtractor::with_units(1), &config(1, 1));
        let err = d.cancel(TaskId::new()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn panicking_pipeline_ends_failed() {
        let d = dispatcher(FakeExtractor::panicking("parser exploded"), &config(1, 1));
        let sub = d.submit("india", &["airpower"]).await.unwrap();

        let p = wait_for(&d, sub.task_id, Progress::is_terminal).await;
        assert_eq!(p.status, TaskStatus::Failed);
        assert_eq!(p.progress_percent, 0);
        assert_eq!(p.message, "unexpected failure: parser exploded");

        // The slot is released for the next task.
        let d2 = d.submit("france", &["airpower"]).await.unwrap();
        let p = wait_for(&d, d2.task_id, Progress::is_terminal).await;
        assert_eq!(p.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn sweeper_evicts_finished_tasks() {
        let config = PipelineConfig {
            task_ttl: Duration::ZERO,
            sweep_interval: Duration::from_millis(10),
            ..config(1, 1)
        };
        let d = dispatcher(FakeExtractor::with_units(1), &config);
        let sub = d.submit("india", &["airpower"]).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while d.status(sub.task_id).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("finished task was not evicted");
    }

    #[tokio::test]
    async fn shutdown_finishes_queued_tasks_cancelled() {
        let gate = Arc::new(Semaphore::new(0));
        let d = dispatcher(
            FakeExtractor::with_units(1).gated(Arc::clone(&gate)),
            &config(1, 2),
        );
        let running = d.submit("india", &["airpower"]).await.unwrap();
        wait_for(&d, running.task_id, |p| p.status == TaskStatus::Running).await;
        let queued = d.submit("france", &["airpower"]).await.unwrap();

        d.shutdown();
        gate.add_permits(1);
        for id in [running.task_id, queued.task_id] {
            let p = wait_for(&d, id, Progress::is_terminal).await;
            assert_eq!(p.status, TaskStatus::Cancelled);
        }
        assert!(d.status(queued.task_id).await.unwrap().results.is_empty());
    }

    #[tokio::test]
    async fn shutdown_refuses_new_work() {
        let d = dispatcher(FakeExtractor::with_units(1), &config(1, 1));
        d.shutdown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !d.queue.is_closed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("scheduler did not stop");
        let err = d.submit("india", &["airpower"]).await.unwrap_err();
        assert!(matches!(err, ArmoryError::Conflict(_)));
    }
}
