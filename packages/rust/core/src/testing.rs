//! In-memory collaborators for pipeline and dispatcher tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use armory_shared::{ArmoryError, Category, MilitaryUnit, Progress, Result, TaskId};

use crate::pipeline::Job;
use crate::ports::{Enricher, Extractor, Store};
use crate::registry::TaskRegistry;

pub(crate) fn sample_unit(i: usize) -> MilitaryUnit {
    MilitaryUnit {
        service: "Air Force".into(),
        name: format!("Unit {i}"),
        model: format!("M-{i}"),
        country: "India".into(),
        units: i as i64,
        role: "Fighter".into(),
        assessment: "Active".into(),
        description: "test unit".into(),
        image_url: None,
        flag_url: None,
        sketchfab_embed_url: None,
    }
}

/// Register a queued task and return the job the dispatcher would enqueue.
pub(crate) async fn queued_job(
    registry: &TaskRegistry,
    country: &str,
    categories: &[Category],
) -> Job {
    let task_id = TaskId::new();
    let cancel = CancellationToken::new();
    registry
        .create(Progress::queued(task_id, country, categories), cancel.clone())
        .await
        .unwrap();
    Job {
        task_id,
        country: country.to_string(),
        categories: categories.to_vec(),
        cancel,
    }
}

#[derive(Default)]
pub(crate) struct FakeExtractor {
    units: usize,
    fail_on: Option<Category>,
    hang: bool,
    cancel_on_call: Option<CancellationToken>,
    gate: Option<Arc<Semaphore>>,
    panic_with: Option<String>,
}

impl FakeExtractor {
    pub(crate) fn with_units(units: usize) -> Self {
        Self {
            units,
            ..Self::default()
        }
    }

    pub(crate) fn failing_on(mut self, category: Category) -> Self {
        self.fail_on = Some(category);
        self
    }

    pub(crate) fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Trip `token` from inside the call, as a concurrent cancel would.
    pub(crate) fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_call = Some(token);
        self
    }

    pub(crate) fn panicking(message: &str) -> Self {
        Self {
            panic_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Block every call until a permit is added to `gate`.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, category: Category, _country: &str) -> Result<Vec<MilitaryUnit>> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| ArmoryError::Network(e.to_string()))?
                .forget();
        }
        if let Some(message) = &self.panic_with {
            panic!("{message}");
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(token) = &self.cancel_on_call {
            token.cancel();
        }
        if self.fail_on == Some(category) {
            return Err(ArmoryError::Network(format!("{category}.php: HTTP 503")));
        }
        Ok((0..self.units).map(sample_unit).collect())
    }
}

pub(crate) struct FakeEnricher {
    hang: bool,
}

impl FakeEnricher {
    pub(crate) fn ok() -> Self {
        Self { hang: false }
    }

    pub(crate) fn hanging() -> Self {
        Self { hang: true }
    }
}

#[async_trait]
impl Enricher for FakeEnricher {
    async fn enrich(&self, mut unit: MilitaryUnit) -> MilitaryUnit {
        if self.hang {
            std::future::pending::<()>().await;
        }
        unit.sketchfab_embed_url = Some(format!("https://sketchfab.com/models/{}/embed", unit.model));
        unit
    }
}

#[derive(Default)]
pub(crate) struct FakeStore {
    countries: Mutex<HashMap<String, String>>,
    units: Mutex<HashMap<(String, Category), Vec<MilitaryUnit>>>,
    fail_resolve: bool,
    fail_replace: bool,
}

impl FakeStore {
    pub(crate) fn failing_resolve() -> Self {
        Self {
            fail_resolve: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_replace() -> Self {
        Self {
            fail_replace: true,
            ..Self::default()
        }
    }

    /// Everything stored for `category`, across countries.
    pub(crate) async fn saved(&self, category: Category) -> Vec<MilitaryUnit> {
        self.units
            .lock()
            .await
            .iter()
            .filter(|((_, c), _)| *c == category)
            .flat_map(|(_, units)| units.clone())
            .collect()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn resolve_or_create_country(&self, name: &str) -> Result<String> {
        if self.fail_resolve {
            return Err(ArmoryError::Storage("database is locked".into()));
        }
        let mut countries = self.countries.lock().await;
        let next = format!("country-{}", countries.len() + 1);
        Ok(countries.entry(name.to_string()).or_insert(next).clone())
    }

    async fn replace(
        &self,
        country_id: &str,
        category: Category,
        units: &[MilitaryUnit],
    ) -> Result<usize> {
        if self.fail_replace {
            return Err(ArmoryError::Storage("disk I/O error".into()));
        }
        self.units
            .lock()
            .await
            .insert((country_id.to_string(), category), units.to_vec());
        Ok(units.len())
    }
}
