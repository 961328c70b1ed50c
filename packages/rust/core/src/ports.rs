//! Collaborator boundaries used by the pipeline.
//!
//! The runner only talks to these traits, so tests can substitute in-memory
//! fakes for the scraper, the model lookup, and the database.

use async_trait::async_trait;

use armory_crawler::WarpowerExtractor;
use armory_shared::{Category, MilitaryUnit, Result};
use armory_storage::Storage;

/// Produces the records for one (category, country) pair.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, category: Category, country: &str) -> Result<Vec<MilitaryUnit>>;
}

/// Annotates a record through a secondary lookup.
///
/// Never fails: a lookup that cannot produce a value marks the record with
/// [`armory_shared::NOT_FOUND`].
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, unit: MilitaryUnit) -> MilitaryUnit;
}

/// Durable persistence keyed by (country, category).
#[async_trait]
pub trait Store: Send + Sync {
    /// Idempotently resolve a country name to its id.
    async fn resolve_or_create_country(&self, name: &str) -> Result<String>;

    /// Delete prior records for (country, category), then insert `units`.
    async fn replace(
        &self,
        country_id: &str,
        category: Category,
        units: &[MilitaryUnit],
    ) -> Result<usize>;
}

#[async_trait]
impl Extractor for WarpowerExtractor {
    async fn extract(&self, category: Category, country: &str) -> Result<Vec<MilitaryUnit>> {
        WarpowerExtractor::extract(self, category, country).await
    }
}

#[async_trait]
impl Store for Storage {
    async fn resolve_or_create_country(&self, name: &str) -> Result<String> {
        Storage::resolve_or_create_country(self, name).await
    }

    async fn replace(
        &self,
        country_id: &str,
        category: Category,
        units: &[MilitaryUnit],
    ) -> Result<usize> {
        self.replace_units(country_id, category, units).await
    }
}
