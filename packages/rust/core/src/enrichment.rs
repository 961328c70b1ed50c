//! Sketchfab 3D-model enrichment.
//!
//! Searches Sketchfab for each unit's model designation and stores the embed
//! URL of the best match. Lookups share a [`RateLimiter`] so concurrent tasks
//! stay within the API's usage limits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use armory_shared::{ArmoryError, MilitaryUnit, NOT_FOUND, Result, SketchfabConfig};

use crate::ports::Enricher;
use crate::rate_limit::RateLimiter;

/// Results considered when picking a match.
const MAX_CANDIDATES: usize = 5;

/// Number of results requested per search.
const SEARCH_COUNT: &str = "10";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ModelHit>,
}

#[derive(Debug, Clone, Deserialize)]
struct ModelHit {
    uid: String,
    #[serde(default)]
    name: String,
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// [`Enricher`] backed by the Sketchfab search API.
pub struct SketchfabEnricher {
    client: Client,
    search_url: Url,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
    non_word: Regex,
    spaces: Regex,
}

impl SketchfabEnricher {
    /// Build an enricher from the `[sketchfab]` config section. The API token
    /// is read from the env var named there, if set.
    pub fn new(config: &SketchfabConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("armory/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.lookup_timeout_secs))
            .build()
            .map_err(|e| ArmoryError::Network(format!("failed to build HTTP client: {e}")))?;

        let base = config.api_base.trim_end_matches('/');
        let search_url = Url::parse(&format!("{base}/v3/search"))
            .map_err(|e| ArmoryError::config(format!("invalid sketchfab api_base '{base}': {e}")))?;

        Ok(Self {
            client,
            search_url,
            api_key: config.api_key(),
            limiter,
            non_word: Regex::new(r"[^\w\s]")
                .map_err(|e| ArmoryError::config(e.to_string()))?,
            spaces: Regex::new(r"\s+").map_err(|e| ArmoryError::config(e.to_string()))?,
        })
    }

    /// Lowercase, drop punctuation, collapse whitespace.
    fn normalize(&self, name: &str) -> String {
        let lower = name.to_lowercase();
        let stripped = self.non_word.replace_all(&lower, "");
        self.spaces.replace_all(&stripped, " ").trim().to_string()
    }

    /// Pick the closest hit for `model` among the first few results.
    ///
    /// Preference: exact normalized name, then containment, then a shared
    /// word longer than two characters, else the top result.
    fn best_match<'a>(&self, model: &str, hits: &'a [ModelHit]) -> Option<&'a ModelHit> {
        let first = hits.first()?;
        let wanted = self.normalize(model);
        let candidates: Vec<(&ModelHit, String)> = hits
            .iter()
            .take(MAX_CANDIDATES)
            .map(|h| (h, self.normalize(&h.name)))
            .collect();

        if let Some((hit, _)) = candidates.iter().find(|(_, name)| *name == wanted) {
            return Some(*hit);
        }
        if let Some((hit, _)) = candidates.iter().find(|(_, name)| name.contains(&wanted)) {
            return Some(*hit);
        }
        let parts: Vec<&str> = wanted.split(' ').filter(|p| p.len() > 2).collect();
        if let Some((hit, _)) = candidates
            .iter()
            .find(|(_, name)| parts.iter().any(|p| name.contains(*p)))
        {
            return Some(*hit);
        }
        Some(first)
    }

    /// Search Sketchfab for `model`. `Ok(None)` when nothing matched.
    async fn lookup(&self, model: &str) -> Result<Option<String>> {
        let mut url = self.search_url.clone();
        url.query_pairs_mut()
            .append_pair("type", "models")
            .append_pair("q", model)
            .append_pair("sort_by", "relevance")
            .append_pair("count", SEARCH_COUNT);

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Token {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArmoryError::Network(format!("sketchfab search: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArmoryError::Network(format!("sketchfab search: HTTP {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ArmoryError::parse(format!("sketchfab response: {e}")))?;

        Ok(self
            .best_match(model, &body.results)
            .map(|hit| format!("https://sketchfab.com/models/{}/embed", hit.uid)))
    }
}

#[async_trait]
impl Enricher for SketchfabEnricher {
    #[instrument(skip_all, fields(model = %unit.model))]
    async fn enrich(&self, mut unit: MilitaryUnit) -> MilitaryUnit {
        let model = unit.model.trim();
        if model.is_empty() || model.eq_ignore_ascii_case("unknown") {
            debug!(name = %unit.name, "no model designation, skipping lookup");
            unit.sketchfab_embed_url = Some(NOT_FOUND.into());
            return unit;
        }

        self.limiter.acquire().await;
        let embed = match self.lookup(model).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("no sketchfab results");
                NOT_FOUND.into()
            }
            Err(e) => {
                warn!(error = %e, "sketchfab lookup failed");
                NOT_FOUND.into()
            }
        };
        unit.sketchfab_embed_url = Some(embed);
        unit
    }
}
