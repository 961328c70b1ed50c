//! Warpower page fetcher and unit extractor.
//!
//! One request per (country, category): the category page is fetched, every
//! unit block is parsed, and the records are returned in page order.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument};
use url::Url;

use armory_shared::{ArmoryError, Category, MilitaryUnit, Result, ScrapeConfig};

use crate::parse::UnitSelectors;

/// Fetches and parses Warpower category pages.
pub struct WarpowerExtractor {
    client: Client,
    base_url_template: String,
    selectors: UnitSelectors,
}

impl WarpowerExtractor {
    /// Create an extractor from the `[scrape]` config section.
    pub fn new(config: &ScrapeConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ArmoryError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url_template: config.base_url_template.clone(),
            selectors: UnitSelectors::new()?,
        })
    }

    /// Site root for `country`, with a trailing slash so relative links join
    /// beneath it.
    ///
    /// Only ASCII letters, digits and `-` are accepted, so a name with a space
    /// (`"south korea"`) is a validation error for every category.
    pub fn base_url(&self, country: &str) -> Result<Url> {
        if country.is_empty()
            || !country
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ArmoryError::validation(format!(
                "country '{country}' cannot be used in a site address"
            )));
        }

        let root = self.base_url_template.replace("{country}", country);
        let root = if root.ends_with('/') {
            root
        } else {
            format!("{root}/")
        };
        Url::parse(&root).map_err(|e| ArmoryError::config(format!("invalid base url {root}: {e}")))
    }

    /// Page holding `category` units for `country`.
    pub fn page_url(&self, category: Category, country: &str) -> Result<Url> {
        let base = self.base_url(country)?;
        base.join(&format!("{}.php", category.as_str()))
            .map_err(|e| ArmoryError::config(format!("invalid page url: {e}")))
    }

    /// Fetch the category page and extract every unit on it.
    ///
    /// An empty result means the page loaded but contained no unit blocks.
    #[instrument(skip_all, fields(category = %category, country = %country))]
    pub async fn extract(&self, category: Category, country: &str) -> Result<Vec<MilitaryUnit>> {
        let base = self.base_url(country)?;
        let url = self.page_url(category, country)?;
        debug!(%url, "fetching category page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| ArmoryError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArmoryError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ArmoryError::Network(format!("{url}: body read failed: {e}")))?;

        let units = self.selectors.parse_units(&body, &base);
        info!(records = units.len(), bytes = body.len(), "extracted units");
        Ok(units)
    }
}
