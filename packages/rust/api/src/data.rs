//! Read-only routes over stored countries and units.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use armory_shared::{ArmoryError, Category};
use armory_storage::{CountryRecord, StoredUnit, UnitFilter};

use crate::AppState;
use crate::error::ApiResult;

/// Default `limit` for `/api/search`.
const DEFAULT_SEARCH_LIMIT: u32 = 50;

/// Upper bound for any page size.
const MAX_PAGE_SIZE: u32 = 500;

async fn require_country(state: &AppState, name: &str) -> ApiResult<CountryRecord> {
    let country = state
        .storage
        .find_country(name)
        .await?
        .ok_or_else(|| ArmoryError::NotFound(format!("country '{}'", name.trim().to_lowercase())))?;
    Ok(country)
}

// ---------------------------------------------------------------------------
// GET /api/countries
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountryEntry {
    name: String,
    display_name: String,
    last_updated: String,
    endpoints: BTreeMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountryList {
    success: bool,
    total_countries: usize,
    countries: Vec<CountryEntry>,
}

pub async fn list_countries(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let countries: Vec<CountryEntry> = state
        .storage
        .list_countries()
        .await?
        .into_iter()
        .map(|c| CountryEntry {
            endpoints: Category::ALL
                .into_iter()
                .map(|cat| (cat.as_str(), format!("/api/countries/{}/{cat}", c.name)))
                .collect(),
            name: c.name,
            display_name: c.display_name,
            last_updated: c.last_updated,
        })
        .collect();

    Ok(Json(CountryList {
        success: true,
        total_countries: countries.len(),
        countries,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/countries/:country
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CountrySummary {
    success: bool,
    country: CountryRecord,
    counts: BTreeMap<&'static str, u64>,
    total_units: u64,
}

pub async fn country_summary(
    State(state): State<AppState>,
    Path(country): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let country = require_country(&state, &country).await?;
    let counts = state.storage.count_units(&country.id).await?;
    let total_units = counts.iter().map(|(_, n)| n).sum();

    Ok(Json(CountrySummary {
        success: true,
        counts: counts.into_iter().map(|(c, n)| (c.as_str(), n)).collect(),
        total_units,
        country,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/countries/:country/:category
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct UnitQuery {
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: u32,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    limit: u32,
    offset: u32,
    has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_offset: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnitList {
    success: bool,
    country: String,
    category: Category,
    total_records: u64,
    count: usize,
    data: Vec<StoredUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pagination: Option<Pagination>,
}

pub async fn country_units(
    State(state): State<AppState>,
    Path((country, category)): Path<(String, String)>,
    query: Result<Query<UnitQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let category: Category = category.parse()?;
    let country = require_country(&state, &country).await?;

    let limit = query.limit.map(|l| l.clamp(1, MAX_PAGE_SIZE));
    let filter = UnitFilter {
        search: query.search,
        limit,
        offset: query.offset,
    };
    let page = state.storage.list_units(&country.id, category, &filter).await?;

    let pagination = limit.map(|limit| {
        let has_more = page.has_more(filter.offset);
        Pagination {
            limit,
            offset: filter.offset,
            has_more,
            next_offset: has_more.then(|| filter.offset + page.units.len() as u32),
        }
    });

    Ok(Json(UnitList {
        success: true,
        country: country.name,
        category,
        total_records: page.total,
        count: page.units.len(),
        data: page.units,
        pagination,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/search
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResults {
    success: bool,
    query: String,
    total_results: usize,
    results: Vec<StoredUnit>,
}

pub async fn search(
    State(state): State<AppState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let term = query.q.unwrap_or_default().trim().to_string();
    if term.is_empty() {
        return Err(ArmoryError::validation("query parameter 'q' is required").into());
    }
    let category = query
        .category
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(str::parse::<Category>)
        .transpose()?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .clamp(1, MAX_PAGE_SIZE);

    let results = state
        .storage
        .search_units(&term, query.country.as_deref(), category, limit)
        .await?;

    Ok(Json(SearchResults {
        success: true,
        query: term,
        total_results: results.len(),
        results,
    }))
}
