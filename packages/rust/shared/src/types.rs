//! Core domain types: categories, scraped units, and task progress.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ArmoryError;

/// Marker stored in `sketchfab_embed_url` when the lookup found nothing.
pub const NOT_FOUND: &str = "NOT FOUND";

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// A military-power classification that partitions the scraped data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Airpower,
    Navalpower,
    Droneforce,
    Landpower,
}

impl Category {
    /// Every category, in the order `"all"` expands to.
    pub const ALL: [Category; 4] = [
        Category::Airpower,
        Category::Navalpower,
        Category::Droneforce,
        Category::Landpower,
    ];

    /// Page name and table key for this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Airpower => "airpower",
            Self::Navalpower => "navalpower",
            Self::Droneforce => "droneforce",
            Self::Landpower => "landpower",
        }
    }

    /// Comma-separated list of accepted names, for error messages.
    pub fn available() -> String {
        Self::ALL
            .iter()
            .map(Category::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ArmoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == needle)
            .ok_or_else(|| {
                ArmoryError::validation(format!(
                    "invalid category '{}'. Available categories: {}",
                    s.trim(),
                    Self::available()
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// Random 128-bit task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// MilitaryUnit
// ---------------------------------------------------------------------------

/// One scraped equipment entry (an aircraft type, a ship class, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilitaryUnit {
    pub service: String,
    pub name: String,
    pub model: String,
    /// Country of origin, derived from the flag image.
    pub country: String,
    pub units: i64,
    pub role: String,
    pub assessment: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_url: Option<String>,
    /// Sketchfab embed URL, or [`NOT_FOUND`]. `None` until enriched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sketchfab_embed_url: Option<String>,
}

impl MilitaryUnit {
    /// Stable identity of the entry across scrapes (SHA-256 of service, name, model).
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.service, &self.name, &self.model] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Lifecycle state of a scrape task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Result of one category's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Outcome recorded for each processed category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    pub record_count: usize,
}

impl CategoryOutcome {
    pub fn success(record_count: usize) -> Self {
        Self {
            status: OutcomeStatus::Success,
            message: "ok".into(),
            record_count,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            message: message.into(),
            record_count: 0,
        }
    }
}

/// Pollable status of a scrape task.
///
/// Serialized verbatim by the status route. `results` is emitted as a JSON
/// object whose key order follows processing order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub task_id: TaskId,
    pub country: String,
    pub categories: Vec<Category>,
    pub status: TaskStatus,
    pub message: String,
    pub progress_percent: u8,
    pub total_categories: usize,
    pub completed_categories: usize,
    pub current_category: Option<Category>,
    #[serde(serialize_with = "serialize_results")]
    pub results: Vec<(Category, CategoryOutcome)>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Progress {
    /// Initial record for a freshly accepted submission.
    pub fn queued(task_id: TaskId, country: &str, categories: &[Category]) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            country: country.to_string(),
            categories: categories.to_vec(),
            status: TaskStatus::Pending,
            message: format!("queued for {country}"),
            progress_percent: 5,
            total_categories: categories.len(),
            completed_categories: 0,
            current_category: None,
            results: Vec::new(),
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move the percentage forward. Never goes backwards and never reaches
    /// 100 outside of [`Progress::complete`].
    pub fn advance_to(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(99));
    }

    /// Outcome recorded for `category`, if it has been processed.
    pub fn outcome(&self, category: Category) -> Option<&CategoryOutcome> {
        self.results
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, o)| o)
    }

    /// Record a category outcome and count it as processed.
    pub fn record_outcome(&mut self, category: Category, outcome: CategoryOutcome) {
        self.results.push((category, outcome));
        self.completed_categories = (self.completed_categories + 1).min(self.total_categories);
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Completed;
        self.progress_percent = 100;
        self.current_category = None;
        self.message = message.into();
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.progress_percent = 0;
        self.current_category = None;
        self.message = message.into();
        self.finished_at = Some(Utc::now());
    }

    pub fn cancel(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Cancelled;
        self.current_category = None;
        self.message = message.into();
        self.finished_at = Some(Utc::now());
    }
}

fn serialize_results<S>(
    results: &[(Category, CategoryOutcome)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(results.len()))?;
    for (category, outcome) in results {
        map.serialize_entry(category.as_str(), outcome)?;
    }
    map.end()
}
