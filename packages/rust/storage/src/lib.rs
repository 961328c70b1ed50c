//! libSQL storage layer for scraped military data.
//!
//! The [`Storage`] struct wraps a local libSQL database holding one row per
//! country and the units scraped for each (country, category) pair.
//!
//! **Access rules:**
//! - The server and `armory scrape`: read-write via [`Storage::open`]
//! - `armory countries` / `armory show`: read-only via [`Storage::open_readonly`]
//!
//! Every call opens its own connection from the shared [`Database`] handle, so
//! a single `Storage` can be shared across tasks behind an `Arc`. Writes are
//! serialized through an async mutex.

mod migrations;

use std::path::Path;

use armory_shared::{ArmoryError, Category, MilitaryUnit, Result};
use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    write_lock: Mutex<()>,
    readonly: bool,
}

/// A stored country row.
#[derive(Debug, Clone, Serialize)]
pub struct CountryRecord {
    pub id: String,
    /// Lowercase key used in URLs.
    pub name: String,
    pub display_name: String,
    pub created_at: String,
    pub last_updated: String,
}

/// A unit as stored, with its row metadata.
#[derive(Debug, Clone, Serialize)]
pub struct StoredUnit {
    pub id: String,
    /// Country the unit was scraped for (not its origin).
    pub source_country: String,
    pub category: Category,
    pub fingerprint: String,
    pub scraped_at: String,
    #[serde(flatten)]
    pub unit: MilitaryUnit,
}

/// Filter and paging for [`Storage::list_units`].
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    /// Case-insensitive substring matched against name, model, and role.
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// One page of units plus the total matching count.
#[derive(Debug, Clone)]
pub struct UnitPage {
    pub units: Vec<StoredUnit>,
    pub total: u64,
}

impl UnitPage {
    /// Whether rows exist beyond this page.
    pub fn has_more(&self, offset: u32) -> bool {
        u64::from(offset) + (self.units.len() as u64) < self.total
    }
}

fn db_err(e: libsql::Error) -> ArmoryError {
    ArmoryError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ArmoryError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let storage = Self {
            db,
            write_lock: Mutex::new(()),
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ArmoryError::Storage(format!(
                "database not found at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
            readonly: true,
        })
    }

    fn connect(&self) -> Result<Connection> {
        self.db.connect().map_err(db_err)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = self.connect()?;
        let current_version = schema_version(&conn).await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    ArmoryError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ArmoryError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Country operations
    // -----------------------------------------------------------------------

    /// Return the id of the country named `name`, creating the row if needed.
    ///
    /// Idempotent: concurrent callers with the same name get the same id.
    pub async fn resolve_or_create_country(&self, name: &str) -> Result<String> {
        self.check_writable()?;
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return Err(ArmoryError::validation("country name cannot be empty"));
        }

        let _guard = self.write_lock.lock().await;
        let conn = self.connect()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO countries (id, name, display_name, created_at, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(name) DO NOTHING",
            params![id.as_str(), key.as_str(), display_name(&key), now.as_str()],
        )
        .await
        .map_err(db_err)?;

        let mut rows = conn
            .query("SELECT id FROM countries WHERE name = ?1", params![key.as_str()])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<String>(0).map_err(db_err),
            None => Err(ArmoryError::Storage(format!(
                "country '{key}' missing after insert"
            ))),
        }
    }

    /// Look up a country by its lowercase name.
    pub async fn find_country(&self, name: &str) -> Result<Option<CountryRecord>> {
        let conn = self.connect()?;
        let key = name.trim().to_lowercase();
        let mut rows = conn
            .query(
                "SELECT id, name, display_name, created_at, last_updated
                 FROM countries WHERE name = ?1",
                params![key.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_country(&row)?)),
            None => Ok(None),
        }
    }

    /// List all countries, alphabetically.
    pub async fn list_countries(&self) -> Result<Vec<CountryRecord>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT id, name, display_name, created_at, last_updated
                 FROM countries ORDER BY name",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_country(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Unit operations
    // -----------------------------------------------------------------------

    /// Replace every unit stored for (`country_id`, `category`) with `units`.
    ///
    /// The delete and the inserts run in one transaction: readers see either
    /// the old batch or the new one. Returns the number of rows inserted.
    pub async fn replace_units(
        &self,
        country_id: &str,
        category: Category,
        units: &[MilitaryUnit],
    ) -> Result<usize> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        let conn = self.connect()?;
        let tx = conn.transaction().await.map_err(db_err)?;

        tx.execute(
            "DELETE FROM military_units WHERE country_id = ?1 AND category = ?2",
            params![country_id, category.as_str()],
        )
        .await
        .map_err(db_err)?;

        let now = Utc::now().to_rfc3339();
        for (position, unit) in units.iter().enumerate() {
            tx.execute(
                "INSERT INTO military_units (
                    id, country_id, category, position, fingerprint, service, name, model,
                    origin_country, units, role, assessment, description, image_url, flag_url,
                    sketchfab_embed_url, scraped_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    Uuid::now_v7().to_string(),
                    country_id,
                    category.as_str(),
                    position as i64,
                    unit.fingerprint(),
                    unit.service.as_str(),
                    unit.name.as_str(),
                    unit.model.as_str(),
                    unit.country.as_str(),
                    unit.units,
                    unit.role.as_str(),
                    unit.assessment.as_str(),
                    unit.description.as_str(),
                    unit.image_url.as_deref(),
                    unit.flag_url.as_deref(),
                    unit.sketchfab_embed_url.as_deref(),
                    now.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        }

        tx.execute(
            "UPDATE countries SET last_updated = ?1 WHERE id = ?2",
            params![now.as_str(), country_id],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        tracing::debug!(country_id, %category, rows = units.len(), "replaced units");
        Ok(units.len())
    }

    /// Units for one (country, category), in extraction order.
    pub async fn list_units(
        &self,
        country_id: &str,
        category: Category,
        filter: &UnitFilter,
    ) -> Result<UnitPage> {
        let conn = self.connect()?;
        let pattern = filter.search.as_deref().and_then(like_pattern);
        let limit = filter.limit.map(i64::from).unwrap_or(-1);

        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM military_units
                 WHERE country_id = ?1 AND category = ?2
                   AND (?3 IS NULL OR LOWER(name) LIKE ?3 ESCAPE '\\'
                        OR LOWER(model) LIKE ?3 ESCAPE '\\'
                        OR LOWER(role) LIKE ?3 ESCAPE '\\')",
                params![country_id, category.as_str(), pattern.as_deref()],
            )
            .await
            .map_err(db_err)?;
        let total = match rows.next().await.map_err(db_err)? {
            Some(row) => row.get::<i64>(0).map_err(db_err)?.max(0) as u64,
            None => 0,
        };

        let mut rows = conn
            .query(
                &format!(
                    "{UNIT_SELECT}
                     WHERE u.country_id = ?1 AND u.category = ?2
                       AND (?3 IS NULL OR LOWER(u.name) LIKE ?3 ESCAPE '\\'
                            OR LOWER(u.model) LIKE ?3 ESCAPE '\\'
                            OR LOWER(u.role) LIKE ?3 ESCAPE '\\')
                     ORDER BY u.position
                     LIMIT ?4 OFFSET ?5"
                ),
                params![
                    country_id,
                    category.as_str(),
                    pattern.as_deref(),
                    limit,
                    i64::from(filter.offset)
                ],
            )
            .await
            .map_err(db_err)?;

        let mut units = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            units.push(row_to_unit(&row)?);
        }
        Ok(UnitPage { units, total })
    }

    /// Number of stored units per category for a country.
    pub async fn count_units(&self, country_id: &str) -> Result<Vec<(Category, u64)>> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT category, COUNT(*) FROM military_units
                 WHERE country_id = ?1 GROUP BY category",
                params![country_id],
            )
            .await
            .map_err(db_err)?;

        let mut stored = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let name: String = row.get(0).map_err(db_err)?;
            let count: i64 = row.get(1).map_err(db_err)?;
            stored.push((name, count.max(0) as u64));
        }

        Ok(Category::ALL
            .into_iter()
            .map(|c| {
                let count = stored
                    .iter()
                    .find(|(name, _)| name == c.as_str())
                    .map_or(0, |(_, n)| *n);
                (c, count)
            })
            .collect())
    }

    /// Units whose name, model, role, or description contain `query`
    /// (case-insensitive), optionally narrowed to one country or category.
    pub async fn search_units(
        &self,
        query: &str,
        country: Option<&str>,
        category: Option<Category>,
        limit: u32,
    ) -> Result<Vec<StoredUnit>> {
        let Some(pattern) = like_pattern(query) else {
            return Ok(Vec::new());
        };
        let country = country.map(|c| c.trim().to_lowercase());

        let conn = self.connect()?;
        let mut rows = conn
            .query(
                &format!(
                    "{UNIT_SELECT}
                     WHERE (LOWER(u.name) LIKE ?1 ESCAPE '\\'
                            OR LOWER(u.model) LIKE ?1 ESCAPE '\\'
                            OR LOWER(u.role) LIKE ?1 ESCAPE '\\'
                            OR LOWER(u.description) LIKE ?1 ESCAPE '\\')
                       AND (?2 IS NULL OR c.name = ?2)
                       AND (?3 IS NULL OR u.category = ?3)
                     ORDER BY c.name, u.category, u.position
                     LIMIT ?4"
                ),
                params![
                    pattern.as_str(),
                    country.as_deref(),
                    category.map(|c| c.as_str()),
                    i64::from(limit)
                ],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_unit(&row)?);
        }
        Ok(results)
    }
}

const UNIT_SELECT: &str = "SELECT u.id, c.name, u.category, u.fingerprint, u.scraped_at,
        u.service, u.name, u.model, u.origin_country, u.units, u.role, u.assessment,
        u.description, u.image_url, u.flag_url, u.sketchfab_embed_url
     FROM military_units u
     JOIN countries c ON c.id = u.country_id";

async fn schema_version(conn: &Connection) -> u32 {
    match conn
        .query("SELECT MAX(version) FROM schema_migrations", params![])
        .await
    {
        Ok(mut rows) => match rows.next().await {
            Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
            _ => 0,
        },
        Err(_) => 0, // Table doesn't exist yet
    }
}

/// `india` -> `India`, `south korea` -> `South Korea`.
fn display_name(key: &str) -> String {
    key.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercased `%term%` with LIKE wildcards escaped. `None` for blank input.
fn like_pattern(term: &str) -> Option<String> {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return None;
    }
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Some(format!("%{escaped}%"))
}

fn row_to_country(row: &libsql::Row) -> Result<CountryRecord> {
    Ok(CountryRecord {
        id: row.get::<String>(0).map_err(db_err)?,
        name: row.get::<String>(1).map_err(db_err)?,
        display_name: row.get::<String>(2).map_err(db_err)?,
        created_at: row.get::<String>(3).map_err(db_err)?,
        last_updated: row.get::<String>(4).map_err(db_err)?,
    })
}

/// Convert a row selected with [`UNIT_SELECT`] to a [`StoredUnit`].
fn row_to_unit(row: &libsql::Row) -> Result<StoredUnit> {
    let category: String = row.get(2).map_err(db_err)?;
    Ok(StoredUnit {
        id: row.get::<String>(0).map_err(db_err)?,
        source_country: row.get::<String>(1).map_err(db_err)?,
        category: category
            .parse()
            .map_err(|_| ArmoryError::Storage(format!("unknown category '{category}' in row")))?,
        fingerprint: row.get::<String>(3).map_err(db_err)?,
        scraped_at: row.get::<String>(4).map_err(db_err)?,
        unit: MilitaryUnit {
            service: row.get::<String>(5).map_err(db_err)?,
            name: row.get::<String>(6).map_err(db_err)?,
            model: row.get::<String>(7).map_err(db_err)?,
            country: row.get::<String>(8).map_err(db_err)?,
            units: row.get::<i64>(9).unwrap_or(0),
            role: row.get::<String>(10).map_err(db_err)?,
            assessment: row.get::<String>(11).map_err(db_err)?,
            description: row.get::<String>(12).map_err(db_err)?,
            image_url: row.get::<String>(13).ok(),
            flag_url: row.get::<String>(14).ok(),
            sketchfab_embed_url: row.get::<String>(15).ok(),
        },
    })
}
