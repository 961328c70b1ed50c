//! SQL migration definitions for the Armory database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: countries, military_units",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS countries (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS military_units (
    id                  TEXT PRIMARY KEY,
    country_id          TEXT NOT NULL REFERENCES countries(id) ON DELETE CASCADE,
    category            TEXT NOT NULL,
    position            INTEGER NOT NULL,
    fingerprint         TEXT NOT NULL,
    service             TEXT NOT NULL,
    name                TEXT NOT NULL,
    model               TEXT NOT NULL,
    origin_country      TEXT NOT NULL,
    units               INTEGER NOT NULL DEFAULT 0,
    role                TEXT NOT NULL,
    assessment          TEXT NOT NULL,
    description         TEXT NOT NULL,
    image_url           TEXT,
    flag_url            TEXT,
    sketchfab_embed_url TEXT,
    scraped_at          TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_units_country_category ON military_units(country_id, category);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
