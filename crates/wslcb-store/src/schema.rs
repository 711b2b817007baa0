//! DDL, migrations, and FTS5 setup. All schema changes live here;
//! connection management lives in [`crate::connection`].
//!
//! Migrations are tracked via `PRAGMA user_version`. Adding one is a
//! matter of appending a `(version, name, fn)` tuple to [`MIGRATIONS`].

use rusqlite::Connection;

use crate::error::Result;

const FTS_COLUMNS: &[&str] = &[
    "business_name",
    "business_location",
    "applicants",
    "license_type",
    "application_type",
    "license_number",
    "previous_business_name",
    "previous_applicants",
    "previous_business_location",
];

fn m001_baseline(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS locations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            raw_address TEXT NOT NULL,
            city TEXT DEFAULT '',
            state TEXT DEFAULT 'WA',
            zip_code TEXT DEFAULT '',
            address_line_1 TEXT DEFAULT '',
            address_line_2 TEXT DEFAULT '',
            std_city TEXT DEFAULT '',
            std_state TEXT DEFAULT '',
            std_zip TEXT DEFAULT '',
            address_validated_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(raw_address)
        );
        CREATE INDEX IF NOT EXISTS idx_locations_city ON locations(city);
        CREATE INDEX IF NOT EXISTS idx_locations_zip ON locations(zip_code);
        CREATE INDEX IF NOT EXISTS idx_locations_std_city ON locations(std_city);
        CREATE INDEX IF NOT EXISTS idx_locations_std_zip ON locations(std_zip);

        CREATE TABLE IF NOT EXISTS license_endorsements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS endorsement_codes (
            code TEXT NOT NULL,
            endorsement_id INTEGER NOT NULL
                REFERENCES license_endorsements(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (code, endorsement_id)
        );

        CREATE TABLE IF NOT EXISTS scrape_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            status TEXT NOT NULL DEFAULT 'running',
            records_new INTEGER DEFAULT 0,
            records_approved INTEGER DEFAULT 0,
            records_discontinued INTEGER DEFAULT 0,
            records_skipped INTEGER DEFAULT 0,
            error_message TEXT,
            snapshot_path TEXT,
            content_hash TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS source_types (
            id INTEGER PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            label TEXT NOT NULL,
            description TEXT DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_type_id INTEGER NOT NULL
                REFERENCES source_types(id),
            snapshot_path TEXT,
            url TEXT,
            captured_at TEXT,
            ingested_at TEXT NOT NULL DEFAULT (datetime('now')),
            scrape_log_id INTEGER
                REFERENCES scrape_log(id),
            metadata TEXT NOT NULL DEFAULT '{}',
            UNIQUE(source_type_id, snapshot_path)
        );

        CREATE TABLE IF NOT EXISTS license_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            section_type TEXT NOT NULL,
            record_date TEXT NOT NULL,
            business_name TEXT,
            location_id INTEGER REFERENCES locations(id),
            applicants TEXT,
            license_type TEXT,
            application_type TEXT,
            license_number TEXT,
            contact_phone TEXT,
            previous_business_name TEXT DEFAULT '',
            previous_applicants TEXT DEFAULT '',
            previous_location_id INTEGER REFERENCES locations(id),
            raw_business_name TEXT,
            raw_previous_business_name TEXT,
            raw_applicants TEXT,
            raw_previous_applicants TEXT,
            scraped_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(section_type, record_date, license_number, application_type)
        );

        CREATE TABLE IF NOT EXISTS record_endorsements (
            record_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            endorsement_id INTEGER NOT NULL
                REFERENCES license_endorsements(id) ON DELETE CASCADE,
            PRIMARY KEY (record_id, endorsement_id)
        );
        CREATE INDEX IF NOT EXISTS idx_re_endorsement
            ON record_endorsements(endorsement_id);

        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            entity_type TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE TABLE IF NOT EXISTS record_entities (
            record_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            entity_id INTEGER NOT NULL
                REFERENCES entities(id) ON DELETE CASCADE,
            role TEXT NOT NULL DEFAULT 'applicant',
            position INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (record_id, entity_id, role)
        );
        CREATE INDEX IF NOT EXISTS idx_re_entity ON record_entities(entity_id);
        CREATE INDEX IF NOT EXISTS idx_re_role ON record_entities(role);

        CREATE TABLE IF NOT EXISTS record_links (
            id INTEGER PRIMARY KEY,
            new_app_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            outcome_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            confidence TEXT NOT NULL
                CHECK (confidence IN ('high', 'medium', 'low')),
            days_gap INTEGER,
            linked_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(new_app_id, outcome_id)
        );
        CREATE INDEX IF NOT EXISTS idx_record_links_new
            ON record_links(new_app_id);
        CREATE INDEX IF NOT EXISTS idx_record_links_outcome
            ON record_links(outcome_id);

        CREATE TABLE IF NOT EXISTS record_enrichments (
            record_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            step TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            version TEXT NOT NULL DEFAULT '1',
            PRIMARY KEY (record_id, step)
        );

        CREATE TABLE IF NOT EXISTS record_sources (
            record_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            source_id INTEGER NOT NULL
                REFERENCES sources(id) ON DELETE CASCADE,
            role TEXT NOT NULL DEFAULT 'first_seen'
                CHECK(role IN ('first_seen', 'confirmed', 'repaired')),
            PRIMARY KEY (record_id, source_id, role)
        );
        CREATE INDEX IF NOT EXISTS idx_rs_source
            ON record_sources(source_id);

        CREATE INDEX IF NOT EXISTS idx_records_section ON license_records(section_type);
        CREATE INDEX IF NOT EXISTS idx_records_date ON license_records(record_date);
        CREATE INDEX IF NOT EXISTS idx_records_business ON license_records(business_name);
        CREATE INDEX IF NOT EXISTS idx_records_license_num ON license_records(license_number);
        CREATE INDEX IF NOT EXISTS idx_records_app_type ON license_records(application_type);
        CREATE INDEX IF NOT EXISTS idx_records_location ON license_records(location_id);
        CREATE INDEX IF NOT EXISTS idx_records_prev_location ON license_records(previous_location_id);

        INSERT OR IGNORE INTO source_types (id, slug, label, description)
        VALUES
            (1, 'live_scrape',     'Live Scrape',
             'Direct scrape of the WSLCB licensing page'),
            (2, 'co_archive',      'CO Page Archive',
             'Cannabis Observer archived HTML snapshots'),
            (3, 'internet_archive','Internet Archive',
             'Wayback Machine snapshots'),
            (4, 'co_diff_archive', 'CO Diff Archive',
             'Cannabis Observer diff-detected change snapshots'),
            (5, 'manual',          'Manual Entry',
             'Manually entered or corrected records');
        "#,
    )?;
    Ok(())
}

/// `record_enrichments` ships inline in `m001_baseline` here (unlike the
/// upstream, where it was bolted on later); this migration is retained
/// only to add the `raw_*` shadow columns to pre-framework databases and
/// backfill them from the cleaned values.
fn m002_enrichment_tracking(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS record_enrichments (
            record_id INTEGER NOT NULL
                REFERENCES license_records(id) ON DELETE CASCADE,
            step TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            version TEXT NOT NULL DEFAULT '1',
            PRIMARY KEY (record_id, step)
        )",
        [],
    )?;

    let existing = table_columns(conn, "license_records")?;
    for col in [
        "raw_business_name",
        "raw_previous_business_name",
        "raw_applicants",
        "raw_previous_applicants",
    ] {
        if !existing.contains(&col.to_string()) {
            conn.execute(
                &format!("ALTER TABLE license_records ADD COLUMN {col} TEXT"),
                [],
            )?;
        }
    }

    conn.execute(
        "UPDATE license_records SET
            raw_business_name = business_name,
            raw_previous_business_name = previous_business_name,
            raw_applicants = applicants,
            raw_previous_applicants = previous_applicants
        WHERE raw_business_name IS NULL",
        [],
    )?;
    Ok(())
}

fn m003_content_hash(conn: &Connection) -> Result<()> {
    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table'")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    if !tables.iter().any(|t| t == "scrape_log") {
        return Ok(());
    }
    let existing = table_columns(conn, "scrape_log")?;
    if !existing.contains(&"content_hash".to_string()) {
        conn.execute("ALTER TABLE scrape_log ADD COLUMN content_hash TEXT", [])?;
    }
    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(cols)
}

type Migration = (i64, &'static str, fn(&Connection) -> Result<()>);

const MIGRATIONS: &[Migration] = &[
    (1, "baseline", m001_baseline),
    (2, "enrichment_tracking", m002_enrichment_tracking),
    (3, "content_hash", m003_content_hash),
];

/// The highest migration version fully subsumed by a pre-framework
/// database's existing schema. Databases with tables already present
/// but `user_version == 0` are stamped here before newer migrations run.
const EXISTING_DB_STAMP_VERSION: i64 = 1;

fn user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

fn set_user_version(conn: &Connection, version: i64) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn database_has_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='license_records'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Run every pending migration and return the resulting `user_version`.
pub fn migrate(conn: &Connection) -> Result<i64> {
    let mut current = user_version(conn)?;

    if current == 0 && database_has_tables(conn)? {
        tracing::info!(
            version = EXISTING_DB_STAMP_VERSION,
            "existing database detected; stamping user_version"
        );
        set_user_version(conn, EXISTING_DB_STAMP_VERSION)?;
        current = EXISTING_DB_STAMP_VERSION;
    }

    for (version, name, run) in MIGRATIONS {
        if *version > current {
            tracing::info!(version, name, "running migration");
            run(conn)?;
            set_user_version(conn, *version)?;
            current = *version;
        }
    }

    Ok(current)
}

/// Create or rebuild the FTS5 virtual table and its sync triggers. The
/// table is content-less, backed by a view joining `license_records` to
/// both the primary and previous `locations` row, kept current via
/// insert/update/delete triggers using the `('delete', ...)` external
/// content idiom.
fn ensure_fts(conn: &Connection) -> Result<()> {
    conn.execute("DROP VIEW IF EXISTS license_records_fts_content", [])?;
    conn.execute(
        "CREATE VIEW license_records_fts_content AS
        SELECT
            lr.id,
            lr.business_name,
            COALESCE(loc.raw_address, '') AS business_location,
            lr.applicants,
            lr.license_type,
            lr.application_type,
            lr.license_number,
            COALESCE(lr.previous_business_name, '') AS previous_business_name,
            COALESCE(lr.previous_applicants, '') AS previous_applicants,
            COALESCE(ploc.raw_address, '') AS previous_business_location
        FROM license_records lr
        LEFT JOIN locations loc ON loc.id = lr.location_id
        LEFT JOIN locations ploc ON ploc.id = lr.previous_location_id",
        [],
    )?;

    let mut needs_rebuild = false;
    match conn.prepare("SELECT * FROM license_records_fts LIMIT 0") {
        Ok(stmt) => {
            let current_cols: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();
            if current_cols != FTS_COLUMNS {
                needs_rebuild = true;
            }
            let fts_sql: Option<String> = conn
                .query_row(
                    "SELECT sql FROM sqlite_schema WHERE name = 'license_records_fts'",
                    [],
                    |row| row.get(0),
                )
                .ok();
            if let Some(sql) = fts_sql {
                if !sql.contains("content='license_records_fts_content'") {
                    needs_rebuild = true;
                }
            }
        }
        Err(_) => needs_rebuild = true,
    }

    if needs_rebuild {
        conn.execute_batch(
            "DROP TRIGGER IF EXISTS license_records_ai;
             DROP TRIGGER IF EXISTS license_records_ad;
             DROP TRIGGER IF EXISTS license_records_au;
             DROP TRIGGER IF EXISTS license_records_bu;
             DROP TRIGGER IF EXISTS license_records_bd;
             DROP TABLE IF EXISTS license_records_fts;",
        )?;
    }

    let cols = FTS_COLUMNS.join(", ");
    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS license_records_fts USING fts5(
                {cols},
                content='license_records_fts_content',
                content_rowid='id'
            )"
        ),
        [],
    )?;

    let new_vals = FTS_COLUMNS
        .iter()
        .map(|c| format!("(SELECT {c} FROM license_records_fts_content WHERE id = new.id)"))
        .collect::<Vec<_>>()
        .join(", ");

    conn.execute_batch(&format!(
        "DROP TRIGGER IF EXISTS license_records_ai;
         CREATE TRIGGER license_records_ai AFTER INSERT ON license_records BEGIN
             INSERT INTO license_records_fts(rowid, {cols})
             VALUES (new.id, {new_vals});
         END;

         DROP TRIGGER IF EXISTS license_records_bu;
         DROP TRIGGER IF EXISTS license_records_au;
         CREATE TRIGGER license_records_bu BEFORE UPDATE ON license_records BEGIN
             INSERT INTO license_records_fts(license_records_fts, rowid, {cols})
             SELECT 'delete', old.id, {cols} FROM license_records_fts_content WHERE id = old.id;
         END;
         CREATE TRIGGER license_records_au AFTER UPDATE ON license_records BEGIN
             INSERT INTO license_records_fts(rowid, {cols})
             VALUES (new.id, {new_vals});
         END;

         DROP TRIGGER IF EXISTS license_records_bd;
         DROP TRIGGER IF EXISTS license_records_ad;
         CREATE TRIGGER license_records_bd BEFORE DELETE ON license_records BEGIN
             INSERT INTO license_records_fts(license_records_fts, rowid, {cols})
             SELECT 'delete', old.id, {cols} FROM license_records_fts_content WHERE id = old.id;
         END;"
    ))?;

    if needs_rebuild {
        conn.execute(
            &format!(
                "INSERT INTO license_records_fts(rowid, {cols})
                 SELECT id, {cols} FROM license_records_fts_content"
            ),
            [],
        )?;
        tracing::info!("FTS index built");
    }

    Ok(())
}

/// Create tables, run migrations, and build FTS. Safe to call repeatedly.
pub fn init_db(conn: &Connection) -> Result<()> {
    migrate(conn)?;
    ensure_fts(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
        let version = user_version(&conn).unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn fts_table_exists_after_init() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM license_records_fts", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn source_types_seeded() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM source_types", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 5);
    }
}
