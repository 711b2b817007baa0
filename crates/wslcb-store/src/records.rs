//! Record CRUD, search, filtering, and hydration (§4.6, §4.6a).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rusqlite::{named_params, Connection, OptionalExtension};
use wslcb_model::{EntityRole, RawRecord};

use crate::entities::{get_record_entities, parse_and_link_entities, LinkedEntity};
use crate::endorsements::get_record_endorsements;
use crate::error::Result;
use crate::locations::get_or_create_location;
use crate::names::{clean_applicants, clean_name};

/// A record row as joined with its primary and previous location —
/// mirrors `_RECORD_COLUMNS`/`_RECORD_JOINS`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub id: i64,
    pub section_type: String,
    pub record_date: String,
    pub business_name: Option<String>,
    pub applicants: Option<String>,
    pub license_type: Option<String>,
    pub application_type: Option<String>,
    pub license_number: Option<String>,
    pub contact_phone: Option<String>,
    pub previous_business_name: String,
    pub previous_applicants: String,
    pub location_id: Option<i64>,
    pub previous_location_id: Option<i64>,
    pub scraped_at: String,
    pub created_at: String,

    pub business_location: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub address_line_1: String,
    pub address_line_2: String,
    pub std_city: String,
    pub std_state: String,
    pub std_zip: String,
    pub address_validated_at: Option<String>,

    pub previous_business_location: String,
    pub previous_city: String,
    pub previous_state: String,
    pub previous_zip_code: String,
    pub prev_address_line_1: String,
    pub prev_address_line_2: String,
    pub prev_std_city: String,
    pub prev_std_state: String,
    pub prev_std_zip: String,
    pub prev_address_validated_at: Option<String>,
}

const RECORD_COLUMNS: &str = "
    lr.id, lr.section_type, lr.record_date, lr.business_name,
    lr.applicants, lr.license_type, lr.application_type,
    lr.license_number, lr.contact_phone,
    lr.previous_business_name, lr.previous_applicants,
    lr.location_id, lr.previous_location_id,
    lr.scraped_at, lr.created_at,
    COALESCE(loc.raw_address, '') AS business_location,
    COALESCE(loc.city, '') AS city,
    COALESCE(loc.state, 'WA') AS state,
    COALESCE(loc.zip_code, '') AS zip_code,
    COALESCE(loc.address_line_1, '') AS address_line_1,
    COALESCE(loc.address_line_2, '') AS address_line_2,
    COALESCE(loc.std_city, '') AS std_city,
    COALESCE(loc.std_state, '') AS std_state,
    COALESCE(loc.std_zip, '') AS std_zip,
    loc.address_validated_at,
    COALESCE(ploc.raw_address, '') AS previous_business_location,
    COALESCE(ploc.city, '') AS previous_city,
    COALESCE(ploc.state, '') AS previous_state,
    COALESCE(ploc.zip_code, '') AS previous_zip_code,
    COALESCE(ploc.address_line_1, '') AS prev_address_line_1,
    COALESCE(ploc.address_line_2, '') AS prev_address_line_2,
    COALESCE(ploc.std_city, '') AS prev_std_city,
    COALESCE(ploc.std_state, '') AS prev_std_state,
    COALESCE(ploc.std_zip, '') AS prev_std_zip,
    ploc.address_validated_at AS prev_address_validated_at";

const RECORD_JOINS: &str = "
    FROM license_records lr
    LEFT JOIN locations loc ON loc.id = lr.location_id
    LEFT JOIN locations ploc ON ploc.id = lr.previous_location_id";

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<Record> {
    Ok(Record {
        id: row.get(0)?,
        section_type: row.get(1)?,
        record_date: row.get(2)?,
        business_name: row.get(3)?,
        applicants: row.get(4)?,
        license_type: row.get(5)?,
        application_type: row.get(6)?,
        license_number: row.get(7)?,
        contact_phone: row.get(8)?,
        previous_business_name: row.get(9)?,
        previous_applicants: row.get(10)?,
        location_id: row.get(11)?,
        previous_location_id: row.get(12)?,
        scraped_at: row.get(13)?,
        created_at: row.get(14)?,
        business_location: row.get(15)?,
        city: row.get(16)?,
        state: row.get(17)?,
        zip_code: row.get(18)?,
        address_line_1: row.get(19)?,
        address_line_2: row.get(20)?,
        std_city: row.get(21)?,
        std_state: row.get(22)?,
        std_zip: row.get(23)?,
        address_validated_at: row.get(24)?,
        previous_business_location: row.get(25)?,
        previous_city: row.get(26)?,
        previous_state: row.get(27)?,
        previous_zip_code: row.get(28)?,
        prev_address_line_1: row.get(29)?,
        prev_address_line_2: row.get(30)?,
        prev_std_city: row.get(31)?,
        prev_std_state: row.get(32)?,
        prev_std_zip: row.get(33)?,
        prev_address_validated_at: row.get(34)?,
    })
}

/// Display-ready fields derived from a [`Record`]'s standardized-first
/// address fallback (§4.6a's `enrich_record`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisplayFields {
    pub display_city: String,
    pub display_zip: String,
    pub display_previous_city: String,
    pub display_previous_zip: String,
}

pub fn enrich_record(record: &Record) -> DisplayFields {
    let pick = |std: &str, raw: &str| {
        if std.is_empty() {
            raw.to_string()
        } else {
            std.to_string()
        }
    };
    DisplayFields {
        display_city: pick(&record.std_city, &record.city),
        display_zip: pick(&record.std_zip, &record.zip_code),
        display_previous_city: pick(&record.prev_std_city, &record.previous_city),
        display_previous_zip: pick(&record.prev_std_zip, &record.previous_zip_code),
    }
}

/// A record plus everything a reader needs to display it (§4.6a).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HydratedRecord {
    pub record: Record,
    pub display: DisplayFields,
    pub endorsements: Vec<String>,
    pub entities: HashMap<EntityRole, Vec<LinkedEntity>>,
}

/// Attach endorsements, entities, and display fields to a page of
/// records — shared by [`search_records`] and [`get_entity_records`].
fn hydrate(conn: &Connection, rows: Vec<Record>) -> Result<Vec<HydratedRecord>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut endorsement_map = get_record_endorsements(conn, &ids)?;
    let mut entity_map = get_record_entities(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|record| {
            let display = enrich_record(&record);
            let endorsements = endorsement_map.remove(&record.id).unwrap_or_default();
            let entities = entity_map.remove(&record.id).unwrap_or_default();
            HydratedRecord {
                record,
                display,
                endorsements,
                entities,
            }
        })
        .collect())
}

/// Insert a record, returning `(record_id, is_new)`. `is_new` is `false`
/// when a row with the same natural key already existed, in which case
/// `record_id` is that existing row's id. Duplicate detection runs
/// *before* any location row is created, so a duplicate insert never
/// creates an orphaned location.
pub fn insert_record(conn: &Connection, record: &RawRecord) -> Result<(i64, bool)> {
    let section = record
        .section
        .map(|s| s.to_string())
        .ok_or(crate::error::Error::MissingField { field: "section" })?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM license_records
             WHERE section_type = ?1 AND record_date = ?2
               AND license_number = ?3 AND application_type = ?4
             LIMIT 1",
            (&section, &record.record_date, &record.license_number, &record.application_type),
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok((id, false));
    }

    let location_id = get_or_create_location(
        conn,
        &record.business_location,
        &record.city,
        &record.state,
        &record.zip_code,
    )?;
    let previous_location_id = get_or_create_location(
        conn,
        record.previous_business_location.as_deref().unwrap_or(""),
        record.previous_city.as_deref().unwrap_or(""),
        record.previous_state.as_deref().unwrap_or(""),
        record.previous_zip_code.as_deref().unwrap_or(""),
    )?;

    let business_name = clean_name(&record.business_name);
    let applicants = clean_applicants(&record.applicants);
    let previous_business_name = record.previous_business_name.as_deref().map(clean_name);
    let previous_applicants = record.previous_applicants.as_deref().map(clean_applicants);

    let changed = conn.execute(
        "INSERT INTO license_records
             (section_type, record_date, business_name, location_id,
              applicants, license_type, application_type, license_number,
              contact_phone, previous_business_name, previous_applicants,
              previous_location_id, raw_business_name, raw_previous_business_name,
              raw_applicants, raw_previous_applicants, scraped_at)
         VALUES
             (:section_type, :record_date, :business_name, :location_id,
              :applicants, :license_type, :application_type, :license_number,
              :contact_phone, :previous_business_name, :previous_applicants,
              :previous_location_id, :raw_business_name, :raw_previous_business_name,
              :raw_applicants, :raw_previous_applicants, :scraped_at)",
        named_params! {
            ":section_type": section,
            ":record_date": record.record_date,
            ":business_name": business_name,
            ":location_id": location_id,
            ":applicants": applicants,
            ":license_type": record.license_type,
            ":application_type": record.application_type,
            ":license_number": record.license_number,
            ":contact_phone": record.contact_phone,
            ":previous_business_name": previous_business_name,
            ":previous_applicants": previous_applicants,
            ":previous_location_id": previous_location_id,
            ":raw_business_name": record.business_name,
            ":raw_previous_business_name": record.previous_business_name,
            ":raw_applicants": record.applicants,
            ":raw_previous_applicants": record.previous_applicants,
            ":scraped_at": record.scraped_at,
        },
    );
    let changed = match changed {
        Ok(n) => n,
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            // Lost a race with another writer inserting the same natural key.
            let id: i64 = conn.query_row(
                "SELECT id FROM license_records
                 WHERE section_type = ?1 AND record_date = ?2
                   AND license_number = ?3 AND application_type = ?4",
                (&section, &record.record_date, &record.license_number, &record.application_type),
                |row| row.get(0),
            )?;
            return Ok((id, false));
        }
        Err(e) => return Err(e.into()),
    };
    debug_assert_eq!(changed, 1);

    let record_id = conn.last_insert_rowid();
    parse_and_link_entities(conn, record_id, &applicants, EntityRole::Applicant)?;
    if let Some(prev) = &previous_applicants {
        if !prev.is_empty() {
            parse_and_link_entities(conn, record_id, prev, EntityRole::PreviousApplicant)?;
        }
    }
    Ok((record_id, true))
}

/// Filters accepted by [`search_records`]; an empty/default value for any
/// field means "no constraint on this dimension".
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub query: String,
    pub section_type: String,
    pub application_type: String,
    pub endorsement: String,
    pub city: String,
    pub date_from: String,
    pub date_to: String,
}

/// Build the FTS5 `MATCH` expression for a free-text query: strip quote
/// characters, then AND together each term wrapped in `"term"*` for a
/// prefix match.
fn fts_query(query: &str) -> Option<String> {
    let safe: String = query.chars().filter(|c| *c != '"' && *c != '\'').collect();
    let terms: Vec<String> = safe
        .split_whitespace()
        .map(|t| format!("\"{t}\"*"))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

/// Search records with filters, returning `(records, total_count)`.
pub fn search_records(
    conn: &Connection,
    filters: &SearchFilters,
    page: i64,
    per_page: i64,
) -> Result<(Vec<HydratedRecord>, i64)> {
    let mut conditions = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(fts) = fts_query(&filters.query) {
        conditions.push(
            "lr.id IN (SELECT rowid FROM license_records_fts WHERE license_records_fts MATCH ?)"
                .to_string(),
        );
        params.push(Box::new(fts));
    }
    if !filters.section_type.is_empty() {
        conditions.push("lr.section_type = ?".to_string());
        params.push(Box::new(filters.section_type.clone()));
    }
    if !filters.application_type.is_empty() {
        conditions.push("lr.application_type = ?".to_string());
        params.push(Box::new(filters.application_type.clone()));
    }
    if !filters.endorsement.is_empty() {
        conditions.push(
            "lr.id IN (
                SELECT re.record_id FROM record_endorsements re
                JOIN license_endorsements le ON le.id = re.endorsement_id
                WHERE le.name = ?
            )"
            .to_string(),
        );
        params.push(Box::new(filters.endorsement.clone()));
    }
    if !filters.city.is_empty() {
        conditions.push(
            "(COALESCE(NULLIF(loc.std_city, ''), loc.city) = ?
              OR COALESCE(NULLIF(ploc.std_city, ''), ploc.city) = ?)"
                .to_string(),
        );
        params.push(Box::new(filters.city.clone()));
        params.push(Box::new(filters.city.clone()));
    }
    if !filters.date_from.is_empty() {
        conditions.push("lr.record_date >= ?".to_string());
        params.push(Box::new(filters.date_from.clone()));
    }
    if !filters.date_to.is_empty() {
        conditions.push("lr.record_date <= ?".to_string());
        params.push(Box::new(filters.date_to.clone()));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let count_sql = if filters.city.is_empty() {
        format!("SELECT COUNT(*) FROM license_records lr {where_clause}")
    } else {
        format!(
            "SELECT COUNT(*) FROM license_records lr
             LEFT JOIN locations loc ON loc.id = lr.location_id
             LEFT JOIN locations ploc ON ploc.id = lr.previous_location_id
             {where_clause}"
        )
    };
    let total: i64 = {
        let mut stmt = conn.prepare(&count_sql)?;
        stmt.query_row(rusqlite::params_from_iter(params.iter().map(|p| p.as_ref())), |row| {
            row.get(0)
        })?
    };

    let offset = (page - 1).max(0) * per_page;
    let page_sql = format!(
        "SELECT {RECORD_COLUMNS} {RECORD_JOINS}
         {where_clause}
         ORDER BY lr.record_date DESC, lr.id DESC
         LIMIT ? OFFSET ?"
    );
    let rows: Vec<Record> = {
        let mut stmt = conn.prepare(&page_sql)?;
        let mut all_params: Vec<&dyn rusqlite::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        all_params.push(&per_page);
        all_params.push(&offset);
        stmt.query_map(rusqlite::params_from_iter(all_params), record_from_row)?
            .collect::<std::result::Result<_, _>>()?
    };

    Ok((hydrate(conn, rows)?, total))
}

/// Distinct filter-dropdown values, cached for [`FILTER_CACHE_TTL`] since
/// the underlying data only changes a couple of times a day.
pub const FILTER_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub section_type: Vec<String>,
    pub application_type: Vec<String>,
    pub city: Vec<String>,
    pub endorsement: Vec<String>,
}

/// Owns the 5-minute TTL cache for [`FilterOptions`] — an explicit state
/// handle in place of the module-level cache dict the upstream uses
/// (§9, "Global mutable state").
#[derive(Default)]
pub struct FilterOptionsCache {
    cached: Option<(FilterOptions, Instant)>,
}

impl FilterOptionsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, conn: &Connection) -> Result<FilterOptions> {
        if let Some((options, fetched_at)) = &self.cached {
            if fetched_at.elapsed() < FILTER_CACHE_TTL {
                return Ok(options.clone());
            }
        }
        let options = fetch_filter_options(conn)?;
        self.cached = Some((options.clone(), Instant::now()));
        Ok(options)
    }
}

fn fetch_filter_options(conn: &Connection) -> Result<FilterOptions> {
    let fetch_distinct = |col: &str| -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM license_records
             WHERE {col} IS NOT NULL AND {col} != '' ORDER BY {col}"
        );
        let mut stmt = conn.prepare(&sql)?;
        Ok(stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?)
    };

    let section_type = fetch_distinct("section_type")?;
    let application_type = fetch_distinct("application_type")?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT display_city FROM (
           SELECT COALESCE(NULLIF(l.std_city, ''), l.city) AS display_city
           FROM locations l
           WHERE l.id IN (
             SELECT location_id FROM license_records WHERE location_id IS NOT NULL
             UNION
             SELECT previous_location_id FROM license_records WHERE previous_location_id IS NOT NULL
           )
         ) WHERE display_city IS NOT NULL AND display_city != '' ORDER BY display_city",
    )?;
    let city = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    let endorsement = crate::endorsements::get_endorsement_options(conn)?;

    Ok(FilterOptions {
        section_type,
        application_type,
        city,
        endorsement,
    })
}

/// A recently-completed scrape, as returned by [`Stats`].
#[derive(Debug, Clone, Default)]
pub struct ScrapeLogRow {
    pub id: i64,
    pub status: String,
    pub records_new: i64,
    pub records_approved: i64,
    pub records_discontinued: i64,
    pub records_skipped: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_records: i64,
    pub new_application_count: i64,
    pub approved_count: i64,
    pub discontinued_count: i64,
    pub date_range: (Option<String>, Option<String>),
    pub unique_businesses: i64,
    pub unique_licenses: i64,
    pub unique_entities: i64,
    pub last_scrape: Option<ScrapeLogRow>,
}

/// Summary statistics. The two `COUNT(DISTINCT ...)` queries stay
/// separate from the main aggregate — combining them forces a slower
/// full-table scan in SQLite.
pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let (total_records, new_application_count, approved_count, discontinued_count, min_date, max_date) =
        conn.query_row(
            "SELECT
                COUNT(*),
                SUM(CASE WHEN section_type = 'new_application' THEN 1 ELSE 0 END),
                SUM(CASE WHEN section_type = 'approved' THEN 1 ELSE 0 END),
                SUM(CASE WHEN section_type = 'discontinued' THEN 1 ELSE 0 END),
                MIN(record_date), MAX(record_date)
             FROM license_records",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                    row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

    let unique_businesses: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT business_name) FROM license_records",
        [],
        |row| row.get(0),
    )?;
    let unique_licenses: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT license_number) FROM license_records",
        [],
        |row| row.get(0),
    )?;
    let unique_entities: i64 =
        conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;

    let last_scrape = conn
        .query_row(
            "SELECT id, status, records_new, records_approved, records_discontinued, records_skipped
             FROM scrape_log ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(ScrapeLogRow {
                    id: row.get(0)?,
                    status: row.get(1)?,
                    records_new: row.get(2)?,
                    records_approved: row.get(3)?,
                    records_discontinued: row.get(4)?,
                    records_skipped: row.get(5)?,
                })
            },
        )
        .optional()?;

    Ok(Stats {
        total_records,
        new_application_count,
        approved_count,
        discontinued_count,
        date_range: (min_date, max_date),
        unique_businesses,
        unique_licenses,
        unique_entities,
        last_scrape,
    })
}

pub fn get_record_by_id(conn: &Connection, record_id: i64) -> Result<Option<HydratedRecord>> {
    let row: Option<Record> = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} {RECORD_JOINS} WHERE lr.id = ?1"),
            [record_id],
            record_from_row,
        )
        .optional()?;
    match row {
        Some(r) => Ok(hydrate(conn, vec![r])?.into_iter().next()),
        None => Ok(None),
    }
}

/// Other records sharing the same license number.
pub fn get_related_records(
    conn: &Connection,
    license_number: &str,
    exclude_id: i64,
) -> Result<Vec<HydratedRecord>> {
    let sql = format!(
        "SELECT {RECORD_COLUMNS} {RECORD_JOINS}
         WHERE lr.license_number = ?1 AND lr.id != ?2
         ORDER BY lr.record_date DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<Record> = stmt
        .query_map((license_number, exclude_id), record_from_row)?
        .collect::<std::result::Result<_, _>>()?;
    hydrate(conn, rows)
}

/// All records associated with an entity.
pub fn get_entity_records(conn: &Connection, entity_id: i64) -> Result<Vec<HydratedRecord>> {
    let sql = format!(
        "SELECT DISTINCT {RECORD_COLUMNS} {RECORD_JOINS}
         JOIN record_entities re ON re.record_id = lr.id
         WHERE re.entity_id = ?1
         ORDER BY lr.record_date DESC, lr.id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows: Vec<Record> = stmt
        .query_map([entity_id], record_from_row)?
        .collect::<std::result::Result<_, _>>()?;
    hydrate(conn, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;
    use wslcb_model::Section;

    fn sample() -> RawRecord {
        RawRecord {
            section: Some(Section::NewApplication),
            record_date: "2025-06-10".to_string(),
            business_name: "NEW LEAF DISPENSARY".to_string(),
            applicants: "NEW LEAF DISPENSARY; CAROL NEWBY".to_string(),
            license_type: "CANNABIS RETAILER".to_string(),
            application_type: "ASSUMPTION".to_string(),
            license_number: "415678".to_string(),
            business_location: "123 MAIN ST, SEATTLE, WA 98101".to_string(),
            city: "SEATTLE".to_string(),
            state: "WA".to_string(),
            zip_code: "98101".to_string(),
            scraped_at: "2025-06-11T00:00:00Z".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn insert_record_creates_location_and_entity() {
        let conn = open_in_memory().unwrap();
        let (id, is_new) = insert_record(&conn, &sample()).unwrap();
        assert!(is_new);
        let hydrated = get_record_by_id(&conn, id).unwrap().unwrap();
        assert_eq!(hydrated.record.business_name.as_deref(), Some("NEW LEAF DISPENSARY"));
        assert_eq!(hydrated.entities[&EntityRole::Applicant].len(), 1);
    }

    #[test]
    fn insert_record_cleans_business_fields_but_preserves_raw() {
        let conn = open_in_memory().unwrap();
        let mut rec = sample();
        rec.business_name = "new leaf dispensary,".to_string();
        rec.applicants = "new leaf dispensary,; carol newby".to_string();
        rec.previous_business_name = Some("old smoke shop.".to_string());
        rec.previous_applicants = Some("old smoke shop.; alice olden".to_string());

        let (id, _) = insert_record(&conn, &rec).unwrap();

        let (business_name, applicants, raw_business_name, raw_applicants): (
            String,
            String,
            String,
            String,
        ) = conn
            .query_row(
                "SELECT business_name, applicants, raw_business_name, raw_applicants
                 FROM license_records WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(business_name, "NEW LEAF DISPENSARY");
        assert_eq!(applicants, "NEW LEAF DISPENSARY; CAROL NEWBY");
        assert_eq!(raw_business_name, "new leaf dispensary,");
        assert_eq!(raw_applicants, "new leaf dispensary,; carol newby");

        let (previous_business_name, previous_applicants, raw_previous_business_name): (
            String,
            String,
            String,
        ) = conn
            .query_row(
                "SELECT previous_business_name, previous_applicants, raw_previous_business_name
                 FROM license_records WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(previous_business_name, "OLD SMOKE SHOP");
        assert_eq!(previous_applicants, "OLD SMOKE SHOP; ALICE OLDEN");
        assert_eq!(raw_previous_business_name, "old smoke shop.");
    }

    #[test]
    fn duplicate_insert_reports_existing_id_and_creates_no_second_location() {
        let conn = open_in_memory().unwrap();
        let (id1, is_new1) = insert_record(&conn, &sample()).unwrap();
        let (id2, is_new2) = insert_record(&conn, &sample()).unwrap();
        assert!(is_new1);
        assert!(!is_new2);
        assert_eq!(id1, id2);
        let count: i64 = conn
            .query_row("SELECT count(*) FROM locations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn search_by_section_type_filters_results() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, &sample()).unwrap();
        let filters = SearchFilters {
            section_type: "new_application".to_string(),
            ..Default::default()
        };
        let (results, total) = search_records(&conn, &filters, 1, 50).unwrap();
        assert_eq!(total, 1);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn stats_counts_records_by_section() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, &sample()).unwrap();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.new_application_count, 1);
    }
}
