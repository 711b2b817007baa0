//! Normalization of license endorsements (§4.5). The upstream page
//! represents the same conceptual field two ways — a semicolon-delimited
//! text list for new applications, and an opaque numeric code for
//! approved/discontinued records — both folded into a shared
//! `license_endorsements` lookup and linked to records via
//! `record_endorsements`. Code→name mappings are seeded from historical
//! cross-referencing and refined automatically as new data arrives.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::error::Result;

/// Matches the legacy `CODE, NAME` encoding (e.g. `"450, GROCERY STORE -
/// BEER/WINE"`), distinct from a bare numeric code (`"450,"`).
fn code_name_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+),\s+(.+)$").unwrap())
}

/// Endorsement ids mapped to `code` that aren't the code's own
/// placeholder (name == code).
fn real_mapped_endorsements(conn: &Connection, code: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT ec.endorsement_id FROM endorsement_codes ec
         JOIN license_endorsements le ON le.id = ec.endorsement_id
         WHERE ec.code = ?1 AND le.name != ec.code",
    )?;
    Ok(stmt
        .query_map([code], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?)
}

/// Seed code→name mappings, built by cross-referencing license numbers
/// that appear in both the text (new-application) and numeric-code
/// (approved/discontinued) sections. Most codes map 1-to-1; a few map to
/// more than one endorsement that's always present together.
fn seed_code_map() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("2", &["NON-PROFIT ARTS ORGANIZATION"]),
        ("14", &["FARMERS MARKET FOR BEER"]),
        ("56", &["GROCERY STORE - BEER/WINE"]),
        ("63", &["GROCERY STORE - BEER/WINE"]),
        ("136", &["GROCERY STORE - BEER/WINE"]),
        ("320", &["BEER DISTRIBUTOR", "WINE DISTRIBUTOR"]),
        ("322", &["BONDED WINE WAREHOUSE"]),
        ("323", &["INTERSTATE COMMON CARRIER"]),
        ("325", &["DISTILL / RECTIFY"]),
        ("327", &["DOMESTIC WINERY < 250,000 LITERS"]),
        ("330", &["SPIRITS IMPORTER"]),
        ("332", &["MICROBREWERY"]),
        ("334", &["WINE DISTRIBUTOR"]),
        ("335", &["GROWER"]),
        ("336", &["WINE IMPORTER"]),
        ("337", &["DOMESTIC WINERY < 250,000 ADDL LOC"]),
        ("340", &["BEER CERTIFICATE OF APPROVAL"]),
        ("341", &["WINE CERTIFICATE OF APPROVAL"]),
        ("342", &["AUTH REP COA US BEER"]),
        ("343", &["AUTH REP COA US WINE"]),
        ("344", &["AUTH REP COA FOREIGN BEER"]),
        ("345", &["AUTH REP COA FOREIGN WINE"]),
        ("347", &["WINE SHIPPER TO CONSUMER"]),
        ("348", &["SHIP TO RETAILER", "SPIRITS COA"]),
        ("349", &["DIRECT SHIPMENT RECEIVER-IN/OUT WA"]),
        ("350", &["DIRECT SHIPMENT RECEIVER-IN WA ONLY"]),
        ("351", &["CRAFT DISTILLERY"]),
        ("353", &["WINERY WAREHOUSE"]),
        ("354", &["SPIRITS DISTRIBUTOR"]),
        ("355", &["SPIRITS COA"]),
        ("356", &["AUTH REP US SPIRITS COA"]),
        ("357", &["AUTH REP FOREIGN SPIRITS COA"]),
        ("359", &["OFF-SITE SPIRITS TASTING ROOM"]),
        ("371", &["BEER/CIDER GROCERY GROWLERS"]),
        ("372", &["COMBO GROCERY OFF PREM S/B/W"]),
        ("379", &["TAKEOUT/DELIVERY"]),
        ("380", &["PREMIXED COCKTAILS/WINE TO-GO"]),
        ("381", &["GROWLERS TAKEOUT/DELIVERY"]),
        ("387", &["CANNABIS TRANSPORTATION"]),
        ("388", &["CANNABIS RESEARCH"]),
        ("390", &["CANNABIS PRODUCER TIER 1"]),
        ("391", &["CANNABIS PRODUCER TIER 2"]),
        ("392", &["CANNABIS PRODUCER TIER 3"]),
        ("393", &["CANNABIS PROCESSOR"]),
        ("394", &["CANNABIS RETAILER"]),
        ("398", &["CATERING BEER AND WINE ONLY"]),
        ("399", &["CATERING SPIRITS BEER WINE"]),
        ("400", &["SPIRITS RETAILER", "SPIRITS SAMPLING"]),
        ("402", &["BEER/WINE THEATER"]),
        ("403", &["SPIRITS/BEER/WINE THEATER"]),
        ("412", &["SOJU SERVICE"]),
        ("413", &["SENIOR CENTER"]),
        ("420", &["BEER/WINE GIFT DELIVERY"]),
        ("422", &["BEER/WINE SPECIALTY SHOP"]),
        ("424", &["SPIRITS/BR/WN REST LOUNGE +"]),
        ("426", &["SPIRITS/BR/WN REST LOUNGE -"]),
        ("438", &["HOTEL"]),
        ("439", &["SPIRITS/BR/WN REST NONPUBLIC +"]),
        ("442", &["SPIRITS/BR/WN REST SERVICE BAR"]),
        ("450", &["GROCERY STORE - BEER/WINE"]),
        ("452", &["BEER/WINE REST - BEER"]),
        ("457", &["BEER/WINE REST - WINE"]),
        ("462", &["BEER/WINE REST - BEER/WINE"]),
        ("467", &["MOTEL"]),
        ("468", &["PRIVATE CLUB - BEER/WINE"]),
        ("469", &["PRIVATE CLUB - SPIRITS/BEER/WINE"]),
        ("473", &["SNACK BAR"]),
        ("477", &["SPORTS ENTERTAINMENT FACILITY"]),
        ("479", &["TAVERN - WINE"]),
        ("480", &["TAVERN - BEER/WINE"]),
        ("481", &["NIGHTCLUB"]),
    ]
}

fn ensure_endorsement(conn: &Connection, name: &str) -> Result<i64> {
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM license_endorsements WHERE name = ?1",
            [name],
            |row| row.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    conn.execute(
        "INSERT INTO license_endorsements (name) VALUES (?1)",
        [name],
    )?;
    Ok(conn.last_insert_rowid())
}

fn link_endorsement(conn: &Connection, record_id: i64, endorsement_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO record_endorsements (record_id, endorsement_id) VALUES (?1, ?2)",
        (record_id, endorsement_id),
    )?;
    Ok(())
}

/// Populate `license_endorsements`/`endorsement_codes` from the seed
/// map, then run the placeholder-merge pass so any placeholder created
/// by [`process_record`] before its code was seeded gets folded into the
/// now-known real endorsement(s). Safe to call repeatedly — skips rows
/// that already exist. Returns the number of new code mappings inserted.
pub fn seed_endorsements(conn: &Connection) -> Result<usize> {
    let mut inserted = 0;
    let mut seeded: HashMap<String, Vec<String>> = HashMap::new();
    for (code, names) in seed_code_map() {
        for name in *names {
            let eid = ensure_endorsement(conn, name)?;
            let changed = conn.execute(
                "INSERT OR IGNORE INTO endorsement_codes (code, endorsement_id) VALUES (?1, ?2)",
                (*code, eid),
            )?;
            inserted += changed;
        }
        seeded.insert(code.to_string(), names.iter().map(|n| n.to_string()).collect());
    }
    merge_placeholders(conn, &seeded)?;
    Ok(inserted)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Parse a record's raw `license_type` and create endorsement links.
/// Text (semicolon-separated) for new applications, an opaque numeric
/// code for modern approved/discontinued records, or a legacy `CODE,
/// NAME` pairing for older ones. An unrecognized code gets a placeholder
/// endorsement named after the code itself, resolved later by
/// [`discover_code_mappings`]. Returns the number of endorsements
/// linked.
pub fn process_record(
    conn: &Connection,
    record_id: i64,
    raw_license_type: &str,
    _section_type: &str,
) -> Result<usize> {
    if raw_license_type.is_empty() {
        return Ok(0);
    }
    let cleaned = raw_license_type.trim_end_matches(',').trim();

    if is_digits(cleaned) {
        let mut stmt = conn.prepare(
            "SELECT endorsement_id FROM endorsement_codes WHERE code = ?1",
        )?;
        let ids: Vec<i64> = stmt
            .query_map([cleaned], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        if !ids.is_empty() {
            for eid in &ids {
                link_endorsement(conn, record_id, *eid)?;
            }
            return Ok(ids.len());
        }
        tracing::info!(code = cleaned, record_id, "unknown endorsement code; creating placeholder");
        let eid = ensure_endorsement(conn, cleaned)?;
        conn.execute(
            "INSERT OR IGNORE INTO endorsement_codes (code, endorsement_id) VALUES (?1, ?2)",
            (cleaned, eid),
        )?;
        link_endorsement(conn, record_id, eid)?;
        return Ok(1);
    }

    if let Some(caps) = code_name_pattern().captures(cleaned) {
        let code = &caps[1];
        let name = caps[2].trim();
        let real_ids = real_mapped_endorsements(conn, code)?;
        if !real_ids.is_empty() {
            for eid in &real_ids {
                link_endorsement(conn, record_id, *eid)?;
            }
            return Ok(real_ids.len());
        }
        let eid = ensure_endorsement(conn, name)?;
        conn.execute(
            "INSERT OR IGNORE INTO endorsement_codes (code, endorsement_id) VALUES (?1, ?2)",
            (code, eid),
        )?;
        link_endorsement(conn, record_id, eid)?;
        return Ok(1);
    }

    let mut linked = 0;
    for part in raw_license_type.split(';') {
        let name = part.trim();
        if !name.is_empty() {
            let eid = ensure_endorsement(conn, name)?;
            link_endorsement(conn, record_id, eid)?;
            linked += 1;
        }
    }
    Ok(linked)
}

/// Process every record that has a `license_type` but no endorsement
/// links yet. Returns the number of records processed.
pub fn backfill(conn: &Connection) -> Result<usize> {
    let rows: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare(
            "SELECT lr.id, lr.license_type, lr.section_type
             FROM license_records lr
             LEFT JOIN record_endorsements re ON re.record_id = lr.id
             WHERE re.record_id IS NULL
               AND lr.license_type IS NOT NULL AND lr.license_type != ''",
        )?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<_, _>>()?
    };
    for (id, license_type, section_type) in &rows {
        process_record(conn, *id, license_type, section_type)?;
    }
    Ok(rows.len())
}

/// Cross-reference license numbers to learn new code→name mappings: for
/// each unmapped numeric code, find new-application records sharing the
/// same `license_number`, and if every matched text record agrees on a
/// set of endorsements, adopt that as the mapping. Returns the newly
/// discovered `{code: [name, ...]}` map.
pub fn discover_code_mappings(conn: &Connection) -> Result<HashMap<String, Vec<String>>> {
    let mapped: std::collections::HashSet<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ec.code
             FROM endorsement_codes ec
             JOIN license_endorsements le ON le.id = ec.endorsement_id
             WHERE le.name != ec.code",
        )?;
        stmt.query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?
    };

    let all_codes: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT REPLACE(license_type, ',', '') AS code
             FROM license_records
             WHERE section_type IN ('approved', 'discontinued')
               AND license_type GLOB '[0-9]*'",
        )?;
        stmt.query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?
    };
    let unmapped: Vec<String> = all_codes.into_iter().filter(|c| !mapped.contains(c)).collect();
    if unmapped.is_empty() {
        return Ok(HashMap::new());
    }

    let mut learned: HashMap<String, Vec<String>> = HashMap::new();
    for code in &unmapped {
        let matches: Vec<(String, i64)> = {
            let mut stmt = conn.prepare(
                "SELECT n.license_type AS text_type, COUNT(*) AS cnt
                 FROM license_records a
                 JOIN license_records n
                     ON a.license_number = n.license_number
                     AND n.section_type = 'new_application'
                 WHERE REPLACE(a.license_type, ',', '') = ?1
                   AND a.section_type IN ('approved', 'discontinued')
                 GROUP BY n.license_type",
            )?;
            stmt.query_map([code], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<_, _>>()?
        };
        if matches.is_empty() {
            continue;
        }

        let total: i64 = matches.iter().map(|(_, c)| c).sum();
        let mut type_freq: HashMap<String, i64> = HashMap::new();
        for (text_type, cnt) in &matches {
            for t in text_type.split(';') {
                let key = t.trim().to_string();
                *type_freq.entry(key).or_insert(0) += cnt;
            }
        }

        let always: Vec<String> = type_freq
            .into_iter()
            .filter(|(t, c)| *c == total && !t.is_empty())
            .map(|(t, _)| t)
            .collect();
        if always.is_empty() {
            continue;
        }

        for name in &always {
            let eid = ensure_endorsement(conn, name)?;
            conn.execute(
                "INSERT OR IGNORE INTO endorsement_codes (code, endorsement_id) VALUES (?1, ?2)",
                (code, eid),
            )?;
        }
        learned.insert(code.clone(), always);
    }

    if !learned.is_empty() {
        merge_placeholders(conn, &learned)?;
    }
    Ok(learned)
}

/// If a code had a placeholder endorsement (name == code), migrate its
/// record links to the newly-discovered real endorsement(s) and delete
/// the placeholder.
fn merge_placeholders(conn: &Connection, learned: &HashMap<String, Vec<String>>) -> Result<()> {
    for (code, names) in learned {
        let placeholder_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM license_endorsements WHERE name = ?1",
                [code],
                |row| row.get(0),
            )
            .optional()?;
        let Some(pid) = placeholder_id else { continue };

        let record_ids: Vec<i64> = {
            let mut stmt = conn.prepare(
                "SELECT record_id FROM record_endorsements WHERE endorsement_id = ?1",
            )?;
            stmt.query_map([pid], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?
        };
        for record_id in record_ids {
            for name in names {
                let eid = ensure_endorsement(conn, name)?;
                link_endorsement(conn, record_id, eid)?;
            }
        }
        conn.execute("DELETE FROM record_endorsements WHERE endorsement_id = ?1", [pid])?;
        conn.execute("DELETE FROM endorsement_codes WHERE endorsement_id = ?1", [pid])?;
        conn.execute("DELETE FROM license_endorsements WHERE id = ?1", [pid])?;
    }
    Ok(())
}

/// For every endorsement whose stored name differs from its upper-case
/// form (data from before uppercasing was applied consistently, or from
/// a raw archive replay), fold it into the canonical upper-case
/// endorsement: migrate its links and delete the dirty row, or rename it
/// in place if no canonical endorsement exists yet. Same conflict rule
/// as [`crate::entities::merge_duplicate_entities`]. Returns the number
/// of endorsements merged or renamed.
pub fn merge_mixed_case_endorsements(conn: &Connection) -> Result<usize> {
    let dirty: Vec<(i64, String)> = {
        let mut stmt = conn.prepare("SELECT id, name FROM license_endorsements")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?
    };

    let mut touched = 0;
    for (id, name) in dirty {
        let upper = name.to_uppercase();
        if upper == name {
            continue;
        }
        let canonical: Option<i64> = conn
            .query_row(
                "SELECT id FROM license_endorsements WHERE name = ?1",
                [&upper],
                |r| r.get(0),
            )
            .optional()?;

        match canonical {
            Some(canonical_id) if canonical_id != id => {
                migrate_endorsement_links(conn, id, canonical_id)?;
            }
            _ => {
                conn.execute(
                    "UPDATE license_endorsements SET name = ?1 WHERE id = ?2",
                    (&upper, id),
                )?;
            }
        }
        touched += 1;
    }
    Ok(touched)
}

/// For every endorsement whose stored name itself matches the legacy
/// `CODE, NAME` pattern — leftover from a time before the parser
/// distinguished that pattern from a plain text name — resolve it the
/// same way [`process_record`] step 2 would and migrate its record
/// links. Also scrubs `endorsement_codes` rows whose `code` column
/// contains whitespace, an artifact of the old discovery routine
/// running on `CODE, NAME` values before the split. Returns the number
/// of endorsements repaired.
pub fn repair_code_name_endorsements(conn: &Connection) -> Result<usize> {
    let dirty: Vec<(i64, String)> = {
        let mut stmt =
            conn.prepare("SELECT id, name FROM license_endorsements WHERE name GLOB '[0-9]*,*'")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?
    };

    let mut touched = 0;
    for (id, name) in dirty {
        let Some(caps) = code_name_pattern().captures(&name) else {
            continue;
        };
        let code = caps[1].to_string();
        let real_name = caps[2].trim().to_string();

        let real_ids = real_mapped_endorsements(conn, &code)?;
        let target_ids = if !real_ids.is_empty() {
            real_ids
        } else {
            let eid = ensure_endorsement(conn, &real_name)?;
            conn.execute(
                "INSERT OR IGNORE INTO endorsement_codes (code, endorsement_id) VALUES (?1, ?2)",
                (&code, eid),
            )?;
            vec![eid]
        };

        for eid in &target_ids {
            if *eid != id {
                migrate_endorsement_links(conn, id, *eid)?;
            }
        }
        touched += 1;
    }

    conn.execute("DELETE FROM endorsement_codes WHERE code LIKE '% %'", [])?;
    Ok(touched)
}

/// Move every `record_endorsements` and `endorsement_codes` row from
/// `from_id` onto `to_id`, then delete the now-empty `from_id` row.
fn migrate_endorsement_links(conn: &Connection, from_id: i64, to_id: i64) -> Result<()> {
    let record_ids: Vec<i64> = {
        let mut stmt =
            conn.prepare("SELECT record_id FROM record_endorsements WHERE endorsement_id = ?1")?;
        stmt.query_map([from_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?
    };
    for record_id in record_ids {
        link_endorsement(conn, record_id, to_id)?;
    }
    conn.execute(
        "DELETE FROM record_endorsements WHERE endorsement_id = ?1",
        [from_id],
    )?;

    let codes: Vec<String> = {
        let mut stmt = conn.prepare("SELECT code FROM endorsement_codes WHERE endorsement_id = ?1")?;
        stmt.query_map([from_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?
    };
    for code in codes {
        conn.execute(
            "INSERT OR IGNORE INTO endorsement_codes (code, endorsement_id) VALUES (?1, ?2)",
            (&code, to_id),
        )?;
    }
    conn.execute(
        "DELETE FROM endorsement_codes WHERE endorsement_id = ?1",
        [from_id],
    )?;

    conn.execute("DELETE FROM license_endorsements WHERE id = ?1", [from_id])?;
    Ok(())
}

/// Distinct endorsement names currently linked to at least one record.
pub fn get_endorsement_options(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT le.name
         FROM license_endorsements le
         JOIN record_endorsements re ON re.endorsement_id = le.id
         ORDER BY le.name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(names)
}

/// Batch-fetch endorsement names for a list of record ids, chunked to
/// stay under SQLite's bound-parameter limit.
pub fn get_record_endorsements(
    conn: &Connection,
    record_ids: &[i64],
) -> Result<HashMap<i64, Vec<String>>> {
    const CHUNK: usize = 500;
    let mut result: HashMap<i64, Vec<String>> =
        record_ids.iter().map(|&id| (id, Vec::new())).collect();
    if record_ids.is_empty() {
        return Ok(result);
    }
    for chunk in record_ids.chunks(CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT re.record_id, le.name
             FROM record_endorsements re
             JOIN license_endorsements le ON le.id = re.endorsement_id
             WHERE re.record_id IN ({placeholders})
             ORDER BY re.record_id, le.name"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (record_id, name) = row?;
            result.entry(record_id).or_default().push(name);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    fn insert_record(conn: &Connection, id: i64, license_number: &str, section: &str) {
        conn.execute(
            "INSERT INTO license_records (id, section_type, record_date, license_number, application_type, scraped_at)
             VALUES (?1, ?2, '2025-06-10', ?3, 'RENEWAL', '2025-06-10T00:00:00Z')",
            (id, section, license_number),
        )
        .unwrap();
    }

    #[test]
    fn seed_endorsements_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let first = seed_endorsements(&conn).unwrap();
        let second = seed_endorsements(&conn).unwrap();
        assert!(first > 0);
        assert_eq!(second, 0);
    }

    #[test]
    fn text_license_type_links_each_part() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, 1, "415678", "new_application");
        let linked =
            process_record(&conn, 1, "GROCERY STORE - BEER/WINE; SNACK BAR", "new_application")
                .unwrap();
        assert_eq!(linked, 2);
    }

    #[test]
    fn known_numeric_code_resolves_via_seed_map() {
        let conn = open_in_memory().unwrap();
        seed_endorsements(&conn).unwrap();
        insert_record(&conn, 1, "415678", "approved");
        let linked = process_record(&conn, 1, "450,", "approved").unwrap();
        assert_eq!(linked, 1);
        let names = get_record_endorsements(&conn, &[1]).unwrap();
        assert_eq!(names[&1], vec!["GROCERY STORE - BEER/WINE".to_string()]);
    }

    #[test]
    fn unknown_numeric_code_creates_placeholder() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, 1, "415678", "approved");
        let linked = process_record(&conn, 1, "999", "approved").unwrap();
        assert_eq!(linked, 1);
        let names = get_record_endorsements(&conn, &[1]).unwrap();
        assert_eq!(names[&1], vec!["999".to_string()]);
    }

    #[test]
    fn legacy_code_name_value_resolves_and_registers_mapping() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, 1, "415678", "approved");
        let linked =
            process_record(&conn, 1, "450, GROCERY STORE - BEER/WINE", "approved").unwrap();
        assert_eq!(linked, 1);
        let names = get_record_endorsements(&conn, &[1]).unwrap();
        assert_eq!(names[&1], vec!["GROCERY STORE - BEER/WINE".to_string()]);

        let mapped_code: String = conn
            .query_row(
                "SELECT code FROM endorsement_codes WHERE code = '450'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(mapped_code, "450");
    }

    #[test]
    fn legacy_code_name_value_prefers_existing_real_mapping() {
        let conn = open_in_memory().unwrap();
        seed_endorsements(&conn).unwrap();
        insert_record(&conn, 1, "415678", "approved");
        let linked =
            process_record(&conn, 1, "450, SOME STALE LABEL", "approved").unwrap();
        assert_eq!(linked, 1);
        let names = get_record_endorsements(&conn, &[1]).unwrap();
        assert_eq!(names[&1], vec!["GROCERY STORE - BEER/WINE".to_string()]);
    }

    #[test]
    fn merge_mixed_case_folds_into_uppercase_canonical() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, 1, "415678", "new_application");
        insert_record(&conn, 2, "415679", "new_application");
        process_record(&conn, 1, "Snack Bar", "new_application").unwrap();
        process_record(&conn, 2, "SNACK BAR", "new_application").unwrap();

        let merged = merge_mixed_case_endorsements(&conn).unwrap();
        assert_eq!(merged, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM license_endorsements", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let names = get_record_endorsements(&conn, &[1, 2]).unwrap();
        assert_eq!(names[&1], vec!["SNACK BAR".to_string()]);
        assert_eq!(names[&2], vec!["SNACK BAR".to_string()]);
    }

    #[test]
    fn repair_code_name_endorsements_fixes_mis_stored_name_and_scrubs_codes() {
        let conn = open_in_memory().unwrap();
        insert_record(&conn, 1, "415678", "approved");
        let eid = ensure_endorsement(&conn, "450, GROCERY STORE - BEER/WINE").unwrap();
        link_endorsement(&conn, 1, eid).unwrap();
        conn.execute(
            "INSERT INTO endorsement_codes (code, endorsement_id) VALUES ('450, GROCERY STORE - BEER/WINE', ?1)",
            [eid],
        )
        .unwrap();

        let repaired = repair_code_name_endorsements(&conn).unwrap();
        assert_eq!(repaired, 1);

        let names = get_record_endorsements(&conn, &[1]).unwrap();
        assert_eq!(names[&1], vec!["GROCERY STORE - BEER/WINE".to_string()]);

        let bad_codes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM endorsement_codes WHERE code LIKE '% %'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(bad_codes, 0);
    }
}
