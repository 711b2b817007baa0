//! Interning of free-text business addresses into `locations` rows
//! (§4.3). A location is keyed by its raw address string; city/state/zip
//! parsed at parse time are stored alongside, and a later
//! address-validation pass fills the separate `std_*` columns.

use rusqlite::{Connection, OptionalExtension};

use crate::connection::normalize_raw_address;
use crate::error::Result;

/// Obtain the id of the location for `raw_address`, creating it (with the
/// given parsed city/state/zip) if it doesn't already exist. Returns
/// `None` for an empty address — callers must not create a location row
/// for a record with no address at all.
///
/// Duplicate-insert safety: this performs a lookup before any insert, so
/// calling it twice with the same raw address never creates a second
/// row — callers that need that guarantee (duplicate-record detection in
/// [`crate::records::insert_record`]) must still check for an existing
/// record *before* calling this, to avoid creating an orphaned location
/// for a record that turns out to be a duplicate.
pub fn get_or_create_location(
    conn: &Connection,
    raw_address: &str,
    city: &str,
    state: &str,
    zip_code: &str,
) -> Result<Option<i64>> {
    let normalized = normalize_raw_address(raw_address);
    if normalized.is_empty() {
        return Ok(None);
    }

    if let Some(id) = conn
        .query_row(
            "SELECT id FROM locations WHERE raw_address = ?1",
            [&normalized],
            |row| row.get(0),
        )
        .optional()?
    {
        return Ok(Some(id));
    }

    conn.execute(
        "INSERT INTO locations (raw_address, city, state, zip_code) VALUES (?1, ?2, ?3, ?4)",
        (&normalized, city, state, zip_code),
    )?;
    Ok(Some(conn.last_insert_rowid()))
}

/// A location row, including both the as-parsed and (if validated)
/// standardized address components.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub id: i64,
    pub raw_address: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub address_line_1: String,
    pub address_line_2: String,
    pub std_city: String,
    pub std_state: String,
    pub std_zip: String,
    pub address_validated_at: Option<String>,
}

pub fn get_location(conn: &Connection, id: i64) -> Result<Option<Location>> {
    conn.query_row(
        "SELECT id, raw_address, city, state, zip_code, address_line_1, address_line_2,
                std_city, std_state, std_zip, address_validated_at
         FROM locations WHERE id = ?1",
        [id],
        |row| {
            Ok(Location {
                id: row.get(0)?,
                raw_address: row.get(1)?,
                city: row.get(2)?,
                state: row.get(3)?,
                zip_code: row.get(4)?,
                address_line_1: row.get(5)?,
                address_line_2: row.get(6)?,
                std_city: row.get(7)?,
                std_state: row.get(8)?,
                std_zip: row.get(9)?,
                address_validated_at: row.get(10)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// The "display" city/zip a reader should see: the standardized value
/// when present, else the raw parsed value (§4.6a).
pub fn display_city(loc: &Location) -> &str {
    if loc.std_city.is_empty() {
        &loc.city
    } else {
        &loc.std_city
    }
}

pub fn display_zip(loc: &Location) -> &str {
    if loc.std_zip.is_empty() {
        &loc.zip_code
    } else {
        &loc.std_zip
    }
}

/// Orphaned locations: rows referenced by no record, primary or
/// previous (§4.12).
pub fn orphaned_location_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT l.id FROM locations l
         WHERE NOT EXISTS (SELECT 1 FROM license_records r WHERE r.location_id = l.id)
           AND NOT EXISTS (SELECT 1 FROM license_records r WHERE r.previous_location_id = l.id)",
    )?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[test]
    fn empty_address_creates_no_row() {
        let conn = open_in_memory().unwrap();
        let id = get_or_create_location(&conn, "", "", "WA", "").unwrap();
        assert_eq!(id, None);
    }

    #[test]
    fn repeat_calls_return_the_same_id() {
        let conn = open_in_memory().unwrap();
        let id1 = get_or_create_location(&conn, "123 MAIN ST", "SEATTLE", "WA", "98101").unwrap();
        let id2 = get_or_create_location(&conn, "123 MAIN ST", "SEATTLE", "WA", "98101").unwrap();
        assert_eq!(id1, id2);
        let count: i64 = conn
            .query_row("SELECT count(*) FROM locations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn display_prefers_standardized_value() {
        let loc = Location {
            city: "SEETTLE".to_string(),
            std_city: "SEATTLE".to_string(),
            ..Default::default()
        };
        assert_eq!(display_city(&loc), "SEATTLE");
    }
}
