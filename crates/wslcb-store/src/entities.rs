//! Extraction and normalization of entities (people and organizations)
//! out of semicolon-delimited applicant strings.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use wslcb_model::{parse_enum, EntityRole, EntityType};

use crate::error::Result;
use crate::names::clean_name;

fn org_patterns() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(LLC|L\.?L\.?C\.?|INC\.?|CORP\.?|CORPORATION|TRUST|LTD\.?|LIMITED|PARTNERS|PARTNERSHIP|HOLDINGS|GROUP|ENTERPRISE|ENTERPRISES|ASSOCIATION|FOUNDATION|COMPANY|CO\.|L\.?P\.?)\b",
        )
        .unwrap()
    })
}

/// Classify a (already-uppercased) entity name as person or organization.
pub fn classify_entity_type(name: &str) -> EntityType {
    if org_patterns().is_match(name) {
        EntityType::Organization
    } else {
        EntityType::Person
    }
}

/// Return the entity id for `name`, creating the row if it doesn't
/// already exist. Names run through [`clean_name`] first for
/// consistency — the upstream source is predominantly uppercase but
/// occasionally mixed case, with stray trailing punctuation.
pub fn get_or_create_entity(conn: &Connection, name: &str) -> Result<i64> {
    let normalized = clean_name(name);
    if normalized.is_empty() {
        return Err(crate::error::Error::MissingField { field: "name" });
    }
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM entities WHERE name = ?1",
            [&normalized],
            |row| row.get(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let entity_type = classify_entity_type(&normalized);
    conn.execute(
        "INSERT INTO entities (name, entity_type) VALUES (?1, ?2)",
        (&normalized, entity_type.to_string()),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Split a semicolon-delimited applicants string, skip the first element
/// (the business name), create entities for the rest, and link them to
/// the record under `role`. Returns the number of entities linked. A
/// no-op when the string has no `;` at all (the common single-applicant
/// case carries no extractable entity).
pub fn parse_and_link_entities(
    conn: &Connection,
    record_id: i64,
    applicants: &str,
    role: EntityRole,
) -> Result<usize> {
    if applicants.is_empty() || !applicants.contains(';') {
        return Ok(0);
    }
    let parts: Vec<&str> = applicants.split(';').collect();
    let mut linked = 0;
    for (position, name) in parts
        .into_iter()
        .skip(1)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
    {
        let entity_id = get_or_create_entity(conn, name)?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO record_entities (record_id, entity_id, role, position)
             VALUES (?1, ?2, ?3, ?4)",
            (record_id, entity_id, role.to_string(), position as i64),
        )?;
        linked += changed;
    }
    Ok(linked)
}

/// For every entity whose stored name differs from its cleaned form
/// (data from before name-cleaning was applied consistently, or from a
/// raw archive replay), fold it into the canonical cleaned entity:
/// migrate its junction rows (keeping the lower `position` on conflict)
/// and delete the dirty row, or rename it in place if no canonical
/// entity exists yet. Returns the number of entities merged or renamed.
pub fn merge_duplicate_entities(conn: &Connection) -> Result<usize> {
    let dirty: Vec<(i64, String)> = {
        let mut stmt = conn.prepare("SELECT id, name FROM entities")?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?
    };

    let mut touched = 0;
    for (id, name) in dirty {
        let cleaned = clean_name(&name);
        if cleaned == name || cleaned.is_empty() {
            continue;
        }
        let canonical: Option<i64> = conn
            .query_row("SELECT id FROM entities WHERE name = ?1", [&cleaned], |r| {
                r.get(0)
            })
            .optional()?;

        match canonical {
            Some(canonical_id) if canonical_id != id => {
                let links: Vec<(i64, String, i64)> = {
                    let mut stmt = conn.prepare(
                        "SELECT record_id, role, position FROM record_entities WHERE entity_id = ?1",
                    )?;
                    stmt.query_map([id], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                    })?
                    .collect::<std::result::Result<_, _>>()?
                };
                for (record_id, role, position) in links {
                    conn.execute(
                        "INSERT OR IGNORE INTO record_entities (record_id, entity_id, role, position)
                         VALUES (?1, ?2, ?3, ?4)",
                        (record_id, canonical_id, &role, position),
                    )?;
                }
                conn.execute("DELETE FROM record_entities WHERE entity_id = ?1", [id])?;
                conn.execute("DELETE FROM entities WHERE id = ?1", [id])?;
            }
            _ => {
                conn.execute("UPDATE entities SET name = ?1 WHERE id = ?2", (&cleaned, id))?;
            }
        }
        touched += 1;
    }
    Ok(touched)
}

/// Populate `entities`/`record_entities` for existing records that have
/// semicolon-delimited applicants but no entity links yet. Returns the
/// number of records processed.
pub fn backfill_entities(conn: &Connection) -> Result<usize> {
    let rows: Vec<(i64, String, Option<String>)> = {
        let mut stmt = conn.prepare(
            "SELECT lr.id, lr.applicants, lr.previous_applicants
             FROM license_records lr
             LEFT JOIN record_entities re ON re.record_id = lr.id
             WHERE re.record_id IS NULL
               AND (lr.applicants LIKE '%;%' OR lr.previous_applicants LIKE '%;%')",
        )?;
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default(), row.get(2)?))
        })?
        .collect::<std::result::Result<_, _>>()?
    };

    for (record_id, applicants, previous_applicants) in &rows {
        parse_and_link_entities(conn, *record_id, applicants, EntityRole::Applicant)?;
        if let Some(prev) = previous_applicants {
            if !prev.is_empty() {
                parse_and_link_entities(conn, *record_id, prev, EntityRole::PreviousApplicant)?;
            }
        }
    }

    Ok(rows.len())
}

/// A single linked entity as returned by [`get_record_entities`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedEntity {
    pub id: i64,
    pub name: String,
    pub entity_type: EntityType,
}

/// Batch-fetch entities for a list of record ids, chunked to stay under
/// SQLite's bound-parameter limit. Every requested id gets an entry in
/// the result (possibly with empty lists) even if it has no entities.
pub fn get_record_entities(
    conn: &Connection,
    record_ids: &[i64],
) -> Result<HashMap<i64, HashMap<EntityRole, Vec<LinkedEntity>>>> {
    const CHUNK: usize = 500;
    let mut result: HashMap<i64, HashMap<EntityRole, Vec<LinkedEntity>>> = record_ids
        .iter()
        .map(|&id| {
            (
                id,
                HashMap::from([
                    (EntityRole::Applicant, Vec::new()),
                    (EntityRole::PreviousApplicant, Vec::new()),
                ]),
            )
        })
        .collect();

    if record_ids.is_empty() {
        return Ok(result);
    }

    for chunk in record_ids.chunks(CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!(
            "SELECT re.record_id, re.role, re.position, e.id, e.name, e.entity_type
             FROM record_entities re
             JOIN entities e ON e.id = re.entity_id
             WHERE re.record_id IN ({placeholders})
             ORDER BY re.record_id, re.role, re.position"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;
        for row in rows {
            let (record_id, role, entity_id, name, entity_type) = row?;
            let role: EntityRole = parse_enum("entity_role", &role)?;
            let entity_type: EntityType = parse_enum("entity_type", &entity_type)?;
            result
                .entry(record_id)
                .or_default()
                .entry(role)
                .or_default()
                .push(LinkedEntity {
                    id: entity_id,
                    name,
                    entity_type,
                });
        }
    }

    Ok(result)
}

/// Fetch a single entity by id.
pub fn get_entity_by_id(conn: &Connection, entity_id: i64) -> Result<Option<LinkedEntity>> {
    conn.query_row(
        "SELECT id, name, entity_type FROM entities WHERE id = ?1",
        [entity_id],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        },
    )
    .optional()?
    .map(|(id, name, entity_type)| {
        Ok(LinkedEntity {
            id,
            name,
            entity_type: parse_enum("entity_type", &entity_type)?,
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[test]
    fn classifies_llc_as_organization() {
        assert_eq!(classify_entity_type("ACME LLC"), EntityType::Organization);
        assert_eq!(classify_entity_type("JANE DOE"), EntityType::Person);
    }

    #[test]
    fn get_or_create_entity_is_idempotent() {
        let conn = open_in_memory().unwrap();
        let id1 = get_or_create_entity(&conn, "jane doe").unwrap();
        let id2 = get_or_create_entity(&conn, "JANE DOE").unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn single_applicant_with_no_semicolon_links_nothing() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO license_records (section_type, record_date, license_number, application_type, scraped_at)
             VALUES ('new_application', '2025-06-10', '100', 'RENEWAL', '2025-06-10T00:00:00Z')",
            [],
        )
        .unwrap();
        let linked =
            parse_and_link_entities(&conn, 1, "ACME LLC", EntityRole::Applicant).unwrap();
        assert_eq!(linked, 0);
    }

    #[test]
    fn skips_business_name_and_links_remaining_applicants() {
        let conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO license_records (section_type, record_date, license_number, application_type, scraped_at)
             VALUES ('new_application', '2025-06-10', '100', 'RENEWAL', '2025-06-10T00:00:00Z')",
            [],
        )
        .unwrap();
        let linked = parse_and_link_entities(
            &conn,
            1,
            "ACME LLC; JANE DOE; JOHN SMITH",
            EntityRole::Applicant,
        )
        .unwrap();
        assert_eq!(linked, 2);
        let entities = get_record_entities(&conn, &[1]).unwrap();
        assert_eq!(entities[&1][&EntityRole::Applicant].len(), 2);
    }
}
