//! Bulk (re)validation of `locations` rows, outside the per-record
//! ingestion path (§4.7's pipeline only validates a newly inserted
//! record's own location). Grounded on the upstream's `backfill_addresses`/
//! `refresh_addresses`/`_validate_batch`.

use std::thread;
use std::time::Duration;

use rusqlite::Connection;
use wslcb_store::error::Result;
use wslcb_store::pipeline::AddressValidator;

/// Polite inter-request delay so a backfill run doesn't hammer the
/// address-validation service.
const REQUEST_DELAY: Duration = Duration::from_millis(50);

fn validate_rows(
    conn: &mut Connection,
    rows: Vec<(i64, String)>,
    validator: &dyn AddressValidator,
    label: &str,
    batch_size: usize,
) -> Result<usize> {
    let total = rows.len();
    if total == 0 {
        tracing::info!(label, "no locations to validate");
        return Ok(0);
    }
    tracing::info!(label, total, "starting address validation batch");

    let mut succeeded = 0;
    for (attempted, (location_id, raw_address)) in rows.into_iter().enumerate() {
        let updated = match validator.standardize(&raw_address) {
            Some(std) => {
                conn.execute(
                    "UPDATE locations
                     SET address_line_1 = ?1, address_line_2 = ?2,
                         std_city = ?3, std_state = ?4, std_zip = ?5,
                         address_validated_at = datetime('now')
                     WHERE id = ?6",
                    (
                        &std.address_line_1,
                        &std.address_line_2,
                        &std.city,
                        &std.state,
                        &std.zip_code,
                        location_id,
                    ),
                )?;
                true
            }
            None => false,
        };
        if updated {
            succeeded += 1;
        }

        let attempted = attempted + 1;
        if attempted % batch_size.max(1) == 0 {
            tracing::debug!(label, attempted, total, succeeded, "validation progress");
        }
        thread::sleep(REQUEST_DELAY);
    }

    tracing::info!(label, total, succeeded, failed = total - succeeded, "validation batch done");
    Ok(succeeded)
}

/// Validate every location that has never been validated. Returns the
/// number successfully standardized.
pub fn backfill_addresses(
    conn: &mut Connection,
    validator: &dyn AddressValidator,
    batch_size: usize,
) -> Result<usize> {
    let rows: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT id, raw_address FROM locations
             WHERE address_validated_at IS NULL
               AND raw_address IS NOT NULL AND raw_address != ''",
        )?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?
    };
    validate_rows(conn, rows, validator, "backfill", batch_size)
}

/// Re-validate every location regardless of current validation status —
/// useful after the upstream validation service changes its standardized
/// output. Safe to interrupt; each row's timestamp updates individually.
pub fn refresh_addresses(
    conn: &mut Connection,
    validator: &dyn AddressValidator,
    batch_size: usize,
) -> Result<usize> {
    let rows: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT id, raw_address FROM locations
             WHERE raw_address IS NOT NULL AND raw_address != ''",
        )?;
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?
    };
    validate_rows(conn, rows, validator, "refresh", batch_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wslcb_model::StandardizedAddress;
    use wslcb_store::connection::open_in_memory;

    struct FakeValidator;
    impl AddressValidator for FakeValidator {
        fn standardize(&self, _address: &str) -> Option<StandardizedAddress> {
            Some(StandardizedAddress {
                address_line_1: "1 MAIN ST".to_string(),
                address_line_2: String::new(),
                city: "SEATTLE".to_string(),
                state: "WA".to_string(),
                zip_code: "98101".to_string(),
            })
        }
    }

    #[test]
    fn backfill_validates_unvalidated_locations_only() {
        let mut conn = open_in_memory().unwrap();
        conn.execute(
            "INSERT INTO locations (raw_address) VALUES ('1 main st, seattle, wa')",
            [],
        )
        .unwrap();
        let validator = FakeValidator;
        let count = backfill_addresses(&mut conn, &validator, 10).unwrap();
        assert_eq!(count, 1);

        let std_city: String = conn
            .query_row("SELECT std_city FROM locations WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(std_city, "SEATTLE");

        let second_pass = backfill_addresses(&mut conn, &validator, 10).unwrap();
        assert_eq!(second_pass, 0);
    }
}
