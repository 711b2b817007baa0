use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Normalize `M/D/YYYY` to `YYYY-MM-DD`. Values that don't match the
/// expected upstream format pass through unchanged — the record
/// validator (`RawRecord::is_valid`) is the thing that rejects them, not
/// this function (§4.1).
pub fn normalize_date(raw: &str) -> String {
    let raw = raw.trim();
    if let Some(d) = parse_mdy(raw) {
        return d.format("%Y-%m-%d").to_string();
    }
    raw.to_string()
}

fn parse_mdy(raw: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let month: u32 = parts[0].parse().ok()?;
    let day: u32 = parts[1].parse().ok()?;
    let year: i32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse the RFC 2822 timestamp embedded in a unified-diff `---`/`+++`
/// header (`@\t<date>`). Falls back to `now` (UTC) if unparseable, per
/// §4.1.
pub fn parse_diff_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc2822(raw.trim())
        .map(|d: DateTime<FixedOffset>| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mdy_to_iso() {
        assert_eq!(normalize_date("6/10/2025"), "2025-06-10");
        assert_eq!(normalize_date("12/1/2024"), "2024-12-01");
    }

    #[test]
    fn passes_through_unparseable_values() {
        assert_eq!(normalize_date("not a date"), "not a date");
        assert_eq!(normalize_date(""), "");
    }

    #[test]
    fn falls_back_to_now_on_bad_timestamp() {
        let before = Utc::now();
        let parsed = parse_diff_timestamp("garbage");
        assert!(parsed >= before);
    }
}
