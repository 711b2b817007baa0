use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use wslcb_model::{RawRecord, Section};

use crate::dates::normalize_date;
use crate::error::{Error, Result};

fn section_for_header(header: &str) -> Option<Section> {
    match header {
        "STATEWIDE NEW LICENSE APPLICATIONS" => Some(Section::NewApplication),
        "STATEWIDE RECENTLY APPROVED LICENSES" => Some(Section::Approved),
        "STATEWIDE DISCONTINUED LICENSES" => Some(Section::Discontinued),
        _ => None,
    }
}

fn date_field_for(section: Section) -> &'static str {
    match section {
        Section::NewApplication => "Notification Date:",
        Section::Approved => "Approved Date:",
        Section::Discontinued => "Discontinued Date:",
    }
}

/// Normalize the NBSP variants the upstream page sometimes uses in
/// header cells, mirroring the normalization applied to raw addresses.
fn normalize_header_text(raw: &str) -> String {
    raw.replace('\u{00a0}', " ").trim().to_string()
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r",\s*([A-Z][A-Z .]+?),\s*([A-Z]{2})\s+(\d{5}(?:-\d{4})?)").unwrap()
    })
}

fn location_re_no_zip() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([A-Z][A-Z .]+?),\s*([A-Z]{2})").unwrap())
}

/// Extract `(city, state, zip)` from a free-text location string like
/// `"123 MAIN ST, SEATTLE, WA 98101"`. State defaults to `WA` (§4.1).
pub fn parse_location(location: &str) -> (String, String, String) {
    if location.is_empty() {
        return (String::new(), "WA".to_string(), String::new());
    }
    if let Some(caps) = location_re().captures(location) {
        return (
            caps[1].trim().to_string(),
            caps[2].trim().to_string(),
            caps[3].trim().to_string(),
        );
    }
    if let Some(caps) = location_re_no_zip().captures(location) {
        return (
            caps[1].trim().to_string(),
            caps[2].trim().to_string(),
            String::new(),
        );
    }
    (String::new(), "WA".to_string(), String::new())
}

fn apply_label(current: &mut RawRecord, label: &str, value: &str) {
    match label {
        "Business Name:" | "New Business Name:" => current.business_name = value.to_string(),
        "Current Business Name:" => current.previous_business_name = Some(value.to_string()),
        "Business Location:" | "New Business Location:" => {
            current.business_location = value.to_string();
            let (city, state, zip) = parse_location(value);
            current.city = city;
            current.state = state;
            current.zip_code = zip;
        }
        "Current Business Location:" => {
            current.previous_business_location = Some(value.to_string());
            let (city, state, zip) = parse_location(value);
            current.previous_city = Some(city);
            current.previous_state = Some(state);
            current.previous_zip_code = Some(zip);
        }
        "Applicant(s):" | "New Applicant(s):" => current.applicants = value.to_string(),
        "Current Applicant(s):" => current.previous_applicants = Some(value.to_string()),
        "License Type:" => current.license_type = value.to_string(),
        "Application Type:" | "\\Application Type:" => {
            current.application_type = value.to_string();
        }
        "License Number:" => current.license_number = value.to_string(),
        "Contact Phone:" => current.contact_phone = Some(value.to_string()),
        _ => {}
    }
}

/// Run the label/value-row state machine described in §4.1 over an
/// ordered sequence of two-cell `(label, value)` rows, all belonging to
/// one section's table. A row whose label is the section's date field
/// starts a new record; a record with no `license_number` by the time
/// the next date row (or end of input) arrives is dropped.
pub fn parse_records_from_rows(
    rows: &[(String, String)],
    section: Section,
    scraped_at: &str,
) -> Vec<RawRecord> {
    let date_field = date_field_for(section);
    let mut records = Vec::new();
    let mut current: Option<RawRecord> = None;

    for (label, value) in rows {
        if label == date_field {
            if let Some(rec) = current.take() {
                if !rec.license_number.is_empty() {
                    records.push(rec);
                }
            }
            current = Some(RawRecord {
                section: Some(section),
                record_date: normalize_date(value),
                scraped_at: scraped_at.to_string(),
                ..Default::default()
            });
        } else if let Some(rec) = current.as_mut() {
            apply_label(rec, label, value);
        }
    }
    if let Some(rec) = current.take() {
        if !rec.license_number.is_empty() {
            records.push(rec);
        }
    }
    records
}

fn two_cell_rows(table: ElementRef) -> Vec<(String, String)> {
    static TR_SEL: OnceLock<Selector> = OnceLock::new();
    static TD_SEL: OnceLock<Selector> = OnceLock::new();
    let tr_sel = TR_SEL.get_or_init(|| Selector::parse("tr").unwrap());
    let td_sel = TD_SEL.get_or_init(|| Selector::parse("td").unwrap());

    let mut out = Vec::new();
    for tr in table.select(tr_sel) {
        let cells: Vec<ElementRef> = tr.select(td_sel).collect();
        if cells.len() != 2 {
            continue;
        }
        let label: String = cells[0].text().collect::<String>().trim().to_string();
        let value: String = cells[1].text().collect::<String>().trim().to_string();
        out.push((label, value));
    }
    out
}

/// Scan a full HTML document for the three recognized data tables (found
/// by their `<th>` header text, §4.9 step 6) and parse each section's
/// records.
pub fn parse_document(html: &str, scraped_at: &str) -> Result<Vec<RawRecord>> {
    static TABLE_SEL: OnceLock<Selector> = OnceLock::new();
    static TH_SEL: OnceLock<Selector> = OnceLock::new();
    let table_sel = TABLE_SEL.get_or_init(|| Selector::parse("table").unwrap());
    let th_sel = TH_SEL.get_or_init(|| Selector::parse("th").unwrap());

    let doc = Html::parse_document(html);
    let mut all_records = Vec::new();
    let mut found_any = false;

    for table in doc.select(table_sel) {
        let header = table
            .select(th_sel)
            .next()
            .map(|th| normalize_header_text(&th.text().collect::<String>()));
        let Some(section) = header.as_deref().and_then(section_for_header) else {
            continue;
        };
        found_any = true;
        let rows = two_cell_rows(table);
        all_records.extend(parse_records_from_rows(&rows, section, scraped_at));
    }

    if !found_any {
        return Err(Error::SectionNotFound);
    }
    Ok(all_records)
}

/// Parse just one section's table out of a document, for callers (the
/// diff-replay path, tests) that already know which section they want.
pub fn parse_section(html: &str, section: Section, scraped_at: &str) -> Result<Vec<RawRecord>> {
    static TABLE_SEL: OnceLock<Selector> = OnceLock::new();
    static TH_SEL: OnceLock<Selector> = OnceLock::new();
    let table_sel = TABLE_SEL.get_or_init(|| Selector::parse("table").unwrap());
    let th_sel = TH_SEL.get_or_init(|| Selector::parse("th").unwrap());

    let doc = Html::parse_document(html);
    for table in doc.select(table_sel) {
        let header = table
            .select(th_sel)
            .next()
            .map(|th| normalize_header_text(&th.text().collect::<String>()));
        if header.as_deref().and_then(section_for_header) == Some(section) {
            let rows = two_cell_rows(table);
            return Ok(parse_records_from_rows(&rows, section, scraped_at));
        }
    }
    Err(Error::SectionNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(section_header: &str, rows: &[(&str, &str)]) -> String {
        let mut body = format!("<table><tr><th>{section_header}</th></tr>");
        for (label, value) in rows {
            body.push_str(&format!("<tr><td>{label}</td><td>{value}</td></tr>"));
        }
        body.push_str("</table>");
        format!("<html><body>{body}</body></html>")
    }

    #[test]
    fn parses_a_single_new_application_record() {
        let html = fixture(
            "STATEWIDE NEW LICENSE APPLICATIONS",
            &[
                ("Notification Date:", "6/10/2025"),
                ("Business Name:", "NEW LEAF DISPENSARY"),
                ("Applicant(s):", "NEW LEAF DISPENSARY; CAROL NEWBY"),
                ("License Type:", "CANNABIS RETAILER"),
                ("Application Type:", "ASSUMPTION"),
                ("License Number:", "415678"),
            ],
        );
        let records = parse_document(&html, "2025-06-11T00:00:00Z").unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.record_date, "2025-06-10");
        assert_eq!(r.business_name, "NEW LEAF DISPENSARY");
        assert_eq!(r.license_number, "415678");
        assert_eq!(r.application_type, "ASSUMPTION");
        assert_eq!(r.section, Some(Section::NewApplication));
    }

    #[test]
    fn drops_a_record_missing_license_number() {
        let html = fixture(
            "STATEWIDE NEW LICENSE APPLICATIONS",
            &[
                ("Notification Date:", "6/10/2025"),
                ("Business Name:", "NO LICENSE CO"),
            ],
        );
        let records = parse_document(&html, "now").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn parses_two_records_in_one_table() {
        let html = fixture(
            "STATEWIDE NEW LICENSE APPLICATIONS",
            &[
                ("Notification Date:", "6/10/2025"),
                ("License Number:", "100"),
                ("Application Type:", "RENEWAL"),
                ("Notification Date:", "6/11/2025"),
                ("License Number:", "200"),
                ("Application Type:", "RENEWAL"),
            ],
        );
        let records = parse_document(&html, "now").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].license_number, "100");
        assert_eq!(records[1].license_number, "200");
    }

    #[test]
    fn location_parsing_with_and_without_zip() {
        assert_eq!(
            parse_location("123 MAIN ST, SEATTLE, WA 98101"),
            ("SEATTLE".to_string(), "WA".to_string(), "98101".to_string())
        );
        assert_eq!(
            parse_location("123 MAIN ST, SEATTLE, WA"),
            ("SEATTLE".to_string(), "WA".to_string(), "".to_string())
        );
        assert_eq!(
            parse_location(""),
            ("".to_string(), "WA".to_string(), "".to_string())
        );
    }
}
