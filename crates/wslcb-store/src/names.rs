//! Canonical name-cleaning rule, used for business names, applicant
//! names, and entity names alike (§4.4).

const SUFFIX_WHITELIST: &[&str] = &[
    "INC", "LLC", "L.L.C", "LTD", "CORP", "CO", "L.P", "L.L.P", "PTY", "JR", "SR", "S.P.A",
    "F.O.E", "U.P", "D.B.A", "P.C", "N.A", "P.A", "W. & S",
];

/// Trim, uppercase, collapse internal whitespace, and iteratively strip
/// trailing `.`/`,` unless the trailing token is a recognized suffix.
/// Idempotent: `clean_name(clean_name(x)) == clean_name(x)`.
pub fn clean_name(raw: &str) -> String {
    let collapsed = raw
        .trim()
        .to_uppercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut s = collapsed;
    loop {
        let Some(last) = s.chars().last() else {
            break;
        };
        if last != '.' && last != ',' {
            break;
        }
        if ends_with_whitelisted_suffix(&s) {
            break;
        }
        s.pop();
    }
    s
}

/// True if `s`'s trailing `.`/`,` is actually the final dot of a
/// recognized abbreviation (`INC.`, `L.P.`, ...) rather than stray
/// punctuation, so the stripping loop should stop before removing it.
fn ends_with_whitelisted_suffix(s: &str) -> bool {
    SUFFIX_WHITELIST.iter().any(|suffix| {
        let candidate = format!("{suffix}.");
        if !s.ends_with(candidate.as_str()) {
            return false;
        }
        let start = s.len() - candidate.len();
        start == 0 || !s.as_bytes()[start - 1].is_ascii_alphanumeric()
    })
}

/// Split an applicants string on `;`, clean each part, drop empties, and
/// rejoin with `"; "`.
pub fn clean_applicants(raw: &str) -> String {
    raw.split(';')
        .map(clean_name)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_whitespace_and_case() {
        assert_eq!(clean_name("  jane   doe  "), "JANE DOE");
    }

    #[test]
    fn strips_trailing_punctuation() {
        assert_eq!(clean_name("ACME WIDGETS,"), "ACME WIDGETS");
        assert_eq!(clean_name("ACME WIDGETS."), "ACME WIDGETS");
    }

    #[test]
    fn keeps_whitelisted_suffix() {
        assert_eq!(clean_name("ACME INC."), "ACME INC.");
        assert_eq!(clean_name("JOHN SMITH JR."), "JOHN SMITH JR.");
    }

    #[test]
    fn is_idempotent() {
        let once = clean_name("acme widgets, llc.");
        let twice = clean_name(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn applicants_string_cleaning_drops_empties_and_rejoins() {
        assert_eq!(
            clean_applicants("ACME LLC; ; JANE DOE ,"),
            "ACME LLC; JANE DOE"
        );
    }
}
