use std::sync::OnceLock;

use regex::Regex;

static CVE_REGEX: OnceLock<Regex> = OnceLock::new();

fn cve_regex() -> &'static Regex {
    CVE_REGEX.get_or_init(|| Regex::new(r"((?:19|20)\d{2}(?:-|_)\d{4,})").expect("static regex"))
}

/// Normalizes a raw CVE-ish string (`CVE_2021_1234`, `2021-1234`, ...) to `CVE-YYYY-NNNN...`.
/// Returns `None` if no year-id pattern is found.
pub fn canonicalize_cve(raw: &str) -> Option<String> {
    let m = cve_regex().find(raw)?;
    let normalized = m.as_str().replace('_', "-");
    Some(format!("CVE-{normalized}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_underscore_separators() {
        assert_eq!(
            canonicalize_cve("CVE_2021_1234").as_deref(),
            Some("CVE-2021-1234")
        );
    }

    #[test]
    fn accepts_already_canonical_form() {
        assert_eq!(
            canonicalize_cve("CVE-2021-1234").as_deref(),
            Some("CVE-2021-1234")
        );
    }

    #[test]
    fn rejects_non_matching_text() {
        assert_eq!(canonicalize_cve("not-a-cve"), None);
    }

    #[test]
    fn extracts_from_embedded_signature_text() {
        assert_eq!(
            canonicalize_cve("ET EXPLOIT Possible CVE-2019-19781 Citrix ADC").as_deref(),
            Some("CVE-2019-19781")
        );
    }
}
