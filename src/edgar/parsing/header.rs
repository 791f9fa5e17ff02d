use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// The structured header, when present, lives at the very top of the
/// document.
const HEADER_REGION_CHARS: usize = 5_000;
const TITLE_REGION_CHARS: usize = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilingMetadata {
    pub company_name: String,
    pub period_of_report: String,
    pub fiscal_year_end: String,
    pub cik: String,
}

struct FieldPatterns {
    company_name: Vec<Regex>,
    period_of_report: Vec<Regex>,
    fiscal_year_end: Vec<Regex>,
    cik: Vec<Regex>,
}

static FIELD_PATTERNS: Lazy<FieldPatterns> = Lazy::new(|| FieldPatterns {
    company_name: vec![
        Regex::new(r"(?i)COMPANY\s+CONFORMED\s+NAME:[ \t]*(.+)").unwrap(),
        Regex::new(r"(?i)<COMPANY-NAME>(.+?)</COMPANY-NAME>").unwrap(),
    ],
    period_of_report: vec![
        Regex::new(r"(?i)CONFORMED\s+PERIOD\s+OF\s+REPORT:[ \t]*(\d{8})").unwrap(),
        Regex::new(r"(?i)PERIOD\s+OF\s+REPORT:[ \t]*(\d{4}-\d{2}-\d{2})").unwrap(),
    ],
    fiscal_year_end: vec![Regex::new(r"(?i)FISCAL\s+YEAR\s+END:[ \t]*(\d{4})").unwrap()],
    cik: vec![
        Regex::new(r"(?i)CENTRAL\s+INDEX\s+KEY:[ \t]*(\d+)").unwrap(),
        Regex::new(r"(?i)CIK[=:]\s*(\d+)").unwrap(),
    ],
});

/// Pulls filing metadata from the document header region. Absent fields
/// come back as empty strings, never as errors.
pub fn extract_metadata(html: &str) -> FilingMetadata {
    let header_region = head(html, HEADER_REGION_CHARS);

    let mut metadata = FilingMetadata {
        company_name: first_capture(&FIELD_PATTERNS.company_name, header_region),
        period_of_report: first_capture(&FIELD_PATTERNS.period_of_report, header_region),
        fiscal_year_end: first_capture(&FIELD_PATTERNS.fiscal_year_end, header_region),
        cik: first_capture(&FIELD_PATTERNS.cik, header_region),
    };

    // Last resort for the company name: the document title.
    if metadata.company_name.is_empty() {
        let fragment = Html::parse_document(head(html, TITLE_REGION_CHARS));
        let title_selector = Selector::parse("title").unwrap();
        if let Some(title) = fragment.select(&title_selector).next() {
            metadata.company_name = title.text().collect::<String>().trim().to_string();
        }
    }

    debug!("extracted metadata: {:?}", metadata);
    metadata
}

fn first_capture(patterns: &[Regex], text: &str) -> String {
    for pattern in patterns {
        if let Some(captures) = pattern.captures(text) {
            if let Some(value) = captures.get(1) {
                return value.as_str().trim().to_string();
            }
        }
    }
    String::new()
}

fn head(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_header_fields() {
        let html = "COMPANY CONFORMED NAME: Apple Inc.\n\
                    CENTRAL INDEX KEY: 0000320193\n\
                    CONFORMED PERIOD OF REPORT: 20240928\n\
                    FISCAL YEAR END: 0928\n\
                    <html><body>filing body</body></html>";
        let metadata = extract_metadata(html);
        assert_eq!(metadata.company_name, "Apple Inc.");
        assert_eq!(metadata.cik, "0000320193");
        assert_eq!(metadata.period_of_report, "20240928");
        assert_eq!(metadata.fiscal_year_end, "0928");
    }

    #[test]
    fn test_title_fallback_for_company_name() {
        let html = "<html><head><title>Microsoft Corporation 10-K</title></head><body></body></html>";
        let metadata = extract_metadata(html);
        assert_eq!(metadata.company_name, "Microsoft Corporation 10-K");
    }

    #[test]
    fn test_absent_fields_are_empty_strings() {
        let metadata = extract_metadata("<html><body>nothing useful</body></html>");
        assert_eq!(metadata.company_name, "");
        assert_eq!(metadata.period_of_report, "");
        assert_eq!(metadata.fiscal_year_end, "");
        assert_eq!(metadata.cik, "");
    }

    #[test]
    fn test_header_region_only() {
        // A CIK far past the header region must not be picked up.
        let mut html = "x".repeat(6_000);
        html.push_str("CENTRAL INDEX KEY: 123456");
        let metadata = extract_metadata(&html);
        assert_eq!(metadata.cik, "");
    }
}
