use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::PipelineError;

/// Hard cap on the final section so an unterminated heading in a malformed
/// document cannot swallow the remainder of the text.
const MAX_TAIL_SECTION_CHARS: usize = 50_000;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SectionName {
    Business,
    RiskFactors,
    Mda,
    MarketRisk,
    Financials,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedSection {
    pub name: SectionName,
    pub raw_text: String,
    pub word_count: usize,
}

/// One extraction run: sections in document order plus exactly one quality
/// score for the set.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub sections: Vec<ExtractedSection>,
    pub quality_score: u8,
}

pub struct SectionSpec {
    pub name: SectionName,
    pub min_words: usize,
    pattern: Regex,
}

fn spec(name: SectionName, pattern: &str, min_words: usize) -> SectionSpec {
    SectionSpec {
        name,
        min_words,
        pattern: Regex::new(pattern).unwrap(),
    }
}

/// Heading patterns in 10-K item order. Kept data-driven so a new filing
/// layout means a new table row, not new control flow.
static SECTION_SPECS: Lazy<Vec<SectionSpec>> = Lazy::new(|| {
    vec![
        spec(
            SectionName::Business,
            r"(?i)(?:^|\n)\s*item\s+1[.\s:]+\s*business",
            500,
        ),
        spec(
            SectionName::RiskFactors,
            r"(?i)(?:^|\n)\s*item\s+1a[.\s:]+\s*risk\s+factors",
            300,
        ),
        spec(
            SectionName::Mda,
            r"(?i)(?:^|\n)\s*item\s+7[.\s:]+\s*management",
            500,
        ),
        spec(
            SectionName::MarketRisk,
            r"(?i)(?:^|\n)\s*item\s+7a[.\s:]+\s*quantitative",
            100,
        ),
        spec(
            SectionName::Financials,
            r"(?i)(?:^|\n)\s*item\s+8[.\s:]+\s*financial\s+statements",
            100,
        ),
    ]
});

static SCRIPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").unwrap());
static STYLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").unwrap());
static IX_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ix:header[^>]*>.*?</ix:header>").unwrap());
static IX_HIDDEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<ix:hidden[^>]*>.*?</ix:hidden>").unwrap());

/// EDGAR filings embed hidden duplicate content (display:none) for
/// structured-data purposes; dropping it avoids doubled section text. The
/// regex crate has no backreferences, so each container tag gets its own
/// pattern. Non-greedy matching cuts nested same-tag blocks at the first
/// close tag, which is acceptable for this heuristic.
static HIDDEN_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["div", "span", "p", "table"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(
                r#"(?is)<{tag}\b[^>]*style\s*=\s*["'][^"']*display\s*:\s*none[^"']*["'][^>]*>.*?</{tag}>"#
            ))
            .unwrap()
        })
        .collect()
});

static LINE_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<br\s*/?>|</p>|</div>|</tr>|</li>|</h[1-6]>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Strips markup from filing HTML and returns newline-joined visible text
/// with blank lines collapsed.
pub fn clean_html(html: &str) -> String {
    let mut text = SCRIPT_RE.replace_all(html, "").into_owned();
    text = STYLE_RE.replace_all(&text, "").into_owned();
    text = IX_HEADER_RE.replace_all(&text, "").into_owned();
    text = IX_HIDDEN_RE.replace_all(&text, "").into_owned();
    for hidden_re in HIDDEN_RES.iter() {
        text = hidden_re.replace_all(&text, "").into_owned();
    }
    text = LINE_BREAK_RE.replace_all(&text, "\n").into_owned();
    text = TAG_RE.replace_all(&text, "").into_owned();
    text = html_escape::decode_html_entities(&text).into_owned();

    text.lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts the five known sections from cleaned filing text. For each
/// heading pattern, the LAST occurrence wins: documents conventionally
/// repeat each heading in the table of contents, and the last occurrence
/// is the real section start. A section whose heading never matches is
/// simply absent, not an error.
pub fn extract_sections(text: &str) -> Vec<ExtractedSection> {
    let mut positions: Vec<(SectionName, usize)> = Vec::new();
    for section_spec in SECTION_SPECS.iter() {
        let matches: Vec<_> = section_spec.pattern.find_iter(text).collect();
        match matches.last() {
            Some(last) => {
                debug!(
                    "found section '{}' at position {} (match {} of {})",
                    section_spec.name,
                    last.start(),
                    matches.len(),
                    matches.len()
                );
                positions.push((section_spec.name, last.start()));
            }
            None => warn!("{}", PipelineError::SectionMissing(section_spec.name)),
        }
    }

    positions.sort_by_key(|(_, pos)| *pos);

    let mut sections = Vec::new();
    for (i, (name, start)) in positions.iter().enumerate() {
        let end = if i + 1 < positions.len() {
            positions[i + 1].1
        } else {
            floor_char_boundary(text, start.saturating_add(MAX_TAIL_SECTION_CHARS))
        };
        let raw_text = text[*start..end].trim().to_string();
        let word_count = raw_text.split_whitespace().count();
        info!("extracted section '{}': {} words", name, word_count);
        sections.push(ExtractedSection {
            name: *name,
            raw_text,
            word_count,
        });
    }
    sections
}

/// Completeness score in [0, 100]: the share of expected sections that are
/// present and meet their name-specific minimum word count.
pub fn score_quality(sections: &[ExtractedSection]) -> u8 {
    let mut passed = 0;
    for section_spec in SECTION_SPECS.iter() {
        let found = sections
            .iter()
            .find(|s| s.name == section_spec.name);
        match found {
            Some(s) if s.word_count >= section_spec.min_words => passed += 1,
            Some(s) => warn!(
                "section '{}' is too short: {} words (minimum {})",
                s.name, s.word_count, section_spec.min_words
            ),
            None => warn!("section '{}' is missing from extraction", section_spec.name),
        }
    }
    ((passed * 100) / SECTION_SPECS.len()) as u8
}

/// Runs extraction and scoring as one unit so every section set that
/// travels downstream carries exactly one quality report.
pub fn extract(text: &str) -> ExtractionResult {
    let sections = extract_sections(text);
    let quality_score = score_quality(&sections);
    info!("section quality score: {}/100", quality_score);
    ExtractionResult {
        sections,
        quality_score,
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(words: usize) -> String {
        vec!["lorem"; words].join(" ")
    }

    fn synthetic_filing() -> String {
        // Table of contents first, then the real sections.
        format!(
            "TABLE OF CONTENTS\n\
             Item 1. Business\n\
             Item 1A. Risk Factors\n\
             Item 7. Management's Discussion and Analysis\n\
             Item 7A. Quantitative and Qualitative Disclosures\n\
             Item 8. Financial Statements and Supplementary Data\n\
             \n\
             Item 1. Business\n{}\n\
             Item 1A. Risk Factors\n{}\n\
             Item 7. Management's Discussion and Analysis\n{}\n\
             Item 7A. Quantitative and Qualitative Disclosures About Market Risk\n{}\n\
             Item 8. Financial Statements and Supplementary Data\n{}\n",
            filler(600),
            filler(400),
            filler(600),
            filler(150),
            filler(150),
        )
    }

    #[test]
    fn test_last_occurrence_skips_table_of_contents() {
        let text = synthetic_filing();
        let sections = extract_sections(&text);
        assert_eq!(sections.len(), 5);
        // Sections come back in document order.
        let names: Vec<_> = sections.iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                SectionName::Business,
                SectionName::RiskFactors,
                SectionName::Mda,
                SectionName::MarketRisk,
                SectionName::Financials,
            ]
        );
        // The business slice must start past the TOC, i.e. contain the
        // filler and not the TOC's list of later items.
        let business = &sections[0];
        assert!(business.raw_text.contains("lorem"));
        assert!(!business.raw_text.contains("Item 8"));
        assert!(business.word_count >= 600);
    }

    #[test]
    fn test_missing_sections_are_absent_not_errors() {
        let text = format!("Item 1. Business\n{}", filler(100));
        let sections = extract_sections(&text);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].name, SectionName::Business);

        assert!(extract_sections("no headings here at all").is_empty());
    }

    #[test]
    fn test_final_section_capped() {
        let text = format!("Item 1. Business\n{}", filler(20_000));
        let sections = extract_sections(&text);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].raw_text.len() <= MAX_TAIL_SECTION_CHARS);
    }

    #[test]
    fn test_quality_score_all_sections_pass() {
        let result = extract(&synthetic_filing());
        assert_eq!(result.quality_score, 100);
    }

    #[test]
    fn test_quality_score_empty_is_zero() {
        assert_eq!(score_quality(&[]), 0);
    }

    #[test]
    fn test_quality_score_counts_only_sections_meeting_minimum() {
        // Business present but far below its 500 word minimum.
        let text = format!(
            "Item 1. Business\n{}\nItem 1A. Risk Factors\n{}",
            filler(50),
            filler(400)
        );
        let result = extract(&text);
        assert_eq!(result.quality_score, 20);
    }

    #[test]
    fn test_clean_html_strips_hidden_and_script_content() {
        let html = r#"<html><head><title>T</title><script>var x = 1;</script>
            <style>p { color: red }</style></head>
            <body><ix:header>tagged metadata</ix:header>
            <div style="display:none">hidden duplicate</div>
            <p>Visible &amp; real</p>
            <div>Second line</div></body></html>"#;
        let text = clean_html(html);
        assert!(text.contains("Visible & real"));
        assert!(text.contains("Second line"));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("hidden duplicate"));
        assert!(!text.contains("tagged metadata"));
    }

    #[test]
    fn test_clean_html_collapses_blank_lines() {
        let text = clean_html("<p>a</p>\n\n\n<p>b</p>");
        assert_eq!(text, "a\nb");
    }
}
