pub mod header;
pub mod section;

pub use header::{extract_metadata, FilingMetadata};
pub use section::{
    clean_html, extract, extract_sections, score_quality, ExtractedSection, ExtractionResult,
    SectionName,
};
