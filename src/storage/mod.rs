use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::analysis::AnalysisResult;
use crate::edgar::client::FilingReference;
use crate::edgar::parsing::ExtractedSection;

pub mod memory;
pub mod sled;

pub use self::memory::InMemoryStore;
pub use self::sled::SledStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingRecord {
    #[serde(flatten)]
    pub reference: FilingReference,
    pub filed_date: String,
    pub fiscal_year: String,
    pub processed_at: String,
}

/// Record store keyed by accession number. The pipeline treats it purely
/// as an idempotence oracle and write sink; analysis content is never read
/// back for pipeline logic.
#[async_trait]
pub trait FilingStore: Send + Sync {
    async fn filing_exists(&self, accession: &str) -> Result<bool>;

    async fn all_accessions(&self) -> Result<HashSet<String>>;

    async fn save_filing(&self, record: &FilingRecord) -> Result<()>;

    async fn save_section(
        &self,
        accession: &str,
        section: &ExtractedSection,
        quality_score: u8,
    ) -> Result<()>;

    async fn save_analysis(&self, accession: &str, analysis: &AnalysisResult) -> Result<()>;

    async fn save_brief(&self, accession: &str, ticker: &str, brief: &Value) -> Result<()>;

    async fn latest_brief(&self, ticker: &str) -> Result<Option<Value>>;
}
