use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{FilingRecord, FilingStore};
use crate::analysis::AnalysisResult;
use crate::edgar::parsing::ExtractedSection;

/// Ephemeral store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryStore {
    filings: RwLock<HashMap<String, FilingRecord>>,
    sections: RwLock<HashMap<String, ExtractedSection>>,
    analyses: RwLock<HashMap<String, AnalysisResult>>,
    briefs: RwLock<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FilingStore for InMemoryStore {
    async fn filing_exists(&self, accession: &str) -> Result<bool> {
        Ok(self.filings.read().unwrap().contains_key(accession))
    }

    async fn all_accessions(&self) -> Result<HashSet<String>> {
        Ok(self.filings.read().unwrap().keys().cloned().collect())
    }

    async fn save_filing(&self, record: &FilingRecord) -> Result<()> {
        self.filings
            .write()
            .unwrap()
            .insert(record.reference.accession_number.clone(), record.clone());
        Ok(())
    }

    async fn save_section(
        &self,
        accession: &str,
        section: &ExtractedSection,
        _quality_score: u8,
    ) -> Result<()> {
        self.sections
            .write()
            .unwrap()
            .insert(format!("{}/{}", accession, section.name), section.clone());
        Ok(())
    }

    async fn save_analysis(&self, accession: &str, analysis: &AnalysisResult) -> Result<()> {
        self.analyses
            .write()
            .unwrap()
            .insert(format!("{}/{}", accession, analysis.section), analysis.clone());
        Ok(())
    }

    async fn save_brief(&self, _accession: &str, ticker: &str, brief: &Value) -> Result<()> {
        self.briefs
            .write()
            .unwrap()
            .insert(ticker.to_string(), brief.clone());
        Ok(())
    }

    async fn latest_brief(&self, ticker: &str) -> Result<Option<Value>> {
        Ok(self.briefs.read().unwrap().get(ticker).cloned())
    }
}
