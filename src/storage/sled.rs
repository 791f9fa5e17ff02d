use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;

use super::{FilingRecord, FilingStore};
use crate::analysis::AnalysisResult;
use crate::edgar::parsing::ExtractedSection;

/// Sled-backed record store. Filings are keyed by accession number;
/// sections and analyses by "accession/section"; the latest brief per
/// ticker is overwritten in place so `latest_brief` is a point lookup.
pub struct SledStore {
    filings: ::sled::Tree,
    sections: ::sled::Tree,
    analyses: ::sled::Tree,
    briefs: ::sled::Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = ::sled::open(path)?;
        let store = SledStore {
            filings: db.open_tree("filings")?,
            sections: db.open_tree("sections")?,
            analyses: db.open_tree("analyses")?,
            briefs: db.open_tree("briefs")?,
        };
        info!("record store opened at {:?}", path);
        Ok(store)
    }
}

#[async_trait]
impl FilingStore for SledStore {
    async fn filing_exists(&self, accession: &str) -> Result<bool> {
        Ok(self.filings.contains_key(accession.as_bytes())?)
    }

    async fn all_accessions(&self) -> Result<HashSet<String>> {
        let mut accessions = HashSet::new();
        for entry in self.filings.iter() {
            let (key, _) = entry?;
            accessions.insert(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(accessions)
    }

    async fn save_filing(&self, record: &FilingRecord) -> Result<()> {
        let key = record.reference.accession_number.as_bytes();
        self.filings.insert(key, serde_json::to_vec(record)?)?;
        self.filings.flush()?;
        info!(
            "saved filing {} for {}",
            record.reference.accession_number, record.reference.ticker
        );
        Ok(())
    }

    async fn save_section(
        &self,
        accession: &str,
        section: &ExtractedSection,
        quality_score: u8,
    ) -> Result<()> {
        let key = format!("{}/{}", accession, section.name);
        let value = json!({
            "section": section,
            "quality_score": quality_score,
        });
        self.sections
            .insert(key.as_bytes(), serde_json::to_vec(&value)?)?;
        debug!("saved section {}", key);
        Ok(())
    }

    async fn save_analysis(&self, accession: &str, analysis: &AnalysisResult) -> Result<()> {
        let key = format!("{}/{}", accession, analysis.section);
        let value = json!({
            "analysis": analysis,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        self.analyses
            .insert(key.as_bytes(), serde_json::to_vec(&value)?)?;
        debug!("saved analysis {}", key);
        Ok(())
    }

    async fn save_brief(&self, accession: &str, ticker: &str, brief: &Value) -> Result<()> {
        let value = json!({
            "ticker": ticker,
            "accession": accession,
            "brief": brief,
            "created_at": chrono::Utc::now().to_rfc3339(),
        });
        let encoded = serde_json::to_vec(&value)?;
        self.briefs
            .insert(format!("accession/{}", accession).as_bytes(), encoded.clone())?;
        // Latest-wins pointer per ticker.
        self.briefs
            .insert(format!("ticker/{}", ticker).as_bytes(), encoded)?;
        self.briefs.flush()?;
        info!("saved investment brief for {} ({})", ticker, accession);
        Ok(())
    }

    async fn latest_brief(&self, ticker: &str) -> Result<Option<Value>> {
        let Some(raw) = self.briefs.get(format!("ticker/{}", ticker).as_bytes())? else {
            return Ok(None);
        };
        let wrapper: Value = serde_json::from_slice(&raw)?;
        Ok(Some(wrapper["brief"].clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edgar::client::FilingReference;
    use crate::edgar::parsing::SectionName;
    use tempfile::tempdir;

    fn record(ticker: &str, accession: &str) -> FilingRecord {
        FilingRecord {
            reference: FilingReference {
                ticker: ticker.to_string(),
                cik: "320193".to_string(),
                accession_number: accession.to_string(),
                primary_document_url: "https://example.com/doc.htm".to_string(),
            },
            filed_date: "20240928".to_string(),
            fiscal_year: "2024".to_string(),
            processed_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_filing_roundtrip_and_idempotence_oracle() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        assert!(!store.filing_exists("0000320193-24-000123").await.unwrap());
        store
            .save_filing(&record("AAPL", "0000320193-24-000123"))
            .await
            .unwrap();
        assert!(store.filing_exists("0000320193-24-000123").await.unwrap());

        let all = store.all_accessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all.contains("0000320193-24-000123"));
    }

    #[tokio::test]
    async fn test_latest_brief_overwrites_per_ticker() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        assert!(store.latest_brief("AAPL").await.unwrap().is_none());

        store
            .save_brief("acc-1", "AAPL", &serde_json::json!({"overall_signal": "neutral"}))
            .await
            .unwrap();
        store
            .save_brief("acc-2", "AAPL", &serde_json::json!({"overall_signal": "positive"}))
            .await
            .unwrap();

        let brief = store.latest_brief("AAPL").await.unwrap().unwrap();
        assert_eq!(brief["overall_signal"], "positive");
    }

    #[tokio::test]
    async fn test_save_section_and_analysis() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();

        let section = ExtractedSection {
            name: SectionName::Business,
            raw_text: "we sell widgets".to_string(),
            word_count: 3,
        };
        store.save_section("acc-1", &section, 80).await.unwrap();
        assert!(store
            .sections
            .contains_key(b"acc-1/business".as_ref())
            .unwrap());
    }
}
