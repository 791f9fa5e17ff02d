use anyhow::{anyhow, Result};
use futures::future::join_all;
use log::{error, info, warn};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::analysis::{prompts, validate_brief, Analyzer, OpenAiChat};
use crate::config::Config;
use crate::edgar::client::{EdgarClient, FilingReference};
use crate::edgar::parsing::{self, SectionName};
use crate::edgar::watcher::{FilingEvent, FilingWatcher};
use crate::error::PipelineError;
use crate::storage::{FilingRecord, FilingStore};

/// Sections that have a prompt template and are worth an LLM call.
const ANALYZABLE_SECTIONS: [SectionName; 3] = [
    SectionName::Business,
    SectionName::RiskFactors,
    SectionName::Mda,
];

/// Drives the full flow for the watchlist: locate filing, fetch document,
/// extract sections, fan out analyses, synthesize the brief, persist each
/// stage. One company's failure never aborts the rest.
pub struct Pipeline {
    edgar: Arc<EdgarClient>,
    analyzer: Arc<Analyzer>,
    store: Arc<dyn FilingStore>,
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config, store: Arc<dyn FilingStore>) -> Result<Self> {
        let edgar = Arc::new(EdgarClient::new(
            config.sec_user_agent.clone(),
            config.rate_limit_delay,
        ));
        let chat = Arc::new(OpenAiChat::new(&config)?);
        let analyzer = Arc::new(Analyzer::new(
            chat,
            config.llm_model.clone(),
            config.max_section_words,
        ));
        Ok(Pipeline {
            edgar,
            analyzer,
            store,
            config,
        })
    }

    /// Runs the analysis pipeline for one company. Returns the investment
    /// brief, or None when the company is skipped (no 10-K, unresolved
    /// document, or already processed).
    pub async fn run_for_company(&self, ticker: &str, cik: &str) -> Result<Option<Value>> {
        let Some(accession) = self.edgar.latest_annual_accession(cik).await? else {
            warn!("no 10-K filing found for {}", ticker);
            return Ok(None);
        };

        // Idempotence gate: never re-process a completed filing.
        if self.store.filing_exists(&accession).await? {
            info!("filing {} already processed, skipping", accession);
            return self.store.latest_brief(ticker).await;
        }
        info!("processing {} accession {}", ticker, accession);

        let (facts, doc_url) = tokio::try_join!(
            self.edgar.company_facts(cik),
            self.edgar.primary_document_url(cik, &accession),
        )?;

        let Some(doc_url) = doc_url else {
            warn!("{}", PipelineError::DocumentUnresolved(accession));
            return Ok(None);
        };

        let html = self.edgar.get_text(&doc_url).await?;
        let metadata = parsing::extract_metadata(&html);
        let text = parsing::clean_html(&html);
        let extraction = parsing::extract(&text);
        info!(
            "{}: quality score {}/100, sections: {}",
            ticker,
            extraction.quality_score,
            extraction
                .sections
                .iter()
                .map(|s| s.name.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let fiscal_year: String = metadata.period_of_report.chars().take(4).collect();
        let record = FilingRecord {
            reference: FilingReference {
                ticker: ticker.to_string(),
                cik: cik.to_string(),
                accession_number: accession.clone(),
                primary_document_url: doc_url,
            },
            filed_date: metadata.period_of_report.clone(),
            fiscal_year,
            processed_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.save_filing(&record).await?;
        for section in &extraction.sections {
            self.store
                .save_section(&accession, section, extraction.quality_score)
                .await?;
        }

        // Independent LLM calls, fanned out and joined before synthesis.
        for name in ANALYZABLE_SECTIONS {
            if !extraction.sections.iter().any(|s| s.name == name) {
                warn!("skipping analysis: {}", PipelineError::SectionMissing(name));
            }
        }
        let jobs: Vec<_> = extraction
            .sections
            .iter()
            .filter(|s| prompts::section_prompt(s.name).is_some())
            .map(|s| self.analyzer.analyze_section(s.name, &s.raw_text, ticker))
            .collect();
        let analyses = join_all(jobs).await;

        for analysis in &analyses {
            self.store.save_analysis(&accession, analysis).await?;
            match &analysis.error {
                None => info!("{}/{}: analysis ok", ticker, analysis.section),
                Some(kind) => warn!("{}/{}: analysis failed ({})", ticker, analysis.section, kind),
            }
        }

        let brief = self
            .analyzer
            .generate_investment_brief(&analyses, ticker, &facts)
            .await;
        match brief.payload {
            Some(value) => {
                let shape_errors = validate_brief(&value);
                self.store.save_brief(&accession, ticker, &value).await?;
                if !shape_errors.is_empty() {
                    return Err(anyhow!(
                        "brief for {} failed shape validation: {}",
                        ticker,
                        shape_errors.join("; ")
                    ));
                }
                info!(
                    "{}: brief generated (signal: {}, confidence: {})",
                    ticker, value["overall_signal"], value["confidence_score"]
                );
                Ok(Some(value))
            }
            None => {
                let kind = brief.error.unwrap_or_default();
                error!("failed to generate investment brief for {}: {}", ticker, kind);
                let degraded = serde_json::json!({
                    "error": kind,
                    "raw_text": brief.raw_text,
                });
                self.store.save_brief(&accession, ticker, &degraded).await?;
                Ok(None)
            }
        }
    }

    /// Processes every watchlist company once, in configured order.
    pub async fn backfill(&self) -> Result<()> {
        let mut briefs = 0;
        let mut failures = 0;
        for (ticker, cik) in &self.config.watchlist {
            match self.run_for_company(ticker, cik).await {
                Ok(Some(_)) => briefs += 1,
                Ok(None) => info!("{}: no brief produced", ticker),
                Err(e) => {
                    failures += 1;
                    error!("failed to process {}: {:#}", ticker, e);
                }
            }
        }
        info!("backfill complete: {} briefs, {} failures", briefs, failures);
        Ok(())
    }

    /// Watches the EDGAR feed and processes new filings as they arrive.
    /// The watcher and this consumer run concurrently; events are drained
    /// in arrival order, one filing fully processed before the next.
    pub async fn watch(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<FilingEvent>(100);
        let watcher = Arc::new(FilingWatcher::new(
            self.edgar.clone(),
            Some(self.store.clone()),
            &self.config.watchlist,
            self.config.poll_interval,
        ));
        let runner = watcher.clone();
        let watcher_task = tokio::spawn(async move { runner.run(tx).await });

        info!("watching for new 10-K filings (Ctrl+C to stop)");
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    watcher.stop();
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    info!("new filing detected: {} ({})", event.ticker, event.accession);
                    if let Err(e) = self.run_for_company(&event.ticker, &event.cik).await {
                        error!("failed to process {}: {:#}", event.ticker, e);
                    }
                }
            }
        }

        watcher_task.await?;
        Ok(())
    }
}
