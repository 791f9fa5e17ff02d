use anyhow::Result;
use futures::StreamExt;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::rate_limiter::RateLimiter;
use crate::error::PipelineError;

pub const EDGAR_DATA_URL: &str = "https://data.sec.gov";
pub const EDGAR_ARCHIVES_URL: &str = "https://www.sec.gov/Archives/edgar/data";
pub const ANNUAL_REPORT_FORM: &str = "10-K";

/// Additional attempts after the first request.
const MAX_RETRIES: u32 = 3;

/// Inline-XBRL viewer artifacts are named like "R12.htm" and are never the
/// primary narrative document.
static VIEWER_ARTIFACT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]\d+$").unwrap());

static HREF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)href="([^"]+\.html?)""#).unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingReference {
    pub ticker: String,
    pub cik: String,
    pub accession_number: String,
    pub primary_document_url: String,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    filings: Filings,
}

#[derive(Debug, Deserialize)]
struct Filings {
    recent: RecentFilings,
}

/// Parallel arrays, most recent first.
#[derive(Debug, Deserialize)]
struct RecentFilings {
    #[serde(default)]
    form: Vec<String>,
    #[serde(rename = "accessionNumber", default)]
    accession_number: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FilingIndex {
    directory: Directory,
}

#[derive(Debug, Deserialize)]
struct Directory {
    #[serde(default)]
    item: Vec<IndexItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IndexItem {
    #[serde(default)]
    name: String,
    /// EDGAR serves this as either a string or a number.
    size: Option<serde_json::Value>,
}

impl IndexItem {
    fn declared_size(&self) -> u64 {
        match &self.size {
            Some(serde_json::Value::String(s)) => s.parse().unwrap_or(0),
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnualValue {
    pub period_end: String,
    pub value: Option<f64>,
    pub fiscal_year: Option<u32>,
}

/// Annual metric series extracted from the XBRL companyfacts feed,
/// time-ordered most recent first.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyFacts {
    pub company_name: String,
    pub cik: String,
    pub revenue: Vec<AnnualValue>,
    pub net_income: Vec<AnnualValue>,
    pub total_assets: Vec<AnnualValue>,
}

#[derive(Debug, Deserialize)]
struct CompanyFactsDoc {
    #[serde(rename = "entityName", default)]
    entity_name: String,
    #[serde(default)]
    facts: FactsNode,
}

#[derive(Debug, Deserialize, Default)]
struct FactsNode {
    #[serde(rename = "us-gaap", default)]
    us_gaap: HashMap<String, Concept>,
}

#[derive(Debug, Deserialize)]
struct Concept {
    #[serde(default)]
    units: HashMap<String, Vec<UnitEntry>>,
}

#[derive(Debug, Deserialize, Clone)]
struct UnitEntry {
    #[serde(default)]
    form: String,
    #[serde(default)]
    fp: String,
    #[serde(default)]
    end: String,
    val: Option<f64>,
    fy: Option<u32>,
}

/// Rate-limited EDGAR client with exponential-backoff retry. All requests
/// route through the single shared [`RateLimiter`].
pub struct EdgarClient {
    client: Client,
    user_agent: String,
    limiter: RateLimiter,
}

impl EdgarClient {
    pub fn new(user_agent: String, rate_limit_delay: Duration) -> Self {
        EdgarClient {
            client: Client::new(),
            user_agent,
            limiter: RateLimiter::new(rate_limit_delay),
        }
    }

    async fn get(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<reqwest::Response, PipelineError> {
        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            self.limiter.wait().await;
            let result = self
                .client
                .get(url)
                .header(reqwest::header::USER_AGENT, &self.user_agent)
                .header(reqwest::header::ACCEPT_ENCODING, "gzip, deflate")
                .timeout(timeout)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt == MAX_RETRIES {
                            return Err(PipelineError::RateLimitExceeded {
                                url: url.to_string(),
                                attempts: MAX_RETRIES + 1,
                            });
                        }
                        let wait = 1u64 << (attempt + 1);
                        warn!(
                            "rate limited by EDGAR, waiting {}s (attempt {}/{})",
                            wait,
                            attempt + 1,
                            MAX_RETRIES + 1
                        );
                        tokio::time::sleep(Duration::from_secs(wait)).await;
                        continue;
                    }
                    if status.is_success() {
                        return Ok(response);
                    }
                    last_error = format!("HTTP status {}", status);
                }
                Err(e) => last_error = e.to_string(),
            }

            if attempt < MAX_RETRIES {
                let wait = 1u64 << (attempt + 1);
                warn!(
                    "error fetching {} ({}), retrying in {}s (attempt {}/{})",
                    url,
                    last_error,
                    wait,
                    attempt + 1,
                    MAX_RETRIES + 1
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
        }

        Err(PipelineError::FetchFailed {
            url: url.to_string(),
            message: last_error,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PipelineError> {
        let response = self.get(url, Duration::from_secs(30)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PipelineError::FetchFailed {
                url: url.to_string(),
                message: format!("invalid JSON body: {}", e),
            })
    }

    /// Streams a potentially multi-megabyte document in bounded chunks so
    /// peak memory during transfer stays chunk-sized until the final
    /// concatenation.
    pub async fn get_text(&self, url: &str) -> Result<String, PipelineError> {
        let response = self.get(url, Duration::from_secs(60)).await?;
        let mut stream = response.bytes_stream();
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::FetchFailed {
                url: url.to_string(),
                message: format!("stream error: {}", e),
            })?;
            body.extend_from_slice(&chunk);
        }
        debug!("fetched {} bytes from {}", body.len(), url);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    /// Returns the accession number of the most recent 10-K for a CIK, or
    /// None if the company has never filed one. The submissions feed is
    /// most-recent-first, so the first matching form wins.
    pub async fn latest_annual_accession(&self, cik: &str) -> Result<Option<String>> {
        let url = format!("{}/submissions/CIK{:0>10}.json", EDGAR_DATA_URL, cik);
        info!("fetching submissions for CIK {}", cik);
        let submissions: Submissions = self.get_json(&url).await?;
        let recent = submissions.filings.recent;

        for (form, accession) in recent.form.iter().zip(recent.accession_number.iter()) {
            if form == ANNUAL_REPORT_FORM {
                info!("found {} accession: {}", ANNUAL_REPORT_FORM, accession);
                return Ok(Some(accession.clone()));
            }
        }
        warn!("no {} filing found for CIK {}", ANNUAL_REPORT_FORM, cik);
        Ok(None)
    }

    /// Resolves the primary narrative document URL for a filing. Tries the
    /// structured JSON index first, then falls back to scanning the HTML
    /// index page. `Ok(None)` means the document is unresolved, which the
    /// caller must treat as a skip, not an error.
    pub async fn primary_document_url(
        &self,
        cik: &str,
        accession: &str,
    ) -> Result<Option<String>> {
        let accession_nodash = accession.replace('-', "");
        let cik_short = cik.trim_start_matches('0');
        let index_url = format!(
            "{}/{}/{}/",
            EDGAR_ARCHIVES_URL, cik_short, accession_nodash
        );
        let index_json_url = format!("{}{}-index.json", index_url, accession);

        match self.get_json::<FilingIndex>(&index_json_url).await {
            Ok(index) => {
                if let Some(name) = select_primary_document(&index.directory.item) {
                    let full_url = format!("{}{}", index_url, name);
                    info!("found primary document: {}", full_url);
                    return Ok(Some(full_url));
                }
                debug!("JSON index yielded no candidate for {}", accession);
            }
            Err(e) => {
                debug!("JSON index not available ({}), falling back to HTML index", e);
            }
        }

        // Fallback: first .htm anchor on the HTML index page that is not
        // itself an index.
        let html = self.get_text(&index_url).await?;
        let base = Url::parse(&index_url)?;
        for capture in HREF_RE.captures_iter(&html) {
            let href = &capture[1];
            if href.to_lowercase().contains("index") {
                continue;
            }
            let full_url = base.join(href)?;
            info!("found primary document (fallback): {}", full_url);
            return Ok(Some(full_url.to_string()));
        }

        Ok(None)
    }

    /// Fetches XBRL company facts and projects them down to three annual
    /// metric series. Filers are inconsistent about which GAAP concept they
    /// tag, so each metric tries a list of concept names in priority order.
    pub async fn company_facts(&self, cik: &str) -> Result<CompanyFacts> {
        let url = format!("{}/api/xbrl/companyfacts/CIK{:0>10}.json", EDGAR_DATA_URL, cik);
        info!("fetching XBRL facts for CIK {}", cik);
        let doc: CompanyFactsDoc = self.get_json(&url).await?;

        let facts = CompanyFacts {
            company_name: doc.entity_name.clone(),
            cik: cik.to_string(),
            revenue: extract_annual_values(
                &doc.facts.us_gaap,
                &[
                    "Revenues",
                    "RevenueFromContractWithCustomerExcludingAssessedTax",
                    "SalesRevenueNet",
                    "RevenueFromContractWithCustomerIncludingAssessedTax",
                ],
            ),
            net_income: extract_annual_values(&doc.facts.us_gaap, &["NetIncomeLoss", "ProfitLoss"]),
            total_assets: extract_annual_values(&doc.facts.us_gaap, &["Assets"]),
        };

        info!(
            "extracted XBRL facts for {}: {} revenue, {} income, {} asset entries",
            cik,
            facts.revenue.len(),
            facts.net_income.len(),
            facts.total_assets.len()
        );
        Ok(facts)
    }
}

/// Picks the primary document from the structured index: HTML files that
/// are not index pages and not viewer artifacts, largest declared size
/// first. The primary narrative document is typically the largest HTML
/// file in the filing.
fn select_primary_document(items: &[IndexItem]) -> Option<&str> {
    items
        .iter()
        .filter(|item| {
            let name = item.name.to_lowercase();
            let is_html = name.ends_with(".htm") || name.ends_with(".html");
            let stem = item.name.split('.').next().unwrap_or("");
            is_html && !name.contains("index") && !VIEWER_ARTIFACT_RE.is_match(stem)
        })
        .max_by_key(|item| item.declared_size())
        .map(|item| item.name.as_str())
}

/// Extracts up to three annual (10-K, full-year) values for the first
/// concept in the fallback list that has any, most recent first and
/// deduplicated by period end date.
fn extract_annual_values(
    us_gaap: &HashMap<String, Concept>,
    concept_names: &[&str],
) -> Vec<AnnualValue> {
    for concept in concept_names {
        let Some(data) = us_gaap.get(*concept) else {
            continue;
        };
        let Some(usd_values) = data.units.get("USD") else {
            continue;
        };

        let mut annual: Vec<&UnitEntry> = usd_values
            .iter()
            .filter(|v| v.form == ANNUAL_REPORT_FORM && v.fp == "FY")
            .collect();
        if annual.is_empty() {
            continue;
        }

        annual.sort_by(|a, b| b.end.cmp(&a.end));

        let mut seen_dates = std::collections::HashSet::new();
        let mut unique = Vec::new();
        for entry in annual {
            if seen_dates.insert(entry.end.clone()) {
                unique.push(AnnualValue {
                    period_end: entry.end.clone(),
                    value: entry.val,
                    fiscal_year: entry.fy,
                });
            }
            if unique.len() >= 3 {
                break;
            }
        }
        return unique;
    }
    Vec::new()
}
