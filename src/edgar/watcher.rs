use anyhow::Result;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::client::EdgarClient;
use crate::storage::FilingStore;

pub const EDGAR_FEED_URL: &str = "https://www.sec.gov/cgi-bin/browse-edgar\
    ?action=getcurrent&type=10-K&dateb=&owner=include&count=40&output=atom";

static ACCESSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{10}-\d{2}-\d{6})").unwrap());
static CIK_LINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/data/(\d+)/").unwrap());
static CIK_TEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"CIK[=:]?\s*(\d+)").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilingEvent {
    pub ticker: String,
    pub cik: String,
    pub accession: String,
    pub title: String,
}

#[derive(Debug, Default)]
struct FeedEntry {
    title: String,
    link: String,
    summary: String,
}

/// Polls the EDGAR Atom feed for newly published 10-Ks, deduplicates
/// against already-seen accession numbers, and emits events for watchlist
/// companies onto a queue. Poll-cycle failures are logged and swallowed so
/// the loop outlives transient network and parse errors.
pub struct FilingWatcher {
    client: Arc<EdgarClient>,
    store: Option<Arc<dyn FilingStore>>,
    feed_url: String,
    poll_interval: Duration,
    /// ticker -> CIK, as configured.
    watchlist: HashMap<String, String>,
    /// CIK -> ticker reverse lookup.
    cik_to_ticker: HashMap<String, String>,
    seen: Mutex<HashSet<String>>,
    running: AtomicBool,
}

impl FilingWatcher {
    pub fn new(
        client: Arc<EdgarClient>,
        store: Option<Arc<dyn FilingStore>>,
        watchlist: &[(String, String)],
        poll_interval: Duration,
    ) -> Self {
        let watchlist: HashMap<String, String> = watchlist.iter().cloned().collect();
        let cik_to_ticker = watchlist
            .iter()
            .map(|(ticker, cik)| (cik.clone(), ticker.clone()))
            .collect();
        FilingWatcher {
            client,
            store,
            feed_url: EDGAR_FEED_URL.to_string(),
            poll_interval,
            watchlist,
            cik_to_ticker,
            seen: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Polls the feed once and returns the new watchlist events, marking
    /// them as seen.
    pub async fn poll_once(&self) -> Result<Vec<FilingEvent>> {
        let body = self.client.get_text(&self.feed_url).await?;
        self.collect_new_events(&body).await
    }

    async fn collect_new_events(&self, feed_xml: &str) -> Result<Vec<FilingEvent>> {
        let entries = parse_feed(feed_xml)?;
        let mut seen = self.seen.lock().await;
        let mut events = Vec::new();

        for entry in entries {
            let haystack = format!("{} {}", entry.link, entry.summary);
            let Some(accession) = ACCESSION_RE
                .captures(&haystack)
                .map(|c| c[1].to_string())
            else {
                continue;
            };

            if seen.contains(&accession) {
                continue;
            }

            // Primary: the archives link carries the CIK; fall back to
            // scanning the title and summary text.
            let cik = CIK_LINK_RE
                .captures(&entry.link)
                .map(|c| c[1].to_string())
                .or_else(|| {
                    let text = format!("{} {}", entry.title, entry.summary);
                    CIK_TEXT_RE.captures(&text).map(|c| c[1].to_string())
                });
            let Some(cik) = cik else {
                continue;
            };

            let Some(ticker) = self.ticker_for_cik(&cik) else {
                debug!("skipping off-watchlist filing {} (CIK {})", accession, cik);
                continue;
            };

            seen.insert(accession.clone());
            info!("new 10-K filing detected: {} ({})", ticker, accession);
            events.push(FilingEvent {
                cik: self.watchlist[&ticker].clone(),
                ticker,
                accession,
                title: entry.title,
            });
        }

        Ok(events)
    }

    /// Watchlist lookup tolerating zero-padding differences between the
    /// feed's CIK and the configured one.
    fn ticker_for_cik(&self, cik: &str) -> Option<String> {
        if let Some(ticker) = self.cik_to_ticker.get(cik) {
            return Some(ticker.clone());
        }
        let stripped = cik.trim_start_matches('0');
        self.cik_to_ticker
            .iter()
            .find(|(known, _)| known.trim_start_matches('0') == stripped)
            .map(|(_, ticker)| ticker.clone())
    }

    /// Best-effort preload of previously processed accessions; a storage
    /// failure here is logged and ignored.
    async fn load_seen(&self) {
        let Some(store) = &self.store else { return };
        match store.all_accessions().await {
            Ok(accessions) => {
                let mut seen = self.seen.lock().await;
                let count = accessions.len();
                seen.extend(accessions);
                info!("loaded {} seen accessions from store", count);
            }
            Err(e) => warn!("could not load seen accessions from store: {:#}", e),
        }
    }

    /// Polls until stopped, forwarding new events into the channel. A
    /// failed cycle does not terminate the loop.
    pub async fn run(&self, tx: mpsc::Sender<FilingEvent>) {
        self.running.store(true, Ordering::SeqCst);
        self.load_seen().await;
        info!(
            "starting filing watcher (poll interval: {}s, watchlist: {:?})",
            self.poll_interval.as_secs(),
            self.watchlist.keys().collect::<Vec<_>>()
        );

        while self.running.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(events) => {
                    if events.is_empty() {
                        debug!("no new filings found in this poll cycle");
                    }
                    for event in events {
                        info!("queueing filing event: {}", event.ticker);
                        if tx.send(event).await.is_err() {
                            warn!("event consumer dropped, stopping watcher");
                            return;
                        }
                    }
                }
                Err(e) => error!("error polling EDGAR feed: {:#}", e),
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        info!("filing watcher stopped");
    }

    /// Requests loop termination after the current cycle; nothing in
    /// flight is aborted.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("filing watcher stopping");
    }
}

/// Minimal Atom reader: collects (title, link href, summary) per entry.
fn parse_feed(xml: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"entry" => current = Some(FeedEntry::default()),
                b"title" if current.is_some() => field = Some("title"),
                b"summary" if current.is_some() => field = Some("summary"),
                b"link" => {
                    if let Some(entry) = current.as_mut() {
                        entry.link = href_attribute(e)?;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.name().as_ref() == b"link" => {
                if let Some(entry) = current.as_mut() {
                    entry.link = href_attribute(e)?;
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(entry), Some(name)) = (current.as_mut(), field) {
                    let text = e.unescape()?;
                    match name {
                        "title" => entry.title.push_str(&text),
                        "summary" => entry.summary.push_str(&text),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"entry" => {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                b"title" | b"summary" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("error parsing feed XML: {}", e)),
            _ => {}
        }
    }

    Ok(entries)
}

fn href_attribute(e: &quick_xml::events::BytesStart) -> Result<String> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"href" {
            return Ok(String::from_utf8_lossy(&attr.value).into_owned());
        }
    }
    Ok(String::new())
}
