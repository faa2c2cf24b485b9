use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::api;
use crate::error::{ClientError, ClientResult};
use crate::layers::{CitationData, PaperRecord};

/// Where citation metrics come from, keyed by arXiv identifier.
#[async_trait]
pub trait CitationSource: Send + Sync {
    /// One entry per requested id, positionally aligned; `None` means not found.
    /// The list may be shorter than the request.
    async fn lookup_batch(&self, arxiv_ids: &[String]) -> ClientResult<Vec<Option<CitationData>>>;

    async fn lookup_one(&self, arxiv_id: &str) -> ClientResult<CitationData>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Citations {
    citation_count: Option<u64>,
    influential_citation_count: Option<u64>,
    url: Option<String>,
}

impl From<S2Citations> for CitationData {
    fn from(s2: S2Citations) -> Self {
        Self {
            citation_count: s2.citation_count.unwrap_or(0),
            influential_citation_count: s2.influential_citation_count.unwrap_or(0),
            url: s2.url.filter(|u| !u.is_empty()),
        }
    }
}

pub struct SemanticScholarClient {
    client: Client,
    api_key: Option<String>,
    graph_api_url: String,
}

impl SemanticScholarClient {
    pub fn new(graph_api_url: impl Into<String>, api_key: Option<String>) -> ClientResult<Self> {
        let client = Client::builder().user_agent(api::USER_AGENT).build()?;
        Ok(Self { client, api_key, graph_api_url: graph_api_url.into() })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }

    async fn check(resp: reqwest::Response) -> ClientResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ClientError::status(status.as_u16(), body))
    }
}

impl std::fmt::Debug for SemanticScholarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholarClient")
            .field("graph_api_url", &self.graph_api_url)
            .field("has_api_key", &self.has_api_key())
            .finish()
    }
}

#[async_trait]
impl CitationSource for SemanticScholarClient {
    async fn lookup_batch(&self, arxiv_ids: &[String]) -> ClientResult<Vec<Option<CitationData>>> {
        let url = format!("{}/paper/batch", self.graph_api_url);
        let body = serde_json::json!({
            "ids": arxiv_ids.iter().map(|id| format!("ArXiv:{id}")).collect::<Vec<_>>()
        });

        let request = self
            .client
            .post(&url)
            .query(&[("fields", api::CITATION_FIELDS)])
            .timeout(api::CITATION_BATCH_TIMEOUT)
            .json(&body);
        let resp = Self::check(self.authorize(request).send().await?).await?;
        let text = resp.text().await?;

        let results: Vec<Option<S2Citations>> = serde_json::from_str(&text)?;
        Ok(results.into_iter().map(|r| r.map(CitationData::from)).collect())
    }

    async fn lookup_one(&self, arxiv_id: &str) -> ClientResult<CitationData> {
        let url = format!("{}/paper/ArXiv:{}", self.graph_api_url, arxiv_id);
        let request = self
            .client
            .get(&url)
            .query(&[("fields", api::CITATION_FIELDS)])
            .timeout(api::CITATION_SINGLE_TIMEOUT);
        let resp = Self::check(self.authorize(request).send().await?).await?;
        let text = resp.text().await?;

        let result: S2Citations = serde_json::from_str(&text)?;
        Ok(result.into())
    }
}

/// Result of enriching one batch of identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The bulk request answered; `matched` entries were non-null.
    Bulk { requested: usize, matched: usize },
    /// The bulk request failed and each id was looked up alone.
    Fallback { requested: usize, matched: usize, failed: usize, reason: String },
}

impl BatchOutcome {
    pub fn matched(&self) -> usize {
        match self {
            Self::Bulk { matched, .. } | Self::Fallback { matched, .. } => *matched,
        }
    }
}

impl std::fmt::Display for BatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bulk { requested, matched } => write!(f, "bulk {matched}/{requested}"),
            Self::Fallback { requested, matched, failed, reason } => write!(
                f,
                "fallback {matched}/{requested}, {failed} lookups failed (bulk error: {reason})"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentReport {
    /// Records carrying an identifier, i.e. eligible for lookup.
    pub eligible: usize,
    pub batches: Vec<BatchOutcome>,
}

impl EnrichmentReport {
    pub fn enriched(&self) -> usize {
        self.batches.iter().map(BatchOutcome::matched).sum()
    }

    pub fn fell_back(&self) -> bool {
        self.batches.iter().any(|b| matches!(b, BatchOutcome::Fallback { .. }))
    }
}

/// Fills citation counts on records that carry an arXiv identifier.
/// Never fails: a record that cannot be enriched keeps zero counts.
pub struct CitationEnricher<C> {
    source: C,
    batch_size: usize,
    batch_pause: Duration,
    fallback_pause: Duration,
}

impl<C: CitationSource> CitationEnricher<C> {
    pub fn new(source: C) -> Self {
        Self {
            source,
            batch_size: api::CITATION_BATCH_SIZE,
            batch_pause: api::CITATION_BATCH_PAUSE,
            fallback_pause: api::CITATION_FALLBACK_PAUSE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pauses(mut self, batch_pause: Duration, fallback_pause: Duration) -> Self {
        self.batch_pause = batch_pause;
        self.fallback_pause = fallback_pause;
        self
    }

    pub async fn enrich(&self, mut papers: Vec<PaperRecord>) -> (Vec<PaperRecord>, EnrichmentReport) {
        let eligible: Vec<(usize, String)> = papers
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.arxiv_id.clone().filter(|id| !id.is_empty()).map(|id| (i, id)))
            .collect();

        let mut report = EnrichmentReport { eligible: eligible.len(), batches: Vec::new() };
        if eligible.is_empty() {
            tracing::info!("No arXiv identifiers available for citation lookup");
            return (papers, report);
        }

        for (n, batch) in eligible.chunks(self.batch_size).enumerate() {
            if n > 0 {
                pause(self.batch_pause).await;
            }
            let outcome = self.enrich_batch(&mut papers, batch).await;
            report.batches.push(outcome);
        }

        tracing::info!(
            "Enriched {}/{} papers with citation data",
            report.enriched(),
            papers.len()
        );
        (papers, report)
    }

    async fn enrich_batch(&self, papers: &mut [PaperRecord], batch: &[(usize, String)]) -> BatchOutcome {
        let ids: Vec<String> = batch.iter().map(|(_, id)| id.clone()).collect();

        match self.source.lookup_batch(&ids).await {
            Ok(results) => {
                let mut matched = 0;
                for ((index, _), data) in batch.iter().zip(results) {
                    if let Some(data) = data {
                        papers[*index].apply_citations(data);
                        matched += 1;
                    }
                }
                BatchOutcome::Bulk { requested: batch.len(), matched }
            }
            Err(e) => {
                tracing::warn!("Batch citation lookup failed, falling back to single lookups: {}", e);
                let (matched, failed) = self.enrich_singly(papers, batch).await;
                BatchOutcome::Fallback {
                    requested: batch.len(),
                    matched,
                    failed,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn enrich_singly(&self, papers: &mut [PaperRecord], batch: &[(usize, String)]) -> (usize, usize) {
        let mut matched = 0;
        let mut failed = 0;
        for (n, (index, id)) in batch.iter().enumerate() {
            if n > 0 {
                pause(self.fallback_pause).await;
            }
            match self.source.lookup_one(id).await {
                Ok(data) => {
                    papers[*index].apply_citations(data);
                    matched += 1;
                }
                Err(e) => {
                    tracing::debug!("Single citation lookup for {} failed: {}", id, e);
                    failed += 1;
                }
            }
        }
        (matched, failed)
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
