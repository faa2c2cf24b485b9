//! One digest run: fetch each topic, admit new recent papers, enrich, rank.

use chrono::{DateTime, Utc};

use crate::config::PipelineConfig;
use crate::layers::citations::{CitationEnricher, CitationSource, EnrichmentReport};
use crate::layers::discovery::PaperSource;
use crate::layers::ledger::{DedupFilter, Fingerprint, SeenSet};
use crate::layers::ranking::Ranker;
use crate::layers::relevance::RelevanceScorer;
use crate::layers::{PaperRecord, TopicBucket};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched { count: usize },
    /// The topic contributes nothing this run.
    Failed { reason: String },
}

#[derive(Debug, Clone)]
pub struct TopicReport {
    pub topic: String,
    pub fetch: FetchOutcome,
    pub admitted: usize,
    pub enrichment: EnrichmentReport,
}

#[derive(Debug, Clone)]
pub struct DigestRun {
    /// Configured topic order; topics with nothing new are kept empty.
    pub buckets: Vec<TopicBucket>,
    /// Fingerprints to merge into the seen set, in admission order.
    pub admitted: Vec<Fingerprint>,
    pub reports: Vec<TopicReport>,
}

impl DigestRun {
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|b| b.papers.len()).sum()
    }

    /// Most cited papers across all topics, ties in digest order.
    pub fn top_cited(&self, n: usize) -> Vec<&PaperRecord> {
        let mut papers: Vec<&PaperRecord> = self.buckets.iter().flat_map(|b| &b.papers).collect();
        papers.sort_by(|a, b| b.citation_count.cmp(&a.citation_count));
        papers.truncate(n);
        papers
    }

    pub fn failed_topics(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.fetch, FetchOutcome::Failed { .. }))
            .count()
    }
}

pub struct DigestPipeline<S, C> {
    source: S,
    enricher: CitationEnricher<C>,
    scorer: RelevanceScorer,
    config: PipelineConfig,
}

impl<S: PaperSource, C: CitationSource> DigestPipeline<S, C> {
    pub fn new(
        source: S,
        enricher: CitationEnricher<C>,
        scorer: RelevanceScorer,
        config: PipelineConfig,
    ) -> Self {
        Self { source, enricher, scorer, config }
    }

    /// Topics run one after another; a paper admitted by an earlier topic is
    /// taken for every later one.
    pub async fn run(&self, seen: &SeenSet, now: DateTime<Utc>) -> DigestRun {
        let mut filter = DedupFilter::new(seen, self.config.lookback_days, now);
        let mut buckets = Vec::with_capacity(self.config.topics.len());
        let mut reports = Vec::with_capacity(self.config.topics.len());

        for topic in &self.config.topics {
            tracing::info!("Fetching: {}", topic.name);

            let (fetched, fetch) = match self
                .source
                .search(&topic.keywords, &self.config.categories, self.config.max_results)
                .await
            {
                Ok(papers) => {
                    let count = papers.len();
                    (papers, FetchOutcome::Fetched { count })
                }
                Err(e) => {
                    tracing::warn!("Fetch failed for topic {}: {}", topic.name, e);
                    (Vec::new(), FetchOutcome::Failed { reason: e.to_string() })
                }
            };

            let fresh: Vec<PaperRecord> = fetched.into_iter().filter(|p| filter.admit(p)).collect();
            let admitted = fresh.len();

            let (fresh, enrichment) = if fresh.is_empty() {
                (fresh, EnrichmentReport::default())
            } else {
                self.enricher.enrich(fresh).await
            };
            let papers = Ranker::rank(&self.scorer, fresh);

            for batch in &enrichment.batches {
                tracing::debug!("  {} citations: {}", topic.name, batch);
            }
            if enrichment.fell_back() {
                tracing::warn!("  {}: citation data is partial after fallback lookups", topic.name);
            }

            tracing::info!(
                "  {}: {} new papers ({} enriched)",
                topic.name,
                admitted,
                enrichment.enriched()
            );

            buckets.push(TopicBucket { topic: topic.name.clone(), papers });
            reports.push(TopicReport {
                topic: topic.name.clone(),
                fetch,
                admitted,
                enrichment,
            });
        }

        DigestRun { buckets, admitted: filter.into_admitted(), reports }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use crate::config::Topic;
    use crate::error::{ClientError, ClientResult};
    use crate::layers::relevance::WeightedPhrase;
    use crate::layers::CitationData;

    /// Results keyed by the topic's first keyword; `None` fails the fetch.
    struct FakeSource(HashMap<String, Option<Vec<PaperRecord>>>);

    #[async_trait]
    impl PaperSource for FakeSource {
        async fn search(
            &self,
            keywords: &[String],
            _categories: &[String],
            limit: usize,
        ) -> ClientResult<Vec<PaperRecord>> {
            match self.0.get(&keywords[0]) {
                Some(Some(papers)) => Ok(papers.iter().take(limit).cloned().collect()),
                Some(None) => Err(ClientError::status(503, "unavailable")),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Citation counts keyed by arXiv id.
    struct FakeCitations(HashMap<String, u64>);

    #[async_trait]
    impl CitationSource for FakeCitations {
        async fn lookup_batch(&self, ids: &[String]) -> ClientResult<Vec<Option<CitationData>>> {
            Ok(ids
                .iter()
                .map(|id| {
                    self.0.get(id).map(|&count| CitationData {
                        citation_count: count,
                        influential_citation_count: 0,
                        url: None,
                    })
                })
                .collect())
        }

        async fn lookup_one(&self, _id: &str) -> ClientResult<CitationData> {
            Err(ClientError::status(404, "not found"))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
    }

    fn paper(id: &str, title: &str, abstract_text: &str) -> PaperRecord {
        PaperRecord {
            title: title.to_string(),
            abstract_text: abstract_text.to_string(),
            published: "2024-06-14T09:00:00Z".to_string(),
            updated: "2024-06-14T09:00:00Z".to_string(),
            arxiv_id: Some(id.to_string()),
            abs_url: format!("http://arxiv.org/abs/{id}v1"),
            ..Default::default()
        }
    }

    fn pipeline(
        results: Vec<(&str, Option<Vec<PaperRecord>>)>,
        citations: &[(&str, u64)],
    ) -> DigestPipeline<FakeSource, FakeCitations> {
        let source = FakeSource(results.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
        let citations =
            FakeCitations(citations.iter().map(|&(id, n)| (id.to_string(), n)).collect());
        let config = PipelineConfig {
            lookback_days: 7,
            max_results: 50,
            categories: vec!["cs.CR".to_string()],
            topics: vec![
                Topic::new("Jailbreaking", &["jailbreak"]),
                Topic::new("Prompt Injection", &["prompt injection"]),
                Topic::new("Backdoors", &["backdoor attack"]),
            ],
        };
        let scorer = RelevanceScorer::new(&[
            WeightedPhrase::new("jailbreak", 10),
            WeightedPhrase::new("prompt injection", 10),
        ]);
        DigestPipeline::new(
            source,
            CitationEnricher::new(citations).with_pauses(Duration::ZERO, Duration::ZERO),
            scorer,
            config,
        )
    }

    #[tokio::test]
    async fn test_duplicate_title_across_topics_survives_once() {
        let pipeline = pipeline(
            vec![
                ("jailbreak", Some(vec![paper("2406.00001", "Jailbreak LLMs via X", "first")])),
                (
                    "prompt injection",
                    Some(vec![
                        paper("2406.00002", "JAILBREAK llms via x", "second"),
                        paper("2406.00003", "Prompt injection at scale", ""),
                    ]),
                ),
            ],
            &[],
        );

        let run = pipeline.run(&SeenSet::new(), now()).await;

        assert_eq!(run.total(), 2);
        assert_eq!(run.buckets[0].papers[0].abstract_text, "first");
        assert_eq!(run.buckets[1].papers.len(), 1);
        assert_eq!(run.buckets[1].papers[0].title, "Prompt injection at scale");
        assert_eq!(run.admitted.len(), 2);
        assert_eq!(run.reports[1].fetch, FetchOutcome::Fetched { count: 2 });
        assert_eq!(run.reports[1].admitted, 1);
    }

    #[tokio::test]
    async fn test_failed_topic_contributes_nothing() {
        let pipeline = pipeline(
            vec![
                ("jailbreak", None),
                ("prompt injection", Some(vec![paper("2406.00003", "Prompt injection", "")])),
            ],
            &[],
        );

        let run = pipeline.run(&SeenSet::new(), now()).await;

        assert_eq!(run.buckets.len(), 3);
        assert!(run.buckets[0].papers.is_empty());
        assert!(matches!(run.reports[0].fetch, FetchOutcome::Failed { .. }));
        assert_eq!(run.failed_topics(), 1);
        assert_eq!(run.total(), 1);
    }

    #[tokio::test]
    async fn test_previously_seen_and_stale_papers_are_dropped() {
        let mut stale = paper("2401.00009", "Old jailbreak", "");
        stale.published = "2024-01-01T00:00:00Z".to_string();
        stale.updated = "2024-01-02T00:00:00Z".to_string();
        let known = paper("2406.00004", "Known jailbreak", "");
        let seen: SeenSet = [Fingerprint::of(&known)].into_iter().collect();

        let pipeline = pipeline(
            vec![("jailbreak", Some(vec![stale, known, paper("2406.00005", "Fresh jailbreak", "")]))],
            &[],
        );
        let run = pipeline.run(&seen, now()).await;

        assert_eq!(run.total(), 1);
        assert_eq!(run.buckets[0].papers[0].title, "Fresh jailbreak");
    }

    #[tokio::test]
    async fn test_second_run_admits_nothing_already_emitted() {
        let results = || {
            vec![("jailbreak", Some(vec![paper("2406.00001", "Jailbreak LLMs via X", "")]))]
        };
        let mut seen = SeenSet::new();

        let first = pipeline(results(), &[]).run(&seen, now()).await;
        assert_eq!(first.total(), 1);
        seen.extend(first.admitted);

        let second = pipeline(results(), &[]).run(&seen, now()).await;
        assert_eq!(second.total(), 0);
        assert!(second.admitted.is_empty());
    }

    #[tokio::test]
    async fn test_topic_is_ranked_by_relevance_then_citations() {
        let pipeline = pipeline(
            vec![(
                "jailbreak",
                Some(vec![
                    paper("2406.00001", "A survey", "jailbreak mentioned once"),
                    paper("2406.00002", "Another survey", "jailbreak mentioned once"),
                    paper("2406.00003", "Jailbreak benchmark", ""),
                    paper("2406.00004", "Unrelated", ""),
                ]),
            )],
            &[("2406.00002", 40), ("2406.00004", 500)],
        );

        let run = pipeline.run(&SeenSet::new(), now()).await;

        let titles: Vec<&str> = run.buckets[0].papers.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Jailbreak benchmark", "Another survey", "A survey", "Unrelated"]);
        assert_eq!(run.buckets[0].papers[0].relevance_score, 30);
        assert_eq!(run.reports[0].enrichment.enriched(), 2);
        assert_eq!(run.top_cited(1)[0].title, "Unrelated");
    }
}
