use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PaperRecord {
    pub title: String,
    pub abstract_text: String,
    pub authors: Vec<String>,
    /// Raw timestamps as delivered by the feed; parsed lazily so a bad value
    /// only disqualifies itself.
    pub published: String,
    pub updated: String,
    /// New-style arXiv identifier without version suffix, e.g. `2401.01234`.
    pub arxiv_id: Option<String>,
    pub abs_url: String,
    pub pdf_url: Option<String>,
    pub categories: Vec<String>,
    pub citation_count: u64,
    pub influential_citation_count: u64,
    pub citation_url: Option<String>,
    pub relevance_score: u32,
}

impl PaperRecord {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.published)
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.updated)
    }

    /// Replaces all citation fields at once.
    pub fn apply_citations(&mut self, data: CitationData) {
        self.citation_count = data.citation_count;
        self.influential_citation_count = data.influential_citation_count;
        self.citation_url = data.url;
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationData {
    pub citation_count: u64,
    pub influential_citation_count: u64,
    pub url: Option<String>,
}

/// One topic's new papers for this run, already scored and ranked.
#[derive(Debug, Clone, Serialize)]
pub struct TopicBucket {
    pub topic: String,
    pub papers: Vec<PaperRecord>,
}

pub mod citations;
pub mod discovery;
pub mod feed;
pub mod ledger;
pub mod newsletter;
pub mod ranking;
pub mod relevance;
pub mod site;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_parse_with_zulu_and_offset() {
        let paper = PaperRecord {
            published: "2024-03-01T12:00:00Z".to_string(),
            updated: "2024-03-02T12:00:00+02:00".to_string(),
            ..Default::default()
        };
        assert_eq!(paper.published_at().unwrap().to_rfc3339(), "2024-03-01T12:00:00+00:00");
        assert_eq!(paper.updated_at().unwrap().to_rfc3339(), "2024-03-02T10:00:00+00:00");
    }

    #[test]
    fn test_bad_timestamp_is_none() {
        let paper = PaperRecord {
            published: "yesterday".to_string(),
            updated: String::new(),
            ..Default::default()
        };
        assert!(paper.published_at().is_none());
        assert!(paper.updated_at().is_none());
    }

    #[test]
    fn test_apply_citations_replaces_all_fields() {
        let mut paper = PaperRecord {
            citation_count: 3,
            citation_url: Some("old".to_string()),
            ..Default::default()
        };
        paper.apply_citations(CitationData {
            citation_count: 12,
            influential_citation_count: 2,
            url: None,
        });
        assert_eq!(paper.citation_count, 12);
        assert_eq!(paper.influential_citation_count, 2);
        assert!(paper.citation_url.is_none());
    }
}
