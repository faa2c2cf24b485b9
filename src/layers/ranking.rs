use std::cmp::Reverse;

use crate::layers::relevance::RelevanceScorer;
use crate::layers::PaperRecord;

pub struct Ranker;

impl Ranker {
    /// Rescores every record, then orders it for presentation.
    pub fn rank(scorer: &RelevanceScorer, mut papers: Vec<PaperRecord>) -> Vec<PaperRecord> {
        scorer.score_all(&mut papers);
        Self::sort_by_rank(papers)
    }

    /// Stable sort by (relevance, influential citations, citations), all descending.
    /// Ties keep their input order, which is the source's recency order.
    pub fn sort_by_rank(mut papers: Vec<PaperRecord>) -> Vec<PaperRecord> {
        papers.sort_by_key(|p| {
            Reverse((p.relevance_score, p.influential_citation_count, p.citation_count))
        });
        papers
    }
}
