use serde::{Deserialize, Serialize};

use crate::layers::PaperRecord;

pub const MAX_SCORE: u32 = 100;
const TITLE_MULTIPLIER: u32 = 3;
const ABSTRACT_MULTIPLIER: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WeightedPhrase {
    pub phrase: String,
    pub weight: u32,
}

impl WeightedPhrase {
    pub fn new(phrase: impl Into<String>, weight: u32) -> Self {
        Self { phrase: phrase.into(), weight }
    }
}

/// Keyword-weighted relevance in `0..=100`.
///
/// Each phrase is matched case-insensitively as a substring. A hit in the
/// title is worth three times the phrase weight, a hit in the abstract one
/// times; both count when the phrase appears in both.
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    table: Vec<(String, u32)>,
}

impl RelevanceScorer {
    pub fn new(table: &[WeightedPhrase]) -> Self {
        Self {
            table: table
                .iter()
                .filter(|p| !p.phrase.is_empty())
                .map(|p| (p.phrase.to_lowercase(), p.weight))
                .collect(),
        }
    }

    pub fn score(&self, paper: &PaperRecord) -> u32 {
        let title = paper.title.to_lowercase();
        let abstract_text = paper.abstract_text.to_lowercase();

        let total = self.table.iter().fold(0u32, |acc, (phrase, weight)| {
            let mut hit = 0u32;
            if title.contains(phrase.as_str()) {
                hit = hit.saturating_add(weight.saturating_mul(TITLE_MULTIPLIER));
            }
            if abstract_text.contains(phrase.as_str()) {
                hit = hit.saturating_add(weight.saturating_mul(ABSTRACT_MULTIPLIER));
            }
            acc.saturating_add(hit)
        });

        total.min(MAX_SCORE)
    }

    /// Overwrites every record's score from its current title and abstract.
    pub fn score_all(&self, papers: &mut [PaperRecord]) {
        for paper in papers.iter_mut() {
            paper.relevance_score = self.score(paper);
        }
    }
}
