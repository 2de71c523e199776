/*!
 * Page Replacer
 * Score-driven eviction: importance, recency, and access frequency
 */

use super::types::ContextPage;
use crate::core::config::EvictionWeights;
use crate::core::types::{PageId, Pid, Tokens};
use std::time::Duration;

/// A scored eviction candidate
#[derive(Debug, Clone)]
pub(super) struct Candidate {
    pub pid: Pid,
    pub id: PageId,
    pub tokens: Tokens,
    pub score: f64,
    pub last_access_micros: u64,
}

/// Eviction policy
///
/// Scores pages and picks a minimal set of victims. Decides only; residency
/// changes go through the page table API.
#[derive(Debug, Clone)]
pub(super) struct PageReplacer {
    weights: EvictionWeights,
    half_life: Duration,
}

impl PageReplacer {
    pub fn new(weights: EvictionWeights, half_life: Duration) -> Self {
        Self { weights, half_life }
    }

    /// Eviction score; lower means evicted sooner.
    ///
    /// `score = (1 - importance) * w_i + recency_penalty * w_r
    ///        + 1 / (1 + access_count) * w_f`
    ///
    /// where `recency_penalty = 1 - 2^(-age / half_life)` grows from 0 toward
    /// 1 as the page goes unaccessed.
    pub fn score(&self, page: &ContextPage, now_micros: u64) -> f64 {
        let age_secs = now_micros.saturating_sub(page.last_access_micros) as f64 / 1e6;
        let half_life = self.half_life.as_secs_f64();
        let recency_penalty = if half_life > 0.0 {
            1.0 - (-age_secs / half_life).exp2()
        } else {
            1.0
        };

        (1.0 - page.importance) * self.weights.importance
            + recency_penalty * self.weights.recency
            + (1.0 / (1.0 + page.access_count as f64)) * self.weights.frequency
    }

    pub fn candidate(&self, page: &ContextPage, now_micros: u64) -> Candidate {
        Candidate {
            pid: page.owner,
            id: page.id,
            tokens: page.token_count,
            score: self.score(page, now_micros),
            last_access_micros: page.last_access_micros,
        }
    }

    /// Greedy ascending-score sweep: victims in score order (oldest access
    /// first on ties) until the freed total covers `needed`. Returns None if
    /// even the full candidate set cannot cover it.
    pub fn select_victims(mut candidates: Vec<Candidate>, needed: Tokens) -> Option<Vec<Candidate>> {
        if candidates.iter().map(|c| c.tokens).sum::<Tokens>() < needed {
            return None;
        }

        candidates.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.last_access_micros.cmp(&b.last_access_micros))
        });

        let mut freed = 0;
        let mut victims = Vec::new();
        for candidate in candidates {
            if freed >= needed {
                break;
            }
            freed += candidate.tokens;
            victims.push(candidate);
        }
        Some(victims)
    }
}
