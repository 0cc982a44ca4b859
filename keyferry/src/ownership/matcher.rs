use std::collections::HashMap;

use strsim::normalized_levenshtein;
use tracing::debug;

use super::normalize::{NoiseFilter, NormalizedTitle};
use crate::catalog::{CatalogEntry, CatalogSnapshot};
use crate::config::MatchConfig;
use crate::keys::KeyRecord;

/// How sure we are that a key's game is already owned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OwnershipVerdict {
    OwnedConfident,
    OwnedFuzzy(f64),
    NotOwned,
    /// No ownership data was available.
    Unknown,
}

impl OwnershipVerdict {
    /// Whether redeeming this key would most likely be wasted.
    pub fn blocks_redemption(&self, safe_threshold: f64) -> bool {
        match self {
            OwnershipVerdict::OwnedConfident => true,
            OwnershipVerdict::OwnedFuzzy(score) => *score >= safe_threshold,
            OwnershipVerdict::NotOwned | OwnershipVerdict::Unknown => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogMatch {
    pub app_id: u64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub key_id: String,
    pub verdict: OwnershipVerdict,
    pub score: f64,
    pub matched: Option<CatalogMatch>,
}

/// One result per key.
#[derive(Debug, Clone, Default)]
pub struct OwnershipMatches {
    results: HashMap<String, MatchResult>,
    has_ownership_data: bool,
}

impl OwnershipMatches {
    pub fn get(&self, key_id: &str) -> Option<&MatchResult> {
        self.results.get(key_id)
    }

    pub fn verdict(&self, key_id: &str) -> OwnershipVerdict {
        self.results
            .get(key_id)
            .map(|r| r.verdict)
            .unwrap_or(OwnershipVerdict::Unknown)
    }

    pub fn has_ownership_data(&self) -> bool {
        self.has_ownership_data
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatchResult> {
        self.results.values()
    }
}

struct PreparedEntry<'a> {
    entry: &'a CatalogEntry,
    title: NormalizedTitle,
    alternates: Vec<NormalizedTitle>,
}

/// Scores keys against the owned catalog. Pure and deterministic.
pub struct OwnershipMatcher {
    config: MatchConfig,
    filter: NoiseFilter,
}

impl OwnershipMatcher {
    pub fn new(config: MatchConfig) -> Self {
        let filter = NoiseFilter::new(&config.noise_phrases);
        Self { config, filter }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Similarity of two titles in `[0, 1]`.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        let a = NormalizedTitle::new(a, &self.filter);
        let b = NormalizedTitle::new(b, &self.filter);
        self.score(&a, &b)
    }

    fn score(&self, a: &NormalizedTitle, b: &NormalizedTitle) -> f64 {
        let base = if a.has_core() && b.has_core() {
            normalized_levenshtein(&a.core, &b.core)
        } else {
            normalized_levenshtein(&a.full, &b.full)
        };
        if a.noise != b.noise {
            base * (1.0 - self.config.edition_penalty)
        } else {
            base
        }
    }

    pub fn match_keys(&self, keys: &[KeyRecord], catalog: &CatalogSnapshot) -> OwnershipMatches {
        let Some(owned) = catalog.owned() else {
            let results = keys
                .iter()
                .map(|key| {
                    (
                        key.id.clone(),
                        MatchResult {
                            key_id: key.id.clone(),
                            verdict: OwnershipVerdict::Unknown,
                            score: 0.0,
                            matched: None,
                        },
                    )
                })
                .collect();
            return OwnershipMatches {
                results,
                has_ownership_data: false,
            };
        };

        let prepared: Vec<PreparedEntry<'_>> = owned
            .entries
            .iter()
            .map(|entry| PreparedEntry {
                entry,
                title: NormalizedTitle::new(&entry.title, &self.filter),
                alternates: entry
                    .alternates
                    .iter()
                    .map(|alt| NormalizedTitle::new(alt, &self.filter))
                    .collect(),
            })
            .collect();

        let mut results = HashMap::with_capacity(keys.len());
        for key in keys {
            let result = self.match_one(key, &owned.owned_apps, &prepared);
            debug!(
                key = %key.id,
                title = %key.title,
                verdict = ?result.verdict,
                score = result.score,
                "Ownership match"
            );
            results.insert(key.id.clone(), result);
        }

        OwnershipMatches {
            results,
            has_ownership_data: true,
        }
    }

    fn match_one(
        &self,
        key: &KeyRecord,
        owned_apps: &std::collections::HashSet<u64>,
        prepared: &[PreparedEntry<'_>],
    ) -> MatchResult {
        if let Some(app_id) = key.target_app_id.filter(|id| owned_apps.contains(id)) {
            let title = prepared
                .iter()
                .find(|p| p.entry.id == app_id)
                .map(|p| p.entry.title.clone())
                .unwrap_or_default();
            return MatchResult {
                key_id: key.id.clone(),
                verdict: OwnershipVerdict::OwnedConfident,
                score: 1.0,
                matched: Some(CatalogMatch { app_id, title }),
            };
        }

        let wanted = NormalizedTitle::new(&key.title, &self.filter);
        let alternate_weight = 1.0 - self.config.edition_penalty;

        let mut best: Option<(f64, &CatalogEntry)> = None;
        for candidate in prepared {
            let mut score = self.score(&wanted, &candidate.title);
            for alt in &candidate.alternates {
                score = score.max(self.score(&wanted, alt) * alternate_weight);
            }
            if best.is_none_or(|(top, _)| score > top) {
                best = Some((score, candidate.entry));
            }
        }

        let (score, matched) = match best {
            Some((score, entry)) => (
                score,
                Some(CatalogMatch {
                    app_id: entry.id,
                    title: entry.title.clone(),
                }),
            ),
            None => (0.0, None),
        };

        let verdict = if score >= self.config.confident_threshold {
            OwnershipVerdict::OwnedConfident
        } else if score >= self.config.fuzzy_threshold {
            OwnershipVerdict::OwnedFuzzy(score)
        } else {
            OwnershipVerdict::NotOwned
        };

        MatchResult {
            key_id: key.id.clone(),
            verdict,
            score,
            matched: matched.filter(|_| verdict != OwnershipVerdict::NotOwned),
        }
    }
}
