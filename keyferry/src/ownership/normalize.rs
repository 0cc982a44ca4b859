//! Title folding and edition-noise removal.

use std::collections::BTreeSet;

/// Phrases that name an edition, platform, or packaging rather than a game.
pub const DEFAULT_NOISE_PHRASES: &[&str] = &[
    "game of the year",
    "goty",
    "edition",
    "deluxe",
    "definitive",
    "complete",
    "ultimate",
    "gold",
    "premium",
    "enhanced",
    "anniversary",
    "collectors",
    "directors cut",
    "standard",
    "special",
    "digital",
    "steam",
    "pc",
    "windows",
    "mac",
    "linux",
    "key",
];

/// Lower-case, drop trademark marks and apostrophes, turn every other
/// non-alphanumeric run into a single space.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.chars() {
        match ch {
            '\u{2122}' | '\u{00ae}' | '\u{00a9}' | '\'' | '\u{2019}' => {}
            c if c.is_alphanumeric() => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.extend(c.to_lowercase());
            }
            _ => pending_space = true,
        }
    }
    out
}

pub fn tokens(text: &str) -> Vec<String> {
    fold(text).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

/// Splits token streams into core tokens and recognised noise phrases.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    phrases: Vec<Vec<String>>,
}

impl NoiseFilter {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Self {
        let mut phrases: Vec<Vec<String>> = phrases
            .iter()
            .map(|p| tokens(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        // Longest phrase first so "game of the year" beats "game".
        phrases.sort_by(|a, b| b.len().cmp(&a.len()));
        Self { phrases }
    }

    pub fn split(&self, tokens: &[String]) -> (Vec<String>, Vec<String>) {
        let mut core = Vec::new();
        let mut noise = Vec::new();
        let mut i = 0;
        'outer: while i < tokens.len() {
            for phrase in &self.phrases {
                if tokens[i..].starts_with(phrase) {
                    noise.push(phrase.join(" "));
                    i += phrase.len();
                    continue 'outer;
                }
            }
            core.push(tokens[i].clone());
            i += 1;
        }
        (core, noise)
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_PHRASES)
    }
}

/// A title reduced to comparable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTitle {
    /// Sorted core tokens, space-joined.
    pub core: String,
    /// Sorted tokens of the whole folded title.
    pub full: String,
    pub noise: BTreeSet<String>,
}

impl NormalizedTitle {
    pub fn new(title: &str, filter: &NoiseFilter) -> Self {
        let all = tokens(title);
        let (mut core, noise) = filter.split(&all);
        core.sort();
        let mut full = all;
        full.sort();
        Self {
            core: core.join(" "),
            full: full.join(" "),
            noise: noise.into_iter().collect(),
        }
    }

    pub fn has_core(&self) -> bool {
        !self.core.is_empty()
    }
}
