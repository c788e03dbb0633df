//! Random `word.word@domain` alias generation.

use super::{AliasApi, RemoteError};
use anyhow::{anyhow, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::Path;
use tracing::info;

/// Re-draws of the second word while it equals the first
const MAX_REDRAWS: usize = 10;

const BUILTIN_WORDS: &[&str] = &[
    "amber", "anchor", "apple", "arrow", "aspen", "atlas", "badger", "basil", "beacon", "birch",
    "bison", "blue", "breeze", "brook", "cactus", "cedar", "cherry", "cinder", "clover", "cobalt",
    "comet", "coral", "cosmos", "crane", "delta", "dune", "ember", "falcon", "fern", "fjord",
    "flint", "forest", "fox", "galaxy", "garnet", "glacier", "granite", "harbor", "hazel",
    "heron", "indigo", "iris", "island", "jade", "juniper", "kestrel", "lagoon", "lark", "lemon",
    "lily", "lotus", "lunar", "maple", "marble", "meadow", "mint", "nebula", "nova", "oak",
    "ocean", "olive", "onyx", "orbit", "otter", "pebble", "pine", "plum", "prairie", "quartz",
    "raven", "reef", "river", "robin", "sage", "sierra", "silver", "spruce", "storm", "summit",
    "tango", "thistle", "tiger", "tulip", "tundra", "velvet", "violet", "willow", "wren",
    "zephyr",
];

/// Keeps only `[a-z0-9]`; the alias API rejects anything else in a word.
pub fn normalize_word(word: &str) -> String {
    word.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Word list used to build alias handles.
#[derive(Clone, Debug)]
pub struct AliasGenerator {
    words: Vec<String>,
}

impl AliasGenerator {
    /// Build from raw words; needs at least two that survive normalization.
    pub fn from_words<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let words: Vec<String> = words
            .into_iter()
            .map(|w| normalize_word(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();

        if words.len() < 2 {
            return Err(anyhow!("Dictionary needs at least 2 valid words."));
        }

        Ok(Self { words })
    }

    pub fn builtin() -> Self {
        Self {
            words: BUILTIN_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Load a JSON array of strings.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dictionary {}", path.display()))?;
        let words: Vec<String> = serde_json::from_str(&contents)
            .context("Dictionary must be a JSON array of strings.")?;
        let generator = Self::from_words(words)?;
        info!(path = %path.display(), words = generator.len(), "Dictionary loaded");
        Ok(generator)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// `word1.word2`, with the second word re-drawn a few times to differ.
    pub fn random_handle<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
        // from_words guarantees at least two words
        let first = self.words.choose(rng).map(String::as_str).unwrap_or("alias");
        let mut second = self.words.choose(rng).map(String::as_str).unwrap_or("mail");

        let mut guard = 0;
        while second == first && guard < MAX_REDRAWS {
            second = self.words.choose(rng).map(String::as_str).unwrap_or("mail");
            guard += 1;
        }

        format!("{}.{}", first, second)
    }

    /// Creates a random alias on a random available domain.
    ///
    /// Returns the address the server reports, or `handle@domain`.
    pub async fn generate(&self, api: &dyn AliasApi, api_key: &str) -> Result<String, RemoteError> {
        let domains = api.get_domains().await?;

        let (handle, domain) = {
            let mut rng = rand::thread_rng();
            let domain = domains.choose(&mut rng).cloned().ok_or_else(|| {
                RemoteError::InvalidResponse("No domains available from /domains.".to_string())
            })?;
            (self.random_handle(&mut rng), domain)
        };

        let created = api.create_alias(api_key, &handle, &domain).await?;
        Ok(created
            .reported_address()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}@{}", handle, domain)))
    }
}

impl Default for AliasGenerator {
    fn default() -> Self {
        Self::builtin()
    }
}
