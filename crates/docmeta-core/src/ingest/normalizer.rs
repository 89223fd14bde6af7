use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

/// Whitespace cleanup ahead of chunking. Best-effort: cleaning must never
/// lose a document, so the API is infallible by construction.
pub struct TextNormalizer {
    newline_runs: Regex,
    space_runs: Regex,
}

impl TextNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            // Both patterns are literals known to compile.
            newline_runs: Regex::new(r"\n+").expect("static pattern"),
            space_runs: Regex::new(r"[ \t\r\f]+").expect("static pattern"),
        }
    }

    /// Collapse newline runs to one newline, whitespace runs to one space,
    /// and trim the ends.
    #[must_use]
    pub fn clean(&self, text: &str) -> String {
        let collapsed = self.newline_runs.replace_all(text, "\n");
        let collapsed = self.space_runs.replace_all(&collapsed, " ");
        collapsed.trim().to_string()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Languages whose stopword lists are combined. Two languages minimum.
const STOPWORD_LANGUAGES: &[&str] = &["ru", "en"];

const STOPWORD_LIST_URL: &str =
    "https://raw.githubusercontent.com/stopwords-iso/stopwords-{lang}/master/stopwords-{lang}.txt";

/// Multilingual stopword removal to shrink token counts before the model
/// calls. The corpus is fetched once and cached under the data directory;
/// a failed initialization is fatal for this step only.
pub struct StopwordFilter {
    words: HashSet<String>,
}

impl StopwordFilter {
    /// Load the combined stopword set, downloading any missing language list
    /// into `<data_dir>/stopwords/`.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("stopwords");
        tokio::fs::create_dir_all(&dir).await?;

        let mut words = HashSet::new();
        for lang in STOPWORD_LANGUAGES {
            let list = load_language(&dir, lang).await?;
            words.extend(list);
        }

        tracing::info!(words = words.len(), "stopword corpus ready");
        Ok(Self { words })
    }

    /// Build a filter from an explicit word list (tests, embedded corpora).
    #[must_use]
    pub fn from_words<I: IntoIterator<Item = String>>(words: I) -> Self {
        Self {
            words: words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Drop tokens whose lowercase form is a stopword, rejoining the rest
    /// with single spaces.
    #[must_use]
    pub fn remove_stopwords(&self, text: &str) -> String {
        text.split_whitespace()
            .filter(|word| !self.words.contains(&word.to_lowercase()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

async fn load_language(dir: &Path, lang: &str) -> Result<HashSet<String>> {
    let cached = cache_path(dir, lang);

    let body = if cached.exists() {
        tokio::fs::read_to_string(&cached).await?
    } else {
        let url = STOPWORD_LIST_URL.replace("{lang}", lang);
        tracing::info!(lang, url, "downloading stopword list");

        let response = reqwest::get(&url)
            .await
            .map_err(|e| Error::BackendUnavailable(format!("stopword download: {e}")))?
            .error_for_status()
            .map_err(|e| Error::BackendUnavailable(format!("stopword download: {e}")))?;

        let body = response
            .text()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("stopword download: {e}")))?;

        tokio::fs::write(&cached, &body).await?;
        body
    };

    Ok(body
        .lines()
        .map(|line| line.trim().to_lowercase())
        .filter(|line| !line.is_empty())
        .collect())
}

fn cache_path(dir: &Path, lang: &str) -> PathBuf {
    dir.join(format!("{lang}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_collapses_whitespace() {
        let normalizer = TextNormalizer::new();
        let cleaned = normalizer.clean("  a\n\n\nb\t\tc   d  ");
        assert_eq!(cleaned, "a\nb c d");
    }

    #[test]
    fn test_clean_is_idempotent() {
        let normalizer = TextNormalizer::new();
        let once = normalizer.clean("x \n\n y");
        assert_eq!(normalizer.clean(&once), once);
    }

    #[test]
    fn test_clean_empty() {
        let normalizer = TextNormalizer::new();
        assert_eq!(normalizer.clean("   "), "");
    }

    #[test]
    fn test_remove_stopwords_bilingual() {
        let filter = StopwordFilter::from_words(
            ["the", "and", "и", "в"].iter().map(|s| (*s).to_string()),
        );

        assert_eq!(
            filter.remove_stopwords("the report and analysis"),
            "report analysis"
        );
        assert_eq!(
            filter.remove_stopwords("отчёт и анализ в системе"),
            "отчёт анализ системе"
        );
    }

    #[test]
    fn test_remove_stopwords_is_case_insensitive() {
        let filter = StopwordFilter::from_words(vec!["the".to_string()]);
        assert_eq!(filter.remove_stopwords("The THE the report"), "report");
    }

    #[tokio::test]
    async fn test_load_uses_cached_lists() {
        let dir = tempfile::tempdir().unwrap();
        let stopword_dir = dir.path().join("stopwords");
        std::fs::create_dir_all(&stopword_dir).unwrap();
        std::fs::write(stopword_dir.join("ru.txt"), "и\nв\n").unwrap();
        std::fs::write(stopword_dir.join("en.txt"), "the\nand\n").unwrap();

        let filter = StopwordFilter::load(dir.path()).await.unwrap();
        assert_eq!(filter.len(), 4);
        assert_eq!(filter.remove_stopwords("the и report"), "report");
    }
}
