use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 3000,
            overlap_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key: String::new(),
            model: "gpt-4o-mini".into(),
            temperature: 0.3,
            max_tokens: 1000,
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikidataConfig {
    pub api_url: String,
    pub sparql_url: String,
    pub primary_language: String,
    pub fallback_language: String,
    pub search_timeout_seconds: u64,
    pub verify_timeout_seconds: u64,
    /// Inter-call delay for type-verification queries, per API etiquette.
    pub verify_delay_ms: u64,
    pub user_agent: String,
}

impl Default for WikidataConfig {
    fn default() -> Self {
        Self {
            api_url: "https://www.wikidata.org/w/api.php".into(),
            sparql_url: "https://query.wikidata.org/sparql".into(),
            primary_language: "ru".into(),
            fallback_language: "en".into(),
            search_timeout_seconds: 10,
            verify_timeout_seconds: 15,
            verify_delay_ms: 500,
            user_agent: "docmeta/0.1 (https://github.com/monokrome/docmeta)".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_path: String,
    /// Cache directory for downloaded corpora (stopword lists).
    pub data_dir: PathBuf,
    pub chunk: ChunkConfig,
    pub llm: LlmConfig,
    pub wikidata: WikidataConfig,
    /// Knowledge entities older than this are refreshed on next use.
    pub entity_freshness_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docmeta");

        Self {
            database_path: "docmeta.db".into(),
            data_dir,
            chunk: ChunkConfig::default(),
            llm: LlmConfig::default(),
            wikidata: WikidataConfig::default(),
            entity_freshness_days: 30,
        }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            database_path: env_string("DOCMETA_DATABASE", &defaults.database_path),
            data_dir: std::env::var("DOCMETA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            chunk: ChunkConfig {
                max_chars: env_or("DOCMETA_CHUNK_SIZE", defaults.chunk.max_chars),
                overlap_chars: env_or("DOCMETA_CHUNK_OVERLAP", defaults.chunk.overlap_chars),
            },
            llm: LlmConfig {
                base_url: env_string("DOCMETA_LLM_BASE_URL", &defaults.llm.base_url),
                api_key: env_string("DOCMETA_LLM_API_KEY", ""),
                model: env_string("DOCMETA_LLM_MODEL", &defaults.llm.model),
                temperature: env_or("DOCMETA_LLM_TEMPERATURE", defaults.llm.temperature),
                max_tokens: env_or("DOCMETA_LLM_MAX_TOKENS", defaults.llm.max_tokens),
                request_timeout_seconds: env_or(
                    "DOCMETA_LLM_TIMEOUT",
                    defaults.llm.request_timeout_seconds,
                ),
            },
            wikidata: WikidataConfig {
                api_url: env_string("DOCMETA_WIKIDATA_API_URL", &defaults.wikidata.api_url),
                sparql_url: env_string("DOCMETA_WIKIDATA_SPARQL_URL", &defaults.wikidata.sparql_url),
                primary_language: env_string(
                    "DOCMETA_PRIMARY_LANGUAGE",
                    &defaults.wikidata.primary_language,
                ),
                fallback_language: env_string(
                    "DOCMETA_FALLBACK_LANGUAGE",
                    &defaults.wikidata.fallback_language,
                ),
                search_timeout_seconds: env_or(
                    "DOCMETA_WIKIDATA_SEARCH_TIMEOUT",
                    defaults.wikidata.search_timeout_seconds,
                ),
                verify_timeout_seconds: env_or(
                    "DOCMETA_WIKIDATA_VERIFY_TIMEOUT",
                    defaults.wikidata.verify_timeout_seconds,
                ),
                verify_delay_ms: env_or(
                    "DOCMETA_WIKIDATA_VERIFY_DELAY_MS",
                    defaults.wikidata.verify_delay_ms,
                ),
                user_agent: env_string("DOCMETA_USER_AGENT", &defaults.wikidata.user_agent),
            },
            entity_freshness_days: env_or(
                "DOCMETA_ENTITY_FRESHNESS_DAYS",
                defaults.entity_freshness_days,
            ),
        }
    }
}
