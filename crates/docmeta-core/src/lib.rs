pub mod config;
pub mod document;
pub mod entity;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod metadata;
pub mod pipeline;
pub mod storage;
pub mod wikidata;

pub use config::{ChunkConfig, Config, LlmConfig, WikidataConfig};
pub use document::{Document, DocumentFormat, ProcessingStatus};
pub use entity::{EntityRelation, EntityType, KnowledgeEntity, PropertyClaim};
pub use error::{Error, Result};
pub use ingest::{merge_entities, ChunkEntities, Chunker, MergedEntities, StopwordFilter, TextNormalizer};
pub use llm::{ChatClient, ExtractionClient};
pub use loader::{load_document, DocumentPage, LoadError};
pub use metadata::{DocumentMetadata, EntityLinks, FieldValue, LinkedItem, MetadataField};
pub use pipeline::Pipeline;
pub use storage::Storage;
pub use wikidata::{EntityLinker, KnowledgeBase, LinkCache, RateLimiter, ResolvedLink, WikidataClient};
