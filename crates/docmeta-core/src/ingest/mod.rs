mod chunker;
mod merger;
mod normalizer;

pub use chunker::Chunker;
pub use merger::{merge_entities, ChunkEntities, MergedEntities};
pub use normalizer::{StopwordFilter, TextNormalizer};
