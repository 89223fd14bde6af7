mod cache;
mod client;
mod linker;

pub use cache::{LinkCache, ResolvedLink};
pub use client::{EntityRecord, KbError, KnowledgeBase, SearchCandidate, WikidataClient};
pub use linker::{EntityLinker, RateLimiter};
