use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Config;
use crate::document::{Document, ProcessingStatus};
use crate::entity::{EntityRelation, EntityType, KnowledgeEntity};
use crate::error::{Error, Result};
use crate::ingest::{merge_entities, ChunkEntities, Chunker, StopwordFilter, TextNormalizer};
use crate::llm::{ChatBackend, ChatClient, ExtractionClient};
use crate::loader;
use crate::metadata::{DocumentMetadata, EntityLinks, FieldValue, LinkedItem, MetadataField};
use crate::storage::Storage;
use crate::wikidata::{EntityLinker, KnowledgeBase, RateLimiter, WikidataClient};

/// Sequences the extraction and enrichment pipelines over one document at a
/// time. Designed to be driven by an external scheduler that owns retry
/// policy: each entry point marks the document `processing`, then `success`
/// or `failed` with a recorded reason, and returns a definite outcome —
/// never retrying internally.
pub struct Pipeline {
    storage: Arc<Storage>,
    config: Config,
    normalizer: TextNormalizer,
    chunker: Chunker,
    extraction: ExtractionClient,
    linker: EntityLinker,
    stopwords: Option<StopwordFilter>,
}

impl Pipeline {
    /// Wire up the production backends from configuration.
    pub fn new(storage: Arc<Storage>, config: Config) -> Result<Self> {
        let chat = ChatClient::new(&config.llm)
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;
        let kb = WikidataClient::new(&config.wikidata)
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        Ok(Self::with_backends(
            storage,
            config,
            Box::new(chat),
            Box::new(kb),
        ))
    }

    /// Wire up explicit backends (tests, alternative providers).
    #[must_use]
    pub fn with_backends(
        storage: Arc<Storage>,
        config: Config,
        chat: Box<dyn ChatBackend>,
        kb: Box<dyn KnowledgeBase>,
    ) -> Self {
        let chunker = Chunker::new(config.chunk.max_chars, config.chunk.overlap_chars);
        let limiter = RateLimiter::new(Duration::from_millis(config.wikidata.verify_delay_ms));
        let linker = EntityLinker::new(
            kb,
            config.wikidata.primary_language.clone(),
            config.wikidata.fallback_language.clone(),
        )
        .with_rate_limiter(limiter);

        Self {
            storage,
            config,
            normalizer: TextNormalizer::new(),
            chunker,
            extraction: ExtractionClient::new(chat),
            linker,
            stopwords: None,
        }
    }

    /// Extraction pipeline: load → normalize → chunk → extract per chunk →
    /// merge → finalize. `Ok(true)` when finalized metadata was written,
    /// `Ok(false)` when the stage failed and the failure was recorded on the
    /// document. `Err` is reserved for infrastructure faults the scheduler
    /// should surface rather than record.
    pub async fn run_extraction(&mut self, document_id: Uuid) -> Result<bool> {
        let document = self.storage.get_document(document_id).await?;
        tracing::info!(document = %document.name, "extraction pipeline started");

        self.storage
            .update_document_status(document_id, ProcessingStatus::Processing, None)
            .await?;

        match self.extract_metadata(&document).await {
            Ok(metadata) => {
                self.storage
                    .update_document_metadata(document_id, &metadata, &document.entity_links)
                    .await?;
                self.storage
                    .update_document_status(document_id, ProcessingStatus::Success, None)
                    .await?;
                tracing::info!(document = %document.name, "extraction pipeline succeeded");
                Ok(true)
            }
            Err(e) => {
                tracing::error!(document = %document.name, error = %e, "extraction pipeline failed");
                self.storage
                    .update_document_status(
                        document_id,
                        ProcessingStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                Ok(false)
            }
        }
    }

    async fn extract_metadata(&mut self, document: &Document) -> Result<DocumentMetadata> {
        let pages = loader::load_document(Path::new(&document.file_path)).await?;
        let full_text = loader::combine_pages(&pages);
        tracing::info!(chars = full_text.len(), "document text loaded");

        let cleaned = self.normalizer.clean(&full_text);
        let reduced = self.stopword_filter().await?.remove_stopwords(&cleaned);
        tracing::info!(
            before = cleaned.len(),
            after = reduced.len(),
            "text normalized"
        );

        let chunks = self.chunker.split(&reduced);
        if chunks.is_empty() {
            return Err(Error::ExtractionFailed(
                "document produced no text chunks".into(),
            ));
        }

        // Chunk calls run sequentially, in document order; a failed chunk
        // contributes nothing but never aborts the document.
        let mut results: Vec<ChunkEntities> = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            match self.extraction.extract_chunk(chunk).await {
                Some(entities) => results.push(entities),
                None => {
                    tracing::warn!(chunk = index + 1, total = chunks.len(), "chunk yielded no entities");
                }
            }
        }

        if results.is_empty() {
            return Err(Error::ExtractionFailed(
                "every chunk failed entity extraction".into(),
            ));
        }

        let merged = merge_entities(&results);
        self.extraction.finalize(&merged).await
    }

    async fn stopword_filter(&mut self) -> Result<&StopwordFilter> {
        if self.stopwords.is_none() {
            let filter = StopwordFilter::load(&self.config.data_dir).await?;
            self.stopwords = Some(filter);
        }
        Ok(self.stopwords.as_ref().expect("just initialized"))
    }

    /// Enrichment pipeline: link every eligible metadata value to the
    /// knowledge base, then commit the annotated metadata, the link mirror
    /// and the relation rows. Individual lookup failures degrade to
    /// unlinked values; only missing metadata or storage faults fail the run.
    pub async fn run_enrichment(&mut self, document_id: Uuid) -> Result<bool> {
        let document = self.storage.get_document(document_id).await?;
        tracing::info!(document = %document.name, "enrichment pipeline started");

        self.storage
            .update_document_status(document_id, ProcessingStatus::Processing, None)
            .await?;

        if document.metadata.is_empty() && document.entity_links.is_empty() {
            self.storage
                .update_document_status(
                    document_id,
                    ProcessingStatus::Failed,
                    Some("no metadata to enrich"),
                )
                .await?;
            return Ok(false);
        }

        // One connectivity probe decides whether this batch goes remote or
        // serves cache-only.
        self.linker.self_test().await;

        let outcome = self.enrich_document(&document).await;

        match outcome {
            Ok(new_links) => {
                self.storage
                    .update_document_status(document_id, ProcessingStatus::Success, None)
                    .await?;
                tracing::info!(
                    document = %document.name,
                    new_links,
                    "enrichment pipeline succeeded"
                );
                Ok(true)
            }
            Err(e) => {
                tracing::error!(document = %document.name, error = %e, "enrichment pipeline failed");
                self.storage
                    .update_document_status(
                        document_id,
                        ProcessingStatus::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                Ok(false)
            }
        }
    }

    async fn enrich_document(&mut self, document: &Document) -> Result<usize> {
        let mut enriched = DocumentMetadata::new();
        let mut links = document.entity_links.clone();
        let mut pending: Vec<(KnowledgeEntity, EntityRelation)> = Vec::new();
        let mut new_links = 0usize;

        for (field, value) in document.metadata.iter() {
            let entity_type = EntityType::for_field(field);

            let enriched_value = match value {
                FieldValue::List(_) | FieldValue::Linked(_) => {
                    let mut items = Vec::new();
                    for name in value.names() {
                        let item = self
                            .link_value(document, field, name, entity_type, &mut links, &mut pending, &mut new_links)
                            .await;
                        items.push(item);
                    }
                    FieldValue::Linked(items)
                }
                FieldValue::Scalar(_) | FieldValue::LinkedScalar(_) => {
                    match value.names().first().copied() {
                        Some(name) => {
                            let item = self
                                .link_value(document, field, name, entity_type, &mut links, &mut pending, &mut new_links)
                                .await;
                            FieldValue::LinkedScalar(item)
                        }
                        None => value.clone(),
                    }
                }
            };

            enriched.set(field, enriched_value);
        }

        // All-or-nothing commit: annotated metadata and the link mirror in
        // one write, then the idempotent relation upserts.
        self.storage
            .update_document_metadata(document.id, &enriched, &links)
            .await?;

        for (entity, relation) in pending {
            self.storage.link_entity(&entity, &relation).await?;
        }

        Ok(new_links)
    }

    #[allow(clippy::too_many_arguments)]
    async fn link_value(
        &mut self,
        document: &Document,
        field: MetadataField,
        name: &str,
        entity_type: Option<EntityType>,
        links: &mut EntityLinks,
        pending: &mut Vec<(KnowledgeEntity, EntityRelation)>,
        new_links: &mut usize,
    ) -> LinkedItem {
        // The document-scoped link mirror wins over a fresh lookup: it gives
        // cross-run stability and covers manual links.
        let (qid, confidence) = if let Some(known) = links.get(field, name) {
            (known.to_string(), 1.0)
        } else {
            match self.linker.link(name, entity_type).await {
                Some(resolved) => {
                    links.insert(field, name.to_string(), resolved.qid.clone());
                    *new_links += 1;
                    (resolved.qid, resolved.confidence)
                }
                None => return LinkedItem::unlinked(name.to_string()),
            }
        };

        match self.ensure_entity(&qid, name).await {
            Ok(entity) => {
                let relation = EntityRelation::new(
                    document.id,
                    qid.clone(),
                    field,
                    name.to_string(),
                )
                .with_confidence(confidence)
                .with_context(format!("From metadata field: {field}"));
                pending.push((entity, relation));
                LinkedItem::new(name.to_string(), Some(qid))
            }
            Err(e) => {
                tracing::warn!(qid, error = %e, "could not persist knowledge entity");
                LinkedItem::new(name.to_string(), Some(qid))
            }
        }
    }

    /// Get-or-create the knowledge entity, refreshing labels, descriptions
    /// and claims when missing or older than the freshness window.
    async fn ensure_entity(&mut self, qid: &str, name: &str) -> Result<KnowledgeEntity> {
        let existing = self.storage.get_entity(qid).await?;

        if let Some(entity) = &existing {
            if !entity.is_stale(self.config.entity_freshness_days) {
                return Ok(entity.clone());
            }
        }

        let mut entity = existing.unwrap_or_else(|| {
            KnowledgeEntity::new(
                qid.to_string(),
                &self.config.wikidata.primary_language,
                name.to_string(),
            )
        });

        if let Some(record) = self.linker.fetch_record(qid).await {
            for (lang, label) in record.labels {
                entity.labels.insert(lang, label);
            }
            for (lang, description) in record.descriptions {
                entity.descriptions.insert(lang, description);
            }
            entity.properties = record.properties;
        }
        entity.updated_at = Utc::now();

        Ok(entity)
    }

    /// Rebuild relation rows from the embedded link mirror after manual
    /// edits: missing relations are recreated, relations that no longer
    /// correspond to current metadata are removed. Returns the number of
    /// relations created.
    pub async fn resync_links(&mut self, document_id: Uuid) -> Result<usize> {
        let document = self.storage.get_document(document_id).await?;
        let existing = self.storage.list_relations(document_id).await?;

        let desired: Vec<(MetadataField, String, String)> = document
            .entity_links
            .iter()
            .map(|(field, value, qid)| (field, value.to_string(), qid.to_string()))
            .collect();

        let mut created = 0usize;
        for (field, value, qid) in &desired {
            let already = existing.iter().any(|r| {
                r.field_category == *field && r.field_value == *value && r.qid == *qid
            });
            if already {
                continue;
            }

            let entity = self.ensure_entity(qid, value).await?;
            let relation = EntityRelation::new(document_id, qid.clone(), *field, value.clone())
                .with_context(format!("Rebuilt from link cache: {field}"));
            if self.storage.link_entity(&entity, &relation).await? {
                created += 1;
            }
        }

        for relation in &existing {
            let still_wanted = desired.iter().any(|(field, value, qid)| {
                relation.field_category == *field
                    && relation.field_value == *value
                    && relation.qid == *qid
            });
            if !still_wanted {
                tracing::info!(
                    qid = %relation.qid,
                    value = %relation.field_value,
                    "removing relation no longer backed by metadata links"
                );
                self.storage.delete_relation(relation.id).await?;
            }
        }

        tracing::info!(document = %document.name, created, "relation re-sync finished");
        Ok(created)
    }
}
