use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::{
    document::{Document, DocumentFormat, ProcessingStatus},
    entity::{EntityRelation, KnowledgeEntity},
    metadata::{DocumentMetadata, EntityLinks, MetadataField},
    Error, Result,
};

const INIT_SQL: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    file_path TEXT NOT NULL,
    format TEXT NOT NULL,
    status TEXT NOT NULL,
    metadata TEXT NOT NULL,
    entity_links TEXT NOT NULL,
    processing_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);

CREATE TABLE IF NOT EXISTS knowledge_entities (
    qid TEXT PRIMARY KEY,
    labels TEXT NOT NULL,
    descriptions TEXT NOT NULL,
    properties TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entity_relations (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    qid TEXT NOT NULL REFERENCES knowledge_entities(qid) ON DELETE CASCADE,
    field_category TEXT NOT NULL,
    field_key TEXT NOT NULL,
    field_value TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    context TEXT,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_relations_mention
    ON entity_relations(document_id, qid, field_category, field_key, field_value);
CREATE INDEX IF NOT EXISTS idx_relations_document ON entity_relations(document_id);
CREATE INDEX IF NOT EXISTS idx_relations_entity ON entity_relations(qid);
";

pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))
            .map_err(Error::Database)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(Error::Database)?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    // Document operations

    pub async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO documents
                (id, name, file_path, format, status, metadata, entity_links,
                 processing_error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(document.id.to_string())
        .bind(&document.name)
        .bind(&document.file_path)
        .bind(document.format.as_str())
        .bind(document.status.as_str())
        .bind(serde_json::to_string(&document.metadata)?)
        .bind(serde_json::to_string(&document.entity_links)?)
        .bind(&document.processing_error)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_document(&self, id: Uuid) -> Result<Document> {
        let row: DocumentRow = sqlx::query_as(
            r"
            SELECT id, name, file_path, format, status, metadata, entity_links,
                   processing_error, created_at, updated_at
            FROM documents WHERE id = ?
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::DocumentNotFound(id))?;

        parse_document_row(row)
    }

    /// The status-update contract consumed by the task scheduler: one write
    /// for the status and the error text together.
    pub async fn update_document_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE documents
            SET status = ?, processing_error = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }

        Ok(())
    }

    /// Commit finalized metadata and the link mirror in one write, so a
    /// failed stage never leaves a partially written document.
    pub async fn update_document_metadata(
        &self,
        id: Uuid,
        metadata: &DocumentMetadata,
        entity_links: &EntityLinks,
    ) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE documents
            SET metadata = ?, entity_links = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(serde_json::to_string(metadata)?)
        .bind(serde_json::to_string(entity_links)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }

        Ok(())
    }

    /// Deleting a document cascades to its entity relations.
    pub async fn delete_document(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::DocumentNotFound(id));
        }

        Ok(())
    }

    // Knowledge entity operations

    pub async fn get_entity(&self, qid: &str) -> Result<Option<KnowledgeEntity>> {
        let row: Option<EntityRow> = sqlx::query_as(
            r"
            SELECT qid, labels, descriptions, properties, created_at, updated_at
            FROM knowledge_entities WHERE qid = ?
            ",
        )
        .bind(qid)
        .fetch_optional(&self.pool)
        .await?;

        row.map(parse_entity_row).transpose()
    }

    /// Create-or-fetch-by-natural-key semantics: concurrent upserts of the
    /// same external id converge on one row, refreshed rather than duplicated.
    pub async fn upsert_entity(&self, entity: &KnowledgeEntity) -> Result<()> {
        upsert_entity_on(&self.pool, entity).await
    }

    /// Persist one successful link: the entity upsert and the relation
    /// get-or-create are atomic with respect to each other. Returns whether
    /// a new relation row was created.
    pub async fn link_entity(
        &self,
        entity: &KnowledgeEntity,
        relation: &EntityRelation,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        upsert_entity_on(&mut *tx, entity).await?;

        let existing: Option<(String,)> = sqlx::query_as(
            r"
            SELECT id FROM entity_relations
            WHERE document_id = ? AND qid = ? AND field_category = ?
              AND field_key = ? AND field_value = ?
            ",
        )
        .bind(relation.document_id.to_string())
        .bind(&relation.qid)
        .bind(relation.field_category.as_str())
        .bind(&relation.field_key)
        .bind(&relation.field_value)
        .fetch_optional(&mut *tx)
        .await?;

        let created = existing.is_none();

        sqlx::query(
            r"
            INSERT INTO entity_relations
                (id, document_id, qid, field_category, field_key, field_value,
                 confidence, context, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, qid, field_category, field_key, field_value)
            DO UPDATE SET confidence = excluded.confidence, context = excluded.context
            ",
        )
        .bind(relation.id.to_string())
        .bind(relation.document_id.to_string())
        .bind(&relation.qid)
        .bind(relation.field_category.as_str())
        .bind(&relation.field_key)
        .bind(&relation.field_value)
        .bind(relation.confidence)
        .bind(&relation.context)
        .bind(relation.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    // Relation operations

    pub async fn list_relations(&self, document_id: Uuid) -> Result<Vec<EntityRelation>> {
        let rows: Vec<RelationRow> = sqlx::query_as(
            r"
            SELECT id, document_id, qid, field_category, field_key, field_value,
                   confidence, context, created_at
            FROM entity_relations
            WHERE document_id = ?
            ORDER BY confidence DESC, created_at
            ",
        )
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_relation_row).collect()
    }

    pub async fn delete_relation(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM entity_relations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

async fn upsert_entity_on<'e, E>(executor: E, entity: &KnowledgeEntity) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r"
        INSERT INTO knowledge_entities
            (qid, labels, descriptions, properties, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(qid) DO UPDATE SET
            labels = excluded.labels,
            descriptions = excluded.descriptions,
            properties = excluded.properties,
            updated_at = excluded.updated_at
        ",
    )
    .bind(&entity.qid)
    .bind(serde_json::to_string(&entity.labels)?)
    .bind(serde_json::to_string(&entity.descriptions)?)
    .bind(serde_json::to_string(&entity.properties)?)
    .bind(entity.created_at.to_rfc3339())
    .bind(entity.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

type DocumentRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    String,
    String,
);

fn parse_document_row(row: DocumentRow) -> Result<Document> {
    let (id, name, file_path, format, status, metadata, entity_links, processing_error, created_at, updated_at) =
        row;

    Ok(Document {
        id: parse_uuid(&id)?,
        name,
        file_path,
        format: format.parse::<DocumentFormat>()?,
        status: status.parse::<ProcessingStatus>()?,
        metadata: serde_json::from_str(&metadata)?,
        entity_links: serde_json::from_str(&entity_links)?,
        processing_error,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

type EntityRow = (String, String, String, String, String, String);

fn parse_entity_row(row: EntityRow) -> Result<KnowledgeEntity> {
    let (qid, labels, descriptions, properties, created_at, updated_at) = row;

    Ok(KnowledgeEntity {
        qid,
        labels: serde_json::from_str(&labels)?,
        descriptions: serde_json::from_str(&descriptions)?,
        properties: serde_json::from_str(&properties)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

type RelationRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    f64,
    Option<String>,
    String,
);

fn parse_relation_row(row: RelationRow) -> Result<EntityRelation> {
    let (id, document_id, qid, field_category, field_key, field_value, confidence, context, created_at) =
        row;

    Ok(EntityRelation {
        id: parse_uuid(&id)?,
        document_id: parse_uuid(&document_id)?,
        qid,
        field_category: field_category.parse::<MetadataField>()?,
        field_key,
        field_value,
        confidence,
        context,
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|_| Error::InvalidField(format!("bad uuid: {raw}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidField(format!("bad timestamp: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldValue;

    fn sample_document() -> Document {
        Document::new(
            "report.pdf".into(),
            "/tmp/report.pdf".into(),
            DocumentFormat::Pdf,
        )
    }

    fn sample_entity(qid: &str) -> KnowledgeEntity {
        KnowledgeEntity::new(qid.into(), "en", "Jane Doe".into())
    }

    #[tokio::test]
    async fn test_document_crud() {
        let storage = Storage::open_memory().await.unwrap();
        let document = sample_document();

        storage.insert_document(&document).await.unwrap();

        let loaded = storage.get_document(document.id).await.unwrap();
        assert_eq!(loaded.name, "report.pdf");
        assert_eq!(loaded.status, ProcessingStatus::Pending);

        storage
            .update_document_status(document.id, ProcessingStatus::Processing, None)
            .await
            .unwrap();
        let loaded = storage.get_document(document.id).await.unwrap();
        assert_eq!(loaded.status, ProcessingStatus::Processing);

        storage
            .update_document_status(document.id, ProcessingStatus::Failed, Some("no text"))
            .await
            .unwrap();
        let loaded = storage.get_document(document.id).await.unwrap();
        assert_eq!(loaded.processing_error.as_deref(), Some("no text"));

        storage.delete_document(document.id).await.unwrap();
        assert!(storage.get_document(document.id).await.is_err());
    }

    #[tokio::test]
    async fn test_metadata_write_roundtrip() {
        let storage = Storage::open_memory().await.unwrap();
        let document = sample_document();
        storage.insert_document(&document).await.unwrap();

        let mut metadata = DocumentMetadata::new();
        metadata.set(
            MetadataField::Creator,
            FieldValue::List(vec!["Jane Doe".into()]),
        );
        let mut links = EntityLinks::new();
        links.insert(MetadataField::Creator, "Jane Doe".into(), "Q1".into());

        storage
            .update_document_metadata(document.id, &metadata, &links)
            .await
            .unwrap();

        let loaded = storage.get_document(document.id).await.unwrap();
        assert_eq!(loaded.metadata, metadata);
        assert_eq!(loaded.entity_links.get(MetadataField::Creator, "Jane Doe"), Some("Q1"));
    }

    #[tokio::test]
    async fn test_entity_upsert_converges() {
        let storage = Storage::open_memory().await.unwrap();

        let mut entity = sample_entity("Q42");
        storage.upsert_entity(&entity).await.unwrap();

        entity
            .descriptions
            .insert("en".into(), "English writer".into());
        storage.upsert_entity(&entity).await.unwrap();

        let loaded = storage.get_entity("Q42").await.unwrap().unwrap();
        assert_eq!(
            loaded.descriptions.get("en").map(String::as_str),
            Some("English writer")
        );
        assert!(storage.get_entity("Q999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relation_uniqueness_is_an_upsert() {
        let storage = Storage::open_memory().await.unwrap();
        let document = sample_document();
        storage.insert_document(&document).await.unwrap();

        let entity = sample_entity("Q1");
        let relation = EntityRelation::new(
            document.id,
            "Q1".into(),
            MetadataField::Creator,
            "Jane Doe".into(),
        );

        let created = storage.link_entity(&entity, &relation).await.unwrap();
        assert!(created);

        // Identical mention again: no second row, just an update.
        let again = EntityRelation::new(
            document.id,
            "Q1".into(),
            MetadataField::Creator,
            "Jane Doe".into(),
        )
        .with_confidence(0.7);

        let created = storage.link_entity(&entity, &again).await.unwrap();
        assert!(!created);

        let relations = storage.list_relations(document.id).await.unwrap();
        assert_eq!(relations.len(), 1);
        assert!((relations[0].confidence - 0.7).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_same_value_in_different_fields_is_two_relations() {
        let storage = Storage::open_memory().await.unwrap();
        let document = sample_document();
        storage.insert_document(&document).await.unwrap();

        let entity = sample_entity("Q1");
        for field in [MetadataField::Creator, MetadataField::Contributor] {
            let relation = EntityRelation::new(document.id, "Q1".into(), field, "Jane Doe".into());
            assert!(storage.link_entity(&entity, &relation).await.unwrap());
        }

        assert_eq!(storage.list_relations(document.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_document_delete_cascades_to_relations() {
        let storage = Storage::open_memory().await.unwrap();
        let document = sample_document();
        storage.insert_document(&document).await.unwrap();

        let entity = sample_entity("Q1");
        let relation = EntityRelation::new(
            document.id,
            "Q1".into(),
            MetadataField::Keywords,
            "ai".into(),
        );
        storage.link_entity(&entity, &relation).await.unwrap();

        storage.delete_document(document.id).await.unwrap();
        assert!(storage.list_relations(document.id).await.unwrap().is_empty());

        // The entity itself survives; it belongs to no single document.
        assert!(storage.get_entity("Q1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_relation() {
        let storage = Storage::open_memory().await.unwrap();
        let document = sample_document();
        storage.insert_document(&document).await.unwrap();

        let entity = sample_entity("Q1");
        let relation = EntityRelation::new(
            document.id,
            "Q1".into(),
            MetadataField::Subject,
            "physics".into(),
        );
        storage.link_entity(&entity, &relation).await.unwrap();

        let stored = storage.list_relations(document.id).await.unwrap();
        storage.delete_relation(stored[0].id).await.unwrap();
        assert!(storage.list_relations(document.id).await.unwrap().is_empty());
    }
}
