use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::MetadataField;

/// Semantic category used for knowledge-base type verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Organization,
    Language,
    Discipline,
    Concept,
}

impl EntityType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Language => "language",
            Self::Discipline => "discipline",
            Self::Concept => "concept",
        }
    }

    /// Wikidata "instance of" identifiers accepted for this category.
    #[must_use]
    pub fn accepted_type_qids(&self) -> &'static [&'static str] {
        match self {
            Self::Person => &["Q5"],
            Self::Organization => &["Q43229", "Q3918", "Q875538"],
            Self::Language => &["Q34770"],
            Self::Discipline => &["Q11862829"],
            Self::Concept => &["Q1656682", "Q7184903"],
        }
    }

    /// The fixed field → type mapping. Fields outside the mapping are linked
    /// without type verification.
    #[must_use]
    pub fn for_field(field: MetadataField) -> Option<Self> {
        match field {
            MetadataField::Creator | MetadataField::Contributor => Some(Self::Person),
            MetadataField::Organizations => Some(Self::Organization),
            MetadataField::Title | MetadataField::Keywords => Some(Self::Concept),
            MetadataField::Subject => Some(Self::Discipline),
            MetadataField::DocumentLanguage => Some(Self::Language),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One auxiliary property claim fetched from the knowledge base.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyClaim {
    pub label: String,
    pub values: Vec<String>,
}

/// One canonical knowledge-base record, keyed by its external identifier.
/// Created lazily on first successful link, refreshed in place when stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub qid: String,
    /// Language code → label, at least one language.
    pub labels: BTreeMap<String, String>,
    /// Language code → description.
    pub descriptions: BTreeMap<String, String>,
    /// Property id (e.g. "P31") → claim.
    pub properties: BTreeMap<String, PropertyClaim>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntity {
    #[must_use]
    pub fn new(qid: String, label_lang: &str, label: String) -> Self {
        let now = Utc::now();
        let mut labels = BTreeMap::new();
        labels.insert(label_lang.to_string(), label);
        Self {
            qid,
            labels,
            descriptions: BTreeMap::new(),
            properties: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn label(&self, lang: &str) -> Option<&str> {
        self.labels.get(lang).map(String::as_str)
    }

    /// Whether the record should be refreshed from the knowledge base.
    #[must_use]
    pub fn is_stale(&self, freshness_days: i64) -> bool {
        self.labels.is_empty()
            || self.descriptions.is_empty()
            || (Utc::now() - self.updated_at).num_days() > freshness_days
    }
}

/// One mention of a [`KnowledgeEntity`] within a document's metadata.
/// (document, entity, field_category, field_key, field_value) is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub qid: String,
    pub field_category: MetadataField,
    pub field_key: String,
    pub field_value: String,
    pub confidence: f64,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EntityRelation {
    #[must_use]
    pub fn new(
        document_id: Uuid,
        qid: String,
        field_category: MetadataField,
        field_value: String,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            document_id,
            qid,
            field_category,
            field_key: field_category.as_str().to_string(),
            field_value,
            confidence: 1.0,
            context: None,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_mapping() {
        assert_eq!(
            EntityType::for_field(MetadataField::Creator),
            Some(EntityType::Person)
        );
        assert_eq!(
            EntityType::for_field(MetadataField::Contributor),
            Some(EntityType::Person)
        );
        assert_eq!(
            EntityType::for_field(MetadataField::Organizations),
            Some(EntityType::Organization)
        );
        assert_eq!(
            EntityType::for_field(MetadataField::Subject),
            Some(EntityType::Discipline)
        );
        assert_eq!(
            EntityType::for_field(MetadataField::DocumentLanguage),
            Some(EntityType::Language)
        );
        assert_eq!(EntityType::for_field(MetadataField::Dates), None);
        assert_eq!(EntityType::for_field(MetadataField::Rights), None);
    }

    #[test]
    fn test_accepted_type_qids() {
        assert_eq!(EntityType::Person.accepted_type_qids(), &["Q5"]);
        assert!(EntityType::Organization
            .accepted_type_qids()
            .contains(&"Q3918"));
    }

    #[test]
    fn test_entity_staleness() {
        let mut entity = KnowledgeEntity::new("Q5".into(), "en", "human".into());

        // Fresh labels but no descriptions yet: needs a refresh.
        assert!(entity.is_stale(30));

        entity
            .descriptions
            .insert("en".into(), "common name of Homo sapiens".into());
        assert!(!entity.is_stale(30));

        entity.updated_at = Utc::now() - chrono::Duration::days(45);
        assert!(entity.is_stale(30));
        assert!(!entity.is_stale(60));
    }

    #[test]
    fn test_relation_confidence_clamp() {
        let relation = EntityRelation::new(
            Uuid::now_v7(),
            "Q123".into(),
            MetadataField::Creator,
            "Jane Doe".into(),
        )
        .with_confidence(1.5);

        assert!((relation.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(relation.field_key, "creator");
    }
}
