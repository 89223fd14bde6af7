use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The canonical metadata schema. The older "author/topic" field vintage is
/// accepted read-only through [`MetadataField::from_legacy`] and never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    Creator,
    Organizations,
    Title,
    Keywords,
    Dates,
    Summary,
    Subject,
    DocumentLanguage,
    Identifier,
    Contributor,
    Rights,
}

impl MetadataField {
    pub const ALL: [Self; 11] = [
        Self::Creator,
        Self::Organizations,
        Self::Title,
        Self::Keywords,
        Self::Dates,
        Self::Summary,
        Self::Subject,
        Self::DocumentLanguage,
        Self::Identifier,
        Self::Contributor,
        Self::Rights,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Organizations => "organizations",
            Self::Title => "title",
            Self::Keywords => "keywords",
            Self::Dates => "dates",
            Self::Summary => "summary",
            Self::Subject => "subject",
            Self::DocumentLanguage => "document_language",
            Self::Identifier => "identifier",
            Self::Contributor => "contributor",
            Self::Rights => "rights",
        }
    }

    /// Whether the field carries a list of values rather than a single one.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            Self::Creator
                | Self::Organizations
                | Self::Keywords
                | Self::Dates
                | Self::Subject
                | Self::Contributor
        )
    }

    /// Resolve a field name from either schema vintage. Legacy names map onto
    /// their canonical counterparts; unknown names resolve to nothing.
    #[must_use]
    pub fn from_legacy(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "author" | "authors" => Some(Self::Creator),
            "publisher" => Some(Self::Organizations),
            "topic" => Some(Self::Title),
            "language" => Some(Self::DocumentLanguage),
            "subject_area" => Some(Self::Subject),
            "contributors" => Some(Self::Contributor),
            other => other.parse().ok(),
        }
    }
}

impl std::fmt::Display for MetadataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetadataField {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(Self::Creator),
            "organizations" => Ok(Self::Organizations),
            "title" => Ok(Self::Title),
            "keywords" => Ok(Self::Keywords),
            "dates" => Ok(Self::Dates),
            "summary" => Ok(Self::Summary),
            "subject" => Ok(Self::Subject),
            "document_language" => Ok(Self::DocumentLanguage),
            "identifier" => Ok(Self::Identifier),
            "contributor" => Ok(Self::Contributor),
            "rights" => Ok(Self::Rights),
            _ => Err(crate::Error::InvalidField(s.to_string())),
        }
    }
}

/// One metadata value annotated with its knowledge-base identifier, if linked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedItem {
    pub name: String,
    pub wikidata: Option<String>,
}

impl LinkedItem {
    #[must_use]
    pub fn new(name: String, wikidata: Option<String>) -> Self {
        Self { name, wikidata }
    }

    #[must_use]
    pub fn unlinked(name: String) -> Self {
        Self {
            name,
            wikidata: None,
        }
    }
}

/// A single field's value. The persisted JSON keeps the original wire shape:
/// plain strings, lists of strings, and `{name, wikidata}` objects once the
/// enrichment pass has run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    List(Vec<String>),
    Linked(Vec<LinkedItem>),
    LinkedScalar(LinkedItem),
}

impl FieldValue {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Scalar(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(|s| s.trim().is_empty()),
            Self::Linked(items) => items.is_empty(),
            Self::LinkedScalar(item) => item.name.trim().is_empty(),
        }
    }

    /// The literal names carried by this value, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Scalar(s) => {
                if s.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![s.as_str()]
                }
            }
            Self::List(items) => items
                .iter()
                .map(String::as_str)
                .filter(|s| !s.trim().is_empty())
                .collect(),
            Self::Linked(items) => items
                .iter()
                .map(|i| i.name.as_str())
                .filter(|s| !s.trim().is_empty())
                .collect(),
            Self::LinkedScalar(item) => {
                if item.name.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![item.name.as_str()]
                }
            }
        }
    }
}

/// Finalized document metadata: the fixed field enumeration mapped to typed
/// values. Untyped JSON only crosses this boundary through
/// [`DocumentMetadata::from_model_value`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentMetadata {
    fields: BTreeMap<MetadataField, FieldValue>,
}

impl DocumentMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: MetadataField) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn set(&mut self, field: MetadataField, value: FieldValue) {
        self.fields.insert(field, value);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(FieldValue::is_empty)
    }

    /// Fields in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (MetadataField, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    /// Validate raw model output against the fixed schema. Every canonical
    /// field ends up present; list fields coerce lone strings into one-element
    /// lists, scalar fields take the first element of a stray list. Unknown
    /// keys are dropped.
    pub fn from_model_value(value: &serde_json::Value) -> crate::Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            crate::Error::MalformedModelOutput("metadata is not a JSON object".into())
        })?;

        let mut metadata = Self::new();

        for (key, raw) in map {
            let Some(field) = MetadataField::from_legacy(key) else {
                tracing::debug!(key, "dropping unknown metadata key");
                continue;
            };

            let parsed = parse_field_value(field, raw)?;
            metadata.set(field, parsed);
        }

        for field in MetadataField::ALL {
            metadata.fields.entry(field).or_insert_with(|| {
                if field.is_list() {
                    FieldValue::List(Vec::new())
                } else {
                    FieldValue::Scalar(String::new())
                }
            });
        }

        Ok(metadata)
    }

    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (field, value) in &self.fields {
            map.insert(
                field.as_str().to_string(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(map)
    }
}

fn parse_field_value(field: MetadataField, raw: &serde_json::Value) -> crate::Result<FieldValue> {
    let value: FieldValue = match raw {
        serde_json::Value::Null => {
            if field.is_list() {
                FieldValue::List(Vec::new())
            } else {
                FieldValue::Scalar(String::new())
            }
        }
        other => serde_json::from_value(other.clone()).map_err(|_| {
            crate::Error::InvalidFieldValue {
                field: field.as_str().to_string(),
                reason: format!("unexpected shape: {other}"),
            }
        })?,
    };

    // Coerce shape drift instead of failing the whole document over it.
    let value = match (field.is_list(), value) {
        (true, FieldValue::Scalar(s)) => {
            if s.trim().is_empty() {
                FieldValue::List(Vec::new())
            } else {
                FieldValue::List(vec![s])
            }
        }
        (true, FieldValue::LinkedScalar(item)) => FieldValue::Linked(vec![item]),
        (false, FieldValue::List(items)) => {
            FieldValue::Scalar(items.into_iter().next().unwrap_or_default())
        }
        (false, FieldValue::Linked(items)) => match items.into_iter().next() {
            Some(item) => FieldValue::LinkedScalar(item),
            None => FieldValue::Scalar(String::new()),
        },
        (_, v) => v,
    };

    Ok(value)
}

/// Field → value → QID mirror of the relation table, persisted alongside the
/// metadata for fast lookup and incremental re-linking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityLinks {
    links: BTreeMap<MetadataField, BTreeMap<String, String>>,
}

impl EntityLinks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: MetadataField, value: &str) -> Option<&str> {
        self.links
            .get(&field)
            .and_then(|m| m.get(value))
            .map(String::as_str)
    }

    pub fn insert(&mut self, field: MetadataField, value: String, qid: String) {
        self.links.entry(field).or_default().insert(value, qid);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.values().all(BTreeMap::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataField, &str, &str)> {
        self.links.iter().flat_map(|(field, values)| {
            values
                .iter()
                .map(|(value, qid)| (*field, value.as_str(), qid.as_str()))
        })
    }
}
