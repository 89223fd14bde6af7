use serde::{Deserialize, Deserializer, Serialize};

/// Per-chunk model output against the fixed extraction schema. Deserialization
/// is lenient about scalar/list drift — the repair round-trip handles invalid
/// JSON, this handles valid JSON of slightly the wrong shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntities {
    #[serde(default, deserialize_with = "lenient_list")]
    pub creator: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub organizations: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub dates: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub subject: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub document_language: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub identifier: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub contributor: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub rights: String,
}

impl ChunkEntities {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creator.is_empty()
            && self.organizations.is_empty()
            && self.title.is_empty()
            && self.keywords.is_empty()
            && self.dates.is_empty()
            && self.summary.is_empty()
            && self.subject.is_empty()
            && self.document_language.is_empty()
            && self.identifier.is_empty()
            && self.contributor.is_empty()
            && self.rights.is_empty()
    }
}

fn lenient_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(collect_strings(value))
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(d)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .into_iter()
            .find_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .unwrap_or_default(),
        _ => String::new(),
    })
}

fn collect_strings(value: serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => {
            if s.trim().is_empty() {
                Vec::new()
            } else {
                vec![s]
            }
        }
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// The un-deduplicated entity bag for a whole document: list fields
/// concatenated in chunk order, scalar fields collected as candidate lists
/// for the finalizer to resolve. Duplicates are intentionally retained — the
/// finalizer has full-document context for better judgment calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedEntities {
    pub creator: Vec<String>,
    pub organizations: Vec<String>,
    pub title: Vec<String>,
    pub keywords: Vec<String>,
    pub dates: Vec<String>,
    pub summary: Vec<String>,
    pub subject: Vec<String>,
    pub document_language: Vec<String>,
    pub identifier: Vec<String>,
    pub contributor: Vec<String>,
    pub rights: Vec<String>,
}

impl MergedEntities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, entities: &ChunkEntities) {
        self.creator.extend(entities.creator.iter().cloned());
        self.organizations
            .extend(entities.organizations.iter().cloned());
        self.keywords.extend(entities.keywords.iter().cloned());
        self.dates.extend(entities.dates.iter().cloned());
        self.subject.extend(entities.subject.iter().cloned());
        self.contributor.extend(entities.contributor.iter().cloned());

        for (candidates, value) in [
            (&mut self.title, &entities.title),
            (&mut self.summary, &entities.summary),
            (&mut self.document_language, &entities.document_language),
            (&mut self.identifier, &entities.identifier),
            (&mut self.rights, &entities.rights),
        ] {
            if !value.trim().is_empty() {
                candidates.push(value.clone());
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.creator.is_empty()
            && self.organizations.is_empty()
            && self.title.is_empty()
            && self.keywords.is_empty()
            && self.dates.is_empty()
            && self.summary.is_empty()
            && self.subject.is_empty()
            && self.document_language.is_empty()
            && self.identifier.is_empty()
            && self.contributor.is_empty()
            && self.rights.is_empty()
    }
}

/// Merge per-chunk results in document order. Chunks that failed extraction
/// are expected to be filtered out by the caller before this point.
#[must_use]
pub fn merge_entities(chunks: &[ChunkEntities]) -> MergedEntities {
    let mut merged = MergedEntities::new();
    for chunk in chunks {
        merged.absorb(chunk);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(creator: &[&str], title: &str, keywords: &[&str]) -> ChunkEntities {
        ChunkEntities {
            creator: creator.iter().map(|s| (*s).to_string()).collect(),
            title: title.to_string(),
            keywords: keywords.iter().map(|s| (*s).to_string()).collect(),
            ..ChunkEntities::default()
        }
    }

    #[test]
    fn test_merge_concatenates_without_dedup() {
        let a = chunk(&["Jane Doe"], "Report", &["analysis"]);
        let b = chunk(&["Jane Doe", "John Smith"], "Annual Report", &["analysis"]);

        let merged = merge_entities(&[a, b]);

        assert_eq!(merged.creator, vec!["Jane Doe", "Jane Doe", "John Smith"]);
        assert_eq!(merged.keywords, vec!["analysis", "analysis"]);
        assert_eq!(merged.title, vec!["Report", "Annual Report"]);
    }

    #[test]
    fn test_merge_preserves_chunk_order() {
        let chunks: Vec<ChunkEntities> = (0..4)
            .map(|i| chunk(&[&format!("author-{i}")], "", &[]))
            .collect();

        let merged = merge_entities(&chunks);
        assert_eq!(
            merged.creator,
            vec!["author-0", "author-1", "author-2", "author-3"]
        );
    }

    #[test]
    fn test_merge_is_associative() {
        let a = chunk(&["A"], "t1", &["k1"]);
        let b = chunk(&["B"], "t2", &["k2", "k3"]);
        let c = chunk(&["C"], "", &["k1"]);

        let all_at_once = merge_entities(&[a.clone(), b.clone(), c.clone()]);

        let mut incremental = merge_entities(&[a, b]);
        incremental.absorb(&c);

        assert_eq!(all_at_once, incremental);
    }

    #[test]
    fn test_empty_scalars_are_not_collected() {
        let merged = merge_entities(&[chunk(&[], "", &[]), chunk(&[], "  ", &[])]);
        assert!(merged.title.is_empty());
        assert!(merged.is_empty());
    }

    #[test]
    fn test_lenient_chunk_deserialization() {
        // A lone string where a list belongs, and a list where a scalar does.
        let entities: ChunkEntities = serde_json::from_value(json!({
            "creator": "Single Author",
            "title": ["Best Title", "Other Title"],
            "keywords": ["ai", 42, "nlp"],
            "dates": null,
        }))
        .unwrap();

        assert_eq!(entities.creator, vec!["Single Author"]);
        assert_eq!(entities.title, "Best Title");
        assert_eq!(entities.keywords, vec!["ai", "nlp"]);
        assert!(entities.dates.is_empty());
    }

    #[test]
    fn test_chunk_is_empty() {
        assert!(ChunkEntities::default().is_empty());
        assert!(!chunk(&["x"], "", &[]).is_empty());
    }
}
