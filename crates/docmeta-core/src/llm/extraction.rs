use super::{ChatBackend, ChatMessage, LlmError};
use crate::error::{Error, Result};
use crate::ingest::{ChunkEntities, MergedEntities};
use crate::metadata::DocumentMetadata;

/// Per-chunk extraction instruction. The schema is stated exactly; downstream
/// parsing tolerates scalar/list drift but not free-form prose.
const EXTRACTION_PROMPT: &str = r#"You are a bibliographic metadata extraction expert. Extract entities from the text fragment provided by the user and return ONLY a JSON object with exactly this structure, with no additional text:
{
  "creator": ["creator or author name", ...],
  "organizations": ["organization name", ...],
  "title": "a title for this text",
  "keywords": ["keyword", ...],
  "dates": ["date mentioned in the text", ...],
  "summary": "a short summary of this fragment",
  "subject": ["subject area", ...],
  "document_language": "language of the text",
  "identifier": "resource identifier (DOI, URL, ISBN...)",
  "contributor": ["contributor name", ...],
  "rights": "license or rights information"
}

Rules:
- Extract only what is explicitly present in the text.
- Use an empty list [] or empty string "" when a field has no evidence.
- Keep names exactly as written in the text."#;

/// Document-level finalization instruction: deduplicate, canonicalize,
/// comply with the schema.
const FINALIZE_PROMPT: &str = r#"You are a data aggregation expert. The user provides a JSON object with entities extracted from multiple fragments of one document. Deduplicate it, select the most relevant information, and return ONLY a JSON object strictly matching this structure, with no additional text:
{
  "creator": ["creator name", ...],
  "organizations": ["organization name", ...],
  "title": "document title",
  "keywords": ["keyword", ...],
  "dates": ["date", ...],
  "summary": "a short description",
  "subject": ["subject area", ...],
  "document_language": "document language",
  "identifier": "resource identifier (DOI, URL...)",
  "contributor": ["contributor name", ...],
  "rights": "rights or license information"
}

Rules:
- Remove exact duplicates from every list field; lists must contain unique values.
- For keywords keep no more than four to seven of the most significant terms, ranked by relevance.
- For title choose or synthesize the single most complete and accurate name covering the whole text.
- For summary compose one concise but comprehensive description (2-3 sentences) combining the main aspects without repetition.
- For document_language choose the single language that fits the whole text.
- For identifier choose the single most relevant and complete identifier (a DOI is preferable to a generic page URL when both are present).
- For rights choose the single most complete statement.
- If a field cannot be determined from the input, leave it empty ([] for lists, "" for strings). Never omit a field."#;

fn repair_message(invalid: &str) -> String {
    format!(
        "The response was not valid JSON. Rewrite it in the correct JSON format. Original response: {invalid}"
    )
}

/// Parse a model reply as JSON, tolerating a fenced ```json block.
fn parse_json_reply(reply: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(reply) {
        return Some(value);
    }

    let stripped = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    serde_json::from_str(stripped).ok()
}

/// Drives the two LLM passes of the pipeline: per-chunk extraction and
/// document-level finalization, each with a single self-correction
/// round-trip for malformed output.
pub struct ExtractionClient {
    backend: Box<dyn ChatBackend>,
}

impl ExtractionClient {
    #[must_use]
    pub fn new(backend: Box<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    /// Extract entities from one chunk. A failed chunk contributes no
    /// entities and never aborts the document: transport errors and
    /// double-malformed output both come back as `None`.
    pub async fn extract_chunk(&self, chunk_text: &str) -> Option<ChunkEntities> {
        let messages = vec![ChatMessage::user(chunk_text)];

        let reply = match self.backend.chat(EXTRACTION_PROMPT, &messages).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "chunk extraction call failed");
                return None;
            }
        };

        if let Some(value) = parse_json_reply(&reply) {
            return self.decode_chunk(value);
        }

        tracing::info!("chunk reply was not valid JSON, requesting repair");
        let repaired = self.repair(EXTRACTION_PROMPT, &messages, &reply).await?;
        self.decode_chunk(repaired)
    }

    fn decode_chunk(&self, value: serde_json::Value) -> Option<ChunkEntities> {
        match serde_json::from_value(value) {
            Ok(entities) => Some(entities),
            Err(e) => {
                tracing::warn!(error = %e, "chunk entities failed schema parse");
                None
            }
        }
    }

    /// Finalize the merged entity bag into schema-compliant metadata.
    /// Stage-fatal: fails only when both the original attempt and the repair
    /// attempt fail to parse, or the backend is unreachable.
    pub async fn finalize(&self, merged: &MergedEntities) -> Result<DocumentMetadata> {
        let input = serde_json::to_string(merged)?;
        let messages = vec![
            ChatMessage::user(input),
            ChatMessage::user("Process the input JSON and return the result."),
        ];

        let reply = self
            .backend
            .chat(FINALIZE_PROMPT, &messages)
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))?;

        if let Some(value) = parse_json_reply(&reply) {
            if let Ok(metadata) = DocumentMetadata::from_model_value(&value) {
                return Ok(metadata);
            }
        }

        tracing::info!("finalization reply was not valid, requesting repair");
        let repaired = self
            .repair(FINALIZE_PROMPT, &messages, &reply)
            .await
            .ok_or_else(|| {
                Error::MalformedModelOutput("finalization reply unparsable after repair".into())
            })?;

        DocumentMetadata::from_model_value(&repaired)
    }

    /// The single self-correction round-trip: resend the invalid output with
    /// an explicit reformat instruction and re-parse.
    async fn repair(
        &self,
        system: &str,
        messages: &[ChatMessage],
        invalid: &str,
    ) -> Option<serde_json::Value> {
        let mut repair_messages = messages.to_vec();
        repair_messages.push(ChatMessage::assistant(invalid));
        repair_messages.push(ChatMessage::user(repair_message(invalid)));

        match self.backend.chat(system, &repair_messages).await {
            Ok(reply) => parse_json_reply(&reply),
            Err(e) => {
                tracing::warn!(error = %e, "repair call failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldValue, MetadataField};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Backend that replays a fixed script of replies.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<std::result::Result<String, ()>>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new<I: IntoIterator<Item = std::result::Result<String, ()>>>(replies: I) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for &ScriptedBackend {
        async fn chat(
            &self,
            _system: &str,
            _messages: &[ChatMessage],
        ) -> std::result::Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(())) => Err(LlmError::Transport("scripted failure".into())),
                None => panic!("backend called more times than scripted"),
            }
        }
    }

    fn client(backend: &'static ScriptedBackend) -> ExtractionClient {
        ExtractionClient::new(Box::new(backend))
    }

    fn leak(backend: ScriptedBackend) -> &'static ScriptedBackend {
        Box::leak(Box::new(backend))
    }

    const VALID_CHUNK: &str = r#"{"creator": ["Jane Doe"], "title": "Report", "keywords": ["ai"]}"#;

    #[tokio::test]
    async fn test_valid_reply_needs_no_repair() {
        let backend = leak(ScriptedBackend::new([Ok(VALID_CHUNK.to_string())]));
        let result = client(backend).extract_chunk("some text").await.unwrap();

        assert_eq!(result.creator, vec!["Jane Doe"]);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_reply_triggers_exactly_one_repair() {
        let backend = leak(ScriptedBackend::new([
            Ok("this is not json at all".to_string()),
            Ok(VALID_CHUNK.to_string()),
        ]));

        let result = client(backend).extract_chunk("some text").await.unwrap();
        assert_eq!(result.title, "Report");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_repair_yields_none_without_raising() {
        let backend = leak(ScriptedBackend::new([
            Ok("garbage".to_string()),
            Ok("still garbage".to_string()),
        ]));

        let result = client(backend).extract_chunk("some text").await;
        assert!(result.is_none());
        // Exactly one repair round-trip: two calls total, never a third.
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_is_absorbed() {
        let backend = leak(ScriptedBackend::new([Err(())]));
        let result = client(backend).extract_chunk("some text").await;

        assert!(result.is_none());
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_fenced_json_is_tolerated() {
        let fenced = format!("```json\n{VALID_CHUNK}\n```");
        let backend = leak(ScriptedBackend::new([Ok(fenced)]));

        let result = client(backend).extract_chunk("some text").await.unwrap();
        assert_eq!(result.creator, vec!["Jane Doe"]);
        assert_eq!(backend.calls(), 1);
    }

    fn duplicate_count(values: &[String]) -> usize {
        let mut seen = std::collections::HashSet::new();
        values.iter().filter(|v| !seen.insert(v.as_str())).count()
    }

    #[tokio::test]
    async fn test_finalize_never_increases_duplicates() {
        let mut merged = MergedEntities::new();
        merged.creator = vec!["Jane Doe".into(), "Jane Doe".into(), "John Smith".into()];
        merged.keywords = vec!["ai".into(), "ai".into(), "nlp".into()];
        merged.title = vec!["Draft".into(), "Final Report".into()];

        // Deterministic finalization: duplicates removed, one title chosen.
        let finalized = r#"{
            "creator": ["Jane Doe", "John Smith"],
            "organizations": [],
            "title": "Final Report",
            "keywords": ["ai", "nlp"],
            "dates": [],
            "summary": "A report.",
            "subject": [],
            "document_language": "en",
            "identifier": "",
            "contributor": [],
            "rights": ""
        }"#;
        let backend = leak(ScriptedBackend::new([
            Ok(finalized.to_string()),
            Ok(finalized.to_string()),
        ]));
        let client = client(backend);

        let first = client.finalize(&merged).await.unwrap();
        let second = client.finalize(&merged).await.unwrap();
        assert_eq!(first, second);

        let Some(FieldValue::List(creators)) = first.get(MetadataField::Creator) else {
            panic!("creator should be a list");
        };
        assert!(duplicate_count(creators) <= duplicate_count(&merged.creator));

        let Some(FieldValue::List(keywords)) = first.get(MetadataField::Keywords) else {
            panic!("keywords should be a list");
        };
        assert!(duplicate_count(keywords) <= duplicate_count(&merged.keywords));
        assert!(keywords.len() <= 7);
    }

    #[tokio::test]
    async fn test_finalize_transport_error_is_backend_unavailable() {
        let backend = leak(ScriptedBackend::new([Err(())]));
        let merged = MergedEntities::new();

        let result = client(backend).finalize(&merged).await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_finalize_double_malformed_is_stage_fatal() {
        let backend = leak(ScriptedBackend::new([
            Ok("not json".to_string()),
            Ok("also not json".to_string()),
        ]));
        let merged = MergedEntities::new();

        let result = client(backend).finalize(&merged).await;
        assert!(matches!(result, Err(Error::MalformedModelOutput(_))));
        assert_eq!(backend.calls(), 2);
    }
}
