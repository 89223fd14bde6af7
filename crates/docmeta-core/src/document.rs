use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::{DocumentMetadata, EntityLinks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Doc,
    Txt,
    Rtf,
}

impl DocumentFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Doc => "doc",
            Self::Txt => "txt",
            Self::Rtf => "rtf",
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "doc" => Some(Self::Doc),
            "txt" => Some(Self::Txt),
            "rtf" => Some(Self::Rtf),
            _ => None,
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s).ok_or_else(|| crate::Error::UnsupportedFormat(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl ProcessingStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(crate::Error::InvalidField(s.to_string())),
        }
    }
}

/// One uploaded file tracked by the pipeline. Ownership, folders and file
/// storage live with the hosting application; the pipeline only reads the
/// path and writes status, metadata and links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub name: String,
    pub file_path: String,
    pub format: DocumentFormat,
    pub status: ProcessingStatus,
    pub metadata: DocumentMetadata,
    pub entity_links: EntityLinks,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    #[must_use]
    pub fn new(name: String, file_path: String, format: DocumentFormat) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name,
            file_path,
            format,
            status: ProcessingStatus::Pending,
            metadata: DocumentMetadata::new(),
            entity_links: EntityLinks::new(),
            processing_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a document record from a file path, detecting the format from
    /// the extension.
    pub fn from_path(path: &std::path::Path) -> crate::Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| crate::Error::UnsupportedFormat("no extension".into()))?;

        let format = DocumentFormat::from_extension(ext)
            .ok_or_else(|| crate::Error::UnsupportedFormat(ext.to_string()))?;

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();

        Ok(Self::new(name, path.to_string_lossy().to_string(), format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(DocumentFormat::from_extension("pdf"), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_extension("DOCX"), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_extension("odt"), None);
    }

    #[test]
    fn test_document_from_path() {
        let doc = Document::from_path(std::path::Path::new("/tmp/report.pdf")).unwrap();
        assert_eq!(doc.format, DocumentFormat::Pdf);
        assert_eq!(doc.name, "report.pdf");
        assert_eq!(doc.status, ProcessingStatus::Pending);

        let err = Document::from_path(std::path::Path::new("/tmp/report.odt"));
        assert!(matches!(err, Err(crate::Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Success,
            ProcessingStatus::Failed,
        ] {
            let parsed: ProcessingStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
