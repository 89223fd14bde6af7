mod convert;
mod doc;
mod docx;
mod pdf;
mod rtf;
mod txt;

use std::path::Path;

use thiserror::Error;

use crate::document::DocumentFormat;

pub use convert::{Converter, DOC_CONVERTERS, RTF_CONVERTERS};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("Could not determine text encoding: {0}")]
    Encoding(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LoadError> for crate::Error {
    fn from(e: LoadError) -> Self {
        match e {
            LoadError::NotFound(p) => Self::FileNotFound(p),
            LoadError::UnsupportedFormat(f) => Self::UnsupportedFormat(f),
            LoadError::ExtractionFailed(m) | LoadError::Encoding(m) => Self::ExtractionFailed(m),
            LoadError::Io(e) => Self::Io(e),
        }
    }
}

pub type LoadResult<T> = Result<T, LoadError>;

/// One page or section of extracted text. Every extractor produces this same
/// shape so downstream stages are format-agnostic.
#[derive(Debug, Clone)]
pub struct DocumentPage {
    pub content: String,
    pub page: Option<u32>,
}

impl DocumentPage {
    #[must_use]
    pub fn new(content: String) -> Self {
        Self {
            content,
            page: None,
        }
    }

    #[must_use]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// Load a document, dispatching on the file extension. Returns at least one
/// non-empty page or a documented error, never an empty success.
pub async fn load_document(path: &Path) -> LoadResult<Vec<DocumentPage>> {
    if !path.exists() {
        return Err(LoadError::NotFound(path.display().to_string()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| LoadError::UnsupportedFormat("no extension".into()))?;

    let format = DocumentFormat::from_extension(ext)
        .ok_or_else(|| LoadError::UnsupportedFormat(ext.to_string()))?;

    tracing::info!(path = %path.display(), format = %format, "loading document");

    let pages = match format {
        DocumentFormat::Pdf => pdf::load(path).await?,
        DocumentFormat::Docx => docx::load(path).await?,
        DocumentFormat::Doc => doc::load(path).await?,
        DocumentFormat::Txt => txt::load(path).await?,
        DocumentFormat::Rtf => rtf::load(path).await?,
    };

    if pages.iter().all(|p| p.content.trim().is_empty()) {
        return Err(LoadError::ExtractionFailed(format!(
            "no text extracted from {}",
            path.display()
        )));
    }

    tracing::info!(pages = pages.len(), "document loaded");
    Ok(pages)
}

/// Availability of the external tools the loaders shell out to.
#[must_use]
pub fn check_tools() -> Vec<(&'static str, bool)> {
    ["pdftotext", "pdfinfo", "soffice", "antiword", "catdoc", "unrtf"]
        .iter()
        .map(|tool| (*tool, which::which(tool).is_ok()))
        .collect()
}

/// Concatenate all page contents into one text, in page order.
#[must_use]
pub fn combine_pages(pages: &[DocumentPage]) -> String {
    pages
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let result = load_document(Path::new("/nonexistent/file.pdf")).await;
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_extension_is_unsupported() {
        let mut file = tempfile::Builder::new().suffix(".odt").tempfile().unwrap();
        file.write_all(b"irrelevant").unwrap();

        let result = load_document(file.path()).await;
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(_))));
    }

    #[tokio::test]
    async fn test_plain_text_happy_path() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all("Hello from a plain text file.".as_bytes())
            .unwrap();

        let pages = load_document(file.path()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert!(pages[0].content.contains("Hello"));
    }

    #[tokio::test]
    async fn test_empty_text_is_extraction_failure() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(b"   \n  ").unwrap();

        let result = load_document(file.path()).await;
        assert!(matches!(result, Err(LoadError::ExtractionFailed(_))));
    }

    #[test]
    fn test_combine_pages() {
        let pages = vec![
            DocumentPage::new("first page".into()).with_page(1),
            DocumentPage::new("second page".into()).with_page(2),
        ];
        assert_eq!(combine_pages(&pages), "first page second page");
    }
}
