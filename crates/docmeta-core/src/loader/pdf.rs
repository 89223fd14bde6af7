use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::{DocumentPage, LoadError, LoadResult};

/// Extract the PDF text layer with pdftotext (poppler), one page per
/// form-feed-separated segment.
pub async fn load(path: &Path) -> LoadResult<Vec<DocumentPage>> {
    let output = Command::new("pdftotext")
        .args(["-layout", "-enc", "UTF-8"])
        .arg(path)
        .arg("-")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LoadError::ExtractionFailed("pdftotext not found (install poppler-utils)".into())
            } else {
                LoadError::Io(e)
            }
        })?;

    if !output.status.success() {
        return Err(LoadError::ExtractionFailed(format!(
            "pdftotext failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let full_text = String::from_utf8_lossy(&output.stdout).to_string();

    // pdftotext separates pages with form feeds and appends a trailing one.
    let mut segments: Vec<String> = full_text.split('\x0C').map(str::to_string).collect();
    if segments.last().is_some_and(|s| s.trim().is_empty()) {
        segments.pop();
    }

    if let Some(expected) = page_count(path).await {
        if segments.len() != expected as usize {
            tracing::debug!(
                got = segments.len(),
                expected,
                "pdftotext page split did not match pdfinfo count"
            );
        }
    }

    Ok(segments
        .into_iter()
        .enumerate()
        .map(|(i, content)| DocumentPage::new(content).with_page(i as u32 + 1))
        .collect())
}

/// Page count via pdfinfo, best effort.
async fn page_count(path: &Path) -> Option<u32> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.starts_with("Pages:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|n| n.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_or_file_reports_extraction_failure() {
        // Whichever is missing (pdftotext or the input), the result must be a
        // loader error rather than a panic or empty success.
        let result = load(Path::new("/nonexistent/input.pdf")).await;
        assert!(result.is_err());
    }
}
