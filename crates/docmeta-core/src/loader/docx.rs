use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;

use super::{DocumentPage, LoadError, LoadResult};

/// Extract text directly from the DOCX XML body (`word/document.xml`),
/// producing a single segment with paragraph breaks preserved.
pub async fn load(path: &Path) -> LoadResult<Vec<DocumentPage>> {
    let bytes = tokio::fs::read(path).await?;
    let text = extract_text(&bytes)?;
    Ok(vec![DocumentPage::new(text)])
}

fn extract_text(bytes: &[u8]) -> LoadResult<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| LoadError::ExtractionFailed(format!("not a DOCX archive: {e}")))?;

    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| LoadError::ExtractionFailed(format!("missing document body: {e}")))?
        .read_to_string(&mut xml)
        .map_err(|e| LoadError::ExtractionFailed(format!("unreadable document body: {e}")))?;

    parse_document_xml(&xml)
}

fn parse_document_xml(xml: &str) -> LoadResult<String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"w:t" => in_run_text = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:br" => text.push('\n'),
                b"w:tab" => text.push('\t'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_run_text => {
                let run = t
                    .unescape()
                    .map_err(|e| LoadError::ExtractionFailed(format!("bad XML text: {e}")))?;
                text.push_str(&run);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(LoadError::ExtractionFailed(format!(
                    "malformed document XML: {e}"
                )))
            }
        }
    }

    Ok(text)
}
