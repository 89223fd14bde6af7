use std::path::Path;

use super::{DocumentPage, LoadError, LoadResult};

/// Candidate encodings, probed in order. The first that decodes the probe
/// window without error is used for the whole file.
const CANDIDATE_ENCODINGS: &[&str] = &["utf-8", "windows-1251", "koi8-r", "iso-8859-1"];

/// Characters to probe when sniffing the encoding.
const PROBE_CHARS: usize = 100;

pub async fn load(path: &Path) -> LoadResult<Vec<DocumentPage>> {
    let bytes = tokio::fs::read(path).await?;
    let text = decode(&bytes, path)?;
    Ok(vec![DocumentPage::new(text)])
}

fn decode(bytes: &[u8], path: &Path) -> LoadResult<String> {
    for label in CANDIDATE_ENCODINGS {
        let Some(encoding) = encoding_rs::Encoding::for_label(label.as_bytes()) else {
            continue;
        };

        if probe_decodes(encoding, bytes) {
            tracing::debug!(encoding = label, "detected text encoding");
            let (decoded, _, _) = encoding.decode(bytes);
            return Ok(decoded.into_owned());
        }
    }

    Err(LoadError::Encoding(path.display().to_string()))
}

/// Try decoding roughly the first `PROBE_CHARS` characters without errors.
fn probe_decodes(encoding: &'static encoding_rs::Encoding, bytes: &[u8]) -> bool {
    // Four bytes per character covers every candidate's worst case.
    let mut window = &bytes[..bytes.len().min(PROBE_CHARS * 4)];

    // Don't let a multi-byte sequence cut at the window edge fail the probe.
    if window.len() < bytes.len() && encoding == encoding_rs::UTF_8 {
        while !window.is_empty() && bytes[window.len() - 1] & 0b1100_0000 == 0b1000_0000 {
            window = &window[..window.len() - 1];
        }
        if !window.is_empty() && bytes[window.len() - 1] & 0b1100_0000 == 0b1100_0000 {
            window = &window[..window.len() - 1];
        }
    }

    let (_, _, had_errors) = encoding.decode(window);
    !had_errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_detected_first() {
        let text = decode("Привет, мир".as_bytes(), Path::new("a.txt")).unwrap();
        assert_eq!(text, "Привет, мир");
    }

    #[test]
    fn test_cp1251_fallback() {
        // "Привет" in windows-1251 is not valid UTF-8.
        let bytes: Vec<u8> = vec![0xCF, 0xF0, 0xE8, 0xE2, 0xE5, 0xF2];
        let text = decode(&bytes, Path::new("a.txt")).unwrap();
        assert_eq!(text, "Привет");
    }

    #[test]
    fn test_ascii_is_stable_across_candidates() {
        let text = decode(b"plain ascii text", Path::new("a.txt")).unwrap();
        assert_eq!(text, "plain ascii text");
    }

    #[test]
    fn test_probe_window_respects_utf8_boundaries() {
        // 100+ multibyte characters so the probe window cuts inside the text.
        let long = "ж".repeat(400);
        let text = decode(long.as_bytes(), Path::new("a.txt")).unwrap();
        assert_eq!(text, long);
    }
}
