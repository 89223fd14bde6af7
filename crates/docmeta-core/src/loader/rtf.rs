use std::path::Path;

use super::convert::{run_chain, RTF_CONVERTERS};
use super::{DocumentPage, LoadResult};

/// Destinations whose content is markup, not document text.
const SKIPPED_DESTINATIONS: &[&str] = &[
    "fonttbl",
    "colortbl",
    "stylesheet",
    "info",
    "pict",
    "object",
    "header",
    "footer",
    "footnote",
];

/// Strip RTF control codes directly; fall back to the external converter
/// chain when stripping yields nothing (e.g. exotic or broken markup).
pub async fn load(path: &Path) -> LoadResult<Vec<DocumentPage>> {
    let bytes = tokio::fs::read(path).await?;
    let raw = String::from_utf8_lossy(&bytes);

    let text = strip_rtf(&raw);
    if !text.trim().is_empty() {
        return Ok(vec![DocumentPage::new(text)]);
    }

    tracing::warn!(path = %path.display(), "RTF strip produced no text, trying converters");
    let converted = run_chain(path, RTF_CONVERTERS).await?;
    Ok(vec![DocumentPage::new(converted)])
}

/// Minimal RTF reader: tracks group nesting, drops control words and
/// non-text destinations, decodes `\'hh` and `\uN` escapes.
#[must_use]
pub fn strip_rtf(input: &str) -> String {
    let mut out = String::new();
    let mut chars = input.chars().peekable();
    // One skip flag per open group; text inside a skipped group is dropped.
    let mut groups: Vec<bool> = vec![false];

    while let Some(c) = chars.next() {
        let skipping = *groups.last().unwrap_or(&false);

        match c {
            '{' => {
                let inherited = *groups.last().unwrap_or(&false);
                groups.push(inherited);
            }
            '}' => {
                if groups.len() > 1 {
                    groups.pop();
                }
            }
            '\\' => match chars.peek().copied() {
                Some('\\' | '{' | '}') => {
                    let literal = chars.next().unwrap_or_default();
                    if !skipping {
                        out.push(literal);
                    }
                }
                Some('~') => {
                    chars.next();
                    if !skipping {
                        out.push(' ');
                    }
                }
                Some('-' | '_') => {
                    chars.next();
                    if !skipping {
                        out.push('-');
                    }
                }
                Some('*') => {
                    chars.next();
                    // \* introduces a destination readers may ignore.
                    if let Some(last) = groups.last_mut() {
                        *last = true;
                    }
                }
                Some('\'') => {
                    chars.next();
                    let hex: String = (0..2).filter_map(|_| chars.next()).collect();
                    if !skipping {
                        if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                            let (decoded, _, _) =
                                encoding_rs::WINDOWS_1252.decode(std::slice::from_ref(&byte));
                            out.push_str(&decoded);
                        }
                    }
                }
                Some(d) if d.is_ascii_alphabetic() => {
                    let (word, param) = read_control_word(&mut chars);
                    if skipping {
                        continue;
                    }
                    if SKIPPED_DESTINATIONS.contains(&word.as_str()) {
                        if let Some(last) = groups.last_mut() {
                            *last = true;
                        }
                        continue;
                    }
                    match word.as_str() {
                        "par" | "line" | "sect" | "page" => out.push('\n'),
                        "tab" | "cell" => out.push('\t'),
                        "u" => {
                            if let Some(code) = param {
                                let code = if code < 0 { code + 65536 } else { code };
                                if let Some(ch) = u32::try_from(code).ok().and_then(char::from_u32)
                                {
                                    out.push(ch);
                                }
                                // The character following \uN is an ANSI
                                // fallback for non-unicode readers.
                                skip_unicode_fallback(&mut chars);
                            }
                        }
                        _ => {}
                    }
                }
                _ => {
                    chars.next();
                }
            },
            '\r' | '\n' => {}
            _ => {
                if !skipping {
                    out.push(c);
                }
            }
        }
    }

    out
}

fn read_control_word(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> (String, Option<i32>) {
    let mut word = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphabetic() {
            word.push(c);
            chars.next();
        } else {
            break;
        }
    }

    let mut digits = String::new();
    if chars.peek() == Some(&'-') {
        digits.push('-');
        chars.next();
    }
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            digits.push(c);
            chars.next();
        } else {
            break;
        }
    }

    // A single space after a control word is a delimiter, not text.
    if chars.peek() == Some(&' ') {
        chars.next();
    }

    (word, digits.parse().ok())
}

fn skip_unicode_fallback(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    match chars.peek() {
        Some('\\') => {
            let mut lookahead = chars.clone();
            lookahead.next();
            if lookahead.peek() == Some(&'\'') {
                // Consume the whole \'hh escape.
                chars.next();
                chars.next();
                chars.next();
                chars.next();
            }
        }
        Some(_) => {
            chars.next();
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_basic_document() {
        let rtf = r"{\rtf1\ansi{\fonttbl{\f0 Times New Roman;}}\f0\fs24 Hello, World!\par Second line.}";
        let text = strip_rtf(rtf);
        assert!(text.contains("Hello, World!"));
        assert!(text.contains("Second line."));
        assert!(!text.contains("Times New Roman"));
    }

    #[test]
    fn test_par_becomes_newline() {
        let text = strip_rtf(r"{\rtf1 one\par two}");
        assert_eq!(text.trim(), "one\ntwo");
    }

    #[test]
    fn test_hex_escape() {
        // \'e9 is é in the ANSI code page.
        let text = strip_rtf(r"{\rtf1 caf\'e9}");
        assert_eq!(text.trim(), "café");
    }

    #[test]
    fn test_unicode_escape_with_fallback() {
        let rtf = "{\\rtf1 \\u1055?\\u1088?\\u1080?\\u1074?\\u1077?\\u1090?}";
        assert_eq!(strip_rtf(rtf).trim(), "Привет");
    }

    #[test]
    fn test_skippable_destination_dropped() {
        let text = strip_rtf(r"{\rtf1 {\*\generator Acme Writer 2.0;}visible}");
        assert_eq!(text.trim(), "visible");
    }

    #[test]
    fn test_escaped_braces() {
        let text = strip_rtf(r"{\rtf1 a \{ b \} c}");
        assert_eq!(text.trim(), "a { b } c");
    }
}
