//! Document-to-text: turning stored course files into source texts.
//!
//! Only `text/plain` is extracted here. Word documents are on the allow-list
//! but their parsing belongs to the host platform, so they report
//! [`DocumentError::NotAvailable`] like any other unsupported type.

use crate::error::DocumentError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tracing::debug;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PDF: &str = "application/pdf";

/// MIME types the course-selection form may offer for extraction.
pub fn is_allowed_text_mime(mime: &str) -> bool {
    matches!(mime, MIME_TEXT | MIME_DOCX | MIME_PDF)
}

/// Guess a MIME type from a file extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("txt" | "text" | "md") => MIME_TEXT,
        Some("docx") => MIME_DOCX,
        Some("pdf") => MIME_PDF,
        _ => "application/octet-stream",
    }
}

/// Extracts normalised plain text from a stored file.
#[async_trait]
pub trait DocumentToText: Send + Sync {
    async fn extract(&self, path: &Path, mime: &str) -> Result<String, DocumentError>;
}

/// Extractor for `text/plain` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait]
impl DocumentToText for PlainTextExtractor {
    async fn extract(&self, path: &Path, mime: &str) -> Result<String, DocumentError> {
        if mime != MIME_TEXT {
            return Err(DocumentError::NotAvailable {
                mime: mime.to_string(),
            });
        }
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| DocumentError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let text = normalize_text(&decode_text(&bytes));
        debug!(path = %path.display(), chars = text.chars().count(), "text extracted");
        Ok(text)
    }
}

/// Decode bytes as UTF-8, falling back to Windows-1252 / ISO-8859-1.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| windows_1252_char(b)).collect(),
    }
}

/// Windows-1252 differs from Latin-1 only in 0x80–0x9F.
fn windows_1252_char(b: u8) -> char {
    const HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8D}', 'Ž',
        '\u{8F}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9D}',
        'ž', 'Ÿ',
    ];
    match b {
        0x80..=0x9F => HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip non-printable characters (keeping whitespace), collapse whitespace
/// runs to one space, trim.
pub fn normalize_text(text: &str) -> String {
    let printable: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();
    RE_WHITESPACE.replace_all(&printable, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list() {
        assert!(is_allowed_text_mime("text/plain"));
        assert!(is_allowed_text_mime(MIME_DOCX));
        assert!(is_allowed_text_mime("application/pdf"));
        assert!(!is_allowed_text_mime("image/png"));
    }

    #[test]
    fn latin1_falls_back() {
        assert_eq!(decode_text(b"Gr\xFC\xDFe"), "Grüße");
        assert_eq!(decode_text(b"\x80 5"), "€ 5");
    }

    #[test]
    fn utf8_bom_is_dropped() {
        assert_eq!(decode_text("\u{FEFF}abc".as_bytes()), "abc");
    }

    #[test]
    fn normalisation_collapses_and_strips() {
        assert_eq!(normalize_text("  a\u{0007}b \n\n\t c  "), "ab c");
    }

    #[tokio::test]
    async fn plain_text_file_is_extracted() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "Line one\r\nLine   two\n").unwrap();
        let text = PlainTextExtractor.extract(&path, MIME_TEXT).await.unwrap();
        assert_eq!(text, "Line one Line two");
    }

    #[tokio::test]
    async fn word_is_not_available() {
        let err = PlainTextExtractor
            .extract(Path::new("x.docx"), MIME_DOCX)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::NotAvailable { .. }));
    }

    #[test]
    fn mime_guess() {
        assert_eq!(mime_from_path(Path::new("a/B.TXT")), MIME_TEXT);
        assert_eq!(mime_from_path(Path::new("a.docx")), MIME_DOCX);
    }
}
