//! Text extraction for uploaded files.

use crate::errors::CoreError;

/// Upload formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Pdf,
    PlainText,
}

/// Decides the file format from the upload's filename and content type,
/// falling back to a PDF magic-byte sniff. Anything else is rejected
/// before the pipeline touches the store.
pub fn detect_format(
    filename: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<FileFormat, CoreError> {
    if let Some(ct) = content_type {
        match ct {
            "application/pdf" => return Ok(FileFormat::Pdf),
            "text/plain" | "text/markdown" => return Ok(FileFormat::PlainText),
            _ => {}
        }
    }

    if let Some(name) = filename {
        let lower = name.to_lowercase();
        if lower.ends_with(".pdf") {
            return Ok(FileFormat::Pdf);
        }
        if lower.ends_with(".txt") || lower.ends_with(".md") {
            return Ok(FileFormat::PlainText);
        }
    }

    if bytes.starts_with(b"%PDF-") {
        return Ok(FileFormat::Pdf);
    }
    if std::str::from_utf8(bytes).is_ok() {
        return Ok(FileFormat::PlainText);
    }

    Err(CoreError::Validation(
        "unsupported file type: expected PDF, plain text, or markdown".to_string(),
    ))
}

/// Extracts the raw text of an upload. Empty output is an error: a
/// document with no text can never match a query.
pub fn extract_text(format: FileFormat, bytes: &[u8]) -> Result<String, CoreError> {
    let text = match format {
        FileFormat::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| CoreError::Validation(format!("failed to parse PDF: {e}")))?,
        FileFormat::PlainText => String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::Validation("file is not valid UTF-8".to_string()))?,
    };

    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(CoreError::Validation(
            "no text could be extracted from the file".to_string(),
        ));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_content_type() {
        assert_eq!(
            detect_format(None, Some("application/pdf"), b"").unwrap(),
            FileFormat::Pdf
        );
        assert_eq!(
            detect_format(None, Some("text/plain"), b"").unwrap(),
            FileFormat::PlainText
        );
    }

    #[test]
    fn test_detect_by_extension() {
        assert_eq!(
            detect_format(Some("resume.PDF"), None, b"").unwrap(),
            FileFormat::Pdf
        );
        assert_eq!(
            detect_format(Some("posting.md"), None, b"").unwrap(),
            FileFormat::PlainText
        );
    }

    #[test]
    fn test_detect_by_magic_bytes() {
        assert_eq!(
            detect_format(None, None, b"%PDF-1.7 ...").unwrap(),
            FileFormat::Pdf
        );
    }

    #[test]
    fn test_binary_garbage_rejected() {
        let err = detect_format(Some("resume.exe"), None, &[0xff, 0xfe, 0x00, 0x80]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_plain_text_extraction_trims() {
        let text = extract_text(FileFormat::PlainText, b"  rust engineer\n").unwrap();
        assert_eq!(text, "rust engineer");
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = extract_text(FileFormat::PlainText, b"   \n  ").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}
