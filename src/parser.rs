//! Document parsing: one file path in, plain text out.
//!
//! Dispatches on the file extension. Plain formats are read directly
//! (with a lossy fallback for non-UTF-8 bytes); PDF goes through
//! `pdf_extract`; DOCX is unpacked from its ZIP container and the
//! `w:t` text runs collected paragraph by paragraph.
//!
//! Every failure here is a [`RagError::Parse`] scoped to the one file,
//! so a directory batch can record it and keep going.

use std::io::Read;
use std::path::Path;

use crate::error::{RagError, Result};

/// Extensions this parser understands.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["txt", "md", "pdf", "docx"];

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Parse one document into plain text.
pub fn parse_file(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" => read_plain_text(path),
        "pdf" => extract_pdf(&read_bytes(path)?),
        "docx" => extract_docx(&read_bytes(path)?),
        _ => Err(RagError::Parse(format!(
            "unsupported format for {} (supported: {})",
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RagError::Parse(format!("{}: {}", path.display(), e)))
}

fn read_plain_text(path: &Path) -> Result<String> {
    let bytes = read_bytes(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn extract_pdf(bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::Parse(format!("PDF extraction failed: {}", e)))
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::Parse(format!("DOCX container invalid: {}", e)))?;

    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| RagError::Parse("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| RagError::Parse(format!("DOCX read failed: {}", e)))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(RagError::Parse(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    docx_text(&xml)
}

/// Collect `w:t` text runs, separating paragraphs with blank lines.
fn docx_text(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.is_empty() && !out.ends_with("\n\n") {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::Parse(format!("DOCX XML invalid: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
