//! Text extraction for uploaded files.
//!
//! The file extension selects the extractor: `.txt` and `.md` are decoded
//! as UTF-8, `.pdf` goes through `pdf-extract`, `.docx` is read from
//! `word/document.xml` with one output line per paragraph. Every failure is
//! reported as [`RagError::UnsupportedContent`]. Extraction is blocking
//! work; the orchestrator runs it on tokio's blocking pool.

use std::io::Read;
use std::path::Path;

use knowledge_rag_core::normalize::decode_text;
use knowledge_rag_core::RagError;

/// Extensions accepted for ingestion (lowercase, without the dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "pdf", "docx"];

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Lowercased extension of `filename`, if it has one.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Extract plain text from the raw bytes of `filename`.
pub fn extract_text(filename: &str, bytes: &[u8]) -> Result<String, RagError> {
    match extension_of(filename).as_deref() {
        Some("txt") | Some("md") => decode_text(bytes).map(str::to_string),
        Some("pdf") => extract_pdf(bytes),
        Some("docx") => extract_docx(bytes),
        Some(other) => Err(RagError::UnsupportedContent(format!(
            "unsupported file type '.{}' (expected one of: {})",
            other,
            SUPPORTED_EXTENSIONS.join(", ")
        ))),
        None => Err(RagError::UnsupportedContent(format!(
            "'{}' has no file extension",
            filename
        ))),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, RagError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::UnsupportedContent(format!("PDF extraction failed: {}", e)))
}

fn ooxml_error(e: impl std::fmt::Display) -> RagError {
    RagError::UnsupportedContent(format!("DOCX extraction failed: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_error)?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ooxml_error("word/document.xml not found"))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(ooxml_error)?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_error("word/document.xml exceeds size limit"));
    }

    extract_paragraphs(&doc_xml)
}

/// Collect `<w:t>` runs, ending each `<w:p>` paragraph with a newline.
/// Table cells are paragraphs too, so their text is included in order.
fn extract_paragraphs(xml: &[u8]) -> Result<String, RagError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(ooxml_error)?;
                out.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
