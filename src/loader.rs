//! Per-file text extraction for knowledge-base documents.
//!
//! One file of a known type (.pdf, .docx, .txt) in, raw text with source
//! metadata out. Unrecognized extensions are a distinct, non-fatal error so
//! the pipeline can skip them; parse failures mark the document failed.
//! No side effects beyond reading.

use std::io::Read;
use std::path::Path;

use crate::models::LoadedDocument;

/// File extensions the ingestion pipeline picks up.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "docx", "txt"];

/// Maximum decompressed bytes read from a DOCX ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug)]
pub enum LoadError {
    /// Extension is not one of the supported types. Callers treat this as
    /// an empty result, not a failure.
    UnsupportedFormat(String),
    /// The file exists but could not be read or parsed.
    Read(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::UnsupportedFormat(ext) => write!(f, "unsupported file type: {}", ext),
            LoadError::Read(e) => write!(f, "failed to read document: {}", e),
        }
    }
}

impl std::error::Error for LoadError {}

/// Returns the lowercase extension if the file is a supported type.
pub fn supported_file_type(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

/// Load one file, dispatching on its extension.
pub fn load(path: &Path) -> Result<Vec<LoadedDocument>, LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let text = match ext.as_str() {
        "pdf" => load_pdf(path)?,
        "docx" => load_docx(path)?,
        "txt" => load_txt(path)?,
        _ => return Err(LoadError::UnsupportedFormat(ext)),
    };

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(vec![LoadedDocument {
        text,
        source: path.display().to_string(),
        filename,
    }])
}

fn load_txt(path: &Path) -> Result<String, LoadError> {
    std::fs::read_to_string(path).map_err(|e| LoadError::Read(e.to_string()))
}

fn load_pdf(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path).map_err(|e| LoadError::Read(e.to_string()))?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| LoadError::Read(e.to_string()))
}

/// DOCX is a ZIP archive; the body text lives in `word/document.xml` as
/// `<w:t>` runs.
fn load_docx(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path).map_err(|e| LoadError::Read(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.as_slice()))
        .map_err(|e| LoadError::Read(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| LoadError::Read("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| LoadError::Read(e.to_string()))?;
    }
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Read(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    extract_text_runs(&doc_xml)
}

fn extract_text_runs(xml: &[u8]) -> Result<String, LoadError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                } else if e.local_name().as_ref() == b"p" && !out.is_empty() {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_text_run => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(LoadError::Read(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
