use crate::error::{RagError, Result};
use log::{debug, info, warn};
use mime_guess::from_path;
use pdf_extract::extract_text;
use std::fs;
use std::path::{Path, PathBuf};

/// A loaded source file. Only its chunks outlive ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    /// Extracted text content
    pub content: String,
    /// Path the document was loaded from
    pub path: PathBuf,
    /// The document's MIME type
    pub mime_type: String,
}

impl Document {
    /// Load a PDF or plain-text document from a file path
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<Self> {
        let path = file_path.as_ref();
        if !path.is_file() {
            return Err(RagError::Document(format!(
                "File not found: {}",
                path.display()
            )));
        }

        let mime_type = from_path(path).first_or_octet_stream().to_string();
        debug!("Detected MIME type: {}", mime_type);

        let content = read_document_content(path, &mime_type)?;

        Ok(Document {
            content,
            path: path.to_path_buf(),
            mime_type,
        })
    }
}

/// Read content from a document based on its MIME type
pub fn read_document_content<P: AsRef<Path>>(file_path: P, mime_type: &str) -> Result<String> {
    let path = file_path.as_ref();

    let content = match mime_type {
        mime if mime.starts_with("application/pdf") => {
            info!("Extracting text from PDF: {}", path.display());
            let raw = extract_text(path).map_err(|e| {
                RagError::Document(format!(
                    "Failed to extract text from PDF {}: {}",
                    path.display(),
                    e
                ))
            })?;
            normalize_whitespace(&raw)
        }

        mime if mime.starts_with("text/") => {
            info!("Reading text document: {}", path.display());
            fs::read_to_string(path).map_err(|e| {
                RagError::Document(format!("Failed to read {}: {}", path.display(), e))
            })?
        }

        _ => {
            return Err(RagError::Document(format!(
                "Unsupported document format: {}. Only text and PDF files are supported.",
                mime_type
            )))
        }
    };

    if content.trim().is_empty() {
        warn!("No text extracted from {}", path.display());
    }

    Ok(content)
}

/// Collapse space runs, drop carriage returns and keep at most one blank line
fn normalize_whitespace(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut prev_char = ' ';
    let mut newline_count = 0;

    for c in text.chars().filter(|&c| c != '\r') {
        if c == '\n' {
            newline_count += 1;
            continue;
        }

        if newline_count > 0 {
            normalized.push_str(if newline_count >= 2 { "\n\n" } else { "\n" });
            newline_count = 0;
            prev_char = '\n';
        }

        if !(c == ' ' && prev_char == ' ') {
            normalized.push(c);
        }
        prev_char = c;
    }

    normalized.trim().to_string()
}
