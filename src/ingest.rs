//! Page-level document loading.
//!
//! PDF text extraction is delegated to poppler's `pdftotext`; plain-text and
//! markdown files are read directly as a single page.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::chunk::ChunkMetadata;
use crate::error::{DocQaError, Result};

/// Extensions picked up when ingesting a directory.
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "md"];

/// Text of one page plus its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Extracted page text.
    pub content: String,
    /// `source` = file name, `file_path` = full path, `page` = zero-based.
    pub metadata: ChunkMetadata,
}

impl PageRecord {
    /// Pairs text with metadata.
    pub fn new(content: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Turns a file into page records.
pub trait DocumentLoader: Send + Sync {
    /// Loads every non-blank page of `path`.
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>>;
}

/// Runs `pdftotext -layout -enc UTF-8 <file> -` and splits on form feeds.
#[derive(Debug, Clone)]
pub struct PdftotextLoader {
    program: PathBuf,
}

impl Default for PdftotextLoader {
    fn default() -> Self {
        Self {
            program: PathBuf::from("pdftotext"),
        }
    }
}

impl PdftotextLoader {
    /// Uses a specific `pdftotext` binary.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DocumentLoader for PdftotextLoader {
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>> {
        ensure_file(path)?;
        let output = Command::new(&self.program)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .output()
            .map_err(|err| {
                tracing::warn!(
                    program = %self.program.display(),
                    error = %err,
                    "failed to run pdftotext"
                );
                DocQaError::Io(err)
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocQaError::Input(format!(
                "pdftotext failed on {}: {}",
                path.display(),
                stderr.trim()
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let pages = pages_from_form_feeds(path, &text);
        tracing::debug!(path = %path.display(), pages = pages.len(), "extracted pdf text");
        Ok(pages)
    }
}

/// Reads UTF-8 text files as page 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFileLoader;

impl DocumentLoader for TextFileLoader {
    fn load(&self, path: &Path) -> Result<Vec<PageRecord>> {
        ensure_file(path)?;
        let text = fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![PageRecord::new(text, page_metadata(path, 0))])
    }
}

/// Picks a loader by file extension; unsupported extensions are `Input`.
pub fn loader_for(path: &Path) -> Result<Box<dyn DocumentLoader>> {
    match extension_of(path).as_deref() {
        Some("pdf") => Ok(Box::new(PdftotextLoader::default())),
        Some("txt") | Some("md") => Ok(Box::new(TextFileLoader)),
        _ => Err(DocQaError::Input(format!(
            "unsupported document type: {}",
            path.display()
        ))),
    }
}

/// Supported documents under `path`, canonicalized and in sorted order.
pub fn collect_documents(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(DocQaError::not_found(path));
    }
    let root = fs::canonicalize(path)?;
    if root.is_file() {
        return Ok(vec![root]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            DocQaError::Io(
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory walk failed")),
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let supported = extension_of(entry.path())
            .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false);
        if supported {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Absolute, symlink-free spelling of `path`; unresolvable paths are returned unchanged.
///
/// Stored `file_path` metadata uses this form so one file is indexed once no
/// matter how it was reached.
pub fn canonical_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn pages_from_form_feeds(path: &Path, text: &str) -> Vec<PageRecord> {
    text.split('\u{c}')
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(idx, page)| PageRecord::new(page, page_metadata(path, idx as u32)))
        .collect()
}

fn page_metadata(path: &Path, page: u32) -> ChunkMetadata {
    let source = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let file_path = canonical_path(path).display().to_string();
    ChunkMetadata::for_page(source, file_path, page)
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(DocQaError::not_found(path));
    }
    Ok(())
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_feeds_become_zero_based_pages() {
        let pages = pages_from_form_feeds(
            Path::new("/docs/manual.pdf"),
            "intro text\u{c}  \n\u{c}third page\u{c}",
        );
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].content, "intro text");
        assert_eq!(pages[0].metadata.page, Some(0));
        assert_eq!(pages[1].metadata.page, Some(2));
        assert_eq!(pages[1].metadata.source, "manual.pdf");
        assert_eq!(pages[1].metadata.file_path.as_deref(), Some("/docs/manual.pdf"));
    }

    #[test]
    fn text_loader_reads_single_page() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.md");
        fs::write(&path, "# Notes\n\nSome content.").expect("write");
        let pages = TextFileLoader.load(&path).expect("load");
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].metadata.source, "notes.md");
        assert_eq!(pages[0].metadata.page, Some(0));
    }

    #[test]
    fn missing_files_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.pdf");
        assert!(matches!(
            PdftotextLoader::default().load(&missing),
            Err(DocQaError::NotFound { .. })
        ));
        assert!(matches!(
            collect_documents(&missing),
            Err(DocQaError::NotFound { .. })
        ));
    }

    #[test]
    fn directory_walk_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = fs::canonicalize(dir.path()).expect("canonicalize");
        fs::create_dir(root.join("sub")).expect("mkdir");
        for name in ["b.txt", "a.PDF", "skip.docx", "sub/c.md"] {
            fs::write(root.join(name), "x").expect("write");
        }
        let names: Vec<String> = collect_documents(dir.path())
            .expect("collect")
            .iter()
            .map(|p| {
                p.strip_prefix(&root)
                    .expect("prefix")
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        assert_eq!(names, vec!["a.PDF", "b.txt", "sub/c.md"]);
    }

    #[test]
    fn path_spellings_collapse_to_one_canonical_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let docs = dir.path().join("docs");
        fs::create_dir(&docs).expect("mkdir");
        fs::write(docs.join("a.txt"), "alpha beta gamma").expect("write");

        let plain = collect_documents(&docs).expect("collect");
        let dotted = collect_documents(&docs.join(".")).expect("collect");
        assert_eq!(plain, dotted);

        let via_parent = docs.join("..").join("docs").join("a.txt");
        let pages = TextFileLoader.load(&via_parent).expect("load");
        assert_eq!(
            pages[0].metadata.file_path.as_deref(),
            Some(canonical_path(&docs.join("a.txt")).display().to_string().as_str())
        );
    }

    #[test]
    fn loader_selection_by_extension() {
        assert!(loader_for(Path::new("x.pdf")).is_ok());
        assert!(loader_for(Path::new("x.TXT")).is_ok());
        assert!(matches!(
            loader_for(Path::new("x.docx")),
            Err(DocQaError::Input(_))
        ));
    }
}
