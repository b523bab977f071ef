use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::Document;

/// Load every supported file under `dir`, recursively. A file that fails
/// to parse is logged and skipped so one corrupt PDF does not abort the
/// rest of the corpus.
pub fn load_documents(dir: &Path) -> Vec<Document> {
    let mut docs = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let loaded = match extension {
            "txt" | "md" => load_text(path),
            "pdf" => load_pdf(path),
            _ => continue,
        };

        match loaded {
            Ok(mut file_docs) => docs.append(&mut file_docs),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping file that failed to load");
            }
        }
    }

    info!(count = docs.len(), dir = %dir.display(), "Loaded documents");
    docs
}

fn load_text(path: &Path) -> Result<Vec<Document>> {
    let text = std::fs::read_to_string(path).context(format!("Failed to read file: {:?}", path))?;
    Ok(vec![Document {
        text,
        source: path.to_string_lossy().to_string(),
        page: None,
    }])
}

/// One `Document` per PDF page so source citations can carry a page number.
fn load_pdf(path: &Path) -> Result<Vec<Document>> {
    let pages = pdf_extract::extract_text_by_pages(path)
        .context(format!("Failed to extract text from PDF: {:?}", path))?;
    let source = path.to_string_lossy().to_string();

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| Document {
            text,
            source: source.clone(),
            page: Some(i as u32),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_text_files_and_skips_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("b.md"), "world").unwrap();
        std::fs::write(dir.path().join("c.bin"), [0u8, 1, 2]).unwrap();

        let mut docs = load_documents(dir.path());
        docs.sort_by(|a, b| a.source.cmp(&b.source));

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].text, "hello");
        assert_eq!(docs[1].text, "world");
        assert!(docs.iter().all(|d| d.page.is_none()));
    }

    #[test]
    fn corrupt_pdf_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.pdf"), "not a pdf").unwrap();
        std::fs::write(dir.path().join("ok.txt"), "fine").unwrap();

        let docs = load_documents(dir.path());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "fine");
    }

    #[test]
    fn walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("nested");
        std::fs::create_dir(&sub).unwrap();
        std::fs::write(sub.join("deep.txt"), "nested content").unwrap();

        let docs = load_documents(dir.path());
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].text, "nested content");
    }
}
