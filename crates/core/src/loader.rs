use crate::error::IngestError;
use crate::extractor::{extract_page_texts, read_docx};
use crate::models::Document;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Loads files into documents: PDFs page by page, DOCX and TXT as a single document.
pub fn load_documents(paths: &[PathBuf]) -> Result<Vec<Document>, IngestError> {
    let mut docs = Vec::new();

    for path in paths {
        let source = path.to_string_lossy().to_string();
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => {
                for page in extract_page_texts(path)? {
                    docs.push(
                        Document::new(page.text)
                            .with_source(source.clone())
                            .with_page(page.number),
                    );
                }
            }
            "docx" => docs.push(Document::new(read_docx(path)?).with_source(source)),
            "txt" => docs.push(Document::new(fs::read_to_string(path)?).with_source(source)),
            _ => {
                warn!(path = %path.display(), "unsupported extension skipped");
                continue;
            }
        }
    }

    info!(count = docs.len(), "documents loaded");
    Ok(docs)
}

/// Joins documents behind `--- SOURCE: ... ---` markers.
pub fn concat_for_analysis(docs: &[Document]) -> String {
    docs.iter()
        .map(|doc| {
            let source = doc.metadata.source.as_deref().unwrap_or("unknown");
            format!("\n--- SOURCE: {source} ---\n{}", doc.page_content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn concat_for_comparison(reference: &[Document], actual: &[Document]) -> String {
    format!(
        "<<REFERENCE_DOCUMENTS>>\n{}\n\n<<ACTUAL_DOCUMENTS>>\n{}",
        concat_for_analysis(reference),
        concat_for_analysis(actual)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_docx, write_pdf};
    use tempfile::tempdir;

    #[test]
    fn loads_each_supported_kind() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("a.pdf");
        let docx = dir.path().join("b.docx");
        let txt = dir.path().join("c.TXT");
        let other = dir.path().join("d.csv");
        write_pdf(&pdf, &["one", "two"])?;
        write_docx(&docx, &["word text"])?;
        fs::write(&txt, "plain text")?;
        fs::write(&other, "x,y")?;

        let docs = load_documents(&[pdf.clone(), docx, txt, other])?;
        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0].metadata.page, Some(1));
        assert_eq!(docs[1].metadata.page, Some(2));
        assert_eq!(
            docs[0].metadata.source.as_deref(),
            Some(pdf.to_string_lossy().as_ref())
        );
        assert_eq!(docs[2].page_content, "word text");
        assert_eq!(docs[3].page_content, "plain text");
        Ok(())
    }

    #[test]
    fn analysis_concat_marks_sources() {
        let docs = vec![
            Document::new("alpha").with_source("a.pdf"),
            Document::new("beta"),
        ];
        assert_eq!(
            concat_for_analysis(&docs),
            "\n--- SOURCE: a.pdf ---\nalpha\n\n--- SOURCE: unknown ---\nbeta"
        );
    }

    #[test]
    fn comparison_concat_labels_both_sides() {
        let left = vec![Document::new("old").with_source("ref.pdf")];
        let right = vec![Document::new("new").with_source("act.pdf")];
        let combined = concat_for_comparison(&left, &right);
        assert!(combined.starts_with("<<REFERENCE_DOCUMENTS>>\n"));
        assert!(combined.contains("\n\n<<ACTUAL_DOCUMENTS>>\n"));
        assert!(combined.ends_with("act.pdf ---\nnew"));
    }
}
