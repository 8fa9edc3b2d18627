use crate::error::IngestError;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor {
    pub reject_encrypted: bool,
}

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;
        self.pages_of(&document, path)
    }
}

impl LopdfExtractor {
    /// Page texts of an already parsed document; `path` only labels errors.
    pub fn pages_of(&self, document: &Document, path: &Path) -> Result<Vec<PageText>, IngestError> {
        if self.reject_encrypted && document.trailer.get(b"Encrypt").is_ok() {
            return Err(IngestError::PdfParse(format!(
                "PDF is encrypted: {}",
                display_name(path)
            )));
        }

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor::default().extract_pages(path)
}

/// Every page, blank ones included, behind a `--- Page N ---` marker.
pub fn read_pdf_for_analysis(path: &Path) -> Result<String, IngestError> {
    let pages = extract_page_texts(path)?;
    Ok(pages
        .iter()
        .map(|page| format!("\n--- Page {} ---\n{}", page.number, page.text))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Non-blank pages only; encrypted files are rejected.
pub fn read_pdf_for_comparison(path: &Path) -> Result<String, IngestError> {
    let extractor = LopdfExtractor {
        reject_encrypted: true,
    };
    let pages = extractor.extract_pages(path)?;
    Ok(pages
        .iter()
        .filter(|page| !page.text.trim().is_empty())
        .map(|page| format!("\n --- Page {} --- \n{}", page.number, page.text))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Paragraph text of `word/document.xml`, one paragraph per line.
pub fn read_docx(path: &Path) -> Result<String, IngestError> {
    let file = File::open(path)?;
    let mut archive =
        zip::ZipArchive::new(file).map_err(|error| IngestError::DocxParse(error.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|error| IngestError::DocxParse(error.to_string()))?
        .read_to_string(&mut xml)?;

    docx_xml_to_text(&xml)
}

fn docx_xml_to_text(xml: &str) -> Result<String, IngestError> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) if tag.name().as_ref() == b"w:t" => in_text = true,
            Ok(Event::End(tag)) => match tag.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Empty(tag)) => match tag.name().as_ref() {
                b"w:tab" => current.push('\t'),
                b"w:br" | b"w:cr" => current.push('\n'),
                b"w:p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::DocxParse(error.to_string()))?;
                current.push_str(&unescaped);
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(IngestError::DocxParse(error.to_string())),
            _ => {}
        }
    }

    if !current.is_empty() {
        paragraphs.push(current);
    }

    Ok(paragraphs.join("\n"))
}

pub(crate) fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
