use crate::error::RagError;
use lopdf::Document;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, RagError>;

    /// Full document text, pages concatenated in page order.
    fn extract_text(&self, bytes: &[u8]) -> Result<String, RagError> {
        let pages = self.extract_pages(bytes)?;
        let text = pages.into_iter().map(|page| page.text).collect::<String>();

        if text.trim().is_empty() {
            return Err(RagError::Extraction(
                "document contains no extractable text".to_string(),
            ));
        }

        Ok(text)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, RagError> {
        let document =
            Document::load_mem(bytes).map_err(|error| RagError::Extraction(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| RagError::Extraction(format!("page {page_no}: {error}")))?;
            debug!(page = page_no, chars = text.chars().count(), "extracted page");

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        if pages.iter().all(|page| page.text.trim().is_empty()) {
            return Err(RagError::Extraction(
                "pdf had no readable page text".to_string(),
            ));
        }

        info!(pages = pages.len(), "extracted text from pdf");
        Ok(pages)
    }
}

pub fn extract_text_from_path(
    extractor: &dyn PdfExtractor,
    path: &Path,
) -> Result<String, RagError> {
    let bytes = std::fs::read(path)
        .map_err(|error| RagError::Extraction(format!("{}: {error}", path.display())))?;
    extractor.extract_text(&bytes)
}
