use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, Instrument};

use crate::config::MAX_BATCH_DOCUMENTS;
use crate::models::InvoiceRecord;
use crate::services::extraction::{ExtractionError, InvoiceExtractor};
use crate::services::reconciler::reconcile;
use crate::services::state::Snapshot;
use crate::utils::{is_supported_document, mime_type_for, sha256_bytes};

/// A delivery note loaded into memory, ready for extraction.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

impl SourceDocument {
    pub fn from_bytes(filename: &str, bytes: Vec<u8>) -> Self {
        SourceDocument {
            filename: filename.to_string(),
            mime_type: mime_type_for(Path::new(filename)).to_string(),
            sha256: sha256_bytes(&bytes),
            bytes,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("Not a file: {}", path.display()))?;
        let bytes = std::fs::read(path).with_context(|| format!("Read {}", path.display()))?;
        Ok(Self::from_bytes(&filename, bytes))
    }
}

/// Supported documents directly inside `folder`, sorted by file name.
pub fn collect_documents(folder: &Path) -> Vec<PathBuf> {
    let mut entries = walkdir::WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| is_supported_document(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect::<Vec<_>>();
    entries.sort();
    entries
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("At most {max} documents per batch, got {count}")]
    TooManyDocuments { count: usize, max: usize },
    #[error("No documents to process")]
    Empty,
}

#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub source_hash: String,
    pub record: InvoiceRecord,
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub filename: String,
    pub source_hash: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<ProcessedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

/// Extracts one document and reconciles it against the snapshot.
pub async fn process_document(
    extractor: &dyn InvoiceExtractor,
    document: &SourceDocument,
    snapshot: &Snapshot,
) -> Result<InvoiceRecord, ExtractionError> {
    let data = extractor.extract(document).await?;
    let raw = data.into_record(&document.filename);
    Ok(reconcile(raw, &snapshot.settings, &snapshot.clients))
}

pub fn check_batch_size(count: usize) -> Result<(), BatchError> {
    if count == 0 {
        return Err(BatchError::Empty);
    }
    if count > MAX_BATCH_DOCUMENTS {
        return Err(BatchError::TooManyDocuments {
            count,
            max: MAX_BATCH_DOCUMENTS,
        });
    }
    Ok(())
}

/// Processes documents one after another in input order. A document whose
/// extraction fails is logged and skipped; the rest still run. Oversized
/// batches are refused before the first extraction call.
pub async fn process_batch(
    extractor: &dyn InvoiceExtractor,
    documents: &[SourceDocument],
    snapshot: &Snapshot,
) -> Result<BatchReport, BatchError> {
    check_batch_size(documents.len())?;

    let total = documents.len();
    let mut report = BatchReport::default();
    for (index, document) in documents.iter().enumerate() {
        let span = tracing::info_span!("extract", index, filename = %document.filename);
        match process_document(extractor, document, snapshot)
            .instrument(span)
            .await
        {
            Ok(record) => report.processed.push(ProcessedDocument {
                source_hash: document.sha256.clone(),
                record,
            }),
            Err(e) => {
                error!(index, filename = %document.filename, error = %e, "Extraction failed, skipping document");
                report.skipped.push(SkippedDocument {
                    filename: document.filename.clone(),
                    source_hash: document.sha256.clone(),
                    reason: e.to_string(),
                });
            }
        }
        info!(done = index + 1, total, "Batch progress");
    }

    info!(
        processed = report.processed.len(),
        skipped = report.skipped.len(),
        "Batch finished"
    );
    Ok(report)
}
