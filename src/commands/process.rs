use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::models::{StoredInvoice, WorkflowStatus};
use crate::services::extraction::InvoiceExtractor;
use crate::services::processor::{
    check_batch_size, collect_documents, process_batch, process_document, SkippedDocument, SourceDocument,
};
use crate::services::state::AppState;

use super::invoices::write_archive;

#[derive(Debug, Default)]
pub struct ProcessRequest {
    pub files: Vec<PathBuf>,
    pub dir: Option<PathBuf>,
    pub archive_to: Option<PathBuf>,
    pub verified: bool,
}

#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub stored: Vec<StoredInvoice>,
    pub skipped: Vec<SkippedDocument>,
    pub archive: Option<PathBuf>,
}

/// Runs extraction and reconciliation over the requested documents and stores
/// the results as drafts in review. One document is single mode and fails
/// loudly; several are a batch where failures are skipped.
pub async fn process_invoices(
    state: &AppState,
    extractor: &dyn InvoiceExtractor,
    request: ProcessRequest,
) -> Result<ProcessOutcome> {
    if request.archive_to.is_some() && !request.verified {
        bail!("Refusing to archive unverified invoices, pass --verified together with --archive-to");
    }

    let mut paths = request.files;
    if let Some(dir) = &request.dir {
        let found = collect_documents(dir);
        info!(dir = %dir.display(), documents = found.len(), "Collected documents");
        paths.extend(found);
    }
    check_batch_size(paths.len())?;

    let single = paths.len() == 1;
    let (documents, mut skipped) = load_documents(state, &paths)?;
    if documents.is_empty() {
        bail!("None of the {} documents could be read", paths.len());
    }

    let snapshot = state.snapshot();
    let mut outcome = ProcessOutcome::default();

    if single {
        let document = &documents[0];
        match process_document(extractor, document, &snapshot).await {
            Ok(record) => outcome.stored.push(state.store_processed(record, &document.sha256)?),
            Err(e) => {
                error!(filename = %document.filename, error = %e, "Extraction failed");
                state.log_failure(&document.filename, Some(&document.sha256), &e.to_string())?;
                return Err(e.into());
            }
        }
    } else {
        let report = process_batch(extractor, &documents, &snapshot).await?;
        for done in report.processed {
            outcome.stored.push(state.store_processed(done.record, &done.source_hash)?);
        }
        for failed in &report.skipped {
            state.log_failure(&failed.filename, Some(&failed.source_hash), &failed.reason)?;
        }
        skipped.extend(report.skipped);
    }
    outcome.skipped = skipped;

    if let Some(out_dir) = &request.archive_to {
        if outcome.stored.is_empty() {
            warn!("Nothing processed, no archive written");
        } else {
            let records: Vec<_> = outcome.stored.iter().map(|s| s.record.clone()).collect();
            outcome.archive = Some(write_archive(state, &records, out_dir)?);
            for invoice in outcome.stored.iter_mut() {
                state.db.set_invoice_status(&invoice.id, WorkflowStatus::Confirmed)?;
                invoice.status = WorkflowStatus::Confirmed;
            }
        }
    }

    Ok(outcome)
}

/// Unreadable files are logged and left out of the batch.
fn load_documents(state: &AppState, paths: &[PathBuf]) -> Result<(Vec<SourceDocument>, Vec<SkippedDocument>)> {
    let mut documents = Vec::new();
    let mut skipped = Vec::new();
    for path in paths {
        match SourceDocument::load(path) {
            Ok(document) => documents.push(document),
            Err(e) => {
                let filename = display_name(path);
                warn!(path = %path.display(), error = %e, "Could not read document");
                state.log_failure(&filename, None, &e.to_string())?;
                skipped.push(SkippedDocument {
                    filename,
                    source_hash: String::new(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok((documents, skipped))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
