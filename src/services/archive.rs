use anyhow::{Context, Result};
use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::models::{CompanySettings, InvoiceRecord};
use crate::services::render::render_invoice_pdf;
use crate::utils::sanitize_file_component;

/// PDF file name for a record; `position` is 0-based and only used when the
/// record has no invoice number.
pub fn invoice_file_name(record: &InvoiceRecord, position: usize) -> String {
    let number = sanitize_file_component(&record.invoice_number);
    if number.is_empty() {
        format!("Invoice-{}.pdf", position + 1)
    } else {
        format!("Invoice-{}.pdf", number)
    }
}

pub fn archive_file_name(date_stamp: &str) -> String {
    format!("Invoices_Batch_{}.zip", date_stamp)
}

/// Renders every record and packs the PDFs into one ZIP, in record order.
pub fn build_batch_archive(records: &[InvoiceRecord], settings: &CompanySettings) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut used = HashSet::new();

    for (position, record) in records.iter().enumerate() {
        let name = unique_name(&mut used, invoice_file_name(record, position));
        let pdf = render_invoice_pdf(record, settings)
            .with_context(|| format!("Render {}", name))?;
        zip.start_file(name.clone(), options)
            .with_context(|| format!("Add {} to archive", name))?;
        zip.write_all(&pdf)?;
        info!(file = %name, bytes = pdf.len(), "Added invoice to archive");
    }

    let cursor = zip.finish().context("Finish archive")?;
    Ok(cursor.into_inner())
}

/// Same invoice number twice would otherwise collide inside the archive.
fn unique_name(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let stem = name.trim_end_matches(".pdf");
    let mut counter = 2;
    loop {
        let candidate = format!("{}-{}.pdf", stem, counter);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
