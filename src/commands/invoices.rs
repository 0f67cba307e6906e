use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{InvoiceRecord, InvoiceSummary, StoredInvoice, WorkflowStatus};
use crate::services::archive::{archive_file_name, build_batch_archive, invoice_file_name};
use crate::services::clients::find_client;
use crate::services::render::render_invoice_pdf;
use crate::services::review::{self, client_from_record, InvoiceEdit};
use crate::services::state::AppState;
use crate::utils::today_stamp;

pub fn get_invoices(state: &AppState) -> Result<Vec<InvoiceSummary>> {
    Ok(state.db.get_invoice_summaries()?)
}

pub fn get_invoice_detail(state: &AppState, invoice_id: &str) -> Result<StoredInvoice> {
    state.invoice(invoice_id)
}

/// Applies one edit. A confirmed invoice goes back to review.
pub fn update_invoice(state: &AppState, invoice_id: &str, edit: InvoiceEdit) -> Result<StoredInvoice> {
    let mut invoice = state.invoice(invoice_id)?;
    let recalculated = review::apply_edit(&mut invoice.record, edit)?;
    reopen(&mut invoice);
    state.save_invoice(&mut invoice)?;
    info!(invoice_id, recalculated, "Invoice edited");
    Ok(invoice)
}

/// Fills the client block from the roster entry with this exact name.
pub fn apply_client(state: &AppState, invoice_id: &str, client_name: &str) -> Result<StoredInvoice> {
    let client = find_client(state.clients(), client_name)
        .ok_or_else(|| anyhow!("Unknown client: {}", client_name))?
        .clone();
    let mut invoice = state.invoice(invoice_id)?;
    review::apply_client(&mut invoice.record, &client);
    reopen(&mut invoice);
    state.save_invoice(&mut invoice)?;
    Ok(invoice)
}

/// Stores the invoice's client block in the roster.
pub fn save_invoice_client(state: &mut AppState, invoice_id: &str) -> Result<()> {
    let invoice = state.invoice(invoice_id)?;
    let client = client_from_record(&invoice.record);
    if client.name.is_empty() {
        bail!("Invoice {} has no client name to save", invoice_id);
    }
    info!(client = %client.name, "Saving client from invoice");
    state.upsert_client(client)
}

pub fn confirm_invoice(state: &AppState, invoice_id: &str) -> Result<()> {
    if !state.db.set_invoice_status(invoice_id, WorkflowStatus::Confirmed)? {
        bail!("Invoice not found: {}", invoice_id);
    }
    Ok(())
}

/// Writes one confirmed invoice as a PDF into `out_dir`.
pub fn export_invoice(state: &AppState, invoice_id: &str, out_dir: &Path) -> Result<PathBuf> {
    let invoice = state.invoice(invoice_id)?;
    if invoice.status != WorkflowStatus::Confirmed {
        bail!("Invoice {} is still in review, confirm it before exporting", invoice_id);
    }
    let pdf = render_invoice_pdf(&invoice.record, state.settings())?;
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(invoice_file_name(&invoice.record, 0));
    std::fs::write(&path, pdf).with_context(|| format!("Write {}", path.display()))?;
    info!(path = %path.display(), "Exported invoice");
    Ok(path)
}

/// Packs the given invoices into one ZIP in `out_dir` and marks them confirmed.
/// Refused unless the caller states the data was verified.
pub fn archive_invoices(state: &AppState, invoice_ids: &[String], out_dir: &Path, verified: bool) -> Result<PathBuf> {
    if !verified {
        bail!("Refusing to archive unverified invoices, pass --verified once every record was checked");
    }
    if invoice_ids.is_empty() {
        bail!("No invoices to archive");
    }
    let invoices = invoice_ids
        .iter()
        .map(|id| state.invoice(id))
        .collect::<Result<Vec<_>>>()?;
    let records: Vec<_> = invoices.iter().map(|invoice| invoice.record.clone()).collect();
    let path = write_archive(state, &records, out_dir)?;
    for invoice in &invoices {
        state.db.set_invoice_status(&invoice.id, WorkflowStatus::Confirmed)?;
    }
    Ok(path)
}

pub(crate) fn write_archive(state: &AppState, records: &[InvoiceRecord], out_dir: &Path) -> Result<PathBuf> {
    let bytes = build_batch_archive(records, state.settings())?;
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(archive_file_name(&today_stamp()));
    std::fs::write(&path, bytes).with_context(|| format!("Write {}", path.display()))?;
    info!(path = %path.display(), invoices = records.len(), "Wrote batch archive");
    Ok(path)
}

fn reopen(invoice: &mut StoredInvoice) {
    if invoice.status == WorkflowStatus::Confirmed {
        info!(invoice_id = %invoice.id, "Edited confirmed invoice, back to review");
        invoice.status = WorkflowStatus::Review;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Client, LineItem};
    use crate::services::review::{InvoiceField, ItemField};

    fn state() -> AppState {
        AppState::new(Database::open_in_memory().unwrap()).unwrap()
    }

    fn stored(state: &AppState, number: &str) -> StoredInvoice {
        let record = InvoiceRecord {
            invoice_number: number.to_string(),
            client_name: "Acme".to_string(),
            tax_rate: 21.0,
            items: vec![LineItem {
                description: "Pallet".to_string(),
                quantity: 2.0,
                unit_price: 10.0,
                total: 20.0,
            }],
            subtotal: 20.0,
            tax_amount: 4.2,
            total: 24.2,
            source_filename: format!("{}.pdf", number),
            ..InvoiceRecord::default()
        };
        state.store_processed(record, "hash").unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("albafactura-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn edit_recalculates_and_persists() {
        let state = state();
        let invoice = stored(&state, "A-1");
        update_invoice(
            &state,
            &invoice.id,
            InvoiceEdit::SetItem {
                position: 1,
                field: ItemField::Quantity,
                value: "3".to_string(),
            },
        )
        .unwrap();

        let loaded = get_invoice_detail(&state, &invoice.id).unwrap();
        assert_eq!(loaded.record.subtotal, 30.0);
        assert_eq!(loaded.record.tax_amount, 6.3);
        let summaries = get_invoices(&state).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, "review");
    }

    #[test]
    fn editing_confirmed_invoice_reopens_it() {
        let state = state();
        let invoice = stored(&state, "A-1");
        confirm_invoice(&state, &invoice.id).unwrap();
        assert_eq!(state.invoice(&invoice.id).unwrap().status, WorkflowStatus::Confirmed);

        let edited = update_invoice(
            &state,
            &invoice.id,
            InvoiceEdit::SetField {
                field: InvoiceField::Notes,
                value: "Deliver Monday".to_string(),
            },
        )
        .unwrap();
        assert_eq!(edited.status, WorkflowStatus::Review);
        assert_eq!(state.invoice(&invoice.id).unwrap().status, WorkflowStatus::Review);
    }

    #[test]
    fn client_round_trip_through_roster() {
        let mut state = state();
        let invoice = stored(&state, "A-1");
        update_invoice(
            &state,
            &invoice.id,
            InvoiceEdit::SetField {
                field: InvoiceField::ClientCif,
                value: "B77".to_string(),
            },
        )
        .unwrap();
        save_invoice_client(&mut state, &invoice.id).unwrap();
        assert_eq!(state.clients()[0].tax_id, "B77");

        state
            .upsert_client(Client {
                name: "Globex".to_string(),
                address: "Ring Rd".to_string(),
                tax_id: "B2".to_string(),
            })
            .unwrap();
        let applied = apply_client(&state, &invoice.id, "globex").unwrap();
        assert_eq!(applied.record.client_name, "Globex");
        assert_eq!(applied.record.client_address, "Ring Rd");
        assert!(apply_client(&state, &invoice.id, "Nobody").is_err());
    }

    #[test]
    fn export_requires_confirmation() {
        let state = state();
        let invoice = stored(&state, "A/7");
        let dir = temp_dir("export");
        assert!(export_invoice(&state, &invoice.id, &dir).is_err());

        confirm_invoice(&state, &invoice.id).unwrap();
        let path = export_invoice(&state, &invoice.id, &dir).unwrap();
        assert_eq!(path.file_name().unwrap(), "Invoice-A-7.pdf");
        assert!(std::fs::read(&path).unwrap().starts_with(b"%PDF"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn archive_needs_verification_and_confirms() {
        let state = state();
        let first = stored(&state, "A-1");
        let second = stored(&state, "A-2");
        let ids = vec![first.id.clone(), second.id.clone()];
        let dir = temp_dir("archive");

        assert!(archive_invoices(&state, &ids, &dir, false).is_err());
        assert_eq!(state.invoice(&first.id).unwrap().status, WorkflowStatus::Review);

        let path = archive_invoices(&state, &ids, &dir, true).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Invoices_Batch_"));
        assert!(name.ends_with(".zip"));
        let archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        assert_eq!(state.invoice(&second.id).unwrap().status, WorkflowStatus::Confirmed);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn unknown_ids_are_reported() {
        let state = state();
        assert!(confirm_invoice(&state, "missing").is_err());
        assert!(get_invoice_detail(&state, "missing").is_err());
    }
}
