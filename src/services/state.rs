use anyhow::{anyhow, Result};
use std::path::Path;
use tracing::info;

use crate::db::Database;
use crate::models::{Client, CompanySettings, InvoiceRecord, StoredInvoice, WorkflowStatus};
use crate::services::clients::save_client;
use crate::services::store::SettingsStore;
use crate::utils::now_rfc3339;

/// Read-only view of settings and roster handed to reconciliation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub settings: CompanySettings,
    pub clients: Vec<Client>,
}

pub struct AppState {
    pub db: Database,
    settings: CompanySettings,
    clients: Vec<Client>,
}

impl AppState {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db = Database::new(data_dir.join("albafactura.sqlite"))?;
        Self::new(db)
    }

    pub fn new(db: Database) -> Result<Self> {
        let store = SettingsStore::new(&db);
        let settings = store.load_settings()?;
        let clients = store.load_clients()?;
        info!(company = %settings.name, clients = clients.len(), "Loaded local state");
        Ok(AppState { db, settings, clients })
    }

    pub fn settings(&self) -> &CompanySettings {
        &self.settings
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            settings: self.settings.clone(),
            clients: self.clients.clone(),
        }
    }

    pub fn update_settings(&mut self, settings: CompanySettings) -> Result<()> {
        SettingsStore::new(&self.db).save_settings(&settings)?;
        self.settings = settings;
        Ok(())
    }

    pub fn upsert_client(&mut self, client: Client) -> Result<()> {
        let roster = save_client(&self.clients, client);
        SettingsStore::new(&self.db).save_clients(&roster)?;
        self.clients = roster;
        Ok(())
    }

    pub fn store_processed(&self, record: InvoiceRecord, source_hash: &str) -> Result<StoredInvoice> {
        let now = now_rfc3339();
        let invoice = StoredInvoice {
            id: uuid::Uuid::new_v4().to_string(),
            status: WorkflowStatus::Review,
            source_hash: source_hash.to_string(),
            record,
            created_at: now.clone(),
            updated_at: now,
        };
        self.db.upsert_invoice(&invoice)?;
        self.db.log_processing(
            Some(&invoice.id),
            Some(&invoice.record.source_filename),
            Some(source_hash),
            "extract",
            "success",
            None,
        )?;
        Ok(invoice)
    }

    pub fn log_failure(&self, filename: &str, source_hash: Option<&str>, message: &str) -> Result<()> {
        self.db
            .log_processing(None, Some(filename), source_hash, "extract", "failed", Some(message))?;
        Ok(())
    }

    pub fn invoice(&self, id: &str) -> Result<StoredInvoice> {
        self.db
            .get_invoice_by_id(id)?
            .ok_or_else(|| anyhow!("Invoice not found: {}", id))
    }

    pub fn save_invoice(&self, invoice: &mut StoredInvoice) -> Result<()> {
        invoice.updated_at = now_rfc3339();
        self.db.upsert_invoice(invoice)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AppState {
        AppState::new(Database::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn client_upsert_is_persisted() {
        let mut state = state();
        state
            .upsert_client(Client {
                name: "Acme".to_string(),
                address: "X".to_string(),
                tax_id: "B1".to_string(),
            })
            .unwrap();
        state
            .upsert_client(Client {
                name: "ACME".to_string(),
                address: "Y".to_string(),
                tax_id: "B2".to_string(),
            })
            .unwrap();
        assert_eq!(state.clients().len(), 1);

        let reloaded = SettingsStore::new(&state.db).load_clients().unwrap();
        assert_eq!(reloaded, state.clients());
        assert_eq!(reloaded[0].tax_id, "B2");
    }

    #[test]
    fn snapshot_is_detached_from_later_saves() {
        let mut state = state();
        let before = state.snapshot();
        state
            .update_settings(CompanySettings {
                name: "Alba SL".to_string(),
                ..CompanySettings::default()
            })
            .unwrap();
        assert_eq!(before.settings.name, "");
        assert_eq!(state.snapshot().settings.name, "Alba SL");
    }

    #[test]
    fn processed_records_start_in_review() {
        let state = state();
        let record = InvoiceRecord {
            source_filename: "n.pdf".to_string(),
            ..InvoiceRecord::default()
        };
        let stored = state.store_processed(record, "hash").unwrap();
        let loaded = state.invoice(&stored.id).unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Review);
        assert_eq!(loaded.source_hash, "hash");
        assert_eq!(state.db.count_processing_logs("success").unwrap(), 1);
        assert!(state.invoice("missing").is_err());
    }
}
