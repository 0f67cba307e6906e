use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::PathBuf;

use crate::models::{InvoiceRecord, InvoiceSummary, StoredInvoice, WorkflowStatus};
use crate::utils::now_rfc3339;

const MIGRATIONS: [(&str, &str); 3] = [
    (
        "001_create_settings.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/001_create_settings.sql")),
    ),
    (
        "002_create_invoices.sql",
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations/002_create_invoices.sql")),
    ),
    (
        "003_create_processing_logs_table.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/migrations/003_create_processing_logs_table.sql"
        )),
    ),
];

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn new(db_path: PathBuf) -> SqlResult<Self> {
        Self::from_connection(Connection::open(db_path)?)
    }

    pub fn open_in_memory() -> SqlResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> SqlResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let mut db = Database { conn };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&mut self) -> SqlResult<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            );",
        )?;

        for (name, sql) in MIGRATIONS {
            let applied: Option<String> = self
                .conn
                .query_row(
                    "SELECT name FROM schema_migrations WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()?;

            if applied.is_none() {
                let tx = self.conn.transaction()?;
                tx.execute_batch(sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (name, applied_at) VALUES (?1, datetime('now'))",
                    params![name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    pub fn set_setting(&self, key: &str, value: &str) -> SqlResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> SqlResult<Option<String>> {
        let mut stmt = self.conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
        stmt.query_row(params![key], |row| row.get(0)).optional()
    }

    pub fn upsert_invoice(&self, invoice: &StoredInvoice) -> SqlResult<()> {
        let record_json = serde_json::to_string(&invoice.record)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let record = &invoice.record;
        self.conn.execute(
            "INSERT OR REPLACE INTO invoices (
                id, status, source_filename, source_hash, invoice_number, client_name,
                total, item_count, record_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                invoice.id,
                invoice.status.as_str(),
                record.source_filename,
                invoice.source_hash,
                non_empty(&record.invoice_number),
                non_empty(&record.client_name),
                record.total,
                record.items.len() as i64,
                record_json,
                invoice.created_at,
                invoice.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn get_invoice_by_id(&self, id: &str) -> SqlResult<Option<StoredInvoice>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, source_hash, record_json, created_at, updated_at
             FROM invoices WHERE id = ?1",
        )?;
        stmt.query_row(params![id], stored_invoice_from_row).optional()
    }

    pub fn get_invoice_summaries(&self) -> SqlResult<Vec<InvoiceSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, invoice_number, client_name, total, item_count, source_filename, updated_at
             FROM invoices
             ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(InvoiceSummary {
                id: row.get(0)?,
                status: row.get(1)?,
                invoice_number: row.get(2)?,
                client_name: row.get(3)?,
                total: row.get(4)?,
                item_count: row.get(5)?,
                source_filename: row.get(6)?,
                updated_at: row.get(7)?,
            })
        })?;

        rows.collect()
    }

    pub fn set_invoice_status(&self, id: &str, status: WorkflowStatus) -> SqlResult<bool> {
        let changed = self.conn.execute(
            "UPDATE invoices SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn log_processing(
        &self,
        invoice_id: Option<&str>,
        source_filename: Option<&str>,
        file_hash: Option<&str>,
        process_type: &str,
        status: &str,
        message: Option<&str>,
    ) -> SqlResult<()> {
        self.conn.execute(
            "INSERT INTO processing_logs (id, invoice_id, source_filename, file_hash, process_type, status, message, created_at)
             VALUES (hex(randomblob(16)), ?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))",
            params![invoice_id, source_filename, file_hash, process_type, status, message],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn count_processing_logs(&self, status: &str) -> SqlResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM processing_logs WHERE status = ?1",
            params![status],
            |row| row.get(0),
        )
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn stored_invoice_from_row(row: &Row<'_>) -> SqlResult<StoredInvoice> {
    let status: String = row.get(1)?;
    let status = WorkflowStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            Type::Text,
            format!("unknown workflow status {}", status).into(),
        )
    })?;
    let record_json: String = row.get(3)?;
    let record: InvoiceRecord = serde_json::from_str(&record_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    Ok(StoredInvoice {
        id: row.get(0)?,
        status,
        source_hash: row.get(2)?,
        record,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invoice(id: &str) -> StoredInvoice {
        StoredInvoice {
            id: id.to_string(),
            status: WorkflowStatus::Review,
            source_hash: "abc".to_string(),
            record: InvoiceRecord {
                invoice_number: "A-1".to_string(),
                client_name: "Acme".to_string(),
                total: 12.1,
                source_filename: "note.pdf".to_string(),
                ..InvoiceRecord::default()
            },
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut db = Database::open_in_memory().unwrap();
        db.run_migrations().unwrap();
        let count: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn settings_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("missing").unwrap(), None);
        db.set_setting("k", "v1").unwrap();
        db.set_setting("k", "v2").unwrap();
        assert_eq!(db.get_setting("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn invoice_upsert_and_status() {
        let db = Database::open_in_memory().unwrap();
        let mut invoice = sample_invoice("inv-1");
        db.upsert_invoice(&invoice).unwrap();

        invoice.record.total = 30.0;
        db.upsert_invoice(&invoice).unwrap();

        let loaded = db.get_invoice_by_id("inv-1").unwrap().unwrap();
        assert_eq!(loaded.record.total, 30.0);
        assert_eq!(loaded.status, WorkflowStatus::Review);

        assert!(db.set_invoice_status("inv-1", WorkflowStatus::Confirmed).unwrap());
        assert!(!db.set_invoice_status("nope", WorkflowStatus::Confirmed).unwrap());
        let loaded = db.get_invoice_by_id("inv-1").unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Confirmed);
        assert_ne!(loaded.updated_at, invoice.updated_at);
        assert!(chrono::DateTime::parse_from_rfc3339(&loaded.updated_at).is_ok());

        let summaries = db.get_invoice_summaries().unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].invoice_number.as_deref(), Some("A-1"));
        assert_eq!(summaries[0].status, "confirmed");
    }

    #[test]
    fn processing_log_counts() {
        let db = Database::open_in_memory().unwrap();
        db.log_processing(None, Some("a.pdf"), Some("h"), "extract", "failed", Some("boom"))
            .unwrap();
        db.log_processing(Some("id"), Some("b.pdf"), Some("h2"), "extract", "success", None)
            .unwrap();
        assert_eq!(db.count_processing_logs("failed").unwrap(), 1);
        assert_eq!(db.count_processing_logs("success").unwrap(), 1);
    }
}
