use anyhow::Result;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::db::Database;
use crate::models::{Client, CompanySettings};

pub const SETTINGS_KEY: &str = "company_settings";
pub const CLIENTS_KEY: &str = "clients";

/// Settings and client roster kept as JSON blobs in the `settings` table.
/// Unreadable blobs fall back to the empty state instead of failing.
pub struct SettingsStore<'a> {
    db: &'a Database,
}

impl<'a> SettingsStore<'a> {
    pub fn new(db: &'a Database) -> Self {
        SettingsStore { db }
    }

    pub fn load_settings(&self) -> Result<CompanySettings> {
        Ok(self.load_json(SETTINGS_KEY)?.unwrap_or_default())
    }

    pub fn save_settings(&self, settings: &CompanySettings) -> Result<()> {
        self.db
            .set_setting(SETTINGS_KEY, &serde_json::to_string(settings)?)?;
        info!(name = %settings.name, "Saved company settings");
        Ok(())
    }

    pub fn load_clients(&self) -> Result<Vec<Client>> {
        Ok(self.load_json(CLIENTS_KEY)?.unwrap_or_default())
    }

    pub fn save_clients(&self, clients: &[Client]) -> Result<()> {
        self.db
            .set_setting(CLIENTS_KEY, &serde_json::to_string(clients)?)?;
        info!(count = clients.len(), "Saved client roster");
        Ok(())
    }

    fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.db.get_setting(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "Stored JSON is malformed, using defaults");
                Ok(None)
            }
        }
    }
}
