use anyhow::{bail, Result};

use crate::models::CompanySettings;
use crate::services::state::AppState;
use crate::utils::parse_decimal;

/// Partial update; `None` leaves the stored value alone.
#[derive(Debug, Default, Clone)]
pub struct SettingsUpdate {
    pub name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<String>,
    pub tax_rate: Option<String>,
    pub logo: Option<String>,
    pub clear_logo: bool,
}

pub fn get_settings(state: &AppState) -> CompanySettings {
    state.settings().clone()
}

pub fn save_settings(state: &mut AppState, update: SettingsUpdate) -> Result<CompanySettings> {
    let mut settings = state.settings().clone();

    if let Some(value) = update.name {
        settings.name = value.trim().to_string();
    }
    if let Some(value) = update.tax_id {
        settings.tax_id = value.trim().to_string();
    }
    if let Some(value) = update.address {
        settings.address = value;
    }
    if let Some(value) = update.tax_rate {
        let rate = parse_decimal(&value)?;
        if !rate.is_finite() || rate < 0.0 {
            bail!("Tax rate must be a non-negative number, got {}", value);
        }
        settings.default_tax_rate = rate;
    }
    if update.clear_logo {
        settings.logo_ref = None;
    } else if let Some(value) = update.logo {
        let value = value.trim().to_string();
        settings.logo_ref = if value.is_empty() { None } else { Some(value) };
    }

    state.update_settings(settings.clone())?;
    Ok(settings)
}
