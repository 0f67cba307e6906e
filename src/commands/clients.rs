use anyhow::{bail, Result};

use crate::models::Client;
use crate::services::state::AppState;

pub fn get_clients(state: &AppState) -> Vec<Client> {
    state.clients().to_vec()
}

/// Adds the client, or replaces the entry with the same name (ignoring case).
pub fn save_client(state: &mut AppState, name: &str, tax_id: &str, address: &str) -> Result<Client> {
    let name = name.trim();
    if name.is_empty() {
        bail!("Client name cannot be empty");
    }
    let client = Client {
        name: name.to_string(),
        address: address.to_string(),
        tax_id: tax_id.trim().to_string(),
    };
    state.upsert_client(client.clone())?;
    Ok(client)
}
