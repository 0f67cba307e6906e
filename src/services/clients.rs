use crate::models::Client;

/// Returns the roster with `client` stored under its case-insensitive name:
/// an existing entry keeps its position and takes the new values, otherwise
/// the client is appended.
pub fn save_client(roster: &[Client], client: Client) -> Vec<Client> {
    let mut next = roster.to_vec();
    let key = client.name.to_lowercase();
    match next.iter().position(|c| c.name.to_lowercase() == key) {
        Some(index) => next[index] = client,
        None => next.push(client),
    }
    next
}

/// Exact case-insensitive lookup, used when the reviewer picks a client by name.
pub fn find_client<'a>(roster: &'a [Client], name: &str) -> Option<&'a Client> {
    let key = name.to_lowercase();
    roster.iter().find(|c| c.name.to_lowercase() == key)
}
