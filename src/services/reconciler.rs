use tracing::debug;

use crate::models::{Client, CompanySettings, InvoiceRecord};
use crate::services::totals::{round_currency, tax_for};

/// Merges a freshly extracted record with the stored company settings and
/// client roster.
///
/// With a configured company name the supplier block and tax rate are taken
/// from the settings and the totals are rebuilt from the line totals. Without
/// one, the extracted supplier and monetary fields are left exactly as they
/// came back. Client details are then replaced by the first roster entry
/// whose name contains, or is contained in, the extracted client name.
pub fn reconcile(mut raw: InvoiceRecord, settings: &CompanySettings, clients: &[Client]) -> InvoiceRecord {
    if !settings.name.is_empty() {
        raw.supplier_name = settings.name.clone();
        raw.supplier_address = format!("{}\nTax ID: {}", settings.address, settings.tax_id)
            .trim()
            .to_string();
        raw.supplier_logo = settings.logo_ref.clone();
        raw.tax_rate = settings.default_tax_rate;

        let subtotal = round_currency(raw.items.iter().map(|item| item.total).sum::<f64>());
        let tax_amount = tax_for(subtotal, raw.tax_rate);
        raw.subtotal = subtotal;
        raw.tax_amount = tax_amount;
        raw.total = round_currency(subtotal + tax_amount);
        debug!(supplier = %raw.supplier_name, total = raw.total, "Applied company settings");
    }

    if !raw.client_name.is_empty() {
        if let Some(client) = match_client(&raw.client_name, clients) {
            debug!(extracted = %raw.client_name, matched = %client.name, "Matched stored client");
            raw.client_name = client.name.clone();
            raw.client_address = client.address.clone();
            raw.client_cif = client.tax_id.clone();
        }
    }

    raw
}

/// First roster entry in insertion order whose lowercased name is a substring
/// of `name` or the other way round.
pub fn match_client<'a>(name: &str, clients: &'a [Client]) -> Option<&'a Client> {
    let needle = name.to_lowercase();
    clients.iter().find(|client| {
        let candidate = client.name.to_lowercase();
        candidate.contains(&needle) || needle.contains(&candidate)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LineItem;

    fn settings(name: &str) -> CompanySettings {
        CompanySettings {
            name: name.to_string(),
            tax_id: "B12345678".to_string(),
            address: "Calle Mayor 1\nMadrid".to_string(),
            default_tax_rate: 21.0,
            logo_ref: Some("logo.png".to_string()),
        }
    }

    fn client(name: &str, tax_id: &str) -> Client {
        Client {
            name: name.to_string(),
            address: format!("{} street", name),
            tax_id: tax_id.to_string(),
        }
    }

    fn raw_record() -> InvoiceRecord {
        InvoiceRecord {
            invoice_number: "ALB-7".to_string(),
            supplier_name: "Printed Supplier".to_string(),
            supplier_address: "Somewhere".to_string(),
            client_name: "Acme".to_string(),
            client_cif: "X".to_string(),
            client_address: "Y".to_string(),
            items: vec![
                LineItem {
                    description: "Pallet".to_string(),
                    quantity: 3.0,
                    unit_price: 10.0,
                    total: 30.0,
                },
                LineItem {
                    description: "Transport".to_string(),
                    quantity: 1.0,
                    unit_price: 12.345,
                    total: 12.345,
                },
            ],
            subtotal: 1.0,
            tax_rate: 4.0,
            tax_amount: 2.0,
            total: 3.0,
            ..InvoiceRecord::default()
        }
    }

    #[test]
    fn override_branch_rewrites_supplier_and_totals() {
        let out = reconcile(raw_record(), &settings("Alba SL"), &[]);
        assert_eq!(out.supplier_name, "Alba SL");
        assert_eq!(out.supplier_address, "Calle Mayor 1\nMadrid\nTax ID: B12345678");
        assert_eq!(out.supplier_logo.as_deref(), Some("logo.png"));
        assert_eq!(out.tax_rate, 21.0);
        assert_eq!(out.subtotal, 42.35);
        assert_eq!(out.tax_amount, round_currency(42.35 * 21.0 / 100.0));
        assert_eq!(out.total, round_currency(out.subtotal + out.tax_amount));
    }

    #[test]
    fn supplier_address_is_trimmed() {
        let mut s = settings("Alba SL");
        s.address = String::new();
        s.tax_id = String::new();
        let out = reconcile(raw_record(), &s, &[]);
        assert_eq!(out.supplier_address, "Tax ID:");
    }

    #[test]
    fn override_keeps_extracted_line_totals() {
        let mut raw = raw_record();
        raw.items[0].total = 50.0;
        let out = reconcile(raw, &settings("Alba SL"), &[]);
        assert_eq!(out.items[0].total, 50.0);
        assert_eq!(out.subtotal, 62.35);
    }

    #[test]
    fn empty_company_name_passes_supplier_and_money_through() {
        let raw = raw_record();
        let out = reconcile(raw.clone(), &settings(""), &[]);
        assert_eq!(out.supplier_name, raw.supplier_name);
        assert_eq!(out.supplier_address, raw.supplier_address);
        assert_eq!(out.supplier_logo, raw.supplier_logo);
        assert_eq!(out.tax_rate.to_bits(), raw.tax_rate.to_bits());
        assert_eq!(out.subtotal.to_bits(), raw.subtotal.to_bits());
        assert_eq!(out.tax_amount.to_bits(), raw.tax_amount.to_bits());
        assert_eq!(out.total.to_bits(), raw.total.to_bits());
        assert_eq!(out.items, raw.items);
    }

    #[test]
    fn totals_consistent_across_tax_rates() {
        for rate in [0.0, 4.0, 10.0, 21.0, 7.5, 33.33] {
            let mut s = settings("Alba SL");
            s.default_tax_rate = rate;
            let out = reconcile(raw_record(), &s, &[]);
            assert_eq!(out.tax_amount, round_currency(out.subtotal * rate / 100.0));
            assert_eq!(out.total, round_currency(out.subtotal + out.tax_amount));
        }
    }

    #[test]
    fn client_match_when_extracted_is_substring() {
        let roster = vec![client("Acme Corp", "B1")];
        let out = reconcile(raw_record(), &settings(""), &roster);
        assert_eq!(out.client_name, "Acme Corp");
        assert_eq!(out.client_cif, "B1");
        assert_eq!(out.client_address, "Acme Corp street");
    }

    #[test]
    fn client_match_when_extracted_is_superstring() {
        let roster = vec![client("Acme Corp", "B1")];
        let mut raw = raw_record();
        raw.client_name = "ACME CORP International".to_string();
        let out = reconcile(raw, &settings(""), &roster);
        assert_eq!(out.client_name, "Acme Corp");
    }

    #[test]
    fn client_match_first_entry_wins() {
        let roster = vec![client("A", "first"), client("AA", "second")];
        let mut raw = raw_record();
        raw.client_name = "AA".to_string();
        let out = reconcile(raw, &settings(""), &roster);
        assert_eq!(out.client_name, "A");
        assert_eq!(out.client_cif, "first");
    }

    #[test]
    fn no_match_keeps_extracted_client() {
        let roster = vec![client("Globex", "B9")];
        let out = reconcile(raw_record(), &settings(""), &roster);
        assert_eq!(out.client_name, "Acme");
        assert_eq!(out.client_cif, "X");
        assert_eq!(out.client_address, "Y");
    }

    #[test]
    fn empty_client_name_skips_matching() {
        let roster = vec![client("", "B0")];
        let mut raw = raw_record();
        raw.client_name = String::new();
        let out = reconcile(raw, &settings(""), &roster);
        assert_eq!(out.client_name, "");
        assert_eq!(out.client_cif, "X");
    }

    #[test]
    fn roster_entry_with_empty_name_matches_everything() {
        let roster = vec![client("", "B0"), client("Acme", "B1")];
        let out = reconcile(raw_record(), &settings(""), &roster);
        assert_eq!(out.client_cif, "B0");
    }
}
