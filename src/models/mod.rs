use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_TAX_RATE: f64 = 21.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySettings {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "cif")]
    pub tax_id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_tax_rate", deserialize_with = "tax_rate_or_default")]
    pub default_tax_rate: f64,
    #[serde(default, alias = "logo")]
    pub logo_ref: Option<String>,
}

fn default_tax_rate() -> f64 {
    DEFAULT_TAX_RATE
}

fn tax_rate_or_default<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(DEFAULT_TAX_RATE))
}

impl Default for CompanySettings {
    fn default() -> Self {
        CompanySettings {
            name: String::new(),
            tax_id: String::new(),
            address: String::new(),
            default_tax_rate: DEFAULT_TAX_RATE,
            logo_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, alias = "cif")]
    pub tax_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRecord {
    #[serde(default)]
    pub invoice_number: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub supplier_name: String,
    #[serde(default)]
    pub supplier_address: String,
    #[serde(default)]
    pub supplier_logo: Option<String>,
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub client_cif: String,
    #[serde(default)]
    pub client_address: String,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub subtotal: f64,
    #[serde(default)]
    pub tax_rate: f64,
    #[serde(default)]
    pub tax_amount: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub source_filename: String,
}

/// Review workflow flag. Confirmation is semantic only; nothing locks the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Review,
    Confirmed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Review => "review",
            WorkflowStatus::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "review" => Some(WorkflowStatus::Review),
            "confirmed" => Some(WorkflowStatus::Confirmed),
            _ => None,
        }
    }
}

/// A processed record as kept in the local database between review steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredInvoice {
    pub id: String,
    pub status: WorkflowStatus,
    pub source_hash: String,
    pub record: InvoiceRecord,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: String,
    pub status: String,
    pub invoice_number: Option<String>,
    pub client_name: Option<String>,
    pub total: f64,
    pub item_count: i64,
    pub source_filename: String,
    pub updated_at: String,
}

/// Shape returned by the extraction model. Every field may be null or absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInvoiceData {
    pub invoice_number: Option<String>,
    pub date: Option<String>,
    pub due_date: Option<String>,
    pub supplier_name: Option<String>,
    pub supplier_address: Option<String>,
    pub client_name: Option<String>,
    pub client_cif: Option<String>,
    pub client_address: Option<String>,
    pub items: Option<Vec<ExtractedLineItem>>,
    pub subtotal: Option<f64>,
    pub tax_rate: Option<f64>,
    pub tax_amount: Option<f64>,
    pub total: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedLineItem {
    pub description: Option<String>,
    pub quantity: Option<f64>,
    pub unit_price: Option<f64>,
    pub total: Option<f64>,
}

impl ExtractedInvoiceData {
    /// Missing strings become empty and missing numbers zero; the item totals
    /// are kept as extracted even when they disagree with quantity * price.
    pub fn into_record(self, source_filename: &str) -> InvoiceRecord {
        InvoiceRecord {
            invoice_number: self.invoice_number.unwrap_or_default(),
            date: self.date.unwrap_or_default(),
            due_date: self.due_date.filter(|d| !d.trim().is_empty()),
            supplier_name: self.supplier_name.unwrap_or_default(),
            supplier_address: self.supplier_address.unwrap_or_default(),
            supplier_logo: None,
            client_name: self.client_name.unwrap_or_default(),
            client_cif: self.client_cif.unwrap_or_default(),
            client_address: self.client_address.unwrap_or_default(),
            items: self
                .items
                .unwrap_or_default()
                .into_iter()
                .map(|item| LineItem {
                    description: item.description.unwrap_or_default(),
                    quantity: item.quantity.unwrap_or(0.0),
                    unit_price: item.unit_price.unwrap_or(0.0),
                    total: item.total.unwrap_or(0.0),
                })
                .collect(),
            subtotal: self.subtotal.unwrap_or(0.0),
            tax_rate: self.tax_rate.unwrap_or(0.0),
            tax_amount: self.tax_amount.unwrap_or(0.0),
            total: self.total.unwrap_or(0.0),
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            source_filename: source_filename.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_default_missing_tax_rate() {
        let settings: CompanySettings = serde_json::from_str(r#"{"name":"Alba"}"#).unwrap();
        assert_eq!(settings.default_tax_rate, DEFAULT_TAX_RATE);
        let settings: CompanySettings =
            serde_json::from_str(r#"{"name":"Alba","defaultTaxRate":null}"#).unwrap();
        assert_eq!(settings.default_tax_rate, DEFAULT_TAX_RATE);
    }

    #[test]
    fn settings_accept_legacy_keys() {
        let raw = r#"{"name":"Alba SL","cif":"B123","address":"Calle 1","defaultTaxRate":10,"logo":null}"#;
        let settings: CompanySettings = serde_json::from_str(raw).unwrap();
        assert_eq!(settings.tax_id, "B123");
        assert_eq!(settings.default_tax_rate, 10.0);
        assert!(settings.logo_ref.is_none());
    }

    #[test]
    fn settings_default_tax_rate_when_missing() {
        let settings: CompanySettings = serde_json::from_str(r#"{"name":"X"}"#).unwrap();
        assert_eq!(settings.default_tax_rate, DEFAULT_TAX_RATE);
    }

    #[test]
    fn extracted_nulls_become_empty() {
        let raw = r#"{"invoiceNumber":null,"clientName":"Acme","items":[{"description":"Bolts","quantity":3,"unitPrice":null,"total":7.5}],"total":null}"#;
        let data: ExtractedInvoiceData = serde_json::from_str(raw).unwrap();
        let record = data.into_record("note.pdf");
        assert_eq!(record.invoice_number, "");
        assert_eq!(record.client_name, "Acme");
        assert_eq!(record.items.len(), 1);
        assert_eq!(record.items[0].unit_price, 0.0);
        assert_eq!(record.items[0].total, 7.5);
        assert_eq!(record.total, 0.0);
        assert_eq!(record.source_filename, "note.pdf");
    }

    #[test]
    fn workflow_status_round_trips_through_str() {
        for status in [WorkflowStatus::Review, WorkflowStatus::Confirmed] {
            assert_eq!(WorkflowStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(WorkflowStatus::parse("open"), None);
    }
}
