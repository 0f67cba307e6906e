//! Edits applied to a record while it is under review.

use std::str::FromStr;

use crate::models::{Client, InvoiceRecord, LineItem};
use crate::services::totals::recalculate;
use crate::utils::parse_decimal;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReviewError {
    #[error("Unknown invoice field: {0}")]
    UnknownField(String),
    #[error("Unknown item field: {0}")]
    UnknownItemField(String),
    #[error("No item at position {position}, invoice has {len}")]
    ItemOutOfRange { position: usize, len: usize },
    #[error("{field} expects a number, got {value:?}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{field} cannot be negative")]
    Negative { field: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceField {
    InvoiceNumber,
    Date,
    DueDate,
    SupplierName,
    SupplierAddress,
    ClientName,
    ClientCif,
    ClientAddress,
    Notes,
    TaxRate,
}

impl FromStr for InvoiceField {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.replace(['_', '-'], "").to_lowercase().as_str() {
            "invoicenumber" | "number" => InvoiceField::InvoiceNumber,
            "date" => InvoiceField::Date,
            "duedate" => InvoiceField::DueDate,
            "suppliername" => InvoiceField::SupplierName,
            "supplieraddress" => InvoiceField::SupplierAddress,
            "clientname" => InvoiceField::ClientName,
            "clientcif" | "clienttaxid" => InvoiceField::ClientCif,
            "clientaddress" => InvoiceField::ClientAddress,
            "notes" => InvoiceField::Notes,
            "taxrate" => InvoiceField::TaxRate,
            _ => return Err(ReviewError::UnknownField(s.to_string())),
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemField {
    Description,
    Quantity,
    UnitPrice,
}

impl FromStr for ItemField {
    type Err = ReviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.replace(['_', '-'], "").to_lowercase().as_str() {
            "description" => ItemField::Description,
            "quantity" | "qty" => ItemField::Quantity,
            "unitprice" | "price" => ItemField::UnitPrice,
            _ => return Err(ReviewError::UnknownItemField(s.to_string())),
        };
        Ok(field)
    }
}

/// Item positions are 1-based, as shown to the reviewer.
#[derive(Debug, Clone, PartialEq)]
pub enum InvoiceEdit {
    SetField { field: InvoiceField, value: String },
    SetItem { position: usize, field: ItemField, value: String },
    AddItem,
    RemoveItem { position: usize },
}

/// Applies one edit. Returns whether totals were recalculated.
pub fn apply_edit(record: &mut InvoiceRecord, edit: InvoiceEdit) -> Result<bool, ReviewError> {
    let recalc = match edit {
        InvoiceEdit::SetField { field, value } => set_field(record, field, value)?,
        InvoiceEdit::SetItem { position, field, value } => {
            let index = item_index(record, position)?;
            let item = &mut record.items[index];
            match field {
                ItemField::Description => {
                    item.description = value;
                    false
                }
                ItemField::Quantity => {
                    item.quantity = non_negative("quantity", &value)?;
                    true
                }
                ItemField::UnitPrice => {
                    item.unit_price = non_negative("unitPrice", &value)?;
                    true
                }
            }
        }
        InvoiceEdit::AddItem => {
            record.items.push(LineItem {
                description: String::new(),
                quantity: 1.0,
                unit_price: 0.0,
                total: 0.0,
            });
            true
        }
        InvoiceEdit::RemoveItem { position } => {
            let index = item_index(record, position)?;
            record.items.remove(index);
            true
        }
    };

    if recalc {
        recalculate(record);
    }
    Ok(recalc)
}

/// Copies a roster entry into the client block of the record.
pub fn apply_client(record: &mut InvoiceRecord, client: &Client) {
    record.client_name = client.name.clone();
    record.client_cif = client.tax_id.clone();
    record.client_address = client.address.clone();
}

/// Client block of the record in roster form, for saving it as a known client.
pub fn client_from_record(record: &InvoiceRecord) -> Client {
    Client {
        name: record.client_name.trim().to_string(),
        address: record.client_address.clone(),
        tax_id: record.client_cif.clone(),
    }
}

fn set_field(record: &mut InvoiceRecord, field: InvoiceField, value: String) -> Result<bool, ReviewError> {
    match field {
        InvoiceField::InvoiceNumber => record.invoice_number = value,
        InvoiceField::Date => record.date = value,
        InvoiceField::DueDate => record.due_date = optional(value),
        InvoiceField::SupplierName => record.supplier_name = value,
        InvoiceField::SupplierAddress => record.supplier_address = value,
        InvoiceField::ClientName => record.client_name = value,
        InvoiceField::ClientCif => record.client_cif = value,
        InvoiceField::ClientAddress => record.client_address = value,
        InvoiceField::Notes => record.notes = optional(value),
        InvoiceField::TaxRate => {
            record.tax_rate = non_negative("taxRate", &value)?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn optional(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn item_index(record: &InvoiceRecord, position: usize) -> Result<usize, ReviewError> {
    if position == 0 || position > record.items.len() {
        return Err(ReviewError::ItemOutOfRange {
            position,
            len: record.items.len(),
        });
    }
    Ok(position - 1)
}

fn non_negative(field: &'static str, value: &str) -> Result<f64, ReviewError> {
    let number = parse_decimal(value)
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| ReviewError::InvalidNumber {
            field,
            value: value.to_string(),
        })?;
    if number < 0.0 {
        return Err(ReviewError::Negative { field });
    }
    Ok(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> InvoiceRecord {
        InvoiceRecord {
            tax_rate: 21.0,
            items: vec![LineItem {
                description: "Pallet".to_string(),
                quantity: 2.0,
                unit_price: 10.0,
                total: 25.0,
            }],
            subtotal: 25.0,
            tax_amount: 5.25,
            total: 30.25,
            ..InvoiceRecord::default()
        }
    }

    #[test]
    fn parses_field_names() {
        assert_eq!("invoiceNumber".parse::<InvoiceField>().unwrap(), InvoiceField::InvoiceNumber);
        assert_eq!("client_cif".parse::<InvoiceField>().unwrap(), InvoiceField::ClientCif);
        assert_eq!("tax-rate".parse::<InvoiceField>().unwrap(), InvoiceField::TaxRate);
        assert_eq!("unitPrice".parse::<ItemField>().unwrap(), ItemField::UnitPrice);
        assert!("colour".parse::<InvoiceField>().is_err());
    }

    #[test]
    fn text_edit_keeps_extracted_totals() {
        let mut r = record();
        let recalculated = apply_edit(
            &mut r,
            InvoiceEdit::SetField {
                field: InvoiceField::ClientName,
                value: "Globex".to_string(),
            },
        )
        .unwrap();
        assert!(!recalculated);
        assert_eq!(r.client_name, "Globex");
        assert_eq!(r.items[0].total, 25.0);
        assert_eq!(r.total, 30.25);
    }

    #[test]
    fn quantity_edit_recalculates() {
        let mut r = record();
        apply_edit(
            &mut r,
            InvoiceEdit::SetItem {
                position: 1,
                field: ItemField::Quantity,
                value: "3".to_string(),
            },
        )
        .unwrap();
        assert_eq!(r.items[0].total, 30.0);
        assert_eq!(r.subtotal, 30.0);
        assert_eq!(r.tax_amount, 6.3);
        assert_eq!(r.total, 30.0 + 6.3);
    }

    #[test]
    fn price_accepts_decimal_comma() {
        let mut r = record();
        apply_edit(
            &mut r,
            InvoiceEdit::SetItem {
                position: 1,
                field: ItemField::UnitPrice,
                value: "12,5".to_string(),
            },
        )
        .unwrap();
        assert_eq!(r.items[0].unit_price, 12.5);
        assert_eq!(r.subtotal, 25.0);
    }

    #[test]
    fn add_and_remove_items_recalculate() {
        let mut r = record();
        apply_edit(&mut r, InvoiceEdit::AddItem).unwrap();
        assert_eq!(r.items.len(), 2);
        assert_eq!(r.subtotal, 20.0);

        apply_edit(&mut r, InvoiceEdit::RemoveItem { position: 1 }).unwrap();
        assert_eq!(r.items.len(), 1);
        assert_eq!(r.items[0].quantity, 1.0);
        assert_eq!(r.subtotal, 0.0);
        assert_eq!(r.total, 0.0);
    }

    #[test]
    fn tax_rate_edit_recalculates() {
        let mut r = record();
        apply_edit(
            &mut r,
            InvoiceEdit::SetField {
                field: InvoiceField::TaxRate,
                value: "10".to_string(),
            },
        )
        .unwrap();
        assert_eq!(r.subtotal, 20.0);
        assert_eq!(r.tax_amount, 2.0);
        assert_eq!(r.total, 22.0);
    }

    #[test]
    fn rejects_bad_values() {
        let mut r = record();
        let err = apply_edit(
            &mut r,
            InvoiceEdit::SetItem {
                position: 1,
                field: ItemField::Quantity,
                value: "-1".to_string(),
            },
        )
        .unwrap_err();
        assert_eq!(err, ReviewError::Negative { field: "quantity" });

        let err = apply_edit(
            &mut r,
            InvoiceEdit::SetItem {
                position: 1,
                field: ItemField::UnitPrice,
                value: "ten".to_string(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidNumber { field: "unitPrice", .. }));

        let err = apply_edit(&mut r, InvoiceEdit::RemoveItem { position: 5 }).unwrap_err();
        assert_eq!(err, ReviewError::ItemOutOfRange { position: 5, len: 1 });
        assert_eq!(r, record());
    }

    #[test]
    fn blank_optional_fields_clear() {
        let mut r = record();
        r.notes = Some("old".to_string());
        apply_edit(
            &mut r,
            InvoiceEdit::SetField {
                field: InvoiceField::Notes,
                value: " ".to_string(),
            },
        )
        .unwrap();
        assert!(r.notes.is_none());
    }

    #[test]
    fn client_helpers_copy_fields() {
        let mut r = record();
        let client = Client {
            name: "Acme".to_string(),
            address: "Main St".to_string(),
            tax_id: "B1".to_string(),
        };
        apply_client(&mut r, &client);
        assert_eq!(client_from_record(&r), client);
    }
}
