use crate::models::InvoiceRecord;

/// Rounds half away from zero to two decimal places.
pub fn round_currency(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn tax_for(subtotal: f64, tax_rate: f64) -> f64 {
    round_currency(subtotal * tax_rate / 100.0)
}

/// Edit-time recalculation. Every line total is overwritten with
/// `quantity * unit_price`; invoice totals follow from the lines.
pub fn recalculate(record: &mut InvoiceRecord) {
    for item in record.items.iter_mut() {
        item.total = item.quantity * item.unit_price;
    }
    let subtotal: f64 = record.items.iter().map(|item| item.total).sum();
    record.subtotal = subtotal;
    record.tax_amount = tax_for(subtotal, record.tax_rate);
    record.total = subtotal + record.tax_amount;
}
