pub mod clients;
pub mod invoices;
pub mod process;
pub mod settings;
