mod commands;
mod config;
mod db;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::commands::process::ProcessRequest;
use crate::commands::settings::SettingsUpdate;
use crate::config::{resolve_data_dir, ExtractionBackend, ExtractionConfig};
use crate::models::{InvoiceRecord, StoredInvoice};
use crate::services::extraction::HttpExtractor;
use crate::services::review::{InvoiceEdit, InvoiceField, ItemField};
use crate::services::state::AppState;
use crate::utils::format_decimal;

/// Turns delivery notes into reviewed invoices.
#[derive(Parser)]
#[command(name = "albafactura", version)]
struct Cli {
    /// Directory holding the local database.
    #[arg(long, global = true, env = "ALBAFACTURA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract delivery notes and store them for review.
    Process(ProcessArgs),
    #[command(subcommand)]
    Invoices(InvoicesCommand),
    #[command(subcommand)]
    Settings(SettingsCommand),
    #[command(subcommand)]
    Clients(ClientsCommand),
}

#[derive(Args)]
struct ProcessArgs {
    files: Vec<PathBuf>,
    /// Take every supported document in this folder.
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Write a ZIP of the processed invoices here.
    #[arg(long)]
    archive_to: Option<PathBuf>,
    /// I have verified all data.
    #[arg(long)]
    verified: bool,
    #[arg(long, value_enum, default_value = "gemini", env = "ALBAFACTURA_BACKEND")]
    backend: ExtractionBackend,
    #[arg(long, env = "ALBAFACTURA_MODEL")]
    model: Option<String>,
    #[arg(long)]
    base_url: Option<String>,
    /// Falls back to GEMINI_API_KEY or OPENAI_API_KEY.
    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum InvoicesCommand {
    List,
    Show { id: String },
    Edit {
        id: String,
        #[command(subcommand)]
        action: EditAction,
    },
    /// Fill the client block from a saved client.
    ApplyClient { id: String, client: String },
    /// Save the invoice's client to the client list.
    SaveClient { id: String },
    Confirm { id: String },
    Export {
        id: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    Archive {
        ids: Vec<String>,
        #[arg(long, default_value = ".")]
        out: PathBuf,
        #[arg(long)]
        verified: bool,
    },
}

#[derive(Subcommand)]
enum EditAction {
    Set { field: String, value: String },
    /// Positions start at 1.
    ItemSet { position: usize, field: String, value: String },
    ItemAdd,
    ItemRemove { position: usize },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    Set {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        tax_id: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        tax_rate: Option<String>,
        /// PNG/JPEG path or data URL.
        #[arg(long)]
        logo: Option<String>,
        #[arg(long)]
        clear_logo: bool,
    },
}

#[derive(Subcommand)]
enum ClientsCommand {
    List,
    Save {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        tax_id: String,
        #[arg(long, default_value = "")]
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir)?;
    let mut state = AppState::open(&data_dir)?;

    match cli.command {
        Command::Process(args) => run_process(&state, args).await,
        Command::Invoices(command) => run_invoices(&mut state, command),
        Command::Settings(command) => run_settings(&mut state, command),
        Command::Clients(command) => run_clients(&mut state, command),
    }
}

async fn run_process(state: &AppState, args: ProcessArgs) -> Result<()> {
    let config = ExtractionConfig::resolve(args.backend, args.model, args.base_url, args.api_key);
    let extractor = HttpExtractor::new(config);
    let outcome = commands::process::process_invoices(
        state,
        &extractor,
        ProcessRequest {
            files: args.files,
            dir: args.dir,
            archive_to: args.archive_to,
            verified: args.verified,
        },
    )
    .await?;

    for invoice in &outcome.stored {
        println!(
            "{}\t{}\t{}\t{}",
            invoice.id,
            invoice.status.as_str(),
            invoice.record.source_filename,
            format_decimal(invoice.record.total)
        );
    }
    for skipped in &outcome.skipped {
        println!("skipped\t{}\t{}", skipped.filename, skipped.reason);
    }
    if let Some(path) = outcome.archive {
        println!("archive\t{}", path.display());
    }
    Ok(())
}

fn run_invoices(state: &mut AppState, command: InvoicesCommand) -> Result<()> {
    match command {
        InvoicesCommand::List => {
            for s in commands::invoices::get_invoices(state)? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{} items",
                    s.id,
                    s.status,
                    s.invoice_number.unwrap_or_default(),
                    s.client_name.unwrap_or_default(),
                    format_decimal(s.total),
                    s.item_count
                );
            }
        }
        InvoicesCommand::Show { id } => print_invoice(&commands::invoices::get_invoice_detail(state, &id)?),
        InvoicesCommand::Edit { id, action } => {
            let edit = match action {
                EditAction::Set { field, value } => InvoiceEdit::SetField {
                    field: field.parse::<InvoiceField>()?,
                    value,
                },
                EditAction::ItemSet { position, field, value } => InvoiceEdit::SetItem {
                    position,
                    field: field.parse::<ItemField>()?,
                    value,
                },
                EditAction::ItemAdd => InvoiceEdit::AddItem,
                EditAction::ItemRemove { position } => InvoiceEdit::RemoveItem { position },
            };
            print_invoice(&commands::invoices::update_invoice(state, &id, edit)?);
        }
        InvoicesCommand::ApplyClient { id, client } => {
            print_invoice(&commands::invoices::apply_client(state, &id, &client)?);
        }
        InvoicesCommand::SaveClient { id } => {
            commands::invoices::save_invoice_client(state, &id)?;
            println!("saved client from {}", id);
        }
        InvoicesCommand::Confirm { id } => {
            commands::invoices::confirm_invoice(state, &id)?;
            println!("confirmed {}", id);
        }
        InvoicesCommand::Export { id, out } => {
            let path = commands::invoices::export_invoice(state, &id, &out)?;
            println!("{}", path.display());
        }
        InvoicesCommand::Archive { ids, out, verified } => {
            let path = commands::invoices::archive_invoices(state, &ids, &out, verified)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn run_settings(state: &mut AppState, command: SettingsCommand) -> Result<()> {
    let settings = match command {
        SettingsCommand::Show => commands::settings::get_settings(state),
        SettingsCommand::Set {
            name,
            tax_id,
            address,
            tax_rate,
            logo,
            clear_logo,
        } => commands::settings::save_settings(
            state,
            SettingsUpdate {
                name,
                tax_id,
                address,
                tax_rate,
                logo,
                clear_logo,
            },
        )?,
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn run_clients(state: &mut AppState, command: ClientsCommand) -> Result<()> {
    match command {
        ClientsCommand::List => {
            for client in commands::clients::get_clients(state) {
                println!("{}\t{}\t{}", client.name, client.tax_id, client.address.replace('\n', ", "));
            }
        }
        ClientsCommand::Save { name, tax_id, address } => {
            let client = commands::clients::save_client(state, &name, &tax_id, &address)?;
            println!("saved {}", client.name);
        }
    }
    Ok(())
}

fn print_invoice(invoice: &StoredInvoice) {
    let r: &InvoiceRecord = &invoice.record;
    println!("id:       {}", invoice.id);
    println!("status:   {}", invoice.status.as_str());
    println!("source:   {}", r.source_filename);
    println!("number:   {}", r.invoice_number);
    println!("date:     {}", r.date);
    if let Some(due) = &r.due_date {
        println!("due:      {}", due);
    }
    println!("supplier: {} | {}", r.supplier_name, r.supplier_address.replace('\n', ", "));
    println!("client:   {} | {} | {}", r.client_name, r.client_cif, r.client_address.replace('\n', ", "));
    for (index, item) in r.items.iter().enumerate() {
        println!(
            "  {}. {} x{} @ {} = {}",
            index + 1,
            item.description,
            item.quantity,
            format_decimal(item.unit_price),
            format_decimal(item.total)
        );
    }
    println!("subtotal: {}", format_decimal(r.subtotal));
    println!("tax:      {} ({}%)", format_decimal(r.tax_amount), r.tax_rate);
    println!("total:    {}", format_decimal(r.total));
    if let Some(notes) = &r.notes {
        println!("notes:    {}", notes);
    }
}
