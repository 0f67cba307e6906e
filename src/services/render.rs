use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use crate::models::{CompanySettings, InvoiceRecord};

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 50.0;
const RIGHT: f32 = PAGE_WIDTH - MARGIN;
const BOTTOM: f32 = 90.0;
const ROW_HEIGHT: f32 = 14.0;
const LOGO_MAX_WIDTH: f32 = 120.0;
const LOGO_MAX_HEIGHT: f32 = 60.0;
const DESCRIPTION_CHARS: usize = 48;
const PARTY_CHARS: usize = 44;

const COL_QTY: f32 = 360.0;
const COL_PRICE: f32 = 450.0;

#[derive(Clone, Copy)]
enum Font {
    Regular,
    Bold,
}

impl Font {
    fn resource(self) -> &'static [u8] {
        match self {
            Font::Regular => b"F1",
            Font::Bold => b"F2",
        }
    }
}

struct Logo {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

/// Accumulates drawing operations page by page, top to bottom.
struct PageBuilder {
    pages: Vec<Vec<Operation>>,
    ops: Vec<Operation>,
    y: f32,
}

impl PageBuilder {
    fn new() -> Self {
        PageBuilder {
            pages: Vec::new(),
            ops: Vec::new(),
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn text(&mut self, x: f32, y: f32, font: Font, size: f32, value: &str) {
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![Object::Name(font.resource().to_vec()), Object::Real(size)],
        ));
        self.ops
            .push(Operation::new("Td", vec![Object::Real(x), Object::Real(y)]));
        self.ops.push(Operation::new(
            "Tj",
            vec![Object::String(encode_win_ansi(value), StringFormat::Literal)],
        ));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn right_text(&mut self, right: f32, y: f32, font: Font, size: f32, value: &str) {
        let x = right - text_width(value, size);
        self.text(x, y, font, size, value);
    }

    fn rule(&mut self, y: f32) {
        self.ops.push(Operation::new("w", vec![Object::Real(0.5)]));
        self.ops
            .push(Operation::new("m", vec![Object::Real(MARGIN), Object::Real(y)]));
        self.ops
            .push(Operation::new("l", vec![Object::Real(RIGHT), Object::Real(y)]));
        self.ops.push(Operation::new("S", vec![]));
    }

    fn gray(&mut self, level: f32) {
        self.ops.push(Operation::new("g", vec![Object::Real(level)]));
    }

    fn image(&mut self, name: &[u8], x: f32, y: f32, width: f32, height: f32) {
        self.ops.push(Operation::new("q", vec![]));
        self.ops.push(Operation::new(
            "cm",
            vec![
                Object::Real(width),
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(height),
                Object::Real(x),
                Object::Real(y),
            ],
        ));
        self.ops
            .push(Operation::new("Do", vec![Object::Name(name.to_vec())]));
        self.ops.push(Operation::new("Q", vec![]));
    }

    fn new_page(&mut self) {
        let ops = std::mem::take(&mut self.ops);
        self.pages.push(ops);
        self.y = PAGE_HEIGHT - MARGIN;
    }

    /// Starts a new page when fewer than `height` points remain.
    fn ensure_space(&mut self, height: f32) -> bool {
        if self.y - height < BOTTOM {
            self.new_page();
            return true;
        }
        false
    }

    fn finish(mut self) -> Vec<Vec<Operation>> {
        if !self.ops.is_empty() || self.pages.is_empty() {
            self.new_page();
        }
        self.pages
    }
}

/// Renders a finalized record as an A4 invoice.
pub fn render_invoice_pdf(record: &InvoiceRecord, settings: &CompanySettings) -> Result<Vec<u8>> {
    let logo_ref = record
        .supplier_logo
        .as_deref()
        .or_else(|| settings.logo_ref.as_deref().filter(|_| !settings.name.is_empty()));
    let logo = logo_ref.and_then(|reference| match load_logo(reference) {
        Ok(logo) => Some(logo),
        Err(e) => {
            warn!(error = %e, "Logo could not be loaded, rendering without it");
            None
        }
    });

    let mut page = PageBuilder::new();
    draw_header(&mut page, record, logo.as_ref());
    draw_parties(&mut page, record);
    draw_items(&mut page, record);
    draw_totals(&mut page, record);
    draw_notes(&mut page, record);

    let pages = page.finish();
    debug!(pages = pages.len(), items = record.items.len(), "Invoice laid out");
    build_document(pages, logo)
}

fn draw_header(page: &mut PageBuilder, record: &InvoiceRecord, logo: Option<&Logo>) {
    let top = page.y;
    if let Some(logo) = logo {
        let scale = (LOGO_MAX_WIDTH / logo.width as f32).min(LOGO_MAX_HEIGHT / logo.height as f32);
        let width = logo.width as f32 * scale;
        let height = logo.height as f32 * scale;
        page.image(b"Im1", MARGIN, top - height, width, height);
    }

    page.right_text(RIGHT, top - 20.0, Font::Bold, 20.0, "INVOICE");
    let mut y = top - 38.0;
    if !record.invoice_number.is_empty() {
        page.right_text(RIGHT, y, Font::Regular, 10.0, &format!("No. {}", record.invoice_number));
        y -= ROW_HEIGHT;
    }
    if !record.date.is_empty() {
        page.right_text(RIGHT, y, Font::Regular, 10.0, &format!("Date: {}", record.date));
        y -= ROW_HEIGHT;
    }
    if let Some(due) = record.due_date.as_deref() {
        page.right_text(RIGHT, y, Font::Regular, 10.0, &format!("Due: {}", due));
        y -= ROW_HEIGHT;
    }
    let logo_bottom = if logo.is_some() { top - LOGO_MAX_HEIGHT } else { top };
    page.y = y.min(logo_bottom) - 20.0;
}

fn draw_parties(page: &mut PageBuilder, record: &InvoiceRecord) {
    let client_x = 320.0;

    page.ensure_space(ROW_HEIGHT * 2.0);
    page.gray(0.4);
    page.text(MARGIN, page.y, Font::Bold, 8.0, "FROM");
    page.text(client_x, page.y, Font::Bold, 8.0, "BILL TO");
    page.gray(0.0);
    page.y -= ROW_HEIGHT;

    let mut left = vec![(Font::Bold, 11.0, record.supplier_name.clone())];
    left.extend(block_lines(&record.supplier_address));

    let mut right = vec![(Font::Bold, 11.0, record.client_name.clone())];
    if !record.client_cif.is_empty() {
        right.push((Font::Regular, 9.0, format!("Tax ID: {}", record.client_cif)));
    }
    right.extend(block_lines(&record.client_address));

    for row in 0..left.len().max(right.len()) {
        page.ensure_space(ROW_HEIGHT);
        let y = page.y;
        if let Some((font, size, line)) = left.get(row) {
            page.text(MARGIN, y, *font, *size, line);
        }
        if let Some((font, size, line)) = right.get(row) {
            page.text(client_x, y, *font, *size, line);
        }
        page.y -= if row == 0 { ROW_HEIGHT } else { 12.0 };
    }

    page.y -= 24.0;
}

fn block_lines(text: &str) -> Vec<(Font, f32, String)> {
    text.lines()
        .flat_map(|line| wrap_text(line, PARTY_CHARS))
        .filter(|line| !line.is_empty())
        .map(|line| (Font::Regular, 9.0, line))
        .collect()
}

fn draw_table_header(page: &mut PageBuilder) {
    let y = page.y;
    page.text(MARGIN, y, Font::Bold, 9.0, "Description");
    page.right_text(COL_QTY, y, Font::Bold, 9.0, "Qty");
    page.right_text(COL_PRICE, y, Font::Bold, 9.0, "Unit price");
    page.right_text(RIGHT, y, Font::Bold, 9.0, "Total");
    page.rule(y - 5.0);
    page.y = y - 20.0;
}

fn draw_items(page: &mut PageBuilder, record: &InvoiceRecord) {
    page.ensure_space(ROW_HEIGHT * 3.0);
    draw_table_header(page);
    for item in &record.items {
        let lines = wrap_text(&item.description, DESCRIPTION_CHARS);
        for (i, line) in lines.iter().enumerate() {
            if page.ensure_space(ROW_HEIGHT) {
                draw_table_header(page);
            }
            let y = page.y;
            page.text(MARGIN, y, Font::Regular, 9.0, line);
            if i == 0 {
                page.right_text(COL_QTY, y, Font::Regular, 9.0, &format_quantity(item.quantity));
                page.right_text(COL_PRICE, y, Font::Regular, 9.0, &format_money(item.unit_price));
                page.right_text(RIGHT, y, Font::Regular, 9.0, &format_money(item.total));
            }
            page.y = y - ROW_HEIGHT;
        }
    }
    page.rule(page.y + 6.0);
    page.y -= 12.0;
}

fn draw_totals(page: &mut PageBuilder, record: &InvoiceRecord) {
    page.ensure_space(ROW_HEIGHT * 3.0 + 10.0);
    let mut y = page.y;
    let rows = [
        ("Subtotal", format_money(record.subtotal), Font::Regular),
        (
            "Tax",
            format!("{}% {}", format_quantity(record.tax_rate), format_money(record.tax_amount)),
            Font::Regular,
        ),
        ("Total", format_money(record.total), Font::Bold),
    ];
    for (label, value, font) in rows {
        page.right_text(COL_PRICE, y, font, 10.0, label);
        page.right_text(RIGHT, y, font, 10.0, &value);
        y -= ROW_HEIGHT + 2.0;
    }
    page.y = y - 12.0;
}

fn draw_notes(page: &mut PageBuilder, record: &InvoiceRecord) {
    let Some(notes) = record.notes.as_deref() else {
        return;
    };
    let lines: Vec<String> = notes
        .lines()
        .flat_map(|line| wrap_text(line, 90))
        .collect();
    page.ensure_space(ROW_HEIGHT * 2.0);
    page.text(MARGIN, page.y, Font::Bold, 9.0, "Notes");
    page.y -= ROW_HEIGHT;
    for line in lines {
        page.ensure_space(12.0);
        page.text(MARGIN, page.y, Font::Regular, 9.0, &line);
        page.y -= 12.0;
    }
}

fn build_document(pages: Vec<Vec<Operation>>, logo: Option<Logo>) -> Result<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = font_object(&mut doc, "Helvetica");
    let bold = font_object(&mut doc, "Helvetica-Bold");
    let mut resources = Dictionary::from_iter(vec![(
        "Font",
        Object::Dictionary(Dictionary::from_iter(vec![
            ("F1", Object::Reference(regular)),
            ("F2", Object::Reference(bold)),
        ])),
    )]);
    if let Some(logo) = logo {
        let image_dict = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"XObject".to_vec())),
            ("Subtype", Object::Name(b"Image".to_vec())),
            ("Width", Object::Integer(logo.width as i64)),
            ("Height", Object::Integer(logo.height as i64)),
            ("ColorSpace", Object::Name(b"DeviceRGB".to_vec())),
            ("BitsPerComponent", Object::Integer(8)),
        ]);
        let image_id = doc.add_object(Stream::new(image_dict, logo.rgb));
        resources.set(
            "XObject",
            Object::Dictionary(Dictionary::from_iter(vec![("Im1", Object::Reference(image_id))])),
        );
    }
    let resources_id = doc.add_object(resources);

    let mut page_ids = Vec::new();
    for operations in pages {
        let content = Content { operations }
            .encode()
            .context("Encode page content")?;
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content));
        let page = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(PAGE_WIDTH),
                    Object::Real(PAGE_HEIGHT),
                ]),
            ),
            ("Resources", Object::Reference(resources_id)),
            ("Contents", Object::Reference(content_id)),
        ]);
        page_ids.push(doc.add_object(page));
    }

    let pages_dict = Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Pages".to_vec())),
        ("Count", Object::Integer(page_ids.len() as i64)),
        (
            "Kids",
            Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
        ),
    ]);
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ]));
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).context("Write PDF")?;
    Ok(buffer)
}

fn font_object(doc: &mut Document, base_font: &str) -> ObjectId {
    doc.add_object(Dictionary::from_iter(vec![
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(base_font.as_bytes().to_vec())),
        ("Encoding", Object::Name(b"WinAnsiEncoding".to_vec())),
    ]))
}

/// A logo reference is either a `data:` URL or a path to a PNG/JPEG file.
fn load_logo(reference: &str) -> Result<Logo> {
    let bytes = if let Some(rest) = reference.strip_prefix("data:") {
        let (_, payload) = rest
            .split_once("base64,")
            .ok_or_else(|| anyhow!("Logo data URL is not base64"))?;
        general_purpose::STANDARD
            .decode(payload.trim())
            .context("Decode logo data URL")?
    } else {
        std::fs::read(reference).with_context(|| format!("Read logo {}", reference))?
    };
    let image = image::load_from_memory(&bytes).context("Decode logo image")?.to_rgb8();
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("Logo has no pixels"));
    }
    Ok(Logo {
        width,
        height,
        rgb: image.into_raw(),
    })
}

fn format_money(value: f64) -> String {
    format!("{:.2} €", value)
}

fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        let text = format!("{:.3}", value);
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Approximate Helvetica advance widths, enough for right alignment.
fn text_width(text: &str, size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| match c {
            ' ' | '.' | ',' | ':' | ';' | '!' | 'i' | 'j' | 'l' | 'I' | '\'' => 278,
            'f' | 't' | 'r' | '(' | ')' | '-' | '/' => 333,
            '0'..='9' | '$' | '€' => 556,
            'm' | 'M' | 'W' => 833,
            'w' => 722,
            '%' => 889,
            'A'..='Z' => 667,
            _ => 556,
        })
        .sum();
    units as f32 * size / 1000.0
}

fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{20}'..='\u{7e}' => c as u8,
            '\u{a0}'..='\u{ff}' => c as u32 as u8,
            '€' => 0x80,
            '…' => 0x85,
            '‘' => 0x91,
            '’' => 0x92,
            '“' => 0x93,
            '”' => 0x94,
            '•' => 0x95,
            '–' => 0x96,
            '—' => 0x97,
            '\t' => b' ',
            _ => b'?',
        })
        .collect()
}
