//! RIDE: the printable representation of an electronic document.
//!
//! A plain, single-font PDF listing issuer, access key, authorization,
//! buyer, detail lines and totals. Text is laid out in fixed-width columns
//! with Courier, so no font metrics are needed.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, Stream, StringFormat, dictionary};
use rust_decimal::Decimal;

use crate::core::tax::round_half_up;
use crate::core::{DocumentType, FiscalDocument, FiscalError, IssuerProfile, WithholdingTax};

const PAGE_WIDTH: i64 = 595;
const PAGE_HEIGHT: i64 = 842;
const MARGIN: i64 = 40;
const FONT_SIZE: i64 = 8;
const LEADING: i64 = 11;
const LINES_PER_PAGE: usize = ((PAGE_HEIGHT - 2 * MARGIN) / LEADING) as usize;
const WIDTH: usize = 100;

fn title(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Invoice => "FACTURA",
        DocumentType::Receipt => "NOTA DE VENTA",
        DocumentType::PurchaseLiquidation => "LIQUIDACIÓN DE COMPRA",
        DocumentType::CreditNote => "NOTA DE CRÉDITO",
        DocumentType::DebitNote => "NOTA DE DÉBITO",
        DocumentType::Withholding => "COMPROBANTE DE RETENCIÓN",
    }
}

fn money(value: Decimal) -> String {
    let mut rounded = round_half_up(value, 2);
    rounded.rescale(2);
    rounded.to_string()
}

fn fit(text: &str, width: usize) -> String {
    let mut out: String = text.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat_n(' ', width - len));
    out
}

fn row(label: &str, value: &str) -> String {
    format!("{:>70} {:>14}", label, value)
}

/// Text lines of the RIDE, top to bottom.
pub fn layout(doc: &FiscalDocument, issuer: &IssuerProfile) -> Vec<String> {
    let mut out = Vec::new();
    let rule = "-".repeat(WIDTH);

    out.push(issuer.legal_name.clone());
    if let Some(trade) = &issuer.trade_name {
        out.push(trade.clone());
    }
    out.push(format!("RUC: {}", issuer.ruc));
    out.push(format!("Dirección matriz: {}", issuer.head_office_address));
    out.push(format!(
        "Obligado a llevar contabilidad: {}",
        if issuer.keeps_accounting { "SI" } else { "NO" }
    ));
    if let Some(special) = &issuer.special_taxpayer {
        out.push(format!("Contribuyente especial Nro: {special}"));
    }
    if let Some(legend) = &issuer.rimpe_legend {
        out.push(legend.clone());
    }
    out.push(rule.clone());

    out.push(format!(
        "{}  No. {}",
        title(doc.document_type),
        doc.series_number().unwrap_or_default()
    ));
    if let Some(key) = &doc.access_key {
        out.push(format!("Clave de acceso: {}", key.as_str()));
        out.push(format!(
            "Ambiente: {}   Emisión: NORMAL",
            match key.environment() {
                crate::core::Environment::Test => "PRUEBAS",
                crate::core::Environment::Production => "PRODUCCIÓN",
            }
        ));
    }
    match (&doc.authorization_number, doc.authorization_date) {
        (Some(number), Some(date)) => {
            out.push(format!("Número de autorización: {number}"));
            out.push(format!(
                "Fecha de autorización: {}",
                date.format("%d/%m/%Y %H:%M:%S")
            ));
        }
        (Some(number), None) => out.push(format!("Número de autorización: {number}")),
        _ => out.push("Pendiente de autorización".to_string()),
    }
    out.push(rule.clone());

    out.push(format!(
        "Razón social: {}   Identificación: {}",
        doc.buyer.name, doc.buyer.identification
    ));
    out.push(format!(
        "Fecha de emisión: {}",
        doc.issue_date.format("%d/%m/%Y")
    ));
    if let Some(address) = &doc.buyer.address {
        out.push(format!("Dirección: {address}"));
    }
    if let Some(modified) = &doc.modified_document {
        out.push(format!(
            "Comprobante modificado: {} {} del {}",
            title(modified.document_type),
            modified.number,
            modified.issue_date.format("%d/%m/%Y")
        ));
    }
    if let Some(reason) = &doc.reason {
        out.push(format!("Razón de modificación: {reason}"));
    }
    out.push(rule.clone());

    if doc.document_type == DocumentType::Withholding {
        withholding_section(doc, &mut out);
    } else {
        detail_section(doc, &mut out);
    }

    if !doc.additional_fields.is_empty() || doc.buyer.email.is_some() {
        out.push(rule);
        out.push("Información adicional".to_string());
        if let Some(email) = &doc.buyer.email {
            out.push(format!("  Email: {email}"));
        }
        if let Some(phone) = &doc.buyer.phone {
            out.push(format!("  Teléfono: {phone}"));
        }
        for field in &doc.additional_fields {
            out.push(format!("  {}: {}", field.name, field.value));
        }
    }
    out
}

fn detail_section(doc: &FiscalDocument, out: &mut Vec<String>) {
    out.push(format!(
        "{} {} {:>10} {:>12} {:>10} {:>12}",
        fit("Código", 12),
        fit("Descripción", 38),
        "Cant.",
        "P. Unitario",
        "Descuento",
        "Total"
    ));
    for line in &doc.lines {
        let subtotal = line.amounts.map(|a| a.subtotal).unwrap_or_default();
        out.push(format!(
            "{} {} {:>10} {:>12} {:>10} {:>12}",
            fit(&line.code, 12),
            fit(&line.description, 38),
            line.quantity.normalize().to_string(),
            money(line.unit_price),
            money(line.discount),
            money(subtotal)
        ));
    }

    let Some(totals) = &doc.totals else {
        return;
    };
    out.push(String::new());
    for bucket in &totals.vat_buckets {
        out.push(row(
            &format!("SUBTOTAL {}%", bucket.rate.percent().normalize()),
            &money(bucket.base),
        ));
    }
    out.push(row("SUBTOTAL SIN IMPUESTOS", &money(totals.subtotal)));
    out.push(row("TOTAL DESCUENTO", &money(totals.discount_total)));
    if totals.excise_total > Decimal::ZERO {
        out.push(row("ICE", &money(totals.excise_total)));
    }
    for bucket in totals.vat_buckets.iter().filter(|b| b.vat > Decimal::ZERO) {
        out.push(row(
            &format!("IVA {}%", bucket.rate.percent().normalize()),
            &money(bucket.vat),
        ));
    }
    if doc.document_type == DocumentType::Invoice {
        out.push(row("PROPINA", &money(totals.tip)));
    }
    out.push(row("VALOR TOTAL", &money(totals.grand_total)));
}

fn withholding_section(doc: &FiscalDocument, out: &mut Vec<String>) {
    if let Some(period) = doc.fiscal_period {
        out.push(format!(
            "Periodo fiscal: {:02}/{}",
            period.month, period.year
        ));
    }
    out.push(format!(
        "{} {} {:>12} {:>8} {:>12}",
        fit("Impuesto", 8),
        fit("Comprobante", 30),
        "Base",
        "%",
        "Retenido"
    ));
    for line in &doc.withholdings {
        let tax = match line.tax {
            WithholdingTax::Income => "RENTA",
            WithholdingTax::Vat => "IVA",
            WithholdingTax::CurrencyOutflow => "ISD",
        };
        out.push(format!(
            "{} {} {:>12} {:>8} {:>12}",
            fit(tax, 8),
            fit(&line.supporting.number, 30),
            money(line.base),
            line.percent.normalize().to_string(),
            money(line.withheld.unwrap_or_default())
        ));
    }
    if let Some(totals) = &doc.totals {
        out.push(String::new());
        out.push(row("TOTAL RETENIDO", &money(totals.withheld_total)));
    }
}

/// PDF bytes (WinAnsi-encoded Courier text; unmappable characters become `?`).
fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Render the RIDE of `doc` as a PDF.
pub fn render(doc: &FiscalDocument, issuer: &IssuerProfile) -> Result<Vec<u8>, FiscalError> {
    let lines = layout(doc, issuer);
    let mut pdf = Document::with_version("1.5");
    let pages_id = pdf.new_object_id();
    let font_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = pdf.add_object(dictionary! {
        "Font" => dictionary! { "F1" => Object::Reference(font_id) },
    });

    let mut kids = Vec::new();
    for chunk in lines.chunks(LINES_PER_PAGE) {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![Object::Name(b"F1".to_vec()), Object::Integer(FONT_SIZE)],
            ),
            Operation::new("TL", vec![Object::Integer(LEADING)]),
            Operation::new(
                "Td",
                vec![Object::Integer(MARGIN), Object::Integer(PAGE_HEIGHT - MARGIN)],
            ),
        ];
        for text in chunk {
            operations.push(Operation::new(
                "Tj",
                vec![Object::String(encode(text), StringFormat::Literal)],
            ));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations }
            .encode()
            .map_err(|e| FiscalError::Build(format!("RIDE content stream: {e}")))?;
        let content_id = pdf.add_object(Stream::new(Dictionary::new(), content));
        let page_id = pdf.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "MediaBox" => Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(PAGE_WIDTH),
                Object::Integer(PAGE_HEIGHT),
            ]),
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Reference(resources_id),
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => Object::Array(kids),
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    pdf.trailer.set("Root", Object::Reference(catalog_id));
    pdf.compress();

    let mut output = Vec::new();
    pdf.save_to(&mut output)
        .map_err(|e| FiscalError::Build(format!("failed to save RIDE PDF: {e}")))?;
    Ok(output)
}
