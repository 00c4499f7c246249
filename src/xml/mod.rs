//! Authority XML for each electronic document type.
//!
//! Output is byte-deterministic for the same inputs: element order is fixed
//! by the schema, numbers use fixed decimals and nothing depends on the
//! clock or on hash iteration order.

mod invoice;
mod notes;
pub mod tree;
mod withholding;
pub mod writer;

pub use writer::XmlWriter;

use crate::core::access_key::EMISSION_TYPE_NORMAL;
use crate::core::{
    AccessKey, DocumentType, FiscalDocument, FiscalError, IssuerProfile, TaxSummary, VatRate,
    format_sequential,
};

/// `id` of the root element; the signature references it as `#comprobante`.
pub const ROOT_ID: &str = "comprobante";

/// Root element name and schema version per document type.
pub fn root_element(document_type: DocumentType) -> Option<(&'static str, &'static str)> {
    match document_type {
        DocumentType::Invoice => Some(("factura", "1.1.0")),
        DocumentType::PurchaseLiquidation => Some(("liquidacionCompra", "1.1.0")),
        DocumentType::CreditNote => Some(("notaCredito", "1.1.0")),
        DocumentType::DebitNote => Some(("notaDebito", "1.0.0")),
        DocumentType::Withholding => Some(("comprobanteRetencion", "1.0.0")),
        DocumentType::Receipt => None,
    }
}

/// Render the unsigned authority XML for `doc`.
pub fn to_xml(
    doc: &FiscalDocument,
    totals: &TaxSummary,
    key: &AccessKey,
    issuer: &IssuerProfile,
) -> Result<String, FiscalError> {
    let (root, version) = root_element(doc.document_type).ok_or_else(|| {
        FiscalError::Build(format!(
            "document type {} is not issued electronically",
            doc.document_type.code()
        ))
    })?;
    let sequential = doc
        .sequential
        .ok_or_else(|| FiscalError::Build("document has no sequential".into()))?;
    if key.sequential() != sequential
        || key.establishment() != doc.establishment
        || key.emission_point() != doc.emission_point
        || key.document_type() != Some(doc.document_type)
        || key.ruc() != issuer.ruc
    {
        return Err(FiscalError::Build(format!(
            "access key {key} does not belong to document {}",
            doc.id
        )));
    }
    if doc.document_type.requires_modified_document() && doc.modified_document.is_none() {
        return Err(FiscalError::Build(
            "note without a modified document".into(),
        ));
    }

    let mut w = XmlWriter::new()?;
    w.start_element_with_attrs(root, &[("id", ROOT_ID), ("version", version)])?;
    write_info_tributaria(&mut w, doc, key, issuer, sequential)?;
    match doc.document_type {
        DocumentType::Invoice | DocumentType::PurchaseLiquidation => {
            invoice::write(&mut w, doc, totals, issuer)?
        }
        DocumentType::CreditNote => notes::write_credit(&mut w, doc, totals, issuer)?,
        DocumentType::DebitNote => notes::write_debit(&mut w, doc, totals, issuer)?,
        DocumentType::Withholding => withholding::write(&mut w, doc, issuer)?,
        DocumentType::Receipt => {
            return Err(FiscalError::Build("receipts have no authority XML".into()));
        }
    }
    write_additional_info(&mut w, doc)?;
    w.end_element(root)?;
    w.into_string()
}

fn write_info_tributaria(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    key: &AccessKey,
    issuer: &IssuerProfile,
    sequential: u64,
) -> Result<(), FiscalError> {
    w.start_element("infoTributaria")?;
    w.text_element("ambiente", key.environment().code())?;
    w.text_element("tipoEmision", EMISSION_TYPE_NORMAL)?;
    w.text_element("razonSocial", &issuer.legal_name)?;
    w.optional_text_element("nombreComercial", issuer.trade_name.as_deref())?;
    w.text_element("ruc", &issuer.ruc)?;
    w.text_element("claveAcceso", key.as_str())?;
    w.text_element("codDoc", doc.document_type.code())?;
    w.text_element("estab", &doc.establishment)?;
    w.text_element("ptoEmi", &doc.emission_point)?;
    w.text_element("secuencial", &format_sequential(sequential)?)?;
    w.text_element("dirMatriz", &issuer.head_office_address)?;
    w.optional_text_element("agenteRetencion", issuer.withholding_agent.as_deref())?;
    w.optional_text_element("contribuyenteRimpe", issuer.rimpe_legend.as_deref())?;
    w.end_element("infoTributaria")?;
    Ok(())
}

/// Issuer fields shared by every `info*` block, in schema order.
pub(crate) fn write_issuer_flags(
    w: &mut XmlWriter,
    issuer: &IssuerProfile,
) -> Result<(), FiscalError> {
    w.optional_text_element("contribuyenteEspecial", issuer.special_taxpayer.as_deref())?;
    w.text_element("obligadoContabilidad", yes_no(issuer.keeps_accounting))?;
    Ok(())
}

pub(crate) fn establishment_address(issuer: &IssuerProfile) -> &str {
    issuer
        .establishment_address
        .as_deref()
        .unwrap_or(&issuer.head_office_address)
}

/// `totalConImpuestos` entries (IVA buckets then ICE) without `tarifa`.
pub(crate) fn write_total_taxes(
    w: &mut XmlWriter,
    element: &str,
    totals: &TaxSummary,
) -> Result<(), FiscalError> {
    for bucket in &totals.vat_buckets {
        w.start_element(element)?;
        w.text_element("codigo", VatRate::TAX_CODE)?;
        w.text_element("codigoPorcentaje", bucket.rate.code())?;
        w.amount_element("baseImponible", bucket.base)?;
        w.amount_element("valor", bucket.vat)?;
        w.end_element(element)?;
    }
    for excise in &totals.excise {
        w.start_element(element)?;
        w.text_element("codigo", crate::core::ExciseRate::TAX_CODE)?;
        w.text_element("codigoPorcentaje", &excise.code)?;
        w.amount_element("baseImponible", excise.base)?;
        w.amount_element("valor", excise.amount)?;
        w.end_element(element)?;
    }
    Ok(())
}

/// `moneda` is spelled out for the dollar.
pub(crate) fn currency_name(code: &str) -> &str {
    if code.eq_ignore_ascii_case("USD") {
        "DOLAR"
    } else {
        code
    }
}

/// `001-001-000000123` → `001001000000123`.
pub(crate) fn compact_number(number: &str) -> String {
    number.chars().filter(|c| *c != '-').collect()
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "SI" } else { "NO" }
}

fn write_additional_info(w: &mut XmlWriter, doc: &FiscalDocument) -> Result<(), FiscalError> {
    let mut fields: Vec<(&str, &str)> = Vec::new();
    if let Some(email) = doc.buyer.email.as_deref() {
        fields.push(("Email", email));
    }
    if let Some(phone) = doc.buyer.phone.as_deref() {
        fields.push(("Telefono", phone));
    }
    fields.extend(
        doc.additional_fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str())),
    );
    if fields.is_empty() {
        return Ok(());
    }
    w.start_element("infoAdicional")?;
    for (name, value) in fields {
        w.text_element_with_attrs("campoAdicional", value, &[("nombre", name)])?;
    }
    w.end_element("infoAdicional")?;
    Ok(())
}
