use crate::core::{
    FiscalDocument, FiscalError, IssuerProfile, SupportingDocument, TaxSummary, VatRate,
};

use super::invoice::{DetailCodes, write_details, write_payments};
use super::writer::XmlWriter;
use super::{currency_name, establishment_address, write_issuer_flags, write_total_taxes};

fn modified(doc: &FiscalDocument) -> Result<&SupportingDocument, FiscalError> {
    doc.modified_document
        .as_ref()
        .ok_or_else(|| FiscalError::Build("note without a modified document".into()))
}

fn write_buyer_and_reference(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    totals: &TaxSummary,
    issuer: &IssuerProfile,
) -> Result<(), FiscalError> {
    let reference = modified(doc)?;
    w.date_element("fechaEmision", doc.issue_date)?;
    w.text_element("dirEstablecimiento", establishment_address(issuer))?;
    w.text_element(
        "tipoIdentificacionComprador",
        doc.buyer.identification_type.code(),
    )?;
    w.text_element("razonSocialComprador", &doc.buyer.name)?;
    w.text_element("identificacionComprador", &doc.buyer.identification)?;
    write_issuer_flags(w, issuer)?;
    w.text_element("codDocModificado", reference.document_type.code())?;
    w.text_element("numDocModificado", &reference.number)?;
    w.date_element("fechaEmisionDocSustento", reference.issue_date)?;
    w.amount_element("totalSinImpuestos", totals.subtotal)?;
    Ok(())
}

/// `infoNotaCredito` + `detalles`.
pub(super) fn write_credit(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    totals: &TaxSummary,
    issuer: &IssuerProfile,
) -> Result<(), FiscalError> {
    w.start_element("infoNotaCredito")?;
    write_buyer_and_reference(w, doc, totals, issuer)?;
    w.amount_element("valorModificacion", totals.grand_total)?;
    w.text_element("moneda", currency_name(&doc.currency))?;
    w.start_element("totalConImpuestos")?;
    write_total_taxes(w, "totalImpuesto", totals)?;
    w.end_element("totalConImpuestos")?;
    w.text_element(
        "motivo",
        doc.reason
            .as_deref()
            .ok_or_else(|| FiscalError::Build("credit note without a reason".into()))?,
    )?;
    w.end_element("infoNotaCredito")?;

    write_details(w, doc, totals, DetailCodes::Internal)
}

/// `infoNotaDebito` + `motivos`. Each line is one debit reason.
pub(super) fn write_debit(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    totals: &TaxSummary,
    issuer: &IssuerProfile,
) -> Result<(), FiscalError> {
    w.start_element("infoNotaDebito")?;
    write_buyer_and_reference(w, doc, totals, issuer)?;
    w.start_element("impuestos")?;
    for bucket in &totals.vat_buckets {
        w.start_element("impuesto")?;
        w.text_element("codigo", VatRate::TAX_CODE)?;
        w.text_element("codigoPorcentaje", bucket.rate.code())?;
        w.amount_element("tarifa", bucket.rate.percent())?;
        w.amount_element("baseImponible", bucket.base)?;
        w.amount_element("valor", bucket.vat)?;
        w.end_element("impuesto")?;
    }
    w.end_element("impuestos")?;
    w.amount_element("valorTotal", totals.grand_total)?;
    write_payments(w, doc)?;
    w.end_element("infoNotaDebito")?;

    w.start_element("motivos")?;
    for (line, amounts) in doc.lines.iter().zip(&totals.lines) {
        w.start_element("motivo")?;
        w.text_element("razon", &line.description)?;
        w.amount_element("valor", amounts.subtotal)?;
        w.end_element("motivo")?;
    }
    w.end_element("motivos")?;
    Ok(())
}
