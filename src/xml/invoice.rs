use crate::core::{
    DocumentLine, DocumentType, ExciseRate, FiscalDocument, FiscalError, IssuerProfile,
    LineAmounts, TaxSummary, VatRate,
};

use super::writer::XmlWriter;
use super::{currency_name, establishment_address, write_issuer_flags, write_total_taxes};

/// `infoFactura` / `infoLiquidacionCompra`, `detalles`.
pub(super) fn write(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    totals: &TaxSummary,
    issuer: &IssuerProfile,
) -> Result<(), FiscalError> {
    let (info, party) = match doc.document_type {
        DocumentType::PurchaseLiquidation => ("infoLiquidacionCompra", "Proveedor"),
        _ => ("infoFactura", "Comprador"),
    };

    w.start_element(info)?;
    w.date_element("fechaEmision", doc.issue_date)?;
    w.text_element("dirEstablecimiento", establishment_address(issuer))?;
    write_issuer_flags(w, issuer)?;
    w.text_element(
        &format!("tipoIdentificacion{party}"),
        doc.buyer.identification_type.code(),
    )?;
    if party == "Comprador" {
        w.text_element("razonSocialComprador", &doc.buyer.name)?;
        w.text_element("identificacionComprador", &doc.buyer.identification)?;
        w.optional_text_element("direccionComprador", doc.buyer.address.as_deref())?;
    } else {
        w.text_element("razonSocialProveedor", &doc.buyer.name)?;
        w.text_element("identificacionProveedor", &doc.buyer.identification)?;
        w.optional_text_element("direccionProveedor", doc.buyer.address.as_deref())?;
    }
    w.amount_element("totalSinImpuestos", totals.subtotal)?;
    w.amount_element("totalDescuento", totals.discount_total)?;
    w.start_element("totalConImpuestos")?;
    write_total_taxes(w, "totalImpuesto", totals)?;
    w.end_element("totalConImpuestos")?;
    if doc.document_type == DocumentType::Invoice {
        w.amount_element("propina", totals.tip)?;
    }
    w.amount_element("importeTotal", totals.grand_total)?;
    w.text_element("moneda", currency_name(&doc.currency))?;
    write_payments(w, doc)?;
    w.end_element(info)?;

    write_details(w, doc, totals, DetailCodes::Principal)
}

pub(super) fn write_payments(w: &mut XmlWriter, doc: &FiscalDocument) -> Result<(), FiscalError> {
    if doc.payments.is_empty() {
        return Ok(());
    }
    w.start_element("pagos")?;
    for payment in &doc.payments {
        w.start_element("pago")?;
        w.text_element("formaPago", payment.method.code())?;
        w.amount_element("total", payment.amount)?;
        if let Some(days) = payment.term_days {
            w.text_element("plazo", &days.to_string())?;
            w.text_element("unidadTiempo", "dias")?;
        }
        w.end_element("pago")?;
    }
    w.end_element("pagos")?;
    Ok(())
}

/// Line code element names differ between invoices and credit notes.
#[derive(Clone, Copy)]
pub(super) enum DetailCodes {
    /// `codigoPrincipal` / `codigoAuxiliar`.
    Principal,
    /// `codigoInterno` / `codigoAdicional`.
    Internal,
}

pub(super) fn write_details(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    totals: &TaxSummary,
    codes: DetailCodes,
) -> Result<(), FiscalError> {
    if totals.lines.len() != doc.lines.len() {
        return Err(FiscalError::Build(format!(
            "totals cover {} lines, document has {}",
            totals.lines.len(),
            doc.lines.len()
        )));
    }
    let (main, aux) = match codes {
        DetailCodes::Principal => ("codigoPrincipal", "codigoAuxiliar"),
        DetailCodes::Internal => ("codigoInterno", "codigoAdicional"),
    };

    w.start_element("detalles")?;
    for (line, amounts) in doc.lines.iter().zip(&totals.lines) {
        w.start_element("detalle")?;
        w.text_element(main, &line.code)?;
        w.optional_text_element(aux, line.auxiliary_code.as_deref())?;
        w.text_element("descripcion", &line.description)?;
        w.quantity_element("cantidad", line.quantity)?;
        w.quantity_element("precioUnitario", line.unit_price)?;
        w.amount_element("descuento", line.discount)?;
        w.amount_element("precioTotalSinImpuesto", amounts.subtotal)?;
        w.start_element("impuestos")?;
        write_line_taxes(w, line, amounts)?;
        w.end_element("impuestos")?;
        w.end_element("detalle")?;
    }
    w.end_element("detalles")?;
    Ok(())
}

fn write_line_taxes(
    w: &mut XmlWriter,
    line: &DocumentLine,
    amounts: &LineAmounts,
) -> Result<(), FiscalError> {
    w.start_element("impuesto")?;
    w.text_element("codigo", VatRate::TAX_CODE)?;
    w.text_element("codigoPorcentaje", line.vat.code())?;
    w.amount_element("tarifa", line.vat.percent())?;
    w.amount_element("baseImponible", amounts.subtotal)?;
    w.amount_element("valor", amounts.vat)?;
    w.end_element("impuesto")?;
    if let Some(excise) = &line.excise {
        w.start_element("impuesto")?;
        w.text_element("codigo", ExciseRate::TAX_CODE)?;
        w.text_element("codigoPorcentaje", &excise.code)?;
        w.amount_element("tarifa", excise.percent)?;
        w.amount_element("baseImponible", amounts.subtotal)?;
        w.amount_element("valor", amounts.excise)?;
        w.end_element("impuesto")?;
    }
    Ok(())
}
