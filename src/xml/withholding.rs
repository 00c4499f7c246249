use crate::core::{FiscalDocument, FiscalError, IssuerProfile};

use super::writer::XmlWriter;
use super::{compact_number, establishment_address, write_issuer_flags};

/// `infoCompRetencion` + `impuestos`.
pub(super) fn write(
    w: &mut XmlWriter,
    doc: &FiscalDocument,
    issuer: &IssuerProfile,
) -> Result<(), FiscalError> {
    let period = doc
        .fiscal_period
        .ok_or_else(|| FiscalError::Build("withholding without a fiscal period".into()))?;

    w.start_element("infoCompRetencion")?;
    w.date_element("fechaEmision", doc.issue_date)?;
    w.text_element("dirEstablecimiento", establishment_address(issuer))?;
    write_issuer_flags(w, issuer)?;
    w.text_element(
        "tipoIdentificacionSujetoRetenido",
        doc.buyer.identification_type.code(),
    )?;
    w.text_element("razonSocialSujetoRetenido", &doc.buyer.name)?;
    w.text_element("identificacionSujetoRetenido", &doc.buyer.identification)?;
    w.text_element(
        "periodoFiscal",
        &format!("{:02}/{:04}", period.month, period.year),
    )?;
    w.end_element("infoCompRetencion")?;

    w.start_element("impuestos")?;
    for line in &doc.withholdings {
        let withheld = line.withheld.ok_or_else(|| {
            FiscalError::Build("withholding line without a calculated amount".into())
        })?;
        w.start_element("impuesto")?;
        w.text_element("codigo", line.tax.code())?;
        w.text_element("codigoRetencion", &line.code)?;
        w.amount_element("baseImponible", line.base)?;
        w.amount_element("porcentajeRetener", line.percent)?;
        w.amount_element("valorRetenido", withheld)?;
        w.text_element("codDocSustento", line.supporting.document_type.code())?;
        w.text_element("numDocSustento", &compact_number(&line.supporting.number))?;
        w.date_element("fechaEmisionDocSustento", line.supporting.issue_date)?;
        w.end_element("impuesto")?;
    }
    w.end_element("impuestos")?;
    Ok(())
}
