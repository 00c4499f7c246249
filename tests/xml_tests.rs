#![cfg(feature = "xml")]

use chrono::NaiveDate;
use efactura::core::*;
use efactura::xml::{self, tree};
use rust_decimal_macros::dec;

const ISSUER_RUC: &str = "1790012345001";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn issuer() -> IssuerProfile {
    IssuerProfile {
        ruc: ISSUER_RUC.into(),
        legal_name: "COMERCIAL ANDINA S.A.".into(),
        trade_name: Some("ANDINA".into()),
        head_office_address: "Av. Amazonas N34-12, Quito".into(),
        establishment_address: None,
        special_taxpayer: None,
        keeps_accounting: true,
        withholding_agent: None,
        rimpe_legend: None,
    }
}

fn buyer() -> Party {
    PartyBuilder::new(IdentificationType::Ruc, "0992345678001", "DISTRIBUIDORA COSTA & HIJOS")
        .address("Malecón 100, Guayaquil")
        .email("compras@costa.ec")
        .build()
}

/// Number the draft and give it a key, as the service would.
fn numbered(mut doc: FiscalDocument, sequential: u64) -> (FiscalDocument, AccessKey) {
    doc.sequential = Some(sequential);
    let code = NumericCode::parse("12345678").unwrap();
    let key = AccessKey::generate(&AccessKeyParts {
        issue_date: doc.issue_date,
        document_type: doc.document_type,
        ruc: ISSUER_RUC,
        environment: Environment::Test,
        establishment: &doc.establishment,
        emission_point: &doc.emission_point,
        sequential,
        numeric_code: &code,
    })
    .unwrap();
    doc.access_key = Some(key.clone());
    (doc, key)
}

fn render(doc: &FiscalDocument, key: &AccessKey) -> String {
    xml::to_xml(doc, doc.totals.as_ref().unwrap(), key, &issuer()).unwrap()
}

fn invoice() -> FiscalDocument {
    FiscalDocumentBuilder::new("acme", DocumentType::Invoice, date(2024, 3, 15))
        .buyer(buyer())
        .add_line(LineBuilder::new("S-1", "Servicio técnico", dec!(2), dec!(50)).build())
        .add_line(
            LineBuilder::new("L-1", "Libro", dec!(1), dec!(50))
                .vat(VatRate::Zero)
                .build(),
        )
        .additional_field("Vendedor", "María")
        .build()
        .unwrap()
}

#[test]
fn invoice_structure() {
    let (doc, key) = numbered(invoice(), 45);
    let xml = render(&doc, &key);
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));

    let root = tree::parse(&xml).unwrap();
    assert_eq!(root.name, "factura");
    assert_eq!(root.get_attr("id"), Some("comprobante"));
    assert_eq!(root.get_attr("version"), Some("1.1.0"));

    let info = root.first_child("infoTributaria").unwrap();
    assert_eq!(info.child_text("ambiente").as_deref(), Some("1"));
    assert_eq!(info.child_text("claveAcceso").as_deref(), Some(key.as_str()));
    assert_eq!(info.child_text("codDoc").as_deref(), Some("01"));
    assert_eq!(info.child_text("secuencial").as_deref(), Some("000000045"));

    let factura = root.first_child("infoFactura").unwrap();
    assert_eq!(factura.child_text("fechaEmision").as_deref(), Some("15/03/2024"));
    assert_eq!(
        factura.child_text("razonSocialComprador").as_deref(),
        Some("DISTRIBUIDORA COSTA & HIJOS")
    );
    assert_eq!(factura.child_text("totalSinImpuestos").as_deref(), Some("150.00"));
    assert_eq!(factura.child_text("propina").as_deref(), Some("0.00"));
    assert_eq!(factura.child_text("importeTotal").as_deref(), Some("165.00"));
    assert_eq!(factura.child_text("moneda").as_deref(), Some("DOLAR"));

    let pago = factura.descendant("pago").unwrap();
    assert_eq!(pago.child_text("formaPago").as_deref(), Some("20"));
    assert_eq!(pago.child_text("total").as_deref(), Some("165.00"));

    let details: Vec<_> = root.first_child("detalles").unwrap().elements().collect();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].child_text("codigoPrincipal").as_deref(), Some("S-1"));
    let tax = details[0].descendant("impuesto").unwrap();
    assert_eq!(tax.child_text("codigo").as_deref(), Some("2"));
    assert_eq!(tax.child_text("codigoPorcentaje").as_deref(), Some("4"));
    assert_eq!(tax.child_text("valor").as_deref(), Some("15.00"));

    let extra = root.first_child("infoAdicional").unwrap();
    let names: Vec<_> = extra
        .elements()
        .filter_map(|c| c.get_attr("nombre"))
        .collect();
    assert_eq!(names, ["Email", "Vendedor"]);
}

#[test]
fn output_is_deterministic() {
    let (doc, key) = numbered(invoice(), 7);
    assert_eq!(render(&doc, &key), render(&doc, &key));
    assert!(!render(&doc, &key).contains("\n<"));
}

#[test]
fn purchase_liquidation_names_the_supplier() {
    let supplier =
        PartyBuilder::new(IdentificationType::Cedula, "1710034065", "Juan Pérez").build();
    let corn = LineBuilder::new("M-1", "Maíz", dec!(100), dec!(0.35))
        .vat(VatRate::Zero)
        .build();
    let issued = date(2024, 3, 15);
    let doc = FiscalDocumentBuilder::new("acme", DocumentType::PurchaseLiquidation, issued)
        .buyer(supplier)
        .add_line(corn)
        .build()
        .unwrap();
    let (doc, key) = numbered(doc, 1);
    let root = tree::parse(&render(&doc, &key)).unwrap();
    assert_eq!(root.name, "liquidacionCompra");
    let info = root.first_child("infoLiquidacionCompra").unwrap();
    assert_eq!(info.child_text("razonSocialProveedor").as_deref(), Some("Juan Pérez"));
    assert_eq!(info.child_text("importeTotal").as_deref(), Some("35.00"));
}

#[test]
fn credit_note_references_the_invoice() {
    let doc = FiscalDocumentBuilder::new("acme", DocumentType::CreditNote, date(2024, 3, 20))
        .buyer(buyer())
        .modifies(SupportingDocument {
            document_type: DocumentType::Invoice,
            number: "001-001-000000045".into(),
            issue_date: date(2024, 3, 15),
        })
        .reason("Devolución de mercadería")
        .add_line(LineBuilder::new("S-1", "Servicio técnico", dec!(1), dec!(50)).build())
        .build()
        .unwrap();
    assert!(doc.payments.is_empty());
    let (doc, key) = numbered(doc, 3);
    let root = tree::parse(&render(&doc, &key)).unwrap();
    assert_eq!(root.name, "notaCredito");
    let info = root.first_child("infoNotaCredito").unwrap();
    assert_eq!(info.child_text("codDocModificado").as_deref(), Some("01"));
    assert_eq!(info.child_text("numDocModificado").as_deref(), Some("001-001-000000045"));
    assert_eq!(info.child_text("fechaEmisionDocSustento").as_deref(), Some("15/03/2024"));
    assert_eq!(info.child_text("valorModificacion").as_deref(), Some("57.50"));
    assert_eq!(info.child_text("motivo").as_deref(), Some("Devolución de mercadería"));
    assert!(root.first_child("detalles").unwrap().descendant("codigoInterno").is_some());
}

#[test]
fn debit_note_lists_reasons() {
    let doc = FiscalDocumentBuilder::new("acme", DocumentType::DebitNote, date(2024, 3, 20))
        .buyer(buyer())
        .modifies(SupportingDocument {
            document_type: DocumentType::Invoice,
            number: "001-001-000000045".into(),
            issue_date: date(2024, 3, 15),
        })
        .add_line(LineBuilder::new("INT", "Intereses por mora", dec!(1), dec!(10)).build())
        .build()
        .unwrap();
    let (doc, key) = numbered(doc, 9);
    let root = tree::parse(&render(&doc, &key)).unwrap();
    assert_eq!(root.get_attr("version"), Some("1.0.0"));
    let info = root.first_child("infoNotaDebito").unwrap();
    assert_eq!(info.child_text("valorTotal").as_deref(), Some("11.50"));
    assert_eq!(
        info.descendant("impuesto").unwrap().child_text("tarifa").as_deref(),
        Some("15.00")
    );
    let motivo = root.first_child("motivos").unwrap().first_child("motivo").unwrap();
    assert_eq!(motivo.child_text("razon").as_deref(), Some("Intereses por mora"));
    assert_eq!(motivo.child_text("valor").as_deref(), Some("10.00"));
}

#[test]
fn withholding_voucher() {
    let doc = FiscalDocumentBuilder::new("acme", DocumentType::Withholding, date(2024, 3, 20))
        .buyer(buyer())
        .fiscal_period(3, 2024)
        .add_withholding(WithholdingLine::new(
            WithholdingTax::Income,
            "312",
            dec!(1000),
            dec!(1.75),
            SupportingDocument {
                document_type: DocumentType::Invoice,
                number: "002-001-000000456".into(),
                issue_date: date(2024, 3, 1),
            },
        ))
        .build()
        .unwrap();
    let (doc, key) = numbered(doc, 12);
    let root = tree::parse(&render(&doc, &key)).unwrap();
    assert_eq!(root.name, "comprobanteRetencion");
    let info = root.first_child("infoCompRetencion").unwrap();
    assert_eq!(info.child_text("periodoFiscal").as_deref(), Some("03/2024"));
    let tax = root.first_child("impuestos").unwrap().first_child("impuesto").unwrap();
    assert_eq!(tax.child_text("codigoRetencion").as_deref(), Some("312"));
    assert_eq!(tax.child_text("valorRetenido").as_deref(), Some("17.50"));
    assert_eq!(tax.child_text("numDocSustento").as_deref(), Some("002001000000456"));
}

#[test]
fn key_from_another_document_is_refused() {
    let (doc, _) = numbered(invoice(), 45);
    let (_, other_key) = numbered(invoice(), 46);
    let err = xml::to_xml(&doc, doc.totals.as_ref().unwrap(), &other_key, &issuer()).unwrap_err();
    assert_eq!(err.kind(), "build_error");
}

#[test]
fn receipts_have_no_xml() {
    let doc = FiscalDocumentBuilder::new("acme", DocumentType::Receipt, date(2024, 3, 15))
        .buyer(PartyBuilder::final_consumer().build())
        .add_line(LineBuilder::new("A", "Café", dec!(1), dec!(2)).build())
        .build()
        .unwrap();
    assert!(xml::root_element(doc.document_type).is_none());
    let code = NumericCode::parse("12345678").unwrap();
    let key = AccessKey::generate(&AccessKeyParts {
        issue_date: doc.issue_date,
        document_type: doc.document_type,
        ruc: ISSUER_RUC,
        environment: Environment::Test,
        establishment: "001",
        emission_point: "001",
        sequential: 1,
        numeric_code: &code,
    });
    assert!(key.is_err());
}
