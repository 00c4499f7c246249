use chrono::{NaiveDate, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rust_decimal_macros::dec;

use efactura::core::*;
use efactura::sign::c14n;
use efactura::sign::{CertificateBundle, XadesSigner};
use efactura::xml;

fn test_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

fn issuer() -> IssuerProfile {
    IssuerProfile {
        ruc: "1790012345001".into(),
        legal_name: "COMERCIAL ANDINA S.A.".into(),
        trade_name: None,
        head_office_address: "Av. Amazonas N34-120, Quito".into(),
        establishment_address: None,
        special_taxpayer: None,
        keeps_accounting: true,
        withholding_agent: None,
        rimpe_legend: None,
    }
}

fn build_invoice(lines: usize) -> FiscalDocument {
    let mut builder = FiscalDocumentBuilder::new("bench", DocumentType::Invoice, test_date())
        .buyer(
            PartyBuilder::new(IdentificationType::Ruc, "0992345678001", "Cliente S.A.")
                .build(),
        );
    for i in 1..=lines {
        let vat = if i % 3 == 0 { VatRate::Zero } else { VatRate::Standard15 };
        builder = builder.add_line(
            LineBuilder::new(format!("P-{i}"), format!("Item {i}"), dec!(3), dec!(9.99))
                .vat(vat)
                .build(),
        );
    }
    builder.build().unwrap()
}

fn keyed(mut doc: FiscalDocument) -> (FiscalDocument, AccessKey) {
    doc.sequential = Some(1);
    let code = NumericCode::parse("12345678").unwrap();
    let key = AccessKey::generate(&AccessKeyParts {
        issue_date: doc.issue_date,
        document_type: doc.document_type,
        ruc: "1790012345001",
        environment: Environment::Test,
        establishment: &doc.establishment,
        emission_point: &doc.emission_point,
        sequential: 1,
        numeric_code: &code,
    })
    .unwrap();
    (doc, key)
}

fn bench_build_document(c: &mut Criterion) {
    c.bench_function("build_10_line_document", |b| {
        b.iter(|| black_box(build_invoice(10)));
    });
    c.bench_function("build_1000_line_document", |b| {
        b.iter(|| black_box(build_invoice(1000)));
    });
}

fn bench_render_xml(c: &mut Criterion) {
    let (doc, key) = keyed(build_invoice(10));
    let totals = doc.totals.clone().unwrap();
    let issuer = issuer();
    c.bench_function("render_10_line_xml", |b| {
        b.iter(|| black_box(xml::to_xml(black_box(&doc), &totals, &key, &issuer).unwrap()));
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let (doc, key) = keyed(build_invoice(1000));
    let rendered = xml::to_xml(&doc, doc.totals.as_ref().unwrap(), &key, &issuer()).unwrap();
    c.bench_function("c14n_1000_line_document", |b| {
        b.iter(|| black_box(c14n::canonicalize_enveloped(&rendered).unwrap()));
    });
}

fn bench_sign(c: &mut Criterion) {
    let p12 = std::fs::read("tests/fixtures/signer.p12").unwrap();
    let bundle = CertificateBundle::from_pkcs12(&p12, "clave-firma-2024").unwrap();
    let (doc, key) = keyed(build_invoice(10));
    let rendered = xml::to_xml(&doc, doc.totals.as_ref().unwrap(), &key, &issuer()).unwrap();
    let signer = XadesSigner::new(&bundle);
    c.bench_function("sign_10_line_document", |b| {
        b.iter(|| black_box(signer.sign(black_box(&rendered), Utc::now()).unwrap()));
    });
}

fn bench_access_key(c: &mut Criterion) {
    let digits = "150320240117900123450011001002000000123123456781";
    c.bench_function("mod11_check_digit", |b| {
        b.iter(|| black_box(efactura::core::access_key::mod11_check_digit(black_box(digits))));
    });
}

criterion_group!(
    benches,
    bench_build_document,
    bench_render_xml,
    bench_canonicalize,
    bench_sign,
    bench_access_key,
);
criterion_main!(benches);
