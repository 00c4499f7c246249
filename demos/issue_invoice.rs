//! Full pipeline against an in-process authority stand-in: build, number,
//! sign, submit, archive and download an invoice.
//!
//! Run with `cargo run --example issue_invoice --features service`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{Local, Utc};
use efactura::config::{Secret, Series, ServiceConfig, TenantFiscalContext};
use efactura::core::*;
use efactura::service::{ElectronicBillingService, Outcome};
use efactura::store::{ArtifactKind, FsArtifactStore, MemoryDocumentRepository};
use efactura::submit::{
    AuthorityGateway, AuthorizationRecord, AuthorizationResponse, GatewayError, ReceptionResponse,
    ReceptionState,
};
use rust_decimal_macros::dec;

/// Accepts everything it receives.
#[derive(Default)]
struct Sandbox {
    received: AtomicBool,
}

#[async_trait]
impl AuthorityGateway for Sandbox {
    async fn send(&self, _signed_xml: &str) -> Result<ReceptionResponse, GatewayError> {
        self.received.store(true, Ordering::SeqCst);
        Ok(ReceptionResponse {
            state: ReceptionState::Received,
            messages: vec![],
            raw: String::new(),
        })
    }

    async fn authorization(&self, access_key: &str) -> Result<AuthorizationResponse, GatewayError> {
        let records = if self.received.load(Ordering::SeqCst) {
            vec![AuthorizationRecord {
                status: AttemptStatus::Accepted,
                number: Some(access_key.to_string()),
                authorized_at: Some(Utc::now()),
                document: None,
                messages: vec![],
                raw: format!(
                    "<autorizacion><estado>AUTORIZADO</estado><numeroAutorizacion>{access_key}</numeroAutorizacion></autorizacion>"
                ),
            }]
        } else {
            vec![]
        };
        Ok(AuthorizationResponse {
            access_key: Some(access_key.to_string()),
            records,
            raw: String::new(),
        })
    }
}

#[tokio::main]
async fn main() {
    efactura::logging::init("efactura=info");

    let ctx = TenantFiscalContext {
        company_id: "andina".into(),
        issuer: IssuerProfile {
            ruc: "1790012345001".into(),
            legal_name: "COMERCIAL ANDINA S.A.".into(),
            trade_name: Some("ANDINA".into()),
            head_office_address: "Av. Amazonas N34-120, Quito".into(),
            establishment_address: None,
            special_taxpayer: None,
            keeps_accounting: true,
            withholding_agent: None,
            rimpe_legend: None,
        },
        environment: Environment::Test,
        endpoints: None,
        series: [(
            DocumentType::Invoice,
            Series {
                establishment: "001".into(),
                emission_point: "002".into(),
            },
        )]
        .into(),
        certificate: std::fs::read("tests/fixtures/signer.p12").expect("test certificate"),
        certificate_password: Secret::new("clave-firma-2024"),
    };

    // EFACTURA__ARTIFACT_DIR moves the archive elsewhere.
    let config = ServiceConfig::from_env().expect("service configuration");
    let artifacts = FsArtifactStore::from_config(&config);
    let artifacts_dir = artifacts.root().to_path_buf();
    let service = ElectronicBillingService::new(
        Arc::new(MemoryDocumentRepository::new()),
        Arc::new(artifacts),
        Arc::new(MemorySequenceStore::default()),
        config,
    )
    .with_gateway(Arc::new(Sandbox::default()));

    let today = Local::now().date_naive();
    let buyer = PartyBuilder::new(
        IdentificationType::Ruc,
        "0992345678001",
        "DISTRIBUIDORA COSTA CIA. LTDA.",
    )
    .address("Av. 9 de Octubre 100, Guayaquil")
    .email("compras@costa.ec")
    .build();
    let invoice = FiscalDocumentBuilder::new("andina", DocumentType::Invoice, today)
        .buyer(buyer)
        .add_line(LineBuilder::new("SRV-01", "Soporte técnico mensual", dec!(1), dec!(100)).build())
        .add_line(
            LineBuilder::new("LIB-07", "Manual impreso", dec!(2), dec!(25))
                .vat(VatRate::Zero)
                .build(),
        )
        .additional_field("Vendedor", "María Pérez")
        .build()
        .expect("invoice should be valid");

    let id = service.create(invoice).await.unwrap();
    match service.generate(&ctx, id).await {
        Outcome::Success(issued) => {
            println!("{}", serde_json::to_string_pretty(&issued).unwrap());
        }
        Outcome::Failure(failure) => {
            eprintln!("{}: {}", failure.kind, failure.message);
            return;
        }
    }

    for kind in [ArtifactKind::Xml, ArtifactKind::Pdf, ArtifactKind::Cdr] {
        let download = service.download(id, kind).await.unwrap();
        println!(
            "{:<16} {:>7} bytes  Content-Disposition: {}",
            download.content_type,
            download.bytes.len(),
            download.content_disposition()
        );
    }
    println!("Artifacts stored under {}", artifacts_dir.display());
}
