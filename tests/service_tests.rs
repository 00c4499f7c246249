#![cfg(feature = "service")]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use efactura::config::{Secret, Series, ServiceConfig, TenantFiscalContext, TenantFiscalSettings};
use efactura::core::*;
use efactura::service::{ElectronicBillingService, Outcome, load_context};
use efactura::sign::{AesGcmEncryptor, Encryptor};
use efactura::store::{
    ArtifactKind, DocumentRepository, MemoryArtifactStore, MemoryDocumentRepository, StoreError,
};
use efactura::submit::{
    AuthorityGateway, AuthorizationRecord, AuthorizationResponse, GatewayError, ReceptionResponse,
    ReceptionState,
};
use rust_decimal_macros::dec;

const PASSWORD: &str = "clave-firma-2024";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Receives and authorizes.
    Accept,
    /// Returns every document with a structure error.
    Reject,
    /// Receives but never finishes processing.
    Processing,
    /// Connection refused.
    Down,
}

/// In-process stand-in for the reception and authorization services.
struct Authority {
    mode: Mutex<Mode>,
    authorized: Mutex<HashSet<String>>,
    sends: AtomicU32,
}

impl Authority {
    fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            authorized: Mutex::new(HashSet::new()),
            sends: AtomicU32::new(0),
        })
    }

    fn set_mode(&self, mode: Mode) {
        *self.mode.lock().unwrap() = mode;
    }

    fn mode(&self) -> Mode {
        *self.mode.lock().unwrap()
    }

    /// Authorize out of band, as if an earlier run's request got through.
    fn authorize(&self, access_key: &str) {
        self.authorized.lock().unwrap().insert(access_key.to_string());
    }

    fn sends(&self) -> u32 {
        self.sends.load(Ordering::SeqCst)
    }
}

fn access_key_of(signed_xml: &str) -> String {
    let start = signed_xml.find("<claveAcceso>").unwrap() + "<claveAcceso>".len();
    let end = signed_xml.find("</claveAcceso>").unwrap();
    signed_xml[start..end].to_string()
}

fn message(identifier: &str, text: &str) -> AuthorityMessage {
    AuthorityMessage {
        identifier: identifier.into(),
        message: text.into(),
        additional_info: None,
        kind: "ERROR".into(),
    }
}

#[async_trait]
impl AuthorityGateway for Authority {
    async fn send(&self, signed_xml: &str) -> Result<ReceptionResponse, GatewayError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            Mode::Down => Err(GatewayError::Network("connection refused".into())),
            Mode::Reject => Ok(ReceptionResponse {
                state: ReceptionState::Returned,
                messages: vec![message("35", "ARCHIVO NO CUMPLE ESTRUCTURA XML")],
                raw: "<estado>DEVUELTA</estado>".into(),
            }),
            Mode::Accept => {
                self.authorize(&access_key_of(signed_xml));
                Ok(ReceptionResponse {
                    state: ReceptionState::Received,
                    messages: vec![],
                    raw: "<estado>RECIBIDA</estado>".into(),
                })
            }
            Mode::Processing => Ok(ReceptionResponse {
                state: ReceptionState::Received,
                messages: vec![],
                raw: "<estado>RECIBIDA</estado>".into(),
            }),
        }
    }

    async fn authorization(&self, access_key: &str) -> Result<AuthorizationResponse, GatewayError> {
        if self.mode() == Mode::Down {
            return Err(GatewayError::Network("connection refused".into()));
        }
        let records = if self.authorized.lock().unwrap().contains(access_key) {
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
        } else if self.mode() == Mode::Processing {
            vec![AuthorizationRecord {
                status: AttemptStatus::Pending,
                number: None,
                authorized_at: None,
                document: None,
                messages: vec![],
                raw: "<autorizacion><estado>EN PROCESO</estado></autorizacion>".into(),
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

/// Memory repository that can slow down reads and lose the write that
/// records an authorization, as a process crashing at that point would.
#[derive(Default)]
struct Repository {
    inner: MemoryDocumentRepository,
    read_delay_ms: AtomicU64,
    lose_authorization: AtomicBool,
}

#[async_trait]
impl DocumentRepository for Repository {
    async fn insert(&self, doc: FiscalDocument) -> Result<(), StoreError> {
        self.inner.insert(doc).await
    }

    async fn get(&self, id: DocumentId) -> Result<FiscalDocument, StoreError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.get(id).await
    }

    async fn update(&self, doc: &FiscalDocument) -> Result<(), StoreError> {
        let lose = self.lose_authorization.load(Ordering::SeqCst);
        if lose && doc.status == DocumentStatus::Authorized {
            return Err(StoreError::Io(std::io::Error::other("connection reset")));
        }
        self.inner.update(doc).await
    }

    async fn find_by_access_key(
        &self,
        access_key: &str,
    ) -> Result<Option<FiscalDocument>, StoreError> {
        self.inner.find_by_access_key(access_key).await
    }
}

struct Harness {
    service: ElectronicBillingService,
    authority: Arc<Authority>,
    artifacts: Arc<MemoryArtifactStore>,
    documents: Arc<Repository>,
    ctx: TenantFiscalContext,
}

fn config() -> ServiceConfig {
    ServiceConfig {
        submission: RetryPolicy::immediate(2),
        max_polls: 2,
        poll_interval_ms: 0,
        allocation: RetryPolicy::immediate(3),
        ..ServiceConfig::default()
    }
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

fn certificate() -> Vec<u8> {
    std::fs::read(format!("{}/tests/fixtures/signer.p12", env!("CARGO_MANIFEST_DIR"))).unwrap()
}

fn harness(mode: Mode) -> Harness {
    let authority = Authority::new(mode);
    let artifacts = Arc::new(MemoryArtifactStore::new());
    let documents = Arc::new(Repository::default());
    let service = ElectronicBillingService::new(
        documents.clone(),
        artifacts.clone(),
        Arc::new(MemorySequenceStore::default()),
        config(),
    )
    .with_gateway(authority.clone());
    Harness {
        service,
        authority,
        artifacts,
        documents,
        ctx: TenantFiscalContext {
            company_id: "andina".into(),
            issuer: issuer(),
            environment: Environment::Test,
            endpoints: None,
            series: Default::default(),
            certificate: certificate(),
            certificate_password: Secret::new(PASSWORD),
        },
    }
}

fn issue_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

fn invoice() -> FiscalDocument {
    FiscalDocumentBuilder::new("andina", DocumentType::Invoice, issue_date())
        .buyer(
            PartyBuilder::new(IdentificationType::Ruc, "0992345678001", "DISTRIBUIDORA COSTA")
                .email("compras@costa.ec")
                .build(),
        )
        .add_line(LineBuilder::new("S-1", "Servicio técnico", dec!(1), dec!(100)).build())
        .add_line(
            LineBuilder::new("L-1", "Libro", dec!(1), dec!(50))
                .vat(VatRate::Zero)
                .build(),
        )
        .build()
        .unwrap()
}

fn failure_kind(outcome: &Outcome) -> &str {
    match outcome {
        Outcome::Failure(f) => &f.kind,
        Outcome::Success(_) => panic!("expected a failure, got {outcome:?}"),
    }
}

#[tokio::test]
async fn invoice_is_authorized_and_archived() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();

    let outcome = h.service.generate(&h.ctx, id).await;
    let Outcome::Success(issued) = &outcome else {
        panic!("expected success, got {outcome:?}");
    };
    let key = issued.access_key.clone().unwrap();
    assert_eq!(key.len(), 49);
    assert_eq!(issued.authorization_number.as_deref(), Some(key.as_str()));

    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Authorized);
    assert_eq!(doc.sequential, Some(1));
    assert!(doc.authorization_date.is_some());
    assert_eq!(doc.totals.as_ref().unwrap().grand_total, dec!(165.00));
    assert_eq!(
        doc.attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Accepted)
            .count(),
        1
    );
    assert_eq!(h.authority.sends(), 1);

    for kind in [ArtifactKind::Xml, ArtifactKind::Pdf, ArtifactKind::Cdr] {
        let location = kind.location(&doc).unwrap();
        assert!(h.artifacts.is_sealed(location).await, "{kind:?} not sealed");
    }

    let xml = h.service.download(id, ArtifactKind::Xml).await.unwrap();
    assert_eq!(xml.filename, format!("{key}.xml"));
    let xml = String::from_utf8(xml.bytes).unwrap();
    assert!(xml.contains("<ds:Signature"));
    efactura::sign::verify_enveloped_signature(&xml).unwrap();

    let pdf = h.service.download(id, ArtifactKind::Pdf).await.unwrap();
    assert_eq!(pdf.content_type, "application/pdf");
    assert!(pdf.bytes.starts_with(b"%PDF"));

    let cdr = h.service.download(id, ArtifactKind::Cdr).await.unwrap();
    assert!(cdr.bytes.starts_with(b"PK"));
}

#[tokio::test]
async fn generating_twice_returns_the_same_record() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();
    let first = h.service.generate(&h.ctx, id).await;
    let second = h.service.generate(&h.ctx, id).await;
    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(h.authority.sends(), 1);
}

#[tokio::test]
async fn receipts_are_numbered_but_not_submitted() {
    let h = harness(Mode::Accept);
    let receipt = FiscalDocumentBuilder::new("andina", DocumentType::Receipt, issue_date())
        .buyer(PartyBuilder::final_consumer().build())
        .add_line(LineBuilder::new("C-1", "Café", dec!(2), dec!(1.50)).build())
        .build()
        .unwrap();
    let id = h.service.create(receipt).await.unwrap();

    let outcome = h.service.generate(&h.ctx, id).await;
    let Outcome::Success(issued) = outcome else {
        panic!("receipt should be issued");
    };
    assert!(issued.access_key.is_none());
    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Issued);
    assert_eq!(doc.sequential, Some(1));
    assert_eq!(h.authority.sends(), 0);

    let err = h.service.download(id, ArtifactKind::Xml).await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn returned_document_keeps_the_authority_message() {
    let h = harness(Mode::Reject);
    let id = h.service.create(invoice()).await.unwrap();

    let outcome = h.service.generate(&h.ctx, id).await;
    assert_eq!(failure_kind(&outcome), "submission_rejected");
    let Outcome::Failure(failure) = &outcome else {
        unreachable!()
    };
    assert!(failure.message.contains("ARCHIVO NO CUMPLE ESTRUCTURA XML"));

    let rejected = h.service.document(id).await.unwrap();
    assert_eq!(rejected.status, DocumentStatus::Rejected);
    assert_eq!(rejected.attempts.last().unwrap().status, AttemptStatus::Rejected);
    assert_eq!(rejected.attempts.last().unwrap().messages[0].identifier, "35");

    // Corrected and sent again: same number, same key.
    h.authority.set_mode(Mode::Accept);
    let outcome = h.service.resend(&h.ctx, id).await;
    assert!(outcome.is_success(), "{outcome:?}");
    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Authorized);
    assert_eq!(doc.sequential, rejected.sequential);
    assert_eq!(doc.access_key, rejected.access_key);
    assert_eq!(h.authority.sends(), 2);
}

#[tokio::test]
async fn unreachable_authority_leaves_the_document_issued() {
    let h = harness(Mode::Down);
    let id = h.service.create(invoice()).await.unwrap();

    let outcome = h.service.generate(&h.ctx, id).await;
    assert_eq!(failure_kind(&outcome), "submission_timeout");
    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Issued);
    assert_eq!(doc.sequential, Some(1));
    assert!(doc.signed_xml.is_some());
    assert!(doc.xml_path.is_some());
    assert!(!h.artifacts.is_sealed(doc.xml_path.as_deref().unwrap()).await);

    h.authority.set_mode(Mode::Accept);
    let outcome = h.service.resend(&h.ctx, id).await;
    assert!(outcome.is_success(), "{outcome:?}");
    let after = h.service.document(id).await.unwrap();
    assert_eq!(after.signed_xml, doc.signed_xml);
    assert_eq!(after.access_key, doc.access_key);
}

#[tokio::test]
async fn slow_authorization_times_out_then_resolves_without_resending() {
    let h = harness(Mode::Processing);
    let id = h.service.create(invoice()).await.unwrap();

    let outcome = h.service.generate(&h.ctx, id).await;
    assert_eq!(failure_kind(&outcome), "submission_timeout");
    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Issued);
    assert_eq!(doc.attempts.last().unwrap().status, AttemptStatus::Pending);

    // The authority finishes on its own; a resend must find it.
    h.authority.authorize(doc.access_key.as_ref().unwrap().as_str());
    let outcome = h.service.resend(&h.ctx, id).await;
    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(h.authority.sends(), 1);
}

#[tokio::test]
async fn crash_before_saving_authorization_is_recovered_once() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();

    // Artifacts get sealed but the authorized document is never saved.
    h.documents.lose_authorization.store(true, Ordering::SeqCst);
    let first = h.service.generate(&h.ctx, id).await;
    assert_eq!(failure_kind(&first), "storage_error");
    let stale = h.service.document(id).await.unwrap();
    assert_eq!(stale.status, DocumentStatus::Issued);
    assert!(h.artifacts.is_sealed(stale.xml_path.as_deref().unwrap()).await);

    h.documents.lose_authorization.store(false, Ordering::SeqCst);
    let second = h.service.resend(&h.ctx, id).await;
    let Outcome::Success(issued) = &second else {
        panic!("expected success, got {second:?}");
    };
    let stale_key = stale.access_key.as_ref().map(|k| k.as_str().to_string());
    assert_eq!(issued.access_key, stale_key);
    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Authorized);
    assert_eq!(doc.signed_xml, stale.signed_xml);
    let accepted = doc
        .attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);
    assert!(doc.accepted_attempt().is_some());
    assert_eq!(h.authority.sends(), 1);
}

#[tokio::test]
async fn authorized_documents_cannot_be_rewritten() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();
    assert!(h.service.generate(&h.ctx, id).await.is_success());
    let doc = h.service.document(id).await.unwrap();

    let mut tampered = doc.clone();
    tampered.signed_xml = Some("<factura/>".into());
    tampered.access_key = None;
    let err = h.documents.update(&tampered).await.unwrap_err();
    assert!(matches!(err, StoreError::Immutable(_)), "{err:?}");

    let stored = h.service.document(id).await.unwrap();
    assert_eq!(stored.signed_xml, doc.signed_xml);
    assert_eq!(stored.access_key, doc.access_key);
    assert_eq!(h.service.generate(&h.ctx, id).await, Outcome::from_document(&doc));
}

#[tokio::test]
async fn documents_are_found_by_access_key() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();
    let Outcome::Success(issued) = h.service.generate(&h.ctx, id).await else {
        panic!("expected success");
    };
    let key = issued.access_key.unwrap();
    assert_eq!(h.service.document_by_access_key(&key).await.unwrap().id, id);
    let err = h.service.document_by_access_key("0").await.unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn tenant_series_numbers_the_document() {
    let mut h = harness(Mode::Accept);
    h.ctx.series.insert(
        DocumentType::Invoice,
        Series {
            establishment: "002".into(),
            emission_point: "010".into(),
        },
    );
    let id = h.service.create(invoice()).await.unwrap();
    assert!(h.service.generate(&h.ctx, id).await.is_success());
    let doc = h.service.document(id).await.unwrap();
    assert_eq!(doc.series_number().as_deref(), Some("002-010-000000001"));
    let key = doc.access_key.unwrap();
    assert_eq!((key.establishment(), key.emission_point()), ("002", "010"));

    h.ctx.series.insert(
        DocumentType::Invoice,
        Series {
            establishment: "2".into(),
            emission_point: "010".into(),
        },
    );
    let bad = h.service.create(invoice()).await.unwrap();
    let outcome = h.service.generate(&h.ctx, bad).await;
    assert_eq!(failure_kind(&outcome), "validation_error");
    assert_eq!(h.service.document(bad).await.unwrap().sequential, None);
}

#[tokio::test]
async fn cancellation_follows_the_window() {
    let h = harness(Mode::Accept);
    let late = h.service.create(invoice()).await.unwrap();
    let on_time = h.service.create(invoice()).await.unwrap();
    assert!(h.service.generate(&h.ctx, late).await.is_success());
    assert!(h.service.generate(&h.ctx, on_time).await.is_success());

    let err = h
        .service
        .cancel(late, NaiveDate::from_ymd_opt(2024, 4, 8).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_transition");

    let canceled = h
        .service
        .cancel(on_time, NaiveDate::from_ymd_opt(2024, 4, 7).unwrap())
        .await
        .unwrap();
    assert_eq!(canceled.status, DocumentStatus::Canceled);

    let outcome = h.service.resend(&h.ctx, on_time).await;
    assert_eq!(failure_kind(&outcome), "invalid_transition");
    // Artifacts stay downloadable.
    assert!(h.service.download(on_time, ArtifactKind::Pdf).await.is_ok());
}

#[tokio::test]
async fn drafts_cannot_be_resent_or_canceled() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();
    let outcome = h.service.resend(&h.ctx, id).await;
    assert_eq!(failure_kind(&outcome), "invalid_transition");
    assert!(h.service.cancel(id, issue_date()).await.is_err());
    assert_eq!(h.service.document(id).await.unwrap().status, DocumentStatus::Draft);
}

#[tokio::test]
async fn other_companies_documents_are_not_found() {
    let h = harness(Mode::Accept);
    let id = h.service.create(invoice()).await.unwrap();
    let mut ctx = h.ctx.clone();
    ctx.company_id = "otra".into();
    let outcome = h.service.generate(&ctx, id).await;
    assert_eq!(failure_kind(&outcome), "not_found");
    assert_eq!(h.authority.sends(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generation_hands_out_distinct_numbers() {
    let h = Arc::new(harness(Mode::Accept));
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(h.service.create(invoice()).await.unwrap());
    }

    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let h = h.clone();
            tokio::spawn(async move { h.service.generate(&h.ctx, id).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    let mut sequentials = Vec::new();
    for id in ids {
        sequentials.push(h.service.document(id).await.unwrap().sequential.unwrap());
    }
    sequentials.sort_unstable();
    assert_eq!(sequentials, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_generation_of_one_document_issues_it_once() {
    let h = Arc::new(harness(Mode::Accept));
    h.documents.read_delay_ms.store(30, Ordering::SeqCst);
    let id = h.service.create(invoice()).await.unwrap();

    let runs: Vec<_> = (0..2)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.service.generate(&h.ctx, id).await })
        })
        .collect();
    let mut outcomes = Vec::new();
    for run in runs {
        outcomes.push(run.await.unwrap());
    }
    assert!(outcomes[0].is_success(), "{:?}", outcomes[0]);
    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(h.service.document(id).await.unwrap().sequential, Some(1));
    assert_eq!(h.authority.sends(), 1);

    // No number was burned.
    let next = h.service.create(invoice()).await.unwrap();
    assert!(h.service.generate(&h.ctx, next).await.is_success());
    assert_eq!(h.service.document(next).await.unwrap().sequential, Some(2));
}

#[tokio::test]
async fn tenant_context_is_unlocked_from_settings() {
    let encryptor = AesGcmEncryptor::new("k1", [3u8; 32]);
    let settings = TenantFiscalSettings {
        company_id: "andina".into(),
        issuer: issuer(),
        environment: Environment::Test,
        certificate_path: format!("{}/tests/fixtures/signer.p12", env!("CARGO_MANIFEST_DIR"))
            .into(),
        encrypted_certificate_password: encryptor.encrypt(&Secret::new(PASSWORD)).unwrap(),
        series: [(
            DocumentType::CreditNote,
            Series {
                establishment: "001".into(),
                emission_point: "005".into(),
            },
        )]
        .into(),
        endpoints: None,
    };
    let ctx = load_context(&settings, &encryptor).await.unwrap();
    assert_eq!(ctx.certificate_password.expose(), PASSWORD);
    assert_eq!(ctx.series, settings.series);
    assert_eq!(ctx.certificate, certificate());
    assert!(ctx.endpoints().reception.contains("celcer"));

    let missing = TenantFiscalSettings {
        certificate_path: "/nonexistent/firma.p12".into(),
        ..settings
    };
    let err = load_context(&missing, &encryptor).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_certificate");
}
