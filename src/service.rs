//! The entry points controllers call: generate, resend, download, cancel.
//!
//! Every pipeline failure comes back as an [`Outcome`] value rather than
//! an error, so callers only pattern-match. Build failures indicate a
//! defect and are additionally logged at `error` level.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

use crate::config::{Secret, ServiceConfig, TenantFiscalContext, TenantFiscalSettings};
use crate::core::{
    AccessKey, AccessKeyParts, AuthorizationResult, DocumentId, DocumentStatus, FiscalDocument,
    FiscalError, NumericCode, SequenceAllocator, SequenceScope, SequenceStore, lifecycle, tax,
};
use crate::ride;
use crate::sign::{CertificateBundle, Encryptor, XadesSigner};
use crate::store::{
    self, ArtifactKey, ArtifactKind, ArtifactStore, Download, DocumentRepository, StoreError,
};
use crate::submit::{AuthorityGateway, SriSoapClient, Submitter};
use crate::xml;

/// Result handed back to controllers.
///
/// Serializes to `{success, accessKey, authorizationNumber, xmlPath,
/// pdfPath, cdrPath}` or `{success: false, message, kind}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outcome {
    Success(IssuedDocument),
    Failure(Failure),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedDocument {
    pub success: bool,
    pub access_key: Option<String>,
    pub authorization_number: Option<String>,
    pub xml_path: Option<String>,
    pub pdf_path: Option<String>,
    pub cdr_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub success: bool,
    pub message: String,
    /// Stable error class, see [`FiscalError::kind`].
    pub kind: String,
}

impl Outcome {
    pub fn from_document(doc: &FiscalDocument) -> Self {
        Self::Success(IssuedDocument {
            success: true,
            access_key: doc.access_key.as_ref().map(|k| k.as_str().to_string()),
            authorization_number: doc.authorization_number.clone(),
            xml_path: doc.xml_path.clone(),
            pdf_path: doc.pdf_path.clone(),
            cdr_path: doc.cdr_path.clone(),
        })
    }

    pub fn from_error(err: &FiscalError) -> Self {
        Self::Failure(Failure {
            success: false,
            message: err.to_string(),
            kind: err.kind().to_string(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Unlock a tenant's stored settings for one pipeline run: reads the
/// certificate bundle and decrypts its password.
pub async fn load_context(
    settings: &TenantFiscalSettings,
    encryptor: &dyn Encryptor,
) -> Result<TenantFiscalContext, FiscalError> {
    let certificate = tokio::fs::read(&settings.certificate_path)
        .await
        .map_err(|e| {
            FiscalError::InvalidCertificate(format!(
                "cannot read {}: {e}",
                settings.certificate_path.display()
            ))
        })?;
    let certificate_password = encryptor.decrypt(&settings.encrypted_certificate_password)?;
    Ok(TenantFiscalContext {
        company_id: settings.company_id.clone(),
        issuer: settings.issuer.clone(),
        environment: settings.environment,
        endpoints: settings.endpoints.clone(),
        series: settings.series.clone(),
        certificate,
        certificate_password,
    })
}

/// Per-document locks: one pipeline run per document at a time within
/// this process.
#[derive(Debug, Default)]
struct DocumentLocks {
    held: Mutex<HashMap<DocumentId, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(&self, id: DocumentId) -> DocumentGuard<'_> {
        let lock = {
            let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
            held.entry(id).or_default().clone()
        };
        DocumentGuard {
            locks: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }
}

struct DocumentGuard<'a> {
    locks: &'a DocumentLocks,
    id: DocumentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|p| p.into_inner());
        drop(self.guard.take());
        // Nobody else holds or waits for it.
        if held.get(&self.id).is_some_and(|l| Arc::strong_count(l) == 1) {
            held.remove(&self.id);
        }
    }
}

/// Orchestrates build, sign, submit and archive for fiscal documents.
pub struct ElectronicBillingService {
    documents: Arc<dyn DocumentRepository>,
    artifacts: Arc<dyn ArtifactStore>,
    allocator: SequenceAllocator,
    gateway: Option<Arc<dyn AuthorityGateway>>,
    config: ServiceConfig,
    locks: DocumentLocks,
}

impl ElectronicBillingService {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        artifacts: Arc<dyn ArtifactStore>,
        sequences: Arc<dyn SequenceStore>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            documents,
            artifacts,
            allocator: SequenceAllocator::new(sequences, config.allocation),
            gateway: None,
            config,
            locks: DocumentLocks::default(),
        }
    }

    /// Use `gateway` for every tenant instead of a SOAP client built from
    /// the tenant's endpoints.
    pub fn with_gateway(mut self, gateway: Arc<dyn AuthorityGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Store a new draft.
    pub async fn create(&self, doc: FiscalDocument) -> Result<DocumentId, FiscalError> {
        if doc.status != DocumentStatus::Draft {
            return Err(FiscalError::invalid("status", "only drafts can be created"));
        }
        let id = doc.id;
        self.documents.insert(doc).await?;
        Ok(id)
    }

    pub async fn document(&self, id: DocumentId) -> Result<FiscalDocument, FiscalError> {
        Ok(self.documents.get(id).await?)
    }

    /// Look a document up by the access key the authority reports.
    pub async fn document_by_access_key(
        &self,
        access_key: &str,
    ) -> Result<FiscalDocument, FiscalError> {
        self.documents
            .find_by_access_key(access_key)
            .await?
            .ok_or_else(|| FiscalError::NotFound(format!("document with access key {access_key}")))
    }

    /// Issue a draft (or finish an issued one) and obtain its authorization.
    ///
    /// Concurrent calls for the same document run one after the other; the
    /// later one sees the earlier one's result.
    #[tracing::instrument(skip(self, ctx), fields(company = %ctx.company_id))]
    pub async fn generate(&self, ctx: &TenantFiscalContext, document_id: DocumentId) -> Outcome {
        let _guard = self.locks.acquire(document_id).await;
        let result = match self.documents.get(document_id).await {
            Ok(doc) => self.process(ctx, doc).await,
            Err(e) => Err(e.into()),
        };
        outcome(result)
    }

    /// Operator-triggered recovery for documents stuck in `issued` or
    /// `rejected`. Already authorized documents return their record.
    #[tracing::instrument(skip(self, ctx), fields(company = %ctx.company_id))]
    pub async fn resend(&self, ctx: &TenantFiscalContext, document_id: DocumentId) -> Outcome {
        let _guard = self.locks.acquire(document_id).await;
        let result = match self.documents.get(document_id).await {
            Ok(doc) if doc.status == DocumentStatus::Draft => Err(FiscalError::InvalidTransition {
                from: doc.status,
                to: DocumentStatus::Issued,
                reason: "document was never issued; use generate".into(),
            }),
            Ok(doc) => self.process(ctx, doc).await,
            Err(e) => Err(e.into()),
        };
        outcome(result)
    }

    pub async fn download(
        &self,
        document_id: DocumentId,
        kind: ArtifactKind,
    ) -> Result<Download, FiscalError> {
        let doc = self.documents.get(document_id).await?;
        store::download(self.artifacts.as_ref(), &doc, kind).await
    }

    /// Cancel an authorized document within the cancellation window.
    pub async fn cancel(
        &self,
        document_id: DocumentId,
        today: NaiveDate,
    ) -> Result<FiscalDocument, FiscalError> {
        let _guard = self.locks.acquire(document_id).await;
        let mut doc = self.documents.get(document_id).await?;
        lifecycle::cancel(&mut doc, today)?;
        self.documents.update(&doc).await?;
        tracing::info!(document = %doc.id, "document canceled");
        Ok(doc)
    }

    async fn process(
        &self,
        ctx: &TenantFiscalContext,
        mut doc: FiscalDocument,
    ) -> Result<FiscalDocument, FiscalError> {
        if doc.company_id != ctx.company_id {
            return Err(FiscalError::NotFound(format!(
                "document {} for company {}",
                doc.id, ctx.company_id
            )));
        }
        match doc.status {
            DocumentStatus::Authorized => return Ok(doc),
            DocumentStatus::Canceled => {
                return Err(FiscalError::InvalidTransition {
                    from: doc.status,
                    to: DocumentStatus::Issued,
                    reason: "canceled documents are final".into(),
                });
            }
            DocumentStatus::Draft | DocumentStatus::Rejected => {
                // Drafts and corrected rejections are priced and rendered again.
                tax::apply(&mut doc)?;
                doc.signed_xml = None;
            }
            DocumentStatus::Issued => {}
        }

        apply_series(ctx, &mut doc)?;
        self.assign_number(&mut doc).await?;

        if !doc.document_type.is_electronic() {
            if doc.status == DocumentStatus::Draft {
                lifecycle::transition(&mut doc, DocumentStatus::Issued)?;
            }
            self.documents.update(&doc).await?;
            tracing::info!(document = %doc.id, series = ?doc.series_number(), "receipt issued");
            return Ok(doc);
        }

        let access_key = self.assign_access_key(ctx, &mut doc).await?;

        let signed_xml = match doc.signed_xml.clone() {
            Some(xml) => xml,
            None => {
                let signed = self.build_and_sign(ctx, &doc, &access_key)?;
                let key = ArtifactKey::for_document(&doc, ArtifactKind::Xml);
                doc.xml_path = Some(
                    self.artifacts
                        .put(&key, signed.clone().into_bytes(), false)
                        .await?,
                );
                doc.signed_xml = Some(signed.clone());
                signed
            }
        };
        lifecycle::transition(&mut doc, DocumentStatus::Issued)?;
        self.documents.update(&doc).await?;

        let gateway = self.gateway_for(ctx)?;
        let submitter = Submitter::from_config(gateway, &self.config);
        let submission = submitter
            .submit(&signed_xml, access_key.as_str(), &mut doc.attempts)
            .await;

        match submission {
            Ok(result) => self.authorize(ctx, doc, result).await,
            Err(FiscalError::DuplicateSubmission { existing, .. }) => {
                tracing::info!(document = %doc.id, "resolved to existing authorization");
                self.authorize(ctx, doc, *existing).await
            }
            Err(err @ FiscalError::SubmissionRejected { .. }) => {
                lifecycle::transition(&mut doc, DocumentStatus::Rejected)?;
                self.documents.update(&doc).await?;
                Err(err)
            }
            Err(err) => {
                self.documents.update(&doc).await?;
                Err(err)
            }
        }
    }

    /// Reserve the sequential once; it is persisted before anything else
    /// can fail so it is never handed out twice.
    async fn assign_number(&self, doc: &mut FiscalDocument) -> Result<(), FiscalError> {
        if doc.sequential.is_some() {
            return Ok(());
        }
        let scope = SequenceScope {
            company_id: doc.company_id.clone(),
            document_type: doc.document_type,
            establishment: doc.establishment.clone(),
            emission_point: doc.emission_point.clone(),
        };
        doc.sequential = Some(self.allocator.next_sequential(&scope).await?);
        self.documents.update(doc).await?;
        Ok(())
    }

    async fn assign_access_key(
        &self,
        ctx: &TenantFiscalContext,
        doc: &mut FiscalDocument,
    ) -> Result<AccessKey, FiscalError> {
        if let Some(key) = &doc.access_key {
            return Ok(key.clone());
        }
        let sequential = doc
            .sequential
            .ok_or_else(|| FiscalError::Build("document has no sequential".into()))?;
        let numeric_code = doc.numeric_code.clone().unwrap_or_else(NumericCode::random);
        let key = AccessKey::generate(&AccessKeyParts {
            issue_date: doc.issue_date,
            document_type: doc.document_type,
            ruc: &ctx.issuer.ruc,
            environment: ctx.environment,
            establishment: &doc.establishment,
            emission_point: &doc.emission_point,
            sequential,
            numeric_code: &numeric_code,
        })?;
        doc.numeric_code = Some(numeric_code);
        doc.access_key = Some(key.clone());
        self.documents.update(doc).await?;
        Ok(key)
    }

    fn build_and_sign(
        &self,
        ctx: &TenantFiscalContext,
        doc: &FiscalDocument,
        access_key: &AccessKey,
    ) -> Result<String, FiscalError> {
        let totals = doc
            .totals
            .as_ref()
            .ok_or_else(|| FiscalError::Build("document totals were not calculated".into()))?;
        let unsigned = xml::to_xml(doc, totals, access_key, &ctx.issuer)?;
        let bundle = unlock(&ctx.certificate, &ctx.certificate_password)?;
        XadesSigner::new(&bundle).sign(&unsigned, Utc::now())
    }

    fn gateway_for(
        &self,
        ctx: &TenantFiscalContext,
    ) -> Result<Arc<dyn AuthorityGateway>, FiscalError> {
        if let Some(gateway) = &self.gateway {
            return Ok(gateway.clone());
        }
        let client = SriSoapClient::new(ctx.endpoints(), self.config.request_timeout())
            .map_err(|e| FiscalError::Config(e.to_string()))?;
        Ok(Arc::new(client))
    }

    async fn authorize(
        &self,
        ctx: &TenantFiscalContext,
        mut doc: FiscalDocument,
        result: AuthorizationResult,
    ) -> Result<FiscalDocument, FiscalError> {
        doc.authorization_number = result
            .authorization_number
            .clone()
            .or_else(|| doc.access_key.as_ref().map(|k| k.as_str().to_string()));
        doc.authorization_date = Some(result.authorized_at.unwrap_or(result.attempted_at));

        let signed_xml = doc.signed_xml.clone().unwrap_or_default();
        doc.xml_path = Some(self.seal(&doc, ArtifactKind::Xml, signed_xml.into_bytes()).await?);
        let pdf = ride::render(&doc, &ctx.issuer)?;
        doc.pdf_path = Some(self.seal(&doc, ArtifactKind::Pdf, pdf).await?);
        if let Some(record) = &result.raw_response {
            let archive = store::cdr_archive(&doc.artifact_stem(), record)?;
            doc.cdr_path = Some(self.seal(&doc, ArtifactKind::Cdr, archive).await?);
        }

        lifecycle::transition(&mut doc, DocumentStatus::Authorized)?;
        self.documents.update(&doc).await?;
        tracing::info!(
            document = %doc.id,
            authorization = ?doc.authorization_number,
            "document authorized"
        );
        Ok(doc)
    }

    /// Write a final artifact. One already sealed by an earlier run that
    /// crashed before saving the document is kept as is.
    async fn seal(
        &self,
        doc: &FiscalDocument,
        kind: ArtifactKind,
        bytes: Vec<u8>,
    ) -> Result<String, FiscalError> {
        let key = ArtifactKey::for_document(doc, kind);
        match self.artifacts.put(&key, bytes, true).await {
            Ok(location) => Ok(location),
            Err(StoreError::Immutable(location)) => Ok(location),
            Err(e) => Err(e.into()),
        }
    }
}

/// The tenant's series for the document type wins until a number is
/// reserved under it.
fn apply_series(ctx: &TenantFiscalContext, doc: &mut FiscalDocument) -> Result<(), FiscalError> {
    if doc.sequential.is_some() {
        return Ok(());
    }
    if let Some(series) = ctx.series.get(&doc.document_type) {
        series.validate()?;
        doc.establishment = series.establishment.clone();
        doc.emission_point = series.emission_point.clone();
    }
    Ok(())
}

fn unlock(certificate: &[u8], password: &Secret) -> Result<CertificateBundle, FiscalError> {
    CertificateBundle::from_pkcs12(certificate, password.expose())
}

fn outcome(result: Result<FiscalDocument, FiscalError>) -> Outcome {
    match result {
        Ok(doc) => Outcome::from_document(&doc),
        Err(err) => {
            if matches!(err, FiscalError::Build(_)) {
                tracing::error!(error = %err, kind = err.kind(), "document build defect");
            } else {
                tracing::warn!(error = %err, kind = err.kind(), "document not authorized");
            }
            Outcome::from_error(&err)
        }
    }
}
