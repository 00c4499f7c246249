//! Document persistence and artifact storage.
//!
//! Artifacts (XML, PDF, authorization receipt) are addressed by company and
//! document id. Before authorization they may be overwritten; once written
//! with `sealed = true` they are immutable.

mod fs;
mod memory;

use std::io::Write;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{DocumentId, DocumentStatus, FiscalDocument, FiscalError};

pub use fs::FsArtifactStore;
pub use memory::{MemoryArtifactStore, MemoryDocumentRepository};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} is sealed and cannot be overwritten")]
    Immutable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for FiscalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => FiscalError::NotFound(what),
            other => FiscalError::Store(other.to_string()),
        }
    }
}

/// Downloadable artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Signed (and once authorized, authorized) document XML.
    Xml,
    /// Printable representation.
    Pdf,
    /// Authorization receipt, zipped.
    Cdr,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Pdf => "pdf",
            Self::Cdr => "zip",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Xml => "application/xml",
            Self::Pdf => "application/pdf",
            Self::Cdr => "application/zip",
        }
    }

    /// Blob name inside a document's storage folder.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Xml => "document.xml",
            Self::Pdf => "document.pdf",
            Self::Cdr => "authorization.zip",
        }
    }

    /// Location recorded on `doc` for this kind.
    pub fn location<'a>(&self, doc: &'a FiscalDocument) -> Option<&'a str> {
        match self {
            Self::Xml => doc.xml_path.as_deref(),
            Self::Pdf => doc.pdf_path.as_deref(),
            Self::Cdr => doc.cdr_path.as_deref(),
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = FiscalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "pdf" => Ok(Self::Pdf),
            "cdr" | "zip" => Ok(Self::Cdr),
            other => Err(FiscalError::invalid(
                "kind",
                format!("unknown artifact kind {other:?}"),
            )),
        }
    }
}

/// Storage address of one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub company_id: String,
    pub document_id: DocumentId,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn for_document(doc: &FiscalDocument, kind: ArtifactKind) -> Self {
        Self {
            company_id: doc.company_id.clone(),
            document_id: doc.id,
            kind,
        }
    }

    /// `<company>/<document id>/<file>`; also the location string.
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.company_id,
            self.document_id,
            self.kind.file_name()
        )
    }
}

/// Persistence of fiscal documents.
///
/// Authorized and canceled records are sealed. Implementations run
/// [`check_sealed_update`] against the stored record inside `update`, so
/// the signed XML, access key and artifacts of an authorized document can
/// never be replaced.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn insert(&self, doc: FiscalDocument) -> Result<(), StoreError>;
    async fn get(&self, id: DocumentId) -> Result<FiscalDocument, StoreError>;
    /// Replace the stored record. Writes over a sealed record fail with
    /// [`StoreError::Immutable`] unless they only cancel it.
    async fn update(&self, doc: &FiscalDocument) -> Result<(), StoreError>;
    async fn find_by_access_key(&self, access_key: &str)
    -> Result<Option<FiscalDocument>, StoreError>;
}

/// Whether `next` may replace the stored `current` record.
///
/// Unsealed records accept anything. A sealed record only accepts the
/// authorized to canceled status change (or a rewrite of itself), with
/// every other field unchanged.
pub fn check_sealed_update(
    current: &FiscalDocument,
    next: &FiscalDocument,
) -> Result<(), StoreError> {
    if !current.is_sealed() {
        return Ok(());
    }
    let status_allowed = current.status == next.status
        || (current.status, next.status) == (DocumentStatus::Authorized, DocumentStatus::Canceled);
    let mut expected = current.clone();
    expected.status = next.status;
    if !status_allowed || serde_json::to_value(&expected)? != serde_json::to_value(next)? {
        return Err(StoreError::Immutable(format!("document {}", current.id)));
    }
    Ok(())
}

/// Blob storage for generated artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write `bytes` and return the location. Writing over a sealed
    /// artifact fails with [`StoreError::Immutable`].
    async fn put(&self, key: &ArtifactKey, bytes: Vec<u8>, sealed: bool)
    -> Result<String, StoreError>;

    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError>;
}

/// An artifact ready to be streamed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub content_type: &'static str,
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Download {
    /// `Content-Disposition` header value.
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.filename)
    }
}

/// Fetch the `kind` artifact of `doc`.
///
/// Fails with [`FiscalError::NotFound`] when it was never generated, which
/// is always the case for non-electronic documents.
pub async fn download(
    store: &dyn ArtifactStore,
    doc: &FiscalDocument,
    kind: ArtifactKind,
) -> Result<Download, FiscalError> {
    let missing = || {
        FiscalError::NotFound(format!(
            "{} artifact of document {}",
            kind.extension(),
            doc.id
        ))
    };
    if !doc.document_type.is_electronic() {
        return Err(missing());
    }
    let location = kind.location(doc).ok_or_else(missing)?;
    let bytes = store.get(location).await.map_err(|e| match e {
        StoreError::NotFound(_) => missing(),
        other => other.into(),
    })?;
    Ok(Download {
        content_type: kind.content_type(),
        filename: format!("{}.{}", doc.artifact_stem(), kind.extension()),
        bytes,
    })
}

/// Zip holding the authorization record as `<stem>.xml`.
pub fn cdr_archive(stem: &str, authorization_xml: &str) -> Result<Vec<u8>, StoreError> {
    let archive_error = |e: zip::result::ZipError| StoreError::Archive(e.to_string());
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    writer
        .start_file(format!("{stem}.xml"), options)
        .map_err(archive_error)?;
    writer.write_all(authorization_xml.as_bytes())?;
    let cursor = writer.finish().map_err(archive_error)?;
    Ok(cursor.into_inner())
}
