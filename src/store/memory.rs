use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ArtifactKey, ArtifactStore, DocumentRepository, StoreError, check_sealed_update,
};
use crate::core::{DocumentId, FiscalDocument};

/// In-process document repository.
#[derive(Debug, Default)]
pub struct MemoryDocumentRepository {
    documents: RwLock<HashMap<DocumentId, FiscalDocument>>,
}

impl MemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentRepository for MemoryDocumentRepository {
    async fn insert(&self, doc: FiscalDocument) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        if documents.contains_key(&doc.id) {
            return Err(StoreError::Conflict(format!("document {}", doc.id)));
        }
        documents.insert(doc.id, doc);
        Ok(())
    }

    async fn get(&self, id: DocumentId) -> Result<FiscalDocument, StoreError> {
        self.documents
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))
    }

    async fn update(&self, doc: &FiscalDocument) -> Result<(), StoreError> {
        let mut documents = self.documents.write().await;
        match documents.get_mut(&doc.id) {
            Some(slot) => {
                check_sealed_update(slot, doc)?;
                *slot = doc.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("document {}", doc.id))),
        }
    }

    async fn find_by_access_key(
        &self,
        access_key: &str,
    ) -> Result<Option<FiscalDocument>, StoreError> {
        Ok(self
            .documents
            .read()
            .await
            .values()
            .find(|d| d.access_key.as_ref().is_some_and(|k| k.as_str() == access_key))
            .cloned())
    }
}

/// In-process artifact store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, (Vec<u8>, bool)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_sealed(&self, location: &str) -> bool {
        self.blobs
            .read()
            .await
            .get(location)
            .is_some_and(|(_, sealed)| *sealed)
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        key: &ArtifactKey,
        bytes: Vec<u8>,
        sealed: bool,
    ) -> Result<String, StoreError> {
        let location = key.path();
        let mut blobs = self.blobs.write().await;
        if blobs.get(&location).is_some_and(|(_, s)| *s) {
            return Err(StoreError::Immutable(location));
        }
        blobs.insert(location.clone(), (bytes, sealed));
        Ok(location)
    }

    async fn get(&self, location: &str) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .await
            .get(location)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| StoreError::NotFound(location.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::core::{
        AccessKey, AccessKeyParts, DocumentStatus, DocumentType, Environment,
        FiscalDocumentBuilder, LineBuilder, NumericCode, PartyBuilder,
    };
    use crate::store::ArtifactKind;

    fn authorized() -> FiscalDocument {
        let mut doc = FiscalDocumentBuilder::new(
            "acme",
            DocumentType::Invoice,
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        )
        .buyer(PartyBuilder::final_consumer().build())
        .add_line(LineBuilder::new("P-1", "Servicio", dec!(1), dec!(10)).build())
        .build()
        .unwrap();
        let code = NumericCode::parse("12345678").unwrap();
        let key = AccessKey::generate(&AccessKeyParts {
            issue_date: doc.issue_date,
            document_type: doc.document_type,
            ruc: "1790012345001",
            environment: Environment::Test,
            establishment: "001",
            emission_point: "001",
            sequential: 1,
            numeric_code: &code,
        })
        .unwrap();
        doc.sequential = Some(1);
        doc.numeric_code = Some(code);
        doc.authorization_number = Some(key.as_str().to_string());
        doc.access_key = Some(key);
        doc.signed_xml = Some("<factura id=\"comprobante\"/>".into());
        doc.status = DocumentStatus::Authorized;
        doc
    }

    #[tokio::test]
    async fn authorized_records_are_sealed() {
        let repo = MemoryDocumentRepository::new();
        let doc = authorized();
        repo.insert(doc.clone()).await.unwrap();

        let mut tampered = doc.clone();
        tampered.signed_xml = Some("<factura/>".into());
        assert!(matches!(repo.update(&tampered).await, Err(StoreError::Immutable(_))));

        let mut reopened = doc.clone();
        reopened.status = DocumentStatus::Issued;
        assert!(matches!(repo.update(&reopened).await, Err(StoreError::Immutable(_))));

        let stored = repo.get(doc.id).await.unwrap();
        assert_eq!(stored.status, DocumentStatus::Authorized);
        assert_eq!(stored.signed_xml, doc.signed_xml);
    }

    #[tokio::test]
    async fn authorized_records_can_only_be_canceled() {
        let repo = MemoryDocumentRepository::new();
        let doc = authorized();
        repo.insert(doc.clone()).await.unwrap();
        repo.update(&doc).await.unwrap();

        let mut canceled = doc.clone();
        canceled.status = DocumentStatus::Canceled;
        canceled.access_key = None;
        assert!(matches!(repo.update(&canceled).await, Err(StoreError::Immutable(_))));

        canceled.access_key = doc.access_key.clone();
        repo.update(&canceled).await.unwrap();
        assert_eq!(repo.get(doc.id).await.unwrap().status, DocumentStatus::Canceled);

        let mut revived = canceled.clone();
        revived.status = DocumentStatus::Authorized;
        assert!(matches!(repo.update(&revived).await, Err(StoreError::Immutable(_))));
    }

    #[tokio::test]
    async fn finds_documents_by_access_key() {
        let repo = MemoryDocumentRepository::new();
        let doc = authorized();
        repo.insert(doc.clone()).await.unwrap();
        let key = doc.access_key.clone().unwrap();
        let found = repo.find_by_access_key(key.as_str()).await.unwrap().unwrap();
        assert_eq!(found.id, doc.id);
        assert!(repo.find_by_access_key("0").await.unwrap().is_none());
    }

    fn key() -> ArtifactKey {
        ArtifactKey {
            company_id: "acme".into(),
            document_id: Uuid::nil(),
            kind: ArtifactKind::Xml,
        }
    }

    #[tokio::test]
    async fn drafts_overwrite_until_sealed() {
        let store = MemoryArtifactStore::new();
        let loc = store.put(&key(), b"draft".to_vec(), false).await.unwrap();
        store.put(&key(), b"final".to_vec(), true).await.unwrap();
        assert_eq!(store.get(&loc).await.unwrap(), b"final");
        assert!(store.is_sealed(&loc).await);
        assert!(matches!(
            store.put(&key(), b"again".to_vec(), true).await,
            Err(StoreError::Immutable(_))
        ));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let store = MemoryArtifactStore::new();
        assert!(matches!(
            store.get("acme/x/document.pdf").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
