//! Document store seam.
//!
//! Text extraction and case metadata belong to the host application. The
//! executor only needs the extracted text of each document listed on a job
//! and a JSON blob of case context.

use std::collections::HashMap;

use async_trait::async_trait;
use docket_core::{
    CaseId, DocketError, DocketResult, DocumentId, DocumentRef, EntityIdType, RecordKind,
    StorageError,
};
use tokio::sync::RwLock;

/// Read access to extracted document text and case context.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents currently attached to a case.
    async fn documents_for(&self, case_id: CaseId) -> DocketResult<Vec<DocumentRef>>;

    /// Extracted text of one document.
    ///
    /// Fails with `NotFound` when the document is unknown, and with
    /// `Corrupt` when its stored hash no longer matches `document`.
    async fn extracted_text(&self, document: &DocumentRef) -> DocketResult<String>;

    /// Case metadata handed to the model. `Null` when the case has none.
    async fn case_context(&self, case_id: CaseId) -> DocketResult<serde_json::Value>;
}

#[derive(Debug, Clone)]
struct StoredDocument {
    case_id: CaseId,
    reference: DocumentRef,
    text: String,
}

#[derive(Debug, Default)]
struct DocumentState {
    documents: HashMap<DocumentId, StoredDocument>,
    contexts: HashMap<CaseId, serde_json::Value>,
}

/// In-memory [`DocumentStore`] for tests.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<DocumentState>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a document with its extracted text. Replaces an existing
    /// document with the same id.
    pub async fn add_document(&self, case_id: CaseId, reference: DocumentRef, text: impl Into<String>) {
        let mut state = self.state.write().await;
        state.documents.insert(
            reference.document_id,
            StoredDocument {
                case_id,
                reference,
                text: text.into(),
            },
        );
    }

    pub async fn set_case_context(&self, case_id: CaseId, context: serde_json::Value) {
        self.state.write().await.contexts.insert(case_id, context);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn documents_for(&self, case_id: CaseId) -> DocketResult<Vec<DocumentRef>> {
        let state = self.state.read().await;
        let mut docs: Vec<DocumentRef> = state
            .documents
            .values()
            .filter(|d| d.case_id == case_id)
            .map(|d| d.reference.clone())
            .collect();
        docs.sort_by_key(|d| d.document_id);
        Ok(docs)
    }

    async fn extracted_text(&self, document: &DocumentRef) -> DocketResult<String> {
        let state = self.state.read().await;
        let stored = state.documents.get(&document.document_id).ok_or_else(|| {
            DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Document,
                id: document.document_id.as_uuid(),
            })
        })?;
        if stored.reference.content_hash != document.content_hash {
            return Err(DocketError::Storage(StorageError::Corrupt {
                kind: RecordKind::Document,
                reason: format!(
                    "document {} changed since the job was created",
                    document.document_id
                ),
            }));
        }
        Ok(stored.text.clone())
    }

    async fn case_context(&self, case_id: CaseId) -> DocketResult<serde_json::Value> {
        Ok(self
            .state
            .read()
            .await
            .contexts
            .get(&case_id)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }
}
