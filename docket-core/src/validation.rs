//! Synchronous input validation, run before any cache or lock interaction.

use crate::{CaseId, DocumentRef, EntityIdType, ValidationError};
use std::collections::HashMap;

/// Validate the case identifier of a request.
pub fn validate_case_id(case_id: CaseId) -> Result<(), ValidationError> {
    if case_id.is_nil() {
        return Err(ValidationError::InvalidValue {
            field: "case_id".to_string(),
            reason: "nil identifier".to_string(),
        });
    }
    Ok(())
}

/// Validate a non-empty identifier string such as a model version.
pub fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validate a document set used as key input.
///
/// The set must be non-empty, every document must carry a content hash, and a
/// document listed twice must carry the same hash both times.
pub fn validate_documents(documents: &[DocumentRef]) -> Result<(), ValidationError> {
    if documents.is_empty() {
        return Err(ValidationError::EmptyDocumentSet);
    }

    let mut seen: HashMap<_, &str> = HashMap::with_capacity(documents.len());
    for doc in documents {
        if doc.document_id.is_nil() {
            return Err(ValidationError::InvalidValue {
                field: "document_id".to_string(),
                reason: "nil identifier".to_string(),
            });
        }
        validate_required("content_hash", &doc.content_hash)?;
        if let Some(previous) = seen.insert(doc.document_id, doc.content_hash.as_str()) {
            if previous != doc.content_hash {
                return Err(ValidationError::ConflictingDocumentHash {
                    document_id: doc.document_id.as_uuid(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocumentId;

    #[test]
    fn test_empty_document_set_rejected() {
        assert_eq!(
            validate_documents(&[]),
            Err(ValidationError::EmptyDocumentSet)
        );
    }

    #[test]
    fn test_blank_hash_rejected() {
        let docs = [DocumentRef::new(DocumentId::now_v7(), " ", 1)];
        assert!(matches!(
            validate_documents(&docs),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[test]
    fn test_conflicting_hash_rejected() {
        let id = DocumentId::now_v7();
        let docs = [DocumentRef::new(id, "a", 1), DocumentRef::new(id, "b", 1)];
        assert!(matches!(
            validate_documents(&docs),
            Err(ValidationError::ConflictingDocumentHash { .. })
        ));
    }

    #[test]
    fn test_repeated_identical_document_allowed() {
        let id = DocumentId::now_v7();
        let docs = [DocumentRef::new(id, "a", 1), DocumentRef::new(id, "a", 1)];
        assert!(validate_documents(&docs).is_ok());
    }

    #[test]
    fn test_nil_case_rejected() {
        assert!(validate_case_id(CaseId::nil()).is_err());
        assert!(validate_case_id(CaseId::now_v7()).is_ok());
    }
}
