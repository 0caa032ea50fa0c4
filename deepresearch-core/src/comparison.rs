//! Semantic comparison between two stored sessions.

use crate::collaborator::ComparisonCollaborator;
use crate::error::Result;
use crate::store::SessionStore;
use crate::types::ComparisonResult;
use std::sync::Arc;
use tracing::debug;

/// Produces an ephemeral semantic diff between two existing sessions.
pub struct ComparisonService {
    store: Arc<dyn SessionStore>,
    comparator: Arc<dyn ComparisonCollaborator>,
}

impl ComparisonService {
    pub fn new(store: Arc<dyn SessionStore>, comparator: Arc<dyn ComparisonCollaborator>) -> Self {
        Self { store, comparator }
    }

    /// Diff two sessions by id.
    ///
    /// `Ok(None)` when the ids are identical or either session is absent;
    /// both are leniencies, not errors. Collaborator failures propagate,
    /// since there is no session to mark failed. The result is never
    /// persisted.
    pub async fn compare(&self, id_a: &str, id_b: &str) -> Result<Option<ComparisonResult>> {
        if id_a == id_b {
            debug!(id = id_a, "comparison of a session with itself, skipping");
            return Ok(None);
        }
        let Some(a) = self.store.get(id_a)? else {
            return Ok(None);
        };
        let Some(b) = self.store.get(id_b)? else {
            return Ok(None);
        };

        let result = self.comparator.compare(&a.summary, &b.summary).await?;
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::MockCollaborator;
    use crate::error::{CollaboratorError, DeepResearchError};
    use crate::store::MemorySessionStore;
    use crate::types::ResearchSession;

    fn service_with_sessions(
        mock: MockCollaborator,
        sessions: &[&ResearchSession],
    ) -> ComparisonService {
        let store = Arc::new(MemorySessionStore::new());
        for session in sessions {
            store.upsert(session).unwrap();
        }
        ComparisonService::new(store, Arc::new(mock))
    }

    #[tokio::test]
    async fn test_compare_same_id_absent() {
        let session = ResearchSession::new("q", None);
        let service = service_with_sessions(MockCollaborator::new(), &[&session]);
        assert!(service.compare(&session.id, &session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_unknown_id_absent_not_error() {
        let session = ResearchSession::new("q", None);
        let service = service_with_sessions(MockCollaborator::new(), &[&session]);

        assert!(service.compare(&session.id, "ghost").await.unwrap().is_none());
        assert!(service.compare("ghost", &session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_returns_collaborator_result_verbatim() {
        let mut a = ResearchSession::new("qa", None);
        a.summary = "summary a".into();
        let mut b = ResearchSession::new("qb", None);
        b.summary = "summary b".into();

        let mock = MockCollaborator::new();
        mock.queue_comparison(Ok(ComparisonResult {
            added_findings: vec!["new finding".into()],
            contradictions: vec!["conflict".into()],
            new_sources_count: 3,
            semantic_summary: "B extends A".into(),
        }));
        let service = service_with_sessions(mock, &[&a, &b]);

        let result = service.compare(&a.id, &b.id).await.unwrap().unwrap();
        assert_eq!(result.added_findings, vec!["new finding".to_string()]);
        assert_eq!(result.new_sources_count, 3);
        assert_eq!(result.semantic_summary, "B extends A");
    }

    #[tokio::test]
    async fn test_compare_collaborator_error_propagates() {
        let a = ResearchSession::new("qa", None);
        let b = ResearchSession::new("qb", None);

        let mock = MockCollaborator::new();
        mock.queue_comparison(Err(CollaboratorError::AuthFailed {
            provider: "gemini".into(),
        }));
        let service = service_with_sessions(mock, &[&a, &b]);

        let err = service.compare(&a.id, &b.id).await.unwrap_err();
        assert!(matches!(err, DeepResearchError::Collaborator(_)));
    }
}
