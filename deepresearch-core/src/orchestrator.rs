//! Research run orchestration.
//!
//! Drives one research run from submission to a terminal state, keeping the
//! session store and any registered observer in sync at every step. The
//! correctness discipline throughout: re-read the session from the store
//! before every mutation, because document uploads interleave with in-flight
//! runs and a stale in-memory copy would silently drop them.

use crate::collaborator::SynthesisCollaborator;
use crate::error::{CollaboratorError, Result};
use crate::store::SessionStore;
use crate::types::{ProgressEvent, ResearchSession, SynthesisOutcome, UploadedDocument};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Observer notified with a fresh snapshot after every persisted mutation.
///
/// Called synchronously from the run loop, in event order, so a renderer
/// sees exactly the sequence of states the store went through.
pub trait SessionObserver: Send + Sync {
    fn on_update(&self, session: &ResearchSession);
}

/// Observer that ignores all updates.
pub struct NoOpObserver;

impl SessionObserver for NoOpObserver {
    fn on_update(&self, _session: &ResearchSession) {}
}

/// Owns the lifecycle of research runs against an injected store and
/// synthesis collaborator.
pub struct ResearchOrchestrator {
    store: Arc<dyn SessionStore>,
    synthesizer: Arc<dyn SynthesisCollaborator>,
}

impl ResearchOrchestrator {
    pub fn new(store: Arc<dyn SessionStore>, synthesizer: Arc<dyn SynthesisCollaborator>) -> Self {
        Self { store, synthesizer }
    }

    /// All sessions, newest first.
    pub fn list(&self) -> Result<Vec<ResearchSession>> {
        Ok(self.store.list()?)
    }

    /// One session by id.
    pub fn get(&self, id: &str) -> Result<Option<ResearchSession>> {
        Ok(self.store.get(id)?)
    }

    /// Run one research query to a terminal state.
    ///
    /// The session is persisted and the observer notified before any
    /// synthesis work starts, so a slow or failing collaborator never
    /// leaves the caller without a session to render. Collaborator
    /// failures resolve to a `failed` session, not an `Err`; only store
    /// failures propagate.
    pub async fn start(
        &self,
        query: &str,
        parent_id: Option<&str>,
        observer: &dyn SessionObserver,
    ) -> Result<ResearchSession> {
        let parent = match parent_id {
            Some(id) => {
                let parent = self.store.get(id)?;
                if parent.is_none() {
                    warn!(parent_id = id, "parent session not found, starting without context");
                }
                parent
            }
            None => None,
        };

        let session = ResearchSession::new(query, parent_id.map(String::from));
        info!(
            session_id = %session.id,
            trace_id = %session.trace_id,
            parent = parent_id.unwrap_or("-"),
            "starting research run"
        );
        self.store.upsert(&session)?;
        observer.on_update(&session);

        let context = parent
            .map(|p| format!("Based on previous findings: {}", p.summary))
            .unwrap_or_default();

        let (tx, mut rx) = mpsc::channel(16);
        let producer = tokio::spawn({
            let synthesizer = Arc::clone(&self.synthesizer);
            let query = query.to_string();
            async move { synthesizer.generate(&query, &context, tx).await }
        });

        // Consume progress concurrently with the producer; awaiting the
        // collaborator first would fill the channel and stall it.
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.apply_event(&session.id, event, observer) {
                producer.abort();
                return Err(e);
            }
        }

        let outcome = match producer.await {
            Ok(result) => result,
            Err(join_err) => Err(CollaboratorError::Connection {
                message: format!("synthesis task panicked: {join_err}"),
            }),
        };

        match outcome {
            Ok(outcome) => self.complete(&session, outcome, observer),
            Err(e) => {
                error!(session_id = %session.id, error = %e, "research run failed");
                self.mark_failed(&session, observer)
            }
        }
    }

    /// Start a new run that extends an existing session.
    ///
    /// Never mutates the parent; the child records the lineage and the
    /// collaborator receives context built from the parent's summary.
    pub async fn continue_research(
        &self,
        session_id: &str,
        new_query: &str,
        observer: &dyn SessionObserver,
    ) -> Result<ResearchSession> {
        self.start(new_query, Some(session_id), observer).await
    }

    /// Attach a file from disk to a session.
    ///
    /// Synthesizes the document record (fresh id, name and byte size from
    /// the file, mime type by extension) and appends it through the store.
    /// Returns the record even when the session is absent, matching the
    /// store's lenient `append_document`. Does not trigger re-synthesis.
    pub fn upload_document(&self, session_id: &str, path: &Path) -> Result<UploadedDocument> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();

        let doc = UploadedDocument::new(name, metadata.len(), mime_type);
        debug!(session_id, doc_id = %doc.id, name = %doc.name, "uploading document");
        self.store.append_document(session_id, doc.clone())?;
        Ok(doc)
    }

    /// Apply one progress event to the freshest stored copy of the session.
    fn apply_event(
        &self,
        session_id: &str,
        event: ProgressEvent,
        observer: &dyn SessionObserver,
    ) -> Result<()> {
        let Some(mut session) = self.store.get(session_id)? else {
            warn!(session_id, "session record vanished mid-run, dropping progress event");
            return Ok(());
        };
        debug!(
            session_id,
            status = %event.status,
            step = %event.step.title,
            "applying progress event"
        );
        if session.apply_progress(event) {
            self.store.upsert(&session)?;
            observer.on_update(&session);
        }
        Ok(())
    }

    /// Merge the terminal payload into the freshest stored copy.
    fn complete(
        &self,
        initial: &ResearchSession,
        outcome: SynthesisOutcome,
        observer: &dyn SessionObserver,
    ) -> Result<ResearchSession> {
        let mut session = self.freshest_or_initial(initial)?;
        session.apply_outcome(outcome);
        self.store.upsert(&session)?;
        observer.on_update(&session);
        info!(
            session_id = %session.id,
            sources = session.sources.len(),
            steps = session.timeline.len(),
            "research run completed"
        );
        Ok(session)
    }

    /// Mark the freshest stored copy failed, keeping accumulated progress.
    ///
    /// Returns the same failed session that was persisted, so the store and
    /// the return value never disagree about the run's fate.
    fn mark_failed(
        &self,
        initial: &ResearchSession,
        observer: &dyn SessionObserver,
    ) -> Result<ResearchSession> {
        let mut session = self.freshest_or_initial(initial)?;
        session.fail();
        self.store.upsert(&session)?;
        observer.on_update(&session);
        Ok(session)
    }

    fn freshest_or_initial(&self, initial: &ResearchSession) -> Result<ResearchSession> {
        match self.store.get(&initial.id)? {
            Some(session) => Ok(session),
            None => {
                // Only reachable when the record is deleted out from under a
                // run; re-create from the initial snapshot, progress lost.
                warn!(session_id = %initial.id, "session record vanished, restoring from initial snapshot");
                Ok(initial.clone())
            }
        }
    }
}
