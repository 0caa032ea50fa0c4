//! External collaborator interfaces.
//!
//! The synthesis and comparison collaborators are the system's only external
//! dependencies: slow, fallible, and opaque. Both are consumed through trait
//! objects so the orchestrator never knows whether it is talking to the
//! Gemini implementation or the scriptable [`MockCollaborator`].

use crate::error::CollaboratorError;
use crate::types::{ComparisonResult, ProgressEvent, ResearchCost, SynthesisOutcome};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Performs the actual research synthesis for one run.
#[async_trait]
pub trait SynthesisCollaborator: Send + Sync {
    /// Run one synthesis for `query`, with `context` carrying parent
    /// findings (empty when the run has no parent).
    ///
    /// Emits zero or more [`ProgressEvent`]s on `progress` while running,
    /// then resolves exactly once with the terminal payload or an error.
    async fn generate(
        &self,
        query: &str,
        context: &str,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Result<SynthesisOutcome, CollaboratorError>;
}

/// Produces a semantic diff between two research summaries.
#[async_trait]
pub trait ComparisonCollaborator: Send + Sync {
    async fn compare(
        &self,
        summary_a: &str,
        summary_b: &str,
    ) -> Result<ComparisonResult, CollaboratorError>;
}

/// Scriptable collaborator for tests and offline runs.
///
/// Progress events are replayed on every `generate` call; outcomes and
/// comparison results are consumed FIFO. With nothing queued it falls back
/// to a small canned result so offline smoke runs still complete.
pub struct MockCollaborator {
    events: Mutex<Vec<ProgressEvent>>,
    outcomes: Mutex<Vec<Result<SynthesisOutcome, CollaboratorError>>>,
    comparisons: Mutex<Vec<Result<ComparisonResult, CollaboratorError>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockCollaborator {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            outcomes: Mutex::new(Vec::new()),
            comparisons: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Mock that replays `events` and then resolves with `outcome`.
    pub fn with_scripted_run(events: Vec<ProgressEvent>, outcome: SynthesisOutcome) -> Self {
        let mock = Self::new();
        *mock.events.lock().unwrap() = events;
        mock.queue_outcome(Ok(outcome));
        mock
    }

    /// Append a progress event to the script replayed by `generate`.
    pub fn script_event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Queue the value the next `generate` call resolves with.
    pub fn queue_outcome(&self, outcome: Result<SynthesisOutcome, CollaboratorError>) {
        self.outcomes.lock().unwrap().push(outcome);
    }

    /// Queue the value the next `compare` call resolves with.
    pub fn queue_comparison(&self, result: Result<ComparisonResult, CollaboratorError>) {
        self.comparisons.lock().unwrap().push(result);
    }

    /// The `(query, context)` pairs `generate` was called with, in order.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }

    fn fallback_outcome() -> SynthesisOutcome {
        SynthesisOutcome {
            report: "Mock research report.".to_string(),
            summary: "Mock summary.".to_string(),
            cost: ResearchCost::from_tokens(100, 50),
            ..Default::default()
        }
    }
}

impl Default for MockCollaborator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SynthesisCollaborator for MockCollaborator {
    async fn generate(
        &self,
        query: &str,
        context: &str,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Result<SynthesisOutcome, CollaboratorError> {
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), context.to_string()));

        let events = self.events.lock().unwrap().clone();
        for event in events {
            // A dropped receiver just means nobody is listening anymore.
            let _ = progress.send(event).await;
        }

        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            Ok(Self::fallback_outcome())
        } else {
            outcomes.remove(0)
        }
    }
}

#[async_trait]
impl ComparisonCollaborator for MockCollaborator {
    async fn compare(
        &self,
        _summary_a: &str,
        _summary_b: &str,
    ) -> Result<ComparisonResult, CollaboratorError> {
        let mut comparisons = self.comparisons.lock().unwrap();
        if comparisons.is_empty() {
            Ok(ComparisonResult::default())
        } else {
            comparisons.remove(0)
        }
    }
}
