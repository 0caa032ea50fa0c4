//! Session data model for the research engine.
//!
//! A [`ResearchSession`] is the unit of work: one research run and everything
//! it accumulated. Every persisted field deserializes with a documented
//! default so records written by an older schema load cleanly instead of
//! failing the whole history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Flat per-1k-token rate used for every cost estimate.
pub const RATE_PER_1K_USD: f64 = 0.0005;

/// Lifecycle status of a research session.
///
/// Runs move `planning -> searching -> {searching <-> drafting} -> completed`,
/// or from any non-terminal status to `failed`. `idle` only ever describes a
/// session that never started (typically a repaired legacy record).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    #[default]
    Idle,
    Planning,
    Searching,
    Drafting,
    Completed,
    Failed,
}

impl ResearchStatus {
    /// Terminal statuses accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResearchStatus::Completed | ResearchStatus::Failed)
    }

    /// Statuses a progress event is allowed to carry.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ResearchStatus::Planning | ResearchStatus::Searching | ResearchStatus::Drafting
        )
    }
}

impl fmt::Display for ResearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResearchStatus::Idle => "idle",
            ResearchStatus::Planning => "planning",
            ResearchStatus::Searching => "searching",
            ResearchStatus::Drafting => "drafting",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
        };
        f.pad(s)
    }
}

/// Kind of work a reasoning step performed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Plan,
    Search,
    #[default]
    Analyze,
    Synthesize,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Plan => "plan",
            StepKind::Search => "search",
            StepKind::Analyze => "analyze",
            StepKind::Synthesize => "synthesize",
        };
        f.pad(s)
    }
}

/// One entry in a session's reasoning/timeline trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningStep {
    pub title: String,
    pub description: String,
    pub kind: StepKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Token estimate for this stage, when the collaborator reports one.
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl Default for ReasoningStep {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            kind: StepKind::default(),
            timestamp: Utc::now(),
            tokens_used: None,
            duration_ms: None,
        }
    }
}

impl ReasoningStep {
    /// Create a step timestamped now, without stage metrics.
    pub fn new(title: impl Into<String>, description: impl Into<String>, kind: StepKind) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            kind,
            timestamp: Utc::now(),
            tokens_used: None,
            duration_ms: None,
        }
    }

    /// Attach token/duration estimates for this stage.
    pub fn with_metrics(mut self, tokens_used: u64, duration_ms: u64) -> Self {
        self.tokens_used = Some(tokens_used);
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Coarse credibility tier the collaborator assigns to a source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Credibility {
    High,
    #[default]
    Medium,
    Low,
}

/// Publication category of a source.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SourceKind {
    Paper,
    Blog,
    News,
    #[default]
    Report,
}

/// One piece of evidence backing (or disputing) the report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchSource {
    pub title: String,
    pub url: String,
    pub snippet: String,
    /// Why this source was selected.
    pub reasoning: String,
    /// Claim in the report this source supports, if any.
    pub supports_claim: String,
    /// Claim or source this one conflicts with, if any.
    pub conflicts_with: String,
    pub credibility: Credibility,
    /// One-line justification for the credibility tier.
    pub credibility_signal: String,
    pub kind: SourceKind,
    pub year: Option<u16>,
}

/// Direction a confidence factor pushes the overall score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Positive,
    Negative,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceFactor {
    pub label: String,
    pub impact: Impact,
    pub value: String,
}

/// Collaborator's self-assessed confidence in the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfidenceMetrics {
    /// 0-100.
    pub score: u8,
    pub explanation: String,
    pub factors: Vec<ConfidenceFactor>,
}

impl Default for ConfidenceMetrics {
    fn default() -> Self {
        Self {
            score: 0,
            explanation: "No analytical data available".to_string(),
            factors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabelValue {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct YearCount {
    pub year: i32,
    pub count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgreementStat {
    pub label: String,
    pub value: f64,
    /// Display hint (hex color) chosen by the collaborator.
    pub color: String,
}

/// Verification verdict for an evidence claim.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimStatus {
    Supported,
    Contested,
    #[default]
    Inconclusive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvidenceClaim {
    pub claim: String,
    pub status: ClaimStatus,
    pub supporting_sources: u32,
    pub conflicting_sources: u32,
}

/// Derived chart/claim series, empty until the session completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchAnalytics {
    pub source_distribution: Vec<LabelValue>,
    pub credibility_breakdown: Vec<LabelValue>,
    pub recency_trends: Vec<YearCount>,
    pub agreement_stats: Vec<AgreementStat>,
    pub evidence_claims: Vec<EvidenceClaim>,
}

/// Cost share attributed to one pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageCost {
    pub stage: String,
    pub cost: f64,
}

impl StageCost {
    /// Price a stage from its token estimate at the flat rate.
    pub fn from_stage_tokens(stage: impl Into<String>, tokens: u64) -> Self {
        Self {
            stage: stage.into(),
            cost: (tokens as f64 / 1000.0) * RATE_PER_1K_USD,
        }
    }
}

/// Token usage and derived monetary estimate for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
    pub optimization_tip: String,
    pub stage_breakdown: Vec<StageCost>,
}

impl ResearchCost {
    /// Derive the estimate from token counts at the flat per-1k rate.
    ///
    /// The optimization tip flags sourcing-heavy runs (over 2000 input
    /// tokens) and reports balanced usage otherwise.
    pub fn from_tokens(input_tokens: u64, output_tokens: u64) -> Self {
        let tip = if input_tokens > 2000 {
            "Stage Sourcing consumed 60% of tokens. Consider refining search scope."
        } else {
            "Resource usage balanced."
        };
        Self {
            input_tokens,
            output_tokens,
            estimated_cost: ((input_tokens + output_tokens) as f64 / 1000.0) * RATE_PER_1K_USD,
            optimization_tip: tip.to_string(),
            stage_breakdown: Vec::new(),
        }
    }
}

/// A file attached to a session as extra context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadedDocument {
    pub id: String,
    pub name: String,
    /// Byte length of the uploaded file.
    pub size: u64,
    pub mime_type: String,
    pub summary: Option<String>,
}

impl UploadedDocument {
    /// Synthesize the attachment record for an upload.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        let name = name.into();
        let summary = format!("Uploaded context from {name}");
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            size,
            mime_type: mime_type.into(),
            summary: Some(summary),
        }
    }
}

/// Terminal payload the synthesis collaborator resolves with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisOutcome {
    pub report: String,
    pub summary: String,
    pub sources: Vec<ResearchSource>,
    pub confidence: ConfidenceMetrics,
    pub analytics: ResearchAnalytics,
    pub follow_ups: Vec<String>,
    pub cost: ResearchCost,
}

/// Incremental status+step update emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub status: ResearchStatus,
    pub step: ReasoningStep,
}

impl ProgressEvent {
    pub fn new(status: ResearchStatus, step: ReasoningStep) -> Self {
        Self { status, step }
    }
}

/// Semantic diff between two sessions. Ephemeral, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ComparisonResult {
    pub added_findings: Vec<String>,
    pub contradictions: Vec<String>,
    pub new_sources_count: u32,
    pub semantic_summary: String,
}

fn new_trace_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("trace_{}", &hex[..12])
}

/// Default for records persisted before trace ids existed.
fn legacy_trace_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("trace_legacy_{}", &hex[..8])
}

fn default_user_id() -> String {
    "local".to_string()
}

/// One research run and its accumulated results.
///
/// Continuation never mutates the parent: `parent_research_id` is a weak
/// reference by id, forming a forest of runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResearchSession {
    /// Opaque unique id, also the store key.
    pub id: String,
    /// Owner tag. Single-user deployments leave the default.
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// The research query, verbatim and immutable after creation.
    pub query: String,
    /// Weak reference to the session this one extends.
    pub parent_research_id: Option<String>,
    /// Markdown report, empty until completion.
    pub report: String,
    /// Short executive summary derived from the report.
    pub summary: String,
    pub status: ResearchStatus,
    /// Progress steps in arrival order, never reordered or deduplicated.
    pub reasoning: Vec<ReasoningStep>,
    /// Mirror of `reasoning` kept for chronological display.
    pub timeline: Vec<ReasoningStep>,
    pub sources: Vec<ResearchSource>,
    pub cost: ResearchCost,
    pub confidence: ConfidenceMetrics,
    pub analytics: ResearchAnalytics,
    pub follow_ups: Vec<String>,
    /// Correlation id for diagnostics, independent of `id`.
    #[serde(default = "legacy_trace_id")]
    pub trace_id: String,
    /// Uploaded attachments. Grows via explicit upload, never shrinks.
    pub documents: Vec<UploadedDocument>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Default for ResearchSession {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            user_id: default_user_id(),
            query: String::new(),
            parent_research_id: None,
            report: String::new(),
            summary: String::new(),
            status: ResearchStatus::Idle,
            reasoning: Vec::new(),
            timeline: Vec::new(),
            sources: Vec::new(),
            cost: ResearchCost::default(),
            confidence: ConfidenceMetrics::default(),
            analytics: ResearchAnalytics::default(),
            follow_ups: Vec::new(),
            trace_id: legacy_trace_id(),
            documents: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl ResearchSession {
    /// Create a session at the start of a run: fresh ids, status `planning`,
    /// everything else empty.
    pub fn new(query: impl Into<String>, parent_research_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: default_user_id(),
            query: query.into(),
            parent_research_id,
            report: String::new(),
            summary: String::new(),
            status: ResearchStatus::Planning,
            reasoning: Vec::new(),
            timeline: Vec::new(),
            sources: Vec::new(),
            cost: ResearchCost::default(),
            confidence: ConfidenceMetrics::default(),
            analytics: ResearchAnalytics::default(),
            follow_ups: Vec::new(),
            trace_id: new_trace_id(),
            documents: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply one in-flight progress event: append the step to both trails,
    /// adopt the event's status, bump `updated_at`.
    ///
    /// Returns `false` without mutating when the session is already terminal
    /// or the event carries a status progress events may not deliver.
    pub fn apply_progress(&mut self, event: ProgressEvent) -> bool {
        if self.status.is_terminal() || !event.status.is_in_flight() {
            return false;
        }
        self.reasoning.push(event.step.clone());
        self.timeline.push(event.step);
        self.status = event.status;
        self.updated_at = Utc::now();
        true
    }

    /// Overlay the collaborator's terminal payload and mark the session
    /// completed.
    ///
    /// Only result fields are replaced; the progress trails and `documents`
    /// are kept as-is, so appends that raced the run survive. Call this on
    /// the freshest stored copy, never a stale in-memory one.
    pub fn apply_outcome(&mut self, outcome: SynthesisOutcome) {
        self.report = outcome.report;
        self.summary = outcome.summary;
        self.sources = outcome.sources;
        self.confidence = outcome.confidence;
        self.analytics = outcome.analytics;
        self.follow_ups = outcome.follow_ups;
        self.cost = outcome.cost;
        self.status = ResearchStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Mark the session failed, keeping whatever progress it accumulated.
    pub fn fail(&mut self) {
        self.status = ResearchStatus::Failed;
        self.updated_at = Utc::now();
    }

    /// Append an uploaded document.
    pub fn attach_document(&mut self, doc: UploadedDocument) {
        self.documents.push(doc);
        self.updated_at = Utc::now();
    }
}
