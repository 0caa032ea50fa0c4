//! # DeepResearch Core
//!
//! Core library for the DeepResearch engine.
//! Provides the session store, run orchestrator, Gemini synthesis and
//! comparison collaborators, configuration, and fundamental types.

pub mod collaborator;
pub mod comparison;
pub mod config;
pub mod error;
pub mod gemini;
pub mod orchestrator;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root.
pub use collaborator::{ComparisonCollaborator, MockCollaborator, SynthesisCollaborator};
pub use comparison::ComparisonService;
pub use config::{config_exists, load_config, AppConfig, LlmConfig, StorageConfig};
pub use error::{CollaboratorError, ConfigError, DeepResearchError, Result, StoreError};
pub use gemini::GeminiCollaborator;
pub use orchestrator::{NoOpObserver, ResearchOrchestrator, SessionObserver};
pub use store::{JsonSessionStore, MemorySessionStore, SessionStore};
pub use types::{
    ComparisonResult, ProgressEvent, ReasoningStep, ResearchCost, ResearchSession, ResearchSource,
    ResearchStatus, StepKind, SynthesisOutcome, UploadedDocument,
};
