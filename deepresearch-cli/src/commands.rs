//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use chrono::Local;
use deepresearch_core::{
    config_exists, load_config, AppConfig, ComparisonCollaborator, ComparisonService, ConfigError,
    DeepResearchError, GeminiCollaborator, JsonSessionStore, MockCollaborator,
    ResearchOrchestrator, ResearchSession, ResearchStatus, SessionObserver, SessionStore,
    SynthesisCollaborator,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::List { json } => handle_list(workspace, json),
        Commands::Show { id, json } => handle_show(workspace, &id, json),
        Commands::Start {
            query,
            parent,
            mock,
        } => handle_start(workspace, &query, parent.as_deref(), mock).await,
        Commands::Continue { id, query, mock } => {
            handle_start(workspace, &query, Some(&id), mock).await
        }
        Commands::Upload { id, path } => handle_upload(workspace, &id, &path),
        Commands::Compare { id_a, id_b, json } => {
            handle_compare(workspace, &id_a, &id_b, json).await
        }
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn load_workspace_config(workspace: &Path) -> anyhow::Result<AppConfig> {
    load_config(Some(workspace), None).map_err(|e| {
        anyhow::Error::new(DeepResearchError::Config(ConfigError::ParseError {
            message: e.to_string(),
        }))
    })
}

fn open_store(config: &AppConfig) -> Arc<dyn SessionStore> {
    Arc::new(JsonSessionStore::new(config.storage.sessions_dir()))
}

fn build_synthesizer(
    config: &AppConfig,
    mock: bool,
) -> anyhow::Result<Arc<dyn SynthesisCollaborator>> {
    if mock {
        return Ok(Arc::new(MockCollaborator::new()));
    }
    match config.llm.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiCollaborator::new(&config.llm)?)),
        "mock" => Ok(Arc::new(MockCollaborator::new())),
        other => Err(unknown_provider(other)),
    }
}

fn build_comparator(config: &AppConfig) -> anyhow::Result<Arc<dyn ComparisonCollaborator>> {
    match config.llm.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiCollaborator::new(&config.llm)?)),
        "mock" => Ok(Arc::new(MockCollaborator::new())),
        other => Err(unknown_provider(other)),
    }
}

fn unknown_provider(name: &str) -> anyhow::Error {
    anyhow::Error::new(DeepResearchError::Config(ConfigError::Invalid {
        message: format!("unknown provider '{name}'; expected \"gemini\" or \"mock\""),
    }))
}

fn handle_list(workspace: &Path, json: bool) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace)?;
    let sessions = open_store(&config).list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No research sessions yet. Run `deepresearch start <query>`.");
        return Ok(());
    }

    println!("{:<10} {:<10} {:<17} QUERY", "ID", "STATUS", "CREATED");
    for session in &sessions {
        println!(
            "{:<10} {:<10} {:<17} {}",
            short_id(&session.id),
            session.status,
            session
                .created_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            truncate(&session.query, 60),
        );
    }
    Ok(())
}

fn handle_show(workspace: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace)?;
    let Some(session) = open_store(&config).get(id)? else {
        anyhow::bail!("no session with id {id}");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_session(&session);
    }
    Ok(())
}

async fn handle_start(
    workspace: &Path,
    query: &str,
    parent: Option<&str>,
    mock: bool,
) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace)?;
    for warning in config.validate() {
        tracing::warn!("config: {}", warning);
    }

    let store = open_store(&config);
    let synthesizer = build_synthesizer(&config, mock)?;
    let orchestrator = ResearchOrchestrator::new(Arc::clone(&store), synthesizer);

    println!("Researching: {}", query);
    let observer = ProgressPrinter::default();
    let session = orchestrator.start(query, parent, &observer).await?;

    println!();
    print_session(&session);

    if session.status == ResearchStatus::Failed {
        anyhow::bail!(
            "run {} failed; re-run with -vv for details",
            short_id(&session.id)
        );
    }
    Ok(())
}

fn handle_upload(workspace: &Path, id: &str, path: &Path) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace)?;
    let store = open_store(&config);
    // The synthesizer is never exercised on the upload path.
    let orchestrator =
        ResearchOrchestrator::new(Arc::clone(&store), Arc::new(MockCollaborator::new()));

    let exists = store.get(id)?.is_some();
    let doc = orchestrator.upload_document(id, path)?;
    if exists {
        println!(
            "Attached {} ({} bytes, {}) to session {}",
            doc.name,
            doc.size,
            doc.mime_type,
            short_id(id)
        );
    } else {
        println!("Session {id} not found; nothing attached.");
    }
    Ok(())
}

async fn handle_compare(
    workspace: &Path,
    id_a: &str,
    id_b: &str,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_workspace_config(workspace)?;
    let store = open_store(&config);
    let service = ComparisonService::new(store, build_comparator(&config)?);

    let Some(result) = service.compare(id_a, id_b).await? else {
        println!("No comparison available: both ids must exist and differ.");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("Summary: {}", result.semantic_summary);
    if !result.added_findings.is_empty() {
        println!("\nAdded findings:");
        for finding in &result.added_findings {
            println!("  + {}", finding);
        }
    }
    if !result.contradictions.is_empty() {
        println!("\nContradictions:");
        for contradiction in &result.contradictions {
            println!("  ! {}", contradiction);
        }
    }
    if result.new_sources_count > 0 {
        println!("\nNew sources: {}", result.new_sources_count);
    }
    Ok(())
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".deepresearch");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = AppConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_workspace_config(workspace)?;
            if !config_exists(Some(workspace)) {
                println!("# No config file found; showing defaults and environment overrides.");
            }
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

/// Prints each reasoning step as the store picks it up.
#[derive(Default)]
struct ProgressPrinter {
    seen: AtomicUsize,
}

impl SessionObserver for ProgressPrinter {
    fn on_update(&self, session: &ResearchSession) {
        let seen = self.seen.swap(session.timeline.len(), Ordering::SeqCst);
        for step in session.timeline.iter().skip(seen) {
            println!("  [{:<9}] {}: {}", session.status, step.title, step.description);
        }
    }
}

fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn print_session(session: &ResearchSession) {
    println!("Session   {}", session.id);
    println!("Trace     {}", session.trace_id);
    println!("Status    {}", session.status);
    if let Some(parent) = &session.parent_research_id {
        println!("Parent    {}", parent);
    }
    println!(
        "Created   {}",
        session
            .created_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "Updated   {}",
        session
            .updated_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!("Query     {}", session.query);

    if !session.documents.is_empty() {
        println!("\nDocuments");
        for doc in &session.documents {
            println!("  {} ({} bytes, {})", doc.name, doc.size, doc.mime_type);
        }
    }

    if !session.timeline.is_empty() {
        println!("\nTimeline");
        for step in &session.timeline {
            let metrics = match (step.tokens_used, step.duration_ms) {
                (Some(tokens), Some(ms)) => format!(" ({tokens} tok, {ms} ms)"),
                (Some(tokens), None) => format!(" ({tokens} tok)"),
                (None, Some(ms)) => format!(" ({ms} ms)"),
                (None, None) => String::new(),
            };
            println!("  {:<10} {}{}", step.kind, step.title, metrics);
        }
    }

    if !session.sources.is_empty() {
        println!("\nSources");
        for source in &session.sources {
            println!(
                "  [{:?}] {} - {}",
                source.credibility, source.title, source.url
            );
        }
    }

    if session.confidence.score > 0 || !session.confidence.factors.is_empty() {
        println!(
            "\nConfidence {}%: {}",
            session.confidence.score, session.confidence.explanation
        );
        for factor in &session.confidence.factors {
            println!("  [{:?}] {}: {}", factor.impact, factor.label, factor.value);
        }
    }

    if session.cost.input_tokens > 0 || session.cost.output_tokens > 0 {
        println!(
            "\nCost      {} in / {} out tokens, est. ${:.6}",
            session.cost.input_tokens, session.cost.output_tokens, session.cost.estimated_cost
        );
        println!("          {}", session.cost.optimization_tip);
        for stage in &session.cost.stage_breakdown {
            println!("          {:<10} ${:.6}", stage.stage, stage.cost);
        }
    }

    if !session.follow_ups.is_empty() {
        println!("\nFollow-ups");
        for follow_up in &session.follow_ups {
            println!("  - {}", follow_up);
        }
    }

    if !session.report.is_empty() {
        println!("\n{}", session.report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_workspace_config(workspace: &Path, sessions_dir: &Path, provider: &str) {
        let dot = workspace.join(".deepresearch");
        std::fs::create_dir_all(&dot).unwrap();
        std::fs::write(
            dot.join("config.toml"),
            format!(
                "[llm]\nprovider = \"{}\"\n\n[storage]\ndata_dir = \"{}\"\n",
                provider,
                sessions_dir.display()
            ),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".deepresearch").join("config.toml");
        assert!(config_path.exists());

        // Verify it's valid TOML
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.llm.model, "gemini-3-flash-preview");
        assert_eq!(parsed.llm.provider, "gemini");
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        for _ in 0..2 {
            let command = Commands::Config {
                action: ConfigAction::Init,
            };
            handle_command(command, workspace).await.unwrap();
        }
        assert!(workspace.join(".deepresearch").join("config.toml").exists());
    }

    #[tokio::test]
    async fn test_start_with_mock_persists_completed_session() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let sessions_dir = workspace.join("sessions");
        write_workspace_config(workspace, &sessions_dir, "gemini");

        let command = Commands::Start {
            query: "offline smoke".to_string(),
            parent: None,
            mock: true,
        };
        handle_command(command, workspace).await.unwrap();

        let store = JsonSessionStore::new(&sessions_dir);
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].query, "offline smoke");
        assert_eq!(listed[0].status, ResearchStatus::Completed);
    }

    #[tokio::test]
    async fn test_upload_attaches_document_to_stored_session() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let sessions_dir = workspace.join("sessions");
        write_workspace_config(workspace, &sessions_dir, "gemini");

        handle_command(
            Commands::Start {
                query: "upload target".to_string(),
                parent: None,
                mock: true,
            },
            workspace,
        )
        .await
        .unwrap();

        let store = JsonSessionStore::new(&sessions_dir);
        let id = store.list().unwrap()[0].id.clone();

        let file = workspace.join("notes.md");
        std::fs::write(&file, "# context").unwrap();
        handle_command(
            Commands::Upload {
                id: id.clone(),
                path: file,
            },
            workspace,
        )
        .await
        .unwrap();

        let session = store.get(&id).unwrap().unwrap();
        assert_eq!(session.documents.len(), 1);
        assert_eq!(session.documents[0].name, "notes.md");
    }

    #[tokio::test]
    async fn test_compare_with_mock_provider() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let sessions_dir = workspace.join("sessions");
        write_workspace_config(workspace, &sessions_dir, "mock");

        for query in ["first", "second"] {
            handle_command(
                Commands::Start {
                    query: query.to_string(),
                    parent: None,
                    mock: true,
                },
                workspace,
            )
            .await
            .unwrap();
        }

        let store = JsonSessionStore::new(&sessions_dir);
        let listed = store.list().unwrap();
        let (id_a, id_b) = (listed[0].id.clone(), listed[1].id.clone());

        // Distinct stored sessions compare fine; a self-compare is refused
        // quietly. Neither should error.
        handle_command(
            Commands::Compare {
                id_a: id_a.clone(),
                id_b,
                json: false,
            },
            workspace,
        )
        .await
        .unwrap();
        handle_command(
            Commands::Compare {
                id_a: id_a.clone(),
                id_b: id_a,
                json: false,
            },
            workspace,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_provider() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let sessions_dir = workspace.join("sessions");
        write_workspace_config(workspace, &sessions_dir, "openai");

        let err = handle_command(
            Commands::Start {
                query: "q".to_string(),
                parent: None,
                mock: false,
            },
            workspace,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("unknown provider 'openai'"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("exactly-ten", 11), "exactly-ten");
        assert_eq!(truncate("a very long query indeed", 10), "a very ...");
        // Multi-byte characters must not be split.
        assert_eq!(truncate("日本語のクエリです", 5), "日本...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0b5c3e88-1111-2222-3333-444455556666"), "0b5c3e88");
        assert_eq!(short_id("tiny"), "tiny");
    }
}
