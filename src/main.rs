//! vita: terminal front end for the wellness coaching runtime.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn, Level};

use vita_core::provider::LlmProvider;
use vita_engine::{Session, SessionManager, TracingHooks};
use vita_llm::{ChatCompletionsConfig, ChatCompletionsProvider, ReliableConfig, ReliableProvider};
use vita_settings::{load_settings, load_settings_from_path, ProviderSettings, VitaSettings};
use vita_telemetry::{init_telemetry, vita_home, OperatorMetrics, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "vita", version, about = "Health and wellness coaching in your terminal")]
struct Cli {
    /// Your name, as the agents will address you
    #[arg(long, default_value = "Friend")]
    name: String,

    /// Stable user id; a fresh one is generated when omitted
    #[arg(long)]
    uid: Option<String>,

    /// Settings file (defaults to ~/.vita/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Print whole replies instead of streaming fragments
    #[arg(long)]
    no_stream: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn telemetry_config(settings: &VitaSettings, json_logs: bool) -> TelemetryConfig {
    let telemetry = &settings.telemetry;
    let archive_path = telemetry.archive_enabled.then(|| {
        telemetry
            .archive_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| vita_home().join("database/summaries.db"))
    });
    TelemetryConfig {
        log_level: Level::from_str(&telemetry.level).unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        json: json_logs || telemetry.json,
        archive_path,
    }
}

fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>> {
    let key = std::env::var(&settings.api_key_env)
        .with_context(|| format!("{} is not set (put it in the environment or .env)", settings.api_key_env))?;

    let mut config = ChatCompletionsConfig::new(SecretString::from(key));
    config.base_url = settings.base_url.clone();
    config.model = settings.model.clone();
    config.connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
    config.idle_timeout = Duration::from_millis(settings.idle_timeout_ms);
    let chat = ChatCompletionsProvider::new(config)?;

    let reliability = ReliableConfig {
        max_retries: settings.max_retries,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
        circuit_breaker_threshold: settings.circuit_failure_threshold,
        circuit_breaker_cooldown: Duration::from_millis(settings.circuit_cooldown_ms),
        ..ReliableConfig::default()
    };
    Ok(Arc::new(ReliableProvider::new(chat, reliability)))
}

fn prompt_marker() -> Result<()> {
    print!("\nYou: ");
    std::io::stdout().flush()?;
    Ok(())
}

async fn reply(session: &Session, prompt: &str, stream: bool) -> Result<()> {
    print!("Coach: ");
    if !stream {
        match session.chat(prompt).await {
            Ok(outcome) => println!("{}", outcome.text()),
            Err(e) => println!("{}", e.user_message()),
        }
        return Ok(());
    }

    let mut fragments = session.stream_chat(prompt)?;
    loop {
        tokio::select! {
            fragment = fragments.next() => match fragment {
                Some(text) => {
                    print!("{text}");
                    std::io::stdout().flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                fragments.abort();
            }
        }
    }
    println!();
    if let Err(e) = fragments.final_output().await {
        warn!(error = %e, "turn ended with an error");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)?,
        None => load_settings()?,
    };
    let telemetry = init_telemetry(telemetry_config(&settings, cli.json_logs));

    let provider = build_provider(&settings.provider)?;
    let orchestrator = vita_wellness::build_orchestrator(provider, &settings)?;
    let manager = SessionManager::new(Arc::new(orchestrator), Arc::new(OperatorMetrics::new()))
        .with_observer(Arc::new(TracingHooks));

    let uid = cli.uid.clone().unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
    let session = manager.create(&cli.name, &uid);
    info!(session_id = %session.id(), uid = %uid, "session started");

    println!("Hi {}! Tell me about your health and fitness goals. Press Enter on an empty line to quit.", cli.name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt_marker()?;
        let Some(line) = lines.next_line().await? else { break };
        let prompt = line.trim();
        if prompt.is_empty() {
            break;
        }
        reply(&session, prompt, !cli.no_stream).await?;
    }

    let summary = manager.close(session.id())?;
    debug!(metrics = ?manager.metrics().snapshot(), "operator metrics");
    println!("\n{}", serde_json::to_string_pretty(&summary)?);
    if let Some(archive) = telemetry.archive() {
        if let Err(e) = archive.insert(&session.id().to_string(), &uid, &summary) {
            warn!(error = %e, "failed to archive session summary");
        }
    }
    Ok(())
}
