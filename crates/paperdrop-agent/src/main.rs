//! paperdrop: daily arXiv → Notion paper digest.
//! Entry point for the agent binary.

mod config;
mod lock;
mod schedule;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use paperdrop_common::{PaperdropError, SandboxClient};
use paperdrop_ingestion::extract::PdfTextExtractor;
use paperdrop_ingestion::pipeline::{IngestionPipeline, IngestionReport, PipelineSettings};
use paperdrop_ingestion::search::SearchClient;
use paperdrop_ingestion::sources::arxiv::ArxivClient;
use paperdrop_ingestion::store::notion::NotionStore;
use paperdrop_ingestion::store::{InMemoryStore, RecordStore};
use paperdrop_ingestion::summarize::{LlmSummarizer, NoopSummarizer, Summarizer};
use paperdrop_llm::backend::{OpenAiBackend, OpenAiCompatibleBackend};
use paperdrop_llm::LlmBackend;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::lock::RunLock;

#[derive(Parser)]
#[command(name = "paperdrop")]
#[command(version)]
#[command(about = "Daily arXiv search, PDF extraction and Notion digest", long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        value_name = "FILE",
        env = "PAPERDROP_CONFIG",
        default_value = "paperdrop.toml"
    )]
    config: PathBuf,

    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass now.
    Run {
        /// Search, extract and summarize, but write nothing to Notion.
        #[arg(long)]
        dry_run: bool,
    },

    /// Stay resident and run a pass every day at schedule.daily_at.
    Daemon,

    /// Validate configuration and count the titles already in the database.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let default_filter = if cli.verbose {
        "paperdrop=debug,paperdrop_ingestion=debug,paperdrop_llm=debug,paperdrop_common=debug,warn"
    } else {
        "paperdrop=info,paperdrop_ingestion=info,paperdrop_llm=info,warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("paperdrop {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;
    let base_dir = cli
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf();
    let system_prompt = config.system_prompt(&base_dir)?;

    info!(
        query = %config.search.effective_query(),
        max_results = config.search.max_results,
        summarizer = if config.summarizer.enabled { config.summarizer.model.as_str() } else { "disabled" },
        "Configuration loaded"
    );

    match cli.command {
        Commands::Run { dry_run } => {
            let report = run_once(&config, &system_prompt, dry_run)
                .await
                .context("ingestion run failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Daemon => daemon(&config, &system_prompt).await?,
        Commands::Check => check(&config).await?,
    }

    Ok(())
}

fn build_sandbox(config: &Config) -> Result<SandboxClient> {
    let mut sandbox = SandboxClient::with_timeout(Duration::from_secs(config.http.timeout_secs))?;
    for host in &config.http.extra_allowed_hosts {
        sandbox.allow_domain(host);
    }
    if let Some(ref endpoint) = config.search.endpoint {
        sandbox.allow_url_host(endpoint)?;
    }
    if config.summarizer.enabled && config.summarizer.backend == "openai_compatible" {
        sandbox.allow_url_host(&config.summarizer.base_url)?;
    }
    Ok(sandbox)
}

fn build_summarizer(config: &Config, sandbox: &SandboxClient) -> Result<Arc<dyn Summarizer>> {
    let cfg = &config.summarizer;
    if !cfg.enabled {
        return Ok(Arc::new(NoopSummarizer));
    }

    let backend: Arc<dyn LlmBackend> = match cfg.backend.as_str() {
        "openai" => {
            let key = config
                .llm_api_key()
                .ok_or_else(|| PaperdropError::Config("OpenAI key missing".into()))?;
            Arc::new(OpenAiBackend::new(sandbox.clone(), key, cfg.model.clone()))
        }
        _ => Arc::new(OpenAiCompatibleBackend::new(
            sandbox.clone(),
            cfg.base_url.clone(),
            cfg.model.clone(),
            config.llm_api_key(),
        )),
    };
    info!(backend = %cfg.backend, model = backend.model_id(), "Summarizer ready");
    Ok(Arc::new(LlmSummarizer::new(backend, cfg.max_input_chars)))
}

fn build_notion(config: &Config, sandbox: &SandboxClient) -> Result<NotionStore, PaperdropError> {
    Ok(NotionStore::new(
        sandbox.clone(),
        config.notion_api_key()?,
        config.store.database_id.trim(),
        config.store.properties(),
    ))
}

fn build_pipeline(
    config: &Config,
    sandbox: &SandboxClient,
    store: Arc<dyn RecordStore>,
    system_prompt: &str,
) -> Result<IngestionPipeline> {
    let mut source = ArxivClient::new(sandbox.clone()).with_sort_by(config.search.sort_by.clone());
    if let Some(ref endpoint) = config.search.endpoint {
        source = source.with_endpoint(endpoint.clone());
    }
    let search = SearchClient::new(Arc::new(source), store.clone()).with_limits(config.search.limits());

    Ok(IngestionPipeline::new(
        search,
        Arc::new(PdfTextExtractor::new(sandbox.clone())),
        build_summarizer(config, sandbox)?,
        store,
        PipelineSettings {
            query: config.search.effective_query(),
            max_results: config.search.max_results,
            system_prompt: system_prompt.to_string(),
        },
    ))
}

/// One pass under the lock file. Per-candidate failures are inside the report.
async fn run_once(config: &Config, system_prompt: &str, dry_run: bool) -> Result<IngestionReport, PaperdropError> {
    let _lock = RunLock::acquire(&config.schedule.lock_path)?;
    let sandbox = build_sandbox(config).map_err(|e| PaperdropError::Config(format!("{e:#}")))?;
    let notion = Arc::new(build_notion(config, &sandbox)?);

    if !dry_run {
        let pipeline = build_pipeline(config, &sandbox, notion, system_prompt)
            .map_err(|e| PaperdropError::Config(format!("{e:#}")))?;
        return pipeline.run_ingestion_cycle().await;
    }

    // Dry run: dedupe against the real database, write to memory only
    let known = notion.list_all_titles().await?;
    info!(known = known.len(), "Dry run: records will not be written to Notion");
    let memory = Arc::new(InMemoryStore::with_titles(known));
    let pipeline = build_pipeline(config, &sandbox, memory.clone(), system_prompt)
        .map_err(|e| PaperdropError::Config(format!("{e:#}")))?;
    let report = pipeline.run_ingestion_cycle().await?;
    for record in memory.records() {
        info!(title = %record.title, link = %record.link, summary_chars = record.summary.len(), "Would create record");
    }
    Ok(report)
}

async fn daemon(config: &Config, system_prompt: &str) -> Result<()> {
    let at = config.schedule.daily_time()?;
    let daily = schedule::daily_schedule(at)?;
    info!(daily_at = %at, cron = %daily, "Daemon started");

    loop {
        let now = chrono::Local::now();
        let next = schedule::next_run(&daily, &now)
            .with_context(|| format!("no upcoming local time for {}", at))?;
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, wait_secs = wait.as_secs(), "Waiting for next scheduled run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; daemon stopping");
                return Ok(());
            }
        }

        match run_once(config, system_prompt, false).await {
            Ok(report) => info!(
                run_id = %report.run_id,
                succeeded = report.succeeded,
                attempted = report.attempted,
                "Scheduled run finished"
            ),
            Err(e) if e.is_fatal() => return Err(e).context("scheduled run failed"),
            Err(PaperdropError::AlreadyRunning) => warn!("Previous run still in progress; skipping today's run"),
            Err(e) => error!(error = %e, "Scheduled run failed; retrying at the next slot"),
        }
    }
}

async fn check(config: &Config) -> Result<()> {
    let sandbox = build_sandbox(config)?;
    let titles = build_notion(config, &sandbox)?
        .list_all_titles()
        .await
        .context("cannot read the Notion database")?;
    info!(known_titles = titles.len(), "Notion database reachable");
    println!("OK: {} titles in the database", titles.len());
    Ok(())
}
