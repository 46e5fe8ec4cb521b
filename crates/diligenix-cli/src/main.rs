use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use diligenix_core::{
    default_section_catalog, render_markdown, Agent, LanguageModel, PipelineConfig, RunEvent,
    RunPhase, RunState, TextExtractor,
};
use diligenix_local::{OllamaClient, OpenAiCompatClient, ReadableTextExtractor};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "diligenix")]
#[command(
    about = "Plan, research and stream a sectional intelligence report on a target",
    long_about = None
)]
struct Cli {
    /// More log output on stderr (-v debug, -vv trace). RUST_LOG wins when set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline for one target and write report.md + run.json.
    Run(RunCmd),
    /// Print the built-in report section catalog (json).
    Sections,
    /// Report which collaborators are configured (json; booleans only, no secrets).
    Doctor,
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct RunCmd {
    /// Subject of the report, e.g. a company or market.
    target: String,
    /// Language model backend. Allowed: ollama, openai-compat
    #[arg(long, env = "DILIGENIX_LLM", default_value = "ollama")]
    llm: String,
    /// Model name; overrides the backend's own model env var.
    #[arg(long, env = "DILIGENIX_MODEL")]
    model: Option<String>,
    /// Search provider. Allowed: auto, duckduckgo, brave, tavily, searxng
    #[arg(long, env = "DILIGENIX_SEARCH", default_value = "auto")]
    search: String,
    /// Number of research queries to plan.
    #[arg(long, env = "DILIGENIX_QUERIES", default_value_t = 7)]
    queries: usize,
    /// Search results visited per query.
    #[arg(long, env = "DILIGENIX_MAX_RESULTS", default_value_t = 3)]
    max_results: usize,
    /// Characters kept from each extracted source.
    #[arg(long, env = "DILIGENIX_SOURCE_CHARS", default_value_t = 2000)]
    source_chars: usize,
    /// Characters of research context given to each section.
    #[arg(long, env = "DILIGENIX_CONTEXT_CHARS", default_value_t = 10_000)]
    context_chars: usize,
    /// Timeout for each source page fetch (ms).
    #[arg(long, env = "DILIGENIX_FETCH_TIMEOUT_MS", default_value_t = 15_000)]
    timeout_ms: u64,
    /// Timeout for each model request (ms).
    #[arg(long, env = "DILIGENIX_LLM_TIMEOUT_MS", default_value_t = diligenix_local::DEFAULT_LLM_TIMEOUT_MS)]
    llm_timeout_ms: u64,
    /// Output directory (default: .generated/diligenix-<epoch>)
    #[arg(long, env = "DILIGENIX_OUT_DIR")]
    out_dir: Option<PathBuf>,
    /// Event rendering on stdout: text|jsonl
    #[arg(long = "output", alias = "format", default_value = "text")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

/// Opt-in KEY=VALUE loader (`DILIGENIX_ENV_FILE`). Never overrides the process env
/// and never logs values.
fn load_env_file() {
    let Some(path) = std::env::var("DILIGENIX_ENV_FILE")
        .ok()
        .filter(|p| !p.trim().is_empty())
    else {
        return;
    };
    let Ok(txt) = std::fs::read_to_string(path.trim()) else {
        return;
    };
    for line in txt.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if !k.is_empty() && std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

fn now_epoch_s() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn has_env(k: &str) -> bool {
    std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
}

fn build_llm(args: &RunCmd, client: reqwest::Client) -> Result<Arc<dyn LanguageModel>> {
    let llm: Arc<dyn LanguageModel> = match args.llm.trim().to_ascii_lowercase().as_str() {
        "ollama" => Arc::new(
            OllamaClient::from_env(client, args.model.clone())?
                .with_timeout_ms(args.llm_timeout_ms),
        ),
        "openai-compat" | "openai_compat" => Arc::new(
            OpenAiCompatClient::from_env(client, args.model.clone())?
                .with_timeout_ms(args.llm_timeout_ms),
        ),
        other => bail!("unknown --llm {other:?} (allowed: ollama, openai-compat)"),
    };
    Ok(llm)
}

fn render_event_text(ev: &RunEvent) -> String {
    match ev {
        RunEvent::PhaseChanged { phase } => format!("[phase] {}", phase.as_str()),
        RunEvent::QueryPlanned { queries } => format!("[plan] {} queries", queries.len()),
        RunEvent::QueryDiscovered { query } => format!("[query] {query}"),
        RunEvent::SourceDiscovered { url, .. } => format!("[source] {url}"),
        RunEvent::VectorSummarized { query, summary } => {
            format!("[summary] {query} ({} chars)", summary.chars().count())
        }
        RunEvent::SectionProduced { title, content } => format!(
            "[section] {title} ({} words)",
            content.split_whitespace().count()
        ),
        RunEvent::ProgressUpdated { progress } => format!("[progress] {progress}%"),
        RunEvent::RunFailed { message, kind } => format!("[failed] {kind:?}: {message}"),
        RunEvent::RunCancelled => "[cancelled]".to_string(),
        RunEvent::RunFinished => "[finished]".to_string(),
    }
}

fn write_artifacts(dir: &Path, state: &RunState) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let report = dir.join("report.md");
    let snapshot = dir.join("run.json");
    std::fs::write(&report, render_markdown(state))
        .with_context(|| format!("write {}", report.display()))?;
    std::fs::write(&snapshot, serde_json::to_string_pretty(state)?)
        .with_context(|| format!("write {}", snapshot.display()))?;
    Ok((report, snapshot))
}

async fn run_cmd(args: RunCmd) -> Result<ExitCode> {
    let jsonl = match args.output.to_ascii_lowercase().as_str() {
        "text" => false,
        "jsonl" | "json" => true,
        other => bail!("unknown --output {other:?} (allowed: text, jsonl)"),
    };
    let config = PipelineConfig::default()
        .query_count(args.queries)
        .max_results_per_query(args.max_results)
        .source_char_limit(args.source_chars)
        .context_char_limit(args.context_chars);

    let client = diligenix_local::http_client()?;
    let llm = build_llm(&args, client.clone())?;
    let search = diligenix_local::provider_from_env(client.clone(), &args.search)?;
    let extractor: Arc<dyn TextExtractor> =
        Arc::new(ReadableTextExtractor::new(client).with_timeout_ms(args.timeout_ms));
    let agent = Agent::new(llm, search.clone(), extractor).with_config(config)?;

    tracing::info!(
        subject = %args.target,
        llm = %args.llm,
        search = search.name(),
        "starting run"
    );
    let mut handle = agent.spawn(args.target.clone());
    let cancel = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling");
            cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    while let Some(ev) = handle.next_event().await {
        let line = if jsonl {
            serde_json::to_string(&ev)?
        } else {
            render_event_text(&ev)
        };
        writeln!(stdout, "{line}")?;
        stdout.flush()?;
    }

    let state = handle.wait().await?;
    let out_dir = args
        .out_dir
        .unwrap_or_else(|| PathBuf::from(format!(".generated/diligenix-{}", now_epoch_s())));
    let (report, snapshot) = write_artifacts(&out_dir, &state)?;
    tracing::info!(
        phase = state.phase().as_str(),
        report = %report.display(),
        snapshot = %snapshot.display(),
        "artifacts written"
    );
    if !jsonl {
        println!("[report] {}", report.display());
    }

    Ok(match state.phase() {
        RunPhase::Completed => ExitCode::SUCCESS,
        RunPhase::Cancelled => ExitCode::from(130),
        _ => ExitCode::from(1),
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    load_env_file();
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Run(args) => return run_cmd(args).await,
        Commands::Sections => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "sections",
                "sections": default_section_catalog(),
            });
            println!("{v}");
        }
        Commands::Doctor => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": true,
                "name": "diligenix",
                "version": env!("CARGO_PKG_VERSION"),
                "configured": {
                    "llm": {
                        "ollama_base_url": has_env("DILIGENIX_OLLAMA_BASE_URL"),
                        "ollama_api_key": has_env("DILIGENIX_OLLAMA_API_KEY"),
                        "openai_compat": diligenix_local::openai_compat::openai_compat_configured(),
                    },
                    "search": diligenix_local::search::configured_providers(),
                    "env_file": has_env("DILIGENIX_ENV_FILE"),
                },
                "defaults": PipelineConfig::default(),
            });
            println!("{v}");
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "diligenix",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("diligenix {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
