//! CLI binary for market-digest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, wires the production collaborators, and prints results.

use anyhow::{Context, Result};
use chrono::{Local, NaiveTime, TimeZone};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use market_digest::config::parse_language_list;
use market_digest::{
    Collaborators, Credentials, DigestError, DocumentRenderer, PipelineConfig, PipelineController,
    PipelineProgressCallback, ProgressCallback, RunReport, TempFileRegistry,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live stage bar with one log line per finished stage.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos}/{len} stages  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Digest");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, stage: &str) -> String {
        let secs = self
            .start_times
            .lock()
            .remove(stage)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_stages: usize) {
        self.bar.set_length(total_stages as u64);
        self.bar.set_position(0);
        self.bar.reset_eta();
    }

    fn on_stage_start(&self, stage: &str, _index: usize, _total: usize) {
        self.start_times.lock().insert(stage.to_string(), Instant::now());
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_retry(&self, stage: &str, attempt: u32, error: &str) {
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!(
            "  {} {:<14} attempt {}  {}",
            yellow("↻"),
            stage,
            attempt,
            dim(&msg)
        ));
    }

    fn on_stage_complete(&self, stage: &str, output_len: usize) {
        let elapsed = self.elapsed(stage);
        self.bar.println(format!(
            "  {} {:<14} {}  {}",
            green("✓"),
            stage,
            dim(&format!("{output_len:>5} chars")),
            elapsed
        ));
        self.bar.inc(1);
    }

    fn on_stage_error(&self, stage: &str, error: &str) {
        let elapsed = self.elapsed(stage);
        let msg: String = error.chars().take(80).collect();
        self.bar.println(format!("  {} {:<14} {}  {}", red("✗"), stage, red(&msg), elapsed));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _succeeded: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One run with the default languages (en + hi, ar, he)
  market-digest

  # Only Hindi and Arabic, 10 s between model calls
  market-digest --languages hi,ar --delay-ms 10000

  # Every day at 08:30 local time
  market-digest schedule --at 08:30

  # Validate credentials and provider without running
  market-digest check

  # Machine-readable run report
  market-digest --json > report.json

ENVIRONMENT VARIABLES:
  TAVILY_API_KEY          Search API key (required)
  TELEGRAM_BOT_TOKEN      Bot token used for delivery (required)
  TELEGRAM_CHAT_ID        Target chat or @channel (required)
  GROQ_API_KEY            Groq API key
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (groq, openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter (overrides --verbose/--quiet)

FONTS:
  Hindi, Arabic and Hebrew sections use Noto Sans Devanagari / Arabic /
  Hebrew from --font-dir or the system. Missing fonts fall back to
  Helvetica with a warning.

EXIT CODES:
  0  success
  1  a pipeline stage or the document failed
  2  missing or invalid configuration
"#;

/// Daily multi-language US market summary: report, chat delivery, and PDF.
#[derive(Parser, Debug)]
#[command(
    name = "market-digest",
    version,
    about = "Daily multi-language US market summary with PDF report and chat delivery",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Translation targets, comma-separated, in document order.
    #[arg(long, env = "DIGEST_LANGUAGES", default_value = "hi,ar,he", global = true)]
    languages: String,

    /// Language the summary is written in.
    #[arg(long, env = "DIGEST_PRIMARY_LANGUAGE", default_value = "en", global = true)]
    primary_language: String,

    /// Minimum delay between model calls, in milliseconds.
    #[arg(long, env = "DIGEST_DELAY_MS", default_value_t = 25_000, global = true)]
    delay_ms: u64,

    /// Retries per stage after the first attempt.
    #[arg(long, env = "DIGEST_MAX_RETRIES", default_value_t = 2, global = true)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds (doubles per retry).
    #[arg(long, env = "DIGEST_RETRY_BACKOFF_MS", default_value_t = 2_000, global = true)]
    retry_backoff_ms: u64,

    /// Per-attempt stage timeout in seconds; 0 disables it.
    #[arg(long, env = "DIGEST_STAGE_TIMEOUT", default_value_t = 120, global = true)]
    stage_timeout: u64,

    /// Translations allowed in flight at once.
    #[arg(long, env = "DIGEST_TRANSLATION_CONCURRENCY", default_value_t = 1, global = true)]
    translation_concurrency: usize,

    /// Word ceiling for the summary (50–500).
    #[arg(long, env = "DIGEST_MAX_WORDS", default_value_t = 250, global = true,
          value_parser = clap::value_parser!(u64).range(50..=500))]
    max_words: u64,

    /// Ticker symbols for the market snapshot, comma-separated; empty disables it.
    #[arg(long, env = "DIGEST_SYMBOLS", default_value = "^GSPC,^IXIC,^DJI", global = true)]
    symbols: String,

    /// History range for the snapshot (1d, 5d, 1mo, ...).
    #[arg(long, env = "DIGEST_PERIOD", default_value = "5d", global = true)]
    period: String,

    /// Directory receiving market_summary_<date>.pdf.
    #[arg(short, long, env = "DIGEST_OUTPUT_DIR", default_value = "outputs", global = true)]
    output_dir: PathBuf,

    /// Directory scanned for script fonts.
    #[arg(long, env = "DIGEST_FONT_DIR", default_value = "fonts", global = true)]
    font_dir: PathBuf,

    /// Directory for downloaded images and charts.
    #[arg(long, env = "DIGEST_SCRATCH_DIR", global = true)]
    scratch_dir: Option<PathBuf>,

    /// Ignore system-installed fonts.
    #[arg(long, global = true)]
    no_system_fonts: bool,

    /// LLM model ID.
    #[arg(long, env = "EDGEQUAKE_MODEL", global = true)]
    model: Option<String>,

    /// LLM provider: groq, openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER", global = true)]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "DIGEST_TEMPERATURE", default_value_t = 0.2, global = true)]
    temperature: f32,

    /// Max LLM output tokens per stage.
    #[arg(long, env = "DIGEST_MAX_TOKENS", default_value_t = 2048, global = true)]
    max_tokens: usize,

    /// Cover page title.
    #[arg(long, env = "DIGEST_TITLE", default_value = "Daily Market Summary", global = true)]
    title: String,

    /// Print the run report as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "DIGEST_NO_PROGRESS", global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DIGEST_VERBOSE", global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DIGEST_QUIET", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Run the pipeline once (default).
    Once,
    /// Run every day at a fixed local time until interrupted.
    Schedule {
        /// Local time of day, HH:MM.
        #[arg(long, default_value = "08:00")]
        at: String,
    },
    /// Validate configuration and credentials, then exit.
    Check,
}

fn main() -> ExitCode {
    // .env is optional; real environment variables win.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start runtime: {e}", red("error:"));
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(dispatch(&cli, show_progress)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            exit_code(&e)
        }
    }
}

/// 2 for configuration problems, 1 for everything else.
fn exit_code(e: &anyhow::Error) -> ExitCode {
    match e.downcast_ref::<DigestError>() {
        Some(d) if d.is_configuration() => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

async fn dispatch(cli: &Cli, show_progress: bool) -> Result<()> {
    match cli.command.clone().unwrap_or(Command::Once) {
        Command::Once => {
            let report = run_once(cli, show_progress).await?;
            print_report(cli, &report)
        }
        Command::Schedule { at } => schedule(cli, &at, show_progress).await,
        Command::Check => check(cli),
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig, DigestError> {
    let mut builder = PipelineConfig::builder()
        .primary_language(cli.primary_language.clone())
        .translation_languages(parse_language_list(&cli.languages))
        .inter_call_delay_ms(cli.delay_ms)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .stage_timeout_secs((cli.stage_timeout > 0).then_some(cli.stage_timeout))
        .translation_concurrency(cli.translation_concurrency)
        .max_summary_words(cli.max_words as usize)
        .market_symbols(cli.symbols.split(',').map(str::to_string))
        .market_period(cli.period.clone())
        .output_dir(cli.output_dir.clone())
        .font_dir(cli.font_dir.clone())
        .load_system_fonts(!cli.no_system_fonts)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .report_title(cli.title.clone());

    if let Some(dir) = &cli.scratch_dir {
        builder = builder.scratch_dir(dir.clone());
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build()
}

/// One complete run with fresh components.
async fn run_once(cli: &Cli, show_progress: bool) -> Result<RunReport> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress)?;
    let credentials = Credentials::from_env()?;

    let scratch = Arc::new(TempFileRegistry::new(config.scratch_dir.clone()));
    let collaborators = Collaborators::from_credentials(&config, &credentials, Arc::clone(&scratch))?;
    let mut renderer = DocumentRenderer::new(&config, Arc::clone(&scratch))?;
    let mut controller = PipelineController::new(config, collaborators, scratch);

    let report = controller
        .run(&mut renderer)
        .await
        .context("Daily pipeline failed")?;
    Ok(report)
}

fn print_report(cli: &Cli, report: &RunReport) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(report).context("Failed to serialise run report")?;
        println!("{json}");
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    eprintln!(
        "{}  {} language(s)  {} page(s)  →  {}",
        if report.delivery.all_delivered() {
            green("✔")
        } else {
            yellow("⚠")
        },
        report.languages.len(),
        report.pages,
        bold(&report.document_path.display().to_string()),
    );
    eprintln!("   {}", dim(&report.delivery.summary()));
    for issue in &report.render_issues {
        eprintln!("   {} {}", yellow("⚠"), issue);
    }
    Ok(())
}

/// Run at `at` every day. Stops on Ctrl-C, only ever between runs.
async fn schedule(cli: &Cli, at: &str, show_progress: bool) -> Result<()> {
    let time = NaiveTime::parse_from_str(at, "%H:%M")
        .map_err(|e| DigestError::InvalidConfig(format!("--at '{at}' is not HH:MM: {e}")))?;
    // Fail fast on configuration before the first wait.
    build_config(cli, None)?;
    Credentials::from_env()?;

    loop {
        let wait = until_next(time);
        info!("Next run at {} (in {}s)", at, wait.as_secs());
        if !cli.quiet {
            eprintln!("{} next run at {} ({}s)", dim("⏲"), bold(at), wait.as_secs());
        }
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping scheduler");
                return Ok(());
            }
        }

        match run_once(cli, show_progress).await {
            Ok(report) => print_report(cli, &report)?,
            Err(e) => {
                error!("Scheduled run failed: {:#}", e);
                if !cli.quiet {
                    eprintln!("{} {:#}", red("error:"), e);
                }
            }
        }
    }
}

/// Time until the next local occurrence of `time`.
fn until_next(time: NaiveTime) -> Duration {
    let now = Local::now();
    let mut target = now.date_naive().and_time(time);
    if target <= now.naive_local() {
        target += chrono::Duration::days(1);
    }
    match Local.from_local_datetime(&target).earliest() {
        Some(t) => (t - now).to_std().unwrap_or(Duration::from_secs(60)),
        None => {
            // Skipped by a DST change; try again in an hour.
            warn!("{} does not exist today in local time", target);
            Duration::from_secs(3600)
        }
    }
}

fn check(cli: &Cli) -> Result<()> {
    let config = build_config(cli, None)?;
    Credentials::from_env()?;
    let (_, provider) = market_digest::providers::llm::resolve_provider(&config)?;

    let scratch = Arc::new(TempFileRegistry::new(config.scratch_dir.clone()));
    let mut renderer = DocumentRenderer::new(&config, scratch)?;
    let missing = renderer.check_fonts(&config.languages());

    println!("Configuration OK");
    println!("  provider:   {provider}");
    println!("  languages:  {}", config.languages().join(", "));
    println!("  delay:      {} ms between model calls", config.inter_call_delay_ms);
    println!("  output:     {}", config.output_dir.display());
    for issue in missing {
        println!("  {} {}", yellow("⚠"), issue);
    }
    Ok(())
}
