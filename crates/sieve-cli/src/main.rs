//! CLI binary for compiling and running sieve check scripts.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use sieve_engine::{
    BrowserDriver, Environment, FileCheckpointStore, Interpreter, OutputSink, ProxyPool,
    ProxyScheme, ReqwestTransport, Scheduler, SchedulerConfig, SchedulerEvent, SchedulerMetrics,
    SchedulerState, UserAgents,
};
use sieve_script::ScriptProgram;
use sieve_types::{BotStatus, RunSettings};
use tokio::sync::mpsc;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "sieve", version, about = "Run check scripts over large wordlists")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script over every record of a wordlist
    Run {
        /// Path to the check script
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the wordlist, one record per line
        #[arg(short, long)]
        wordlist: PathBuf,

        /// Proxy list, one `host:port[:user:pass]` per line
        #[arg(short, long)]
        proxies: Option<PathBuf>,

        /// Scheme of every proxy in the list
        #[arg(long, default_value = "http")]
        proxy_type: ProxyScheme,

        /// Records to skip. Negative resumes from the saved checkpoint.
        #[arg(short, long, default_value = "-1", allow_negative_numbers = true)]
        skip: i64,

        /// Initial number of concurrent workers
        #[arg(short, long, default_value = "1")]
        bots: usize,

        /// Upper bound for the worker count
        #[arg(long, default_value = "200")]
        max_bots: usize,

        /// Run settings file, created with defaults when missing
        #[arg(long, default_value = "settings.json")]
        settings: PathBuf,
    },

    /// Compile a script and list its steps
    Check {
        /// Path to the check script
        script: PathBuf,
    },

    /// Show the settings block of a script
    Info {
        /// Path to the check script
        script: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Run {
            config,
            wordlist,
            proxies,
            proxy_type,
            skip,
            bots,
            max_bots,
            settings,
        } => {
            let options = RunOptions {
                script: config,
                wordlist,
                proxies,
                proxy_type,
                skip: usize::try_from(skip).ok(),
                bots,
                max_bots,
                settings,
                verbose: cli.verbose,
            };
            cmd_run(options).await?;
        }
        Commands::Check { script } => {
            cmd_check(&script)?;
        }
        Commands::Info { script } => {
            cmd_info(&script)?;
        }
    }

    Ok(())
}

fn load_script(path: &Path) -> anyhow::Result<ScriptProgram> {
    let source = std::fs::read_to_string(path)?;
    let mut program = sieve_script::compile(&source)?;
    if program.settings.name.trim().is_empty() {
        program.settings.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".into());
    }
    Ok(program)
}

fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let program = load_script(path)?;
    println!("Script '{}' compiled: {} steps", program.settings.name, program.steps.len());
    for step in &program.steps {
        let label = step.label.as_deref().unwrap_or("");
        println!("  {:>4}  {:<14} {}", step.line, step.operation.kind(), label);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let program = load_script(path)?;
    let settings = &program.settings;

    println!("Name: {}", settings.name);
    if !settings.additional_info.is_empty() {
        println!("Info: {}", settings.additional_info);
    }
    println!("Steps: {}", program.steps.len());

    if !settings.custom_inputs.is_empty() {
        println!("\nCustom inputs:");
        for input in &settings.custom_inputs {
            println!("  {}: {}", input.name, input.description);
        }
    }
    if !settings.input_rules.is_empty() {
        println!("\nInput rules:");
        for rule in &settings.input_rules {
            println!("  {} ~ /{}/", rule.field.as_str(), rule.regex);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

struct RunOptions {
    script: PathBuf,
    wordlist: PathBuf,
    proxies: Option<PathBuf>,
    proxy_type: ProxyScheme,
    skip: Option<usize>,
    bots: usize,
    max_bots: usize,
    settings: PathBuf,
    verbose: bool,
}

async fn cmd_run(options: RunOptions) -> anyhow::Result<()> {
    let settings = RunSettings::load_or_init(&options.settings)?;
    let mut program = load_script(&options.script)?;
    prompt_custom_inputs(&mut program)?;

    let records = sieve_engine::input::load_records(&options.wordlist).await?;
    let loaded = records.len();
    let records = sieve_engine::input::apply_rules(records, &program.settings.input_rules)?;
    println!("Loaded {} records ({} after input rules)", loaded, records.len());

    let pool = match &options.proxies {
        Some(path) => {
            let text = tokio::fs::read_to_string(path).await?;
            ProxyPool::parse_list(&text, options.proxy_type)?
        }
        None => ProxyPool::direct(),
    };
    if pool.has_proxies() {
        println!("Loaded {} {} proxies", pool.len(), options.proxy_type.as_str());
    }

    let user_agents = UserAgents::load(Path::new(&settings.user_agents_directory)).await?;
    let transport = ReqwestTransport::new(Duration::from_millis(settings.request_timeout_ms))?;
    let script_name = program.settings.name.clone();
    let settings = Arc::new(settings);
    let env = Environment {
        transport: Arc::new(transport),
        browser: browser_driver(),
        settings: Arc::clone(&settings),
        user_agents: Arc::new(user_agents),
    };
    let interpreter = Interpreter::new(Arc::new(program), env).with_verbose(options.verbose);

    let config = SchedulerConfig {
        skip: options.skip,
        parallelism: options.bots,
        max_parallelism: options.max_bots,
        checkpoint_interval: Duration::from_millis(settings.checkpoint_interval_ms),
        proxy_health_interval: Duration::from_millis(settings.proxy_health_interval_ms),
        ..SchedulerConfig::new(script_name.clone(), options.wordlist.display().to_string())
    };
    let scheduler = Scheduler::new(
        config,
        Arc::new(interpreter),
        records,
        Arc::new(pool),
        Arc::new(OutputSink::new(&settings.output_directory, &settings.output_separator)),
        Arc::new(FileCheckpointStore::new(&settings.checkpoint_path)),
    )
    .await?;

    println!("Running '{}' from record {}", script_name, scheduler.skip());
    println!("Controls: p pause, r resume, s stop, a abort, +N / -N workers");

    tokio::spawn(print_hits(scheduler.subscribe()));
    tokio::spawn(handle_controls(scheduler.clone(), spawn_stdin_reader()));
    scheduler.start();

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    let wait = scheduler.wait();
    tokio::pin!(wait);
    let summary = loop {
        tokio::select! {
            summary = &mut wait => break summary,
            _ = ticker.tick() => println!("{}", stats_line(&scheduler.metrics())),
        }
    };

    println!("{}", stats_line(&scheduler.metrics()));
    match summary.state {
        SchedulerState::Aborted => println!("\nRun aborted after {} records", summary.stats.checked),
        _ => println!("\nRun completed: {} records checked", summary.stats.checked),
    }
    println!("Results: {}", Path::new(&settings.output_directory).join(&script_name).display());
    Ok(())
}

#[cfg(feature = "chromium")]
fn browser_driver() -> Arc<dyn BrowserDriver> {
    Arc::new(sieve_engine::chromium::ChromiumDriver)
}

#[cfg(not(feature = "chromium"))]
fn browser_driver() -> Arc<dyn BrowserDriver> {
    Arc::new(sieve_engine::UnavailableDriver)
}

fn prompt_custom_inputs(program: &mut ScriptProgram) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    for input in &mut program.settings.custom_inputs {
        if !input.value.is_empty() {
            continue;
        }
        print!("{}: ", input.description);
        std::io::stdout().flush()?;
        let mut line = String::new();
        stdin.lock().read_line(&mut line)?;
        input.value = line.trim_end_matches(['\r', '\n']).to_string();
    }
    Ok(())
}

/// Forward stdin lines from a plain thread, so a pending read never keeps
/// the runtime alive at shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn handle_controls(scheduler: Scheduler, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let command = line.trim();
        match command {
            "p" => scheduler.pause(),
            "r" => scheduler.resume(),
            "s" => scheduler.stop(),
            "a" => scheduler.abort(),
            "" => {}
            _ => match parse_resize(command, scheduler.parallelism()) {
                Some(target) => {
                    let applied = scheduler.change_degree_of_parallelism(target);
                    println!("Workers: {}", applied);
                }
                None => println!("Unknown command '{}'", command),
            },
        }
    }
}

/// `+`, `-`, `+N` or `-N` relative to `current`.
fn parse_resize(command: &str, current: usize) -> Option<usize> {
    let (grow, amount) = if let Some(rest) = command.strip_prefix('+') {
        (true, rest)
    } else {
        (false, command.strip_prefix('-')?)
    };
    let amount: usize = if amount.is_empty() { 1 } else { amount.trim().parse().ok()? };
    Some(if grow {
        current.saturating_add(amount)
    } else {
        current.saturating_sub(amount)
    })
}

async fn print_hits(mut events: tokio::sync::broadcast::Receiver<SchedulerEvent>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match events.recv().await {
            Ok(SchedulerEvent::RecordCompleted { status, line, .. }) => {
                if matches!(status, BotStatus::Success | BotStatus::Custom(_)) {
                    println!("[{}] {}", status.as_str().to_uppercase(), line);
                }
            }
            Ok(SchedulerEvent::Completed { .. } | SchedulerEvent::Aborted { .. }) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Hit printer lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn stats_line(metrics: &SchedulerMetrics) -> String {
    let s = &metrics.stats;
    let secs = metrics.elapsed.as_secs();
    format!(
        "{:.0}% Success: {} Custom: {} Failure: {} ToCheck: {} Retry: {} Ban: {} Error: {} Bots: {} CPM: {} | {:02}:{:02}:{:02}",
        metrics.progress,
        s.success,
        s.custom,
        s.failure,
        s.to_check,
        s.retry,
        s.ban,
        s.error,
        metrics.parallelism,
        metrics.cpm,
        secs / 3600,
        secs / 60 % 60,
        secs % 60,
    )
}
