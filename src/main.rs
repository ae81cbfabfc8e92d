use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ui_runner::context::Context;
use ui_runner::diagnostics::{DiagnosticSink, FileSink, NullSink};
use ui_runner::driver::{Driver, MemoryDriver};
use ui_runner::errors::{ErrorCode, StructuredError};
use ui_runner::limits::ExecutionLimits;
use ui_runner::loader;
use ui_runner::orchestrator::Orchestrator;
use ui_runner::protocol::Suite;
use ui_runner::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use ui_runner::validation::validate_suite;

#[cfg(feature = "webdriver")]
use ui_runner::driver::WebDriverDriver;

#[derive(Parser)]
#[command(name = "ui-runner")]
#[command(about = "Runs UI workflow suites against a browser or an in-memory DOM", long_about = None)]
struct Cli {
    /// Only warnings and errors on stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Executes a suite
    Run(RunArgs),

    /// Validates a suite without running it
    Validate {
        /// Path to the suite file
        #[arg(short, long)]
        suite: PathBuf,

        /// Limits preset: default, strict or relaxed
        #[arg(long, default_value = "default")]
        limits: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to the suite file
    #[arg(short, long)]
    suite: PathBuf,

    /// Path to the output report file (stdout if omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Page snapshot for the in-memory driver
    #[arg(long, conflicts_with = "webdriver")]
    dom: Option<PathBuf>,

    /// WebDriver endpoint, e.g. http://localhost:9515
    #[arg(long)]
    webdriver: Option<String>,

    /// Show the browser window (WebDriver only)
    #[arg(long)]
    headed: bool,

    /// Overrides the suite base_url
    #[arg(long)]
    base_url: Option<String>,

    /// Directory for failure snapshots
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Extra context variable, repeatable
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    vars: Vec<(String, String)>,

    /// Limits preset: default, strict or relaxed
    #[arg(long, default_value = "default")]
    limits: String,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("esperado KEY=VALUE, recebido '{}'", s))?;
    if key.trim().is_empty() {
        return Err(format!("chave vazia em '{}'", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut telemetry = TelemetryConfig::from_env();
    if cli.quiet {
        telemetry = telemetry.quiet();
    }
    if let Err(e) = init_telemetry(telemetry) {
        eprintln!("⚠️  Falha ao inicializar telemetria: {:#}", e);
    }

    let outcome = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { suite, limits } => validate(&suite, &limits),
    };

    shutdown_telemetry();

    match outcome {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("❌ {}", StructuredError::from(&e).user_message());
            std::process::exit(2);
        }
    }
}

fn limits_preset(name: &str) -> anyhow::Result<ExecutionLimits> {
    ExecutionLimits::preset(name)
        .with_context(|| format!("preset de limites desconhecido: '{}'", name))
}

/// Loads and validates. Validation errors are printed, not returned.
fn load_valid_suite(path: &Path, limits: &ExecutionLimits) -> anyhow::Result<Option<Suite>> {
    let suite = loader::load_suite_from_file(path)?;

    if let Err(errors) = validate_suite(&suite, limits) {
        eprintln!("❌ Suíte inválida ({} erro(s)):", errors.len());
        for err in &errors {
            eprintln!("   [{}] {}", err.code(), err);
        }
        return Ok(None);
    }
    Ok(Some(suite))
}

fn validate(path: &Path, limits: &str) -> anyhow::Result<bool> {
    let limits = limits_preset(limits)?;
    let Some(suite) = load_valid_suite(path, &limits)? else {
        return Ok(false);
    };

    let steps: usize = suite.workflows.iter().map(|w| w.steps.len()).sum();
    eprintln!(
        "✅ Suíte '{}' válida: {} workflow(s), {} step(s)",
        suite.name,
        suite.workflows.len(),
        steps
    );
    Ok(true)
}

/// Driver backends selectable from the command line.
enum Backend {
    Memory(MemoryDriver),
    #[cfg(feature = "webdriver")]
    WebDriver(WebDriverDriver),
}

impl Backend {
    #[cfg_attr(not(feature = "webdriver"), allow(unused_variables))]
    async fn open(args: &RunArgs) -> anyhow::Result<Self> {
        if let Some(url) = &args.webdriver {
            #[cfg(feature = "webdriver")]
            {
                let driver = WebDriverDriver::connect(url, !args.headed)
                    .await
                    .with_context(|| format!("Failed to connect to WebDriver at {}", url))?;
                return Ok(Self::WebDriver(driver));
            }
            #[cfg(not(feature = "webdriver"))]
            bail!("--webdriver requer o binário compilado com a feature 'webdriver'");
        }

        match &args.dom {
            Some(path) => Ok(Self::Memory(MemoryDriver::new(loader::load_page_from_file(path)?))),
            None => bail!("informe --dom <page.json> ou --webdriver <url>"),
        }
    }

    fn driver(&self) -> &dyn Driver {
        match self {
            Self::Memory(driver) => driver,
            #[cfg(feature = "webdriver")]
            Self::WebDriver(driver) => driver,
        }
    }

    async fn close(self) {
        #[cfg(feature = "webdriver")]
        if let Self::WebDriver(driver) = self {
            if let Err(e) = driver.close().await {
                tracing::warn!(error = %e, "Falha ao encerrar sessão WebDriver");
            }
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<bool> {
    let limits = limits_preset(&args.limits)?;
    let Some(suite) = load_valid_suite(&args.suite, &limits)? else {
        return Ok(false);
    };
    eprintln!("📋 Suíte carregada: {}", suite.name);

    let mut context = Context::from_suite(&suite);
    for (key, value) in &args.vars {
        context.set(key.clone(), value.clone());
    }

    let sink: Arc<dyn DiagnosticSink> = match &args.artifacts {
        Some(dir) => Arc::new(FileSink::new(dir)),
        None => Arc::new(NullSink),
    };

    let backend = Backend::open(&args).await?;
    let base_url = args.base_url.clone().or_else(|| suite.base_url.clone());
    let orchestrator = Orchestrator::new(backend.driver(), limits)
        .with_base_url(base_url)
        .with_sink(sink);

    eprintln!("▶️  Executando {} workflow(s)...", suite.workflows.len());
    let report = orchestrator.run_suite(&suite, &context).await;
    drop(orchestrator);
    backend.close().await;

    for workflow in &report.workflows {
        match &workflow.failure {
            None => eprintln!("   ✅ {} ({}ms)", workflow.workflow, workflow.elapsed_ms),
            Some(failure) => eprintln!(
                "   ❌ {} [{}] step '{}': {}",
                workflow.workflow, failure.error_code, failure.step_id, failure.message
            ),
        }
    }
    eprintln!("🏁 Execução finalizada: {}", report.status);

    let json = serde_json::to_string_pretty(&report).map_err(|e| {
        StructuredError::new(
            ErrorCode::SERIALIZATION_ERROR,
            format!("Failed to serialize report: {}", e),
        )
    })?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write report {:?}", path))?;
            eprintln!("📄 Relatório salvo em: {:?}", path);
        }
        None => println!("{}", json),
    }

    Ok(report.status == "passed")
}
