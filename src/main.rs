use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};

use xpipeline::{
    DslFormat, ExecutionContext, PipelineRuntime, RunStatus, ValidationReport, XPipelineConfig,
};

#[derive(Parser, Debug)]
#[command(name = "xpipeline", version, about = "Compile and run declarative pipelines")]
struct Cli {
    /// TOML config file
    #[arg(long, short, global = true, env = "XPIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Source format; inferred from the file extension when omitted
    #[arg(long, short, global = true, value_enum)]
    format: Option<FormatArg>,

    /// Write the JSON result here instead of stdout
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report every diagnostic for a pipeline
    Validate { file: PathBuf },
    /// Compile a pipeline to its JSON IR
    Compile { file: PathBuf },
    /// Compile and execute a pipeline
    Run {
        file: PathBuf,
        /// Explicit run id (a UUID is generated otherwise)
        #[arg(long)]
        run_id: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Yaml,
    Json,
    Toml,
}

impl From<FormatArg> for DslFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Yaml => DslFormat::Yaml,
            FormatArg::Json => DslFormat::Json,
            FormatArg::Toml => DslFormat::Toml,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => XPipelineConfig::load(path)?,
        None => XPipelineConfig::default(),
    };
    let runtime = PipelineRuntime::from_config(config)?;

    match &cli.command {
        Command::Validate { file } => {
            let (source, format) = read_source(file, cli.format)?;
            let report = runtime.compiler().validate(&source, format);
            emit(cli.output.as_deref(), &serde_json::to_string_pretty(&report)?)?;
            if !report.is_valid {
                print_diagnostics(&report);
                std::process::exit(1);
            }
        }
        Command::Compile { file } => {
            let (source, format) = read_source(file, cli.format)?;
            match runtime.compiler().compile(&source, format) {
                Ok(plan) => emit(cli.output.as_deref(), &plan.to_json_pretty()?)?,
                Err(failure) => {
                    print_diagnostics(&failure.report);
                    bail!(failure);
                }
            }
        }
        Command::Run { file, run_id } => {
            let (source, format) = read_source(file, cli.format)?;
            let plan = match runtime.compiler().compile(&source, format) {
                Ok(plan) => Arc::new(plan),
                Err(failure) => {
                    print_diagnostics(&failure.report);
                    bail!(failure);
                }
            };
            let mut context = ExecutionContext::new(plan.id.clone());
            if let Some(run_id) = run_id {
                context = context.with_run_id(run_id.clone());
            }
            let cancel = context.cancellation_token().clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling run");
                    cancel.cancel();
                }
            });

            let result = runtime.run(plan, context, None).await?;
            emit(cli.output.as_deref(), &serde_json::to_string_pretty(&result)?)?;
            match result.status {
                RunStatus::Completed => {}
                RunStatus::Cancelled => std::process::exit(130),
                _ => std::process::exit(1),
            }
        }
    }
    Ok(())
}

fn read_source(path: &Path, format: Option<FormatArg>) -> anyhow::Result<(String, DslFormat)> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read pipeline file {}", path.display()))?;
    let format = match format {
        Some(format) => format.into(),
        None => DslFormat::from_extension(
            path.extension().and_then(|e| e.to_str()).unwrap_or_default(),
        ),
    };
    Ok((source, format))
}

fn print_diagnostics(report: &ValidationReport) {
    for diagnostic in report.errors().into_iter().chain(report.warnings()) {
        eprintln!("{}", diagnostic);
    }
}

fn emit(output: Option<&Path>, content: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => std::fs::write(path, content)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => println!("{}", content),
    }
    Ok(())
}
