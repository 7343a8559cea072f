use std::path::PathBuf;

use anyhow::{bail, Context};
use xpipeline_guest::{GuestEnvironment, Harness};
use xpipeline_types::HARNESS_FAILURE_EXIT_CODE;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %format!("{:#}", err), "guest harness failed");
        std::process::exit(HARNESS_FAILURE_EXIT_CODE);
    }
}

fn run() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [input, output] = args.as_slice() else {
        bail!("usage: xpipeline-guest <input.json> <output.json>");
    };
    let (input, output) = (PathBuf::from(input), PathBuf::from(output));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start runtime")?;
    let harness = Harness::new(GuestEnvironment::from_env());
    let result = runtime.block_on(harness.run_files(&input, &output))?;
    tracing::info!(success = result.is_success(), "guest finished");
    Ok(())
}
