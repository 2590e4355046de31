//! Patron merge job binary.
//!
//! Loads configuration, initializes tracing, and runs one staging to main merge on a
//! current-thread runtime. The handler response is printed to stdout as JSON.

use std::process::ExitCode;
use std::sync::Once;

use clap::Parser;
use patron_merge_config::Environment;
use patron_merge_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_job_config;
use crate::core::run_job_with_config;
use crate::error::{JobError, JobResult};

mod config;
mod core;
mod error;

static INIT_CRYPTO: Once = Once::new();

/// Runs one merge of the staging table into the main table.
#[derive(Debug, Parser)]
#[command(name = "patron-merge-job", version)]
struct Args {
    /// Trigger event passed to the handler, as JSON.
    #[arg(long, default_value = "{}")]
    event: String,
}

/// Installs aws-lc-rs as the rustls crypto provider.
///
/// The AWS SDK and the warehouse TLS connector both pull in rustls, and feature unification
/// can leave more than one provider compiled in.
fn install_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        // Fails only if a provider is already installed.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    });
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(category = err.category(), "{err}");
            eprint!("{}", err.render_report());

            ExitCode::FAILURE
        }
    }
}

fn run() -> JobResult<()> {
    let args = Args::parse();
    let event: serde_json::Value = serde_json::from_str(&args.event).map_err(JobError::config)?;

    install_crypto_provider();

    let environment = Environment::load().map_err(JobError::config)?;
    let config = load_job_config()?;

    init_tracing(env!("CARGO_BIN_NAME"), environment).map_err(JobError::config)?;

    let response = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(run_job_with_config(config, event))?;

    let rendered = response.to_json()?;
    println!("{rendered}");

    Ok(())
}
