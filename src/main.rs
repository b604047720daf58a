use anyhow::{Context, bail};
use certbridge::config;
use certbridge::{AcmeCertificateSigner, AcmeEnvironment, CRATE_NAME};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const ENV_FILTER_NAME: &str = "CERTBRIDGE_LOG";

#[derive(Debug, Parser)]
#[command(version, about = "Bridge virtual host CSRs to an ACME certificate authority")]
struct CommandLineArguments {
    /// Path to the configuration file
    #[arg(short, long, env = "CERTBRIDGE_CONFIG")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
    /// Shorthand option to enable debug logging (logging can be fine-tuned via the `CERTBRIDGE_LOG` environment variable)
    #[clap(long, short, action)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Request a signed certificate chain for a CSR
    Sign(SignCommand),
}

#[derive(Debug, Args)]
struct SignCommand {
    /// Path to the PEM-encoded certificate signing request
    csr: PathBuf,
    /// Extra domain name to use as the certificate's common name and first SAN
    #[arg(long)]
    alias: Option<String>,
    /// Write the issued chain to this file instead of standard output
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Override the configured ACME service with a well-known environment
    #[arg(long, value_enum)]
    environment: Option<AcmeEnvironment>,
}

async fn sign(mut config: config::Configuration, cmd: SignCommand) -> anyhow::Result<()> {
    if let Some(environment) = cmd.environment {
        tracing::info!("Using the {environment} ACME environment");
        config.acme_directory = environment.directory_url();
    }
    let csr_pem = tokio::fs::read_to_string(&cmd.csr)
        .await
        .with_context(|| format!("Reading CSR file {} failed", cmd.csr.display()))?;
    let signer = AcmeCertificateSigner::new(config);
    match signer.sign(&csr_pem, cmd.alias.as_deref()).await? {
        Some(chain) => match &cmd.output {
            Some(path) => tokio::fs::write(path, chain)
                .await
                .with_context(|| format!("Writing chain to {} failed", path.display())),
            None => {
                print!("{chain}");
                Ok(())
            }
        },
        None => bail!("no certificate was issued (see the log for the reason)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CommandLineArguments::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME).unwrap_or_else(|_| {
        EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose {
                "certbridge=debug,info"
            } else {
                "info"
            })
        })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::debug!("{CRATE_NAME} starting");
    let config = config::load(&cli.config).context("Loading configuration failed")?;
    match cli.command {
        Command::Sign(sign_cmd) => sign(config, sign_cmd).await,
    }
}
