//! Music-video composer binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use muse_composer::{init_tracing, tracing_publisher, ComposerConfig, CompositionDriver};
use muse_models::CompositionRequest;
use muse_storage::{ArtifactStore, LocalStore, R2Client};

#[derive(Parser, Debug)]
#[command(name = "muse-composer", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compose a request file into an uploaded video.
    Compose(ComposeArgs),
    /// Print what FFprobe reports for a media file.
    Probe {
        /// Media file to inspect.
        file: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct ComposeArgs {
    /// CompositionRequest JSON.
    #[arg(long)]
    request: PathBuf,

    /// Drop failed clips and re-index the rest before composing.
    #[arg(long, default_value_t = false)]
    skip_failed: bool,

    /// Local output directory, used when R2 is not configured.
    #[arg(long, default_value = "compositions-out")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing();

    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr.parse().context("METRICS_ADDR is not a socket address")?;
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Serving metrics");
    }

    let cli = Cli::parse();
    match cli.cmd {
        Command::Compose(args) => cmd_compose(args).await,
        Command::Probe { file } => cmd_probe(file).await,
    }
}

async fn cmd_compose(args: ComposeArgs) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&args.request)
        .await
        .with_context(|| format!("reading {}", args.request.display()))?;
    let mut request: CompositionRequest =
        serde_json::from_str(&raw).context("parsing composition request")?;

    if args.skip_failed {
        let before = request.clips.len();
        request.clips = request.clips.successful_reindexed();
        if request.clips.len() < before {
            warn!(
                dropped = before - request.clips.len(),
                "Skipping unusable clips"
            );
        }
    }

    let config = ComposerConfig::from_env();
    info!(work_dir = %config.work_dir.display(), "Composer config loaded");

    let store = build_store(&args.output_dir).await?;
    let driver = CompositionDriver::new(config, store, tracing_publisher())?;

    let output = driver.compose(&request).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// R2 when it is configured, a local directory otherwise.
async fn build_store(output_dir: &std::path::Path) -> anyhow::Result<Arc<dyn ArtifactStore>> {
    if std::env::var("R2_ENDPOINT_URL").is_ok() {
        let client = R2Client::from_env()
            .await
            .context("Failed to create R2 client")?;
        info!(bucket = client.bucket(), "Uploading to R2");
        return Ok(Arc::new(client));
    }

    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;
    info!(dir = %output_dir.display(), "R2 not configured, writing locally");
    Ok(Arc::new(LocalStore::new(output_dir)))
}

async fn cmd_probe(file: PathBuf) -> anyhow::Result<()> {
    let info = muse_media::probe_media(&file)
        .await
        .with_context(|| format!("probing {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
