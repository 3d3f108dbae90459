//! One-shot backfill: re-runs image embedding for posts that still have an
//! image reference but no vector (provider was down, queue was full, ...).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use lf_common::{
    EnrichmentConfig, EnrichmentMode, HttpEmbeddingProvider, LocalImageStore, PgPostStore,
    PostService, PostStore, ProviderConfig, RankingConfig,
    logging::{init_tracing_subscriber, install_tracing_panic_hook},
};
use tracing::{error, info};

#[derive(Debug, Clone, Parser)]
#[command(name = "lf-reembed", about = "Backfill missing image embeddings")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Directory uploaded images were written to
    #[arg(long, env = "LF_UPLOAD_DIR", default_value = "uploads")]
    upload_dir: PathBuf,

    /// Maximum posts to process in this run
    #[arg(long, env = "LF_REEMBED_LIMIT", default_value_t = 100)]
    limit: usize,

    /// Only list pending posts
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

async fn run(cli: Cli) -> Result<(), String> {
    let store = Arc::new(
        PgPostStore::connect(&cli.database_url)
            .await
            .map_err(|err| format!("store unavailable: {err}"))?,
    );

    if cli.dry_run {
        let pending = store
            .find_pending_enrichment(cli.limit)
            .await
            .map_err(|err| err.to_string())?;
        for post in &pending {
            info!(post_id = post.id, image_ref = ?post.image_url, "pending");
        }
        info!(count = pending.len(), "dry run finished");
        return Ok(());
    }

    let provider_config = ProviderConfig::from_env().map_err(|err| err.to_string())?;
    let provider = HttpEmbeddingProvider::new(provider_config).map_err(|err| err.to_string())?;
    let images = LocalImageStore::new(&cli.upload_dir).map_err(|err| err.to_string())?;
    let enrichment = EnrichmentConfig {
        mode: EnrichmentMode::Inline,
        ..EnrichmentConfig::from_env().map_err(|err| err.to_string())?
    };

    let service = PostService::new(
        store,
        Arc::new(provider),
        Arc::new(images),
        RankingConfig::default(),
        enrichment,
    );

    let summary = service
        .reembed_pending(cli.limit)
        .await
        .map_err(|err| err.to_string())?;
    info!(?summary, "backfill complete");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    init_tracing_subscriber(env!("CARGO_PKG_NAME"));
    install_tracing_panic_hook(env!("CARGO_PKG_NAME"));

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "lf-reembed failed");
            ExitCode::FAILURE
        }
    }
}
