//! Command-line driver for the indexer
//!
//! Two subcommands mirror the two halves of the pipeline: `index` fetches
//! overview headers into the per-group database, `nzb` queries the database
//! and writes NZB documents.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use usenet_index::{
    exit_codes, nzb, FetchOptions, Fetcher, HeaderStore, NntpPool, NzbOptions,
    PooledChunkSource, QueryFilter, Result, RetryConfig, Settings,
};

/// Index Usenet headers over NNTP and assemble NZB documents
#[derive(Parser)]
#[command(name = "usenet-index")]
#[command(version, about)]
struct Cli {
    /// Path to the INI configuration file
    #[arg(short, long, default_value = "config.ini", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch overview headers into the per-group database
    Index,
    /// Query the database and write NZB documents
    Nzb,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(exit_codes::CONFIG_ERROR);
        }
    };

    let result = match cli.command {
        Commands::Index => run_index(settings).await,
        Commands::Nzb => run_nzb(settings).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Fetch headers for the configured group and upsert them into its database
async fn run_index(settings: Settings) -> Result<u8> {
    let group = settings.fetch.group.clone();
    let db_path = HeaderStore::db_path_for(&settings.db.base_path, &group);
    let store = HeaderStore::open(&db_path).await?;

    let pool = NntpPool::with_retry_config(
        settings.server.clone(),
        settings.fetch.max_workers as u32,
        RetryConfig::default(),
    )
    .await?;
    let source = Arc::new(PooledChunkSource::new(pool));

    // Server bounds, then local bounds, then config overrides
    let server_info = source.group_info(&group).await?;
    let local = store.local_bounds(&group).await?;

    let low = settings
        .fetch
        .back_filled_up_to
        .or(local.map(|(low, _)| low))
        .unwrap_or(server_info.first)
        .max(server_info.first);
    let mut high = settings.fetch.start.unwrap_or(server_info.last);

    if settings.fetch.limit > 0 {
        high = high.min(low.saturating_add(settings.fetch.limit - 1));
    }
    if low > high {
        info!("Nothing to fetch: range {}-{} is empty", low, high);
        return Ok(exit_codes::SUCCESS);
    }

    info!(
        "Fetching {} articles {}-{} into {}",
        group,
        low,
        high,
        db_path.display()
    );

    let fetcher = Fetcher::new(FetchOptions {
        chunk_size: settings.fetch.chunk_size,
        max_workers: settings.fetch.max_workers,
        retry: RetryConfig::default(),
    });

    // Ctrl-C stops dispatching; in-flight chunks drain and commit
    let cancel = fetcher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let outcome = fetcher
        .fetch_into_store(source, &store, &group, low, high, |p| {
            info!(
                "Progress: {}/{} chunks, {} rows",
                p.chunks_done, p.chunks_total, p.rows_so_far
            );
        })
        .await?;

    info!(
        "Done: {} inserted, {} ignored, {} parse errors",
        outcome.inserted, outcome.ignored, outcome.tally.parse_errors
    );
    for chunk in &outcome.failed_chunks {
        warn!("Failed chunk: {}-{}", chunk.low, chunk.high);
    }

    store.close().await;
    Ok(outcome.exit_code())
}

/// Query the configured group's database and write NZB output
async fn run_nzb(settings: Settings) -> Result<u8> {
    let group = settings.fetch.group.clone();
    let db_path = HeaderStore::db_path_for(&settings.db.base_path, &group);
    let store = HeaderStore::open(&db_path).await?;

    let mut filter = QueryFilter::group(&group).date_range(
        settings.filters.date_from_unix()?,
        settings.filters.date_to_unix()?,
    );
    filter.subject_like = settings.filters.subject_like.clone();
    filter.not_subject = settings.filters.not_subject.clone();
    filter.from_like = settings.filters.from_like.clone();

    let rows = store.query(&filter).await?;
    if rows.is_empty() {
        info!("No rows matched for group {}", group);
        return Ok(exit_codes::SUCCESS);
    }
    info!("Found {} matching articles", rows.len());

    let options = NzbOptions {
        require_complete_sets: settings.nzb.require_complete_sets,
    };
    let output_dir = &settings.nzb.output_path;
    tokio::fs::create_dir_all(output_dir).await?;

    if settings.nzb.group_by_collection {
        let documents = nzb::build_grouped_nzbs(rows, &group, options);
        if documents.is_empty() {
            info!("All collections empty or incomplete; nothing written");
            return Ok(exit_codes::SUCCESS);
        }
        for (filename, xml) in &documents {
            let path = output_dir.join(filename);
            tokio::fs::write(&path, xml).await?;
            info!("Wrote {}", path.display());
        }
        info!("Wrote {} NZB documents", documents.len());
    } else {
        let files = nzb::assemble(rows, options);
        if files.is_empty() {
            info!("No complete files to emit");
            return Ok(exit_codes::SUCCESS);
        }
        let xml = nzb::build_nzb_xml(&files, &group);

        let stem = settings
            .filters
            .subject_like
            .as_deref()
            .map(|s| nzb::sanitize(&s.chars().take(30).collect::<String>()))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "output".to_string());
        let path = output_dir.join(format!("{stem}.nzb"));
        tokio::fs::write(&path, &xml).await?;
        info!("Wrote {} ({} files)", path.display(), files.len());
    }

    store.close().await;
    Ok(exit_codes::SUCCESS)
}
