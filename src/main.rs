use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context as _, Result};
use chrono::Utc;
use clap::Parser;
use sqlx::postgres::PgPool;
use tracing::{error, info, warn};

use hss_importer::importer::{do_import, Context, ImportError};
use hss_importer::source::load::load_snapshot;
use hss_importer::target::kind_summary;
use hss_importer::target::persist::{persist_objects, write_object_dump};
use hss_importer::target::view::TargetView;
use hss_importer::{logging, operational};

#[derive(Debug, Parser)]
#[command(name = "hss-importer", about = "Legacy member database importer", version)]
struct Cli {
    /// File holding the legacy database connection URI.
    #[arg(long, default_value = ".hss_uri")]
    source_uri_file: PathBuf,
    /// File holding the target database connection URI.
    #[arg(long, default_value = ".target_uri")]
    target_uri_file: PathBuf,
    /// Run the pipeline but write a jsonl dump instead of the database.
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Where the dry-run dump goes.
    #[arg(long, default_value = "objects.jsonl")]
    dump_file: PathBuf,
    /// Force a refresh of the legacy directory view (the default).
    #[arg(long, overrides_with = "no_refresh")]
    refresh: bool,
    /// Skip the directory view refresh unless it is stale.
    #[arg(long)]
    no_refresh: bool,
    /// Raise the log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let source_pool = connect(&cli.source_uri_file)
        .await
        .context("connect to the legacy database")?;

    let force_refresh = cli.refresh || !cli.no_refresh;
    if force_refresh || operational::view_is_stale(&source_pool, Utc::now()).await? {
        warn!(event = "directory_view_refreshing");
        info!("HINT: you can disable this with --no-refresh");
        operational::refresh_view(&source_pool).await?;
    } else {
        info!(event = "directory_refresh_skipped");
    }

    let snapshot = load_snapshot(&source_pool)
        .await
        .context("snapshot the legacy schema")?;
    source_pool.close().await;

    let target_pool = connect(&cli.target_uri_file)
        .await
        .context("connect to the target database")?;
    let view = TargetView::load(&target_pool)
        .await
        .context("load the target-side view")?;

    let ctx = Context::new(snapshot, view);
    let objects = match do_import(&ctx) {
        Ok(objects) => objects,
        Err(ImportError::Aborted { stage, errors }) => {
            // Row defects were already logged one by one.
            error!(event = "import_aborted", stage, errors);
            return Ok(1);
        }
        Err(err) => return Err(err).context("run the translation pipeline"),
    };

    if cli.dry_run {
        let written = write_object_dump(&cli.dump_file, &objects)
            .with_context(|| format!("write dump to {}", cli.dump_file.display()))?;
        info!(
            event = "dry_run_dump",
            objects = written,
            path = %cli.dump_file.display(),
        );
        return Ok(0);
    }

    let report = persist_objects(&target_pool, &objects)
        .await
        .context("persist the imported objects")?;
    info!(event = "persist_summary", summary = %kind_summary(&report.written));
    target_pool.close().await;
    Ok(0)
}

async fn connect(uri_file: &Path) -> Result<PgPool> {
    let uri = std::fs::read_to_string(uri_file)
        .with_context(|| format!("read connection uri from {}", uri_file.display()))?;
    Ok(PgPool::connect(uri.trim()).await?)
}
