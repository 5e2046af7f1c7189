//! # cardmedia
//!
//! Command-line front end to the card media store. Assembles the store from
//! settings and the plugins enabled at compile time.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cm_config::{CloudSettings, LogSettings, Settings};
use cm_core::{ImagePayload, ImageSource, SaveOptions, ThumbnailSpec};
use cm_kv_sqlite::SqliteKvStore;
use cm_migrate::{KvCardStore, MigrationService};
use cm_storage_local::LocalFileStore;
use cm_store::{MediaStore, MetadataIndex};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "cloud-http")]
use cm_cloud_http::{HttpCloudConfig, HttpCloudOffload};

#[derive(Parser)]
#[command(name = "cardmedia")]
#[command(about = "Local media store for business-card images", long_about = None)]
struct Cli {
    /// Settings file; missing files are ignored
    #[arg(long, env = "CARDMEDIA_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an image from a path, file:// URI or data: URI
    Save {
        input: String,
        /// Treat INPUT as base64 (bare or data URI) even without a data: prefix
        #[arg(long)]
        inline: bool,
        #[arg(long)]
        offload: bool,
        #[arg(long)]
        thumbnail: bool,
        #[arg(long)]
        no_dedupe: bool,
        #[arg(long, value_enum, default_value_t = SourceArg::External)]
        source: SourceArg,
    },
    /// Print the best reference for an image
    Resolve {
        id: String,
        #[arg(long)]
        prefer_cloud: bool,
    },
    /// Print an image as a data URI
    Export { id: String },
    /// Remove an image and its files
    Delete { id: String },
    /// Offload an already-stored image
    Offload { id: String },
    /// Print every record as JSON
    List,
    /// Print aggregate counters as JSON
    Stats,
    /// Drop records whose file is gone and sweep stale staging files
    Reconcile,
    /// Move inline card images into the store
    Migrate,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceArg {
    Camera,
    Library,
    External,
}

impl From<SourceArg> for ImageSource {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Camera => ImageSource::Camera,
            SourceArg::Library => ImageSource::Library,
            SourceArg::External => ImageSource::External,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    init_tracing(&settings.log);

    let kv = Arc::new(open_kv(&settings.index.database_url).await?);
    let index = MetadataIndex::spawn(kv.clone(), settings.index.key.clone());
    let files = LocalFileStore::new(settings.media.root_dir.clone());
    let store = Arc::new(attach_cloud(MediaStore::new(files, index), settings.cloud)?);

    match cli.command {
        Commands::Save {
            input,
            inline,
            offload,
            thumbnail,
            no_dedupe,
            source,
        } => {
            let payload = if inline {
                ImagePayload::inline(input)
            } else {
                ImagePayload::from_uri(&input)
            };
            let mut options = SaveOptions::default()
                .with_offload(offload)
                .with_dedupe(!no_dedupe)
                .with_source(source.into());
            if thumbnail {
                options = options.with_thumbnail(ThumbnailSpec {
                    max_dimension: settings.media.thumbnail_max_dimension,
                    quality: settings.media.thumbnail_quality,
                });
            }
            let outcome = store.save(&payload, options).await?;
            if outcome.is_degraded() {
                eprintln!("warning: image kept on device only");
            }
            print_json(outcome.record())?;
        }
        Commands::Resolve { id, prefer_cloud } => match store.resolve_uri(&id, prefer_cloud).await? {
            Some(uri) => println!("{uri}"),
            None => bail!("image {id} not found"),
        },
        Commands::Export { id } => match store.resolve_base64(&id).await? {
            Some(data_uri) => println!("{data_uri}"),
            None => bail!("image {id} not found"),
        },
        Commands::Delete { id } => {
            if store.delete(&id).await? {
                println!("deleted {id}");
            } else {
                println!("{id} was not stored");
            }
        }
        Commands::Offload { id } => {
            let outcome = store.offload(&id).await?;
            if outcome.is_degraded() {
                eprintln!("warning: image kept on device only");
            }
            print_json(outcome.record())?;
        }
        Commands::List => print_json(&store.list().await?)?,
        Commands::Stats => print_json(&store.stats().await?)?,
        Commands::Reconcile => {
            let pruned = store.reconcile_orphans().await?;
            println!("pruned {pruned} orphaned record(s)");
        }
        Commands::Migrate => {
            let cards = Arc::new(KvCardStore::new(kv));
            let report = MigrationService::new(store, cards).run().await?;
            print_json(&report)?;
        }
    }

    Ok(())
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if log.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// SQLite will not create missing parent directories of the database file.
async fn open_kv(database_url: &str) -> Result<SqliteKvStore> {
    if let Some(parent) = sqlite_file(database_url).and_then(Path::parent) {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let kv = SqliteKvStore::connect(database_url)
        .await
        .with_context(|| format!("Failed to open {database_url}"))?;
    info!(url = %database_url, "Metadata database ready");
    Ok(kv)
}

fn sqlite_file(database_url: &str) -> Option<&Path> {
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Some(Path::new(path))
}

#[cfg(feature = "cloud-http")]
fn attach_cloud(store: MediaStore, cloud: Option<CloudSettings>) -> Result<MediaStore> {
    let Some(cloud) = cloud else {
        return Ok(store);
    };
    let timeout = cloud.timeout();
    info!(endpoint = %cloud.endpoint, bucket = %cloud.bucket, "Cloud offload enabled");
    let offload = HttpCloudOffload::new(HttpCloudConfig {
        endpoint: cloud.endpoint,
        bucket: cloud.bucket,
        public_base_url: cloud.public_base_url,
        api_token: cloud.api_token,
        timeout,
    })?;
    Ok(store.with_cloud(Arc::new(offload), timeout))
}

#[cfg(not(feature = "cloud-http"))]
fn attach_cloud(store: MediaStore, cloud: Option<CloudSettings>) -> Result<MediaStore> {
    if cloud.is_some() {
        tracing::warn!("[cloud] settings ignored: built without the cloud-http feature");
    }
    Ok(store)
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
