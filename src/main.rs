use anyhow::{Context, Result};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use std::{io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{AppConfig, Command};
use models::event::UploadEvent;
use services::{
    digest::DigestComposer,
    mailer::SmtpMailer,
    metadata_store::MetadataStore,
    object_store::ObjectStore,
    storage_service::{self, LocalObjectStore},
    thumbnail::Thumbnailer,
    upload_processor::{UploadProcessor, UploadSettings},
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!(
        storage_dir = %cfg.storage_dir,
        database_url = %cfg.database_url,
        public_url = %cfg.public_url,
        source_bucket = %cfg.source_bucket,
        thumbnail_bucket = %cfg.thumbnail_bucket,
        metadata = %format!("{}/{}", cfg.metadata_bucket, cfg.metadata_key),
        write_mode = ?cfg.write_mode,
        ?command,
        "starting object-digest"
    );

    let storage = open_storage(&cfg).await?;

    // --- Handle migration mode ---
    if command == Command::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    for bucket in cfg.buckets() {
        storage
            .ensure_bucket(bucket, &cfg.region)
            .await
            .with_context(|| format!("provisioning bucket `{bucket}`"))?;
    }

    let state = build_state(&cfg, storage)?;
    state
        .metadata
        .initialize()
        .await
        .context("creating metadata record")?;

    match command {
        Command::Serve => serve(&cfg, state).await,
        Command::Migrate => Ok(()),
        Command::Process { event } => process_event_file(&state, &event).await,
        Command::Digest { now } => run_digest(&state, now).await,
    }
}

/// Create directories, connect to SQLite and apply the schema.
async fn open_storage(cfg: &AppConfig) -> Result<LocalObjectStore> {
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir).await?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).await?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let pool = storage_service::connect(&cfg.database_url, 5)
        .await
        .with_context(|| format!("connecting to {}", cfg.database_url))?;
    let storage = LocalObjectStore::new(Arc::new(pool), cfg.storage_dir.clone());
    storage.migrate().await.context("applying schema")?;
    Ok(storage)
}

/// Construct every service once; invocations share them.
fn build_state(cfg: &AppConfig, storage: LocalObjectStore) -> Result<AppState> {
    let store: Arc<dyn ObjectStore> = Arc::new(storage.clone());
    let metadata = MetadataStore::new(
        store.clone(),
        cfg.metadata_bucket.clone(),
        cfg.metadata_key.clone(),
        cfg.write_mode,
    )
    .with_retry_backoff(Duration::from_millis(cfg.append_backoff_ms));

    let processor = UploadProcessor::new(
        store,
        metadata.clone(),
        Thumbnailer::default(),
        UploadSettings {
            source_bucket: cfg.source_bucket.clone(),
            thumbnail_bucket: cfg.thumbnail_bucket.clone(),
            public_url: cfg.public_url.clone(),
            concurrency: cfg.thumbnail_concurrency,
        },
    );

    let mailer = SmtpMailer::new(&cfg.smtp).context("configuring mailer")?;
    tracing::info!(
        smtp_enabled = mailer.is_enabled(),
        recipient = %cfg.email_recipient,
        "digest mailer ready"
    );
    let digest = DigestComposer::new(metadata.clone(), Arc::new(mailer), cfg.email_recipient.clone());

    Ok(AppState {
        storage,
        metadata,
        processor,
        digest,
    })
}

async fn serve(cfg: &AppConfig, state: AppState) -> Result<()> {
    let app: Router = routes::routes::routes().with_state(state);

    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// One upload invocation from a JSON file; the report goes to stdout.
async fn process_event_file(state: &AppState, path: &Path) -> Result<()> {
    let raw = fs::read(path)
        .await
        .with_context(|| format!("reading event file {}", path.display()))?;
    let event: UploadEvent = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing event file {}", path.display()))?;

    let report = state.processor.process_batch(event.into_notifications()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_digest(state: &AppState, now: Option<i64>) -> Result<()> {
    let now: DateTime<Utc> = match now {
        Some(ts) => Utc
            .timestamp_opt(ts, 0)
            .single()
            .with_context(|| format!("invalid --now timestamp {ts}"))?,
        None => Utc::now(),
    };

    let report = state.digest.run(now).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
