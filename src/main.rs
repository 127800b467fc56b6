use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use gaia_vault::{
    config::{AppConfig, Args, Command},
    models::Document,
    records::{Record, RecordOptions, RecordService, Session},
    routes,
    services::{PartitionedDownloader, PartitionedUploader, ProgressRegister},
    state::AppState,
    storage::{DiskStore, GetFileOptions},
};
use serde_json::Value;
use std::{io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let args = Args::parse();
    let cfg = AppConfig::from_env_and_args(&args)?;
    tracing::info!("Starting gaia-vault with config: {:?}", cfg);

    // --- Open blob store ---
    let store = DiskStore::connect(&cfg.database_url, &cfg.storage_dir)
        .await
        .with_context(|| format!("opening blob store at {}", cfg.database_url))?;

    // --- Handle migration mode ---
    if args.migrate {
        store.migrate().await.context("running migrations")?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let session = Session::with_backend(store.clone());
    let documents = Arc::new(RecordService::<Document>::new(session));
    register_hooks(&documents);

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cfg, AppState::new(store, documents)?).await,
        Command::Upload { path, content_type } => {
            upload(&cfg, &documents, path, content_type).await
        }
        Command::Show { id } => {
            let document = documents.get(&id, &GetFileOptions::default()).await?;
            print_json(&document)
        }
        Command::Download { id, output } => download(&cfg, &documents, &id, output).await,
        Command::Delete { id } => {
            let mut document = documents.get(&id, &GetFileOptions::default()).await?;
            documents
                .delete(&mut document, &RecordOptions::default())
                .await?;
            Ok(())
        }
    }
}

fn register_hooks(documents: &RecordService<Document>) {
    documents
        .hooks()
        .after_save(|doc: &mut Document, _: &RecordOptions| -> anyhow::Result<()> {
            tracing::info!(id = doc.id().unwrap_or_default(), "Saved document");
            Ok(())
        });
    documents
        .hooks()
        .after_delete(|doc: &mut Document, _: &RecordOptions| -> anyhow::Result<()> {
            tracing::info!(
                id = doc.id().unwrap_or_default(),
                url = doc.url.as_deref().unwrap_or_default(),
                "Deleted document record; parts are left in place"
            );
            Ok(())
        });
}

async fn upload(
    cfg: &AppConfig,
    documents: &RecordService<Document>,
    path: PathBuf,
    content_type: Option<String>,
) -> Result<()> {
    let mut document = Document::from_file(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    document.content_type = content_type;

    let uploader =
        PartitionedUploader::new(documents.session(), document, cfg.uploader_options())?;
    uploader.on_progress(|p| {
        tracing::info!(
            completed = p.completed,
            total = p.total,
            "Upload {:.0}%",
            p.fraction() * 100.0
        );
    });

    let mut document = uploader.upload().await?;
    document.uploaded = true;
    documents
        .save(&mut document, &RecordOptions::default())
        .await
        .context("marking document uploaded")?;
    print_json(&document)
}

async fn download(
    cfg: &AppConfig,
    documents: &RecordService<Document>,
    id: &str,
    output: PathBuf,
) -> Result<()> {
    let document = documents.get(id, &GetFileOptions::default()).await?;
    let progress = ProgressRegister::new(document.size);
    progress.on_change(|p| {
        tracing::info!(
            completed = p.completed,
            total = p.total,
            "Download {:.0}%",
            p.fraction() * 100.0
        );
    });

    let content = PartitionedDownloader::new(documents.session())?
        .with_concurrency(cfg.upload_concurrency)
        .download_with_progress(&document, Some(&progress))
        .await?;
    tokio::fs::write(&output, &content)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    tracing::info!(id, bytes = content.len(), "Wrote {}", output.display());
    Ok(())
}

fn print_json(document: &Document) -> Result<()> {
    let json = serde_json::to_string_pretty(&Value::Object(document.manifest()))?;
    println!("{json}");
    Ok(())
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
